//! 数据访问层
//!
//! 每个仓储都有内存实现（测试与单进程部署）和 PostgreSQL 实现。

pub mod memory;
pub mod postgres;
mod traits;

use std::sync::Arc;

use sqlx::PgPool;

pub use memory::{
    InMemoryAuditRepository, InMemoryNotificationJobRepository, InMemoryOfferRepository,
    InMemoryScheduledWorkRepository, InMemoryStores, InMemorySuppressionRepository,
    InMemoryWaitingListRepository,
};
pub use postgres::{
    PgAuditRepository, PgNotificationJobRepository, PgOfferRepository, PgScheduledWorkRepository,
    PgSuppressionRepository, PgWaitingListRepository,
};
pub use traits::*;

/// 引擎所需的全部仓储
#[derive(Clone)]
pub struct Repositories {
    pub entries: Arc<dyn WaitingListRepository>,
    pub offers: Arc<dyn OfferRepository>,
    pub jobs: Arc<dyn NotificationJobRepository>,
    pub suppressions: Arc<dyn SuppressionRepository>,
    pub audit: Arc<dyn AuditRepository>,
    pub work: Arc<dyn ScheduledWorkRepository>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            entries: Arc::new(PgWaitingListRepository::new(pool.clone())),
            offers: Arc::new(PgOfferRepository::new(pool.clone())),
            jobs: Arc::new(PgNotificationJobRepository::new(pool.clone())),
            suppressions: Arc::new(PgSuppressionRepository::new(pool.clone())),
            audit: Arc::new(PgAuditRepository::new(pool.clone())),
            work: Arc::new(PgScheduledWorkRepository::new(pool)),
        }
    }

    /// 共享传入的内存仓储，调用方可继续持有具体类型做断言
    pub fn in_memory(stores: &InMemoryStores) -> Self {
        Self {
            entries: stores.entries.clone(),
            offers: stores.offers.clone(),
            jobs: stores.jobs.clone(),
            suppressions: stores.suppressions.clone(),
            audit: stores.audit.clone(),
            work: stores.work.clone(),
        }
    }
}
