//! PostgreSQL 仓储实现
//!
//! 使用运行时校验的 `sqlx::query_as`，枚举以 varchar 存储，复合字段以 JSONB 存储。

mod audit_repo;
mod entry_repo;
mod job_repo;
mod offer_repo;
mod suppression_repo;
mod work_repo;

pub use audit_repo::PgAuditRepository;
pub use entry_repo::PgWaitingListRepository;
pub use job_repo::PgNotificationJobRepository;
pub use offer_repo::PgOfferRepository;
pub use suppression_repo::PgSuppressionRepository;
pub use work_repo::PgScheduledWorkRepository;
