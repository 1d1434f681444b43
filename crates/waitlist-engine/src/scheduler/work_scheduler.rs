//! 持久化调度
//!
//! Offer 到期、免打扰延后和软失败重试都写入调度仓储，进程重启后仍会执行。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::Result;
use crate::models::{ScheduledWork, WorkKind};
use crate::repository::ScheduledWorkRepository;

pub struct Scheduler {
    repo: Arc<dyn ScheduledWorkRepository>,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(repo: Arc<dyn ScheduledWorkRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    /// 在 run_at 执行 kind，返回任务 ID（用于取消）
    pub async fn schedule_at(&self, run_at: DateTime<Utc>, kind: WorkKind) -> Result<Uuid> {
        let work = ScheduledWork::new(kind, run_at, self.clock.now());
        self.repo.insert(&work).await?;
        debug!(
            work_id = %work.id,
            kind = work.kind.label(),
            run_at = %run_at,
            "调度任务已登记"
        );
        Ok(work.id)
    }

    /// 取消尚未执行的任务；已执行或已取消时返回 false
    pub async fn cancel(&self, id: Uuid) -> Result<bool> {
        let cancelled = self.repo.cancel(id).await?;
        if cancelled {
            debug!(work_id = %id, "调度任务已取消");
        }
        Ok(cancelled)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<ScheduledWork>> {
        self.repo.get(id).await
    }

    pub(crate) async fn claim_due(&self, limit: i64) -> Result<Vec<ScheduledWork>> {
        self.repo.claim_due(self.clock.now(), limit).await
    }

    pub(crate) async fn complete(&self, id: Uuid) -> Result<()> {
        self.repo.complete(id, self.clock.now()).await
    }

    pub(crate) async fn reschedule(
        &self,
        work: &ScheduledWork,
        delay: chrono::Duration,
    ) -> Result<()> {
        let run_at = self.clock.now() + delay;
        info!(
            work_id = %work.id,
            kind = work.kind.label(),
            run_at = %run_at,
            attempts = work.attempts + 1,
            "调度任务处理失败，稍后重试"
        );
        self.repo.reschedule(work.id, run_at, work.attempts + 1).await
    }

    pub(crate) async fn mark_failed(&self, id: Uuid) -> Result<()> {
        self.repo.mark_failed(id, self.clock.now()).await
    }
}
