//! 调度任务 Worker
//!
//! 轮询到期任务并交给处理方执行。任务状态保存在仓储中，
//! 进程重启后未完成的任务会在认领租约过期后被重新认领。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use waitlist_shared::observability::metrics;
use waitlist_shared::retry::{RetryPolicy, retry_with_policy};

use super::Scheduler;
use crate::error::{Result, WaitlistError};
use crate::models::{ScheduledWork, WorkKind};

/// 单个任务最多处理的次数，超过后标记为 Failed
const MAX_WORK_ATTEMPTS: i32 = 10;

/// 调度任务的处理方
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkHandler: Send + Sync {
    async fn handle(&self, kind: &WorkKind) -> Result<()>;
}

pub struct SchedulerWorker {
    handler: Arc<dyn WorkHandler>,
    scheduler: Arc<Scheduler>,
    poll_interval: Duration,
    batch_size: i64,
    /// 认领查询本身失败时的重试
    claim_policy: RetryPolicy,
    /// 任务处理失败后的退避
    backoff: RetryPolicy,
}

impl SchedulerWorker {
    pub fn new(
        handler: Arc<dyn WorkHandler>,
        scheduler: Arc<Scheduler>,
        poll_interval: Duration,
        batch_size: i64,
    ) -> Self {
        Self {
            handler,
            scheduler,
            poll_interval,
            batch_size,
            claim_policy: RetryPolicy {
                max_retries: 2,
                initial_delay: Duration::from_millis(200),
                max_delay: Duration::from_secs(2),
                multiplier: 2.0,
                steps: Vec::new(),
            },
            backoff: RetryPolicy {
                max_retries: MAX_WORK_ATTEMPTS as u32,
                initial_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(300),
                multiplier: 2.0,
                steps: Vec::new(),
            },
        }
    }

    /// 主循环：持续处理到期任务直到进程退出
    pub async fn run(&self) {
        info!(
            poll_interval = ?self.poll_interval,
            batch_size = self.batch_size,
            "SchedulerWorker 已启动"
        );

        loop {
            match self.run_once().await {
                Ok(0) => {}
                Ok(count) => debug!(count, "本轮处理调度任务完成"),
                Err(e) => error!(error = %e, "认领调度任务出错"),
            }

            metrics::set_worker_last_run("scheduler");

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// 认领并处理一批到期任务，返回成功处理的数量
    pub async fn run_once(&self) -> Result<usize> {
        let claimed = retry_with_policy(
            &self.claim_policy,
            "claim_due_work",
            |e: &WaitlistError| e.is_retryable(),
            || self.scheduler.claim_due(self.batch_size),
        )
        .await?;

        let mut processed = 0;
        for work in claimed {
            if self.process(&work).await {
                processed += 1;
            }
        }
        Ok(processed)
    }

    async fn process(&self, work: &ScheduledWork) -> bool {
        let kind = work.kind.label();
        match self.handler.handle(&work.kind).await {
            Ok(()) => {
                if let Err(e) = self.scheduler.complete(work.id).await {
                    // 未标记完成的任务会被重新认领，处理方需保证幂等
                    warn!(work_id = %work.id, kind, error = %e, "标记任务完成失败");
                }
                metrics::record_scheduled_work(kind);
                true
            }
            Err(e) => {
                let attempts = work.attempts + 1;
                // 系统错误一律退避重试，业务错误重试也不会成功
                if !e.is_business_error() && attempts < MAX_WORK_ATTEMPTS {
                    let delay = self.backoff.delay_for_attempt(work.attempts.max(0) as u32);
                    let delay = chrono::Duration::from_std(delay)
                        .unwrap_or_else(|_| chrono::Duration::minutes(5));
                    warn!(work_id = %work.id, kind, attempts, error = %e, "任务处理失败，稍后重试");
                    if let Err(e) = self.scheduler.reschedule(work, delay).await {
                        error!(work_id = %work.id, error = %e, "重新登记任务失败");
                    }
                } else {
                    error!(
                        work_id = %work.id,
                        kind,
                        attempts,
                        error = %e,
                        error_code = e.error_code(),
                        "任务处理失败，不再重试"
                    );
                    if let Err(e) = self.scheduler.mark_failed(work.id).await {
                        error!(work_id = %work.id, error = %e, "标记任务失败状态出错");
                    }
                }
                false
            }
        }
    }
}
