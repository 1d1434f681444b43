//! 持久化调度
//!
//! - `work_scheduler`: `schedule_at` / `cancel`
//! - `worker`: 轮询到期任务并交给 `WorkHandler`

mod work_scheduler;
mod worker;

pub use work_scheduler::Scheduler;
pub use worker::{SchedulerWorker, WorkHandler};
