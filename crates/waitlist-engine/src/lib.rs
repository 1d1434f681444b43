//! 候补名单 Offer 与通知派发引擎
//!
//! 商家某个 (business, service) 时段空出后，按优先级把时段以限时 Offer 的形式
//! 发给候补顾客，并通过邮件/短信通知。
//!
//! ## 核心功能
//!
//! - **候补队列**：按加入时计算的优先级排序，同分先到先得
//! - **Offer 生命周期**：同一时段同时最多一个待确认 Offer，接受、拒绝、过期都会级联处理
//! - **通知派发**：幂等去重、资格检查、免打扰延后、软失败阶梯重试
//! - **屏蔽名单**：硬退信、软退信累计与退订
//! - **持久化调度**：Offer 过期与通知重试都落库，进程重启后继续执行
//! - **审计**：每次状态变更与发送尝试都可追溯
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `repository`: 仓储层（内存与 PostgreSQL）
//! - `queue`: 候补队列
//! - `offer`: Offer 状态机
//! - `dispatch`: 通知派发与屏蔽名单
//! - `scheduler`: 持久化调度与后台 Worker
//! - `lock`: (business, service) 互斥锁
//! - `engine`: 对外门面

pub mod audit;
pub mod booking;
pub mod clock;
pub mod directory;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod lock;
pub mod models;
pub mod offer;
pub mod queue;
pub mod repository;
pub mod scheduler;

pub use audit::AuditLog;
pub use booking::{BookingSink, InMemoryBookingSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use directory::{CustomerDirectory, InMemoryDirectory};
pub use dispatch::{
    DispatchOutcome, DispatchResult, EmailTransport, NotificationDispatcher, OutboundMessage,
    SendOutcome, SmsTransport, SuppressionRegistry, Transport, TransportConfig,
};
pub use engine::WaitlistEngine;
pub use error::{Result, WaitlistError};
pub use lock::{LockConfig, LockGuard, LockManager};
pub use models::*;
pub use offer::OfferLifecycleManager;
pub use queue::WaitingListQueue;
pub use repository::{InMemoryStores, Repositories};
pub use scheduler::{Scheduler, SchedulerWorker, WorkHandler};
