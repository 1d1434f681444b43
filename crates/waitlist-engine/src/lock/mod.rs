//! 互斥锁模块
//!
//! 为每个 (business, service) 提供互斥边界，保证同一时段的 Offer 创建、
//! 接受与重新入队严格串行。
//!
//! ## 使用示例
//!
//! ```ignore
//! let guard = lock_manager.acquire("biz1", "svc1").await?;
//! do_critical_work().await?;
//! guard.release().await?;
//! ```

mod lock_manager;

pub use lock_manager::{LockConfig, LockGuard, LockManager};
