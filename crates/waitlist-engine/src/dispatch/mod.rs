//! 通知派发模块
//!
//! - `suppression`: 屏蔽名单（硬退信、软退信累计、退订）
//! - `eligibility`: 发送前的资格检查
//! - `quiet_hours`: 收件人本地免打扰时段
//! - `transport`: 投递通道契约与模拟实现
//! - `dispatcher`: 去重、延后、投递与重试

mod dispatcher;
mod eligibility;
mod quiet_hours;
mod suppression;
pub mod transport;

pub use dispatcher::{
    DispatchOutcome, DispatchResult, HARD_FAILURE, NO_ELIGIBLE_CHANNEL, NotificationDispatcher,
    RETRIES_EXHAUSTED,
};
pub use eligibility::{Eligibility, EligibilityGate, IneligibleReason};
pub use quiet_hours::QuietHours;
pub use suppression::SuppressionRegistry;
pub use transport::{
    EmailTransport, OutboundMessage, SendOutcome, SmsTransport, Transport, TransportConfig,
};
