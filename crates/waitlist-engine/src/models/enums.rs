//! 候补引擎枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化

use serde::{Deserialize, Serialize};

/// 候补记录状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    /// 排队中，可被选中
    #[default]
    Active,
    /// 已收到一个待确认的 Offer
    Notified,
    /// 已接受 Offer 并生成预约
    Booked,
    /// 已离开队列（顾客主动或商家移除）
    Removed,
}

impl EntryStatus {
    /// 仍在等待中（占用队列名额）
    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::Active | Self::Notified)
    }
}

/// 离开队列的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemovalReason {
    CustomerLeft,
    BusinessRemoved,
}

/// Offer 状态
///
/// 初始为 Pending，其余均为终态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfferStatus {
    #[default]
    Pending,
    Accepted,
    Declined,
    Expired,
    Cancelled,
}

impl OfferStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Accepted => "ACCEPTED",
            Self::Declined => "DECLINED",
            Self::Expired => "EXPIRED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 顾客对 Offer 的答复
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Accept,
    Decline,
}

/// 通知任务状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// 待发送（含等待软失败重试）
    #[default]
    Queued,
    Sending,
    Sent,
    /// 处于免打扰时段，等待 resume_at
    Deferred,
    Failed,
}

impl JobStatus {
    /// 已结束，不会再被调度
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Deferred => "deferred",
            Self::Failed => "failed",
        }
    }
}

/// 通知渠道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Email,
    Sms,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
        }
    }
}

/// 屏蔽原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum SuppressionReason {
    HardBounce,
    RepeatedSoftBounce,
    OptOut,
}

impl SuppressionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HardBounce => "hard_bounce",
            Self::RepeatedSoftBounce => "repeated_soft_bounce",
            Self::OptOut => "opt_out",
        }
    }
}

/// 渠道地址有效性
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelValidity {
    #[default]
    Valid,
    Restricted,
    Invalid,
}

/// 退信严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BounceSeverity {
    /// 永久失败（地址无效等），立即屏蔽
    Hard,
    /// 临时失败（超时、服务商 5xx），累计到阈值后屏蔽
    Soft,
}

/// 触发通知的业务事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    OfferCreated,
    OfferExpired,
    OfferCancelled,
    BookingConfirmed,
    BookingCancelled,
    PaymentFailed,
}

impl EventType {
    /// 紧急事件不受免打扰时段限制（但仍受屏蔽名单限制）
    pub fn is_urgent(&self) -> bool {
        matches!(
            self,
            Self::BookingConfirmed | Self::BookingCancelled | Self::PaymentFailed
        )
    }

    /// 候补相关事件还需要顾客订阅了候补通知
    pub fn requires_waitlist_opt_in(&self) -> bool {
        matches!(
            self,
            Self::OfferCreated | Self::OfferExpired | Self::OfferCancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OfferCreated => "OFFER_CREATED",
            Self::OfferExpired => "OFFER_EXPIRED",
            Self::OfferCancelled => "OFFER_CANCELLED",
            Self::BookingConfirmed => "BOOKING_CONFIRMED",
            Self::BookingCancelled => "BOOKING_CANCELLED",
            Self::PaymentFailed => "PAYMENT_FAILED",
        }
    }

    /// 默认模板标识，渲染由模板服务负责
    pub fn default_template(&self) -> &'static str {
        match self {
            Self::OfferCreated => "waitlist.offer_created",
            Self::OfferExpired => "waitlist.offer_expired",
            Self::OfferCancelled => "waitlist.offer_cancelled",
            Self::BookingConfirmed => "booking.confirmed",
            Self::BookingCancelled => "booking.cancelled",
            Self::PaymentFailed => "payment.failed",
        }
    }
}

/// 审计对象类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditSubject {
    Entry,
    Offer,
    Notification,
    Suppression,
}

/// 调度任务状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkStatus {
    #[default]
    Pending,
    Claimed,
    Done,
    Cancelled,
    Failed,
}
