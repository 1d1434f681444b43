//! Offer 与预约草稿模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::OfferStatus;

/// 可预约时段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Slot {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn is_valid(&self) -> bool {
        self.end > self.start
    }

    /// 时段的规范化键：`{business}:{service}:{start}:{end}`（Unix 秒）
    pub fn key(&self, business_id: &str, service_id: &str) -> String {
        format!(
            "{}:{}:{}:{}",
            business_id,
            service_id,
            self.start.timestamp(),
            self.end.timestamp()
        )
    }
}

/// 限时独占的时段邀约
///
/// token 是顾客侧唯一的操作凭证。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Offer {
    pub id: Uuid,
    #[serde(skip_serializing, default)]
    pub token: String,
    pub entry_id: Uuid,
    pub customer_id: String,
    pub business_id: String,
    pub service_id: String,
    pub slot_start: DateTime<Utc>,
    pub slot_end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub hold_expires_at: DateTime<Utc>,
    pub status: OfferStatus,
    /// 邀约通知的发送轮次
    pub notification_attempts: i32,
    pub resolved_at: Option<DateTime<Utc>>,
    /// 保留期到期任务，Offer 先被处理时取消
    pub expiry_work_id: Option<Uuid>,
}

impl Offer {
    pub fn slot(&self) -> Slot {
        Slot::new(self.slot_start, self.slot_end)
    }

    pub fn slot_key(&self) -> String {
        self.slot().key(&self.business_id, &self.service_id)
    }

    pub fn is_same_slot(&self, business_id: &str, service_id: &str, slot: &Slot) -> bool {
        self.business_id == business_id
            && self.service_id == service_id
            && self.slot_start == slot.start
            && self.slot_end == slot.end
    }

    /// 保留期是否已过（到期时刻本身视为已过期）
    pub fn is_hold_elapsed(&self, now: DateTime<Utc>) -> bool {
        now >= self.hold_expires_at
    }
}

/// 取消政策
///
/// 结构化表示，不从自由文本推断。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancellationPolicy {
    /// 开始前至少 notice_hours 小时取消可全额退款
    Flexible { notice_hours: u32 },
    NonRefundable,
}

impl Default for CancellationPolicy {
    fn default() -> Self {
        Self::Flexible { notice_hours: 24 }
    }
}

impl CancellationPolicy {
    /// 在 `at` 时刻取消 `slot_start` 开始的预约是否可退款
    pub fn is_refundable_at(&self, slot_start: DateTime<Utc>, at: DateTime<Utc>) -> bool {
        match self {
            Self::Flexible { notice_hours } => {
                slot_start - at >= chrono::Duration::hours(i64::from(*notice_hours))
            }
            Self::NonRefundable => false,
        }
    }
}

/// 接受 Offer 后交给预约子系统持久化的草稿
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingDraft {
    pub offer_id: Uuid,
    pub entry_id: Uuid,
    pub customer_id: String,
    pub business_id: String,
    pub service_id: String,
    pub slot: Slot,
    pub cancellation_policy: CancellationPolicy,
    pub created_at: DateTime<Utc>,
}

/// ResolveOffer 的结果
#[derive(Debug, Clone, PartialEq)]
pub enum OfferResolution {
    Booked(BookingDraft),
    /// next_offer 为同一时段自动发给下一位顾客的 Offer
    Declined { next_offer: Option<Uuid> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_slot_key_and_validity() {
        let start = Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap();
        let slot = Slot::new(start, start + Duration::minutes(45));
        assert!(slot.is_valid());
        assert_eq!(
            slot.key("biz1", "svc1"),
            format!("biz1:svc1:{}:{}", start.timestamp(), start.timestamp() + 2700)
        );
        assert!(!Slot::new(start, start).is_valid());
    }

    #[test]
    fn test_cancellation_policy() {
        let start = Utc.with_ymd_and_hms(2026, 5, 2, 10, 0, 0).unwrap();
        let flexible = CancellationPolicy::Flexible { notice_hours: 24 };
        assert!(flexible.is_refundable_at(start, start - Duration::hours(25)));
        assert!(!flexible.is_refundable_at(start, start - Duration::hours(3)));
        assert!(!CancellationPolicy::NonRefundable.is_refundable_at(start, start - Duration::days(7)));

        let json = serde_json::to_value(flexible).unwrap();
        assert_eq!(json["type"], "FLEXIBLE");
        assert_eq!(json["notice_hours"], 24);
    }
}
