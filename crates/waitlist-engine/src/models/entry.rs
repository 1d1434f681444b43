//! 候补记录模型

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{EntryStatus, RemovalReason};

/// 候补记录
///
/// 归 WaitingListQueue 所有，状态只能通过队列操作变更。
/// priority 在加入时计算一次，此后不再变化。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WaitingListEntry {
    pub id: Uuid,
    pub business_id: String,
    pub service_id: String,
    pub customer_id: String,
    pub priority: f64,
    pub status: EntryStatus,
    pub removal_reason: Option<RemovalReason>,
    pub joined_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WaitingListEntry {
    pub fn new(
        business_id: impl Into<String>,
        service_id: impl Into<String>,
        customer_id: impl Into<String>,
        priority: f64,
        joined_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            business_id: business_id.into(),
            service_id: service_id.into(),
            customer_id: customer_id.into(),
            priority,
            status: EntryStatus::Active,
            removal_reason: None,
            joined_at,
            updated_at: joined_at,
        }
    }

    pub fn is_for(&self, business_id: &str, service_id: &str) -> bool {
        self.business_id == business_id && self.service_id == service_id
    }
}

/// 出队顺序：priority 降序，同分按 joined_at 升序（FIFO），最后按 id 保证稳定
pub fn offer_order(a: &WaitingListEntry, b: &WaitingListEntry) -> Ordering {
    b.priority
        .partial_cmp(&a.priority)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.joined_at.cmp(&b.joined_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// 顾客在某商家的历史（来自顾客目录）
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerHistory {
    pub visit_count: u32,
    /// 累计消费（分）
    pub total_spend_cents: i64,
}

/// 优先级权重
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityWeights {
    pub visit_weight: f64,
    pub spend_weight: f64,
}

impl PriorityWeights {
    pub fn score(&self, history: &CustomerHistory) -> f64 {
        f64::from(history.visit_count) * self.visit_weight
            + history.total_spend_cents as f64 * self.spend_weight
    }
}

/// 队列快照中的一行
#[derive(Debug, Clone, Serialize)]
pub struct QueuePosition {
    /// 从 1 开始
    pub position: usize,
    pub entry: WaitingListEntry,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn entry(priority: f64, joined_offset_secs: i64) -> WaitingListEntry {
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        WaitingListEntry::new(
            "biz1",
            "svc1",
            "c",
            priority,
            base + Duration::seconds(joined_offset_secs),
        )
    }

    #[test]
    fn test_priority_score() {
        let weights = PriorityWeights {
            visit_weight: 10.0,
            spend_weight: 0.01,
        };
        let history = CustomerHistory {
            visit_count: 3,
            total_spend_cents: 25_000,
        };
        assert!((weights.score(&history) - 280.0).abs() < f64::EPSILON);
        assert_eq!(weights.score(&CustomerHistory::default()), 0.0);
    }

    #[test]
    fn test_offer_order_priority_then_fifo() {
        let low = entry(5.0, 0);
        let high_late = entry(10.0, 5);
        let high_early = entry(10.0, 1);

        let mut entries = vec![low.clone(), high_late.clone(), high_early.clone()];
        entries.sort_by(offer_order);

        assert_eq!(entries[0].id, high_early.id);
        assert_eq!(entries[1].id, high_late.id);
        assert_eq!(entries[2].id, low.id);
    }
}
