//! 持久化调度任务模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::WorkStatus;

/// 认领后超过该时长仍未完成的任务视为处理进程已崩溃，可被重新认领
pub const CLAIM_LEASE_SECS: i64 = 600;

/// 调度任务类型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkKind {
    /// Offer 保留期到期
    ExpireOffer { offer_id: Uuid },
    /// 免打扰时段结束后继续发送
    ResumeNotification { idempotency_key: String },
    /// 软失败退避后重试
    RetryNotification { idempotency_key: String },
}

impl WorkKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ExpireOffer { .. } => "expire_offer",
            Self::ResumeNotification { .. } => "resume_notification",
            Self::RetryNotification { .. } => "retry_notification",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledWork {
    pub id: Uuid,
    pub kind: WorkKind,
    pub run_at: DateTime<Utc>,
    pub status: WorkStatus,
    /// 处理失败的次数
    pub attempts: i32,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledWork {
    pub fn new(kind: WorkKind, run_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            run_at,
            status: WorkStatus::Pending,
            attempts: 0,
            claimed_at: None,
            created_at: now,
        }
    }
}
