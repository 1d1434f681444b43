//! 审计记录模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::AuditSubject;

/// 状态流转或派发尝试的审计记录，只追加
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditRecord {
    pub id: Uuid,
    pub subject_type: AuditSubject,
    pub subject_id: String,
    pub action: String,
    pub detail: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}
