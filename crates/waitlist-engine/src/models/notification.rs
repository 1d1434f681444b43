//! 通知事件与通知任务模型

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::enums::{Channel, EventType, JobStatus};

/// 幂等键派生版本，变更派生规则时递增
const IDEMPOTENCY_KEY_VERSION: &str = "v1";

/// 派生通知幂等键
///
/// 对规范化元组 (版本, 事件类型, 商家, 顾客, 业务引用) 做 SHA-256，
/// 每个分量以 8 字节大端长度前缀 + UTF-8 字节写入，避免分隔符歧义。
/// 结果为 64 位小写十六进制字符串。
pub fn derive_idempotency_key(
    event_type: EventType,
    business_id: &str,
    customer_id: &str,
    reference: &str,
) -> String {
    let mut hasher = Sha256::new();
    for part in [
        IDEMPOTENCY_KEY_VERSION,
        event_type.as_str(),
        business_id,
        customer_id,
        reference,
    ] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// 触发通知的业务事件
///
/// 引擎只提供模板标识与结构化数据，正文渲染由模板服务负责。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub event_type: EventType,
    pub business_id: String,
    pub customer_id: String,
    /// 业务引用（Offer ID 或预约引用），参与幂等键派生
    pub reference: String,
    pub template_id: String,
    pub data: serde_json::Value,
}

impl NotificationEvent {
    pub fn new(
        event_type: EventType,
        business_id: impl Into<String>,
        customer_id: impl Into<String>,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            business_id: business_id.into(),
            customer_id: customer_id.into(),
            reference: reference.into(),
            template_id: event_type.default_template().to_string(),
            data: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = template_id.into();
        self
    }

    pub fn idempotency_key(&self) -> String {
        derive_idempotency_key(
            self.event_type,
            &self.business_id,
            &self.customer_id,
            &self.reference,
        )
    }
}

/// 单个渠道的投递状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SendStatus {
    /// 尚未尝试
    Pending,
    Sent,
    /// 未通过资格检查，不重试
    Skipped,
    HardFailed,
    /// 临时失败，等待重试
    SoftFailed,
}

/// 单渠道投递结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelResult {
    pub channel: Channel,
    pub status: SendStatus,
    pub message_id: Option<String>,
    pub detail: Option<String>,
}

impl ChannelResult {
    pub fn pending(channel: Channel) -> Self {
        Self {
            channel,
            status: SendStatus::Pending,
            message_id: None,
            detail: None,
        }
    }

    /// 需要在本轮或下一轮尝试投递
    pub fn is_outstanding(&self) -> bool {
        matches!(self.status, SendStatus::Pending | SendStatus::SoftFailed)
    }
}

/// 通知任务
///
/// 以幂等键为主键持久化，Sent 或 Failed 后不再处理。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationJob {
    pub idempotency_key: String,
    pub event: NotificationEvent,
    pub channels: Vec<Channel>,
    pub results: Vec<ChannelResult>,
    pub status: JobStatus,
    /// 已执行的发送轮次
    pub attempts: i32,
    pub last_error: Option<String>,
    /// 免打扰延后或软失败重试的恢复时间
    pub resume_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationJob {
    /// 默认同时尝试邮件和短信，由资格检查筛掉不可用渠道
    pub fn new(event: NotificationEvent, now: DateTime<Utc>) -> Self {
        Self::with_channels(event, vec![Channel::Email, Channel::Sms], now)
    }

    pub fn with_channels(
        event: NotificationEvent,
        mut channels: Vec<Channel>,
        now: DateTime<Utc>,
    ) -> Self {
        channels.dedup();
        let results = channels.iter().copied().map(ChannelResult::pending).collect();
        Self {
            idempotency_key: event.idempotency_key(),
            event,
            channels,
            results,
            status: JobStatus::Queued,
            attempts: 0,
            last_error: None,
            resume_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_urgent(&self) -> bool {
        self.event.event_type.is_urgent()
    }

    pub fn result_mut(&mut self, channel: Channel) -> Option<&mut ChannelResult> {
        self.results.iter_mut().find(|r| r.channel == channel)
    }

    /// 仍需投递的渠道
    pub fn outstanding_channels(&self) -> Vec<Channel> {
        self.results
            .iter()
            .filter(|r| r.is_outstanding())
            .map(|r| r.channel)
            .collect()
    }

    pub fn delivered_channels(&self) -> Vec<Channel> {
        self.results
            .iter()
            .filter(|r| r.status == SendStatus::Sent)
            .map(|r| r.channel)
            .collect()
    }

    pub fn has_soft_failures(&self) -> bool {
        self.results
            .iter()
            .any(|r| r.status == SendStatus::SoftFailed)
    }

    /// 未结束、已过恢复时间且长时间没有进展的任务，视为丢失了后续调度
    pub fn is_stalled(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        if self.status.is_final() {
            return false;
        }
        let overdue = self.resume_at.is_none_or(|at| at + grace <= now);
        overdue && self.updated_at + grace <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_idempotency_key_is_deterministic() {
        let a = derive_idempotency_key(EventType::OfferCreated, "biz1", "cust1", "offer-1");
        let b = derive_idempotency_key(EventType::OfferCreated, "biz1", "cust1", "offer-1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let other_event = derive_idempotency_key(EventType::OfferExpired, "biz1", "cust1", "offer-1");
        assert_ne!(a, other_event);
    }

    #[test]
    fn test_idempotency_key_has_no_separator_ambiguity() {
        let a = derive_idempotency_key(EventType::OfferCreated, "biz", "1cust", "ref");
        let b = derive_idempotency_key(EventType::OfferCreated, "biz1", "cust", "ref");
        assert_ne!(a, b);
    }

    #[test]
    fn test_new_job_tracks_each_channel() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let event = NotificationEvent::new(EventType::OfferCreated, "biz1", "cust1", "offer-1");
        let job = NotificationJob::new(event.clone(), now);

        assert_eq!(job.idempotency_key, event.idempotency_key());
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.outstanding_channels(), vec![Channel::Email, Channel::Sms]);
        assert!(job.delivered_channels().is_empty());
        assert!(!job.is_urgent());
    }

    #[test]
    fn test_stalled_job_detection() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let grace = Duration::minutes(15);
        let event = NotificationEvent::new(EventType::PaymentFailed, "biz1", "cust1", "bk-1");
        let mut job = NotificationJob::new(event, now);

        assert!(!job.is_stalled(now + Duration::minutes(14), grace));
        assert!(job.is_stalled(now + grace, grace));

        // 等待中的重试未到期
        job.resume_at = Some(now + Duration::hours(1));
        assert!(!job.is_stalled(now + Duration::minutes(30), grace));
        assert!(job.is_stalled(now + Duration::minutes(75), grace));

        job.status = JobStatus::Sent;
        assert!(!job.is_stalled(now + Duration::days(1), grace));
    }
}
