//! 投递通道
//!
//! 引擎只依赖发送能力契约：同一幂等键重复发送不会产生两条消息，
//! 失败需区分永久（Hard）与临时（Soft）。
//! 正文由模板服务渲染，这里只传模板标识与结构化数据。

mod email;
mod sms;

pub use email::EmailTransport;
pub use sms::SmsTransport;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::models::Channel;

/// 交给投递通道的消息
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    /// 服务商侧去重使用
    pub idempotency_key: String,
    pub channel: Channel,
    pub template_id: String,
    pub data: serde_json::Value,
}

/// 单次发送结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { message_id: String },
    /// 永久失败，如地址不存在
    HardFail(String),
    /// 临时失败，如超时、服务商 5xx
    SoftFail(String),
}

/// 投递通道
///
/// `send` 返回 Err 时按软失败处理。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    fn channel(&self) -> Channel;

    /// 通道名称（用于日志）
    fn name(&self) -> &str;

    async fn send(&self, address: &str, message: &OutboundMessage) -> Result<SendOutcome>;
}

/// 通道配置
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub enabled: bool,
    /// 单次请求超时，超时按软失败处理
    pub timeout: Duration,
}

impl TransportConfig {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new(true)
    }
}
