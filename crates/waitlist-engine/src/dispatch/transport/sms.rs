//! 短信通道
//!
//! 当前为模拟实现，生产环境需要接入真实的短信服务。

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{OutboundMessage, SendOutcome, Transport, TransportConfig};
use crate::error::Result;
use crate::models::{Channel, normalize_address};

/// E.164 号码最长 15 位
const MAX_DIGITS: usize = 15;
const MIN_DIGITS: usize = 7;

pub struct SmsTransport {
    config: TransportConfig,
}

impl SmsTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(TransportConfig::default())
    }

    fn is_deliverable(address: &str) -> bool {
        let normalized = normalize_address(Channel::Sms, address);
        let digits = normalized.trim_start_matches('+').len();
        (MIN_DIGITS..=MAX_DIGITS).contains(&digits)
    }

    async fn deliver(&self, message: &OutboundMessage) -> String {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        debug!(
            idempotency_key = %message.idempotency_key,
            template_id = %message.template_id,
            "SMS 发送中..."
        );
        format!("sms_{}", Uuid::new_v4())
    }
}

#[async_trait]
impl Transport for SmsTransport {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    fn name(&self) -> &str {
        "SMS"
    }

    async fn send(&self, address: &str, message: &OutboundMessage) -> Result<SendOutcome> {
        if !self.config.enabled {
            warn!(idempotency_key = %message.idempotency_key, "SMS 通道已禁用");
            return Ok(SendOutcome::SoftFail("sms transport disabled".to_string()));
        }
        if !Self::is_deliverable(address) {
            return Ok(SendOutcome::HardFail("invalid phone number".to_string()));
        }

        match tokio::time::timeout(self.config.timeout, self.deliver(message)).await {
            Ok(message_id) => {
                info!(
                    idempotency_key = %message.idempotency_key,
                    message_id = %message_id,
                    "SMS 发送成功"
                );
                Ok(SendOutcome::Sent { message_id })
            }
            Err(_) => Ok(SendOutcome::SoftFail("sms gateway timeout".to_string())),
        }
    }
}
