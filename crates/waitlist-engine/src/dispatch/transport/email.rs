//! 邮件通道
//!
//! 当前为模拟实现，生产环境需要接入真实的邮件服务。

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{OutboundMessage, SendOutcome, Transport, TransportConfig};
use crate::error::Result;
use crate::models::Channel;

pub struct EmailTransport {
    config: TransportConfig,
    from_address: String,
}

impl EmailTransport {
    pub fn new(config: TransportConfig, from_address: impl Into<String>) -> Self {
        Self {
            config,
            from_address: from_address.into(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(TransportConfig::default(), "noreply@waitlist.local")
    }

    /// 只做最基本的格式检查：local@domain.tld
    fn is_deliverable(address: &str) -> bool {
        let Some((local, domain)) = address.trim().split_once('@') else {
            return false;
        };
        !local.is_empty()
            && domain.contains('.')
            && !domain.starts_with('.')
            && !domain.ends_with('.')
            && !domain.contains('@')
    }

    async fn deliver(&self, message: &OutboundMessage) -> String {
        // 模拟网络延迟
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        debug!(
            idempotency_key = %message.idempotency_key,
            template_id = %message.template_id,
            from = %self.from_address,
            "Email 发送中..."
        );
        format!("email_{}", Uuid::new_v4())
    }
}

#[async_trait]
impl Transport for EmailTransport {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn name(&self) -> &str {
        "Email"
    }

    async fn send(&self, address: &str, message: &OutboundMessage) -> Result<SendOutcome> {
        if !self.config.enabled {
            warn!(idempotency_key = %message.idempotency_key, "Email 通道已禁用");
            return Ok(SendOutcome::SoftFail("email transport disabled".to_string()));
        }
        if !Self::is_deliverable(address) {
            return Ok(SendOutcome::HardFail("malformed email address".to_string()));
        }

        match tokio::time::timeout(self.config.timeout, self.deliver(message)).await {
            Ok(message_id) => {
                info!(
                    idempotency_key = %message.idempotency_key,
                    message_id = %message_id,
                    "Email 发送成功"
                );
                Ok(SendOutcome::Sent { message_id })
            }
            Err(_) => Ok(SendOutcome::SoftFail("email provider timeout".to_string())),
        }
    }
}
