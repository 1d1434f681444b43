//! 屏蔽名单模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::enums::{Channel, SuppressionReason};

/// 屏蔽记录，以 (渠道, 地址哈希) 为键，只追加
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SuppressionEntry {
    pub channel: Channel,
    pub address_hash: String,
    pub reason: SuppressionReason,
    pub created_at: DateTime<Utc>,
}

/// 规范化地址：邮箱去空白并转小写，手机号只保留数字和前导 +
pub fn normalize_address(channel: Channel, address: &str) -> String {
    let trimmed = address.trim();
    match channel {
        Channel::Email => trimmed.to_lowercase(),
        Channel::Sms => trimmed
            .char_indices()
            .filter(|(i, c)| c.is_ascii_digit() || (*i == 0 && *c == '+'))
            .map(|(_, c)| c)
            .collect(),
    }
}

/// 地址哈希，屏蔽名单不保存明文地址
pub fn hash_address(channel: Channel, address: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(channel.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(normalize_address(channel, address).as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_normalization() {
        assert_eq!(
            hash_address(Channel::Email, "  Alice@Example.COM "),
            hash_address(Channel::Email, "alice@example.com")
        );
    }

    #[test]
    fn test_phone_normalization() {
        assert_eq!(normalize_address(Channel::Sms, "+1 (555) 010-2030"), "+15550102030");
        assert_eq!(
            hash_address(Channel::Sms, "+1 555 010 2030"),
            hash_address(Channel::Sms, "+15550102030")
        );
    }

    #[test]
    fn test_hash_is_channel_scoped() {
        assert_ne!(
            hash_address(Channel::Email, "12345"),
            hash_address(Channel::Sms, "12345")
        );
    }
}
