//! 屏蔽名单
//!
//! 发送前必须查询的唯一依据。只追加，紧急事件也不能绕过。

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};
use waitlist_shared::observability::metrics;

use crate::audit::AuditLog;
use crate::clock::Clock;
use crate::error::Result;
use crate::models::{
    AuditSubject, BounceSeverity, Channel, SuppressionEntry, SuppressionReason, hash_address,
};
use crate::repository::SuppressionRepository;

pub struct SuppressionRegistry {
    repo: Arc<dyn SuppressionRepository>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
    soft_bounce_threshold: u32,
}

impl SuppressionRegistry {
    pub fn new(
        repo: Arc<dyn SuppressionRepository>,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
        soft_bounce_threshold: u32,
    ) -> Self {
        Self {
            repo,
            audit,
            clock,
            soft_bounce_threshold: soft_bounce_threshold.max(1),
        }
    }

    /// 加入屏蔽名单，返回是否为新记录
    ///
    /// 地址已被屏蔽时保留最早的原因。
    pub async fn record(
        &self,
        channel: Channel,
        address: &str,
        reason: SuppressionReason,
    ) -> Result<bool> {
        let entry = SuppressionEntry {
            channel,
            address_hash: hash_address(channel, address),
            reason,
            created_at: self.clock.now(),
        };

        let inserted = self.repo.insert_if_absent(&entry).await?;
        if inserted {
            metrics::record_suppression(reason.as_str());
            info!(
                channel = channel.as_str(),
                address_hash = %entry.address_hash,
                reason = reason.as_str(),
                "地址已加入屏蔽名单"
            );
            self.audit
                .append(
                    AuditSubject::Suppression,
                    entry.address_hash.clone(),
                    "suppression_recorded",
                    json!({ "channel": channel, "reason": reason }),
                )
                .await;
        }
        Ok(inserted)
    }

    pub async fn is_suppressed(&self, channel: Channel, address: &str) -> Result<bool> {
        let hash = hash_address(channel, address);
        Ok(self.repo.find(channel, &hash).await?.is_some())
    }

    pub async fn find(&self, channel: Channel, address: &str) -> Result<Option<SuppressionEntry>> {
        self.repo.find(channel, &hash_address(channel, address)).await
    }

    /// 处理退信，返回是否因此新增了屏蔽记录
    ///
    /// 硬退信立即屏蔽；软退信累计到阈值后以 repeated_soft_bounce 屏蔽。
    pub async fn record_bounce(
        &self,
        channel: Channel,
        address: &str,
        severity: BounceSeverity,
        reason: &str,
    ) -> Result<bool> {
        match severity {
            BounceSeverity::Hard => {
                warn!(channel = channel.as_str(), reason = %reason, "收到硬退信");
                self.record(channel, address, SuppressionReason::HardBounce)
                    .await
            }
            BounceSeverity::Soft => {
                let hash = hash_address(channel, address);
                let count = self
                    .repo
                    .increment_soft_bounce(channel, &hash, self.clock.now())
                    .await?;
                warn!(
                    channel = channel.as_str(),
                    address_hash = %hash,
                    count,
                    threshold = self.soft_bounce_threshold,
                    reason = %reason,
                    "收到软退信"
                );
                if count >= self.soft_bounce_threshold {
                    self.record(channel, address, SuppressionReason::RepeatedSoftBounce)
                        .await
                } else {
                    Ok(false)
                }
            }
        }
    }

    pub async fn record_opt_out(&self, channel: Channel, address: &str) -> Result<bool> {
        self.record(channel, address, SuppressionReason::OptOut).await
    }
}
