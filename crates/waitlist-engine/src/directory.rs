//! 顾客/商家目录
//!
//! 外部协作方：提供联系方式、同意状态、渠道有效性、消费历史和商家取消政策。

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;

use crate::error::Result;
use crate::models::{CancellationPolicy, Channel, ChannelValidity, CustomerContact, CustomerHistory};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    async fn contact(&self, customer_id: &str) -> Result<Option<CustomerContact>>;
    async fn history(&self, customer_id: &str, business_id: &str) -> Result<CustomerHistory>;
    /// 退信处理的副作用：更新顾客某渠道的地址有效性
    async fn set_channel_validity(
        &self,
        customer_id: &str,
        channel: Channel,
        validity: ChannelValidity,
    ) -> Result<()>;
    async fn cancellation_policy(
        &self,
        business_id: &str,
        service_id: &str,
    ) -> Result<CancellationPolicy>;
}

/// 内存目录，用于测试和未接入外部目录的部署
#[derive(Default)]
pub struct InMemoryDirectory {
    contacts: DashMap<String, CustomerContact>,
    histories: DashMap<(String, String), CustomerHistory>,
    policies: DashMap<(String, String), CancellationPolicy>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_contact(&self, contact: CustomerContact) {
        self.contacts.insert(contact.customer_id.clone(), contact);
    }

    pub fn set_history(&self, customer_id: &str, business_id: &str, history: CustomerHistory) {
        self.histories
            .insert((customer_id.to_string(), business_id.to_string()), history);
    }

    pub fn set_policy(&self, business_id: &str, service_id: &str, policy: CancellationPolicy) {
        self.policies
            .insert((business_id.to_string(), service_id.to_string()), policy);
    }

    pub fn get_contact(&self, customer_id: &str) -> Option<CustomerContact> {
        self.contacts.get(customer_id).map(|c| c.clone())
    }
}

#[async_trait]
impl CustomerDirectory for InMemoryDirectory {
    async fn contact(&self, customer_id: &str) -> Result<Option<CustomerContact>> {
        Ok(self.get_contact(customer_id))
    }

    async fn history(&self, customer_id: &str, business_id: &str) -> Result<CustomerHistory> {
        Ok(self
            .histories
            .get(&(customer_id.to_string(), business_id.to_string()))
            .map(|h| *h)
            .unwrap_or_default())
    }

    async fn set_channel_validity(
        &self,
        customer_id: &str,
        channel: Channel,
        validity: ChannelValidity,
    ) -> Result<()> {
        if let Some(mut contact) = self.contacts.get_mut(customer_id) {
            contact.set_validity(channel, validity);
            info!(
                customer_id = %customer_id,
                channel = channel.as_str(),
                validity = ?validity,
                "更新顾客渠道有效性"
            );
        }
        Ok(())
    }

    async fn cancellation_policy(
        &self,
        business_id: &str,
        service_id: &str,
    ) -> Result<CancellationPolicy> {
        Ok(self
            .policies
            .get(&(business_id.to_string(), service_id.to_string()))
            .map(|p| *p)
            .unwrap_or_default())
    }
}
