//! 预约子系统出口
//!
//! 引擎在 Offer 被接受时产出 BookingDraft，由预约子系统负责持久化。

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use crate::error::Result;
use crate::models::BookingDraft;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BookingSink: Send + Sync {
    async fn submit(&self, draft: &BookingDraft) -> Result<()>;
}

/// 记录所有草稿的内存实现
#[derive(Default)]
pub struct InMemoryBookingSink {
    drafts: Mutex<Vec<BookingDraft>>,
}

impl InMemoryBookingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drafts(&self) -> Vec<BookingDraft> {
        self.drafts.lock().clone()
    }
}

#[async_trait]
impl BookingSink for InMemoryBookingSink {
    async fn submit(&self, draft: &BookingDraft) -> Result<()> {
        info!(
            offer_id = %draft.offer_id,
            customer_id = %draft.customer_id,
            business_id = %draft.business_id,
            service_id = %draft.service_id,
            slot_start = %draft.slot.start,
            "收到预约草稿"
        );
        self.drafts.lock().push(draft.clone());
        Ok(())
    }
}
