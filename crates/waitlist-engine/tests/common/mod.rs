//! 集成测试公共设施
//!
//! 内存仓储 + 手动时钟 + 可编排结果的投递通道，无需外部依赖。

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use waitlist_engine::{
    Channel, Clock, CustomerContact, InMemoryBookingSink, InMemoryDirectory, InMemoryStores,
    LockConfig, LockManager, ManualClock, OutboundMessage, Repositories, Result, SchedulerWorker,
    SendOutcome, Slot, Transport, WaitlistEngine,
};
use waitlist_shared::config::WaitlistConfig;

pub const BIZ: &str = "biz1";
pub const SVC: &str = "svc1";

/// 2026-03-10 10:00 UTC，默认免打扰时段之外
pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 10, 0, 0).unwrap()
}

pub fn slot() -> Slot {
    let s = Utc.with_ymd_and_hms(2026, 3, 12, 15, 0, 0).unwrap();
    Slot::new(s, s + Duration::minutes(60))
}

// ==================== 投递通道 ====================

/// 记录每次调用的投递通道；按脚本依次返回结果，脚本耗尽后一律成功
pub struct RecordingTransport {
    channel: Channel,
    script: Mutex<VecDeque<SendOutcome>>,
    calls: Mutex<Vec<(String, OutboundMessage)>>,
}

impl RecordingTransport {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, outcomes: impl IntoIterator<Item = SendOutcome>) {
        self.script.lock().extend(outcomes);
    }

    pub fn soft_fail_times(&self, n: usize) {
        self.script((0..n).map(|i| SendOutcome::SoftFail(format!("provider 503 #{i}"))));
    }

    pub fn calls(&self) -> Vec<(String, OutboundMessage)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// 发给某个地址的消息
    pub fn calls_to(&self, address: &str) -> Vec<OutboundMessage> {
        self.calls
            .lock()
            .iter()
            .filter(|(a, _)| a == address)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, address: &str, message: &OutboundMessage) -> Result<SendOutcome> {
        let n = {
            let mut calls = self.calls.lock();
            calls.push((address.to_string(), message.clone()));
            calls.len()
        };
        let scripted = self.script.lock().pop_front();
        Ok(scripted.unwrap_or_else(|| SendOutcome::Sent {
            message_id: format!("{}-{n}", self.channel.as_str()),
        }))
    }
}

// ==================== 测试装置 ====================

pub struct Harness {
    pub engine: Arc<WaitlistEngine>,
    pub stores: InMemoryStores,
    pub directory: Arc<InMemoryDirectory>,
    pub bookings: Arc<InMemoryBookingSink>,
    pub email: Arc<RecordingTransport>,
    pub sms: Arc<RecordingTransport>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(WaitlistConfig::default())
    }

    pub fn with_config(config: WaitlistConfig) -> Self {
        let stores = InMemoryStores::new();
        let directory = Arc::new(InMemoryDirectory::new());
        let bookings = Arc::new(InMemoryBookingSink::new());
        let email = Arc::new(RecordingTransport::new(Channel::Email));
        let sms = Arc::new(RecordingTransport::new(Channel::Sms));
        let clock = Arc::new(ManualClock::new(start()));

        let transports: Vec<Arc<dyn Transport>> = vec![email.clone(), sms.clone()];
        let engine = WaitlistEngine::new(
            &config,
            Repositories::in_memory(&stores),
            directory.clone(),
            bookings.clone(),
            transports,
            Arc::new(LockManager::local(LockConfig::default())),
            clock.clone(),
        )
        .expect("default config is valid");

        Self {
            engine: Arc::new(engine),
            stores,
            directory,
            bookings,
            email,
            sms,
            clock,
        }
    }

    /// 登记一位邮件、短信都可用的顾客
    pub fn customer(&self, id: &str) {
        self.directory.upsert_contact(
            CustomerContact::new(id)
                .with_email(email_of(id))
                .with_phone(phone_of(id)),
        );
    }

    pub fn contact(&self, contact: CustomerContact) {
        self.directory.upsert_contact(contact);
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn worker(&self) -> SchedulerWorker {
        SchedulerWorker::new(
            self.engine.clone(),
            self.engine.scheduler(),
            StdDuration::from_millis(10),
            100,
        )
    }

    /// 执行所有已到期的调度任务
    pub async fn run_due_work(&self) -> usize {
        self.worker().run_once().await.expect("claim due work")
    }

    /// 推进时钟并执行到期任务
    pub async fn advance_and_run(&self, by: Duration) -> usize {
        self.clock.advance(by);
        self.run_due_work().await
    }
}

pub fn email_of(id: &str) -> String {
    format!("{id}@example.com")
}

/// 每位顾客一个稳定的 11 位号码
pub fn phone_of(id: &str) -> String {
    let n: u32 = id.bytes().map(u32::from).sum();
    format!("+1555{n:07}")
}
