//! 顾客联系方式与同意状态（来自顾客目录，只读输入）

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use super::enums::{Channel, ChannelValidity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerContact {
    pub customer_id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub email_validity: ChannelValidity,
    pub sms_validity: ChannelValidity,
    pub email_consent: bool,
    pub sms_consent: bool,
    /// 是否订阅候补通知
    pub waitlist_opt_in: bool,
    /// 收件人所在地相对 UTC 的偏移（分钟），用于免打扰判断
    pub utc_offset_minutes: i32,
}

impl CustomerContact {
    /// 创建一个两个渠道均同意、地址为空的联系人
    pub fn new(customer_id: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            email: None,
            phone: None,
            email_validity: ChannelValidity::Valid,
            sms_validity: ChannelValidity::Valid,
            email_consent: true,
            sms_consent: true,
            waitlist_opt_in: true,
            utc_offset_minutes: 0,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_utc_offset_minutes(mut self, minutes: i32) -> Self {
        self.utc_offset_minutes = minutes;
        self
    }

    pub fn with_consent(mut self, channel: Channel, consent: bool) -> Self {
        match channel {
            Channel::Email => self.email_consent = consent,
            Channel::Sms => self.sms_consent = consent,
        }
        self
    }

    pub fn with_waitlist_opt_in(mut self, opt_in: bool) -> Self {
        self.waitlist_opt_in = opt_in;
        self
    }

    pub fn address(&self, channel: Channel) -> Option<&str> {
        let address = match channel {
            Channel::Email => self.email.as_deref(),
            Channel::Sms => self.phone.as_deref(),
        };
        address.filter(|a| !a.trim().is_empty())
    }

    pub fn validity(&self, channel: Channel) -> ChannelValidity {
        match channel {
            Channel::Email => self.email_validity,
            Channel::Sms => self.sms_validity,
        }
    }

    pub fn set_validity(&mut self, channel: Channel, validity: ChannelValidity) {
        match channel {
            Channel::Email => self.email_validity = validity,
            Channel::Sms => self.sms_validity = validity,
        }
    }

    pub fn has_consent(&self, channel: Channel) -> bool {
        match channel {
            Channel::Email => self.email_consent,
            Channel::Sms => self.sms_consent,
        }
    }

    /// 偏移超出 ±24h 时返回 None
    pub fn utc_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60))
    }
}
