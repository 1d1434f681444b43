//! 发送资格检查
//!
//! 组合三项检查：渠道同意、地址有效性、屏蔽名单。
//! 候补类事件还要求顾客订阅了候补通知。

use std::sync::Arc;

use crate::error::Result;
use crate::models::{Channel, ChannelValidity, CustomerContact, EventType};

use super::suppression::SuppressionRegistry;

/// 渠道不可发送的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IneligibleReason {
    NoConsent,
    WaitlistOptOut,
    NoAddress,
    InvalidAddress,
    Suppressed,
}

impl IneligibleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoConsent => "no_consent",
            Self::WaitlistOptOut => "waitlist_opt_out",
            Self::NoAddress => "no_address",
            Self::InvalidAddress => "invalid_address",
            Self::Suppressed => "suppressed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible { address: String },
    Ineligible(IneligibleReason),
}

pub struct EligibilityGate {
    suppression: Arc<SuppressionRegistry>,
}

impl EligibilityGate {
    pub fn new(suppression: Arc<SuppressionRegistry>) -> Self {
        Self { suppression }
    }

    /// Restricted 的地址仍可发送，只有 Invalid 会被拦截
    pub async fn check(
        &self,
        contact: &CustomerContact,
        channel: Channel,
        event_type: EventType,
    ) -> Result<Eligibility> {
        if !contact.has_consent(channel) {
            return Ok(Eligibility::Ineligible(IneligibleReason::NoConsent));
        }
        if event_type.requires_waitlist_opt_in() && !contact.waitlist_opt_in {
            return Ok(Eligibility::Ineligible(IneligibleReason::WaitlistOptOut));
        }
        if contact.validity(channel) == ChannelValidity::Invalid {
            return Ok(Eligibility::Ineligible(IneligibleReason::InvalidAddress));
        }
        let Some(address) = contact.address(channel) else {
            return Ok(Eligibility::Ineligible(IneligibleReason::NoAddress));
        };
        if self.suppression.is_suppressed(channel, address).await? {
            return Ok(Eligibility::Ineligible(IneligibleReason::Suppressed));
        }

        Ok(Eligibility::Eligible {
            address: address.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::clock::{Clock, SystemClock};
    use crate::models::SuppressionReason;
    use crate::repository::{InMemoryAuditRepository, InMemorySuppressionRepository};

    fn gate() -> (EligibilityGate, Arc<SuppressionRegistry>) {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let audit = Arc::new(AuditLog::new(
            Arc::new(InMemoryAuditRepository::new()),
            clock.clone(),
        ));
        let registry = Arc::new(SuppressionRegistry::new(
            Arc::new(InMemorySuppressionRepository::new()),
            audit,
            clock,
            3,
        ));
        (EligibilityGate::new(registry.clone()), registry)
    }

    fn contact() -> CustomerContact {
        CustomerContact::new("c1")
            .with_email("c1@example.com")
            .with_phone("+15550001")
    }

    #[tokio::test]
    async fn test_eligible_channel_returns_address() {
        let (gate, _) = gate();
        let result = gate
            .check(&contact(), Channel::Sms, EventType::OfferCreated)
            .await
            .unwrap();
        assert_eq!(
            result,
            Eligibility::Eligible {
                address: "+15550001".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_consent_and_validity() {
        let (gate, _) = gate();

        let no_consent = contact().with_consent(Channel::Email, false);
        assert_eq!(
            gate.check(&no_consent, Channel::Email, EventType::BookingConfirmed)
                .await
                .unwrap(),
            Eligibility::Ineligible(IneligibleReason::NoConsent)
        );

        let mut invalid = contact();
        invalid.set_validity(Channel::Email, ChannelValidity::Invalid);
        assert_eq!(
            gate.check(&invalid, Channel::Email, EventType::OfferCreated)
                .await
                .unwrap(),
            Eligibility::Ineligible(IneligibleReason::InvalidAddress)
        );

        let mut restricted = contact();
        restricted.set_validity(Channel::Email, ChannelValidity::Restricted);
        assert!(matches!(
            gate.check(&restricted, Channel::Email, EventType::OfferCreated).await.unwrap(),
            Eligibility::Eligible { .. }
        ));

        let no_phone = CustomerContact::new("c2").with_email("c2@example.com");
        assert_eq!(
            gate.check(&no_phone, Channel::Sms, EventType::OfferCreated)
                .await
                .unwrap(),
            Eligibility::Ineligible(IneligibleReason::NoAddress)
        );
    }

    #[tokio::test]
    async fn test_waitlist_subscription_only_applies_to_offer_events() {
        let (gate, _) = gate();
        let unsubscribed = contact().with_waitlist_opt_in(false);

        assert_eq!(
            gate.check(&unsubscribed, Channel::Email, EventType::OfferCreated)
                .await
                .unwrap(),
            Eligibility::Ineligible(IneligibleReason::WaitlistOptOut)
        );
        assert!(matches!(
            gate.check(&unsubscribed, Channel::Email, EventType::BookingConfirmed).await.unwrap(),
            Eligibility::Eligible { .. }
        ));
    }

    #[tokio::test]
    async fn test_suppression_applies_to_urgent_events() {
        let (gate, registry) = gate();
        registry
            .record(Channel::Email, "C1@example.com", SuppressionReason::HardBounce)
            .await
            .unwrap();

        assert_eq!(
            gate.check(&contact(), Channel::Email, EventType::BookingCancelled)
                .await
                .unwrap(),
            Eligibility::Ineligible(IneligibleReason::Suppressed)
        );
        assert!(matches!(
            gate.check(&contact(), Channel::Sms, EventType::BookingCancelled).await.unwrap(),
            Eligibility::Eligible { .. }
        ));
    }
}
