//! 数据模型定义

pub mod audit;
pub mod contact;
pub mod entry;
pub mod enums;
pub mod notification;
pub mod offer;
pub mod scheduled;
pub mod suppression;

pub use audit::AuditRecord;
pub use contact::CustomerContact;
pub use entry::{CustomerHistory, PriorityWeights, QueuePosition, WaitingListEntry, offer_order};
pub use enums::*;
pub use notification::{
    ChannelResult, NotificationEvent, NotificationJob, SendStatus, derive_idempotency_key,
};
pub use offer::{BookingDraft, CancellationPolicy, Offer, OfferResolution, Slot};
pub use scheduled::{CLAIM_LEASE_SECS, ScheduledWork, WorkKind};
pub use suppression::{SuppressionEntry, hash_address, normalize_address};
