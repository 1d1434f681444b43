//! 候补引擎错误类型
//!
//! 区分面向顾客的业务错误（不重试）与系统错误（可重试）。

use thiserror::Error;
use uuid::Uuid;
use waitlist_shared::error::SharedError;

/// 候补引擎错误类型
#[derive(Debug, Error)]
pub enum WaitlistError {
    // === 候补队列 ===
    #[error("顾客已在候补队列中: customer_id={customer_id}, business_id={business_id}, service_id={service_id}")]
    DuplicateEntry {
        customer_id: String,
        business_id: String,
        service_id: String,
    },

    #[error("候补记录不存在: {0}")]
    EntryNotFound(Uuid),

    #[error("没有可通知的候补顾客: business_id={business_id}, service_id={service_id}")]
    NoEligibleCustomers {
        business_id: String,
        service_id: String,
    },

    // === Offer ===
    #[error("Offer 不存在")]
    OfferNotFound,

    #[error("Offer 已不可用: offer_id={offer_id}, status={status}")]
    OfferNoLongerAvailable { offer_id: Uuid, status: String },

    #[error("Offer 已过期: offer_id={0}")]
    OfferExpired(Uuid),

    #[error("时段已有待确认的 Offer: {slot_key}")]
    SlotAlreadyCommitted { slot_key: String },

    // === 通知 ===
    #[error("通知任务不存在: idempotency_key={0}")]
    JobNotFound(String),

    #[error("参数校验失败: {0}")]
    Validation(String),

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis 错误: {0}")]
    Redis(String),

    #[error("获取锁失败: {resource}")]
    LockConflict { resource: String },

    #[error("基础设施错误: {0}")]
    Infrastructure(#[from] SharedError),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 候补引擎 Result 类型别名
pub type Result<T> = std::result::Result<T, WaitlistError>;

impl WaitlistError {
    /// 检查是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(_) | Self::Redis(_) | Self::LockConflict { .. } => true,
            Self::Infrastructure(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        !matches!(
            self,
            Self::Database(_)
                | Self::Serialization(_)
                | Self::Redis(_)
                | Self::LockConflict { .. }
                | Self::Infrastructure(_)
                | Self::Internal(_)
                | Self::SlotAlreadyCommitted { .. }
        )
    }

    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DuplicateEntry { .. } => "DUPLICATE_ENTRY",
            Self::EntryNotFound(_) => "ENTRY_NOT_FOUND",
            Self::NoEligibleCustomers { .. } => "NO_ELIGIBLE_CUSTOMERS",
            Self::OfferNotFound => "OFFER_NOT_FOUND",
            Self::OfferNoLongerAvailable { .. } => "OFFER_NO_LONGER_AVAILABLE",
            Self::OfferExpired(_) => "OFFER_EXPIRED",
            Self::SlotAlreadyCommitted { .. } => "SLOT_ALREADY_COMMITTED",
            Self::JobNotFound(_) => "JOB_NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::LockConflict { .. } => "LOCK_CONFLICT",
            Self::Infrastructure(e) => e.code(),
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_retryable() {
        assert!(WaitlistError::Redis("connection reset".to_string()).is_retryable());
        assert!(
            WaitlistError::LockConflict {
                resource: "waitlist:b1:s1".to_string()
            }
            .is_retryable()
        );
        assert!(!WaitlistError::OfferNotFound.is_retryable());
        assert!(!WaitlistError::OfferExpired(Uuid::nil()).is_retryable());
    }

    #[test]
    fn test_user_facing_errors_are_business_errors() {
        assert!(WaitlistError::OfferNotFound.is_business_error());
        assert!(
            WaitlistError::DuplicateEntry {
                customer_id: "c1".to_string(),
                business_id: "b1".to_string(),
                service_id: "s1".to_string(),
            }
            .is_business_error()
        );
        // 时段冲突属于内部不变量违例
        assert!(
            !WaitlistError::SlotAlreadyCommitted {
                slot_key: "b1:s1:0:1".to_string()
            }
            .is_business_error()
        );
        assert!(!WaitlistError::Internal("boom".to_string()).is_business_error());
    }

    #[test]
    fn test_error_code() {
        assert_eq!(WaitlistError::OfferNotFound.error_code(), "OFFER_NOT_FOUND");
        assert_eq!(
            WaitlistError::OfferNoLongerAvailable {
                offer_id: Uuid::nil(),
                status: "ACCEPTED".to_string()
            }
            .error_code(),
            "OFFER_NO_LONGER_AVAILABLE"
        );
        assert_eq!(
            WaitlistError::Infrastructure(SharedError::Internal("x".to_string())).error_code(),
            "INTERNAL_ERROR"
        );
    }
}
