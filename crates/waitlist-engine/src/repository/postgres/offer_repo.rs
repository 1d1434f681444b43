//! Offer PostgreSQL 仓储
//!
//! 每时段单个 PENDING Offer 由部分唯一索引 uq_offers_pending_slot 保证。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Result, WaitlistError};
use crate::models::{Offer, OfferStatus, Slot};
use crate::repository::traits::OfferRepository;

const OFFER_COLUMNS: &str = "id, token, entry_id, customer_id, business_id, service_id, \
                             slot_start, slot_end, created_at, hold_expires_at, status, \
                             notification_attempts, resolved_at, expiry_work_id";

pub struct PgOfferRepository {
    pool: PgPool,
}

impl PgOfferRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OfferRepository for PgOfferRepository {
    async fn insert_pending(&self, offer: &Offer) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO offers
                (id, token, entry_id, customer_id, business_id, service_id,
                 slot_start, slot_end, created_at, hold_expires_at, status,
                 notification_attempts, resolved_at, expiry_work_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NULL, $13)
            "#,
        )
        .bind(offer.id)
        .bind(&offer.token)
        .bind(offer.entry_id)
        .bind(&offer.customer_id)
        .bind(&offer.business_id)
        .bind(&offer.service_id)
        .bind(offer.slot_start)
        .bind(offer.slot_end)
        .bind(offer.created_at)
        .bind(offer.hold_expires_at)
        .bind(OfferStatus::Pending)
        .bind(offer.notification_attempts)
        .bind(offer.expiry_work_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(WaitlistError::SlotAlreadyCommitted {
                    slot_key: offer.slot_key(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Offer>> {
        let offer = sqlx::query_as::<_, Offer>(&format!(
            "SELECT {OFFER_COLUMNS} FROM offers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(offer)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Offer>> {
        let offer = sqlx::query_as::<_, Offer>(&format!(
            "SELECT {OFFER_COLUMNS} FROM offers WHERE token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(offer)
    }

    async fn list_for_slot(
        &self,
        business_id: &str,
        service_id: &str,
        slot: &Slot,
    ) -> Result<Vec<Offer>> {
        let offers = sqlx::query_as::<_, Offer>(&format!(
            r#"
            SELECT {OFFER_COLUMNS}
            FROM offers
            WHERE business_id = $1 AND service_id = $2
              AND slot_start = $3 AND slot_end = $4
            ORDER BY created_at ASC
            "#
        ))
        .bind(business_id)
        .bind(service_id)
        .bind(slot.start)
        .bind(slot.end)
        .fetch_all(&self.pool)
        .await?;

        Ok(offers)
    }

    async fn find_pending_for_entry(&self, entry_id: Uuid) -> Result<Option<Offer>> {
        let offer = sqlx::query_as::<_, Offer>(&format!(
            "SELECT {OFFER_COLUMNS} FROM offers WHERE entry_id = $1 AND status = $2 LIMIT 1"
        ))
        .bind(entry_id)
        .bind(OfferStatus::Pending)
        .fetch_optional(&self.pool)
        .await?;

        Ok(offer)
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        from: OfferStatus,
        to: OfferStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let resolved_at = to.is_terminal().then_some(at);
        let result = sqlx::query(
            r#"
            UPDATE offers
            SET status = $3, resolved_at = COALESCE($4, resolved_at)
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(resolved_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_expiry_work(&self, id: Uuid, work_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE offers SET expiry_work_id = $2 WHERE id = $1")
            .bind(id)
            .bind(work_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_notification_attempts(&self, id: Uuid, attempts: i32) -> Result<()> {
        sqlx::query("UPDATE offers SET notification_attempts = $2 WHERE id = $1")
            .bind(id)
            .bind(attempts)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
