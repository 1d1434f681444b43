//! 候补记录 PostgreSQL 仓储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Result, WaitlistError};
use crate::models::{EntryStatus, RemovalReason, WaitingListEntry};
use crate::repository::traits::WaitingListRepository;

const ENTRY_COLUMNS: &str = "id, business_id, service_id, customer_id, priority, status, \
                             removal_reason, joined_at, updated_at";

pub struct PgWaitingListRepository {
    pool: PgPool,
}

impl PgWaitingListRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WaitingListRepository for PgWaitingListRepository {
    async fn insert(&self, entry: &WaitingListEntry) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO waiting_list_entries
                (id, business_id, service_id, customer_id, priority, status,
                 removal_reason, joined_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.business_id)
        .bind(&entry.service_id)
        .bind(&entry.customer_id)
        .bind(entry.priority)
        .bind(entry.status)
        .bind(entry.removal_reason)
        .bind(entry.joined_at)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            // uq_waiting_entries_waiting
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(WaitlistError::DuplicateEntry {
                    customer_id: entry.customer_id.clone(),
                    business_id: entry.business_id.clone(),
                    service_id: entry.service_id.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<WaitingListEntry>> {
        let entry = sqlx::query_as::<_, WaitingListEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM waiting_list_entries WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    async fn find_waiting(
        &self,
        business_id: &str,
        service_id: &str,
        customer_id: &str,
    ) -> Result<Option<WaitingListEntry>> {
        let entry = sqlx::query_as::<_, WaitingListEntry>(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM waiting_list_entries
            WHERE business_id = $1 AND service_id = $2 AND customer_id = $3
              AND status IN ($4, $5)
            "#
        ))
        .bind(business_id)
        .bind(service_id)
        .bind(customer_id)
        .bind(EntryStatus::Active)
        .bind(EntryStatus::Notified)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    async fn list_active(
        &self,
        business_id: &str,
        service_id: &str,
    ) -> Result<Vec<WaitingListEntry>> {
        let entries = sqlx::query_as::<_, WaitingListEntry>(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM waiting_list_entries
            WHERE business_id = $1 AND service_id = $2 AND status = $3
            ORDER BY priority DESC, joined_at ASC, id ASC
            "#
        ))
        .bind(business_id)
        .bind(service_id)
        .bind(EntryStatus::Active)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: EntryStatus,
        removal_reason: Option<RemovalReason>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE waiting_list_entries
            SET status = $2, removal_reason = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(removal_reason)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(WaitlistError::EntryNotFound(id));
        }
        Ok(())
    }
}
