//! 屏蔽名单 PostgreSQL 仓储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::Result;
use crate::models::{Channel, SuppressionEntry};
use crate::repository::traits::SuppressionRepository;

pub struct PgSuppressionRepository {
    pool: PgPool,
}

impl PgSuppressionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SuppressionRepository for PgSuppressionRepository {
    async fn insert_if_absent(&self, entry: &SuppressionEntry) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO suppressions (channel, address_hash, reason, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (channel, address_hash) DO NOTHING
            "#,
        )
        .bind(entry.channel)
        .bind(&entry.address_hash)
        .bind(entry.reason)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find(&self, channel: Channel, address_hash: &str) -> Result<Option<SuppressionEntry>> {
        let entry = sqlx::query_as::<_, SuppressionEntry>(
            r#"
            SELECT channel, address_hash, reason, created_at
            FROM suppressions
            WHERE channel = $1 AND address_hash = $2
            "#,
        )
        .bind(channel)
        .bind(address_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    async fn increment_soft_bounce(
        &self,
        channel: Channel,
        address_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<u32> {
        let count: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO soft_bounce_counters (channel, address_hash, bounce_count, last_bounced_at)
            VALUES ($1, $2, 1, $3)
            ON CONFLICT (channel, address_hash) DO UPDATE
            SET bounce_count = soft_bounce_counters.bounce_count + 1,
                last_bounced_at = EXCLUDED.last_bounced_at
            RETURNING bounce_count
            "#,
        )
        .bind(channel)
        .bind(address_hash)
        .bind(at)
        .fetch_one(&self.pool)
        .await?;

        Ok(u32::try_from(count).unwrap_or(0))
    }
}
