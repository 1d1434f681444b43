//! 调度任务 PostgreSQL 仓储
//!
//! 使用显式事务包裹 `FOR UPDATE SKIP LOCKED`，保证多实例部署时同一任务只被认领一次。

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{CLAIM_LEASE_SECS, ScheduledWork, WorkKind, WorkStatus};
use crate::repository::traits::ScheduledWorkRepository;

#[derive(sqlx::FromRow)]
struct WorkRow {
    id: Uuid,
    kind: Json<WorkKind>,
    run_at: DateTime<Utc>,
    status: WorkStatus,
    attempts: i32,
    claimed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<WorkRow> for ScheduledWork {
    fn from(row: WorkRow) -> Self {
        Self {
            id: row.id,
            kind: row.kind.0,
            run_at: row.run_at,
            status: row.status,
            attempts: row.attempts,
            claimed_at: row.claimed_at,
            created_at: row.created_at,
        }
    }
}

pub struct PgScheduledWorkRepository {
    pool: PgPool,
}

impl PgScheduledWorkRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduledWorkRepository for PgScheduledWorkRepository {
    async fn insert(&self, work: &ScheduledWork) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_work
                (id, kind, run_at, status, attempts, claimed_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            "#,
        )
        .bind(work.id)
        .bind(Json(&work.kind))
        .bind(work.run_at)
        .bind(work.status)
        .bind(work.attempts)
        .bind(work.claimed_at)
        .bind(work.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ScheduledWork>> {
        let row = sqlx::query_as::<_, WorkRow>(
            r#"
            SELECT id, kind, run_at, status, attempts, claimed_at, created_at
            FROM scheduled_work
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ScheduledWork::from))
    }

    async fn cancel(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_work
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = $3
            "#,
        )
        .bind(id)
        .bind(WorkStatus::Cancelled)
        .bind(WorkStatus::Pending)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ScheduledWork>> {
        let stale_before = now - Duration::seconds(CLAIM_LEASE_SECS);
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query_as::<_, WorkRow>(
            r#"
            SELECT id, kind, run_at, status, attempts, claimed_at, created_at
            FROM scheduled_work
            WHERE (status = $1 AND run_at <= $2)
               OR (status = $3 AND claimed_at < $4)
            ORDER BY run_at ASC
            LIMIT $5
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(WorkStatus::Pending)
        .bind(now)
        .bind(WorkStatus::Claimed)
        .bind(stale_before)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        if rows.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        sqlx::query(
            r#"
            UPDATE scheduled_work
            SET status = $2, claimed_at = $3, updated_at = $3
            WHERE id = ANY($1)
            "#,
        )
        .bind(&ids)
        .bind(WorkStatus::Claimed)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(count = ids.len(), "认领到期调度任务");

        Ok(rows
            .into_iter()
            .map(|row| {
                let mut work = ScheduledWork::from(row);
                work.status = WorkStatus::Claimed;
                work.claimed_at = Some(now);
                work
            })
            .collect())
    }

    async fn complete(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE scheduled_work SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(WorkStatus::Done)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reschedule(&self, id: Uuid, run_at: DateTime<Utc>, attempts: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduled_work
            SET status = $2, run_at = $3, attempts = $4, claimed_at = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(WorkStatus::Pending)
        .bind(run_at)
        .bind(attempts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE scheduled_work SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(WorkStatus::Failed)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
