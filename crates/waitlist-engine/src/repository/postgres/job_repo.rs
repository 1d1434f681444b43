//! 通知任务 PostgreSQL 仓储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;

use crate::error::Result;
use crate::models::{Channel, ChannelResult, JobStatus, NotificationEvent, NotificationJob};
use crate::repository::traits::NotificationJobRepository;

#[derive(sqlx::FromRow)]
struct JobRow {
    idempotency_key: String,
    event: Json<NotificationEvent>,
    channels: Json<Vec<Channel>>,
    results: Json<Vec<ChannelResult>>,
    status: JobStatus,
    attempts: i32,
    last_error: Option<String>,
    resume_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<JobRow> for NotificationJob {
    fn from(row: JobRow) -> Self {
        Self {
            idempotency_key: row.idempotency_key,
            event: row.event.0,
            channels: row.channels.0,
            results: row.results.0,
            status: row.status,
            attempts: row.attempts,
            last_error: row.last_error,
            resume_at: row.resume_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub struct PgNotificationJobRepository {
    pool: PgPool,
}

impl PgNotificationJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationJobRepository for PgNotificationJobRepository {
    async fn insert_if_absent(&self, job: &NotificationJob) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO notification_jobs
                (idempotency_key, event, channels, results, status, attempts,
                 last_error, resume_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(&job.idempotency_key)
        .bind(Json(&job.event))
        .bind(Json(&job.channels))
        .bind(Json(&job.results))
        .bind(job.status)
        .bind(job.attempts)
        .bind(&job.last_error)
        .bind(job.resume_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, idempotency_key: &str) -> Result<Option<NotificationJob>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT idempotency_key, event, channels, results, status, attempts,
                   last_error, resume_at, created_at, updated_at
            FROM notification_jobs
            WHERE idempotency_key = $1
            "#,
        )
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(NotificationJob::from))
    }

    async fn update(&self, job: &NotificationJob) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notification_jobs
            SET results = $2, status = $3, attempts = $4, last_error = $5,
                resume_at = $6, updated_at = $7
            WHERE idempotency_key = $1
            "#,
        )
        .bind(&job.idempotency_key)
        .bind(Json(&job.results))
        .bind(job.status)
        .bind(job.attempts)
        .bind(&job.last_error)
        .bind(job.resume_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
