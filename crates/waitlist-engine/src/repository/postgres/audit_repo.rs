//! 审计日志 PostgreSQL 仓储

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::Result;
use crate::models::AuditRecord;
use crate::repository::traits::AuditRepository;

pub struct PgAuditRepository {
    pool: PgPool,
}

impl PgAuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditRepository for PgAuditRepository {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (id, subject_type, subject_id, action, detail, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id)
        .bind(record.subject_type)
        .bind(&record.subject_id)
        .bind(&record.action)
        .bind(&record.detail)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_by_subject(&self, subject_id: &str) -> Result<Vec<AuditRecord>> {
        let records = sqlx::query_as::<_, AuditRecord>(
            r#"
            SELECT id, subject_type, subject_id, action, detail, recorded_at
            FROM audit_log
            WHERE subject_id = $1
            ORDER BY recorded_at ASC, id ASC
            "#,
        )
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
