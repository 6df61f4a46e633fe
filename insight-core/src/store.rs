//! Store interfaces used by the pipeline, and their Postgres implementation.
//!
//! - `QueryStore`: restricted read path for generated SQL plus the fixed
//!   tenant-filtered join used when that path fails
//! - `AuditStore`: append-only `ai_queries` records

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::models::row::row_from_json;
use crate::models::{AnalysisRecord, ResultSet, TenantId};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Row decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Statement rejected: {0}")]
    Rejected(String),
}

/// One process joined with its client's company, as read by the fallback query.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ProcessRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub process_type: Option<String>,
    pub value: Option<f64>,
    pub received_date: Option<NaiveDate>,
    pub company_name: String,
}

/// Role generated SQL runs as; row-level security scopes it to `app.tenant_id`.
pub const READER_ROLE: &str = "insight_reader";

/// Fixed join used on the degraded path. `$1` is the tenant, `$2` the row cap.
pub const FALLBACK_SQL: &str = "SELECT p.id, p.user_id, p.process_type, p.value::float8 AS value, \
p.received_date, co.name AS company_name \
FROM processes p \
INNER JOIN clients c ON c.id = p.client_id \
INNER JOIN companies co ON co.id = c.company_id \
WHERE p.user_id = $1 \
ORDER BY p.received_date DESC NULLS LAST, p.id \
LIMIT $2";

#[async_trait]
pub trait QueryStore: Send + Sync {
    /// Run one read-only statement for `tenant`, returning at most `max_rows` rows.
    async fn execute_read(
        &self,
        sql: &str,
        tenant: TenantId,
        max_rows: u32,
    ) -> Result<ResultSet, StoreError>;

    /// The tenant's processes joined through clients to companies.
    async fn tenant_processes(
        &self,
        tenant: TenantId,
        limit: u32,
    ) -> Result<Vec<ProcessRecord>, StoreError>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn insert_record(&self, record: &AnalysisRecord) -> Result<(), StoreError>;

    /// Most recent records first.
    async fn recent_records(
        &self,
        tenant: TenantId,
        limit: u32,
    ) -> Result<Vec<AnalysisRecord>, StoreError>;
}

// ============================================================================
// Postgres
// ============================================================================

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    statement_timeout_ms: u64,
}

impl PgStore {
    pub fn new(pool: PgPool, statement_timeout_ms: u64) -> Self {
        Self {
            pool,
            statement_timeout_ms,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: Uuid,
    user_id: Uuid,
    question: String,
    sql_query: String,
    results: String,
    insights: String,
    chart_config: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for AnalysisRecord {
    type Error = serde_json::Error;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: TenantId(row.user_id),
            question: row.question,
            sql_query: row.sql_query,
            results: serde_json::from_str(&row.results)?,
            insights: crate::models::InsightNarrative(row.insights),
            chart_config: serde_json::from_str(&row.chart_config)?,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl QueryStore for PgStore {
    async fn execute_read(
        &self,
        sql: &str,
        tenant: TenantId,
        max_rows: u32,
    ) -> Result<ResultSet, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("SET LOCAL ROLE {}", READER_ROLE))
            .execute(&mut *tx)
            .await?;
        sqlx::query("SELECT set_config('statement_timeout', $1, true)")
            .bind(self.statement_timeout_ms.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("SELECT set_config('app.tenant_id', $1, true)")
            .bind(tenant.to_string())
            .execute(&mut *tx)
            .await?;

        // The subquery wrapper admits exactly one SELECT and caps the rows.
        let wrapped = format!(
            "SELECT row_to_json(q)::text FROM ({}) AS q LIMIT {}",
            sql, max_rows
        );
        let rows: Vec<(String,)> = sqlx::query_as(&wrapped).fetch_all(&mut *tx).await?;

        tx.rollback().await?;

        rows.iter()
            .map(|(text,)| row_from_json(text).map_err(StoreError::from))
            .collect()
    }

    async fn tenant_processes(
        &self,
        tenant: TenantId,
        limit: u32,
    ) -> Result<Vec<ProcessRecord>, StoreError> {
        let rows = sqlx::query_as::<_, ProcessRecord>(FALLBACK_SQL)
            .bind(tenant.0)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl AuditStore for PgStore {
    async fn insert_record(&self, record: &AnalysisRecord) -> Result<(), StoreError> {
        // Bound as text and cast to `json` so the stored document is the exact
        // serialized bytes (jsonb would reorder keys).
        let results = serde_json::to_string(&record.results)?;
        let chart_config = serde_json::to_string(&record.chart_config)?;

        sqlx::query(
            r#"
            INSERT INTO ai_queries (id, user_id, question, sql_query, results, insights, chart_config, created_at)
            VALUES ($1, $2, $3, $4, $5::json, $6, $7::json, $8)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id.0)
        .bind(&record.question)
        .bind(&record.sql_query)
        .bind(results)
        .bind(record.insights.as_str())
        .bind(chart_config)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_records(
        &self,
        tenant: TenantId,
        limit: u32,
    ) -> Result<Vec<AnalysisRecord>, StoreError> {
        let rows = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT id, user_id, question, sql_query, results::text AS results, insights,
                   chart_config::text AS chart_config, created_at
            FROM ai_queries
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(tenant.0)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| AnalysisRecord::try_from(row).map_err(StoreError::from))
            .collect()
    }
}
