//! Analysis orchestrator
//!
//! One request runs through:
//!   Received → Authenticated → SqlGenerated → Executed → ChartInferred
//!   → InsightSynthesized → Persisted → Responded
//!
//! Any stage may end in `Failed`, except execution (which degrades instead)
//! and persistence (logged, never surfaced).

use std::sync::Arc;

use axum::http::StatusCode;
use insight_core::config::AnalysisConfig;
use insight_core::models::{AnalysisRecord, AnalysisRequest, AnalysisResponse, TenantId};
use insight_core::{
    bearer_token, AuditStore, AuthError, Authenticator, GatewayError, ProviderGateway, QueryStore,
    StoreError, SALES_SCHEMA,
};
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use super::chart::infer_chart;
use super::executor::QueryExecutor;
use super::insight::InsightSynthesizer;
use super::sqlgen::SqlGenerator;

pub const HISTORY_DEFAULT_LIMIT: u32 = 10;
pub const HISTORY_MAX_LIMIT: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStage {
    Received,
    Authenticated,
    SqlGenerated,
    Executed,
    ChartInferred,
    InsightSynthesized,
    Persisted,
    Responded,
}

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Unauthorized(#[from] AuthError),

    #[error("{0}")]
    Provider(#[from] GatewayError),

    #[error("{0}")]
    Store(#[from] StoreError),
}

impl AnalysisError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AnalysisError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AnalysisError::Unauthorized(AuthError::Upstream(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AnalysisError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AnalysisError::Provider(_) | AnalysisError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

pub fn primary_interpretation(question: &str) -> String {
    format!(
        "The question \"{}\" was interpreted and converted into a SQL query for data analysis.",
        question
    )
}

pub fn degraded_interpretation(question: &str) -> String {
    format!(
        "The question \"{}\" was interpreted as a query about the top clients/companies by process volume.",
        question
    )
}

fn reached(stage: AnalysisStage) {
    tracing::debug!(stage = ?stage, "Analysis stage reached");
}

pub struct Analyzer {
    authenticator: Arc<dyn Authenticator>,
    generator: SqlGenerator,
    executor: QueryExecutor,
    synthesizer: InsightSynthesizer,
    audit: Arc<dyn AuditStore>,
    chart_max_rows: usize,
}

impl Analyzer {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        gateway: Arc<ProviderGateway>,
        query_store: Arc<dyn QueryStore>,
        audit: Arc<dyn AuditStore>,
        config: &AnalysisConfig,
    ) -> Self {
        Self {
            authenticator,
            generator: SqlGenerator::new(
                gateway.clone(),
                &SALES_SCHEMA,
                config.max_generated_rows,
                config.sql_max_tokens,
            ),
            executor: QueryExecutor::new(
                query_store,
                &SALES_SCHEMA,
                config.max_generated_rows,
                config.fallback_rows,
            ),
            synthesizer: InsightSynthesizer::new(gateway, config.insight_max_tokens),
            audit,
            chart_max_rows: config.chart_max_rows,
        }
    }

    async fn authenticate(&self, authorization: Option<&str>) -> Result<TenantId, AuthError> {
        let token = bearer_token(authorization)?;
        self.authenticator.resolve(token).await
    }

    /// Run the full pipeline for one request.
    pub async fn analyze(
        &self,
        authorization: Option<&str>,
        request: AnalysisRequest,
    ) -> Result<AnalysisResponse, AnalysisError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("analysis", %request_id);

        let result = self.run(authorization, request).instrument(span.clone()).await;
        if let Err(e) = &result {
            span.in_scope(|| tracing::warn!(error = %e, "Analysis failed"));
        }
        result
    }

    async fn run(
        &self,
        authorization: Option<&str>,
        request: AnalysisRequest,
    ) -> Result<AnalysisResponse, AnalysisError> {
        reached(AnalysisStage::Received);

        let tenant = self.authenticate(authorization).await?;
        reached(AnalysisStage::Authenticated);

        let question = request
            .question
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| AnalysisError::InvalidRequest("Question is required".to_string()))?
            .to_string();

        let query = self.generator.generate_sql(&question, tenant).await?;
        reached(AnalysisStage::SqlGenerated);

        let execution = self.executor.execute(&query, tenant).await;
        reached(AnalysisStage::Executed);

        let chart_config = infer_chart(&execution.rows, self.chart_max_rows);
        reached(AnalysisStage::ChartInferred);

        let degraded = execution.is_degraded();
        let sql = (!degraded).then_some(execution.sql.as_str());
        let insights = self
            .synthesizer
            .synthesize(&execution.rows, &question, sql)
            .await?;
        reached(AnalysisStage::InsightSynthesized);

        let interpretation = if degraded {
            degraded_interpretation(&question)
        } else {
            primary_interpretation(&question)
        };

        let response = AnalysisResponse {
            question,
            sql_query: execution.sql,
            results: execution.rows,
            insights,
            chart_config,
            interpretation,
        };

        let record = AnalysisRecord::from_response(tenant, &response);
        match self.audit.insert_record(&record).await {
            Ok(()) => reached(AnalysisStage::Persisted),
            Err(e) => {
                tracing::warn!(record_id = %record.id, error = %e, "Persisting analysis record failed")
            }
        }

        tracing::info!(
            tenant = %tenant,
            rows = response.results.len(),
            degraded,
            "Analysis completed"
        );
        reached(AnalysisStage::Responded);
        Ok(response)
    }

    /// The caller's most recent records, newest first.
    pub async fn history(
        &self,
        authorization: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<AnalysisRecord>, AnalysisError> {
        let tenant = self.authenticate(authorization).await?;
        let limit = limit
            .unwrap_or(HISTORY_DEFAULT_LIMIT)
            .clamp(1, HISTORY_MAX_LIMIT);
        Ok(self.audit.recent_records(tenant, limit).await?)
    }
}
