use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::chart::ChartSpec;
use super::narrative::InsightNarrative;
use super::row::ResultSet;

/// Authenticated caller whose data an analysis may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub Uuid);

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Inbound body of `POST /analyze`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalysisRequest {
    #[serde(default)]
    pub question: Option<String>,
}

/// SQL produced by the generator. Untrusted: only ever run through the
/// executor's restricted read path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedQuery {
    pub text: String,
    pub source_question: String,
}

/// Body of a successful `POST /analyze`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub question: String,
    pub sql_query: String,
    pub results: ResultSet,
    pub insights: InsightNarrative,
    pub chart_config: ChartSpec,
    pub interpretation: String,
}

/// Append-only audit row in `ai_queries`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: Uuid,
    pub user_id: TenantId,
    pub question: String,
    pub sql_query: String,
    pub results: ResultSet,
    pub insights: InsightNarrative,
    pub chart_config: ChartSpec,
    pub created_at: DateTime<Utc>,
}

impl AnalysisRecord {
    pub fn from_response(tenant: TenantId, response: &AnalysisResponse) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: tenant,
            question: response.question.clone(),
            sql_query: response.sql_query.clone(),
            results: response.results.clone(),
            insights: response.insights.clone(),
            chart_config: response.chart_config.clone(),
            created_at: Utc::now(),
        }
    }
}
