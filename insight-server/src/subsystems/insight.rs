//! Insight synthesis: rows + question back through the provider gateway.

use std::sync::Arc;

use insight_core::models::{InsightNarrative, ResultSet, SECTION_LABELS};
use insight_core::{GatewayError, ProviderGateway};

pub struct InsightSynthesizer {
    gateway: Arc<ProviderGateway>,
    max_tokens: u32,
}

impl InsightSynthesizer {
    pub fn new(gateway: Arc<ProviderGateway>, max_tokens: u32) -> Self {
        Self {
            gateway,
            max_tokens,
        }
    }

    /// `sql` is `None` when the rows came from the per-company fallback summary.
    pub fn build_prompt(&self, rows: &ResultSet, question: &str, sql: Option<&str>) -> String {
        let data = serde_json::to_string(rows).unwrap_or_else(|_| "[]".to_string());

        let (intro, source) = match sql {
            Some(sql) => (
                "Analyze the following data and provide detailed insights:",
                format!("SQL QUERY: {}\n", sql),
            ),
            None => (
                "Analyze the following sales/process data and provide detailed insights. \
The data is a per-company summary of process counts and total values:",
                String::new(),
            ),
        };

        format!(
            "{intro}\n\
\n\
DATA: {data}\n\
{source}\
ORIGINAL QUESTION: {question}\n\
\n\
Provide an analysis with:\n\
1. {s1} (2-3 key sentences)\n\
2. {s2} (3-4 important points)\n\
3. {s3} (2-3 observations)\n\
4. {s4} (2-3 practical suggestions)\n\
\n\
Be specific and cite concrete numbers and percentages from the data where relevant.",
            intro = intro,
            data = data,
            source = source,
            question = question,
            s1 = SECTION_LABELS[0],
            s2 = SECTION_LABELS[1],
            s3 = SECTION_LABELS[2],
            s4 = SECTION_LABELS[3],
        )
    }

    pub async fn synthesize(
        &self,
        rows: &ResultSet,
        question: &str,
        sql: Option<&str>,
    ) -> Result<InsightNarrative, GatewayError> {
        let prompt = self.build_prompt(rows, question, sql);
        let text = self.gateway.generate(&prompt, self.max_tokens).await?;
        let narrative = InsightNarrative(text.trim().to_string());
        if !narrative.has_all_sections() {
            tracing::debug!(
                sections = narrative.sections().len(),
                "Insight text is missing expected sections"
            );
        }
        Ok(narrative)
    }
}
