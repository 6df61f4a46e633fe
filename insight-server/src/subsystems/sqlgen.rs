//! SQL generation subsystem: question + schema → one SQL statement
//!
//! The prompt asks the model to filter every tenant-scoped table by the
//! caller's id. Compliance is not guaranteed. The executor's guard and
//! fallback enforce tenant scoping on their own.

use std::sync::Arc;

use insight_core::models::{GeneratedQuery, TenantId};
use insight_core::schema::{SchemaDescriptor, TENANT_COLUMN};
use insight_core::{GatewayError, ProviderGateway};

pub struct SqlGenerator {
    gateway: Arc<ProviderGateway>,
    schema: &'static SchemaDescriptor,
    max_rows: u32,
    max_tokens: u32,
}

impl SqlGenerator {
    pub fn new(
        gateway: Arc<ProviderGateway>,
        schema: &'static SchemaDescriptor,
        max_rows: u32,
        max_tokens: u32,
    ) -> Self {
        Self {
            gateway,
            schema,
            max_rows,
            max_tokens,
        }
    }

    pub fn build_prompt(&self, question: &str, tenant: TenantId) -> String {
        let scoped = self
            .schema
            .tenant_scoped_tables()
            .map(|t| t.name)
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "You are a PostgreSQL expert. Based on the user's question and the database schema below, \
write an appropriate SQL query.\n\
\n\
DATABASE SCHEMA:\n\
{schema}\n\
\n\
USER QUESTION: {question}\n\
\n\
IMPORTANT:\n\
1. ALWAYS give each table a distinct alias and filter every table that has this column ({scoped}) with <alias>.{column} = '{tenant}'\n\
2. Use JOINs when the question relates data across tables\n\
3. Order the results in a relevant way\n\
4. Limit the result to at most {max_rows} rows\n\
5. Give every result column a descriptive name with AS\n\
\n\
Return ONLY the SQL query, without explanations:",
            schema = self.schema.describe(),
            question = question,
            column = TENANT_COLUMN,
            tenant = tenant,
            scoped = scoped,
            max_rows = self.max_rows,
        )
    }

    pub async fn generate_sql(
        &self,
        question: &str,
        tenant: TenantId,
    ) -> Result<GeneratedQuery, GatewayError> {
        let prompt = self.build_prompt(question, tenant);
        let raw = self.gateway.generate(&prompt, self.max_tokens).await?;
        let text = normalize_sql(&raw);

        tracing::info!(sql = %text, "SQL generated");

        Ok(GeneratedQuery {
            text,
            source_question: question.to_string(),
        })
    }
}

/// Strip markdown fences, surrounding whitespace and one trailing semicolon.
pub fn normalize_sql(raw: &str) -> String {
    let trimmed = raw.trim();
    let inner = if let Some(s) = trimmed.strip_prefix("```sql") {
        s
    } else if let Some(s) = trimmed.strip_prefix("```postgresql") {
        s
    } else if let Some(s) = trimmed.strip_prefix("```") {
        s
    } else {
        trimmed
    };
    let inner = inner.trim();
    let inner = inner.strip_suffix("```").unwrap_or(inner).trim();
    inner.strip_suffix(';').unwrap_or(inner).trim_end().to_string()
}
