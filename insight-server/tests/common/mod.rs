//! In-memory fakes shared by the router tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use insight_core::config::AnalysisConfig;
use insight_core::models::{AnalysisRecord, ResultSet, TenantId};
use insight_core::{
    AuditStore, AuthError, Authenticator, ProcessRecord, ProviderError, ProviderGateway,
    QueryStore, StoreError, TextProvider,
};
use insight_server::http::{build_router, HttpState};
use insight_server::subsystems::analysis::Analyzer;
use insight_server::subsystems::executor::aggregate_by_company;
use uuid::Uuid;

pub const TOKEN_T: &str = "token-tenant-t";
pub const TOKEN_U: &str = "token-tenant-u";

pub fn tenant_t() -> TenantId {
    TenantId(Uuid::parse_str("11111111-1111-4111-8111-111111111111").unwrap())
}

pub fn tenant_u() -> TenantId {
    TenantId(Uuid::parse_str("22222222-2222-4222-8222-222222222222").unwrap())
}

pub const INSIGHT_REPLY: &str = "1. Executive Summary: Acme leads with 3 processes.\n\
2. Key Insights: Acme holds 75% of the volume.\n\
3. Patterns: activity concentrates in one company.\n\
4. Recommendations: diversify the client base.";

// ============================================================================
// Providers
// ============================================================================

/// Answers SQL prompts with `sql_template` (`{tenant}` is replaced by the id
/// the prompt asks to filter on) and insight prompts with `INSIGHT_REPLY`.
pub struct ScriptedProvider {
    pub sql_template: String,
    pub calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(sql_template: &str) -> Arc<Self> {
        Arc::new(Self {
            sql_template: sql_template.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn prompt_tenant(prompt: &str) -> Option<&str> {
    let marker = "user_id = '";
    let start = prompt.find(marker)? + marker.len();
    prompt.get(start..start + 36)
}

#[async_trait]
impl TextProvider for ScriptedProvider {
    async fn generate(&self, prompt: &str, _max_tokens: u32) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if prompt.contains("Return ONLY the SQL query") {
            let tenant = prompt_tenant(prompt).unwrap_or_default();
            Ok(self.sql_template.replace("{tenant}", tenant))
        } else {
            Ok(INSIGHT_REPLY.to_string())
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub struct FailingProvider {
    pub name: String,
    pub calls: AtomicUsize,
}

impl FailingProvider {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TextProvider for FailingProvider {
    async fn generate(&self, _prompt: &str, _max_tokens: u32) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::Api {
            code: 503,
            message: "overloaded".to_string(),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Auth
// ============================================================================

pub struct StaticAuthenticator {
    tokens: HashMap<String, TenantId>,
}

impl StaticAuthenticator {
    pub fn new() -> Arc<Self> {
        let mut tokens = HashMap::new();
        tokens.insert(TOKEN_T.to_string(), tenant_t());
        tokens.insert(TOKEN_U.to_string(), tenant_u());
        Arc::new(Self { tokens })
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn resolve(&self, token: &str) -> Result<TenantId, AuthError> {
        self.tokens
            .get(token)
            .copied()
            .ok_or(AuthError::InvalidCredential)
    }
}

// ============================================================================
// Store
// ============================================================================

/// Audit row kept the way Postgres keeps `json` columns: as the exact text.
struct StoredRecord {
    record: AnalysisRecord,
    results: String,
    chart_config: String,
}

/// Sales data for two tenants plus an in-memory `ai_queries`.
pub struct MemoryStore {
    pub processes: Vec<ProcessRecord>,
    pub fail_primary: bool,
    pub fail_audit: bool,
    pub executed: Mutex<Vec<String>>,
    records: Mutex<Vec<StoredRecord>>,
}

fn process(tenant: TenantId, company: &str, value: f64) -> ProcessRecord {
    ProcessRecord {
        id: Uuid::new_v4(),
        user_id: tenant.0,
        process_type: Some("venda".to_string()),
        value: Some(value),
        received_date: chrono::NaiveDate::from_ymd_opt(2025, 3, 1),
        company_name: company.to_string(),
    }
}

impl MemoryStore {
    pub fn seeded() -> Self {
        let t = tenant_t();
        let u = tenant_u();
        Self {
            processes: vec![
                process(t, "Acme", 1000.0),
                process(u, "Umbrella", 99.0),
                process(t, "Beta", 250.5),
                process(t, "Acme", 500.0),
                process(u, "Umbrella", 99.0),
                process(t, "Acme", 125.25),
                process(u, "Initech", 10.0),
            ],
            fail_primary: false,
            fail_audit: false,
            executed: Mutex::new(Vec::new()),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// `(results, chart_config)` exactly as stored for the newest record.
    pub fn last_stored_json(&self) -> Option<(String, String)> {
        self.records
            .lock()
            .unwrap()
            .last()
            .map(|r| (r.results.clone(), r.chart_config.clone()))
    }

    fn owned(&self, tenant: TenantId) -> Vec<ProcessRecord> {
        self.processes
            .iter()
            .filter(|p| p.user_id == tenant.0)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl QueryStore for MemoryStore {
    /// Stands in for a correctly scoped per-company query.
    async fn execute_read(
        &self,
        sql: &str,
        tenant: TenantId,
        max_rows: u32,
    ) -> Result<ResultSet, StoreError> {
        self.executed.lock().unwrap().push(sql.to_string());
        if self.fail_primary {
            return Err(StoreError::Rejected("relation does not exist".to_string()));
        }
        let mut rows = aggregate_by_company(&self.owned(tenant));
        rows.truncate(max_rows as usize);
        Ok(rows)
    }

    async fn tenant_processes(
        &self,
        tenant: TenantId,
        limit: u32,
    ) -> Result<Vec<ProcessRecord>, StoreError> {
        let mut owned = self.owned(tenant);
        owned.truncate(limit as usize);
        Ok(owned)
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn insert_record(&self, record: &AnalysisRecord) -> Result<(), StoreError> {
        if self.fail_audit {
            return Err(StoreError::Rejected("ai_queries is read-only".to_string()));
        }
        let stored = StoredRecord {
            record: record.clone(),
            results: serde_json::to_string(&record.results)?,
            chart_config: serde_json::to_string(&record.chart_config)?,
        };
        self.records.lock().unwrap().push(stored);
        Ok(())
    }

    async fn recent_records(
        &self,
        tenant: TenantId,
        limit: u32,
    ) -> Result<Vec<AnalysisRecord>, StoreError> {
        let records = self.records.lock().unwrap();
        let mut out = Vec::new();
        for stored in records.iter().rev().filter(|r| r.record.user_id == tenant) {
            if out.len() >= limit as usize {
                break;
            }
            let mut record = stored.record.clone();
            record.results = serde_json::from_str(&stored.results)?;
            record.chart_config = serde_json::from_str(&stored.chart_config)?;
            out.push(record);
        }
        Ok(out)
    }
}

// ============================================================================
// Router
// ============================================================================

pub fn app(providers: Vec<Arc<dyn TextProvider>>, store: Arc<MemoryStore>) -> Router {
    let gateway = Arc::new(ProviderGateway::new(providers).unwrap());
    let analyzer = Analyzer::new(
        StaticAuthenticator::new(),
        gateway,
        store.clone(),
        store,
        &AnalysisConfig::default(),
    );
    build_router(Arc::new(HttpState {
        analyzer,
        pool: None,
    }))
}
