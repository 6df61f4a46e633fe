//! Query execution subsystem
//!
//! Primary path: guard the generated SQL, then run it through the store's
//! restricted read path. Fallback path, taken on any failure: the fixed
//! tenant-filtered join, grouped per company in memory.
//!
//! `execute` never fails. A store error on the fallback yields no rows.

use std::sync::Arc;

use insight_core::models::{GeneratedQuery, ResultSet, Row, Scalar, TenantId};
use insight_core::schema::{SchemaDescriptor, TENANT_COLUMN};
use insight_core::{ProcessRecord, QueryStore, FALLBACK_SQL};

use super::guard;

/// Column names produced by the per-company aggregation.
pub const COMPANY_COLUMN: &str = "empresa";
pub const COUNT_COLUMN: &str = "numero_processos";
pub const TOTAL_COLUMN: &str = "valor_total";

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionPath {
    Primary,
    Degraded { reason: String },
}

/// Rows plus the statement they came from.
#[derive(Debug, Clone)]
pub struct Execution {
    pub rows: ResultSet,
    pub sql: String,
    pub path: ExecutionPath,
}

impl Execution {
    pub fn is_degraded(&self) -> bool {
        matches!(self.path, ExecutionPath::Degraded { .. })
    }
}

pub struct QueryExecutor {
    store: Arc<dyn QueryStore>,
    schema: &'static SchemaDescriptor,
    max_rows: u32,
    fallback_rows: u32,
}

impl QueryExecutor {
    pub fn new(
        store: Arc<dyn QueryStore>,
        schema: &'static SchemaDescriptor,
        max_rows: u32,
        fallback_rows: u32,
    ) -> Self {
        Self {
            store,
            schema,
            max_rows,
            fallback_rows,
        }
    }

    pub async fn execute(&self, query: &GeneratedQuery, tenant: TenantId) -> Execution {
        let primary = match guard::check_statement(&query.text, self.schema, tenant) {
            Ok(()) => self
                .store
                .execute_read(&query.text, tenant, self.max_rows)
                .await
                .map_err(|e| e.to_string()),
            Err(violation) => Err(format!("rejected by guard: {}", violation)),
        };

        match primary {
            Ok(mut rows) => {
                let before = rows.len();
                retain_tenant_rows(&mut rows, tenant);
                if rows.len() != before {
                    tracing::warn!(
                        dropped = before - rows.len(),
                        "Dropped rows carrying another tenant's user_id"
                    );
                }
                tracing::info!(rows = rows.len(), "Generated SQL executed");
                Execution {
                    rows,
                    sql: query.text.clone(),
                    path: ExecutionPath::Primary,
                }
            }
            Err(reason) => {
                tracing::warn!(reason = %reason, "Query execution degraded, using fallback query");
                self.fallback(tenant, reason).await
            }
        }
    }

    async fn fallback(&self, tenant: TenantId, reason: String) -> Execution {
        let records = match self.store.tenant_processes(tenant, self.fallback_rows).await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, "Fallback query failed, returning no rows");
                Vec::new()
            }
        };

        let total = records.len();
        let owned: Vec<ProcessRecord> = records
            .into_iter()
            .filter(|r| r.user_id == tenant.0)
            .collect();
        if owned.len() != total {
            tracing::warn!(
                dropped = total - owned.len(),
                "Fallback store returned rows of another tenant"
            );
        }

        Execution {
            rows: aggregate_by_company(&owned),
            sql: FALLBACK_SQL.to_string(),
            path: ExecutionPath::Degraded { reason },
        }
    }
}

/// Drop rows whose `user_id` column names a different tenant.
fn retain_tenant_rows(rows: &mut ResultSet, tenant: TenantId) {
    let expected = tenant.to_string();
    rows.retain(|row| match row.get(TENANT_COLUMN) {
        Some(Scalar::Text(value)) => value.eq_ignore_ascii_case(&expected),
        Some(Scalar::Null) | None => true,
        Some(_) => false,
    });
}

/// Group processes by company name (exact match) counting processes and
/// summing value, then order by count descending. Ties keep first-seen order.
pub fn aggregate_by_company(records: &[ProcessRecord]) -> ResultSet {
    let mut groups: Vec<(&str, i64, f64)> = Vec::new();

    for record in records {
        let value = record.value.unwrap_or(0.0);
        match groups
            .iter_mut()
            .find(|(name, _, _)| *name == record.company_name)
        {
            Some(group) => {
                group.1 += 1;
                group.2 += value;
            }
            None => groups.push((&record.company_name, 1, value)),
        }
    }

    groups.sort_by(|a, b| b.1.cmp(&a.1));

    groups
        .into_iter()
        .map(|(name, count, total)| {
            let mut row = Row::new();
            row.insert(COMPANY_COLUMN.to_string(), Scalar::from(name));
            row.insert(COUNT_COLUMN.to_string(), Scalar::from(count));
            row.insert(TOTAL_COLUMN.to_string(), Scalar::from_f64(total));
            row
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use insight_core::{StoreError, SALES_SCHEMA};
    use std::sync::Mutex;
    use uuid::Uuid;

    fn record(tenant: Uuid, company: &str, value: Option<f64>) -> ProcessRecord {
        ProcessRecord {
            id: Uuid::new_v4(),
            user_id: tenant,
            process_type: Some("venda".to_string()),
            value,
            received_date: None,
            company_name: company.to_string(),
        }
    }

    /// Store whose primary path fails and whose fallback returns canned records,
    /// ignoring the tenant argument the way a misconfigured store might.
    struct LeakyStore {
        primary: Result<ResultSet, String>,
        records: Vec<ProcessRecord>,
        executed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl QueryStore for LeakyStore {
        async fn execute_read(
            &self,
            sql: &str,
            _tenant: TenantId,
            _max_rows: u32,
        ) -> Result<ResultSet, StoreError> {
            self.executed.lock().unwrap().push(sql.to_string());
            self.primary.clone().map_err(StoreError::Rejected)
        }

        async fn tenant_processes(
            &self,
            _tenant: TenantId,
            _limit: u32,
        ) -> Result<Vec<ProcessRecord>, StoreError> {
            Ok(self.records.clone())
        }
    }

    fn executor(store: LeakyStore) -> (QueryExecutor, Arc<LeakyStore>) {
        let store = Arc::new(store);
        (
            QueryExecutor::new(store.clone(), &SALES_SCHEMA, 50, 10),
            store,
        )
    }

    fn query(text: &str) -> GeneratedQuery {
        GeneratedQuery {
            text: text.to_string(),
            source_question: "q".to_string(),
        }
    }

    #[test]
    fn test_aggregate_groups_counts_and_sorts() {
        let t = Uuid::new_v4();
        let rows = aggregate_by_company(&[
            record(t, "Beta", Some(100.0)),
            record(t, "Acme", Some(10.0)),
            record(t, "Acme", Some(20.5)),
            record(t, "Gamma", None),
        ]);

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][COMPANY_COLUMN], Scalar::from("Acme"));
        assert_eq!(rows[0][COUNT_COLUMN], Scalar::from(2));
        assert_eq!(rows[0][TOTAL_COLUMN].as_f64(), Some(30.5));
        // Ties keep first-seen order.
        assert_eq!(rows[1][COMPANY_COLUMN], Scalar::from("Beta"));
        assert_eq!(rows[2][COMPANY_COLUMN], Scalar::from("Gamma"));
        assert_eq!(rows[2][TOTAL_COLUMN].as_f64(), Some(0.0));
    }

    #[test]
    fn test_aggregate_uses_exact_name_match() {
        let t = Uuid::new_v4();
        let rows = aggregate_by_company(&[record(t, "Acme", None), record(t, "acme", None)]);
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_primary_path_returns_store_rows() {
        let tenant = TenantId(Uuid::new_v4());
        let mut row = Row::new();
        row.insert("empresa".to_string(), Scalar::from("Acme"));
        let (executor, store) = executor(LeakyStore {
            primary: Ok(vec![row]),
            records: Vec::new(),
            executed: Mutex::new(Vec::new()),
        });

        let sql = "SELECT name AS empresa FROM companies";
        let execution = executor.execute(&query(sql), tenant).await;

        assert_eq!(execution.path, ExecutionPath::Primary);
        assert_eq!(execution.sql, sql);
        assert_eq!(execution.rows.len(), 1);
        assert_eq!(store.executed.lock().unwrap().as_slice(), &[sql.to_string()]);
    }

    #[tokio::test]
    async fn test_guard_rejection_never_reaches_store() {
        let tenant = TenantId(Uuid::new_v4());
        let (executor, store) = executor(LeakyStore {
            primary: Ok(Vec::new()),
            records: vec![record(tenant.0, "Acme", Some(1.0))],
            executed: Mutex::new(Vec::new()),
        });

        let execution = executor.execute(&query("SELECT * FROM processes"), tenant).await;

        assert!(execution.is_degraded());
        assert_eq!(execution.sql, FALLBACK_SQL);
        assert!(store.executed.lock().unwrap().is_empty());
        assert_eq!(execution.rows.len(), 1);
    }

    #[tokio::test]
    async fn test_fallback_never_returns_other_tenants() {
        let tenant = TenantId(Uuid::new_v4());
        let other = Uuid::new_v4();

        // Every interleaving of own/foreign rows across companies.
        let companies = ["Acme", "Beta", "Gamma"];
        for mask in 0u32..64 {
            let records: Vec<ProcessRecord> = (0..6)
                .map(|i| {
                    let owner = if mask & (1 << i) != 0 { tenant.0 } else { other };
                    record(owner, companies[i % companies.len()], Some(1.0))
                })
                .collect();
            let own_count = records.iter().filter(|r| r.user_id == tenant.0).count();

            let (executor, _) = executor(LeakyStore {
                primary: Err("permission denied".to_string()),
                records,
                executed: Mutex::new(Vec::new()),
            });

            let sql = format!("SELECT * FROM processes WHERE user_id = '{}'", tenant);
            let execution = executor.execute(&query(&sql), tenant).await;

            assert!(execution.is_degraded());
            let counted: i64 = execution
                .rows
                .iter()
                .map(|row| match &row[COUNT_COLUMN] {
                    Scalar::Number(n) => n.as_i64().unwrap_or_default(),
                    _ => 0,
                })
                .sum();
            assert_eq!(counted as usize, own_count, "mask {:b}", mask);
        }
    }

    #[tokio::test]
    async fn test_primary_rows_of_other_tenant_are_dropped() {
        let tenant = TenantId(Uuid::new_v4());
        let mut own = Row::new();
        own.insert("user_id".to_string(), Scalar::Text(tenant.to_string()));
        let mut foreign = Row::new();
        foreign.insert("user_id".to_string(), Scalar::Text(Uuid::new_v4().to_string()));

        let (executor, _) = executor(LeakyStore {
            primary: Ok(vec![own, foreign]),
            records: Vec::new(),
            executed: Mutex::new(Vec::new()),
        });

        let sql = format!("SELECT user_id FROM processes WHERE user_id = '{}'", tenant);
        let execution = executor.execute(&query(&sql), tenant).await;
        assert_eq!(execution.path, ExecutionPath::Primary);
        assert_eq!(execution.rows.len(), 1);
    }
}
