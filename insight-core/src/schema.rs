//! Fixed description of the tables exposed to SQL generation.

/// Column carrying the owning tenant on tenant-scoped tables.
pub const TENANT_COLUMN: &str = "user_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: &'static str,
    pub sql_type: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDescriptor {
    pub name: &'static str,
    pub columns: &'static [ColumnDescriptor],
    /// Whether rows of this table belong to a tenant via `user_id`.
    pub tenant_scoped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaDescriptor {
    pub tables: &'static [TableDescriptor],
}

const fn col(name: &'static str, sql_type: &'static str) -> ColumnDescriptor {
    ColumnDescriptor { name, sql_type }
}

/// The sales schema: companies, clients, processes.
pub static SALES_SCHEMA: SchemaDescriptor = SchemaDescriptor {
    tables: &[
        TableDescriptor {
            name: "companies",
            columns: &[
                col("id", "uuid"),
                col("name", "text"),
                col("created_at", "timestamptz"),
                col("updated_at", "timestamptz"),
            ],
            tenant_scoped: false,
        },
        TableDescriptor {
            name: "clients",
            columns: &[
                col("id", "uuid"),
                col("name", "text"),
                col("email", "text"),
                col("company_id", "uuid"),
                col("user_id", "uuid"),
                col("created_at", "timestamptz"),
                col("updated_at", "timestamptz"),
            ],
            tenant_scoped: true,
        },
        TableDescriptor {
            name: "processes",
            columns: &[
                col("id", "uuid"),
                col("client_id", "uuid"),
                col("process_type", "text"),
                col("value", "decimal"),
                col("status", "text"),
                col("received_date", "date"),
                col("user_id", "uuid"),
                col("created_at", "timestamptz"),
                col("updated_at", "timestamptz"),
            ],
            tenant_scoped: true,
        },
    ],
};

impl SchemaDescriptor {
    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn tenant_scoped_tables(&self) -> impl Iterator<Item = &TableDescriptor> {
        self.tables.iter().filter(|t| t.tenant_scoped)
    }

    /// Render as the bullet list embedded in generation prompts.
    pub fn describe(&self) -> String {
        self.tables
            .iter()
            .map(|table| {
                let columns = table
                    .columns
                    .iter()
                    .map(|c| format!("{} ({})", c.name, c.sql_type))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("- {}: {}", table.name, columns)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_scoped_tables_declare_tenant_column() {
        for table in SALES_SCHEMA.tables {
            let has_column = table.columns.iter().any(|c| c.name == TENANT_COLUMN);
            assert_eq!(
                table.tenant_scoped, has_column,
                "{} tenant flag disagrees with its columns",
                table.name
            );
        }
    }

    #[test]
    fn test_describe_lists_every_table() {
        let text = SALES_SCHEMA.describe();
        assert!(text.contains("- companies: id (uuid), name (text)"));
        assert!(text.contains("- clients:"));
        assert!(text.contains("value (decimal)"));
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert!(SALES_SCHEMA.table("PROCESSES").is_some());
        assert!(SALES_SCHEMA.table("invoices").is_none());
        assert_eq!(SALES_SCHEMA.tenant_scoped_tables().count(), 2);
    }
}
