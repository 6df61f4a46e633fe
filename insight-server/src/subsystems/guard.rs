//! Statement guard for generated SQL
//!
//! Generated SQL only reaches the store when it is a single read-only
//! SELECT/WITH statement in which every reference to a tenant-scoped table
//! is filtered on the caller through its own alias. Anything else is
//! rejected and the executor takes the fallback path. Row-level security
//! in the store still applies to whatever passes.

use std::collections::HashSet;

use insight_core::models::TenantId;
use insight_core::schema::{SchemaDescriptor, TENANT_COLUMN};
use regex::Regex;
use thiserror::Error;

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "create", "truncate", "grant", "revoke",
    "copy", "call", "do", "merge", "vacuum", "set", "reset", "lock", "listen", "notify", "into",
    "execute", "prepare",
];

/// Functions that read tables named inside string arguments or touch the host.
const FORBIDDEN_FUNCTIONS: &[&str] = &[
    "query_to_xml", "query_to_xml_and_xmlschema", "cursor_to_xml", "table_to_xml",
    "table_to_xml_and_xmlschema", "dblink", "dblink_exec", "pg_read_file",
    "pg_read_binary_file", "pg_ls_dir", "lo_import", "lo_export", "pg_sleep", "set_config",
];

/// Words that can follow a table name without being its alias.
const NOT_AN_ALIAS: &[&str] = &[
    "where", "join", "inner", "left", "right", "full", "cross", "natural", "on", "using",
    "group", "order", "limit", "offset", "fetch", "union", "intersect", "except", "having",
    "window", "for", "tablesample", "lateral", "and", "select", "from", "when", "then", "else",
    "end",
];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GuardViolation {
    #[error("empty statement")]
    Empty,

    #[error("more than one statement")]
    MultipleStatements,

    #[error("statement must start with SELECT or WITH")]
    NotSelect,

    #[error("forbidden keyword: {0}")]
    ForbiddenKeyword(String),

    #[error("comments are not allowed")]
    Comment,

    #[error("dollar-quoted and escape string literals are not allowed")]
    UnsupportedLiteral,

    #[error("OR is not allowed next to tenant predicates")]
    Disjunction,

    #[error("tenant filter is negated")]
    NegatedTenantFilter,

    #[error("{0} is bound more than once")]
    AmbiguousReference(String),

    #[error("{0} is referenced without a tenant filter")]
    MissingTenantFilter(String),

    #[error("tenant filter names another tenant: {0}")]
    ForeignTenant(String),
}

struct Patterns {
    word: Regex,
    token: Regex,
    special_literal: Regex,
    tenant_predicate: Regex,
    other_user_id_comparison: Regex,
    negated_tenant_filter: Regex,
}

impl Patterns {
    fn compile() -> Option<Self> {
        Some(Self {
            word: Regex::new(r"[a-z_][a-z0-9_$]*").ok()?,
            token: Regex::new(r"[a-z_][a-z0-9_$]*|\S").ok()?,
            special_literal: Regex::new(r"\$(?:[a-z_][a-z0-9_]*)?\$|\be'|\bu&'").ok()?,
            tenant_predicate: Regex::new(&format!(
                r"(?:\b([a-z_][a-z0-9_$]*)\s*\.\s*)?\b{}\s*=\s*'([^']*)'",
                TENANT_COLUMN
            ))
            .ok()?,
            other_user_id_comparison: Regex::new(&format!(
                r"\b{}\s*(<>|!=|\bin\b|\blike\b|\bis\b)",
                TENANT_COLUMN
            ))
            .ok()?,
            negated_tenant_filter: Regex::new(&format!(
                r"\bnot\s*\(*\s*(?:[a-z_][a-z0-9_$]*\s*\.\s*)?{}\b",
                TENANT_COLUMN
            ))
            .ok()?,
        })
    }
}

/// One mention of a tenant-scoped table in a FROM or JOIN position.
#[derive(Debug, PartialEq, Eq)]
struct ScopedReference<'a> {
    table: &'a str,
    /// Alias when one is given, otherwise the table name.
    binding: &'a str,
}

fn is_identifier(token: &str) -> bool {
    token.starts_with(|c: char| c.is_ascii_lowercase() || c == '_')
}

fn scoped_references<'a>(
    tokens: &[&'a str],
    schema: &SchemaDescriptor,
) -> Vec<ScopedReference<'a>> {
    let mut references = Vec::new();
    for (i, &token) in tokens.iter().enumerate() {
        if !schema.table(token).is_some_and(|t| t.tenant_scoped) {
            continue;
        }
        let next = tokens.get(i + 1).copied();
        // `processes.user_id` qualifies a column, it does not bind a table.
        if next == Some(".") {
            continue;
        }
        let alias = match next {
            Some("as") => tokens.get(i + 2).copied().filter(|t| is_identifier(t)),
            Some(t) if is_identifier(t) && !NOT_AN_ALIAS.contains(&t) => Some(t),
            _ => None,
        };
        references.push(ScopedReference {
            table: token,
            binding: alias.unwrap_or(token),
        });
    }
    references
}

/// Blank out the contents of single-quoted literals, and of double-quoted
/// identifiers when `identifiers` is set. The quote characters are kept and
/// byte offsets are unchanged.
pub fn mask_quoted(sql: &str, identifiers: bool) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut open: Option<char> = None;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match open {
            Some(quote) if c == quote => {
                if chars.peek() == Some(&quote) {
                    chars.next();
                    out.push_str(if quote == '\'' || identifiers { "  " } else { "\"\"" });
                    continue;
                }
                open = None;
                out.push(c);
            }
            Some(quote) => {
                if quote == '\'' || identifiers {
                    out.extend(std::iter::repeat(' ').take(c.len_utf8()));
                } else {
                    out.push(c);
                }
            }
            None => {
                if c == '\'' || c == '"' {
                    open = Some(c);
                }
                out.push(c);
            }
        }
    }
    out
}

/// Check a generated statement before it is sent to the store.
pub fn check_statement(
    sql: &str,
    schema: &SchemaDescriptor,
    tenant: TenantId,
) -> Result<(), GuardViolation> {
    let sql = sql.trim();
    if sql.is_empty() {
        return Err(GuardViolation::Empty);
    }

    let Some(patterns) = Patterns::compile() else {
        return Err(GuardViolation::NotSelect);
    };

    // ASCII lowering keeps byte offsets aligned with `sql`.
    let lowered = sql.to_ascii_lowercase();
    let masked = mask_quoted(&lowered, true);

    // Masking only understands standard quoting.
    if patterns.special_literal.is_match(&masked) {
        return Err(GuardViolation::UnsupportedLiteral);
    }
    if masked.contains(';') {
        return Err(GuardViolation::MultipleStatements);
    }
    if masked.contains("--") || masked.contains("/*") {
        return Err(GuardViolation::Comment);
    }

    let words: Vec<&str> = patterns.word.find_iter(&masked).map(|m| m.as_str()).collect();

    match words.first() {
        Some(&"select") | Some(&"with") => {}
        _ => return Err(GuardViolation::NotSelect),
    }

    if let Some(keyword) = words
        .iter()
        .find(|w| FORBIDDEN_KEYWORDS.contains(*w) || FORBIDDEN_FUNCTIONS.contains(*w))
    {
        return Err(GuardViolation::ForbiddenKeyword(keyword.to_uppercase()));
    }

    // Literal contents blanked, identifier quotes dropped so `"processes"`
    // reads as `processes`.
    let unquoted = mask_quoted(&lowered, false).replace('"', " ");
    let tokens: Vec<&str> = patterns
        .token
        .find_iter(&unquoted)
        .map(|m| m.as_str())
        .collect();
    let references = scoped_references(&tokens, schema);

    if references.is_empty() {
        return Ok(());
    }

    if words.contains(&"or") {
        return Err(GuardViolation::Disjunction);
    }
    if patterns.other_user_id_comparison.is_match(&unquoted) {
        return Err(GuardViolation::ForeignTenant(
            "non-equality comparison on user_id".to_string(),
        ));
    }
    if patterns.negated_tenant_filter.is_match(&unquoted) {
        return Err(GuardViolation::NegatedTenantFilter);
    }

    let mut bindings = HashSet::new();
    for reference in &references {
        if !bindings.insert(reference.binding) {
            return Err(GuardViolation::AmbiguousReference(
                reference.binding.to_string(),
            ));
        }
    }

    // Predicates are found outside literals; the value is read back from the
    // original text at the same offsets.
    let expected = tenant.to_string();
    let mut filtered: HashSet<&str> = HashSet::new();
    let mut unqualified = 0usize;
    for caps in patterns.tenant_predicate.captures_iter(&unquoted) {
        let Some(literal) = caps.get(2) else {
            continue;
        };
        let value = sql.get(literal.range()).unwrap_or_default();
        if !value.eq_ignore_ascii_case(&expected) {
            return Err(GuardViolation::ForeignTenant(value.to_string()));
        }
        match caps.get(1) {
            Some(qualifier) => {
                filtered.insert(qualifier.as_str());
            }
            None => unqualified += 1,
        }
    }

    // A bare `user_id = ...` is only unambiguous with a single reference.
    let bare_covers = references.len() == 1 && unqualified > 0;
    if let Some(missing) = references
        .iter()
        .find(|r| !bare_covers && !filtered.contains(r.binding))
    {
        return Err(GuardViolation::MissingTenantFilter(missing.table.to_string()));
    }

    Ok(())
}
