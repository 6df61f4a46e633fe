//! Chart inference from the shape of a result set.
//!
//! Only the first row's value tags are inspected. Dates and timestamps count
//! as neither numeric nor textual.

use insight_core::models::{ChartKind, ChartSpec, ResultSet};

pub const RESULTS_TITLE: &str = "Query Results";

pub fn infer_chart(rows: &ResultSet, max_rows: usize) -> ChartSpec {
    let Some(first) = rows.first() else {
        return ChartSpec::table(Vec::new(), None);
    };

    let numeric = first
        .iter()
        .find(|(_, value)| value.is_numeric())
        .map(|(name, _)| name);
    let textual = first
        .iter()
        .find(|(_, value)| value.is_textual())
        .map(|(name, _)| name);

    match (numeric, textual) {
        (Some(y), Some(x)) if rows.len() <= max_rows => ChartSpec {
            kind: ChartKind::Bar,
            data: rows.clone(),
            independent_axis: Some(x.clone()),
            dependent_axis: Some(y.clone()),
            title: Some(format!("{} by {}", y, x)),
        },
        _ => ChartSpec::table(rows.clone(), Some(RESULTS_TITLE.to_string())),
    }
}
