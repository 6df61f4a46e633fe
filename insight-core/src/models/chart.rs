use serde::{Deserialize, Serialize};

use super::row::ResultSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
    Table,
}

/// Visualization descriptor attached to a result set.
///
/// Wire shape: `{ type, data, xAxis?, yAxis?, title? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    #[serde(rename = "type")]
    pub kind: ChartKind,
    pub data: ResultSet,
    #[serde(rename = "xAxis", skip_serializing_if = "Option::is_none", default)]
    pub independent_axis: Option<String>,
    #[serde(rename = "yAxis", skip_serializing_if = "Option::is_none", default)]
    pub dependent_axis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub title: Option<String>,
}

impl ChartSpec {
    pub fn table(data: ResultSet, title: Option<String>) -> Self {
        Self {
            kind: ChartKind::Table,
            data,
            independent_axis: None,
            dependent_axis: None,
            title,
        }
    }
}
