use regex::Regex;
use serde::{Deserialize, Serialize};

/// Section labels the insight prompt asks for, in order.
pub const SECTION_LABELS: [&str; 4] = [
    "Executive Summary",
    "Key Insights",
    "Patterns",
    "Recommendations",
];

/// Heading used when the text does not follow the numbered convention.
pub const UNSTRUCTURED_HEADING: &str = "Analysis";

/// Insight text as returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InsightNarrative(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrativeSection {
    pub title: String,
    pub content: String,
}

impl InsightNarrative {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split on numbered items (`1. Title: body`). Falls back to one section
    /// holding the whole text when fewer than two items are found.
    pub fn sections(&self) -> Vec<NarrativeSection> {
        let text = self.0.trim();
        let unstructured = || {
            vec![NarrativeSection {
                title: UNSTRUCTURED_HEADING.to_string(),
                content: text.to_string(),
            }]
        };
        let Ok(re) = Regex::new(r"(?m)^\s*(?:#+\s*)?\*{0,2}\d+\.\s+") else {
            return unstructured();
        };

        let parts: Vec<&str> = re
            .split(text)
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();

        let starts_numbered = re.find(text).is_some_and(|m| m.start() == 0);
        let items: Vec<&str> = if starts_numbered {
            parts
        } else {
            parts.into_iter().skip(1).collect()
        };

        if items.len() < 2 {
            return unstructured();
        }

        items
            .into_iter()
            .map(|item| {
                // The title lives on the first line; a colon there starts the body.
                let (first_line, rest) = item.split_once('\n').unwrap_or((item, ""));
                let (title, content) = match first_line.split_once(':') {
                    Some((title, inline)) if rest.is_empty() => (title, inline.to_string()),
                    Some((title, inline)) => (title, format!("{}\n{}", inline.trim(), rest)),
                    None => (first_line, rest.to_string()),
                };
                NarrativeSection {
                    title: title.trim().trim_matches('*').trim().to_string(),
                    content: content.trim().trim_start_matches("**").trim().to_string(),
                }
            })
            .collect()
    }

    /// True when every expected section label appears in the text.
    pub fn has_all_sections(&self) -> bool {
        let lower = self.0.to_lowercase();
        SECTION_LABELS
            .iter()
            .all(|label| lower.contains(&label.to_lowercase()))
    }
}
