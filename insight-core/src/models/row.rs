use chrono::{DateTime, FixedOffset, NaiveDate};
use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A single cell of a result row.
///
/// Serialized untagged so rows render as plain JSON objects. On the way in,
/// strict `YYYY-MM-DD` text becomes `Date` and strict RFC 3339 text becomes
/// `DateTime`; both keep the text they arrived as and serialize it back
/// unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Date(NaiveDate, String),
    DateTime(DateTime<FixedOffset>, String),
    Text(String),
}

/// `dddd-dd-dd` with nothing around it.
fn has_date_shape(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}

/// A strict date followed by `T`, a time and an offset.
fn has_timestamp_shape(text: &str) -> bool {
    text.len() > 19
        && text.get(..10).is_some_and(has_date_shape)
        && text.as_bytes()[10] == b'T'
        && text.as_bytes()[13] == b':'
        && text.as_bytes()[16] == b':'
}

impl Scalar {
    /// Classify a text cell, keeping the original text for temporal values.
    pub fn from_text(text: String) -> Self {
        if has_date_shape(&text) {
            if let Ok(date) = NaiveDate::parse_from_str(&text, "%Y-%m-%d") {
                return Scalar::Date(date, text);
            }
        } else if has_timestamp_shape(&text) {
            if let Ok(stamp) = DateTime::parse_from_rfc3339(&text) {
                return Scalar::DateTime(stamp, text);
            }
        }
        Scalar::Text(text)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Scalar::Number(_))
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, Scalar::Text(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    /// Build a number from a float; NaN and infinities become `Null`.
    pub fn from_f64(value: f64) -> Self {
        serde_json::Number::from_f64(value)
            .map(Scalar::Number)
            .unwrap_or(Scalar::Null)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Number(value.into())
    }
}

impl From<NaiveDate> for Scalar {
    fn from(value: NaiveDate) -> Self {
        Scalar::Date(value, value.format("%Y-%m-%d").to_string())
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scalar::Null => serializer.serialize_unit(),
            Scalar::Bool(b) => serializer.serialize_bool(*b),
            Scalar::Number(n) => n.serialize(serializer),
            Scalar::Date(_, text) | Scalar::DateTime(_, text) | Scalar::Text(text) => {
                serializer.serialize_str(text)
            }
        }
    }
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::Null => Ok(Scalar::Null),
            serde_json::Value::Bool(b) => Ok(Scalar::Bool(b)),
            serde_json::Value::Number(n) => Ok(Scalar::Number(n)),
            serde_json::Value::String(text) => Ok(Scalar::from_text(text)),
            other => Err(D::Error::custom(format!(
                "unsupported cell value: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Null => Ok(()),
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Number(n) => write!(f, "{}", n),
            Scalar::Date(_, s) | Scalar::DateTime(_, s) | Scalar::Text(s) => f.write_str(s),
        }
    }
}

/// One result row: column name to value, in query column order.
pub type Row = IndexMap<String, Scalar>;

/// Rows of a completed query, in the order the query or aggregation produced.
pub type ResultSet = Vec<Row>;

/// Parse one `row_to_json` document into a row.
pub fn row_from_json(text: &str) -> Result<Row, serde_json::Error> {
    serde_json::from_str(text)
}
