use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single cell value as delivered by a driver.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Binary(Vec<u8>),
}

impl Scalar {
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// String form used for loose equality between drivers that disagree on
    /// numeric vs textual representations. `None` for `Null`.
    #[must_use]
    pub fn coerced(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Bool(value) => Some(value.to_string()),
            Self::Integer(value) => Some(value.to_string()),
            Self::Float(value) => Some(coerce_float(*value)),
            Self::Text(value) => Some(value.clone()),
            Self::Binary(bytes) => Some(hex_encode(bytes)),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.coerced() {
            Some(rendered) => f.write_str(&rendered),
            None => f.write_str("NULL"),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Normalized equality. `None` stands for a value that was never present
/// (a column missing from the row) and only matches another `None`. `Null`
/// only matches `Null`, so neither is ever equal to an empty string.
#[must_use]
pub fn values_match(left: Option<&Scalar>, right: Option<&Scalar>) -> bool {
    match (left, right) {
        (None, None) => true,
        (None, Some(_)) | (Some(_), None) => false,
        (Some(left), Some(right)) => match (left.coerced(), right.coerced()) {
            (None, None) => true,
            (Some(left), Some(right)) => left == right,
            _ => false,
        },
    }
}

fn coerce_float(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value.is_sign_positive() {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        };
    }
    if value == 0.0 {
        return "0".to_string();
    }
    value.to_string()
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// The last-fetched contents of one grid row, keyed by column name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowSnapshot {
    values: BTreeMap<String, Scalar>,
}

impl RowSnapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Scalar> {
        self.values.get(column)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<Scalar>> FromIterator<(K, V)> for RowSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(column, value)| (column.into(), value.into()))
                .collect(),
        }
    }
}
