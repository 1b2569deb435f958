use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Synthetic row-number column rendered by the grid; never a real table column.
pub const ROW_NUMBER_COLUMN: &str = "__row_number";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type", alias = "data_type", default)]
    pub data_type: String,
    #[serde(alias = "primaryKey", default)]
    pub primary_key: bool,
}

impl ColumnInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            primary_key: false,
        }
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }
}

#[must_use]
pub fn primary_key_columns(columns: &[ColumnInfo]) -> Vec<&ColumnInfo> {
    columns.iter().filter(|column| column.primary_key).collect()
}

/// Display-only column names that edits and predicates must skip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PseudoColumns {
    names: BTreeSet<String>,
}

impl PseudoColumns {
    #[must_use]
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn contains(&self, column: &str) -> bool {
        self.names.contains(column)
    }
}

impl Default for PseudoColumns {
    fn default() -> Self {
        Self::from_names([ROW_NUMBER_COLUMN])
    }
}
