use serde::Serialize;
use thiserror::Error;

use crate::change_tracker::CellChange;
use crate::columns::{primary_key_columns, ColumnInfo, PseudoColumns};
use crate::value::{values_match, RowSnapshot, Scalar};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum Condition {
    Equals(Scalar),
    IsNull,
}

impl Condition {
    fn for_value(value: &Scalar) -> Self {
        if value.is_null() {
            Self::IsNull
        } else {
            Self::Equals(value.clone())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WhereClause {
    pub column: String,
    pub condition: Condition,
}

impl WhereClause {
    #[must_use]
    pub fn new(column: impl Into<String>, value: &Scalar) -> Self {
        Self {
            column: column.into(),
            condition: Condition::for_value(value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStrategy {
    PrimaryKey,
    FullRow,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Predicate {
    pub strategy: IdentityStrategy,
    pub clauses: Vec<WhereClause>,
}

impl Predicate {
    /// Whether a row snapshot satisfies every clause.
    #[must_use]
    pub fn matches(&self, row: &RowSnapshot) -> bool {
        self.clauses.iter().all(|clause| {
            let current = row.get(&clause.column);
            match &clause.condition {
                Condition::IsNull => current.is_some_and(Scalar::is_null),
                Condition::Equals(expected) => values_match(current, Some(expected)),
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PredicateError {
    #[error("no safe predicate: every identifying value is NULL or missing")]
    NoSafePredicate,
    #[error("primary key column `{column}` has no value in the loaded row")]
    MissingKeyValue { column: String },
}

/// Builds the condition that pins an update to exactly one persisted row.
///
/// With a primary key, only key columns are used. An edited key column is
/// matched on its pre-edit value since that is what the database still holds.
/// Without a key, every column of the row is matched, changed columns on
/// their original values.
pub fn build_predicate(
    row: &RowSnapshot,
    columns: &[ColumnInfo],
    changes_for_row: &[&CellChange],
    pseudo_columns: &PseudoColumns,
) -> Result<Predicate, PredicateError> {
    let key_columns = primary_key_columns(columns)
        .into_iter()
        .filter(|column| !pseudo_columns.contains(&column.name))
        .collect::<Vec<_>>();

    let predicate = if key_columns.is_empty() {
        let mut clauses = Vec::with_capacity(columns.len());
        for column in columns {
            if pseudo_columns.contains(&column.name) {
                continue;
            }
            let value = original_value_of(changes_for_row, &column.name)
                .or_else(|| row.get(&column.name));
            if let Some(value) = value {
                clauses.push(WhereClause::new(column.name.clone(), value));
            }
        }
        for change in changes_for_row {
            let listed = columns.iter().any(|column| column.name == change.column);
            if !listed && !pseudo_columns.contains(&change.column) {
                clauses.push(WhereClause::new(change.column.clone(), &change.original_value));
            }
        }
        Predicate {
            strategy: IdentityStrategy::FullRow,
            clauses,
        }
    } else {
        let mut clauses = Vec::with_capacity(key_columns.len());
        for column in key_columns {
            let value = original_value_of(changes_for_row, &column.name)
                .or_else(|| row.get(&column.name))
                .ok_or_else(|| PredicateError::MissingKeyValue {
                    column: column.name.clone(),
                })?;
            clauses.push(WhereClause::new(column.name.clone(), value));
        }
        Predicate {
            strategy: IdentityStrategy::PrimaryKey,
            clauses,
        }
    };

    let has_equality = predicate
        .clauses
        .iter()
        .any(|clause| matches!(clause.condition, Condition::Equals(_)));
    if !has_equality {
        return Err(PredicateError::NoSafePredicate);
    }

    Ok(predicate)
}

fn original_value_of<'a>(changes: &[&'a CellChange], column: &str) -> Option<&'a Scalar> {
    changes
        .iter()
        .find(|change| change.column == column)
        .map(|change| &change.original_value)
}
