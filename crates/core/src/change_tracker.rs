use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::columns::PseudoColumns;
use crate::value::{values_match, Scalar};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellChange {
    pub row_index: usize,
    pub column: String,
    pub original_value: Scalar,
    pub new_value: Scalar,
}

impl CellChange {
    #[must_use]
    pub fn new(
        row_index: usize,
        column: impl Into<String>,
        original_value: impl Into<Scalar>,
        new_value: impl Into<Scalar>,
    ) -> Self {
        Self {
            row_index,
            column: column.into(),
            original_value: original_value.into(),
            new_value: new_value.into(),
        }
    }

    fn is_key(&self, row_index: usize, column: &str) -> bool {
        self.row_index == row_index && self.column == column
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    PseudoColumn,
    RowOutOfRange,
    /// The loaded page has no such column.
    UnknownColumn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First edit of this cell.
    Recorded,
    /// A pending edit of this cell got a new value; its original is kept.
    Updated,
    /// The cell is back to its original value and is no longer pending.
    Reverted,
    Ignored(IgnoreReason),
}

/// Pending cell edits for one loaded page of one table.
///
/// Entries are kept in first-touch order and there is at most one entry per
/// `(row_index, column)`.
#[derive(Debug, Clone, Default)]
pub struct ChangeTracker {
    pseudo_columns: PseudoColumns,
    row_count: Option<usize>,
    changes: Vec<CellChange>,
}

impl ChangeTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_pseudo_columns(pseudo_columns: PseudoColumns) -> Self {
        Self {
            pseudo_columns,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn pseudo_columns(&self) -> &PseudoColumns {
        &self.pseudo_columns
    }

    #[must_use]
    pub fn row_count(&self) -> Option<usize> {
        self.row_count
    }

    /// Starts tracking a freshly loaded page. Row indices of the previous
    /// page mean nothing any more, so pending edits are dropped.
    pub fn load_page(&mut self, row_count: usize) {
        self.changes.clear();
        self.row_count = Some(row_count);
    }

    pub fn record_change(
        &mut self,
        row_index: usize,
        column: &str,
        original_value: Scalar,
        new_value: Scalar,
    ) -> RecordOutcome {
        if self.pseudo_columns.contains(column) {
            tracing::debug!(row_index, column, "ignoring edit of pseudo column");
            return RecordOutcome::Ignored(IgnoreReason::PseudoColumn);
        }
        if self.row_count.is_some_and(|count| row_index >= count) {
            tracing::debug!(row_index, column, "ignoring edit outside loaded page");
            return RecordOutcome::Ignored(IgnoreReason::RowOutOfRange);
        }

        if let Some(position) = self
            .changes
            .iter()
            .position(|change| change.is_key(row_index, column))
        {
            if values_match(
                Some(&self.changes[position].original_value),
                Some(&new_value),
            ) {
                self.changes.remove(position);
                tracing::debug!(row_index, column, "edit reverted to original value");
                return RecordOutcome::Reverted;
            }
            self.changes[position].new_value = new_value;
            return RecordOutcome::Updated;
        }

        if values_match(Some(&original_value), Some(&new_value)) {
            return RecordOutcome::Reverted;
        }

        self.changes.push(CellChange {
            row_index,
            column: column.to_string(),
            original_value,
            new_value,
        });
        RecordOutcome::Recorded
    }

    #[must_use]
    pub fn pending_changes(&self) -> &[CellChange] {
        &self.changes
    }

    #[must_use]
    pub fn pending_change(&self, row_index: usize, column: &str) -> Option<&CellChange> {
        self.changes
            .iter()
            .find(|change| change.is_key(row_index, column))
    }

    #[must_use]
    pub fn changes_for_row(&self, row_index: usize) -> Vec<&CellChange> {
        self.changes
            .iter()
            .filter(|change| change.row_index == row_index)
            .collect()
    }

    #[must_use]
    pub fn touched_rows(&self) -> BTreeSet<usize> {
        self.changes.iter().map(|change| change.row_index).collect()
    }

    /// Drops every pending edit of one row, e.g. after it was written.
    pub fn discard_row(&mut self, row_index: usize) -> usize {
        let before = self.changes.len();
        self.changes.retain(|change| change.row_index != row_index);
        before - self.changes.len()
    }

    pub fn clear(&mut self) {
        self.changes.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
