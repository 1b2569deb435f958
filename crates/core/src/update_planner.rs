use std::collections::BTreeMap;

use serde::Serialize;

use crate::change_tracker::CellChange;
use crate::columns::{ColumnInfo, PseudoColumns};
use crate::identity_resolver::{
    build_predicate, IdentityStrategy, Predicate, PredicateError, WhereClause,
};
use crate::value::{values_match, RowSnapshot, Scalar};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetClause {
    pub column: String,
    pub value: Scalar,
}

/// One row's worth of column assignments plus the predicate locating it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateStatement {
    pub row_index: usize,
    pub table: String,
    pub identity: IdentityStrategy,
    pub set_clauses: Vec<SetClause>,
    pub where_clauses: Vec<WhereClause>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    RowNotLoaded,
    NoSafePredicate,
    MissingKeyValue { column: String },
    AmbiguousRow { matching_rows: usize },
    MatchesOtherRow { other_row: usize },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RowNotLoaded => f.write_str("row is not part of the loaded page"),
            Self::NoSafePredicate => f.write_str("no safe predicate"),
            Self::MissingKeyValue { column } => {
                write!(f, "primary key column `{column}` has no value")
            }
            Self::AmbiguousRow { matching_rows } => {
                write!(f, "predicate matches {matching_rows} loaded rows")
            }
            Self::MatchesOtherRow { other_row } => {
                write!(f, "predicate identifies loaded row {other_row} instead")
            }
        }
    }
}

impl From<PredicateError> for SkipReason {
    fn from(error: PredicateError) -> Self {
        match error {
            PredicateError::NoSafePredicate => Self::NoSafePredicate,
            PredicateError::MissingKeyValue { column } => Self::MissingKeyValue { column },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRow {
    pub row_index: usize,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct UpdatePlan {
    pub statements: Vec<UpdateStatement>,
    pub skipped: Vec<SkippedRow>,
}

impl UpdatePlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty() && self.skipped.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpdatePlanner {
    pseudo_columns: PseudoColumns,
}

impl UpdatePlanner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_pseudo_columns(pseudo_columns: PseudoColumns) -> Self {
        Self { pseudo_columns }
    }

    /// Turns pending cell edits into per-row updates ordered by row index.
    ///
    /// Rows that cannot be identified safely end up in `skipped` and do not
    /// prevent statements for the other rows.
    #[must_use]
    pub fn plan(
        &self,
        changes: &[CellChange],
        rows: &[RowSnapshot],
        columns: &[ColumnInfo],
        table: &str,
    ) -> UpdatePlan {
        let by_row = self.net_changes_by_row(changes);

        let mut plan = UpdatePlan::default();
        for (row_index, row_changes) in by_row {
            let Some(row) = rows.get(row_index) else {
                skip(&mut plan, row_index, SkipReason::RowNotLoaded);
                continue;
            };

            let row_changes = row_changes.iter().collect::<Vec<_>>();
            let predicate =
                match build_predicate(row, columns, &row_changes, &self.pseudo_columns) {
                    Ok(predicate) => predicate,
                    Err(error) => {
                        skip(&mut plan, row_index, error.into());
                        continue;
                    }
                };

            let matching = matching_rows(&predicate, rows);
            if matching.len() > 1 {
                skip(
                    &mut plan,
                    row_index,
                    SkipReason::AmbiguousRow {
                        matching_rows: matching.len(),
                    },
                );
                continue;
            }
            if let Some(&other_row) = matching.iter().find(|&&index| index != row_index) {
                skip(&mut plan, row_index, SkipReason::MatchesOtherRow { other_row });
                continue;
            }

            let set_clauses = row_changes
                .iter()
                .map(|change| SetClause {
                    column: change.column.clone(),
                    value: change.new_value.clone(),
                })
                .collect::<Vec<_>>();

            tracing::debug!(
                row_index,
                table,
                strategy = ?predicate.strategy,
                assignments = set_clauses.len(),
                "planned row update"
            );
            plan.statements.push(UpdateStatement {
                row_index,
                table: table.to_string(),
                identity: predicate.strategy,
                set_clauses,
                where_clauses: predicate.clauses,
            });
        }

        plan
    }

    /// One entry per cell: the first original and the last new value, with
    /// pseudo-columns and net no-op edits dropped.
    fn net_changes_by_row(&self, changes: &[CellChange]) -> BTreeMap<usize, Vec<CellChange>> {
        let mut by_row: BTreeMap<usize, Vec<CellChange>> = BTreeMap::new();
        for change in changes {
            if self.pseudo_columns.contains(&change.column) {
                continue;
            }
            let row_changes = by_row.entry(change.row_index).or_default();
            match row_changes
                .iter_mut()
                .find(|pending| pending.column == change.column)
            {
                Some(pending) => pending.new_value = change.new_value.clone(),
                None => row_changes.push(change.clone()),
            }
        }

        for row_changes in by_row.values_mut() {
            row_changes.retain(|change| {
                !values_match(Some(&change.original_value), Some(&change.new_value))
            });
        }
        by_row.retain(|_, row_changes| !row_changes.is_empty());
        by_row
    }
}

/// Plans with the default pseudo-column set.
#[must_use]
pub fn plan_updates(
    changes: &[CellChange],
    rows: &[RowSnapshot],
    columns: &[ColumnInfo],
    table: &str,
) -> UpdatePlan {
    UpdatePlanner::new().plan(changes, rows, columns, table)
}

fn skip(plan: &mut UpdatePlan, row_index: usize, reason: SkipReason) {
    tracing::warn!(row_index, %reason, "row skipped");
    plan.skipped.push(SkippedRow { row_index, reason });
}

fn matching_rows(predicate: &Predicate, rows: &[RowSnapshot]) -> Vec<usize> {
    rows.iter()
        .enumerate()
        .filter(|(_, row)| predicate.matches(row))
        .map(|(index, _)| index)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{plan_updates, SetClause, SkipReason, SkippedRow, UpdatePlanner};
    use crate::change_tracker::{CellChange, ChangeTracker};
    use crate::columns::{ColumnInfo, PseudoColumns, ROW_NUMBER_COLUMN};
    use crate::identity_resolver::{IdentityStrategy, WhereClause};
    use crate::value::{RowSnapshot, Scalar};

    fn keyed_columns() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::new("id", "int").primary_key(),
            ColumnInfo::new("name", "text"),
        ]
    }

    #[test]
    fn keyed_table_updates_by_primary_key() {
        let rows = vec![RowSnapshot::new().with("id", 5).with("name", "a")];
        let changes = vec![CellChange::new(0, "name", "a", "b")];

        let plan = plan_updates(&changes, &rows, &keyed_columns(), "users");

        assert!(plan.skipped.is_empty());
        assert_eq!(plan.statements.len(), 1);
        let statement = &plan.statements[0];
        assert_eq!(statement.table, "users");
        assert_eq!(statement.identity, IdentityStrategy::PrimaryKey);
        assert_eq!(
            statement.set_clauses,
            vec![SetClause {
                column: "name".to_string(),
                value: Scalar::text("b"),
            }]
        );
        assert_eq!(
            statement.where_clauses,
            vec![WhereClause::new("id", &Scalar::Integer(5))]
        );
    }

    #[test]
    fn keyless_table_updates_by_full_row() {
        let columns = vec![ColumnInfo::new("name", "text"), ColumnInfo::new("age", "int")];
        let rows = vec![RowSnapshot::new().with("name", "a").with("age", 30)];
        let changes = vec![CellChange::new(0, "name", "a", "b")];

        let plan = plan_updates(&changes, &rows, &columns, "people");

        assert_eq!(plan.statements.len(), 1);
        let statement = &plan.statements[0];
        assert_eq!(statement.identity, IdentityStrategy::FullRow);
        assert_eq!(
            statement.set_clauses,
            vec![SetClause {
                column: "name".to_string(),
                value: Scalar::text("b"),
            }]
        );
        assert_eq!(
            statement.where_clauses,
            vec![
                WhereClause::new("name", &Scalar::text("a")),
                WhereClause::new("age", &Scalar::Integer(30)),
            ]
        );
    }

    #[test]
    fn statements_are_ordered_by_row_index_with_grouped_assignments() {
        let rows = (0..4)
            .map(|id| RowSnapshot::new().with("id", id).with("name", "x"))
            .collect::<Vec<_>>();
        let changes = vec![
            CellChange::new(3, "name", "x", "d"),
            CellChange::new(1, "name", "x", "b"),
            CellChange::new(3, "id", 3, 30),
        ];

        let plan = plan_updates(&changes, &rows, &keyed_columns(), "users");

        let order = plan
            .statements
            .iter()
            .map(|statement| statement.row_index)
            .collect::<Vec<_>>();
        assert_eq!(order, vec![1, 3]);
        let last = &plan.statements[1];
        assert_eq!(last.set_clauses.len(), 2);
        assert_eq!(last.set_clauses[0].column, "name");
        assert_eq!(last.set_clauses[1].column, "id");
        assert_eq!(
            last.where_clauses,
            vec![WhereClause::new("id", &Scalar::Integer(3))]
        );
    }

    #[test]
    fn edit_then_revert_produces_no_statement() {
        let rows = vec![RowSnapshot::new().with("id", 1).with("name", "a")];
        let mut tracker = ChangeTracker::new();
        tracker.record_change(0, "name", Scalar::text("a"), Scalar::text("b"));
        tracker.record_change(0, "name", Scalar::text("b"), Scalar::text("a"));

        let plan = plan_updates(
            tracker.pending_changes(),
            &rows,
            &keyed_columns(),
            "users",
        );
        assert!(tracker.is_empty());
        assert!(plan.is_empty());
    }

    #[test]
    fn all_null_keyless_row_is_skipped_not_updated_unconditionally() {
        let columns = vec![ColumnInfo::new("a", "text"), ColumnInfo::new("b", "text")];
        let rows = vec![
            RowSnapshot::new()
                .with("a", Scalar::Null)
                .with("b", Scalar::Null),
            RowSnapshot::new().with("a", "x").with("b", "y"),
        ];
        let changes = vec![
            CellChange::new(0, "a", Scalar::Null, "z"),
            CellChange::new(1, "b", "y", "w"),
        ];

        let plan = plan_updates(&changes, &rows, &columns, "loose");

        assert_eq!(
            plan.skipped,
            vec![SkippedRow {
                row_index: 0,
                reason: SkipReason::NoSafePredicate,
            }]
        );
        assert_eq!(plan.statements.len(), 1);
        assert_eq!(plan.statements[0].row_index, 1);
    }

    #[test]
    fn duplicate_keyless_rows_are_skipped_as_ambiguous() {
        let columns = vec![ColumnInfo::new("name", "text")];
        let rows = vec![
            RowSnapshot::new().with("name", "twin"),
            RowSnapshot::new().with("name", "twin"),
        ];
        let changes = vec![CellChange::new(1, "name", "twin", "solo")];

        let plan = plan_updates(&changes, &rows, &columns, "twins");

        assert!(plan.statements.is_empty());
        assert_eq!(
            plan.skipped,
            vec![SkippedRow {
                row_index: 1,
                reason: SkipReason::AmbiguousRow { matching_rows: 2 },
            }]
        );
    }

    #[test]
    fn changes_for_unloaded_rows_or_pseudo_columns_never_become_statements() {
        let rows = vec![RowSnapshot::new().with("id", 1).with("name", "a")];
        let changes = vec![
            CellChange::new(0, ROW_NUMBER_COLUMN, 1, 2),
            CellChange::new(4, "name", "a", "b"),
        ];

        let plan = plan_updates(&changes, &rows, &keyed_columns(), "users");

        assert!(plan.statements.is_empty());
        assert_eq!(
            plan.skipped,
            vec![SkippedRow {
                row_index: 4,
                reason: SkipReason::RowNotLoaded,
            }]
        );
    }

    #[test]
    fn custom_pseudo_columns_are_respected() {
        let planner = UpdatePlanner::with_pseudo_columns(PseudoColumns::from_names(["_rowid"]));
        let rows = vec![RowSnapshot::new().with("id", 1).with("_rowid", 9)];
        let changes = vec![CellChange::new(0, "_rowid", 9, 10)];

        let plan = planner.plan(&changes, &rows, &keyed_columns(), "users");
        assert!(plan.is_empty());
    }

    #[test]
    fn net_no_op_changes_are_dropped() {
        let rows = vec![RowSnapshot::new().with("id", 5).with("name", "a")];
        let changes = vec![
            CellChange::new(0, "name", "a", "a"),
            CellChange::new(0, "id", 5, "5"),
        ];

        let plan = plan_updates(&changes, &rows, &keyed_columns(), "users");

        assert!(plan.is_empty());
    }

    #[test]
    fn repeated_changes_to_one_cell_coalesce_into_one_assignment() {
        let rows = vec![RowSnapshot::new().with("id", 5).with("name", "a")];
        let changes = vec![
            CellChange::new(0, "name", "a", "b"),
            CellChange::new(0, "name", "b", "c"),
        ];

        let plan = plan_updates(&changes, &rows, &keyed_columns(), "users");

        assert_eq!(plan.statements.len(), 1);
        assert_eq!(
            plan.statements[0].set_clauses,
            vec![SetClause {
                column: "name".to_string(),
                value: Scalar::text("c"),
            }]
        );

        let reverted = vec![
            CellChange::new(0, "name", "a", "b"),
            CellChange::new(0, "name", "b", "a"),
        ];
        assert!(plan_updates(&reverted, &rows, &keyed_columns(), "users").is_empty());
    }

    #[test]
    fn stale_original_that_identifies_another_loaded_row_is_skipped() {
        let columns = vec![ColumnInfo::new("name", "text")];
        let rows = vec![
            RowSnapshot::new().with("name", "a"),
            RowSnapshot::new().with("name", "b"),
        ];
        let changes = vec![CellChange::new(0, "name", "b", "c")];

        let plan = plan_updates(&changes, &rows, &columns, "tags");

        assert!(plan.statements.is_empty());
        assert_eq!(
            plan.skipped,
            vec![SkippedRow {
                row_index: 0,
                reason: SkipReason::MatchesOtherRow { other_row: 1 },
            }]
        );
    }
}
