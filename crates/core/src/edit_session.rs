use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit_trail::{AuditOutcome, AuditRecord, FileAuditTrail};
use crate::change_tracker::{CellChange, ChangeTracker, IgnoreReason, RecordOutcome};
use crate::columns::{ColumnInfo, PseudoColumns};
use crate::settings::{EditorSettings, DEFAULT_PAGE_SIZE};
use crate::sql_render::{
    render_update, render_update_inline, RenderedStatement, SqlDialect, SqlRenderError,
    TableTarget,
};
use crate::update_planner::{SkippedRow, UpdatePlan, UpdatePlanner};
use crate::value::{RowSnapshot, Scalar};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    message: String,
}

impl BackendError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoadedPage {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<RowSnapshot>,
}

#[async_trait]
pub trait PageBackend {
    async fn fetch_page(
        &self,
        target: &TableTarget,
        limit: usize,
        offset: usize,
    ) -> Result<LoadedPage, BackendError>;
}

#[async_trait]
pub trait StatementBackend {
    /// Executes one rendered update and returns the number of affected rows.
    async fn execute(&self, statement: &RenderedStatement) -> Result<u64, BackendError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyPolicy {
    #[default]
    StopOnFirstFailure,
    ContinueOnFailure,
}

#[derive(Debug, Error)]
pub enum EditSessionError {
    #[error("profile is read-only; edits cannot be applied")]
    ReadOnly,
    #[error("failed to render update: {0}")]
    Render(#[from] SqlRenderError),
    #[error("page backend failed: {0}")]
    Backend(#[source] BackendError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedRow {
    pub row_index: usize,
    pub affected_rows: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedRow {
    pub row_index: usize,
    /// No row matched the predicate: it changed or vanished since the fetch.
    pub conflict: bool,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ApplyReport {
    pub applied: Vec<AppliedRow>,
    pub failed: Vec<FailedRow>,
    pub skipped: Vec<SkippedRow>,
    pub not_attempted: Vec<usize>,
}

impl ApplyReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty() && self.not_attempted.is_empty()
    }
}

/// Editing state of one open table tab: the loaded page and its pending edits.
#[derive(Debug, Clone)]
pub struct EditSession {
    target: TableTarget,
    dialect: SqlDialect,
    policy: ApplyPolicy,
    read_only: bool,
    page_size: usize,
    columns: Vec<ColumnInfo>,
    rows: Vec<RowSnapshot>,
    tracker: ChangeTracker,
    planner: UpdatePlanner,
}

impl EditSession {
    #[must_use]
    pub fn new(target: TableTarget, dialect: SqlDialect) -> Self {
        Self::with_pseudo_columns(target, dialect, PseudoColumns::default())
    }

    #[must_use]
    pub fn with_pseudo_columns(
        target: TableTarget,
        dialect: SqlDialect,
        pseudo_columns: PseudoColumns,
    ) -> Self {
        Self {
            target,
            dialect,
            policy: ApplyPolicy::default(),
            read_only: false,
            page_size: DEFAULT_PAGE_SIZE,
            columns: Vec::new(),
            rows: Vec::new(),
            tracker: ChangeTracker::with_pseudo_columns(pseudo_columns.clone()),
            planner: UpdatePlanner::with_pseudo_columns(pseudo_columns),
        }
    }

    #[must_use]
    pub fn from_settings(target: TableTarget, settings: &EditorSettings) -> Self {
        Self::with_pseudo_columns(target, settings.dialect, settings.pseudo_columns())
            .with_policy(settings.apply_policy)
            .with_page_size(settings.page_size)
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = if page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ApplyPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    #[must_use]
    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    #[must_use]
    pub fn target(&self) -> &TableTarget {
        &self.target
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    #[must_use]
    pub fn rows(&self) -> &[RowSnapshot] {
        &self.rows
    }

    /// Installs a new page. Pending edits refer to the old row indices and are dropped.
    pub fn load_page(&mut self, columns: Vec<ColumnInfo>, rows: Vec<RowSnapshot>) {
        if !self.tracker.is_empty() {
            tracing::info!(
                table = self.target.table(),
                discarded = self.tracker.len(),
                "page changed, discarding pending edits"
            );
        }
        self.tracker.load_page(rows.len());
        self.columns = columns;
        self.rows = rows;
    }

    pub async fn reload<B>(
        &mut self,
        backend: &B,
        limit: usize,
        offset: usize,
    ) -> Result<usize, EditSessionError>
    where
        B: PageBackend + Sync + ?Sized,
    {
        let page = backend
            .fetch_page(&self.target, limit, offset)
            .await
            .map_err(EditSessionError::Backend)?;
        let row_count = page.rows.len();
        self.load_page(page.columns, page.rows);
        Ok(row_count)
    }

    /// Loads the zero-based page `page` at the session's page size.
    pub async fn reload_page<B>(
        &mut self,
        backend: &B,
        page: usize,
    ) -> Result<usize, EditSessionError>
    where
        B: PageBackend + Sync + ?Sized,
    {
        let offset = page.saturating_mul(self.page_size);
        self.reload(backend, self.page_size, offset).await
    }

    /// Records a grid edit, taking the original value from the loaded row.
    pub fn record_edit(
        &mut self,
        row_index: usize,
        column: &str,
        new_value: Scalar,
    ) -> RecordOutcome {
        if self.tracker.pseudo_columns().contains(column) {
            return RecordOutcome::Ignored(IgnoreReason::PseudoColumn);
        }
        let Some(row) = self.rows.get(row_index) else {
            return RecordOutcome::Ignored(IgnoreReason::RowOutOfRange);
        };
        let known_column = self.columns.iter().any(|info| info.name == column);
        let Some(original_value) = row.get(column).filter(|_| known_column).cloned() else {
            tracing::debug!(row_index, column, "edit to unknown column ignored");
            return RecordOutcome::Ignored(IgnoreReason::UnknownColumn);
        };
        self.tracker
            .record_change(row_index, column, original_value, new_value)
    }

    pub fn record_change(
        &mut self,
        row_index: usize,
        column: &str,
        original_value: Scalar,
        new_value: Scalar,
    ) -> RecordOutcome {
        self.tracker
            .record_change(row_index, column, original_value, new_value)
    }

    #[must_use]
    pub fn pending_changes(&self) -> &[CellChange] {
        self.tracker.pending_changes()
    }

    pub fn cancel(&mut self) {
        self.tracker.clear();
    }

    #[must_use]
    pub fn plan(&self) -> UpdatePlan {
        self.planner.plan(
            self.tracker.pending_changes(),
            &self.rows,
            &self.columns,
            self.target.table(),
        )
    }

    /// Literal SQL for every planned statement, in execution order.
    pub fn preview(&self) -> Result<Vec<String>, SqlRenderError> {
        self.plan()
            .statements
            .iter()
            .map(|statement| render_update_inline(&self.target, statement, self.dialect))
            .collect()
    }

    /// Writes pending edits one statement at a time, in row order.
    ///
    /// Rows that were written are dropped from the pending set; failed,
    /// skipped and unattempted rows stay pending so they can be retried.
    pub async fn apply<B>(
        &mut self,
        backend: &B,
        audit: Option<&FileAuditTrail>,
    ) -> Result<ApplyReport, EditSessionError>
    where
        B: StatementBackend + Sync + ?Sized,
    {
        if self.read_only {
            return Err(EditSessionError::ReadOnly);
        }

        let plan = self.plan();
        let rendered = plan
            .statements
            .iter()
            .map(|statement| -> Result<_, SqlRenderError> {
                Ok((
                    render_update(&self.target, statement, self.dialect)?,
                    render_update_inline(&self.target, statement, self.dialect)?,
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let table = self.target.table().to_string();
        let mut report = ApplyReport {
            skipped: plan.skipped,
            ..ApplyReport::default()
        };
        if let Some(trail) = audit {
            for skipped in &report.skipped {
                let mut record =
                    AuditRecord::now(&table, skipped.row_index, AuditOutcome::Skipped);
                record.error = Some(skipped.reason.to_string());
                trail.append_or_warn(&record);
            }
        }

        let mut stopped = false;
        for (statement, preview) in rendered {
            let row_index = statement.row_index;
            if stopped {
                report.not_attempted.push(row_index);
                if let Some(trail) = audit {
                    let mut record =
                        AuditRecord::now(&table, row_index, AuditOutcome::NotAttempted);
                    record.sql = Some(preview);
                    trail.append_or_warn(&record);
                }
                continue;
            }

            let mut record = AuditRecord::now(&table, row_index, AuditOutcome::Applied);
            record.sql = Some(preview);
            match backend.execute(&statement).await {
                Ok(0) => {
                    tracing::warn!(row_index, table = %table, "update matched no row");
                    let error = "no row matched; it was changed or deleted since it was loaded";
                    report.failed.push(FailedRow {
                        row_index,
                        conflict: true,
                        error: error.to_string(),
                    });
                    record.outcome = AuditOutcome::Conflict;
                    record.affected_rows = Some(0);
                    record.error = Some(error.to_string());
                }
                Ok(affected_rows) => {
                    tracing::debug!(row_index, affected_rows, "row update applied");
                    self.tracker.discard_row(row_index);
                    report.applied.push(AppliedRow {
                        row_index,
                        affected_rows,
                    });
                    record.affected_rows = Some(affected_rows);
                }
                Err(error) => {
                    tracing::warn!(row_index, table = %table, %error, "row update failed");
                    report.failed.push(FailedRow {
                        row_index,
                        conflict: false,
                        error: error.to_string(),
                    });
                    record.outcome = AuditOutcome::Failed;
                    record.error = Some(error.to_string());
                }
            }
            if let Some(trail) = audit {
                trail.append_or_warn(&record);
            }

            let failed = record.outcome != AuditOutcome::Applied;
            if failed && self.policy == ApplyPolicy::StopOnFirstFailure {
                stopped = true;
            }
        }

        tracing::info!(
            table = %table,
            applied = report.applied.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            not_attempted = report.not_attempted.len(),
            "apply finished"
        );
        Ok(report)
    }
}
