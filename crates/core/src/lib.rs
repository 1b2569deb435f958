pub mod audit_trail;
pub mod change_tracker;
pub mod columns;
pub mod edit_session;
pub mod identity_resolver;
pub mod settings;
pub mod sql_render;
pub mod update_planner;
pub mod value;

pub use change_tracker::{CellChange, ChangeTracker, RecordOutcome};
pub use columns::{ColumnInfo, PseudoColumns};
pub use update_planner::{plan_updates, UpdatePlan, UpdateStatement};
pub use value::{RowSnapshot, Scalar};
