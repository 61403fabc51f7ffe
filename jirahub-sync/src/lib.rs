//! # jirahub-sync
//!
//! The reconciliation engine: decides, for every candidate issue, which
//! writes bring it and its counterpart on the other service into agreement,
//! then performs them with retry and throttling.
//!
//! Call [`pipeline::run`] for one full run against a state file, or
//! [`SyncEngine::run`] to manage [`SyncState`] yourself.
//! [`check_permissions`] reports missing tracker permissions up front.

pub mod error;
pub mod executor;
pub mod filter;
pub mod formatter;
pub mod linker;
pub mod memory;
pub mod permissions;
pub mod pipeline;
pub mod reconcile;
pub mod report;
pub mod side;
pub mod state_store;

pub use error::SyncError;
pub use executor::{RetryPolicy, Sleeper, ThreadSleeper};
pub use filter::{IssueFilter, IssuePredicate};
pub use formatter::{FormatInput, FormatOverride, TextField};
pub use linker::FieldsHook;
pub use permissions::{check_permissions, PermissionProblem};
pub use pipeline::{RunOptions, SyncEngine};
pub use reconcile::WriteIntent;
pub use report::{IssueOutcome, IssueReport, ReportCounts, SyncReport};
pub use state_store::SyncState;
