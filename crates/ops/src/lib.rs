//! Build operation primitives.
//!
//! A build is assembled from [`CommonOperation`]s: small async units of work
//! that either succeed, fail with a structured [`CommonError`], or stop early
//! because their [`OperationMonitor`] was cancelled. Operations are grouped
//! with [`CompositeBuildOperation`], which runs them in order and can hold a
//! [`SchedulingRule`] for the duration of the whole sequence so overlapping
//! builds never interleave on the same resources.
//!
//! User-facing console output goes through [`ToolOperationMonitor`], kept
//! separate from the cancellation/progress handle so one console can be
//! shared by every project built in a workspace pass.

mod composite;
mod console;
mod error;
mod monitor;
mod operation;
mod rule;
pub mod text;

pub use composite::CompositeBuildOperation;
pub use console::{ConsoleMonitor, OutputStream, ToolOperationMonitor};
pub use error::{BoxError, CommonError, OpError, OpResult};
pub use monitor::OperationMonitor;
pub use operation::CommonOperation;
pub use rule::{RuleGuard, RuleTable, SchedulingRule};
