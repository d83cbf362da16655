use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use crate::{OpError, OpResult};

#[derive(Debug, Default)]
struct Progress {
	total: AtomicU64,
	worked: AtomicU64,
}

/// Progress and cancellation handle passed to every operation.
///
/// Clones share both the cancellation state and the progress counters.
/// [`Self::child`] creates a monitor that is cancelled together with its
/// parent but can also be cancelled on its own.
#[derive(Debug, Clone, Default)]
pub struct OperationMonitor {
	cancel: CancellationToken,
	progress: Arc<Progress>,
}

impl OperationMonitor {
	pub fn new() -> Self {
		Self::default()
	}

	/// Wraps an existing cancellation token.
	pub fn from_token(cancel: CancellationToken) -> Self {
		Self {
			cancel,
			progress: Arc::default(),
		}
	}

	/// Returns true when cancellation is requested.
	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	/// Requests cancellation.
	pub fn cancel(&self) {
		self.cancel.cancel();
	}

	/// Future resolving when cancellation is requested.
	pub async fn cancelled(&self) {
		self.cancel.cancelled().await;
	}

	/// Returns [`OpError::Cancelled`] once cancellation is requested.
	pub fn check_cancelled(&self) -> OpResult {
		if self.is_cancelled() { Err(OpError::Cancelled) } else { Ok(()) }
	}

	/// Creates a child monitor with its own progress counters.
	pub fn child(&self) -> Self {
		Self::from_token(self.cancel.child_token())
	}

	/// Starts a named task of `total` work units, resetting progress.
	pub fn begin_task(&self, name: impl Into<String>, total: u64) {
		let name: String = name.into();
		tracing::trace!(task = %name, total, "monitor.begin_task");
		self.progress.total.store(total, Ordering::Release);
		self.progress.worked.store(0, Ordering::Release);
	}

	/// Records completed work units.
	pub fn worked(&self, units: u64) {
		self.progress.worked.fetch_add(units, Ordering::AcqRel);
	}

	/// Returns `(worked, total)` for the current task.
	pub fn progress(&self) -> (u64, u64) {
		(self.progress.worked.load(Ordering::Acquire), self.progress.total.load(Ordering::Acquire))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn child_follows_parent() {
		let parent = OperationMonitor::new();
		let child = parent.child();
		assert!(!child.is_cancelled());
		parent.cancel();
		assert!(child.is_cancelled());
		assert!(child.check_cancelled().is_err_and(|e| e.is_cancelled()));
	}

	#[test]
	fn child_cancel_does_not_reach_parent() {
		let parent = OperationMonitor::new();
		let child = parent.child();
		child.cancel();
		assert!(child.is_cancelled());
		assert!(!parent.is_cancelled());
		assert!(parent.check_cancelled().is_ok());
	}

	#[test]
	fn progress_is_shared_between_clones() {
		let monitor = OperationMonitor::new();
		let clone = monitor.clone();
		monitor.begin_task("build core", 2);
		clone.worked(1);
		assert_eq!(clone.progress(), (1, 2));
		monitor.begin_task("build app", 1);
		assert_eq!(clone.progress(), (0, 1));
	}
}
