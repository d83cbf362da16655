use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{OpError, OpResult, OperationMonitor};

type Scopes = Arc<BTreeSet<Arc<str>>>;

#[derive(Debug)]
struct HeldRule {
	id: u64,
	scopes: Scopes,
}

/// Shared table of held scheduling rules.
///
/// Every build that may touch the same resources must draw its rules from the
/// same table; rules from different tables never conflict.
#[derive(Debug, Default)]
pub struct RuleTable {
	held: Mutex<Vec<HeldRule>>,
	released: Notify,
	next_id: AtomicU64,
}

impl RuleTable {
	pub fn new() -> Arc<Self> {
		Arc::default()
	}

	/// Creates a rule covering the given resource scopes.
	pub fn rule<I, S>(self: &Arc<Self>, scopes: I) -> SchedulingRule
	where
		I: IntoIterator<Item = S>,
		S: Into<Arc<str>>,
	{
		SchedulingRule {
			table: Arc::clone(self),
			scopes: Arc::new(scopes.into_iter().map(Into::into).collect()),
		}
	}

	/// Number of rules currently held.
	pub fn held_count(&self) -> usize {
		self.held.lock().len()
	}

	fn try_claim(&self, scopes: &Scopes) -> Option<u64> {
		let mut held = self.held.lock();
		if held.iter().any(|rule| !rule.scopes.is_disjoint(scopes)) {
			return None;
		}
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		held.push(HeldRule {
			id,
			scopes: Arc::clone(scopes),
		});
		Some(id)
	}

	fn release(&self, id: u64) {
		self.held.lock().retain(|rule| rule.id != id);
		self.released.notify_waiters();
	}
}

/// Mutual-exclusion token over a set of resource scopes.
///
/// Two rules conflict when they come from the same [`RuleTable`] and share at
/// least one scope. Rules are not reentrant: acquiring a rule that conflicts
/// with one already held by the caller waits forever (or until cancelled).
#[derive(Debug, Clone)]
pub struct SchedulingRule {
	table: Arc<RuleTable>,
	scopes: Scopes,
}

impl SchedulingRule {
	pub fn scopes(&self) -> impl Iterator<Item = &str> {
		self.scopes.iter().map(|scope| &**scope)
	}

	pub fn is_conflicting(&self, other: &SchedulingRule) -> bool {
		Arc::ptr_eq(&self.table, &other.table) && !self.scopes.is_disjoint(&other.scopes)
	}

	/// Waits until no conflicting rule is held, then holds this one until the
	/// returned guard is dropped.
	///
	/// # Errors
	///
	/// Returns [`OpError::Cancelled`] if the monitor is cancelled while waiting.
	pub async fn acquire(&self, monitor: &OperationMonitor) -> OpResult<RuleGuard> {
		loop {
			let released = self.table.released.notified();
			tokio::pin!(released);
			released.as_mut().enable();

			if let Some(id) = self.table.try_claim(&self.scopes) {
				return Ok(RuleGuard {
					table: Arc::clone(&self.table),
					id,
				});
			}

			tracing::trace!(scopes = ?self.scopes, "rule.acquire: waiting for conflicting rule");
			tokio::select! {
				biased;
				_ = monitor.cancelled() => return Err(OpError::Cancelled),
				_ = &mut released => {}
			}
		}
	}
}

/// Releases a held [`SchedulingRule`] on drop.
#[derive(Debug)]
pub struct RuleGuard {
	table: Arc<RuleTable>,
	id: u64,
}

impl Drop for RuleGuard {
	fn drop(&mut self) {
		self.table.release(self.id);
	}
}
