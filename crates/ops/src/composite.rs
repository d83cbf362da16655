use std::sync::Arc;

use async_trait::async_trait;

use crate::{CommonOperation, OpError, OpResult, OperationMonitor, SchedulingRule, ToolOperationMonitor};

/// An ordered sequence of operations executed as one unit.
///
/// When a [`SchedulingRule`] is supplied, it is held around the whole
/// sequence rather than per step, so no conflicting build can run between
/// two of its steps.
pub struct CompositeBuildOperation {
	console: Arc<dyn ToolOperationMonitor>,
	operations: Vec<Box<dyn CommonOperation>>,
	rule: Option<SchedulingRule>,
}

impl CompositeBuildOperation {
	pub fn new(console: Arc<dyn ToolOperationMonitor>, operations: Vec<Box<dyn CommonOperation>>, rule: Option<SchedulingRule>) -> Self {
		Self { console, operations, rule }
	}

	/// Returns the console the sub-operations report to.
	pub fn console(&self) -> &Arc<dyn ToolOperationMonitor> {
		&self.console
	}

	pub fn rule(&self) -> Option<&SchedulingRule> {
		self.rule.as_ref()
	}

	pub fn len(&self) -> usize {
		self.operations.len()
	}

	pub fn is_empty(&self) -> bool {
		self.operations.is_empty()
	}

	async fn execute_operations(&self, monitor: &OperationMonitor) -> OpResult {
		for operation in &self.operations {
			operation.execute(monitor).await?;
		}
		Ok(())
	}
}

#[async_trait]
impl CommonOperation for CompositeBuildOperation {
	/// Runs every sub-operation in order with the same monitor.
	///
	/// Returns [`OpError::Cancelled`] without running anything if the monitor
	/// is already cancelled. The first cancellation or failure stops the
	/// sequence and is returned unchanged.
	async fn execute(&self, monitor: &OperationMonitor) -> OpResult {
		if monitor.is_cancelled() {
			return Err(OpError::Cancelled);
		}

		match &self.rule {
			Some(rule) => {
				let _held = rule.acquire(monitor).await?;
				monitor.check_cancelled()?;
				self.execute_operations(monitor).await
			}
			None => self.execute_operations(monitor).await,
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	use super::*;
	use crate::{CommonError, ConsoleMonitor, RuleTable};

	#[derive(Clone, Copy)]
	enum Step {
		Succeed,
		Fail,
		Cancel,
	}

	struct Recording {
		name: &'static str,
		step: Step,
		log: Arc<parking_lot::Mutex<Vec<&'static str>>>,
	}

	#[async_trait]
	impl CommonOperation for Recording {
		async fn execute(&self, _monitor: &OperationMonitor) -> OpResult {
			self.log.lock().push(self.name);
			match self.step {
				Step::Succeed => Ok(()),
				Step::Fail => Err(CommonError::new(format!("{} failed", self.name)).into()),
				Step::Cancel => Err(OpError::Cancelled),
			}
		}
	}

	fn composite(steps: &[(&'static str, Step)], rule: Option<SchedulingRule>) -> (CompositeBuildOperation, Arc<parking_lot::Mutex<Vec<&'static str>>>) {
		let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
		let operations = steps
			.iter()
			.map(|&(name, step)| {
				Box::new(Recording {
					name,
					step,
					log: Arc::clone(&log),
				}) as Box<dyn CommonOperation>
			})
			.collect();
		(CompositeBuildOperation::new(Arc::new(ConsoleMonitor::new("test")), operations, rule), log)
	}

	#[tokio::test]
	async fn runs_in_order() {
		let (op, log) = composite(&[("clear", Step::Succeed), ("build", Step::Succeed)], None);
		op.execute(&OperationMonitor::new()).await.unwrap();
		assert_eq!(*log.lock(), vec!["clear", "build"]);
	}

	#[tokio::test]
	async fn cancelled_monitor_runs_nothing() {
		let (op, log) = composite(&[("clear", Step::Succeed), ("build", Step::Succeed)], None);
		let monitor = OperationMonitor::new();
		monitor.cancel();
		let result = op.execute(&monitor).await;
		assert!(result.is_err_and(|e| e.is_cancelled()));
		assert!(log.lock().is_empty());
	}

	#[tokio::test]
	async fn failure_stops_sequence() {
		let (op, log) = composite(&[("a", Step::Succeed), ("b", Step::Fail), ("c", Step::Succeed)], None);
		let err = op.execute(&OperationMonitor::new()).await.unwrap_err();
		assert_eq!(*log.lock(), vec!["a", "b"]);
		match err {
			OpError::Failed(err) => assert_eq!(err.message(), "b failed"),
			OpError::Cancelled => panic!("expected failure"),
		}
	}

	#[tokio::test]
	async fn cancellation_stops_sequence() {
		let (op, log) = composite(&[("a", Step::Cancel), ("b", Step::Succeed)], None);
		let err = op.execute(&OperationMonitor::new()).await.unwrap_err();
		assert!(err.is_cancelled());
		assert_eq!(*log.lock(), vec!["a"]);
	}

	#[tokio::test]
	async fn rule_is_held_for_whole_sequence() {
		let table = RuleTable::new();
		let (op, _log) = composite(&[("a", Step::Succeed)], Some(table.rule(["core"])));
		assert_eq!(op.len(), 1);

		let monitor = OperationMonitor::new();
		let held = table.rule(["core"]).acquire(&monitor).await.unwrap();
		let started = Arc::new(AtomicUsize::new(0));
		let task = {
			let started = Arc::clone(&started);
			let monitor = monitor.clone();
			tokio::spawn(async move {
				let result = op.execute(&monitor).await;
				started.fetch_add(1, Ordering::SeqCst);
				result
			})
		};

		tokio::time::sleep(Duration::from_millis(20)).await;
		assert_eq!(started.load(Ordering::SeqCst), 0);
		drop(held);

		let result = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
		assert!(result.is_ok());
		assert_eq!(table.held_count(), 0);
	}

	#[tokio::test]
	async fn cancelled_while_waiting_for_rule_runs_nothing() {
		let table = RuleTable::new();
		let (op, log) = composite(&[("clear", Step::Succeed), ("build", Step::Succeed)], Some(table.rule(["core"])));

		let held = table.rule(["core"]).acquire(&OperationMonitor::new()).await.unwrap();
		let monitor = OperationMonitor::new();
		let task = {
			let monitor = monitor.clone();
			tokio::spawn(async move { op.execute(&monitor).await })
		};

		tokio::time::sleep(Duration::from_millis(20)).await;
		monitor.cancel();
		drop(held);

		let result = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
		assert!(result.is_err_and(|e| e.is_cancelled()));
		assert!(log.lock().is_empty());
		assert_eq!(table.held_count(), 0);
	}
}
