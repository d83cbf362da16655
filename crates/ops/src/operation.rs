use async_trait::async_trait;

use crate::{OpResult, OperationMonitor};

/// A unit of build work.
///
/// Implementations should poll [`OperationMonitor::is_cancelled`] at their own
/// blocking points and return [`crate::OpError::Cancelled`] when asked to stop.
/// Stopping half way must leave resources in a state a later run can recover
/// from; nothing rolls back partial work.
#[async_trait]
pub trait CommonOperation: Send + Sync {
	async fn execute(&self, monitor: &OperationMonitor) -> OpResult;
}
