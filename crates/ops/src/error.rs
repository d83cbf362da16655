use std::error::Error as StdError;

/// Boxed source error carried by [`CommonError`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A structured failure from a build step, marker update or tool invocation.
///
/// The message is meant for the user; the optional source keeps the
/// underlying cause (I/O error, exit status) for logs.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CommonError {
	message: String,
	#[source]
	source: Option<BoxError>,
}

impl CommonError {
	/// Creates an error with a message and no underlying cause.
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			source: None,
		}
	}

	/// Creates an error wrapping an underlying cause.
	pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
		Self {
			message: message.into(),
			source: Some(source.into()),
		}
	}

	pub fn message(&self) -> &str {
		&self.message
	}
}

/// Why an operation stopped before completing.
#[derive(Debug, thiserror::Error)]
pub enum OpError {
	/// Cancellation was requested through the operation monitor.
	///
	/// This is a normal termination path and is never reported as an error.
	#[error("operation cancelled")]
	Cancelled,
	/// The operation failed.
	#[error(transparent)]
	Failed(#[from] CommonError),
}

impl OpError {
	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::Cancelled)
	}
}

/// Result of executing an operation.
pub type OpResult<T = ()> = Result<T, OpError>;

#[cfg(test)]
mod tests {
	use std::io;

	use super::*;

	#[test]
	fn source_is_preserved() {
		let err = CommonError::with_source("could not start `make`", io::Error::new(io::ErrorKind::NotFound, "no such file"));
		assert_eq!(err.to_string(), "could not start `make`");
		let source = StdError::source(&err).map(ToString::to_string);
		assert_eq!(source.as_deref(), Some("no such file"));
	}

	#[test]
	fn failed_is_transparent() {
		let err = OpError::from(CommonError::new("marker store is read-only"));
		assert!(!err.is_cancelled());
		assert_eq!(err.to_string(), "marker store is read-only");
		assert!(OpError::Cancelled.is_cancelled());
	}
}
