use kiln_ops::CommonError;

use crate::host::ProjectId;

/// Build failure as reported to the host.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BuildError {
	/// Session start, marker clearing, the build or the clean tool failed.
	#[error(transparent)]
	Operation(#[from] CommonError),
	/// The project could not be refreshed after the build.
	#[error("failed to refresh project {project}")]
	Refresh {
		project: ProjectId,
		#[source]
		source: CommonError,
	},
}

/// A convenient type alias for `Result` with `E` = [`BuildError`].
pub type Result<T, E = BuildError> = std::result::Result<T, E>;

/// Result of one build request.
#[derive(Debug)]
pub enum BuildOutcome {
	/// The build ran. Carries the projects whose changes the host should
	/// track for the next incremental build, usually none.
	Built(Vec<ProjectId>),
	/// The request kind is ignored (automatic builds).
	Skipped,
	/// The build was cancelled. Never an error.
	Cancelled,
	/// The build failed.
	Failed(BuildError),
}

impl BuildOutcome {
	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::Cancelled)
	}

	pub fn is_failed(&self) -> bool {
		matches!(self, Self::Failed(_))
	}

	/// Converts to a `Result`, mapping every non-failure to `Ok`.
	///
	/// Cancelled and skipped builds yield no changed projects.
	pub fn into_result(self) -> Result<Vec<ProjectId>> {
		match self {
			Self::Built(changed) => Ok(changed),
			Self::Skipped | Self::Cancelled => Ok(Vec::new()),
			Self::Failed(err) => Err(err),
		}
	}
}
