//! Collaborator interfaces supplied by the host environment.
//!
//! The builder never owns the resource model, the dependency graph or the
//! tool processes. It talks to them through these traits; [`crate::memory`]
//! and [`crate::tool`] provide in-process implementations.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use kiln_ops::{CommonError, CommonOperation, OpResult, OperationMonitor, ToolOperationMonitor};

use crate::tool::{ProcessOutput, ProcessSpec};

/// Identifies a project in the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectId(Arc<str>);

impl ProjectId {
	pub fn new(name: impl Into<Arc<str>>) -> Self {
		Self(name.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ProjectId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for ProjectId {
	fn from(name: &str) -> Self {
		Self::new(name)
	}
}

/// A build target within a project, as seen by dependency queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildConfiguration {
	pub project: ProjectId,
	pub name: String,
}

impl BuildConfiguration {
	/// The default configuration of `project`.
	pub fn default_for(project: ProjectId) -> Self {
		Self {
			project,
			name: String::from("default"),
		}
	}
}

/// How far below a resource an operation reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
	/// The resource itself.
	Zero,
	/// The resource and its direct children.
	One,
	/// The resource and everything below it.
	Infinite,
}

impl Depth {
	/// Whether a resource at `relative` (relative to the root) is covered.
	pub fn covers(self, relative: &Path) -> bool {
		let levels = relative.components().count();
		match self {
			Self::Zero => levels == 0,
			Self::One => levels <= 1,
			Self::Infinite => true,
		}
	}
}

/// Workspace-level lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceEvent {
	/// A workspace build pass is about to start.
	PreBuild,
	/// A workspace build pass has finished.
	PostBuild,
	/// A workspace clean is about to start.
	PreClean,
	/// Resources changed outside of a build.
	PostChange,
}

impl WorkspaceEvent {
	pub const fn mask(self) -> EventMask {
		match self {
			Self::PreBuild => EventMask::PRE_BUILD,
			Self::PostBuild => EventMask::POST_BUILD,
			Self::PreClean => EventMask::PRE_CLEAN,
			Self::PostChange => EventMask::POST_CHANGE,
		}
	}
}

bitflags::bitflags! {
	/// Set of [`WorkspaceEvent`] kinds a listener wants.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
	pub struct EventMask: u8 {
		const PRE_BUILD = 1 << 0;
		const POST_BUILD = 1 << 1;
		const PRE_CLEAN = 1 << 2;
		const POST_CHANGE = 1 << 3;
	}
}

impl EventMask {
	/// Whether `event` is one of the kinds in this set.
	pub const fn wants(self, event: WorkspaceEvent) -> bool {
		self.intersects(event.mask())
	}
}

/// Token returned by [`Workspace::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(pub u64);

/// What a listener wants after handling an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerFlow {
	Continue,
	Unsubscribe,
}

/// Receives workspace lifecycle events.
pub trait WorkspaceListener: Send + Sync {
	fn on_event(&self, event: WorkspaceEvent) -> ListenerFlow;
}

/// The host resource model.
pub trait Workspace: Send + Sync {
	/// Registers a listener for the events in `mask`.
	fn subscribe(&self, mask: EventMask, listener: Arc<dyn WorkspaceListener>) -> SubscriptionToken;

	/// Removes a listener. Returns false if it was already gone.
	fn unsubscribe(&self, token: SubscriptionToken) -> bool;

	/// Whether `project` carries the language identity `nature`.
	///
	/// Unknown projects carry no natures.
	fn has_nature(&self, project: &ProjectId, nature: &str) -> bool;

	/// Filesystem location of the project root.
	fn project_location(&self, project: &ProjectId) -> Result<PathBuf, CommonError>;

	/// Deletes markers of `marker_type` on the project, down to `depth`.
	///
	/// Returns how many markers were removed.
	fn delete_markers(&self, project: &ProjectId, marker_type: &str, depth: Depth) -> Result<usize, CommonError>;

	/// Resynchronizes the project's resource tree with the filesystem.
	fn refresh(&self, project: &ProjectId, depth: Depth) -> Result<(), CommonError>;
}

/// Dependency view of the build pass a project is being built in.
pub trait BuildContext: Send + Sync {
	/// Configurations the current build depends on.
	fn referenced_configs(&self) -> Vec<BuildConfiguration>;

	/// Configurations that depend on the current build.
	fn referencing_configs(&self) -> Vec<BuildConfiguration>;
}

/// Factory for the per-project build operations.
pub trait BuildManager: Send + Sync {
	/// Operation that clears the language's problem markers on `project`.
	fn new_project_clear_markers_operation(&self, console: Arc<dyn ToolOperationMonitor>, project: &ProjectId) -> Box<dyn CommonOperation>;

	/// Operation that builds `project`.
	fn new_project_build_operation(
		&self,
		console: Arc<dyn ToolOperationMonitor>,
		project: &ProjectId,
		full_rebuild: bool,
		verbose: bool,
	) -> Result<Box<dyn CommonOperation>, CommonError>;
}

/// A prepared tool process invocation.
#[async_trait]
pub trait ProcessOperation: Send + Sync {
	/// Runs the process to completion, blocking the caller until it exits,
	/// fails to start or is cancelled.
	async fn run_process(&self, monitor: &OperationMonitor) -> OpResult<ProcessOutput>;
}

/// Access to the external build tool.
#[async_trait]
pub trait ToolManager: Send + Sync {
	/// Starts a build operation, returning the console it reports to.
	///
	/// # Errors
	///
	/// Fails if the external tool cannot be used.
	async fn start_new_build_operation(&self) -> Result<Arc<dyn ToolOperationMonitor>, CommonError>;

	/// Prepares a tool process. Output goes to `console`, or to the tool
	/// manager's own console when `None`.
	fn new_run_build_tool_operation(&self, spec: ProcessSpec, console: Option<Arc<dyn ToolOperationMonitor>>) -> Box<dyn ProcessOperation>;
}

/// Language-specific settings and command factories.
pub trait Language: Send + Sync {
	/// Display name, used in console banners.
	fn name(&self) -> &str;

	/// Identity marker carried by projects of this language.
	fn nature_id(&self) -> &str;

	/// Marker type of build problems reported for this language.
	fn build_problem_id(&self) -> &str;

	/// Build tool invocation for a project rooted at `location`.
	fn build_command(&self, project: &ProjectId, location: &Path, full_rebuild: bool, verbose: bool) -> Result<ProcessSpec, CommonError>;

	/// Clean tool invocation for a project rooted at `location`.
	fn clean_command(&self, project: &ProjectId, location: &Path) -> Result<ProcessSpec, CommonError>;
}
