//! Per-project build and clean.
//!
//! A build request moves a [`ProjectBuilder`] through
//! `Idle -> PreparingBuild -> Building -> Idle`, ending as completed,
//! cancelled or failed. A clean request goes `Idle -> Cleaning -> Idle`.
//!
//! Whatever way a build ends, the project is refreshed afterwards and the
//! shared build session is closed if this was the last project of its
//! language in the pass.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kiln_ops::{CommonError, OpError, OpResult, OperationMonitor};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::deps::{is_first_of_kind, is_last_of_kind};
use crate::error::{BuildError, BuildOutcome, Result};
use crate::host::{BuildContext, BuildManager, Depth, Language, ProjectId, ToolManager, Workspace};
use crate::session::{BuildSession, SessionId, SessionRegistry};

/// String-keyed options passed along with a build request.
pub type BuildArgs = BTreeMap<String, String>;

/// Kind of build the host requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildKind {
	Incremental,
	Full,
	/// Background build triggered by resource changes. Ignored.
	Auto,
	/// Clean-triggered build. Cleans must go through [`IncrementalBuilder::clean`].
	Clean,
}

/// Where a builder currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildPhase {
	#[default]
	Idle,
	PreparingBuild,
	Building,
	Cleaning,
}

/// How the most recent build or clean ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
	Completed,
	Cancelled,
	Failed,
}

#[derive(Debug, Default)]
struct BuilderState {
	phase: BuildPhase,
	/// Session of the last successful build; `None` forces the host to
	/// treat the next incremental build as starting from scratch.
	last_built: Option<SessionId>,
	last_termination: Option<Termination>,
}

/// Sets the builder phase on creation and returns it to idle on drop.
struct PhaseGuard<'a> {
	state: &'a Mutex<BuilderState>,
}

impl<'a> PhaseGuard<'a> {
	fn enter(state: &'a Mutex<BuilderState>, phase: BuildPhase) -> Self {
		state.lock().phase = phase;
		Self { state }
	}

	fn advance(&self, phase: BuildPhase) {
		self.state.lock().phase = phase;
	}
}

impl Drop for PhaseGuard<'_> {
	fn drop(&mut self) {
		self.state.lock().phase = BuildPhase::Idle;
	}
}

/// Closes a build on every exit path, including a panic in the build or
/// the build future being dropped before it finished.
struct FinishGuard<'a, L: Language> {
	builder: &'a ProjectBuilder<L>,
	context: &'a dyn BuildContext,
	armed: bool,
}

impl<'a, L: Language> FinishGuard<'a, L> {
	fn new(builder: &'a ProjectBuilder<L>, context: &'a dyn BuildContext) -> Self {
		Self {
			builder,
			context,
			armed: true,
		}
	}

	fn complete(mut self, outcome: BuildOutcome) -> BuildOutcome {
		self.armed = false;
		self.builder.finish_build(outcome, self.context)
	}
}

impl<L: Language> Drop for FinishGuard<'_, L> {
	fn drop(&mut self) {
		if !self.armed {
			return;
		}
		let builder = self.builder;
		let termination = if std::thread::panicking() {
			Termination::Failed
		} else {
			Termination::Cancelled
		};
		{
			let mut state = builder.state.lock();
			state.last_built = None;
			state.last_termination = Some(termination);
		}
		warn!(project = %builder.project, ?termination, "build interrupted");
		if let Err(err) = builder.close_build(self.context) {
			warn!(project = %builder.project, error = %err, "refresh after build failed");
		}
	}
}

/// Host collaborators shared by every project builder.
#[derive(Clone)]
pub struct BuildServices {
	pub workspace: Arc<dyn Workspace>,
	pub build_manager: Arc<dyn BuildManager>,
	pub tool_manager: Arc<dyn ToolManager>,
	pub sessions: SessionRegistry,
}

impl BuildServices {
	/// Bundles the collaborators, creating a fresh session registry.
	pub fn new(workspace: Arc<dyn Workspace>, build_manager: Arc<dyn BuildManager>, tool_manager: Arc<dyn ToolManager>) -> Self {
		let sessions = SessionRegistry::new(Arc::clone(&workspace), Arc::clone(&tool_manager));
		Self {
			workspace,
			build_manager,
			tool_manager,
			sessions,
		}
	}
}

/// Build entry points invoked by the host scheduler.
#[async_trait]
pub trait IncrementalBuilder: Send + Sync {
	fn project(&self) -> &ProjectId;

	/// Builds the project within the pass described by `context`.
	///
	/// # Panics
	///
	/// Panics if `kind` is [`BuildKind::Clean`].
	async fn build(&self, kind: BuildKind, args: &BuildArgs, context: &dyn BuildContext, monitor: &OperationMonitor) -> BuildOutcome;

	/// Deletes the project's build markers and runs the clean command.
	///
	/// Cancellation is not an error.
	async fn clean(&self, monitor: &OperationMonitor) -> Result<()>;
}

/// Builder for one project, parameterized over the language it builds.
pub struct ProjectBuilder<L: Language> {
	project: ProjectId,
	language: Arc<L>,
	services: BuildServices,
	state: Mutex<BuilderState>,
}

impl<L: Language> ProjectBuilder<L> {
	/// # Panics
	///
	/// Panics if the project id is empty.
	pub fn new(project: ProjectId, language: Arc<L>, services: BuildServices) -> Self {
		assert!(!project.as_str().is_empty(), "project builder needs a project");
		Self {
			project,
			language,
			services,
			state: Mutex::new(BuilderState::default()),
		}
	}

	pub fn language(&self) -> &L {
		&self.language
	}

	pub fn phase(&self) -> BuildPhase {
		self.state.lock().phase
	}

	pub fn last_termination(&self) -> Option<Termination> {
		self.state.lock().last_termination
	}

	/// Whether incremental state from a successful build is held.
	pub fn has_last_built_state(&self) -> bool {
		self.state.lock().last_built.is_some()
	}

	/// Drops incremental state so the next build starts from scratch.
	pub fn forget_last_built_state(&self) {
		self.state.lock().last_built = None;
	}

	async fn prepare_for_build(&self, context: &dyn BuildContext, monitor: &OperationMonitor) -> OpResult<Arc<BuildSession>> {
		let nature = self.language.nature_id();
		if is_first_of_kind(context, &*self.services.workspace, nature) {
			debug!(project = %self.project, language = %nature, "first project of its language in this pass");
		}

		let session = self.services.sessions.begin_if_needed(&*self.language).await?;
		self.clear_workspace_error_markers(&session, context, monitor).await?;
		Ok(session)
	}

	/// Clears problem markers on this project and on every project that
	/// depends on it, since their diagnostics may be stale now.
	async fn clear_workspace_error_markers(&self, session: &BuildSession, context: &dyn BuildContext, monitor: &OperationMonitor) -> OpResult {
		let mut targets = vec![self.project.clone()];
		for config in context.referencing_configs() {
			if !targets.contains(&config.project) {
				targets.push(config.project);
			}
		}

		for project in &targets {
			self.services
				.build_manager
				.new_project_clear_markers_operation(session.console(), project)
				.execute(monitor)
				.await?;
		}
		Ok(())
	}

	async fn run_build(&self, phase: &PhaseGuard<'_>, context: &dyn BuildContext, monitor: &OperationMonitor) -> OpResult<SessionId> {
		let session = self.prepare_for_build(context, monitor).await?;

		phase.advance(BuildPhase::Building);
		let operation = self
			.services
			.build_manager
			.new_project_build_operation(session.console(), &self.project, false, false)?;
		operation.execute(monitor).await?;
		Ok(session.id())
	}

	/// Maps the build result to an outcome, checking the monitor as well as
	/// the result since either may be the only one to report cancellation.
	fn settle(&self, result: OpResult<SessionId>, monitor: &OperationMonitor) -> BuildOutcome {
		let mut state = self.state.lock();
		match result {
			Ok(session) if !monitor.is_cancelled() => {
				state.last_built = Some(session);
				state.last_termination = Some(Termination::Completed);
				info!(project = %self.project, %session, "build completed");
				BuildOutcome::Built(Vec::new())
			}
			Ok(_) | Err(OpError::Cancelled) => {
				state.last_built = None;
				state.last_termination = Some(Termination::Cancelled);
				info!(project = %self.project, "build cancelled");
				BuildOutcome::Cancelled
			}
			Err(OpError::Failed(err)) => {
				state.last_built = None;
				if monitor.is_cancelled() {
					state.last_termination = Some(Termination::Cancelled);
					debug!(project = %self.project, error = %err, "build failed after cancellation, reporting as cancelled");
					return BuildOutcome::Cancelled;
				}
				state.last_termination = Some(Termination::Failed);
				error!(project = %self.project, error = %err, "build failed");
				BuildOutcome::Failed(BuildError::Operation(err))
			}
		}
	}

	/// Refreshes the project and ends the shared session if no project of
	/// the same language is left to build in this pass.
	fn close_build(&self, context: &dyn BuildContext) -> Result<(), CommonError> {
		let refreshed = self.services.workspace.refresh(&self.project, Depth::Infinite);

		let nature = self.language.nature_id();
		if is_last_of_kind(context, &*self.services.workspace, nature) {
			self.services.sessions.end(nature);
		}
		refreshed
	}

	fn finish_build(&self, outcome: BuildOutcome, context: &dyn BuildContext) -> BuildOutcome {
		let Err(source) = self.close_build(context) else {
			return outcome;
		};
		match outcome {
			BuildOutcome::Built(_) => {
				error!(project = %self.project, error = %source, "refresh after build failed");
				self.state.lock().last_termination = Some(Termination::Failed);
				BuildOutcome::Failed(BuildError::Refresh {
					project: self.project.clone(),
					source,
				})
			}
			other => {
				warn!(project = %self.project, error = %source, "refresh after build failed");
				other
			}
		}
	}

	/// Deletes build problem markers, logging rather than failing.
	fn delete_project_build_markers(&self) {
		match self
			.services
			.workspace
			.delete_markers(&self.project, self.language.build_problem_id(), Depth::Infinite)
		{
			Ok(removed) => debug!(project = %self.project, removed, "deleted build markers"),
			Err(err) => warn!(project = %self.project, error = %err, "failed to delete build markers"),
		}
	}

	async fn run_clean(&self, monitor: &OperationMonitor) -> OpResult {
		let location = self.services.workspace.project_location(&self.project)?;
		let mut spec = self.language.clean_command(&self.project, &location)?;
		if spec.cwd.is_none() {
			spec.cwd = Some(location);
		}
		self.services
			.tool_manager
			.new_run_build_tool_operation(spec, None)
			.run_process(monitor)
			.await?;
		Ok(())
	}
}

#[async_trait]
impl<L: Language + 'static> IncrementalBuilder for ProjectBuilder<L> {
	fn project(&self) -> &ProjectId {
		&self.project
	}

	async fn build(&self, kind: BuildKind, args: &BuildArgs, context: &dyn BuildContext, monitor: &OperationMonitor) -> BuildOutcome {
		assert!(kind != BuildKind::Clean, "clean requests must be sent to `clean`, not `build`");
		if kind == BuildKind::Auto {
			debug!(project = %self.project, "ignoring auto build");
			return BuildOutcome::Skipped;
		}

		let phase = PhaseGuard::enter(&self.state, BuildPhase::PreparingBuild);
		let finish = FinishGuard::new(self, context);
		info!(project = %self.project, ?kind, args = args.len(), "build started");

		let result = self.run_build(&phase, context, monitor).await;
		let outcome = self.settle(result, monitor);
		finish.complete(outcome)
	}

	async fn clean(&self, monitor: &OperationMonitor) -> Result<()> {
		let _phase = PhaseGuard::enter(&self.state, BuildPhase::Cleaning);
		info!(project = %self.project, "clean started");

		self.delete_project_build_markers();
		self.forget_last_built_state();

		let (termination, result) = match self.run_clean(monitor).await {
			Ok(()) => (Termination::Completed, Ok(())),
			Err(OpError::Cancelled) => (Termination::Cancelled, Ok(())),
			Err(OpError::Failed(_)) if monitor.is_cancelled() => (Termination::Cancelled, Ok(())),
			Err(OpError::Failed(err)) => {
				error!(project = %self.project, error = %err, "clean failed");
				(Termination::Failed, Err(BuildError::Operation(err)))
			}
		};
		self.state.lock().last_termination = Some(termination);
		info!(project = %self.project, ?termination, "clean finished");
		result
	}
}
