//! Build manager driven by the language's build command.

use std::sync::Arc;

use async_trait::async_trait;
use kiln_ops::{CommonError, CommonOperation, CompositeBuildOperation, OpResult, OperationMonitor, RuleTable, ToolOperationMonitor};
use tracing::debug;

use crate::host::{BuildManager, Depth, Language, ProcessOperation, ProjectId, ToolManager, Workspace};

/// Deletes one marker type from a project, recursively.
pub struct ClearMarkersOperation {
	workspace: Arc<dyn Workspace>,
	project: ProjectId,
	marker_type: String,
}

impl ClearMarkersOperation {
	pub fn new(workspace: Arc<dyn Workspace>, project: ProjectId, marker_type: impl Into<String>) -> Self {
		Self {
			workspace,
			project,
			marker_type: marker_type.into(),
		}
	}
}

#[async_trait]
impl CommonOperation for ClearMarkersOperation {
	async fn execute(&self, monitor: &OperationMonitor) -> OpResult {
		monitor.check_cancelled()?;
		let removed = self.workspace.delete_markers(&self.project, &self.marker_type, Depth::Infinite)?;
		debug!(project = %self.project, marker_type = %self.marker_type, removed, "cleared markers");
		Ok(())
	}
}

/// Runs a prepared tool process as a build step, discarding its output.
struct BuildToolStep {
	project: ProjectId,
	process: Box<dyn ProcessOperation>,
}

#[async_trait]
impl CommonOperation for BuildToolStep {
	async fn execute(&self, monitor: &OperationMonitor) -> OpResult {
		let output = self.process.run_process(monitor).await?;
		debug!(project = %self.project, status = %output.status, "build tool finished");
		Ok(())
	}
}

/// [`BuildManager`] whose build operation clears the project's problem
/// markers and then runs the language's build command, holding a
/// project-scoped scheduling rule for both steps.
pub struct CommandBuildManager<L: Language> {
	language: Arc<L>,
	workspace: Arc<dyn Workspace>,
	tools: Arc<dyn ToolManager>,
	rules: Arc<RuleTable>,
}

impl<L: Language> CommandBuildManager<L> {
	pub fn new(language: Arc<L>, workspace: Arc<dyn Workspace>, tools: Arc<dyn ToolManager>, rules: Arc<RuleTable>) -> Self {
		Self {
			language,
			workspace,
			tools,
			rules,
		}
	}

	pub fn rules(&self) -> &Arc<RuleTable> {
		&self.rules
	}
}

impl<L: Language> BuildManager for CommandBuildManager<L> {
	fn new_project_clear_markers_operation(&self, _console: Arc<dyn ToolOperationMonitor>, project: &ProjectId) -> Box<dyn CommonOperation> {
		Box::new(ClearMarkersOperation::new(
			Arc::clone(&self.workspace),
			project.clone(),
			self.language.build_problem_id(),
		))
	}

	fn new_project_build_operation(
		&self,
		console: Arc<dyn ToolOperationMonitor>,
		project: &ProjectId,
		full_rebuild: bool,
		verbose: bool,
	) -> Result<Box<dyn CommonOperation>, CommonError> {
		let location = self.workspace.project_location(project)?;
		let mut spec = self.language.build_command(project, &location, full_rebuild, verbose)?;
		if spec.cwd.is_none() {
			spec.cwd = Some(location);
		}

		let operations: Vec<Box<dyn CommonOperation>> = vec![
			self.new_project_clear_markers_operation(Arc::clone(&console), project),
			Box::new(BuildToolStep {
				project: project.clone(),
				process: self.tools.new_run_build_tool_operation(spec, Some(Arc::clone(&console))),
			}),
		];
		let rule = self.rules.rule([project.as_str()]);
		Ok(Box::new(CompositeBuildOperation::new(console, operations, Some(rule))))
	}
}
