//! Workspace build and clean passes.
//!
//! A build pass announces itself with `PreBuild`, builds the selected
//! projects level by level (projects within a level run concurrently) and
//! closes with `PostBuild`. Projects whose dependencies failed are skipped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Result, bail};
use kiln_builder::{
	BuildArgs, BuildKind, BuildOutcome, BuildServices, CommandBuildManager, DependencyGraph, IncrementalBuilder, MemoryWorkspace, ProcessToolManager,
	ProjectBuilder, ProjectId, ToolchainLanguage, WorkspaceConfig, WorkspaceEvent,
};
use kiln_ops::{OperationMonitor, RuleTable};
use tracing::{debug, error, info, warn};

type Builder = ProjectBuilder<ToolchainLanguage>;

/// What happened to each project in a pass.
#[derive(Debug, Default)]
pub struct PassReport {
	pub completed: Vec<ProjectId>,
	/// Not attempted because a dependency did not build.
	pub skipped: Vec<ProjectId>,
	pub failed: Vec<(ProjectId, String)>,
	pub cancelled: bool,
}

impl PassReport {
	pub fn is_success(&self) -> bool {
		self.failed.is_empty() && self.skipped.is_empty() && !self.cancelled
	}
}

/// Builders and host services for one configured workspace.
pub struct WorkspacePass {
	workspace: Arc<MemoryWorkspace>,
	graph: DependencyGraph,
	services: BuildServices,
	builders: HashMap<ProjectId, Arc<Builder>>,
}

impl WorkspacePass {
	pub fn new(config: &WorkspaceConfig) -> Self {
		let workspace = Arc::new(config.workspace());
		let language = Arc::new(config.toolchain());

		let command = &config.language.build.command;
		let mut tools = ProcessToolManager::new();
		// Bare program names are looked up on PATH; paths resolve per project.
		if command.components().count() == 1 {
			tools = tools.with_required_tool(command);
		}
		let tools = Arc::new(tools);

		let manager = Arc::new(CommandBuildManager::new(
			Arc::clone(&language),
			workspace.clone(),
			tools.clone(),
			RuleTable::new(),
		));
		let services = BuildServices::new(workspace.clone(), manager, tools);

		let builders = workspace
			.projects()
			.into_iter()
			.map(|project| {
				let builder = ProjectBuilder::new(project.clone(), Arc::clone(&language), services.clone());
				(project, Arc::new(builder))
			})
			.collect();

		Self {
			workspace,
			graph: config.dependency_graph(),
			services,
			builders,
		}
	}

	/// Resolves project names in build order. No names selects everything.
	pub fn select(&self, names: &[String], with_dependencies: bool) -> Result<Vec<ProjectId>> {
		if names.is_empty() {
			return Ok(self.graph.projects().to_vec());
		}

		let mut selected = HashSet::new();
		for name in names {
			let project = ProjectId::new(name.as_str());
			if !self.builders.contains_key(&project) {
				bail!("unknown project `{name}`");
			}
			if with_dependencies {
				selected.extend(self.graph.referenced(&project));
			}
			selected.insert(project);
		}
		Ok(self.graph.projects().iter().filter(|project| selected.contains(*project)).cloned().collect())
	}

	pub fn graph(&self) -> &DependencyGraph {
		&self.graph
	}

	/// Builds `selection` in dependency order.
	pub async fn build(&self, selection: &[ProjectId], kind: BuildKind, monitor: &OperationMonitor) -> Result<PassReport> {
		let levels = self.graph.levels()?;
		let mut report = PassReport::default();
		let mut broken: HashSet<ProjectId> = HashSet::new();

		self.workspace.emit(WorkspaceEvent::PreBuild);
		monitor.begin_task("build", selection.len() as u64);
		info!(projects = selection.len(), ?kind, "build pass started");

		for level in levels {
			if monitor.is_cancelled() {
				report.cancelled = true;
				break;
			}

			let mut tasks = Vec::new();
			for project in level.into_iter().filter(|project| selection.contains(project)) {
				if self.graph.referenced(&project).iter().any(|dep| broken.contains(dep)) {
					warn!(project = %project, "skipping build, a dependency did not build");
					broken.insert(project.clone());
					report.skipped.push(project);
					continue;
				}
				let Some(builder) = self.builders.get(&project).cloned() else {
					continue;
				};
				let context = self.graph.context(&project, selection);
				let monitor = monitor.clone();
				let task = tokio::spawn(async move { builder.build(kind, &BuildArgs::new(), &context, &monitor).await });
				tasks.push((project, task));
			}

			for (project, task) in tasks {
				let joined = task.await;
				monitor.worked(1);
				let outcome = match joined {
					Ok(outcome) => outcome,
					Err(err) => {
						error!(project = %project, error = %err, "build task failed");
						report.failed.push((project.clone(), format!("build task failed: {err}")));
						broken.insert(project);
						continue;
					}
				};
				match outcome {
					BuildOutcome::Built(_) => report.completed.push(project),
					BuildOutcome::Skipped => report.skipped.push(project),
					BuildOutcome::Cancelled => {
						report.cancelled = true;
						broken.insert(project);
					}
					BuildOutcome::Failed(err) => {
						report.failed.push((project.clone(), format!("{:#}", anyhow::Error::new(err))));
						broken.insert(project);
					}
				}
			}
			let (done, total) = monitor.progress();
			debug!(done, total, "build level finished");
		}

		self.workspace.emit(WorkspaceEvent::PostBuild);
		info!(
			completed = report.completed.len(),
			failed = report.failed.len(),
			skipped = report.skipped.len(),
			cancelled = report.cancelled,
			"build pass finished"
		);
		Ok(report)
	}

	/// Cleans `selection` one project at a time.
	pub async fn clean(&self, selection: &[ProjectId], monitor: &OperationMonitor) -> PassReport {
		let mut report = PassReport::default();
		self.workspace.emit(WorkspaceEvent::PreClean);

		for project in selection {
			if monitor.is_cancelled() {
				report.cancelled = true;
				break;
			}
			let Some(builder) = self.builders.get(project) else {
				continue;
			};
			match builder.clean(monitor).await {
				Ok(()) => report.completed.push(project.clone()),
				Err(err) => report.failed.push((project.clone(), format!("{:#}", anyhow::Error::new(err)))),
			}
		}

		report.cancelled |= monitor.is_cancelled();
		report
	}

	/// Ends any session still open. Returns how many were ended.
	pub fn shutdown(&self) -> usize {
		self.services.sessions.shutdown()
	}
}
