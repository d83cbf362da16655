//! In-process host: resource model and dependency graph.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use kiln_ops::CommonError;
use parking_lot::RwLock;

use crate::events::EventBus;
use crate::host::{BuildConfiguration, BuildContext, Depth, EventMask, ProjectId, SubscriptionToken, Workspace, WorkspaceEvent, WorkspaceListener};

/// A diagnostic attached to a project resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
	pub marker_type: String,
	/// Resource path relative to the project root; empty for the project itself.
	pub resource: PathBuf,
	pub message: String,
}

impl Marker {
	pub fn new(marker_type: impl Into<String>, resource: impl Into<PathBuf>, message: impl Into<String>) -> Self {
		Self {
			marker_type: marker_type.into(),
			resource: resource.into(),
			message: message.into(),
		}
	}
}

#[derive(Debug)]
struct ProjectEntry {
	location: PathBuf,
	natures: BTreeSet<String>,
	markers: Vec<Marker>,
	refreshes: usize,
}

/// Workspace kept entirely in memory.
#[derive(Default)]
pub struct MemoryWorkspace {
	projects: RwLock<HashMap<ProjectId, ProjectEntry>>,
	events: EventBus,
}

impl MemoryWorkspace {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds or replaces a project.
	pub fn add_project<I, S>(&self, project: ProjectId, location: impl Into<PathBuf>, natures: I)
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let entry = ProjectEntry {
			location: location.into(),
			natures: natures.into_iter().map(Into::into).collect(),
			markers: Vec::new(),
			refreshes: 0,
		};
		self.projects.write().insert(project, entry);
	}

	pub fn contains(&self, project: &ProjectId) -> bool {
		self.projects.read().contains_key(project)
	}

	pub fn projects(&self) -> Vec<ProjectId> {
		let mut projects: Vec<_> = self.projects.read().keys().cloned().collect();
		projects.sort();
		projects
	}

	pub fn add_marker(&self, project: &ProjectId, marker: Marker) -> Result<(), CommonError> {
		let mut projects = self.projects.write();
		let entry = projects.get_mut(project).ok_or_else(|| missing(project))?;
		entry.markers.push(marker);
		Ok(())
	}

	pub fn markers(&self, project: &ProjectId) -> Vec<Marker> {
		self.projects.read().get(project).map(|entry| entry.markers.clone()).unwrap_or_default()
	}

	/// How many times the project was refreshed.
	pub fn refresh_count(&self, project: &ProjectId) -> usize {
		self.projects.read().get(project).map_or(0, |entry| entry.refreshes)
	}

	/// Delivers a lifecycle event to subscribers.
	pub fn emit(&self, event: WorkspaceEvent) -> usize {
		self.events.emit(event)
	}

	pub fn listener_count(&self) -> usize {
		self.events.len()
	}
}

fn missing(project: &ProjectId) -> CommonError {
	CommonError::new(format!("project `{project}` does not exist"))
}

impl Workspace for MemoryWorkspace {
	fn subscribe(&self, mask: EventMask, listener: Arc<dyn WorkspaceListener>) -> SubscriptionToken {
		self.events.subscribe(mask, listener)
	}

	fn unsubscribe(&self, token: SubscriptionToken) -> bool {
		self.events.unsubscribe(token)
	}

	fn has_nature(&self, project: &ProjectId, nature: &str) -> bool {
		self.projects.read().get(project).is_some_and(|entry| entry.natures.contains(nature))
	}

	fn project_location(&self, project: &ProjectId) -> Result<PathBuf, CommonError> {
		self.projects.read().get(project).map(|entry| entry.location.clone()).ok_or_else(|| missing(project))
	}

	fn delete_markers(&self, project: &ProjectId, marker_type: &str, depth: Depth) -> Result<usize, CommonError> {
		let mut projects = self.projects.write();
		let entry = projects.get_mut(project).ok_or_else(|| missing(project))?;
		let before = entry.markers.len();
		entry
			.markers
			.retain(|marker| marker.marker_type != marker_type || !depth.covers(&marker.resource));
		Ok(before - entry.markers.len())
	}

	fn refresh(&self, project: &ProjectId, _depth: Depth) -> Result<(), CommonError> {
		let mut projects = self.projects.write();
		let entry = projects.get_mut(project).ok_or_else(|| missing(project))?;
		entry.refreshes += 1;
		Ok(())
	}
}

/// The graph contains a dependency cycle through the named project.
#[derive(Debug, thiserror::Error)]
#[error("dependency cycle through project `{0}`")]
pub struct DependencyCycle(pub ProjectId);

/// Project dependency graph.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
	/// Project to the projects it depends on, in insertion order.
	dependencies: HashMap<ProjectId, Vec<ProjectId>>,
	order: Vec<ProjectId>,
}

impl DependencyGraph {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add_project(&mut self, project: ProjectId) {
		if !self.dependencies.contains_key(&project) {
			self.order.push(project.clone());
			self.dependencies.insert(project, Vec::new());
		}
	}

	/// Records that `project` depends on `dependency`, adding both if needed.
	pub fn add_dependency(&mut self, project: ProjectId, dependency: ProjectId) {
		self.add_project(dependency.clone());
		self.add_project(project.clone());
		let deps = self.dependencies.entry(project).or_default();
		if !deps.contains(&dependency) {
			deps.push(dependency);
		}
	}

	pub fn projects(&self) -> &[ProjectId] {
		&self.order
	}

	/// Direct dependencies of `project`.
	pub fn dependencies_of(&self, project: &ProjectId) -> &[ProjectId] {
		self.dependencies.get(project).map(Vec::as_slice).unwrap_or_default()
	}

	/// Every project `project` depends on, directly or not.
	pub fn referenced(&self, project: &ProjectId) -> Vec<ProjectId> {
		self.walk(project, |graph, current| graph.dependencies_of(current).to_vec())
	}

	/// Every project that depends on `project`, directly or not.
	pub fn referencing(&self, project: &ProjectId) -> Vec<ProjectId> {
		self.walk(project, |graph, current| {
			graph
				.order
				.iter()
				.filter(|candidate| graph.dependencies_of(candidate).contains(current))
				.cloned()
				.collect()
		})
	}

	fn walk(&self, start: &ProjectId, next: impl Fn(&Self, &ProjectId) -> Vec<ProjectId>) -> Vec<ProjectId> {
		let mut seen = HashSet::from([start.clone()]);
		let mut queue = VecDeque::from([start.clone()]);
		let mut found = Vec::new();
		while let Some(current) = queue.pop_front() {
			for project in next(self, &current) {
				if seen.insert(project.clone()) {
					found.push(project.clone());
					queue.push_back(project);
				}
			}
		}
		found
	}

	/// Groups projects into build levels: every project's dependencies sit in
	/// earlier levels, so projects within one level may build concurrently.
	pub fn levels(&self) -> Result<Vec<Vec<ProjectId>>, DependencyCycle> {
		let mut remaining: Vec<&ProjectId> = self.order.iter().collect();
		let mut placed: HashSet<&ProjectId> = HashSet::new();
		let mut levels = Vec::new();

		while !remaining.is_empty() {
			let (ready, blocked): (Vec<_>, Vec<_>) = remaining
				.into_iter()
				.partition(|project| self.dependencies_of(project).iter().all(|dep| placed.contains(dep)));
			if ready.is_empty() {
				return Err(DependencyCycle(blocked[0].clone()));
			}
			placed.extend(ready.iter().copied());
			levels.push(ready.into_iter().cloned().collect());
			remaining = blocked;
		}
		Ok(levels)
	}

	/// Build context for `project` within a pass building `pass` projects.
	pub fn context(&self, project: &ProjectId, pass: &[ProjectId]) -> GraphBuildContext {
		let in_pass = |candidate: &ProjectId| pass.contains(candidate);
		let configs = |projects: Vec<ProjectId>| -> Vec<BuildConfiguration> {
			projects
				.into_iter()
				.filter(|candidate| in_pass(candidate))
				.map(BuildConfiguration::default_for)
				.collect()
		};
		GraphBuildContext {
			referenced: configs(self.referenced(project)),
			referencing: configs(self.referencing(project)),
		}
	}
}

/// A [`BuildContext`] computed from a [`DependencyGraph`].
#[derive(Debug, Clone, Default)]
pub struct GraphBuildContext {
	pub referenced: Vec<BuildConfiguration>,
	pub referencing: Vec<BuildConfiguration>,
}

impl BuildContext for GraphBuildContext {
	fn referenced_configs(&self) -> Vec<BuildConfiguration> {
		self.referenced.clone()
	}

	fn referencing_configs(&self) -> Vec<BuildConfiguration> {
		self.referencing.clone()
	}
}
