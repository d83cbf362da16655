//! `kiln.toml` workspace configuration.
//!
//! Describes the language being built, its build and clean commands, and the
//! projects with their dependencies:
//!
//! ```toml
//! [language]
//! name = "Lang"
//! nature = "org.kiln.lang.nature"
//! problem-marker = "org.kiln.lang.problem"
//!
//! [language.build]
//! command = "make"
//! args = ["all"]
//! full-args = ["-B"]
//!
//! [[project]]
//! name = "core"
//! path = "core"
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use kiln_ops::CommonError;
use serde::Deserialize;
use thiserror::Error;

use crate::host::{Language, ProjectId};
use crate::memory::{DependencyCycle, DependencyGraph, MemoryWorkspace};
use crate::tool::ProcessSpec;

/// Errors from loading or validating a workspace configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read {}: {source}", path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("failed to parse workspace config: {0}")]
	Parse(#[from] toml::de::Error),
	#[error("{0} must not be empty")]
	Empty(&'static str),
	#[error("project `{0}` is defined more than once")]
	DuplicateProject(String),
	#[error("project `{project}` depends on unknown project `{dependency}`")]
	UnknownDependency { project: String, dependency: String },
	#[error(transparent)]
	Cycle(#[from] DependencyCycle),
}

/// A tool invocation template.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CommandConfig {
	pub command: PathBuf,
	#[serde(default)]
	pub args: Vec<String>,
	/// Appended when a full rebuild is requested.
	#[serde(default)]
	pub full_args: Vec<String>,
	/// Appended when verbose output is requested.
	#[serde(default)]
	pub verbose_args: Vec<String>,
	#[serde(default)]
	pub env: BTreeMap<String, String>,
}

/// The `[language]` table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct LanguageConfig {
	/// Display name used in console banners.
	pub name: String,
	/// Nature id carried by projects of this language.
	pub nature: String,
	/// Marker type of build problems.
	pub problem_marker: String,
	pub build: CommandConfig,
	pub clean: Option<CommandConfig>,
}

/// One `[[project]]` entry.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ProjectConfig {
	pub name: String,
	/// Relative to the directory holding the config file.
	pub path: PathBuf,
	/// Defaults to the language's nature when empty.
	#[serde(default)]
	pub natures: Vec<String>,
	#[serde(default)]
	pub depends_on: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
	language: LanguageConfig,
	#[serde(default, rename = "project")]
	projects: Vec<ProjectConfig>,
}

/// A validated workspace configuration.
#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
	/// Directory project paths are resolved against.
	pub root: PathBuf,
	pub language: LanguageConfig,
	pub projects: Vec<ProjectConfig>,
}

impl WorkspaceConfig {
	pub const FILE_NAME: &'static str = "kiln.toml";

	/// Reads and validates the config at `path`. Project paths resolve
	/// against the file's directory.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		let root = path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
		Self::from_toml_str(&text, root)
	}

	pub fn from_toml_str(text: &str, root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
		let raw: RawConfig = toml::from_str(text)?;
		let config = Self {
			root: root.into(),
			language: raw.language,
			projects: raw.projects,
		};
		config.validate()?;
		Ok(config)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.language.name.is_empty() {
			return Err(ConfigError::Empty("language name"));
		}
		if self.language.nature.is_empty() {
			return Err(ConfigError::Empty("language nature"));
		}

		let mut names = HashSet::new();
		for project in &self.projects {
			if project.name.is_empty() {
				return Err(ConfigError::Empty("project name"));
			}
			if !names.insert(project.name.as_str()) {
				return Err(ConfigError::DuplicateProject(project.name.clone()));
			}
		}
		for project in &self.projects {
			if let Some(dependency) = project.depends_on.iter().find(|dep| !names.contains(dep.as_str())) {
				return Err(ConfigError::UnknownDependency {
					project: project.name.clone(),
					dependency: dependency.clone(),
				});
			}
		}

		self.dependency_graph().levels()?;
		Ok(())
	}

	pub fn project(&self, name: &str) -> Option<&ProjectConfig> {
		self.projects.iter().find(|project| project.name == name)
	}

	pub fn project_location(&self, project: &ProjectConfig) -> PathBuf {
		self.root.join(&project.path)
	}

	/// Natures of `project`, falling back to the language's own.
	pub fn natures_of(&self, project: &ProjectConfig) -> Vec<String> {
		if project.natures.is_empty() {
			vec![self.language.nature.clone()]
		} else {
			project.natures.clone()
		}
	}

	/// In-memory workspace holding every configured project.
	pub fn workspace(&self) -> MemoryWorkspace {
		let workspace = MemoryWorkspace::new();
		for project in &self.projects {
			workspace.add_project(ProjectId::new(project.name.as_str()), self.project_location(project), self.natures_of(project));
		}
		workspace
	}

	/// Dependency graph in declaration order.
	pub fn dependency_graph(&self) -> DependencyGraph {
		let mut graph = DependencyGraph::new();
		for project in &self.projects {
			graph.add_project(ProjectId::new(project.name.as_str()));
		}
		for project in &self.projects {
			for dependency in &project.depends_on {
				graph.add_dependency(ProjectId::new(project.name.as_str()), ProjectId::new(dependency.as_str()));
			}
		}
		graph
	}

	pub fn toolchain(&self) -> ToolchainLanguage {
		ToolchainLanguage::new(self.language.clone())
	}
}

/// [`Language`] whose commands come from a [`LanguageConfig`].
///
/// Tool processes run in the project directory with `KILN_PROJECT` set to
/// the project name.
#[derive(Debug, Clone)]
pub struct ToolchainLanguage {
	config: LanguageConfig,
}

impl ToolchainLanguage {
	pub fn new(config: LanguageConfig) -> Self {
		Self { config }
	}
}

fn command_spec(command: &CommandConfig, project: &ProjectId, location: &Path) -> ProcessSpec {
	let mut spec = ProcessSpec::new(&command.command)
		.args(&command.args)
		.cwd(location)
		.env("KILN_PROJECT", project.as_str());
	for (key, value) in &command.env {
		spec = spec.env(key, value);
	}
	spec
}

impl Language for ToolchainLanguage {
	fn name(&self) -> &str {
		&self.config.name
	}

	fn nature_id(&self) -> &str {
		&self.config.nature
	}

	fn build_problem_id(&self) -> &str {
		&self.config.problem_marker
	}

	fn build_command(&self, project: &ProjectId, location: &Path, full_rebuild: bool, verbose: bool) -> Result<ProcessSpec, CommonError> {
		let build = &self.config.build;
		let mut spec = command_spec(build, project, location);
		if full_rebuild {
			spec = spec.args(&build.full_args);
		}
		if verbose {
			spec = spec.args(&build.verbose_args);
		}
		Ok(spec)
	}

	fn clean_command(&self, project: &ProjectId, location: &Path) -> Result<ProcessSpec, CommonError> {
		let clean = self
			.config
			.clean
			.as_ref()
			.ok_or_else(|| CommonError::new(format!("language `{}` has no clean command", self.config.name)))?;
		Ok(command_spec(clean, project, location))
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;
	use crate::host::Workspace;

	const SAMPLE: &str = r#"
[language]
name = "Lang"
nature = "org.kiln.lang.nature"
problem-marker = "org.kiln.lang.problem"

[language.build]
command = "make"
args = ["all"]
full-args = ["-B"]
verbose-args = ["V=1"]

[language.clean]
command = "make"
args = ["clean"]

[[project]]
name = "core"
path = "core"

[[project]]
name = "app"
path = "app"
natures = ["org.kiln.lang.nature", "org.kiln.docs.nature"]
depends-on = ["core"]
"#;

	fn sample() -> WorkspaceConfig {
		WorkspaceConfig::from_toml_str(SAMPLE, "/ws").unwrap()
	}

	#[test]
	fn parses_sample() {
		let config = sample();
		assert_eq!(config.language.name, "Lang");
		assert_eq!(config.projects.len(), 2);
		assert_eq!(config.project("app").unwrap().depends_on, vec!["core"]);
		assert_eq!(config.natures_of(config.project("core").unwrap()), vec!["org.kiln.lang.nature"]);
	}

	#[test]
	fn builds_workspace_and_graph() {
		let config = sample();
		let workspace = config.workspace();
		let app = ProjectId::new("app");
		assert_eq!(workspace.project_location(&app).unwrap(), PathBuf::from("/ws/app"));
		assert!(workspace.has_nature(&app, "org.kiln.docs.nature"));

		let levels = config.dependency_graph().levels().unwrap();
		assert_eq!(levels, vec![vec![ProjectId::new("core")], vec![app]]);
	}

	#[test]
	fn build_command_appends_requested_args() {
		let language = sample().toolchain();
		let project = ProjectId::new("core");
		let plain = language.build_command(&project, Path::new("/ws/core"), false, false).unwrap();
		assert_eq!(plain.command_line(), "make all");
		assert_eq!(plain.cwd, Some(PathBuf::from("/ws/core")));

		let full = language.build_command(&project, Path::new("/ws/core"), true, true).unwrap();
		assert_eq!(full.command_line(), "make all -B V=1");
		assert_eq!(full.env.get(std::ffi::OsStr::new("KILN_PROJECT")).unwrap(), "core");
	}

	#[test]
	fn missing_clean_command_is_an_error() {
		let text = SAMPLE.replace("[language.clean]\ncommand = \"make\"\nargs = [\"clean\"]\n", "");
		let language = WorkspaceConfig::from_toml_str(&text, "/ws").unwrap().toolchain();
		let err = language.clean_command(&ProjectId::new("core"), Path::new("/ws/core")).unwrap_err();
		assert!(err.message().contains("no clean command"));
	}

	#[test]
	fn rejects_unknown_dependency() {
		let text = SAMPLE.replace("depends-on = [\"core\"]", "depends-on = [\"corr\"]");
		let err = WorkspaceConfig::from_toml_str(&text, "/ws").unwrap_err();
		assert!(matches!(err, ConfigError::UnknownDependency { ref dependency, .. } if dependency == "corr"));
	}

	#[test]
	fn rejects_duplicates_and_cycles() {
		let duplicate = format!("{SAMPLE}\n[[project]]\nname = \"core\"\npath = \"other\"\n");
		assert!(matches!(WorkspaceConfig::from_toml_str(&duplicate, "/ws"), Err(ConfigError::DuplicateProject(_))));

		let cycle = SAMPLE.replace("name = \"core\"\npath = \"core\"", "name = \"core\"\npath = \"core\"\ndepends-on = [\"app\"]");
		assert!(matches!(WorkspaceConfig::from_toml_str(&cycle, "/ws"), Err(ConfigError::Cycle(_))));
	}

	#[test]
	fn rejects_unknown_keys() {
		let text = SAMPLE.replace("path = \"core\"", "path = \"core\"\nflavour = \"spicy\"");
		assert!(matches!(WorkspaceConfig::from_toml_str(&text, "/ws"), Err(ConfigError::Parse(_))));
	}

	#[test]
	fn load_resolves_paths_against_file_directory() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join(WorkspaceConfig::FILE_NAME);
		std::fs::write(&path, SAMPLE).unwrap();

		let config = WorkspaceConfig::load(&path).unwrap();
		assert_eq!(config.root, dir.path());
		assert_eq!(config.project_location(config.project("core").unwrap()), dir.path().join("core"));

		let missing = WorkspaceConfig::load(&dir.path().join("nope.toml")).unwrap_err();
		assert!(matches!(missing, ConfigError::Io { .. }));
	}
}
