//! Project build orchestration.
//!
//! A host build pass calls [`ProjectBuilder::build`] once per project, in
//! dependency order. Projects of one language share a [`BuildSession`] for
//! the pass: the first build opens it, the last one (or the next build
//! boundary event) closes it.
//!
//! The host's resource model, dependency graph and tool processes are
//! reached through the traits in [`host`]. [`memory`], [`tool`] and
//! [`manager`] implement them in-process, and [`config`] wires everything up
//! from a `kiln.toml` file.

pub mod builder;
pub mod config;
pub mod deps;
mod error;
pub mod events;
pub mod host;
pub mod manager;
pub mod memory;
pub mod session;
pub mod tool;

#[cfg(test)]
mod testing;

pub use builder::{BuildArgs, BuildKind, BuildPhase, BuildServices, IncrementalBuilder, ProjectBuilder, Termination};
pub use config::{ConfigError, ToolchainLanguage, WorkspaceConfig};
pub use error::{BuildError, BuildOutcome, Result};
pub use host::{BuildConfiguration, BuildContext, BuildManager, Language, ProjectId, ToolManager, Workspace, WorkspaceEvent};
pub use manager::CommandBuildManager;
pub use memory::{DependencyGraph, MemoryWorkspace};
pub use session::{BuildSession, SessionId, SessionRegistry};
pub use tool::{ProcessSpec, ProcessToolManager};
