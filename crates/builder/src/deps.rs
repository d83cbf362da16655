//! First/last-of-kind checks over the build pass dependency view.
//!
//! These only decide when the shared build session is opened and closed. A
//! wrong answer costs an extra session or keeps one alive a little longer;
//! build results are unaffected.

use crate::host::{BuildConfiguration, BuildContext, Workspace};

fn none_of_kind(configs: &[BuildConfiguration], workspace: &dyn Workspace, nature: &str) -> bool {
	!configs.iter().any(|config| workspace.has_nature(&config.project, nature))
}

/// True when nothing the current build depends on carries `nature`.
pub fn is_first_of_kind(context: &dyn BuildContext, workspace: &dyn Workspace, nature: &str) -> bool {
	none_of_kind(&context.referenced_configs(), workspace, nature)
}

/// True when nothing depending on the current build carries `nature`.
pub fn is_last_of_kind(context: &dyn BuildContext, workspace: &dyn Workspace, nature: &str) -> bool {
	none_of_kind(&context.referencing_configs(), workspace, nature)
}
