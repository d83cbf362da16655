//! Fakes shared by the unit tests.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use kiln_ops::{CommonError, CommonOperation, ConsoleMonitor, OpError, OpResult, OperationMonitor, ToolOperationMonitor};
use parking_lot::Mutex;

use crate::host::{BuildManager, Depth, Language, ProcessOperation, ProjectId, ToolManager, Workspace};
use crate::tool::{ProcessOutput, ProcessSpec};

pub const NATURE: &str = "org.kiln.lang.nature";
pub const PROBLEM: &str = "org.kiln.lang.problem";

/// Language with fixed ids and trivial commands.
#[derive(Debug, Default)]
pub struct FakeLanguage {
	pub no_clean: bool,
}

impl Language for FakeLanguage {
	fn name(&self) -> &str {
		"Lang"
	}

	fn nature_id(&self) -> &str {
		NATURE
	}

	fn build_problem_id(&self) -> &str {
		PROBLEM
	}

	fn build_command(&self, _project: &ProjectId, _location: &Path, _full_rebuild: bool, _verbose: bool) -> Result<ProcessSpec, CommonError> {
		Ok(ProcessSpec::new("langc").arg("build"))
	}

	fn clean_command(&self, _project: &ProjectId, _location: &Path) -> Result<ProcessSpec, CommonError> {
		if self.no_clean {
			return Err(CommonError::new("no clean command configured"));
		}
		Ok(ProcessSpec::new("langc").arg("clean"))
	}
}

/// How a fake process or build step finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Step {
	#[default]
	Succeed,
	Fail,
	/// Returns `OpError::Cancelled` without touching the monitor.
	Cancel,
	/// Cancels the monitor, then reports an ordinary failure.
	FailAfterCancel,
	/// Blocks until the monitor is cancelled.
	WaitForCancel,
	Panic,
}

impl Step {
	async fn run(self, monitor: &OperationMonitor) -> OpResult {
		match self {
			Self::Succeed => Ok(()),
			Self::Fail => Err(CommonError::new("tool exited with status 1").into()),
			Self::Cancel => Err(OpError::Cancelled),
			Self::FailAfterCancel => {
				monitor.cancel();
				Err(CommonError::new("tool killed").into())
			}
			Self::WaitForCancel => {
				monitor.cancelled().await;
				Err(OpError::Cancelled)
			}
			Self::Panic => panic!("build tool crashed"),
		}
	}
}

/// Tool manager recording every start and process request.
#[derive(Debug, Default)]
pub struct FakeTools {
	pub starts: AtomicUsize,
	pub fail_start: bool,
	pub start_delay: Option<Duration>,
	pub process_step: Step,
	pub processes: Mutex<Vec<ProcessSpec>>,
	pub consoles: Mutex<Vec<Arc<ConsoleMonitor>>>,
}

impl FakeTools {
	pub fn starts(&self) -> usize {
		self.starts.load(Ordering::SeqCst)
	}

	/// Transcript of the console handed out by the `index`th start.
	pub fn transcript(&self, index: usize) -> Vec<String> {
		self.consoles.lock()[index].transcript()
	}
}

struct FakeProcess {
	step: Step,
}

#[async_trait]
impl ProcessOperation for FakeProcess {
	async fn run_process(&self, monitor: &OperationMonitor) -> OpResult<ProcessOutput> {
		self.step.run(monitor).await?;
		Ok(ProcessOutput {
			status: success(),
			stdout: Vec::new(),
			stderr: Vec::new(),
		})
	}
}

#[cfg(unix)]
fn success() -> std::process::ExitStatus {
	use std::os::unix::process::ExitStatusExt;
	std::process::ExitStatus::from_raw(0)
}

#[cfg(windows)]
fn success() -> std::process::ExitStatus {
	use std::os::windows::process::ExitStatusExt;
	std::process::ExitStatus::from_raw(0)
}

#[async_trait]
impl ToolManager for FakeTools {
	async fn start_new_build_operation(&self) -> Result<Arc<dyn ToolOperationMonitor>, CommonError> {
		self.starts.fetch_add(1, Ordering::SeqCst);
		if let Some(delay) = self.start_delay {
			tokio::time::sleep(delay).await;
		}
		if self.fail_start {
			return Err(CommonError::new("build tool not found"));
		}
		let console = Arc::new(ConsoleMonitor::new("fake"));
		self.consoles.lock().push(Arc::clone(&console));
		Ok(console)
	}

	fn new_run_build_tool_operation(&self, spec: ProcessSpec, _console: Option<Arc<dyn ToolOperationMonitor>>) -> Box<dyn ProcessOperation> {
		self.processes.lock().push(spec);
		Box::new(FakeProcess { step: self.process_step })
	}
}

/// Build manager whose operations act on a workspace and record what ran.
pub struct FakeBuildManager {
	pub workspace: Arc<dyn Workspace>,
	pub build_step: Mutex<Step>,
	pub log: Arc<Mutex<Vec<String>>>,
	pub build_ops_created: AtomicUsize,
}

impl FakeBuildManager {
	pub fn new(workspace: Arc<dyn Workspace>) -> Self {
		Self {
			workspace,
			build_step: Mutex::new(Step::Succeed),
			log: Arc::default(),
			build_ops_created: AtomicUsize::new(0),
		}
	}

	pub fn set_build_step(&self, step: Step) {
		*self.build_step.lock() = step;
	}

	pub fn log(&self) -> Vec<String> {
		self.log.lock().clone()
	}

	pub fn build_ops_created(&self) -> usize {
		self.build_ops_created.load(Ordering::SeqCst)
	}
}

struct FakeClear {
	workspace: Arc<dyn Workspace>,
	project: ProjectId,
	log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl CommonOperation for FakeClear {
	async fn execute(&self, monitor: &OperationMonitor) -> OpResult {
		monitor.check_cancelled()?;
		self.workspace.delete_markers(&self.project, PROBLEM, Depth::Infinite)?;
		self.log.lock().push(format!("clear:{}", self.project));
		Ok(())
	}
}

struct FakeBuild {
	project: ProjectId,
	step: Step,
	log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl CommonOperation for FakeBuild {
	async fn execute(&self, monitor: &OperationMonitor) -> OpResult {
		self.log.lock().push(format!("build:{}", self.project));
		self.step.run(monitor).await
	}
}

impl BuildManager for FakeBuildManager {
	fn new_project_clear_markers_operation(&self, _console: Arc<dyn ToolOperationMonitor>, project: &ProjectId) -> Box<dyn CommonOperation> {
		Box::new(FakeClear {
			workspace: Arc::clone(&self.workspace),
			project: project.clone(),
			log: Arc::clone(&self.log),
		})
	}

	fn new_project_build_operation(
		&self,
		_console: Arc<dyn ToolOperationMonitor>,
		project: &ProjectId,
		full_rebuild: bool,
		verbose: bool,
	) -> Result<Box<dyn CommonOperation>, CommonError> {
		assert!(!full_rebuild && !verbose, "builder always requests a plain build");
		self.build_ops_created.fetch_add(1, Ordering::SeqCst);
		Ok(Box::new(FakeBuild {
			project: project.clone(),
			step: *self.build_step.lock(),
			log: Arc::clone(&self.log),
		}))
	}
}
