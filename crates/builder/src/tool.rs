//! External build tool processes.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kiln_ops::{CommonError, ConsoleMonitor, OpError, OpResult, OperationMonitor, OutputStream, ToolOperationMonitor};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::host::{ProcessOperation, ToolManager};

/// Number of trailing stderr lines quoted in a failure message.
const STDERR_TAIL: usize = 10;

/// How long output is still read once the tool has exited.
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Describes a tool process to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
	pub program: PathBuf,
	pub args: Vec<OsString>,
	pub cwd: Option<PathBuf>,
	pub env: BTreeMap<OsString, OsString>,
}

impl ProcessSpec {
	pub fn new(program: impl Into<PathBuf>) -> Self {
		Self {
			program: program.into(),
			args: Vec::new(),
			cwd: None,
			env: BTreeMap::new(),
		}
	}

	pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
		self.args.push(arg.into());
		self
	}

	pub fn args<I, S>(mut self, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<OsString>,
	{
		self.args.extend(args.into_iter().map(Into::into));
		self
	}

	pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
		self.cwd = Some(cwd.into());
		self
	}

	pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
		self.env.insert(key.into(), value.into());
		self
	}

	/// Human-readable command line for console output.
	pub fn command_line(&self) -> String {
		let mut line = self.program.display().to_string();
		for arg in &self.args {
			line.push(' ');
			line.push_str(&arg.to_string_lossy());
		}
		line
	}
}

/// Captured result of a finished tool process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
	pub status: ExitStatus,
	pub stdout: Vec<String>,
	pub stderr: Vec<String>,
}

/// Runs one [`ProcessSpec`], streaming its output to a console.
///
/// The child is killed if the monitor is cancelled or the future is dropped.
#[derive(Debug)]
pub struct RunToolOperation {
	spec: ProcessSpec,
	console: Arc<dyn ToolOperationMonitor>,
}

impl RunToolOperation {
	pub fn new(spec: ProcessSpec, console: Arc<dyn ToolOperationMonitor>) -> Self {
		Self { spec, console }
	}

	fn command(&self) -> Command {
		let mut cmd = Command::new(&self.spec.program);
		cmd.args(&self.spec.args)
			.envs(&self.spec.env)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);
		if let Some(cwd) = &self.spec.cwd {
			cmd.current_dir(cwd);
		}
		cmd
	}
}

type Lines = Arc<Mutex<Vec<String>>>;

enum Drain {
	Finished,
	Cancelled,
	TimedOut,
}

/// Forwards lines from a child pipe to the console, collecting them.
///
/// Reads until EOF whatever the encoding, so the child never writes into a
/// closed pipe. Invalid UTF-8 is replaced.
fn pump<R>(reader: Option<R>, stream: OutputStream, console: Arc<dyn ToolOperationMonitor>, collected: Lines) -> JoinHandle<()>
where
	R: AsyncRead + Unpin + Send + 'static,
{
	tokio::spawn(async move {
		let Some(reader) = reader else {
			return;
		};
		let mut reader = BufReader::new(reader);
		let mut buf = Vec::new();
		loop {
			buf.clear();
			match reader.read_until(b'\n', &mut buf).await {
				Ok(0) => break,
				Ok(_) => {
					let line = String::from_utf8_lossy(&buf);
					let line = line.trim_end_matches(['\n', '\r']);
					console.write_process_output(stream, line);
					collected.lock().push(line.to_owned());
				}
				Err(e) => {
					debug!(stream = stream.as_str(), error = %e, "tool output pipe closed");
					break;
				}
			}
		}
	})
}

#[async_trait]
impl ProcessOperation for RunToolOperation {
	async fn run_process(&self, monitor: &OperationMonitor) -> OpResult<ProcessOutput> {
		monitor.check_cancelled()?;

		let command_line = self.spec.command_line();
		self.console.write_info_message(&format!(">> Running: {command_line}"));

		let mut child = self
			.command()
			.spawn()
			.map_err(|e| CommonError::with_source(format!("could not start `{}`", self.spec.program.display()), e))?;
		debug!(command = %command_line, pid = child.id(), "tool process started");

		let stdout_lines = Lines::default();
		let stderr_lines = Lines::default();
		let mut stdout = pump(child.stdout.take(), OutputStream::Stdout, Arc::clone(&self.console), Arc::clone(&stdout_lines));
		let mut stderr = pump(child.stderr.take(), OutputStream::Stderr, Arc::clone(&self.console), Arc::clone(&stderr_lines));

		let waited = tokio::select! {
			biased;
			_ = monitor.cancelled() => None,
			status = child.wait() => Some(status),
		};
		let Some(status) = waited else {
			if let Err(e) = child.kill().await {
				warn!(command = %command_line, error = %e, "failed to kill cancelled tool process");
			}
			stdout.abort();
			stderr.abort();
			return Err(OpError::Cancelled);
		};
		let status = status.map_err(|e| CommonError::with_source(format!("failed waiting for `{command_line}`"), e))?;

		// Background jobs of the tool may hold the pipes open after it exits.
		let drain = async {
			let _ = (&mut stdout).await;
			let _ = (&mut stderr).await;
		};
		let drained = tokio::select! {
			biased;
			_ = monitor.cancelled() => Drain::Cancelled,
			_ = drain => Drain::Finished,
			_ = tokio::time::sleep(PIPE_DRAIN_TIMEOUT) => Drain::TimedOut,
		};
		stdout.abort();
		stderr.abort();
		match drained {
			Drain::Finished => {}
			Drain::Cancelled => return Err(OpError::Cancelled),
			Drain::TimedOut => debug!(command = %command_line, "tool output still open after exit, stopped reading"),
		}

		let stdout = std::mem::take(&mut *stdout_lines.lock());
		let stderr = std::mem::take(&mut *stderr_lines.lock());

		if !status.success() {
			let tail_start = stderr.len().saturating_sub(STDERR_TAIL);
			let mut message = format!("`{command_line}` failed ({status})");
			for line in &stderr[tail_start..] {
				message.push('\n');
				message.push_str(line);
			}
			self.console.write_error_message(&message);
			return Err(CommonError::new(message).into());
		}

		Ok(ProcessOutput { status, stdout, stderr })
	}
}

/// [`ToolManager`] that runs real subprocesses.
#[derive(Debug)]
pub struct ProcessToolManager {
	required_tool: Option<PathBuf>,
	console: Arc<ConsoleMonitor>,
}

impl Default for ProcessToolManager {
	fn default() -> Self {
		Self::new()
	}
}

impl ProcessToolManager {
	pub fn new() -> Self {
		Self {
			required_tool: None,
			console: Arc::new(ConsoleMonitor::new("tools")),
		}
	}

	/// Refuses to start build operations unless `program` can be found.
	pub fn with_required_tool(mut self, program: impl Into<PathBuf>) -> Self {
		self.required_tool = Some(program.into());
		self
	}

	/// Console used by tool operations started without a session.
	pub fn console(&self) -> &Arc<ConsoleMonitor> {
		&self.console
	}

	fn locate(program: &Path) -> Result<PathBuf, CommonError> {
		which::which(program).map_err(|e| CommonError::with_source(format!("build tool `{}` is not available", program.display()), e))
	}
}

#[async_trait]
impl ToolManager for ProcessToolManager {
	async fn start_new_build_operation(&self) -> Result<Arc<dyn ToolOperationMonitor>, CommonError> {
		if let Some(program) = &self.required_tool {
			let found = Self::locate(program)?;
			debug!(tool = %found.display(), "build tool located");
		}
		Ok(Arc::new(ConsoleMonitor::new("build")))
	}

	fn new_run_build_tool_operation(&self, spec: ProcessSpec, console: Option<Arc<dyn ToolOperationMonitor>>) -> Box<dyn ProcessOperation> {
		let console = console.unwrap_or_else(|| Arc::clone(&self.console) as Arc<dyn ToolOperationMonitor>);
		Box::new(RunToolOperation::new(spec, console))
	}
}
