use std::fmt;

use parking_lot::Mutex;

/// Which stream of a tool process a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
	Stdout,
	Stderr,
}

impl OutputStream {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Stdout => "stdout",
			Self::Stderr => "stderr",
		}
	}
}

/// User-facing message sink for a tool operation (the build console).
///
/// One instance is shared by every project built during a workspace build
/// session, so implementations must tolerate concurrent writers.
pub trait ToolOperationMonitor: Send + Sync + fmt::Debug {
	/// Writes an informational message, such as a start banner.
	fn write_info_message(&self, message: &str);

	/// Writes an error message.
	fn write_error_message(&self, message: &str) {
		self.write_info_message(message);
	}

	/// Writes one line of tool process output.
	fn write_process_output(&self, stream: OutputStream, line: &str) {
		match stream {
			OutputStream::Stdout => self.write_info_message(line),
			OutputStream::Stderr => self.write_error_message(line),
		}
	}
}

/// Console monitor that forwards to `tracing` and keeps a transcript.
#[derive(Debug)]
pub struct ConsoleMonitor {
	name: String,
	transcript: Mutex<Vec<String>>,
}

impl ConsoleMonitor {
	/// Creates a console labelled `name` in log output.
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			transcript: Mutex::new(Vec::new()),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Returns every line written so far.
	pub fn transcript(&self) -> Vec<String> {
		self.transcript.lock().clone()
	}

	fn record(&self, message: &str) {
		self.transcript.lock().extend(message.lines().map(str::to_owned));
	}
}

impl ToolOperationMonitor for ConsoleMonitor {
	fn write_info_message(&self, message: &str) {
		tracing::info!(target: "kiln::console", console = %self.name, "{message}");
		self.record(message);
	}

	fn write_error_message(&self, message: &str) {
		tracing::warn!(target: "kiln::console", console = %self.name, "{message}");
		self.record(message);
	}

	fn write_process_output(&self, stream: OutputStream, line: &str) {
		tracing::debug!(target: "kiln::console", console = %self.name, stream = stream.as_str(), "{line}");
		self.record(line);
	}
}
