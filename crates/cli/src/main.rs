//! kiln command line driver.
//!
//! Loads a `kiln.toml` workspace and runs build or clean passes over it.
//! Ctrl-C cancels the running pass; tool processes are killed and the pass
//! reports as cancelled.

mod pass;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kiln_builder::{BuildKind, WorkspaceConfig};
use kiln_ops::OperationMonitor;
use tracing::{info, warn};

use crate::pass::{PassReport, WorkspacePass};

/// kiln command line arguments.
#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(about = "Build projects of a kiln.toml workspace in dependency order")]
struct Args {
	/// Workspace configuration file
	#[arg(short, long, value_name = "PATH", default_value = WorkspaceConfig::FILE_NAME)]
	config: PathBuf,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
	/// Build projects and everything they depend on
	Build {
		/// Request a full rebuild
		#[arg(long)]
		full: bool,
		/// Projects to build; all when empty
		projects: Vec<String>,
	},
	/// Clean projects
	Clean {
		/// Projects to clean; all when empty
		projects: Vec<String>,
	},
	/// Print build levels
	Order,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
	let args = Args::parse();

	setup_tracing(args.verbose);

	let config = WorkspaceConfig::load(&args.config).with_context(|| format!("loading {}", args.config.display()))?;
	info!(config = %args.config.display(), projects = config.projects.len(), "workspace loaded");

	let pass = WorkspacePass::new(&config);
	let monitor = OperationMonitor::new();
	spawn_ctrl_c_handler(monitor.clone());

	let report = match args.command {
		Command::Build { full, projects } => {
			let selection = pass.select(&projects, true)?;
			let kind = if full { BuildKind::Full } else { BuildKind::Incremental };
			pass.build(&selection, kind, &monitor).await?
		}
		Command::Clean { projects } => {
			let selection = pass.select(&projects, false)?;
			pass.clean(&selection, &monitor).await
		}
		Command::Order => {
			for (index, level) in pass.graph().levels()?.iter().enumerate() {
				let names: Vec<_> = level.iter().map(|project| project.as_str()).collect();
				println!("{index}: {}", names.join(" "));
			}
			return Ok(ExitCode::SUCCESS);
		}
	};

	let leftover = pass.shutdown();
	if leftover > 0 {
		warn!(sessions = leftover, "closed build sessions left open by the pass");
	}

	print_summary(&report);
	Ok(if report.is_success() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn spawn_ctrl_c_handler(monitor: OperationMonitor) {
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			warn!("interrupt received, cancelling");
			monitor.cancel();
		}
	});
}

fn print_summary(report: &PassReport) {
	for (project, error) in &report.failed {
		eprintln!("error: {project}: {error}");
	}
	for project in &report.skipped {
		eprintln!("skipped: {project}");
	}
	if report.cancelled {
		eprintln!("cancelled");
	}
	println!(
		"{} succeeded, {} failed, {} skipped",
		report.completed.len(),
		report.failed.len(),
		report.skipped.len()
	);
}

fn setup_tracing(verbose: bool) {
	use std::fs::OpenOptions;

	use tracing_subscriber::EnvFilter;
	use tracing_subscriber::fmt::format::FmtSpan;
	use tracing_subscriber::prelude::*;

	let filter = || {
		EnvFilter::try_from_env("KILN_LOG")
			.or_else(|_| EnvFilter::try_from_default_env())
			.unwrap_or_else(|_| {
				if verbose {
					EnvFilter::new("kiln=debug,kiln_builder=debug,kiln_ops=debug,info")
				} else {
					EnvFilter::new("kiln=info,kiln_builder=info,kiln_ops=info,warn")
				}
			})
	};

	// KILN_LOG_DIR sends logs to a per-process file instead of stderr.
	if let Some(log_dir) = std::env::var("KILN_LOG_DIR").ok().map(PathBuf::from)
		&& std::fs::create_dir_all(&log_dir).is_ok()
	{
		let log_path = log_dir.join(format!("kiln.{}.log", std::process::id()));
		if let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) {
			let file_layer = tracing_subscriber::fmt::layer()
				.with_writer(file)
				.with_ansi(false)
				.with_span_events(FmtSpan::CLOSE)
				.with_target(true);
			tracing_subscriber::registry().with(filter()).with(file_layer).init();
			tracing::info!(path = ?log_path, "kiln tracing initialized");
			return;
		}
	}

	tracing_subscriber::fmt()
		.with_env_filter(filter())
		.with_writer(std::io::stderr)
		.with_target(verbose)
		.init();
}
