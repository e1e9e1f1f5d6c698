use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use nix::sys::signal::Signal;
use tokio::process::Command;

use crate::event_log::{pipe_lines, EventLog};
use crate::process::{describe_exit, signal_group};
use crate::types::BuildResult;

/// Drain time for build output after the tool exits.
const OUTPUT_GRACE: Duration = Duration::from_secs(1);

/// Produces a fresh artifact. Never fails: a broken build is a
/// [`BuildResult`] with `succeeded == false`.
pub trait BuildStep {
	fn run(&mut self) -> impl Future<Output = BuildResult> + Send;
}

/// Runs the configured build command through `sh -c` in the project directory.
///
/// Build tools are expected to replace the artifact (write-then-rename, or
/// unlink-then-create) rather than rewrite it in place, since the old artifact
/// is usually still executing.
pub struct BuildExecutor {
	command: String,
	dir: PathBuf,
	env: HashMap<String, String>,
	timeout: Option<Duration>,
	log: EventLog,
}

impl BuildExecutor {
	pub fn new(command: impl Into<String>, dir: impl Into<PathBuf>, log: EventLog) -> Self {
		Self {
			command: command.into(),
			dir: dir.into(),
			env: HashMap::new(),
			timeout: None,
			log,
		}
	}

	pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
		self.env = env;
		self
	}

	pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.timeout = timeout;
		self
	}

	async fn execute(&self) -> BuildResult {
		let started_at = SystemTime::now();
		self.log.info(format!("build started: {}", self.command));

		let mut cmd = Command::new("sh");
		cmd.args(["-c", &self.command])
			.current_dir(&self.dir)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.process_group(0)
			.kill_on_drop(true);

		for (key, val) in &self.env {
			cmd.env(key, val);
		}

		let mut child = match cmd.spawn() {
			Ok(c) => c,
			Err(e) => {
				self.log.error(format!("build tool could not be launched: {}", e));
				return BuildResult::finished(started_at, None, false);
			}
		};
		let pid = child.id();

		let mut pipes = Vec::new();
		if let Some(stdout) = child.stdout.take() {
			pipes.push(tokio::spawn(pipe_lines(stdout, self.log.clone(), "[build] ".into())));
		}
		if let Some(stderr) = child.stderr.take() {
			pipes.push(tokio::spawn(pipe_lines(stderr, self.log.clone(), "[build] ".into())));
		}

		let status = match self.timeout {
			None => child.wait().await,
			Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
				Ok(status) => status,
				Err(_) => {
					if let Some(pid) = pid {
						let _ = signal_group(pid, Signal::SIGKILL);
					}
					let _ = child.kill().await;
					self.log.error(format!(
						"build timed out after {:.1}s and was killed",
						limit.as_secs_f64()
					));
					return BuildResult::finished(started_at, None, false);
				}
			},
		};

		for pipe in pipes {
			let _ = tokio::time::timeout(OUTPUT_GRACE, pipe).await;
		}

		let status = match status {
			Ok(status) => status,
			Err(e) => {
				self.log.error(format!("build tool crashed: {}", e));
				return BuildResult::finished(started_at, None, false);
			}
		};
		let result = BuildResult::finished(started_at, status.code(), status.success());

		let secs = result.duration().as_secs_f64();
		if result.succeeded {
			self.log.info(format!("build finished in {:.2}s", secs));
		} else {
			self.log.error(format!(
				"build exited with {} after {:.2}s",
				describe_exit(Some(status)),
				secs
			));
		}
		result
	}
}

impl BuildStep for BuildExecutor {
	async fn run(&mut self) -> BuildResult {
		self.execute().await
	}
}
