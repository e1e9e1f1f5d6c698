use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, SystemTime};

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use tokio::process::{Child, Command};

use crate::event_log::{pipe_lines, EventLog};
use crate::logs;
use crate::types::ProcessState;

/// Result of signalling a process group. Signalling a group that no longer
/// exists is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
	Delivered,
	AlreadyGone,
	Failed(Errno),
}

pub fn signal_group(pid: u32, signal: Signal) -> SignalOutcome {
	match killpg(Pid::from_raw(pid as i32), signal) {
		Ok(()) => SignalOutcome::Delivered,
		Err(Errno::ESRCH) => SignalOutcome::AlreadyGone,
		Err(e) => SignalOutcome::Failed(e),
	}
}

/// Point-in-time view of a handle, safe to hand out and serialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandleStatus {
	pub pid: u32,
	pub bind_address: String,
	pub artifact: PathBuf,
	#[serde(flatten)]
	pub state: ProcessState,
	pub started_at: String,
	pub started_at_secs: u64,
}

/// One spawned server. Owned by the [`crate::ProcessSupervisor`]; nothing else
/// signals or reaps it.
pub struct ProcessHandle {
	pid: u32,
	bind_address: String,
	artifact: PathBuf,
	started_at: SystemTime,
	pub(crate) state: ProcessState,
	child: Child,
}

impl ProcessHandle {
	/// Spawns `artifact bind_address` in its own process group with its output
	/// forwarded into `log`.
	pub(crate) fn spawn(
		artifact: &Path,
		bind_address: &str,
		dir: &Path,
		env: &HashMap<String, String>,
		log: &EventLog,
	) -> std::io::Result<Self> {
		let mut cmd = Command::new(artifact);
		cmd.arg(bind_address)
			.current_dir(dir)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.process_group(0);

		for (key, val) in env {
			cmd.env(key, val);
		}

		let mut child = cmd.spawn()?;
		let pid = child.id().unwrap_or(0);
		let prefix = format!("[pid {}] ", pid);

		if let Some(stdout) = child.stdout.take() {
			tokio::spawn(pipe_lines(stdout, log.clone(), prefix.clone()));
		}
		if let Some(stderr) = child.stderr.take() {
			tokio::spawn(pipe_lines(stderr, log.clone(), prefix));
		}

		Ok(Self {
			pid,
			bind_address: bind_address.to_string(),
			artifact: artifact.to_path_buf(),
			started_at: SystemTime::now(),
			state: ProcessState::Starting,
			child,
		})
	}

	pub fn pid(&self) -> u32 {
		self.pid
	}

	pub fn bind_address(&self) -> &str {
		&self.bind_address
	}

	pub fn state(&self) -> ProcessState {
		self.state
	}

	pub fn is_live(&self) -> bool {
		self.state.is_live()
	}

	pub fn status(&self) -> HandleStatus {
		HandleStatus {
			pid: self.pid,
			bind_address: self.bind_address.clone(),
			artifact: self.artifact.clone(),
			state: self.state,
			started_at: logs::format_timestamp(self.started_at),
			started_at_secs: logs::epoch_secs(self.started_at),
		}
	}

	pub(crate) fn signal(&self, signal: Signal) -> SignalOutcome {
		signal_group(self.pid, signal)
	}

	/// Non-blocking exit check; reaps the child if it has exited.
	pub(crate) fn try_exit(&mut self) -> Option<ExitStatus> {
		self.child.try_wait().ok().flatten()
	}

	/// Waits for the child to exit and reaps it. Cancel safe.
	pub(crate) async fn exited(&mut self) -> Option<ExitStatus> {
		self.child.wait().await.ok()
	}

	/// SIGTERM, then wait for exit. With a timeout, escalates to SIGKILL once
	/// it elapses. Leaves the handle Stopped.
	pub(crate) async fn terminate(&mut self, timeout: Option<Duration>, log: &EventLog) {
		if let Some(status) = self.try_exit() {
			tracing::debug!(pid = self.pid, ?status, "server had already exited");
			self.state = ProcessState::Stopped;
			return;
		}
		self.state = ProcessState::Stopping;

		match self.signal(Signal::SIGTERM) {
			SignalOutcome::Delivered => {}
			SignalOutcome::AlreadyGone => {
				log.info(format!("server pid {} was already gone", self.pid));
			}
			SignalOutcome::Failed(e) => {
				log.info(format!("could not signal server pid {}: {}", self.pid, e));
			}
		}

		let status = match timeout {
			None => self.exited().await,
			Some(limit) => match tokio::time::timeout(limit, self.child.wait()).await {
				Ok(status) => status.ok(),
				Err(_) => {
					log.error(format!(
						"server pid {} ignored SIGTERM for {:.1}s, sending SIGKILL",
						self.pid,
						limit.as_secs_f64()
					));
					let _ = self.signal(Signal::SIGKILL);
					let _ = self.child.start_kill();
					self.exited().await
				}
			},
		};

		tracing::debug!(pid = self.pid, ?status, "server reaped");
		self.state = ProcessState::Stopped;
	}

}

/// A handle dropped while its server may still be alive (shutdown in the
/// middle of a start or swap, supervisor teardown) takes the whole process
/// group down with it. The child is left to tokio's orphan reaper.
impl Drop for ProcessHandle {
	fn drop(&mut self) {
		if self.state.is_live() {
			tracing::debug!(pid = self.pid, state = ?self.state, "killing abandoned server");
			let _ = self.signal(Signal::SIGKILL);
			let _ = self.child.start_kill();
			self.state = ProcessState::Stopped;
		}
	}
}

pub(crate) fn exit_code(status: Option<ExitStatus>) -> Option<i32> {
	status.and_then(|s| s.code())
}

pub(crate) fn describe_exit(status: Option<ExitStatus>) -> String {
	use std::os::unix::process::ExitStatusExt;
	match status {
		Some(s) => match (s.code(), s.signal()) {
			(Some(code), _) => format!("exit {}", code),
			(None, Some(sig)) => format!("signal {}", sig),
			_ => "unknown status".to_string(),
		},
		None => "status unavailable".to_string(),
	}
}
