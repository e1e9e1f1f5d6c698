use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

use nix::sys::signal::Signal;

use crate::builder::BuildStep;
use crate::error::{describe_status, Result, SupervisorError};
use crate::event_log::EventLog;
use crate::port;
use crate::process::{describe_exit, exit_code, HandleStatus, ProcessHandle, SignalOutcome};
use crate::types::{ProcessState, SwapStrategy};

/// Used for candidates when no stop timeout is configured; a candidate that
/// ignores SIGTERM must not stall the swap.
const CANDIDATE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ServerOptions {
	/// Working directory for the server process.
	pub dir: PathBuf,
	pub env: HashMap<String, String>,
	pub strategy: SwapStrategy,
	/// `None` waits for the server to exit however long it takes.
	pub stop_timeout: Option<Duration>,
	pub port_release_timeout: Duration,
	pub health_timeout: Duration,
}

impl Default for ServerOptions {
	fn default() -> Self {
		Self {
			dir: PathBuf::from("."),
			env: HashMap::new(),
			strategy: SwapStrategy::InPlace,
			stop_timeout: None,
			port_release_timeout: Duration::from_secs(5),
			health_timeout: Duration::from_secs(10),
		}
	}
}

enum Readiness {
	Listening,
	Exited(Option<ExitStatus>),
	Silent,
}

/// Owns at most one running server and is the only thing that signals it.
/// Dropping the supervisor drops the active handle, which kills the server.
pub struct ProcessSupervisor {
	active: Option<ProcessHandle>,
	options: ServerOptions,
	log: EventLog,
	starts: u64,
}

impl ProcessSupervisor {
	pub fn new(options: ServerOptions, log: EventLog) -> Self {
		Self {
			active: None,
			options,
			log,
			starts: 0,
		}
	}

	pub fn active(&self) -> Option<&ProcessHandle> {
		self.active.as_ref()
	}

	pub fn status(&self) -> Option<HandleStatus> {
		self.active.as_ref().map(|h| h.status())
	}

	/// Successful starts over the supervisor's lifetime.
	pub fn starts(&self) -> u64 {
		self.starts
	}

	/// Starts the artifact on `bind_address`. Refused while a live server is
	/// owned. If the spawn fails because the artifact does not exist yet,
	/// `fallback` is run once and the spawn retried. Failures are returned,
	/// not logged; the caller knows whether they are fatal.
	pub async fn start<B: BuildStep>(
		&mut self,
		artifact: &Path,
		bind_address: &str,
		fallback: &mut B,
	) -> Result<HandleStatus> {
		if let Some(handle) = self.active.as_ref().filter(|h| h.is_live()) {
			return Err(SupervisorError::AddressInUse {
				bind_address: handle.bind_address().to_string(),
				pid: handle.pid(),
			});
		}
		self.active = None;

		let addr = port::resolve(bind_address)?;
		if !port::is_bindable(addr) {
			return Err(self.startup_failure(
				bind_address,
				"address is held by a process this supervisor does not own".to_string(),
			));
		}

		let handle = match self.launch(artifact, bind_address, addr, false).await {
			Ok(handle) => handle,
			Err(err @ SupervisorError::Spawn { .. }) if !artifact.exists() => {
				self.log.error(format!(
					"{}; no artifact at {}, running fallback build",
					err,
					artifact.display()
				));
				let result = fallback.run().await;
				if !result.succeeded {
					return Err(self.startup_failure(
						bind_address,
						format!("fallback build failed ({})", describe_status(result.exit_status)),
					));
				}
				match self.launch(artifact, bind_address, addr, false).await {
					Ok(handle) => handle,
					Err(e) => return Err(self.startup_failure(bind_address, e.to_string())),
				}
			}
			Err(e) => return Err(self.startup_failure(bind_address, e.to_string())),
		};

		self.starts += 1;
		let status = handle.status();
		self.active = Some(handle);
		Ok(status)
	}

	/// Stops the active server, if any, and returns its final state.
	pub async fn stop(&mut self) -> Option<ProcessState> {
		let mut handle = self.active.take()?;
		if handle.is_live() {
			let pid = handle.pid();
			self.log.info(format!("stopping server pid {}", pid));
			handle.terminate(self.options.stop_timeout, &self.log).await;
			self.log.info(format!("server pid {} stopped", pid));
		}
		Some(handle.state())
	}

	/// Swaps the running server for one started from `artifact`.
	pub async fn replace<B: BuildStep>(
		&mut self,
		artifact: &Path,
		bind_address: &str,
		fallback: &mut B,
	) -> Result<HandleStatus> {
		match self.options.strategy {
			SwapStrategy::InPlace => self.replace_in_place(artifact, bind_address, fallback).await,
			SwapStrategy::BlueGreen => self.replace_blue_green(artifact, bind_address, fallback).await,
		}
	}

	/// Resolves when the active server exits without being asked to. Pending
	/// while no live server is owned. Cancel safe.
	pub async fn watch_exit(&mut self) -> HandleStatus {
		let Some(handle) = self.active.as_mut().filter(|h| h.is_live()) else {
			return std::future::pending().await;
		};
		let status = handle.exited().await;
		handle.state = ProcessState::Crashed {
			exit_code: exit_code(status),
		};
		let report = handle.status();
		self.active = None;

		self.log.error(format!(
			"server pid {} exited unexpectedly ({}); waiting for the next successful build",
			report.pid,
			describe_exit(status)
		));
		report
	}

	async fn replace_in_place<B: BuildStep>(
		&mut self,
		artifact: &Path,
		bind_address: &str,
		fallback: &mut B,
	) -> Result<HandleStatus> {
		let addr = port::resolve(bind_address)?;
		self.stop().await;

		if !port::wait_until_released(addr, self.options.port_release_timeout).await {
			let err = self.port_conflict(bind_address);
			self.log.error(format!("{}; no server is running", err));
			return Err(err);
		}

		self.start_replacement(artifact, bind_address, fallback).await
	}

	async fn replace_blue_green<B: BuildStep>(
		&mut self,
		artifact: &Path,
		bind_address: &str,
		fallback: &mut B,
	) -> Result<HandleStatus> {
		let Some(old_pid) = self.active.as_ref().filter(|h| h.is_live()).map(|h| h.pid()) else {
			return self.start_replacement(artifact, bind_address, fallback).await;
		};

		let addr = port::resolve(bind_address)?;
		let side = port::ephemeral_beside(addr).map_err(|e| SupervisorError::Unhealthy {
			address: bind_address.to_string(),
			reason: format!("no free side port: {}", e),
		})?;
		let side_address = side.to_string();

		self.log.info(format!("starting candidate on {}", side_address));
		let mut candidate = match self.launch(artifact, &side_address, side, true).await {
			Ok(candidate) => candidate,
			Err(e) => {
				self.log.error(format!("candidate rejected, keeping server pid {}: {}", old_pid, e));
				return Err(e);
			}
		};
		self.log.info(format!(
			"candidate pid {} healthy on {}",
			candidate.pid(),
			side_address
		));
		let grace = self.options.stop_timeout.unwrap_or(CANDIDATE_GRACE);
		candidate.terminate(Some(grace), &self.log).await;

		let Some(mut old) = self.active.take() else {
			return self.start_replacement(artifact, bind_address, fallback).await;
		};
		old.state = ProcessState::Stopping;
		self.log.info(format!("stopping server pid {}", old_pid));
		if let SignalOutcome::AlreadyGone = old.signal(Signal::SIGTERM) {
			self.log.info(format!("server pid {} was already gone", old_pid));
		}

		if !port::wait_until_released(addr, self.options.port_release_timeout).await {
			let err = self.port_conflict(bind_address);
			if old.try_exit().is_none() {
				old.state = ProcessState::Running;
				self.active = Some(old);
				self.log.error(format!(
					"{}; server pid {} was sent SIGTERM but is still alive, keeping it active (it may still exit)",
					err, old_pid
				));
			} else {
				old.state = ProcessState::Stopped;
				self.log.error(format!(
					"{} after server pid {} exited; no server is running",
					err, old_pid
				));
			}
			return Err(err);
		}

		old.terminate(self.options.stop_timeout, &self.log).await;
		self.log.info(format!("server pid {} stopped", old_pid));

		self.start_replacement(artifact, bind_address, fallback).await
	}

	async fn start_replacement<B: BuildStep>(
		&mut self,
		artifact: &Path,
		bind_address: &str,
		fallback: &mut B,
	) -> Result<HandleStatus> {
		let started = self.start(artifact, bind_address, fallback).await;
		if let Err(e) = &started {
			self.log.error(format!("replacement failed, no server is running: {}", e));
		}
		started
	}

	/// Spawns and waits until the server accepts connections, exits, or the
	/// health timeout passes. A silent server is accepted unless
	/// `require_listening` is set.
	async fn launch(
		&self,
		artifact: &Path,
		bind_address: &str,
		addr: SocketAddr,
		require_listening: bool,
	) -> Result<ProcessHandle> {
		let mut handle = ProcessHandle::spawn(
			artifact,
			bind_address,
			&self.options.dir,
			&self.options.env,
			&self.log,
		)
		.map_err(|source| SupervisorError::Spawn {
			artifact: artifact.to_path_buf(),
			source,
		})?;
		let pid = handle.pid();
		self.log.info(format!(
			"server pid {} starting: {} {}",
			pid,
			artifact.display(),
			bind_address
		));

		let timeout = self.options.health_timeout;
		let readiness = tokio::select! {
			status = handle.exited() => Readiness::Exited(status),
			listening = port::wait_until_listening(addr, timeout) => {
				if listening { Readiness::Listening } else { Readiness::Silent }
			}
		};

		match readiness {
			Readiness::Listening => {}
			Readiness::Exited(status) => {
				handle.state = ProcessState::Crashed {
					exit_code: exit_code(status),
				};
				return Err(SupervisorError::Unhealthy {
					address: bind_address.to_string(),
					reason: format!("pid {} exited during startup ({})", pid, describe_exit(status)),
				});
			}
			Readiness::Silent if require_listening => {
				handle.terminate(Some(CANDIDATE_GRACE), &self.log).await;
				return Err(SupervisorError::Unhealthy {
					address: bind_address.to_string(),
					reason: format!(
						"pid {} not accepting connections after {:.1}s",
						pid,
						timeout.as_secs_f64()
					),
				});
			}
			Readiness::Silent => {
				self.log.error(format!(
					"server pid {} not accepting connections on {} after {:.1}s, leaving it running",
					pid,
					bind_address,
					timeout.as_secs_f64()
				));
			}
		}

		handle.state = ProcessState::Running;
		self.log.info(format!("server pid {} running on {}", pid, bind_address));
		Ok(handle)
	}

	fn startup_failure(&self, bind_address: &str, reason: String) -> SupervisorError {
		SupervisorError::StartupFailure {
			bind_address: bind_address.to_string(),
			reason,
		}
	}

	fn port_conflict(&self, bind_address: &str) -> SupervisorError {
		SupervisorError::PortConflict {
			bind_address: bind_address.to_string(),
			waited_ms: self.options.port_release_timeout.as_millis() as u64,
		}
	}
}
