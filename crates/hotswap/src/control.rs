use std::future::Future;
use std::path::PathBuf;

use crate::builder::BuildStep;
use crate::error::{describe_status, Result, SupervisorError, WatchError};
use crate::event_log::EventLog;
use crate::process::HandleStatus;
use crate::status::{BuildSummary, LoopStats, StatusBoard, StatusSnapshot};
use crate::supervisor::ProcessSupervisor;
use crate::types::{BuildResult, ChangeEvent};
use crate::watcher::ChangeSource;

#[derive(Debug, Clone)]
pub struct LoopSettings {
	pub artifact: PathBuf,
	pub bind_address: String,
	/// Collapse events that queued up during a build into the next cycle.
	pub drain_pending: bool,
}

/// What one pass through the loop did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cycle {
	Replaced(HandleStatus),
	ReplaceFailed,
	BuildFailed,
	ServerExited(HandleStatus),
	/// The watch timeout passed with no change.
	Idle,
}

/// Initial build, initial start, then rebuild-and-replace for every change.
/// Builds and swaps run one at a time on the caller's task.
pub struct SupervisorLoop<B, W> {
	builder: B,
	watcher: W,
	processes: ProcessSupervisor,
	settings: LoopSettings,
	log: EventLog,
	stats: LoopStats,
	last_build: Option<BuildSummary>,
	board: Option<StatusBoard>,
}

impl<B: BuildStep, W: ChangeSource> SupervisorLoop<B, W> {
	pub fn new(
		builder: B,
		watcher: W,
		processes: ProcessSupervisor,
		settings: LoopSettings,
		log: EventLog,
	) -> Self {
		Self {
			builder,
			watcher,
			processes,
			settings,
			log,
			stats: LoopStats::default(),
			last_build: None,
			board: None,
		}
	}

	pub fn with_status(mut self, board: StatusBoard) -> Self {
		self.board = Some(board);
		self
	}

	pub fn stats(&self) -> LoopStats {
		self.stats
	}

	pub fn processes(&self) -> &ProcessSupervisor {
		&self.processes
	}

	pub fn builder(&self) -> &B {
		&self.builder
	}

	/// Builds and starts the first server. Any failure here is fatal.
	pub async fn startup(&mut self) -> Result<HandleStatus> {
		let result = self.build().await;
		if !result.succeeded {
			self.log.error(format!(
				"initial build failed ({}), aborting startup",
				describe_status(result.exit_status)
			));
			self.publish().await;
			return Err(SupervisorError::BuildFailure {
				exit_status: result.exit_status,
			});
		}

		let started = self
			.processes
			.start(&self.settings.artifact, &self.settings.bind_address, &mut self.builder)
			.await;
		let status = match started {
			Ok(status) => status,
			Err(e) => {
				let err = match e {
					err @ SupervisorError::StartupFailure { .. } => err,
					other => SupervisorError::StartupFailure {
						bind_address: self.settings.bind_address.clone(),
						reason: other.to_string(),
					},
				};
				self.log.error(format!("{}, aborting startup", err));
				self.publish().await;
				return Err(err);
			}
		};

		self.stats.starts = self.processes.starts();
		self.publish().await;
		Ok(status)
	}

	/// Waits for one change (or a server exit) and acts on it. Only watcher
	/// failures are returned as errors.
	pub async fn cycle(&mut self) -> Result<Cycle> {
		let event = tokio::select! {
			event = self.watcher.wait() => event,
			crashed = self.processes.watch_exit() => {
				self.stats.crashes += 1;
				self.publish().await;
				return Ok(Cycle::ServerExited(crashed));
			}
		};

		let change = match event {
			Ok(change) => change,
			Err(WatchError::TimedOut) => {
				tracing::debug!("watch timeout elapsed without changes");
				return Ok(Cycle::Idle);
			}
			Err(e) => {
				self.log.error(format!("{}, shutting down", e));
				return Err(e.into());
			}
		};
		self.on_change(&change);

		let result = self.build().await;
		if !result.succeeded {
			self.log.error("build failed, server not restarted");
			self.publish().await;
			return Ok(Cycle::BuildFailed);
		}

		let replaced = self
			.processes
			.replace(&self.settings.artifact, &self.settings.bind_address, &mut self.builder)
			.await;
		let outcome = match replaced {
			Ok(status) => {
				self.stats.replacements += 1;
				self.stats.starts = self.processes.starts();
				Cycle::Replaced(status)
			}
			Err(_) => {
				self.stats.failed_replacements += 1;
				Cycle::ReplaceFailed
			}
		};
		self.publish().await;
		Ok(outcome)
	}

	pub async fn run(&mut self) -> Result<()> {
		self.startup().await?;
		loop {
			self.cycle().await?;
		}
	}

	/// Runs until `shutdown` resolves or a fatal error occurs, then stops the
	/// server. Returns `Ok` only for a requested shutdown.
	pub async fn run_until<F: Future<Output = ()>>(&mut self, shutdown: F) -> Result<()> {
		let outcome = tokio::select! {
			result = self.run() => Some(result),
			_ = shutdown => None,
		};

		let result = match outcome {
			Some(Err(e)) => Err(e),
			Some(Ok(())) | None => {
				self.log.info("shutdown requested");
				Ok(())
			}
		};

		if self.processes.stop().await.is_some() {
			self.publish().await;
		}
		result
	}

	fn on_change(&mut self, change: &ChangeEvent) {
		self.stats.changes += 1;
		self.log.info(format!("change detected: {}", change.describe()));

		if self.settings.drain_pending {
			let drained = self.watcher.drain();
			if drained > 0 {
				self.stats.changes += drained as u64;
				self.log.info(format!("{} more queued changes folded into this build", drained));
			}
		}
	}

	async fn build(&mut self) -> BuildResult {
		let result = self.builder.run().await;
		self.stats.builds += 1;
		if !result.succeeded {
			self.stats.failed_builds += 1;
		}
		self.last_build = Some(BuildSummary::from(&result));
		result
	}

	async fn publish(&self) {
		let Some(board) = &self.board else {
			return;
		};
		board
			.publish(StatusSnapshot {
				bind_address: self.settings.bind_address.clone(),
				server: self.processes.status(),
				stats: self.stats,
				last_build: self.last_build.clone(),
			})
			.await;
	}
}
