//! Error types.
//!
//! A failed build is not an error here: it is a [`crate::BuildResult`] with
//! `succeeded == false`, and the loop decides what it means. Stop failures are
//! swallowed at the signal call site.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = SupervisorError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum SupervisorError {
	/// The very first build did not succeed.
	#[error("initial build failed ({})", describe_status(*.exit_status))]
	BuildFailure { exit_status: Option<i32> },

	#[error("failed to spawn {}: {source}", .artifact.display())]
	Spawn {
		artifact: PathBuf,
		#[source]
		source: std::io::Error,
	},

	/// Neither the spawn nor the fallback rebuild produced a running server.
	#[error("could not start server on {bind_address}: {reason}")]
	StartupFailure { bind_address: String, reason: String },

	#[error("{bind_address} is already owned by live server pid {pid}")]
	AddressInUse { bind_address: String, pid: u32 },

	#[error("candidate on {address} failed its health check: {reason}")]
	Unhealthy { address: String, reason: String },

	#[error("port {bind_address} still in use after {waited_ms}ms")]
	PortConflict { bind_address: String, waited_ms: u64 },

	#[error("invalid bind address '{0}'")]
	InvalidAddress(String),

	#[error(transparent)]
	Watch(#[from] WatchError),
}

#[derive(Error, Debug)]
pub enum WatchError {
	#[error("file watcher error: {0}")]
	Notify(#[from] notify::Error),

	#[error("watch root {} does not exist", .0.display())]
	MissingRoot(PathBuf),

	#[error("file watcher stopped delivering events")]
	Closed,

	/// Only returned when a watch timeout is configured.
	#[error("no change within the watch timeout")]
	TimedOut,
}

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("failed to read {}: {source}", .path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse {}: {source}", .path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("invalid configuration: {0}")]
	Invalid(String),
}

pub(crate) fn describe_status(status: Option<i32>) -> String {
	match status {
		Some(code) => format!("exit {}", code),
		None => "no exit status".to_string(),
	}
}
