use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::event_log::EventLog;
use crate::logs;
use crate::process::HandleStatus;
use crate::types::BuildResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
	pub changes: u64,
	pub builds: u64,
	pub failed_builds: u64,
	pub starts: u64,
	pub replacements: u64,
	pub failed_replacements: u64,
	pub crashes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildSummary {
	pub succeeded: bool,
	pub exit_status: Option<i32>,
	pub duration_ms: u64,
	pub finished_at: String,
}

impl From<&BuildResult> for BuildSummary {
	fn from(result: &BuildResult) -> Self {
		Self {
			succeeded: result.succeeded,
			exit_status: result.exit_status,
			duration_ms: result.duration().as_millis() as u64,
			finished_at: logs::format_timestamp(result.finished_at),
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
	pub bind_address: String,
	pub server: Option<HandleStatus>,
	pub stats: LoopStats,
	pub last_build: Option<BuildSummary>,
}

/// Shared view of the loop for readers outside it. The loop writes after every
/// transition; readers never change anything.
#[derive(Clone)]
pub struct StatusBoard {
	snapshot: Arc<RwLock<StatusSnapshot>>,
	log: EventLog,
}

impl StatusBoard {
	pub fn new(log: EventLog) -> Self {
		Self {
			snapshot: Arc::new(RwLock::new(StatusSnapshot::default())),
			log,
		}
	}

	pub async fn publish(&self, snapshot: StatusSnapshot) {
		*self.snapshot.write().await = snapshot;
	}

	pub async fn snapshot(&self) -> StatusSnapshot {
		self.snapshot.read().await.clone()
	}

	pub fn log(&self) -> &EventLog {
		&self.log
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::ProcessState;
	use std::path::PathBuf;
	use std::time::{Duration, SystemTime};

	#[tokio::test]
	async fn publish_replaces_snapshot() {
		let board = StatusBoard::new(EventLog::memory(10));
		assert_eq!(board.snapshot().await, StatusSnapshot::default());

		let mut stats = LoopStats::default();
		stats.builds = 3;
		stats.failed_builds = 1;
		board
			.publish(StatusSnapshot {
				bind_address: "127.0.0.1:8080".into(),
				server: None,
				stats,
				last_build: None,
			})
			.await;

		let snapshot = board.snapshot().await;
		assert_eq!(snapshot.bind_address, "127.0.0.1:8080");
		assert_eq!(snapshot.stats.failed_builds, 1);
	}

	#[test]
	fn snapshot_json_shape() {
		let started = SystemTime::UNIX_EPOCH + Duration::from_secs(1771027200);
		let build = BuildResult {
			started_at: started,
			finished_at: started + Duration::from_millis(1500),
			exit_status: Some(0),
			succeeded: true,
		};
		let snapshot = StatusSnapshot {
			bind_address: "127.0.0.1:8080".into(),
			server: Some(HandleStatus {
				pid: 4242,
				bind_address: "127.0.0.1:8080".into(),
				artifact: PathBuf::from("target/release/server"),
				state: ProcessState::Crashed { exit_code: Some(101) },
				started_at: "2026-02-14 00:00:00".into(),
				started_at_secs: 1771027200,
			}),
			stats: LoopStats::default(),
			last_build: Some(BuildSummary::from(&build)),
		};

		let json = serde_json::to_value(&snapshot).unwrap();
		assert_eq!(json["server"]["pid"], 4242);
		assert_eq!(json["server"]["state"], "crashed");
		assert_eq!(json["server"]["exit_code"], 101);
		assert_eq!(json["last_build"]["duration_ms"], 1500);
		assert_eq!(json["last_build"]["finished_at"], "2026-02-14 00:00:01");
		assert_eq!(json["stats"]["crashes"], 0);
	}
}
