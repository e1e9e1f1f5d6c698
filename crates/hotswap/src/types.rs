use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
	Create,
	Modify,
	Delete,
	Move,
}

impl ChangeKind {
	pub const ALL: [ChangeKind; 4] = [
		ChangeKind::Create,
		ChangeKind::Modify,
		ChangeKind::Delete,
		ChangeKind::Move,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			ChangeKind::Create => "create",
			ChangeKind::Modify => "modify",
			ChangeKind::Delete => "delete",
			ChangeKind::Move => "move",
		}
	}
}

/// Which kinds of filesystem events wake the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventMask {
	pub create: bool,
	pub modify: bool,
	pub delete: bool,
	pub moved: bool,
}

impl EventMask {
	pub const ALL: EventMask = EventMask {
		create: true,
		modify: true,
		delete: true,
		moved: true,
	};

	pub fn from_kinds(kinds: &[ChangeKind]) -> Self {
		let mut mask = EventMask::default();
		for kind in kinds {
			match kind {
				ChangeKind::Create => mask.create = true,
				ChangeKind::Modify => mask.modify = true,
				ChangeKind::Delete => mask.delete = true,
				ChangeKind::Move => mask.moved = true,
			}
		}
		mask
	}

	pub fn contains(&self, kind: ChangeKind) -> bool {
		match kind {
			ChangeKind::Create => self.create,
			ChangeKind::Modify => self.modify,
			ChangeKind::Delete => self.delete,
			ChangeKind::Move => self.moved,
		}
	}

	pub fn is_empty(&self) -> bool {
		!(self.create || self.modify || self.delete || self.moved)
	}
}

/// What to watch. Fixed once built; the watcher never mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSpec {
	root: PathBuf,
	recursive: bool,
	mask: EventMask,
	exclude: Vec<PathBuf>,
}

impl WatchSpec {
	pub fn new(root: impl Into<PathBuf>, recursive: bool, mask: EventMask) -> Self {
		Self {
			root: root.into(),
			recursive,
			mask,
			exclude: Vec::new(),
		}
	}

	pub fn with_exclude(mut self, exclude: Vec<PathBuf>) -> Self {
		self.exclude = exclude;
		self
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn recursive(&self) -> bool {
		self.recursive
	}

	pub fn mask(&self) -> EventMask {
		self.mask
	}

	/// Relative prefixes are taken relative to the watch root.
	pub fn is_excluded(&self, path: &Path) -> bool {
		self.exclude.iter().any(|prefix| {
			if prefix.is_absolute() {
				path.starts_with(prefix)
			} else {
				path.starts_with(self.root.join(prefix)) || path.starts_with(prefix)
			}
		})
	}

	pub(crate) fn with_root(&self, root: PathBuf) -> Self {
		Self {
			root,
			recursive: self.recursive,
			mask: self.mask,
			exclude: self.exclude.clone(),
		}
	}
}

/// One wake-up of the watcher. The loop only cares that it happened; the
/// kind and paths are carried along for the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
	pub kind: ChangeKind,
	pub paths: Vec<PathBuf>,
}

impl ChangeEvent {
	pub fn new(kind: ChangeKind) -> Self {
		Self {
			kind,
			paths: Vec::new(),
		}
	}

	pub fn describe(&self) -> String {
		match self.paths.first() {
			Some(path) if self.paths.len() > 1 => format!(
				"{} {} (+{} more)",
				self.kind.as_str(),
				path.display(),
				self.paths.len() - 1
			),
			Some(path) => format!("{} {}", self.kind.as_str(), path.display()),
			None => self.kind.as_str().to_string(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
	pub started_at: SystemTime,
	pub finished_at: SystemTime,
	/// `None` when the tool never produced a status: launch failure, signal, timeout.
	pub exit_status: Option<i32>,
	pub succeeded: bool,
}

impl BuildResult {
	pub fn finished(started_at: SystemTime, exit_status: Option<i32>, succeeded: bool) -> Self {
		let finished_at = SystemTime::now().max(started_at);
		Self {
			started_at,
			finished_at,
			exit_status,
			succeeded,
		}
	}

	pub fn duration(&self) -> Duration {
		self.finished_at
			.duration_since(self.started_at)
			.unwrap_or_default()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProcessState {
	Starting,
	Running,
	Stopping,
	Stopped,
	Crashed { exit_code: Option<i32> },
}

impl ProcessState {
	pub fn is_running(&self) -> bool {
		matches!(self, ProcessState::Running)
	}

	/// Starting, Running and Stopping all mean the process may still hold the port.
	pub fn is_live(&self) -> bool {
		matches!(
			self,
			ProcessState::Starting | ProcessState::Running | ProcessState::Stopping
		)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SwapStrategy {
	/// Stop the old server, wait for the port, start the new one.
	#[default]
	InPlace,
	/// Health-check the new artifact on a side port before touching the old server.
	BlueGreen,
}

impl SwapStrategy {
	pub fn as_str(&self) -> &'static str {
		match self {
			SwapStrategy::InPlace => "in-place",
			SwapStrategy::BlueGreen => "blue-green",
		}
	}
}

impl std::str::FromStr for SwapStrategy {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"in-place" | "inplace" => Ok(SwapStrategy::InPlace),
			"blue-green" | "bluegreen" => Ok(SwapStrategy::BlueGreen),
			other => Err(format!(
				"unknown strategy '{}' (expected in-place or blue-green)",
				other
			)),
		}
	}
}

impl std::fmt::Display for SwapStrategy {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn mask_from_kinds() {
		let mask = EventMask::from_kinds(&[ChangeKind::Create, ChangeKind::Move]);
		assert!(mask.contains(ChangeKind::Create));
		assert!(mask.contains(ChangeKind::Move));
		assert!(!mask.contains(ChangeKind::Modify));
		assert!(!mask.contains(ChangeKind::Delete));
		assert!(EventMask::from_kinds(&[]).is_empty());
		assert_eq!(EventMask::from_kinds(&ChangeKind::ALL), EventMask::ALL);
	}

	#[test]
	fn process_state_liveness() {
		assert!(ProcessState::Running.is_running());
		assert!(ProcessState::Starting.is_live());
		assert!(ProcessState::Stopping.is_live());
		assert!(!ProcessState::Stopped.is_live());
		assert!(!ProcessState::Crashed { exit_code: None }.is_running());
	}

	#[test]
	fn exclusion_is_relative_to_root() {
		let spec = WatchSpec::new("/srv/app/src", true, EventMask::ALL)
			.with_exclude(vec!["generated".into(), "/tmp/scratch".into()]);
		assert!(spec.is_excluded(Path::new("/srv/app/src/generated/schema.rs")));
		assert!(spec.is_excluded(Path::new("/tmp/scratch/a")));
		assert!(!spec.is_excluded(Path::new("/srv/app/src/main.rs")));
	}

	#[test]
	fn strategy_parses() {
		assert_eq!("in-place".parse::<SwapStrategy>(), Ok(SwapStrategy::InPlace));
		assert_eq!("blue-green".parse::<SwapStrategy>(), Ok(SwapStrategy::BlueGreen));
		assert!("rolling".parse::<SwapStrategy>().is_err());
	}

	#[test]
	fn change_event_description() {
		let mut event = ChangeEvent::new(ChangeKind::Modify);
		assert_eq!(event.describe(), "modify");
		event.paths = vec!["src/main.rs".into(), "src/lib.rs".into()];
		assert_eq!(event.describe(), "modify src/main.rs (+1 more)");
	}
}
