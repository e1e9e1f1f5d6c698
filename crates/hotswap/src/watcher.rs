//! Filesystem change trigger.
//!
//! notify delivers events on its own thread; they are bridged into an
//! unbounded tokio channel and filtered against the [`WatchSpec`] when the
//! loop asks for the next one. Nothing is debounced: every relevant event is
//! one rebuild unless the caller drains the backlog.

use std::future::Future;
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::WatchError;
use crate::event_log::EventLog;
use crate::types::{ChangeEvent, ChangeKind, WatchSpec};

/// Source of change notifications for the loop.
pub trait ChangeSource {
	/// Blocks until a relevant change has happened.
	fn wait(&mut self) -> impl Future<Output = Result<ChangeEvent, WatchError>> + Send;

	/// Discards changes that are already queued; returns how many were relevant.
	fn drain(&mut self) -> usize;
}

pub struct ChangeWatcher {
	spec: WatchSpec,
	rx: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
	// Dropping the watcher stops event delivery.
	_watcher: RecommendedWatcher,
	timeout: Option<Duration>,
	log: EventLog,
}

impl ChangeWatcher {
	/// Starts watching immediately, so changes made while the caller runs its
	/// initial build are queued rather than lost.
	pub fn new(spec: WatchSpec, log: EventLog) -> Result<Self, WatchError> {
		let root = spec
			.root()
			.canonicalize()
			.map_err(|_| WatchError::MissingRoot(spec.root().to_path_buf()))?;
		let spec = spec.with_root(root);

		let (tx, rx) = mpsc::unbounded_channel();
		let mut watcher = notify::recommended_watcher(move |res| {
			let _ = tx.send(res);
		})?;

		let mode = if spec.recursive() {
			RecursiveMode::Recursive
		} else {
			RecursiveMode::NonRecursive
		};
		watcher.watch(spec.root(), mode)?;

		Ok(Self {
			spec,
			rx,
			_watcher: watcher,
			timeout: None,
			log,
		})
	}

	pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn spec(&self) -> &WatchSpec {
		&self.spec
	}

	async fn next_relevant(&mut self) -> Result<ChangeEvent, WatchError> {
		loop {
			match self.rx.recv().await {
				None => return Err(WatchError::Closed),
				Some(Err(e)) => self.log.error(format!("watch error: {}", e)),
				Some(Ok(event)) => match classify(&self.spec, &event) {
					Some(change) => return Ok(change),
					None => tracing::debug!(kind = ?event.kind, paths = ?event.paths, "ignored fs event"),
				},
			}
		}
	}
}

impl ChangeSource for ChangeWatcher {
	async fn wait(&mut self) -> Result<ChangeEvent, WatchError> {
		match self.timeout {
			None => self.next_relevant().await,
			Some(limit) => tokio::time::timeout(limit, self.next_relevant())
				.await
				.unwrap_or(Err(WatchError::TimedOut)),
		}
	}

	fn drain(&mut self) -> usize {
		let mut relevant = 0;
		while let Ok(res) = self.rx.try_recv() {
			if let Ok(event) = res {
				if classify(&self.spec, &event).is_some() {
					relevant += 1;
				}
			}
		}
		relevant
	}
}

/// Maps a notify event onto the mask. Access events never count; an event
/// whose every path is excluded is dropped.
pub fn classify(spec: &WatchSpec, event: &notify::Event) -> Option<ChangeEvent> {
	let kind = match event.kind {
		EventKind::Create(_) => ChangeKind::Create,
		EventKind::Modify(ModifyKind::Name(_)) => ChangeKind::Move,
		EventKind::Modify(_) | EventKind::Any => ChangeKind::Modify,
		EventKind::Remove(_) => ChangeKind::Delete,
		EventKind::Access(_) | EventKind::Other => return None,
	};

	if !spec.mask().contains(kind) {
		return None;
	}
	if !event.paths.is_empty() && event.paths.iter().all(|p| spec.is_excluded(p)) {
		return None;
	}

	Some(ChangeEvent {
		kind,
		paths: event.paths.clone(),
	})
}
