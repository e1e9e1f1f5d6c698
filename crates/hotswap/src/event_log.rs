//! The supervisor's timeline: one `[timestamp] message` line per entry,
//! written to the log file and echoed to the console.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use owo_colors::OwoColorize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::logs;

pub const DEFAULT_TAIL: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
	pub timestamp: SystemTime,
	pub message: String,
}

impl LogEntry {
	pub fn line(&self) -> String {
		logs::format_line(self.timestamp, &self.message)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Console {
	Off,
	Plain,
	Color,
}

#[derive(Clone)]
pub struct EventLog {
	inner: Arc<Mutex<Inner>>,
}

struct Inner {
	file: Option<File>,
	console: Console,
	tail: VecDeque<LogEntry>,
	tail_cap: usize,
	last: Option<SystemTime>,
}

impl EventLog {
	/// Opens `path` for appending (creating parent directories).
	pub fn open(path: &Path, console: bool, tail: usize) -> io::Result<Self> {
		if let Some(parent) = path.parent() {
			if !parent.as_os_str().is_empty() {
				fs::create_dir_all(parent)?;
			}
		}
		let file = OpenOptions::new().create(true).append(true).open(path)?;

		let console = match (console, io::stdout().is_terminal()) {
			(false, _) => Console::Off,
			(true, true) => Console::Color,
			(true, false) => Console::Plain,
		};

		Ok(Self::with_parts(Some(file), console, tail))
	}

	/// No file, no console. Entries are only kept in the tail.
	pub fn memory(tail: usize) -> Self {
		Self::with_parts(None, Console::Off, tail)
	}

	fn with_parts(file: Option<File>, console: Console, tail: usize) -> Self {
		let tail_cap = tail.max(1);
		Self {
			inner: Arc::new(Mutex::new(Inner {
				file,
				console,
				tail: VecDeque::with_capacity(tail_cap.min(DEFAULT_TAIL)),
				tail_cap,
				last: None,
			})),
		}
	}

	pub fn info(&self, message: impl Into<String>) {
		self.append(message.into(), false);
	}

	pub fn error(&self, message: impl Into<String>) {
		self.append(message.into(), true);
	}

	/// Most recent entries, oldest first.
	pub fn entries(&self) -> Vec<LogEntry> {
		self.lock().tail.iter().cloned().collect()
	}

	pub fn count_matching(&self, needle: &str) -> usize {
		self.lock()
			.tail
			.iter()
			.filter(|e| e.message.contains(needle))
			.count()
	}

	fn lock(&self) -> MutexGuard<'_, Inner> {
		self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	fn append(&self, message: String, is_error: bool) {
		let mut inner = self.lock();

		// The clock may step backwards; entries may not.
		let now = SystemTime::now();
		let timestamp = match inner.last {
			Some(last) if last > now => last,
			_ => now,
		};
		inner.last = Some(timestamp);

		let entry = LogEntry { timestamp, message };
		let line = entry.line();

		if let Some(ref mut file) = inner.file {
			if let Err(e) = writeln!(file, "{}", line) {
				tracing::warn!("failed to write event log: {}", e);
			}
		}

		if inner.console != Console::Off {
			let stdout = io::stdout();
			if let Err(e) = write_console(&mut stdout.lock(), inner.console, &entry, is_error) {
				tracing::warn!("failed to write event log to console: {}", e);
			}
		}

		if inner.tail.len() >= inner.tail_cap {
			inner.tail.pop_front();
		}
		inner.tail.push_back(entry);
	}
}

fn write_console(out: &mut impl Write, console: Console, entry: &LogEntry, is_error: bool) -> io::Result<()> {
	match console {
		Console::Off => Ok(()),
		Console::Plain => writeln!(out, "{}", entry.line()),
		Console::Color => {
			let stamp = format!("[{}]", logs::format_timestamp(entry.timestamp));
			if is_error {
				writeln!(out, "{} {}", stamp.dimmed(), entry.message.red())
			} else {
				writeln!(out, "{} {}", stamp.dimmed(), entry.message)
			}
		}
	}
}

/// Forwards a child's output into the log, one entry per line.
pub(crate) async fn pipe_lines<R: AsyncRead + Unpin>(reader: R, log: EventLog, prefix: String) {
	let mut reader = BufReader::new(reader);
	let mut buf = Vec::with_capacity(256);
	loop {
		buf.clear();
		match reader.read_until(b'\n', &mut buf).await {
			Ok(0) => break,
			Ok(_) => {
				let text = String::from_utf8_lossy(&buf);
				let text = text.trim_end_matches(['\n', '\r']);
				log.info(format!("{}{}", prefix, text));
			}
			Err(_) => break,
		}
	}
}
