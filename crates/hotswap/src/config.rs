use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::event_log::DEFAULT_TAIL;
use crate::logs::{self, DEFAULT_LOG_FILE};
use crate::control::LoopSettings;
use crate::supervisor::ServerOptions;
use crate::types::{ChangeKind, EventMask, SwapStrategy, WatchSpec};

pub const DEFAULT_CONFIG_FILE: &str = "hotswap.toml";

// ── hotswap.toml ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
	#[serde(default = "default_project_dir")]
	pub project_dir: PathBuf,
	#[serde(default = "default_bind")]
	pub bind: String,
	#[serde(default = "default_artifact")]
	pub artifact: PathBuf,
	#[serde(default)]
	pub build: BuildConfig,
	#[serde(default)]
	pub watch: WatchConfig,
	#[serde(default)]
	pub server: ServerConfig,
	#[serde(default)]
	pub log: LogConfig,
	#[serde(default)]
	pub status: StatusConfig,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			project_dir: default_project_dir(),
			bind: default_bind(),
			artifact: default_artifact(),
			build: BuildConfig::default(),
			watch: WatchConfig::default(),
			server: ServerConfig::default(),
			log: LogConfig::default(),
			status: StatusConfig::default(),
		}
	}
}

fn default_project_dir() -> PathBuf { PathBuf::from(".") }
fn default_bind() -> String { "127.0.0.1:8080".to_string() }
fn default_artifact() -> PathBuf { PathBuf::from("target/release/server") }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
	#[serde(default = "default_build_command")]
	pub command: String,
	pub timeout_secs: Option<u64>,
}

impl Default for BuildConfig {
	fn default() -> Self {
		Self { command: default_build_command(), timeout_secs: None }
	}
}

fn default_build_command() -> String { "cargo build --release".to_string() }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
	#[serde(default = "default_watch_root")]
	pub root: PathBuf,
	#[serde(default = "default_true")]
	pub recursive: bool,
	#[serde(default = "default_events")]
	pub events: Vec<ChangeKind>,
	#[serde(default)]
	pub exclude: Vec<PathBuf>,
	#[serde(default)]
	pub drain_pending: bool,
	pub timeout_secs: Option<u64>,
}

impl Default for WatchConfig {
	fn default() -> Self {
		Self {
			root: default_watch_root(),
			recursive: true,
			events: default_events(),
			exclude: Vec::new(),
			drain_pending: false,
			timeout_secs: None,
		}
	}
}

fn default_watch_root() -> PathBuf { PathBuf::from("src") }
fn default_true() -> bool { true }
fn default_events() -> Vec<ChangeKind> { ChangeKind::ALL.to_vec() }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
	#[serde(default)]
	pub strategy: SwapStrategy,
	pub stop_timeout_secs: Option<u64>,
	#[serde(default = "default_port_release_timeout")]
	pub port_release_timeout_ms: u64,
	#[serde(default = "default_health_timeout")]
	pub health_timeout_ms: u64,
	#[serde(default = "default_env")]
	pub env: HashMap<String, String>,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			strategy: SwapStrategy::default(),
			stop_timeout_secs: None,
			port_release_timeout_ms: default_port_release_timeout(),
			health_timeout_ms: default_health_timeout(),
			env: default_env(),
		}
	}
}

fn default_port_release_timeout() -> u64 { 5000 }
fn default_health_timeout() -> u64 { 10_000 }
fn default_env() -> HashMap<String, String> {
	let mut env = HashMap::new();
	env.insert("RUST_BACKTRACE".into(), "1".into());
	env
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
	#[serde(default = "default_log_file")]
	pub file: PathBuf,
	#[serde(default = "default_true")]
	pub console: bool,
	#[serde(default = "default_tail")]
	pub tail: usize,
}

impl Default for LogConfig {
	fn default() -> Self {
		Self { file: default_log_file(), console: true, tail: default_tail() }
	}
}

fn default_log_file() -> PathBuf { PathBuf::from(DEFAULT_LOG_FILE) }
fn default_tail() -> usize { DEFAULT_TAIL }

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusConfig {
	pub bind: Option<String>,
}

// ── loading ─────────────────────────────────────────────────────────────────

impl Config {
	/// Reads `path`, or `hotswap.toml` in the working directory when no path is
	/// given. A missing default file means defaults; a missing explicit file is
	/// an error.
	pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
		let (path, explicit) = match path {
			Some(p) => (p.to_path_buf(), true),
			None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
		};

		if !explicit && !path.exists() {
			return Ok(Config::default());
		}

		let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
			path: path.clone(),
			source,
		})?;
		Self::parse(&content, &path)
	}

	pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
		toml::from_str(content).map_err(|source| ConfigError::Parse {
			path: path.to_path_buf(),
			source,
		})
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		let Some((host, port)) = self.bind.rsplit_once(':') else {
			return Err(ConfigError::Invalid(format!(
				"bind '{}' must be host:port",
				self.bind
			)));
		};
		if host.is_empty() || port.parse::<u16>().is_err() {
			return Err(ConfigError::Invalid(format!(
				"bind '{}' must be host:port with a numeric port",
				self.bind
			)));
		}
		if self.build.command.trim().is_empty() {
			return Err(ConfigError::Invalid("build.command is empty".into()));
		}
		if self.watch.events.is_empty() {
			return Err(ConfigError::Invalid("watch.events selects no events".into()));
		}
		if let Some(bind) = &self.status.bind {
			if bind == &self.bind {
				return Err(ConfigError::Invalid(format!(
					"status.bind '{}' collides with the server address",
					bind
				)));
			}
		}
		Ok(())
	}

	pub fn to_toml(&self) -> String {
		toml::to_string_pretty(self).unwrap_or_default()
	}

	fn in_project(&self, path: &Path) -> PathBuf {
		if path.is_absolute() {
			path.to_path_buf()
		} else {
			self.project_dir.join(path)
		}
	}

	pub fn artifact_path(&self) -> PathBuf {
		self.in_project(&self.artifact)
	}

	pub fn log_path(&self) -> PathBuf {
		logs::resolve_log_path(&self.project_dir, &self.log.file)
	}

	pub fn watch_spec(&self) -> WatchSpec {
		WatchSpec::new(
			self.in_project(&self.watch.root),
			self.watch.recursive,
			EventMask::from_kinds(&self.watch.events),
		)
		.with_exclude(self.watch.exclude.clone())
	}

	pub fn build_timeout(&self) -> Option<Duration> {
		self.build.timeout_secs.map(Duration::from_secs)
	}

	pub fn watch_timeout(&self) -> Option<Duration> {
		self.watch.timeout_secs.map(Duration::from_secs)
	}

	pub fn server_options(&self) -> ServerOptions {
		ServerOptions {
			dir: self.project_dir.clone(),
			env: self.server.env.clone(),
			strategy: self.server.strategy,
			stop_timeout: self.server.stop_timeout_secs.map(Duration::from_secs),
			port_release_timeout: Duration::from_millis(self.server.port_release_timeout_ms),
			health_timeout: Duration::from_millis(self.server.health_timeout_ms),
		}
	}

	pub fn loop_settings(&self) -> LoopSettings {
		LoopSettings {
			artifact: self.artifact_path(),
			bind_address: self.bind.clone(),
			drain_pending: self.watch.drain_pending,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn parse(content: &str) -> Result<Config, ConfigError> {
		Config::parse(content, Path::new("hotswap.toml"))
	}

	#[test]
	fn empty_file_gives_defaults() {
		let config = parse("").unwrap();
		assert_eq!(config, Config::default());
		assert_eq!(config.bind, "127.0.0.1:8080");
		assert_eq!(config.build.command, "cargo build --release");
		assert_eq!(config.watch.root, PathBuf::from("src"));
		assert!(config.watch.recursive);
		assert!(!config.watch.drain_pending);
		assert_eq!(config.server.strategy, SwapStrategy::InPlace);
		assert_eq!(config.server.env.get("RUST_BACKTRACE").map(String::as_str), Some("1"));
		assert!(config.build_timeout().is_none());
		assert!(config.watch_timeout().is_none());
		assert!(config.server_options().stop_timeout.is_none());
		assert!(config.validate().is_ok());
	}

	#[test]
	fn full_file() {
		let config = parse(
			r#"
project_dir = "/srv/app"
bind = "0.0.0.0:9000"
artifact = "target/debug/api"

[build]
command = "cargo build"
timeout_secs = 300

[watch]
root = "crates"
events = ["modify", "move"]
exclude = ["generated"]
drain_pending = true

[server]
strategy = "blue-green"
stop_timeout_secs = 10
port_release_timeout_ms = 2000

[server.env]
RUST_LOG = "debug"

[log]
file = "/var/log/api-supervisor.log"
console = false

[status]
bind = "127.0.0.1:9901"
"#,
		)
		.unwrap();

		assert!(config.validate().is_ok());
		assert_eq!(config.artifact_path(), PathBuf::from("/srv/app/target/debug/api"));
		assert_eq!(config.log_path(), PathBuf::from("/var/log/api-supervisor.log"));
		assert_eq!(config.build_timeout(), Some(Duration::from_secs(300)));

		let spec = config.watch_spec();
		assert_eq!(spec.root(), Path::new("/srv/app/crates"));
		assert!(spec.mask().contains(ChangeKind::Move));
		assert!(!spec.mask().contains(ChangeKind::Create));
		assert!(spec.is_excluded(Path::new("/srv/app/crates/generated/x.rs")));

		let server = config.server_options();
		assert_eq!(server.strategy, SwapStrategy::BlueGreen);
		assert_eq!(server.stop_timeout, Some(Duration::from_secs(10)));
		assert_eq!(server.port_release_timeout, Duration::from_millis(2000));
		assert_eq!(server.health_timeout, Duration::from_millis(10_000));
		assert_eq!(server.env.get("RUST_LOG").map(String::as_str), Some("debug"));
		assert!(!server.env.contains_key("RUST_BACKTRACE"));
		assert_eq!(config.status.bind.as_deref(), Some("127.0.0.1:9901"));

		let settings = config.loop_settings();
		assert_eq!(settings.bind_address, "0.0.0.0:9000");
		assert!(settings.drain_pending);
	}

	#[test]
	fn rejects_unknown_keys() {
		assert!(matches!(parse("bnid = \"x\""), Err(ConfigError::Parse { .. })));
		assert!(matches!(parse("[watch]\nevents = [\"rename\"]"), Err(ConfigError::Parse { .. })));
	}

	#[test]
	fn validation() {
		let mut config = Config::default();
		config.bind = "8080".into();
		assert!(config.validate().is_err());
		config.bind = "localhost:http".into();
		assert!(config.validate().is_err());
		config.bind = "localhost:8080".into();
		assert!(config.validate().is_ok());

		config.build.command = "  ".into();
		assert!(config.validate().is_err());
		config.build.command = "make".into();

		config.watch.events.clear();
		assert!(config.validate().is_err());
		config.watch.events = vec![ChangeKind::Modify];

		config.status.bind = Some("localhost:8080".into());
		assert!(config.validate().is_err());
	}

	#[test]
	fn missing_explicit_file_is_an_error() {
		let err = Config::load(Some(Path::new("/nonexistent/hotswap.toml"))).unwrap_err();
		assert!(matches!(err, ConfigError::Read { .. }));
	}

	#[test]
	fn toml_round_trip_of_defaults() {
		let config = Config::default();
		let text = config.to_toml();
		assert!(text.contains("bind = \"127.0.0.1:8080\""));
		assert_eq!(parse(&text).unwrap(), config);
	}
}
