//! # hotswap
//!
//! Build-watch-serve supervisor.
//!
//! Watches a source tree, rebuilds on every relevant change, and swaps the
//! running server for the freshly built artifact. A failed build never stops
//! the server that is already running.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use hotswap::{
//! 	BuildExecutor, ChangeWatcher, Config, EventLog, ProcessSupervisor, SupervisorLoop,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load(None)?;
//! let log = EventLog::open(&config.log_path(), true, config.log.tail)?;
//!
//! let watcher = ChangeWatcher::new(config.watch_spec(), log.clone())?;
//! let builder = BuildExecutor::new(&config.build.command, &config.project_dir, log.clone());
//! let processes = ProcessSupervisor::new(config.server_options(), log.clone());
//!
//! let mut supervisor =
//! 	SupervisorLoop::new(builder, watcher, processes, config.loop_settings(), log);
//! supervisor.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod control;
pub mod error;
pub mod event_log;
pub mod logs;
pub mod port;
pub mod process;
pub mod status;
pub mod supervisor;
pub mod types;
pub mod watcher;

pub use types::*;
pub use builder::{BuildExecutor, BuildStep};
pub use config::Config;
pub use control::{Cycle, LoopSettings, SupervisorLoop};
pub use error::{ConfigError, SupervisorError, WatchError};
pub use event_log::{EventLog, LogEntry};
pub use process::{HandleStatus, ProcessHandle};
pub use status::{LoopStats, StatusBoard, StatusSnapshot};
pub use supervisor::{ProcessSupervisor, ServerOptions};
pub use watcher::{ChangeSource, ChangeWatcher};
