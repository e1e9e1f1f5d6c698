mod api;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use owo_colors::OwoColorize;
use tokio::signal::unix::{signal, SignalKind};
use tracing::Level;

use hotswap::{
	BuildExecutor, ChangeWatcher, Config, EventLog, ProcessSupervisor, StatusBoard, SupervisorLoop,
	SwapStrategy,
};

/// Rebuild on change, swap the running server, survive failed builds
#[derive(Parser, Debug)]
#[command(name = "hotswap", version, about, long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Option<Command>,

	/// Config file (default: ./hotswap.toml if present)
	#[arg(short, long, global = true, value_hint = clap::ValueHint::FilePath)]
	config: Option<PathBuf>,

	#[command(flatten)]
	overrides: Overrides,

	/// More internal diagnostics on stderr (-v debug, -vv trace)
	#[arg(short, long, global = true, action = ArgAction::Count)]
	verbose: u8,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
	/// Build, start, and keep the server current (default)
	Run,
	/// Print the effective configuration as TOML
	Config,
}

/// Flags that take precedence over the config file
#[derive(clap::Args, Debug, Default)]
struct Overrides {
	/// Address handed to the server (host:port)
	#[arg(long, global = true)]
	bind: Option<String>,

	/// Directory to watch for changes
	#[arg(long, global = true, value_hint = clap::ValueHint::DirPath)]
	watch: Option<PathBuf>,

	/// Build command, run through `sh -c`
	#[arg(long, global = true)]
	build: Option<String>,

	/// Server executable produced by the build
	#[arg(long, global = true, value_hint = clap::ValueHint::FilePath)]
	artifact: Option<PathBuf>,

	/// Event log file
	#[arg(long, global = true, value_hint = clap::ValueHint::FilePath)]
	log_file: Option<PathBuf>,

	/// Replacement strategy (in-place, blue-green)
	#[arg(long, global = true)]
	strategy: Option<SwapStrategy>,

	/// Serve the read-only status API on this address
	#[arg(long, global = true)]
	status: Option<String>,
}

impl Overrides {
	fn apply(&self, config: &mut Config) {
		if let Some(bind) = &self.bind {
			config.bind = bind.clone();
		}
		if let Some(root) = &self.watch {
			config.watch.root = root.clone();
		}
		if let Some(command) = &self.build {
			config.build.command = command.clone();
		}
		if let Some(artifact) = &self.artifact {
			config.artifact = artifact.clone();
		}
		if let Some(file) = &self.log_file {
			config.log.file = file.clone();
		}
		if let Some(strategy) = self.strategy {
			config.server.strategy = strategy;
		}
		if let Some(status) = &self.status {
			config.status.bind = Some(status.clone());
		}
	}
}

fn main() -> ExitCode {
	let cli = Cli::parse();

	let level = match cli.verbose {
		0 => Level::WARN,
		1 => Level::DEBUG,
		_ => Level::TRACE,
	};
	tracing_subscriber::fmt()
		.with_max_level(level)
		.with_writer(std::io::stderr)
		.init();

	let config = match load_config(&cli) {
		Ok(config) => config,
		Err(e) => return fail(&e),
	};

	match cli.command.unwrap_or(Command::Run) {
		Command::Config => {
			print!("{}", config.to_toml());
			ExitCode::SUCCESS
		}
		Command::Run => run(config),
	}
}

fn fail(message: &str) -> ExitCode {
	eprintln!("{} {}", "error:".red().bold(), message);
	ExitCode::FAILURE
}

fn load_config(cli: &Cli) -> Result<Config, String> {
	let mut config = Config::load(cli.config.as_deref()).map_err(|e| e.to_string())?;
	cli.overrides.apply(&mut config);
	config.validate().map_err(|e| e.to_string())?;
	Ok(config)
}

fn run(config: Config) -> ExitCode {
	// One thread is enough: builds and swaps are sequential by construction.
	let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
		Ok(rt) => rt,
		Err(e) => return fail(&format!("failed to start runtime: {}", e)),
	};

	match runtime.block_on(supervise(config)) {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => fail(&e),
	}
}

async fn supervise(config: Config) -> Result<(), String> {
	let log_path = config.log_path();
	let log = EventLog::open(&log_path, config.log.console, config.log.tail)
		.map_err(|e| format!("cannot open log file {}: {}", log_path.display(), e))?;

	log.info(format!(
		"hotswap {} supervising {} on {} ({})",
		env!("CARGO_PKG_VERSION"),
		config.artifact_path().display(),
		config.bind,
		config.server.strategy
	));

	let watcher = match ChangeWatcher::new(config.watch_spec(), log.clone()) {
		Ok(w) => w.with_timeout(config.watch_timeout()),
		Err(e) => {
			log.error(format!("{}, aborting startup", e));
			return Err(e.to_string());
		}
	};
	log.info(format!("watching {}", watcher.spec().root().display()));

	let builder = BuildExecutor::new(config.build.command.clone(), config.project_dir.clone(), log.clone())
		.with_env(config.server.env.clone())
		.with_timeout(config.build_timeout());
	let processes = ProcessSupervisor::new(config.server_options(), log.clone());
	let mut supervisor = SupervisorLoop::new(builder, watcher, processes, config.loop_settings(), log.clone());

	if let Some(bind) = config.status.bind.clone() {
		let board = StatusBoard::new(log.clone());
		supervisor = supervisor.with_status(board.clone());
		tokio::spawn(api::serve(board, bind));
	}

	supervisor
		.run_until(shutdown_signal())
		.await
		.map_err(|e| e.to_string())
}

async fn shutdown_signal() {
	let terminate = async {
		match signal(SignalKind::terminate()) {
			Ok(mut sigterm) => {
				sigterm.recv().await;
			}
			Err(e) => {
				tracing::warn!("cannot listen for SIGTERM: {}", e);
				std::future::pending::<()>().await;
			}
		}
	};

	tokio::select! {
		_ = tokio::signal::ctrl_c() => {},
		_ = terminate => {},
	}
}
