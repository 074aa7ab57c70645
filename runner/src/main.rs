use clap::Parser;
use harrow_farm::{
    config::FarmConfig,
    executors::Executors,
    signal::{self, Flag},
    FarmError,
};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::{path::PathBuf, process::exit};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "A task-farm runtime for resumable parameter sweeps")]
struct Cli {
    /// Path of the run configuration
    #[arg(short, long, default_value = "harrow.yml")]
    config: PathBuf,

    /// Resume the run from the last committed checkpoint
    #[arg(short, long)]
    restart: bool,

    /// Override the configured worker count
    #[arg(short, long)]
    workers: Option<usize>,

    /// Override the configured module
    #[arg(short, long)]
    module: Option<String>,
}

extern "C" fn on_interrupt(_: i32) {
    signal::raise_process_flag();
}

fn install_interrupt_handler() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_interrupt),
        SaFlags::empty(),
        SigSet::empty(),
    );

    unsafe { sigaction(Signal::SIGINT, &action) }.map(|_| ())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("harrow v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();

    let mut config = match FarmConfig::load(&cli.config) {
        Ok(config) => config,
        Err(error) => {
            error!(path = ?cli.config, "Failed to load the configuration: {error}");

            exit(1)
        }
    };

    if let Some(workers) = cli.workers {
        config.executor.workers = Some(workers);
    }
    if let Some(module) = cli.module {
        config.module.name = module;
    }

    if config.preflight_checks() {
        error!("Preflight checks failed, aborting");

        exit(1)
    }

    if let Err(error) = install_interrupt_handler() {
        error!("Failed to install the SIGINT handler: {error}");

        exit(1)
    }

    let mut executors = match Executors::load(config) {
        Ok(executors) => executors,
        Err(error) => {
            error!("Failed to load the executor: {error}");

            exit(1)
        }
    };

    match executors.execute(Flag::process(), cli.restart) {
        Ok(()) => info!("Run complete"),
        Err(FarmError::Interrupted) => {
            info!("Checkpoint flushed, resume with --restart");

            exit(130)
        }
        Err(error) => {
            error!(error = ?error, phase = error.phase(), "Run aborted: {error}");

            exit(1)
        }
    }
}
