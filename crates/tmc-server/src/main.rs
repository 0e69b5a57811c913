use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tmc_core::{install_signal_handler, Catalog, Config};
use tmc_model::RepoSpec;
use tmc_server::{Api, Listener};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "tmc-server", version, about = "Serve a Thing Model catalog over REST")]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Base path prefixed to every route.
    #[arg(long, default_value = "")]
    url_prefix: String,

    /// Configuration file [default: $TMC_CONFIG or ~/.config/tmc/config.json].
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serve only this configured repository.
    #[arg(long, short = 'r', conflicts_with = "directory")]
    repo: Option<String>,

    /// Serve this directory as an ad-hoc file repository.
    #[arg(long, short = 'd')]
    directory: Option<PathBuf>,

    /// Request worker threads.
    #[arg(long, default_value_t = 8)]
    workers: usize,

    /// Debug logging.
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("TMC_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!("{}: {e}", config_path.display());
            return ExitCode::FAILURE;
        }
    };
    let target = match RepoSpec::new(cli.repo.as_deref(), cli.directory.clone()) {
        Ok(t) => t,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let catalog = Arc::new(Catalog::new(config));
    if let Err(e) = catalog.ready(&target) {
        error!("cannot serve {target}: {e}");
        return ExitCode::FAILURE;
    }

    let shutdown = install_signal_handler();
    let api = Api::new(catalog, target.clone(), &cli.url_prefix, shutdown.clone());
    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = match Listener::start(api, &addr, cli.workers) {
        Ok(l) => l,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    info!("serving {target} on {addr}{}", cli.url_prefix);

    let stopper = listener.stopper();
    std::thread::spawn(move || {
        while !shutdown.is_cancelled() {
            std::thread::sleep(std::time::Duration::from_millis(200));
        }
        info!("shutting down");
        stopper.stop();
    });
    listener.join();
    ExitCode::SUCCESS
}
