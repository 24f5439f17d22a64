//! Shared-memory cache server binary.

use clap::Parser;
use server::banner::{BannerConfig, print_banner};
use server::config::DEFAULT_CONFIG;
use server::{App, Config, ProcessState, logging, signal};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "shm-cache-server")]
#[command(about = "Shared-memory key/value cache with UDP replication")]
struct Args {
    /// Path to configuration file
    config: Option<PathBuf>,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() {
    let args = Args::parse();

    if args.print_config {
        print_default_config();
        return;
    }

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => {
            eprintln!("No config file specified. Pass a config path or use --print-config");
            std::process::exit(1);
        }
    };

    if let Err(e) = logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(config) {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}

fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let state = ProcessState::new(signal::install_signal_handler()?);

    print_banner(&BannerConfig {
        version: env!("CARGO_PKG_VERSION"),
        caches: &config.cache,
        sweeper: &config.sweeper,
        server: config.server.as_ref(),
    });

    App::start(&config, state)?.wait()
}

fn print_default_config() {
    print!("{}", DEFAULT_CONFIG);
}
