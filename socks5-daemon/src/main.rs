//! `socks5-proxyd` — multi-worker SOCKS5 proxy server binary.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use socks5_core::config::ProxyConfig;
use socks5_daemon::Proxy;

#[derive(Parser)]
#[command(name = "socks5-proxyd", author, version, about = "Multi-worker SOCKS5 proxy server")]
struct Args {
    /// Path to the TOML configuration file.
    config_path: PathBuf,
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match ProxyConfig::from_file(&args.config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config from {}: {e}", args.config_path.display());
            return ExitCode::from(2);
        }
    };

    init_tracing(&config.misc.log_level);
    tracing::info!(config_path = %args.config_path.display(), workers = config.main.workers, "starting socks5-proxyd");

    let proxy = match Proxy::new(Arc::new(config)) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize proxy");
            return ExitCode::from(3);
        }
    };

    if let Err(e) = proxy.run().await {
        tracing::error!(error = %e, "proxy exited with error");
        return ExitCode::from(3);
    }

    tracing::info!("socks5-proxyd stopped");
    ExitCode::SUCCESS
}
