//! broadcastd - epidemic broadcast node
//!
//! Speaks newline-delimited JSON messages on stdin/stdout and spreads every
//! broadcast value to the rest of the cluster by anti-entropy gossip.
//! Logs go to stderr.

use broadcastd::config::Config;
use broadcastd::server::Server;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_logging(config: &Config) {
    let level = if config.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("broadcastd={level},epidemic_net={level}"))
    });

    // stdout carries protocol traffic
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse configuration
    let config = Config::parse();
    if let Err(e) = config.validate() {
        eprintln!("broadcastd: {e:#}");
        return ExitCode::FAILURE;
    }

    init_logging(&config);

    info!(
        "broadcastd v{} - Epidemic Broadcast Node",
        env!("CARGO_PKG_VERSION")
    );

    let server = match Server::new(config) {
        Ok(server) => Arc::new(server),
        Err(e) => {
            error!("Failed to initialize server: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Install signal handler
    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_server.shutdown();
        }
    });

    if let Err(e) = server.run(tokio::io::stdin(), tokio::io::stdout()).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
