use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};
use std::net::SocketAddr;

mod config;
mod detect;
mod error;
mod logging;
mod middleware;
mod models;
mod peaks;
mod proxy;
mod transport;

use config::{Cli, Command, Config, FileConfig, LogLevel};

#[tokio::main]
async fn main() {
    let Command::Run(args) = Cli::parse().command;

    let config = match FileConfig::load().and_then(|file| Config::resolve(args, file)) {
        Ok(config) => config,
        Err(e) => {
            logging::init(LogLevel::Error);
            error!(kind = "failed to load configuration", cause:% = e; "error occurred");
            std::process::exit(1);
        }
    };

    logging::init(config.log_level);
    info!(log_level:? = config.log_level; "Log level is set");

    if let Err(e) = run(config).await {
        let cause = format!("{:#}", e);
        error!(kind = "failed to start HTTP server", cause:% = cause; "error occurred");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    if config.iterations == 0 {
        warn!("iterations is 0; every query_range response will fail");
    }

    let app = proxy::PeakProxy::new(&config)
        .context("failed to create PeakProxy")?
        .router();

    let addr = SocketAddr::from(([0, 0, 0, 0], config.local_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(
        target_uri = config.target_uri.as_str(),
        iterations = config.iterations;
        "peakproxy listening on {}", addr
    );

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(kind = "failed to install Ctrl+C handler", cause:% = e; "error occurred");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
