mod config;
mod error;
mod forwarder;
mod message;
mod name;
mod server;
#[cfg(test)]
mod testing;
mod upstream;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Args, Config};
use crate::forwarder::Forwarder;
use crate::server::Server;
use crate::upstream::UpstreamClient;

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = Config::from_args(&args).await?;

    let upstream = UpstreamClient::new(config.resolver, config.timeout);
    info!(
        upstream = %upstream.addr(),
        timeout = ?config.timeout,
        deadline = ?config.deadline,
        "forwarding queries"
    );

    let forwarder = Forwarder::new(upstream, config.deadline);
    let server = Server::bind(config.bind, forwarder)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind))?;

    server.run(shutdown_signal()).await?;

    Ok(())
}
