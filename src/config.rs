//! Command line configuration

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "pine-dns")]
#[command(version)]
#[command(about = "DNS forwarder that splits multi-question queries for the upstream")]
pub struct Args {
    /// Upstream DNS resolver address (e.g. 8.8.8.8:53)
    #[arg(long, value_name = "HOST:PORT")]
    pub resolver: String,

    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:2053")]
    pub bind: SocketAddr,

    /// How long to wait for each upstream reply, in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub timeout_ms: u64,

    /// Upper bound for answering one client query, in milliseconds
    #[arg(long, default_value_t = 5000)]
    pub deadline_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind: SocketAddr,
    pub resolver: SocketAddr,
    pub timeout: Duration,
    pub deadline: Duration,
}

impl Config {
    /// Validate the arguments and resolve the upstream address once
    pub async fn from_args(args: &Args) -> anyhow::Result<Config> {
        if args.timeout_ms == 0 {
            bail!("--timeout-ms must be greater than zero");
        }
        if args.deadline_ms < args.timeout_ms {
            bail!(
                "--deadline-ms ({}) must not be shorter than --timeout-ms ({})",
                args.deadline_ms,
                args.timeout_ms
            );
        }

        let resolver = tokio::net::lookup_host(args.resolver.as_str())
            .await
            .with_context(|| format!("invalid upstream resolver {:?}", args.resolver))?
            .next()
            .ok_or_else(|| anyhow!("upstream resolver {:?} has no address", args.resolver))?;

        Ok(Config {
            bind: args.bind,
            resolver,
            timeout: Duration::from_millis(args.timeout_ms),
            deadline: Duration::from_millis(args.deadline_ms),
        })
    }
}
