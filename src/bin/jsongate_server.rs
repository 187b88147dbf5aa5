//!
//! jsongate server binary
//! ----------------------
//! Command-line entry point for the gateway. Supports configuration via CLI flags and
//! `JSONGATE_*` environment variables; see `--help`.

use anyhow::Result;
use std::env;

use jsongate::config::{has_flag, GatewayConfig, USAGE};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber with env filter if provided
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let args: Vec<String> = env::args().collect();
    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = GatewayConfig::from_env_and_args()?;
    println!(
        "jsongate starting: http={}, rpc_path={}, session_ttl={}s",
        config.http_port,
        config.rpc_path,
        config.session_ttl.as_secs()
    );
    tracing::info!(target: "startup", "Using port: http={}, rpc_path={}", config.http_port, config.rpc_path);
    jsongate::server::run_with_config(config).await
}
