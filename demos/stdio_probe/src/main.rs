//! Starts any stdio MCP server, runs the bring-up handshake and prints what
//! the server reports about itself.
//!
//! `cargo run -p stdio-probe -- --env PERPLEXITY_API_KEY=... npx -y server-perplexity-ask`

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use mcp_stdio_bridge::{handshake, HandshakeConfig, StdioClient, StdioConfig};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Program to launch.
    command: String,

    /// Arguments passed to the program.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Extra environment for the child, as KEY=VALUE. Repeatable.
    #[arg(long = "env", value_parser = parse_env)]
    env: Vec<(String, String)>,

    /// Seconds to wait for each handshake reply.
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Milliseconds to wait after the initialized notification.
    #[arg(long, default_value_t = 500)]
    settle_ms: u64,

    /// Seconds to give the child before the first request.
    #[arg(long, default_value_t = 2)]
    startup_delay: u64,

    /// Protocol version to offer in `initialize`.
    #[arg(long)]
    protocol_version: Option<String>,
}

fn parse_env(s: &str) -> Result<(String, String)> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got '{}'", s))?;
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout is for results; diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = StdioConfig::new(&args.command)
        .args(&args.args)
        .envs(args.env.clone())
        .startup_delay(Duration::from_secs(args.startup_delay));
    let client = StdioClient::start(config)
        .await
        .with_context(|| format!("could not start '{}'", args.command))?;

    let mut handshake_config = HandshakeConfig {
        response_timeout: Duration::from_secs(args.timeout),
        settle_interval: Duration::from_millis(args.settle_ms),
        ..Default::default()
    };
    if let Some(version) = args.protocol_version {
        handshake_config.protocol_version = version;
    }

    let outcome = handshake(&client, &handshake_config).await;
    client.close().await;
    let outcome = outcome.context("handshake failed")?;

    info!(pid = ?client.pid(), "Handshake complete");
    println!("Initialize response:");
    println!("{}", serde_json::to_string_pretty(&outcome.initialize)?);
    println!("Tools response:");
    println!("{}", serde_json::to_string_pretty(&outcome.tools)?);
    Ok(())
}
