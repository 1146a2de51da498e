//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p actorsync_server -- [--config server.json] [--addr 127.0.0.1:28785]
//!       [--tick-ms 50] [--max-clients 64] [--max-message 128]
//!
//! Runs the demo game: every client gets a ball it can steer. Ctrl-C stops
//! the simulation, tells clients the game is over and closes connections.

use std::env;
use std::path::Path;

use actorsync_server::{demo::DemoGame, runtime::ServerRuntime};
use actorsync_shared::config::EngineConfig;
use anyhow::Context;
use tracing::info;

fn parse_args() -> anyhow::Result<EngineConfig> {
    let args: Vec<String> = env::args().collect();
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => EngineConfig::from_json_file(Path::new(&args[i + 1]))?,
        _ => EngineConfig::default(),
    };
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-ms" if i + 1 < args.len() => {
                cfg.tick_interval_ms = args[i + 1].parse().context("--tick-ms")?;
                i += 2;
            }
            "--max-clients" if i + 1 < args.len() => {
                cfg.max_clients = args[i + 1].parse().context("--max-clients")?;
                i += 2;
            }
            "--max-message" if i + 1 < args.len() => {
                cfg.max_message_len = args[i + 1].parse().context("--max-message")?;
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(addr = %cfg.server_addr, tick_ms = cfg.tick_interval_ms, max_clients = cfg.max_clients, "Starting server");

    let runtime = ServerRuntime::bind(cfg, DemoGame::new())
        .await
        .context("create server")?;

    let server = runtime
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Ctrl-C handler failed");
            }
        })
        .await?;

    let stats = server.stats();
    info!(steps = stats.steps, bytes_sent = stats.bytes_sent, "Server stopped");
    Ok(())
}
