//! DualRPC CLI — run a demo server or call one.
//!
//! `serve` exposes the demo root object over TCP; `demo` and `echo` connect
//! to a running server and print the result as JSON.

mod cli;
mod demo;

use crate::cli::*;
use anyhow::Context;
use clap::Parser;
use dualrpc_wire::{connect, Args, RpcServer, ServerConfig, SessionConfig, Variant};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing_stderr();

    if let Err(e) = run(cli) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(max) = cli.max_frame_size {
        config.session.max_frame_size = max;
    }

    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    match cli.command {
        Commands::Serve { listen } => {
            if let Some(addr) = listen {
                config.listen_addr = addr;
            }
            rt.block_on(cmd_serve(config))
        }
        Commands::Demo { addr, name } => {
            let addr = addr.unwrap_or(config.listen_addr);
            rt.block_on(cmd_demo(addr, &config.session, name))
        }
        Commands::Echo {
            addr,
            oneway,
            words,
        } => {
            let addr = addr.unwrap_or(config.listen_addr);
            let session = SessionConfig {
                oneway,
                ..config.session
            };
            rt.block_on(cmd_echo(addr, &session, words))
        }
    }
}

/// Load the TOML config at `path`, falling back to defaults when there is none.
fn load_config(path: Option<&Path>) -> anyhow::Result<ServerConfig> {
    let Some(path) = path else {
        debug!("no config file given, using defaults");
        return Ok(ServerConfig::default());
    };
    if !path.exists() {
        warn!("config file {} not found, using defaults", path.display());
        return Ok(ServerConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: ServerConfig = toml::from_str(&content)
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    info!("loaded config from {}", path.display());
    Ok(config)
}

async fn cmd_serve(config: ServerConfig) -> anyhow::Result<()> {
    let (server, accept) = RpcServer::start(config, Arc::new(demo::root_object()))
        .await
        .context("Failed to start server")?;
    println!("Listening on {}", server.local_addr());

    tokio::select! {
        res = accept => {
            res.context("accept loop stopped")?;
        }
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for Ctrl+C")?;
            info!("shutting down with {} live sessions", server.sessions().count());
        }
    }
    Ok(())
}

async fn cmd_demo(
    addr: SocketAddr,
    config: &SessionConfig,
    name: Option<String>,
) -> anyhow::Result<()> {
    let mut session = connect(addr, config, None)
        .await
        .with_context(|| format!("Failed to connect to {addr}"))?;

    let mut args = Args::new().arg(Variant::object(demo::person()));
    if let Some(name) = name {
        args = args.arg(name);
    }
    let root = session.root();
    let result = session.call(&root, "foo", args).await?;
    print_json(&result)
}

async fn cmd_echo(addr: SocketAddr, config: &SessionConfig, words: Vec<String>) -> anyhow::Result<()> {
    let mut session = connect(addr, config, None)
        .await
        .with_context(|| format!("Failed to connect to {addr}"))?;

    let args = words
        .into_iter()
        .fold(Args::new(), |args, word| args.arg(word));
    let root = session.root();
    let result = session.call(&root, "echo", args).await?;
    if session.is_oneway() {
        session.close().await?;
        println!("sent");
        return Ok(());
    }
    print_json(&result)
}

fn print_json(value: &Variant) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
