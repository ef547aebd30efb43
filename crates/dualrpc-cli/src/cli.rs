//! Clap CLI definitions for DualRPC.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  dualrpc serve                         Serve the demo object on 127.0.0.1:6000
  dualrpc demo                          Pass a callback object to the server's foo
  dualrpc echo hello world              Call echo with two arguments
  dualrpc --config dualrpc.toml serve   Load settings from a TOML file";

/// DualRPC — bidirectional object RPC over TCP.
#[derive(Parser)]
#[command(name = "dualrpc", version, about, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Largest frame accepted from the peer, in bytes (overrides the config file).
    #[arg(long, global = true)]
    pub max_frame_size: Option<u32>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Listen for connections and expose the demo root object.
    Serve {
        /// Address to listen on (overrides the config file).
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Connect, pass a local object to the server's `foo`, and print the result.
    Demo {
        /// Server address (defaults to the configured listen address).
        #[arg(long)]
        addr: Option<SocketAddr>,
        /// Name the callback object is asked to describe.
        #[arg(long)]
        name: Option<String>,
    },
    /// Call `echo` on the server's root object with the given words.
    Echo {
        /// Server address (defaults to the configured listen address).
        #[arg(long)]
        addr: Option<SocketAddr>,
        /// Send as a one-way call and do not wait for a result.
        #[arg(long)]
        oneway: bool,
        /// Words passed as positional arguments.
        words: Vec<String>,
    },
}
