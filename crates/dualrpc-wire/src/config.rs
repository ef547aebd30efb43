//! Session and server configuration.

use crate::transport::DEFAULT_MAX_FRAME_SIZE;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};

/// Default TCP port for [`ServerConfig::listen_addr`].
pub const DEFAULT_PORT: u16 = 6000;

/// Per-session behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Largest frame payload accepted from the peer, in bytes.
    pub max_frame_size: u32,
    /// Send calls as CALL_PROC and return Null without waiting.
    pub oneway: bool,
    /// Answer a two-way call whose target or method is missing with an
    /// Exception. When false such calls are dropped and the caller keeps
    /// waiting.
    pub reply_dispatch_errors: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            oneway: false,
            reply_dispatch_errors: true,
        }
    }
}

/// Configuration for an [`RpcServer`](crate::RpcServer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the listener on.
    pub listen_addr: SocketAddr,
    /// Settings applied to every accepted session.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            session: SessionConfig::default(),
        }
    }
}
