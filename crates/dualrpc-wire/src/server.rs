//! RpcServer — TCP listener that runs one session per connection.
//!
//! Every accepted connection gets a fresh session ID from the
//! [`SessionTable`], performs the server handshake and then serves inbound
//! calls against the shared root object until the peer disconnects.

use crate::config::{ServerConfig, SessionConfig};
use crate::error::WireResult;
use crate::registry::ObjectHandle;
use crate::session::Session;
use crate::sessions::SessionTable;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, error, info};

/// A listening RPC endpoint.
pub struct RpcServer {
    config: ServerConfig,
    sessions: SessionTable,
    /// Actual bound address (useful when binding to port 0).
    local_addr: SocketAddr,
}

impl RpcServer {
    /// Bind the configured address and start accepting connections.
    ///
    /// `root` is exposed as object 0 to every session.
    pub async fn start(
        config: ServerConfig,
        root: ObjectHandle,
    ) -> WireResult<(Arc<Self>, tokio::task::JoinHandle<()>)> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        info!("RPC: listening on {}", local_addr);

        let server = Arc::new(Self {
            config,
            sessions: SessionTable::new(),
            local_addr,
        });

        let server_clone = Arc::clone(&server);
        let accept_handle = tokio::spawn(async move {
            Self::accept_loop(listener, server_clone, root).await;
        });

        Ok((server, accept_handle))
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Live sessions.
    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    async fn accept_loop(listener: TcpListener, server: Arc<RpcServer>, root: ObjectHandle) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("RPC: accepted connection from {}", addr);
                    let server = Arc::clone(&server);
                    let root = Arc::clone(&root);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_inbound(stream, addr, root).await {
                            debug!("RPC: connection from {} ended: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("RPC: accept error: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Handshake and serve one connection, keeping the session table current.
    async fn handle_inbound(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        root: ObjectHandle,
    ) -> WireResult<()> {
        stream.set_nodelay(true)?;
        let session_id = self.sessions.reserve(addr);

        let result =
            match Session::accept(stream, &self.config.session, Some(root), session_id).await {
                Ok(mut session) => session.serve().await,
                Err(e) => Err(e),
            };

        self.sessions.remove(session_id);
        info!(
            "RPC: session {} from {} ended ({} live)",
            session_id,
            addr,
            self.sessions.count()
        );
        result
    }
}

/// Open a TCP connection and run the client handshake.
pub async fn connect<A: ToSocketAddrs>(
    addr: A,
    config: &SessionConfig,
    root: Option<ObjectHandle>,
) -> WireResult<Session> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Session::connect(stream, config, root).await
}
