//! Skirmish Relay Server
//!
//! Accepts host, joiner, and browser connections, keeps a directory of
//! open lobbies, and moves frames between each lobby's host and its
//! members. All lobby state lives on the hosting client; the relay only
//! knows who is connected where.

#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use skirmish_proto::{DEFAULT_MAX_FRAME, PROTOCOL_VERSION};
use tokio::net::TcpListener;

mod directory;
mod session;

use directory::LobbyDirectory;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Protocol version every hello must carry.
    pub version: String,
    pub max_frame: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            max_frame: DEFAULT_MAX_FRAME,
        }
    }
}

/// The relay: one listener, one task per connection.
pub struct LobbyServer {
    listener: TcpListener,
    directory: Arc<LobbyDirectory>,
    config: Arc<ServerConfig>,
    next_client: AtomicU64,
}

impl LobbyServer {
    pub async fn bind(addr: &str, config: ServerConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            directory: Arc::new(LobbyDirectory::default()),
            config: Arc::new(config),
            next_client: AtomicU64::new(1),
        })
    }

    /// The address actually bound, for callers that bound port zero.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until the listener fails.
    pub async fn run(self) -> std::io::Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let client = self.next_client.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(client, %peer, "Connection accepted");
            tokio::spawn(session::handle_connection(
                stream,
                client,
                Arc::clone(&self.directory),
                Arc::clone(&self.config),
            ));
        }
    }
}
