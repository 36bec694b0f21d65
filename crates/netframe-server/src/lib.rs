//! netframe server: listener, session registry, fan-out router.
//!
//! Production "glue" wrapping [`netframe_core`]'s Sans-IO session state
//! machine and pipeline with real Tokio I/O. [`connection::run`] drives one
//! accepted socket; [`Server`] is the accept loop that spawns it, enforcing
//! `session_limit_count` and `kill_code` before a connection ever reaches
//! the handshake.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod connection;
pub mod error;
pub mod registry;
pub mod router;

use std::sync::Arc;

pub use config::{Callbacks, ServerConfig};
pub use error::ServerError;
use netframe_core::WorkerPool;
use registry::Registry;
use tokio::net::TcpListener;

/// Production netframe server: a bound listener plus the shared registry
/// and worker pool every accepted connection is spawned against.
pub struct Server {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    registry: Arc<Registry>,
    pool: Arc<WorkerPool>,
}

impl Server {
    /// Bind the listener at `config.bind_address` and start the worker
    /// pool. Does not yet accept any connections; call [`Server::run`] for
    /// that.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.bind_address)
            .await
            .map_err(|source| ServerError::Bind { addr: config.bind_address.clone(), source })?;
        let pool = WorkerPool::start(config.pool);
        Ok(Self { listener, config: Arc::new(config), registry: Arc::new(Registry::new()), pool: Arc::new(pool) })
    }

    /// The address actually bound, useful when `bind_address` used an
    /// ephemeral port (`:0`).
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Accept`] if the listener's local address
    /// cannot be queried (the underlying socket was closed out from under
    /// it).
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::Accept)
    }

    /// Accept connections until the listener errors. Each accepted socket
    /// is spawned onto its own [`connection::run`] task; a full
    /// `session_limit_count` rejects the accept by dropping the socket
    /// immediately, without ever constructing a session (so no drop-timer
    /// or disconnect callback fires for it).
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Accept`] if the listener itself is broken
    /// (not a per-connection error, which is logged and otherwise
    /// ignored).
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!(addr = %self.local_addr()?, "netframe server listening");

        loop {
            let (socket, peer_addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    tracing::error!(%err, "accept error");
                    continue;
                },
            };

            if self.config.session_limit_count > 0 && self.registry.len() >= self.config.session_limit_count {
                tracing::debug!(%peer_addr, "session limit reached, rejecting accept");
                drop(socket);
                continue;
            }

            let id = self.registry.reserve_id();
            let config = Arc::clone(&self.config);
            let registry = Arc::clone(&self.registry);
            let pool = Arc::clone(&self.pool);

            tracing::debug!(connection = id, %peer_addr, "accepted connection");
            tokio::spawn(async move {
                connection::run(socket, id, config, registry, pool).await;
            });
        }
    }
}
