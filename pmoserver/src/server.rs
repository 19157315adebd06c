//! # Server module - HTTP front of the relay
//!
//! [`Server`] owns the listening socket, the axum router and the shutdown
//! [`CancellationToken`] shared with every title refresher.
//!
//! - ⚡ **Ctrl+C**: cancels the shutdown token
//! - ⏳ **Graceful shutdown**: open streams get `shutdown_grace` to finish
//!   before the server stops

use std::{future::IntoFuture, io, net::SocketAddr, time::Duration};

use axum::Router;
use pmoconfig::get_config;
use tokio::{net::TcpListener, signal, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::ServerError;

const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Main server
pub struct Server {
    name: String,
    addr: SocketAddr,
    shutdown_grace: Duration,
    router: Router,
    shutdown: CancellationToken,
    local_addr: Option<SocketAddr>,
    join_handle: Option<JoinHandle<Result<(), ServerError>>>,
}

impl Server {
    /// Creates a new server instance
    ///
    /// # Arguments
    ///
    /// * `name` - Server name (for logs)
    /// * `addr` - Listen address, port 0 for an ephemeral port
    pub fn new(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            router: Router::new(),
            shutdown: CancellationToken::new(),
            local_addr: None,
            join_handle: None,
        }
    }

    /// Token cancelled when the server shuts down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Address actually bound, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Adds a sub-router to the server
    ///
    /// - If `path` is "/", it is merged into the main router
    /// - Otherwise it is nested under the given path
    pub fn add_router(&mut self, path: &str, sub_router: Router) {
        let router = std::mem::take(&mut self.router);
        self.router = if path == "/" {
            router.merge(sub_router)
        } else {
            let normalized = format!("/{}", path.trim_start_matches('/'));
            router.nest(&normalized, sub_router)
        };
    }

    /// Starts the HTTP server
    ///
    /// Binds the socket, then serves in the background until the shutdown
    /// token is cancelled, either by [`Server::shutdown`] or by Ctrl+C.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use pmoserver::Server;
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), pmoserver::ServerError> {
    /// let mut server = Server::new("Relay", "127.0.0.1:8080".parse().unwrap());
    /// server.start().await?;
    /// server.wait().await?; // Waits for Ctrl+C
    /// # Ok(())
    /// # }
    /// ```
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.addr,
                source,
            })?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);

        info!("Server {} running at http://{}", self.name, local_addr);

        let ctrl_c_token = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = ctrl_c_token.cancelled() => {}
                received = signal::ctrl_c() => match received {
                    Ok(()) => {
                        info!("Ctrl+C received, shutting down gracefully");
                        ctrl_c_token.cancel();
                    }
                    Err(err) => warn!("Failed to listen for Ctrl+C: {}", err),
                },
            }
        });

        let router = std::mem::take(&mut self.router);
        let shutdown = self.shutdown.clone();
        let grace = self.shutdown_grace;
        let name = self.name.clone();

        self.join_handle = Some(tokio::spawn(async move {
            let graceful = shutdown.clone();
            let serve = axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async move { graceful.cancelled().await })
                .into_future();

            let deadline = async {
                shutdown.cancelled().await;
                tokio::time::sleep(grace).await;
            };

            tokio::select! {
                served = serve => served?,
                _ = deadline => {
                    warn!(
                        "Server {}: streams still open after {:?}, closing them",
                        name, grace
                    );
                }
            }

            info!("Server {} stopped", name);
            Ok(())
        }));

        Ok(local_addr)
    }

    /// Requests a graceful shutdown
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Waits for the server to stop
    pub async fn wait(&mut self) -> Result<(), ServerError> {
        match self.join_handle.take() {
            Some(handle) => handle.await.map_err(|err| ServerError::Serve(io::Error::other(err)))?,
            None => Err(ServerError::NotStarted),
        }
    }
}

/// Server builder
pub struct ServerBuilder {
    name: String,
    addr: SocketAddr,
    shutdown_grace: Duration,
}

impl ServerBuilder {
    /// Creates a new builder
    pub fn new(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Builder initialised from `host.*` in the global configuration
    pub fn new_configured() -> anyhow::Result<Self> {
        let config = get_config();
        Ok(Self::new("PMOIcyProxy", config.get_listen_addr()?)
            .shutdown_grace(config.get_shutdown_grace()?))
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Builds the server
    pub fn build(self) -> Server {
        let mut server = Server::new(self.name, self.addr);
        server.shutdown_grace = self.shutdown_grace;
        server
    }
}
