//! # pmoserver - HTTP relay for audio streams with ICY metadata
//!
//! This crate serves the configured sources over HTTP and injects ICY
//! metadata for the players that ask for it.
//!
//! ## Architecture
//!
//! - [`server`]: axum server, graceful shutdown on Ctrl+C
//! - [`proxy`]: source validation and the relay handler
//! - [`logs`]: `tracing` initialisation and request logging
//!
//! ## Usage example
//!
//! ```rust,no_run
//! use pmoconfig::{get_config, load_sources};
//! use pmoserver::{ProxyOptions, ServerBuilder, build_proxy_router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let sources = load_sources("sources.json".as_ref())?;
//!
//!     let mut server = ServerBuilder::new_configured()?.build();
//!     let options = ProxyOptions::from_config(&get_config())?;
//!     let router = build_proxy_router(&sources, options, server.shutdown_token())?;
//!     server.add_router("/", router);
//!
//!     server.start().await?;
//!     server.wait().await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logs;
pub mod proxy;
pub mod server;

pub use error::{ProxyError, ServerError};
pub use proxy::{ICY_METADATA, ICY_METAINT, ProxyOptions, build_proxy_router, default_user_agent};
pub use server::{Server, ServerBuilder};
