//! Error types for the relay server

use std::{io, net::SocketAddr};

use pmoicy::TemplateError;

/// Invalid source configuration, detected while building the router
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Source id cannot be used as a single path segment
    #[error("invalid source id '{0}'")]
    InvalidId(String),

    #[error("source '{id}': invalid {field} '{value}': {source}")]
    InvalidUrl {
        id: String,
        field: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },

    /// Only one of `metadataJsonUrl` / `metadataFormat` was given
    #[error("source '{id}': {present} is set but {missing} is missing")]
    IncompleteMetadata {
        id: String,
        present: &'static str,
        missing: &'static str,
    },

    #[error("source '{id}': invalid metadataFormat: {source}")]
    InvalidTemplate {
        id: String,
        #[source]
        source: TemplateError,
    },

    #[error("icy metaint must be greater than zero")]
    ZeroMetaint,

    /// HTTP client could not be built (TLS backend, user agent...)
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Errors raised while running the HTTP server
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("HTTP server failed: {0}")]
    Serve(#[from] io::Error),

    #[error("server is not running")]
    NotStarted,
}
