//! Error types for ICY metadata injection

use crate::template::TemplateError;

/// Result type alias for pmoicy operations
pub type Result<T> = std::result::Result<T, IcyError>;

/// Errors raised while refreshing stream titles
#[derive(Debug, thiserror::Error)]
pub enum IcyError {
    /// HTTP request to the metadata endpoint failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Metadata document is not valid JSON
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Metadata document decoded, but is not a JSON object
    #[error("metadata document is not a JSON object (got {0})")]
    NotAnObject(&'static str),

    /// Title template could not be parsed
    #[error("invalid title template: {0}")]
    Template(#[from] TemplateError),

    /// Background task ended abnormally
    #[error("{role} task failed: {details}")]
    TaskJoin { role: &'static str, details: String },
}
