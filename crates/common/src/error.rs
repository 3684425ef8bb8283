//! Error types for Sitewarden

use thiserror::Error;

/// Result type alias using Sitewarden Error
pub type Result<T> = std::result::Result<T, Error>;

/// Sitewarden error types
///
/// Every failure is scoped to the operation that produced it. Soft
/// failures of non-critical sub-steps are not represented here; they are
/// reported as [`crate::types::PartialFailure`] alongside a successful
/// result.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Malformed input, rejected before any side effect
    #[error("Validation error: {0}")]
    Validation(String),

    /// A shelled-out command failed; carries the raw diagnostic text
    #[error("{tool} failed: {diagnostic}")]
    ExternalTool { tool: String, diagnostic: String },

    #[error("Resource not found: {kind} {id}")]
    NotFound { kind: String, id: String },

    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Revocation succeeded but the certificate material is still on disk
    #[error("certificate for {domain} was revoked but not deleted: {diagnostic}")]
    RevokedNotDeleted { domain: String, diagnostic: String },

    /// Every strategy of an ordered fallback chain failed
    #[error("all strategies failed: {}", .attempts.join("; "))]
    StrategiesExhausted { attempts: Vec<String> },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn external(tool: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Error::ExternalTool {
            tool: tool.into(),
            diagnostic: diagnostic.into(),
        }
    }

    /// Whether this error means the referenced domain or material is unknown
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
