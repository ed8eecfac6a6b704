//! Unified error handling for the proctor crate
//!
//! Ordinary protocol outcomes (admission rejected, session expired, duplicate
//! finalize) are tagged return values, not errors. What ends up here are
//! transport, storage and configuration failures.
//!
//! # Usage
//!
//! ```rust,ignore
//! use proctor::error::{Error, ErrorCategory};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         println!("Retrying: {err}");
//!     } else {
//!         eprintln!("Fatal error: {err}");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::config::ConfigError;
pub use crate::exclusion::ExclusionError;
pub use crate::rpc::client::ClientError;
pub use crate::rpc::server::ServerError;

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Peer unreachable, HTTP failure, timeout
    Network,
    /// Result ledger and I/O
    Storage,
    /// Configuration and validation
    Config,
    /// Protocol misuse (e.g. re-entering a critical section)
    Coordination,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Coordination => "coordination",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the proctor crate
#[derive(Error, Debug)]
pub enum Error {
    /// Mutual exclusion protocol errors
    #[error("Exclusion error: {0}")]
    Exclusion(#[from] ExclusionError),

    /// Node-to-node RPC errors
    #[error("RPC error: {0}")]
    Client(#[from] ClientError),

    /// Node server errors
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// Result ledger errors
    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether retrying the operation may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Client(e) => e.is_recoverable(),
            Self::Io(_) => true,
            Self::Exclusion(_)
            | Self::Server(_)
            | Self::Database(_)
            | Self::Json(_)
            | Self::Config(_)
            | Self::Other { .. } => false,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Client(_) => ErrorCategory::Network,
            Self::Server(_) => ErrorCategory::Network,
            Self::Exclusion(_) => ErrorCategory::Coordination,
            Self::Database(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Other,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
