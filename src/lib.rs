//! proctor - distributed exam proctoring over three nodes
//!
//! A coordinator, an authority and an agent agree on time, serialize
//! misconduct reports, admit exam sessions under load, and record each
//! session's result exactly once even when a manual submit races the
//! deadline.
//!
//! # Architecture
//!
//! - [`clock`] - node ids, Lamport clock, offset-adjustable wall clock
//! - [`timesync`] - Berkeley averaging over reachable nodes
//! - [`exclusion`] - Ricart-Agrawala mutual exclusion
//! - [`admission`] - primary/backup admission with a threshold
//! - [`session`] - exam sessions, deadline timers and race resolution
//! - [`ledger`] - append-only result sinks (memory, SQLite, forwarding)
//! - [`authority`] - marksheet and misconduct strikes
//! - [`rpc`] - HTTP server, client and wire types
//! - [`config`] - layered configuration
//! - [`metrics`] - Prometheus metrics
//!
//! # Example
//!
//! ```no_run
//! use proctor::config::{Config, Role};
//! use proctor::rpc::NodeServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     let server = NodeServer::new(config, Role::Coordinator)?;
//!     server.start().await?;
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod authority;
pub mod clock;
pub mod config;
pub mod error;
pub mod exclusion;
pub mod ledger;
pub mod metrics;
pub mod rpc;
pub mod session;
pub mod timesync;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::admission::{Admission, AdmissionController, Lane};
    pub use crate::clock::{LogicalClock, NodeId, WallClock};
    pub use crate::config::{Config, Role};
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::exclusion::RicartAgrawala;
    pub use crate::ledger::{ResultEvent, ResultSink};
    pub use crate::session::{CompletionSource, FinalizeOutcome, SessionStore};
    pub use crate::timesync::BerkeleySync;
}
