//! Node-to-node HTTP layer
//!
//! - [`server`] - per-role node server and its wiring
//! - [`api`] - routes and handlers
//! - [`client`] - typed client for a remote node
//! - [`types`] - request/response bodies

pub mod api;
pub mod client;
pub mod server;
pub mod types;

pub use client::{ClientConfig, ClientError, HttpTransport, NodeClient};
pub use server::{AppState, NodeContext, NodeServer, ServerError, ServerInfo};
