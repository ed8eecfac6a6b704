//! HTTP client for node-to-node calls
//!
//! [`NodeClient`] talks to one remote node. It also implements the protocol
//! traits so the algorithms can drive remote peers directly:
//! [`TimeSource`] for Berkeley sync and [`ResultSink`] for forwarding results
//! to the authority. [`HttpTransport`] routes Ricart-Agrawala messages to the
//! right client by node id.
//!
//! Every call has a timeout; an expired timeout surfaces as
//! [`ClientError::Timeout`] and callers treat the peer as unreachable.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::types::*;
use crate::admission::AdmissionStats;
use crate::authority::{MarksheetReport, StudentStanding};
use crate::clock::{LogicalTimestamp, NodeId};
use crate::error::Result;
use crate::exclusion::{ExclusionSnapshot, PeerTransport};
use crate::ledger::{ResultEvent, ResultSink};
use crate::session::{
    AnswerOutcome, CompletionSource, FinalizeOutcome, QuestionView, SessionAdmission,
};
use crate::timesync::{SyncReport, TimeSource};

type ClientResult<T> = std::result::Result<T, ClientError>;

// ============================================================================
// Client Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the remote node
    pub base_url: String,

    /// Request timeout. Requests are sent once; a timeout means the peer is
    /// unreachable.
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// ============================================================================
// Node Client
// ============================================================================

pub struct NodeClient {
    node_id: NodeId,
    config: ClientConfig,
    http_client: Client,
}

impl NodeClient {
    /// `node_id` is the remote node's id
    pub fn new(node_id: NodeId, config: ClientConfig) -> ClientResult<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        Ok(Self {
            node_id,
            config,
            http_client,
        })
    }

    pub fn remote_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    // ------------------------------------------------------------------------
    // All nodes
    // ------------------------------------------------------------------------

    pub async fn health(&self) -> ClientResult<HealthResponse> {
        self.get("/api/health").await
    }

    pub async fn time(&self) -> ClientResult<TimeResponse> {
        self.get("/rpc/time").await
    }

    pub async fn adjust(&self, delta_micros: i64) -> ClientResult<AdjustTimeResponse> {
        self.post("/rpc/time/adjust", &AdjustTimeRequest { delta_micros })
            .await
    }

    pub async fn exclusion_request(
        &self,
        from: &NodeId,
        timestamp: LogicalTimestamp,
    ) -> ClientResult<ExclusionAck> {
        let msg = ExclusionMessage {
            node_id: from.clone(),
            timestamp,
        };
        self.post("/rpc/exclusion/request", &msg).await
    }

    pub async fn exclusion_reply(
        &self,
        from: &NodeId,
        timestamp: LogicalTimestamp,
    ) -> ClientResult<ExclusionAck> {
        let msg = ExclusionMessage {
            node_id: from.clone(),
            timestamp,
        };
        self.post("/rpc/exclusion/reply", &msg).await
    }

    pub async fn exclusion_state(&self) -> ClientResult<ExclusionSnapshot> {
        self.get("/rpc/exclusion/state").await
    }

    // ------------------------------------------------------------------------
    // Coordinator
    // ------------------------------------------------------------------------

    pub async fn admit(&self, session_key: &str) -> ClientResult<SessionAdmission> {
        let req = AdmitRequest {
            session_key: session_key.to_string(),
        };
        self.post("/rpc/sessions", &req).await
    }

    pub async fn question(&self, session_key: &str) -> ClientResult<QuestionView> {
        self.get(&format!("/rpc/sessions/{session_key}/question"))
            .await
    }

    pub async fn answer(
        &self,
        session_key: &str,
        answer: &str,
    ) -> ClientResult<AnswerOutcome> {
        let req = AnswerRequest {
            answer: answer.to_string(),
        };
        self.post(&format!("/rpc/sessions/{session_key}/answer"), &req)
            .await
    }

    pub async fn finalize(
        &self,
        session_key: &str,
        source: CompletionSource,
    ) -> ClientResult<FinalizeOutcome> {
        self.post(
            &format!("/rpc/sessions/{session_key}/finalize"),
            &FinalizeRequest { source },
        )
        .await
    }

    pub async fn admission_stats(&self) -> ClientResult<AdmissionStats> {
        self.get("/rpc/admission/stats").await
    }

    pub async fn set_backup_running(&self, running: bool) -> ClientResult<AdmissionStats> {
        self.post("/rpc/admission/backup", &BackupToggleRequest { running })
            .await
    }

    pub async fn run_sync(&self) -> ClientResult<SyncReport> {
        self.post("/rpc/sync", &()).await
    }

    pub async fn report_misconduct(
        &self,
        session_key: &str,
    ) -> ClientResult<MisconductResponse> {
        let req = MisconductRequest {
            session_key: session_key.to_string(),
        };
        self.post("/rpc/misconduct", &req).await
    }

    // ------------------------------------------------------------------------
    // Authority
    // ------------------------------------------------------------------------

    pub async fn record_result(&self, event: &ResultEvent) -> ClientResult<StudentStanding> {
        self.post("/rpc/results", event).await
    }

    pub async fn warn_student(&self, session_key: &str) -> ClientResult<StudentStanding> {
        let req = MisconductRequest {
            session_key: session_key.to_string(),
        };
        self.post("/rpc/marks/warn", &req).await
    }

    pub async fn catch_student(&self, session_key: &str) -> ClientResult<StudentStanding> {
        let req = MisconductRequest {
            session_key: session_key.to_string(),
        };
        self.post("/rpc/marks/catch", &req).await
    }

    pub async fn marksheet(&self) -> ClientResult<MarksheetReport> {
        self.get("/rpc/marksheet").await
    }

    // ------------------------------------------------------------------------
    // Internal
    // ------------------------------------------------------------------------

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        let response = self
            .http_client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(&e))?;
        Self::unwrap_response(response).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ClientResult<T> {
        let response = self
            .http_client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(&e))?;
        Self::unwrap_response(response).await
    }

    async fn unwrap_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> ClientResult<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ClientError::from_reqwest(&e))?;

        let parsed: ApiResponse<T> = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(ClientError::HttpError {
                    status: status.as_u16(),
                    message: body,
                })
            }
            Err(e) => return Err(ClientError::ParseError(e.to_string())),
        };

        let ApiResponse {
            success,
            data,
            error,
        } = parsed;

        match (status.is_success() && success, data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err(ClientError::InvalidResponse(
                "Missing response data".to_string(),
            )),
            (false, _) => Err(ClientError::HttpError {
                status: status.as_u16(),
                message: error.unwrap_or_default(),
            }),
        }
    }
}

// ============================================================================
// Protocol Adapters
// ============================================================================

#[async_trait]
impl TimeSource for NodeClient {
    fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    async fn query_time(&self) -> Result<i64> {
        Ok(self.time().await?.time_micros)
    }

    async fn adjust_time(&self, delta_micros: i64) -> Result<()> {
        self.adjust(delta_micros).await?;
        Ok(())
    }
}

#[async_trait]
impl ResultSink for NodeClient {
    async fn record(&self, event: &ResultEvent) -> Result<()> {
        self.record_result(event).await?;
        Ok(())
    }
}

/// Routes Ricart-Agrawala messages over HTTP
pub struct HttpTransport {
    peers: HashMap<NodeId, Arc<NodeClient>>,
}

impl HttpTransport {
    pub fn new(peers: impl IntoIterator<Item = Arc<NodeClient>>) -> Self {
        Self {
            peers: peers
                .into_iter()
                .map(|c| (c.remote_id().clone(), c))
                .collect(),
        }
    }

    fn peer(&self, id: &NodeId) -> ClientResult<&Arc<NodeClient>> {
        self.peers
            .get(id)
            .ok_or_else(|| ClientError::UnknownPeer(id.to_string()))
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn send_request(
        &self,
        to: &NodeId,
        from: &NodeId,
        timestamp: LogicalTimestamp,
    ) -> Result<()> {
        self.peer(to)?.exclusion_request(from, timestamp).await?;
        Ok(())
    }

    async fn send_reply(
        &self,
        to: &NodeId,
        from: &NodeId,
        timestamp: LogicalTimestamp,
    ) -> Result<()> {
        self.peer(to)?.exclusion_reply(from, timestamp).await?;
        Ok(())
    }
}

// ============================================================================
// Client Errors
// ============================================================================

#[derive(Debug, Clone)]
pub enum ClientError {
    /// Initialization error
    InitError(String),

    /// Connection refused, reset, DNS
    NetworkError(String),

    /// No answer within the configured timeout
    Timeout,

    /// Non-success status or `success: false`
    HttpError { status: u16, message: String },

    /// Parse error
    ParseError(String),

    /// Invalid response
    InvalidResponse(String),

    /// No client configured for this node id
    UnknownPeer(String),
}

impl ClientError {
    fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::NetworkError(err.to_string())
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::NetworkError(_) | Self::Timeout => true,
            Self::HttpError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InitError(msg) => write!(f, "Initialization error: {msg}"),
            Self::NetworkError(msg) => write!(f, "Network error: {msg}"),
            Self::Timeout => write!(f, "Request timed out"),
            Self::HttpError { status, message } => {
                write!(f, "HTTP error ({status}): {message}")
            }
            Self::ParseError(msg) => write!(f, "Parse error: {msg}"),
            Self::InvalidResponse(msg) => write!(f, "Invalid response: {msg}"),
            Self::UnknownPeer(id) => write!(f, "Unknown peer: {id}"),
        }
    }
}

impl std::error::Error for ClientError {}
