//! Wire types shared by the node server and client

use serde::{Deserialize, Serialize};

use crate::authority::StrikeOutcome;
use crate::clock::{LogicalTimestamp, NodeId};
use crate::config::Role;
use crate::exclusion::RequestDecision;
use crate::session::CompletionSource;

// ============================================================================
// Envelope
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: NodeId,
    pub role: Role,
    pub version: String,
    pub uptime_secs: u64,
}

// ============================================================================
// Time
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeResponse {
    pub node_id: NodeId,
    /// Reported time, epoch microseconds
    pub time_micros: i64,
    pub offset_micros: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustTimeRequest {
    pub delta_micros: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustTimeResponse {
    pub offset_micros: i64,
}

// ============================================================================
// Mutual Exclusion
// ============================================================================

/// Both `Request` and `Reply` carry the same payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusionMessage {
    pub node_id: NodeId,
    pub timestamp: LogicalTimestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusionAck {
    pub node_id: NodeId,
    pub clock: LogicalTimestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<RequestDecision>,
}

// ============================================================================
// Sessions
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmitRequest {
    pub session_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeRequest {
    pub source: CompletionSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupToggleRequest {
    pub running: bool,
}

// ============================================================================
// Misconduct
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MisconductRequest {
    pub session_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MisconductResponse {
    pub session_key: String,
    pub outcome: StrikeOutcome,
    /// The authority applied the penalty
    pub forwarded: bool,
}
