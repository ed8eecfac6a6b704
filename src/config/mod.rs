//! Configuration management for proctor nodes
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then `PROCTOR_*` environment variables. The result is validated before any
//! node starts.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::clock::NodeId;
use crate::session::questions::{default_question_bank, Question};

// ============================================================================
// Roles
// ============================================================================

/// The three logical nodes of the system
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Runs time sync, admission and sessions
    Coordinator,
    /// Holds the marksheet and receives results
    Authority,
    /// Drives exams and load on behalf of students
    Agent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coordinator => "coordinator",
            Self::Authority => "authority",
            Self::Agent => "agent",
        }
    }

    pub fn all() -> [Role; 3] {
        [Self::Coordinator, Self::Authority, Self::Agent]
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cluster: ClusterConfig,
    pub exam: ExamConfig,
    pub admission: AdmissionConfig,
    pub exclusion: ExclusionConfig,
    pub timesync: TimeSyncConfig,
    pub rpc: RpcConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Addresses of the three nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub coordinator: PeerConfig,
    pub authority: PeerConfig,
    pub agent: PeerConfig,
}

/// One node's identity and addresses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Stable node id (Ricart-Agrawala tie-break)
    pub id: String,

    /// Base URL peers use to reach this node
    pub url: String,

    /// Address the node's server binds to
    pub bind_address: SocketAddr,

    /// Clock skew applied at startup, in seconds (simulates an unsynced clock)
    #[serde(default)]
    pub initial_skew_secs: i64,
}

impl PeerConfig {
    fn local(id: &str, port: u16, skew: i64) -> Self {
        Self {
            id: id.to_string(),
            url: format!("http://127.0.0.1:{port}"),
            bind_address: SocketAddr::from(([127, 0, 0, 1], port)),
            initial_skew_secs: skew,
        }
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::new(self.id.clone())
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            coordinator: PeerConfig::local("coordinator", 8000, 0),
            authority: PeerConfig::local("authority", 8002, 7),
            agent: PeerConfig::local("agent", 8003, -4),
        }
    }
}

impl ClusterConfig {
    pub fn peer(&self, role: Role) -> &PeerConfig {
        match role {
            Role::Coordinator => &self.coordinator,
            Role::Authority => &self.authority,
            Role::Agent => &self.agent,
        }
    }

    fn peer_mut(&mut self, role: Role) -> &mut PeerConfig {
        match role {
            Role::Coordinator => &mut self.coordinator,
            Role::Authority => &mut self.authority,
            Role::Agent => &mut self.agent,
        }
    }

    /// Every node except `role`
    pub fn others(&self, role: Role) -> Vec<(Role, &PeerConfig)> {
        Role::all()
            .into_iter()
            .filter(|r| *r != role)
            .map(|r| (r, self.peer(r)))
            .collect()
    }
}

/// A student allowed to sit the exam
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentEntry {
    pub key: String,
    pub name: String,
}

/// Exam session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExamConfig {
    /// Session length in seconds
    pub duration_secs: u64,

    /// A manual submit this close to the deadline counts as a race
    pub race_window_ms: u64,

    /// Known students; seeds the marksheet
    pub roster: Vec<StudentEntry>,

    /// Refuse admission to keys missing from the roster
    pub enforce_roster: bool,

    pub questions: Vec<Question>,
}

impl Default for ExamConfig {
    fn default() -> Self {
        let roster = [
            ("29", "Mayuresh"),
            ("40", "Ayush"),
            ("42", "Aashna"),
            ("50", "Rohit"),
            ("52", "Rushikesh"),
        ]
        .into_iter()
        .map(|(key, name)| StudentEntry {
            key: key.to_string(),
            name: name.to_string(),
        })
        .collect();

        Self {
            duration_secs: 60,
            race_window_ms: 1000,
            roster,
            enforce_roster: false,
            questions: default_question_bank(),
        }
    }
}

impl ExamConfig {
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    #[must_use]
    pub fn race_window(&self) -> Duration {
        Duration::from_millis(self.race_window_ms)
    }

    /// Keys admission accepts; empty means anyone
    pub fn admission_roster(&self) -> Vec<String> {
        if self.enforce_roster {
            self.roster.iter().map(|s| s.key.clone()).collect()
        } else {
            Vec::new()
        }
    }
}

/// Primary/backup admission settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Total concurrent sessions across both lanes
    pub capacity: usize,

    /// Primary lane limit; above it requests spill to the backup lane
    pub threshold: usize,

    /// Backup lane limit; defaults to `capacity - threshold`
    pub backup_capacity: Option<usize>,

    /// Whether the backup lane starts running
    pub backup_enabled: bool,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            capacity: 8,
            threshold: 5,
            backup_capacity: None,
            backup_enabled: true,
        }
    }
}

impl AdmissionConfig {
    pub fn effective_backup_capacity(&self) -> usize {
        self.backup_capacity
            .unwrap_or_else(|| self.capacity.saturating_sub(self.threshold))
    }
}

/// Ricart-Agrawala settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExclusionConfig {
    /// Enter the critical section after this long even without all replies.
    /// `None` waits indefinitely.
    pub reply_timeout_ms: Option<u64>,
}

impl Default for ExclusionConfig {
    fn default() -> Self {
        Self {
            reply_timeout_ms: Some(10_000),
        }
    }
}

impl ExclusionConfig {
    pub fn reply_timeout(&self) -> Option<Duration> {
        self.reply_timeout_ms.map(Duration::from_millis)
    }
}

/// Berkeley synchronization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSyncConfig {
    /// Per-participant query timeout
    pub query_timeout_ms: u64,

    /// Repeat the sync on this interval after startup
    pub resync_interval_secs: Option<u64>,

    /// Sync once at coordinator startup, after peers answer a health probe
    pub startup_sync: bool,

    /// How long the coordinator waits for peers before the first sync
    pub startup_wait_secs: u64,
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: 2000,
            resync_interval_secs: None,
            startup_sync: true,
            startup_wait_secs: 30,
        }
    }
}

impl TimeSyncConfig {
    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// Node-to-node call settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub timeout_ms: u64,
    pub enable_cors: bool,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            enable_cors: true,
        }
    }
}

impl RpcConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Result ledger settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite ledger path; in-memory ledger when unset
    pub ledger_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl Config {
    /// Defaults overridden by environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// File (if given) plus environment overrides, validated
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `PROCTOR_*` environment variables on top of the current values
    pub fn apply_env_overrides(&mut self) {
        for role in Role::all() {
            let var = format!("PROCTOR_{}_URL", role.as_str().to_uppercase());
            if let Ok(url) = std::env::var(&var) {
                self.cluster.peer_mut(role).url = url;
            }
        }

        if let Some(v) = env_parse::<u64>("PROCTOR_EXAM_DURATION_SECS") {
            self.exam.duration_secs = v;
        }
        if let Some(v) = env_parse::<u64>("PROCTOR_RACE_WINDOW_MS") {
            self.exam.race_window_ms = v;
        }
        if let Some(v) = env_parse::<bool>("PROCTOR_ENFORCE_ROSTER") {
            self.exam.enforce_roster = v;
        }
        if let Some(v) = env_parse::<usize>("PROCTOR_ADMISSION_CAPACITY") {
            self.admission.capacity = v;
        }
        if let Some(v) = env_parse::<usize>("PROCTOR_ADMISSION_THRESHOLD") {
            self.admission.threshold = v;
        }
        if let Some(v) = env_parse::<u64>("PROCTOR_REPLY_TIMEOUT_MS") {
            // 0 disables the liveness override
            self.exclusion.reply_timeout_ms = (v > 0).then_some(v);
        }
        if let Some(v) = env_parse::<u64>("PROCTOR_RPC_TIMEOUT_MS") {
            self.rpc.timeout_ms = v;
        }
        if let Ok(path) = std::env::var("PROCTOR_LEDGER_PATH") {
            self.storage.ledger_path = Some(PathBuf::from(path));
        }
        if let Ok(level) = std::env::var("PROCTOR_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("PROCTOR_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let mut ids = HashSet::new();
        for role in Role::all() {
            let peer = self.cluster.peer(role);
            if peer.id.is_empty() {
                return Err(ConfigError::MissingField {
                    field: format!("cluster.{role}.id"),
                });
            }
            if !ids.insert(peer.id.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: format!("cluster.{role}.id"),
                    reason: format!("Duplicate node id '{}'", peer.id),
                });
            }
            url::Url::parse(&peer.url).map_err(|e| ConfigError::InvalidValue {
                field: format!("cluster.{role}.url"),
                reason: e.to_string(),
            })?;
        }

        if self.admission.capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "admission.capacity".to_string(),
                reason: "Must allow at least 1 session".to_string(),
            });
        }

        if self.admission.threshold > self.admission.capacity {
            return Err(ConfigError::InvalidValue {
                field: "admission.threshold".to_string(),
                reason: "Threshold cannot exceed capacity".to_string(),
            });
        }

        if self.exam.duration_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "exam.duration_secs".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.exam.questions.is_empty() {
            return Err(ConfigError::MissingField {
                field: "exam.questions".to_string(),
            });
        }

        if self.rpc.timeout_ms == 0 || self.timesync.query_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rpc.timeout_ms".to_string(),
                reason: "Timeouts must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|v| v.parse::<T>().ok())
}

// ============================================================================
// Errors
// ============================================================================

/// Configuration errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    InvalidValue { field: String, reason: String },
    MissingField { field: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{field}': {reason}")
            }
            Self::MissingField { field } => {
                write!(f, "Missing required field: {field}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
