//! Node HTTP server
//!
//! Every role runs the same server binary. [`NodeContext`] wires up the
//! components a role owns; the router rejects endpoints a role does not
//! serve.

use axum::Router;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::api;
use super::client::{ClientConfig, HttpTransport, NodeClient};
use crate::admission::AdmissionController;
use crate::authority::{Marksheet, StrikeTracker};
use crate::clock::{LogicalClock, NodeId, WallClock};
use crate::config::{Config, Role, TimeSyncConfig};
use crate::error::Result;
use crate::exclusion::RicartAgrawala;
use crate::ledger::{ForwardingSink, MemoryLedger, ResultSink, SqliteLedger};
use crate::session::{RaceResolver, SessionStore};
use crate::timesync::{BerkeleySync, LocalTime, TimeSource};
use crate::utils::retry::{with_retry, RetryConfig};

// ============================================================================
// Node Context
// ============================================================================

/// Components owned by the coordinator
pub struct CoordinatorServices {
    pub sessions: Arc<SessionStore>,
    pub sync: Arc<BerkeleySync>,
    pub strikes: StrikeTracker,
}

/// Everything a running node holds
pub struct NodeContext {
    pub role: Role,
    pub node_id: NodeId,
    pub wall_clock: Arc<WallClock>,
    pub exclusion: Arc<RicartAgrawala>,
    pub peers: HashMap<Role, Arc<NodeClient>>,
    pub coordinator: Option<CoordinatorServices>,
    pub marksheet: Option<Arc<Marksheet>>,
}

impl NodeContext {
    pub fn build(config: &Config, role: Role) -> Result<Self> {
        let own = config.cluster.peer(role);
        let node_id = own.node_id();

        let wall_clock = Arc::new(WallClock::with_offset_micros(
            own.initial_skew_secs * 1_000_000,
        ));
        crate::metrics::set_clock_offset(wall_clock.offset_micros());

        let mut peers = HashMap::new();
        for (peer_role, peer) in config.cluster.others(role) {
            let client_config = ClientConfig::new(&peer.url).with_timeout(config.rpc.timeout());
            let client = NodeClient::new(peer.node_id(), client_config)?;
            peers.insert(peer_role, Arc::new(client));
        }

        let transport = Arc::new(HttpTransport::new(peers.values().cloned()));
        let exclusion = Arc::new(RicartAgrawala::new(
            node_id.clone(),
            peers.values().map(|p| p.remote_id().clone()).collect(),
            Arc::new(LogicalClock::new()),
            transport,
            config.exclusion.reply_timeout(),
        ));

        let coordinator = match role {
            Role::Coordinator => Some(Self::coordinator_services(
                config,
                &node_id,
                &wall_clock,
                &peers,
            )?),
            _ => None,
        };

        let marksheet = match role {
            Role::Authority => Some(Arc::new(Marksheet::new(&config.exam.roster))),
            _ => None,
        };

        Ok(Self {
            role,
            node_id,
            wall_clock,
            exclusion,
            peers,
            coordinator,
            marksheet,
        })
    }

    fn coordinator_services(
        config: &Config,
        node_id: &NodeId,
        wall_clock: &Arc<WallClock>,
        peers: &HashMap<Role, Arc<NodeClient>>,
    ) -> Result<CoordinatorServices> {
        let local: Arc<dyn ResultSink> = match &config.storage.ledger_path {
            Some(path) => Arc::new(SqliteLedger::new(path)?),
            None => Arc::new(MemoryLedger::new()),
        };
        let sink: Arc<dyn ResultSink> = match peers.get(&Role::Authority) {
            Some(authority) => Arc::new(ForwardingSink::new(local, authority.clone())),
            None => local,
        };

        let admission = Arc::new(AdmissionController::from_config(&config.admission));
        let sessions = Arc::new(SessionStore::new(
            admission,
            RaceResolver::new(config.exam.race_window()),
            sink,
            Arc::clone(wall_clock),
            config.exam.questions.clone(),
            config.exam.admission_roster(),
            config.exam.duration(),
        ));

        // Participants in cluster order so reports read the same every run
        let participants: Vec<Arc<dyn TimeSource>> = config
            .cluster
            .others(Role::Coordinator)
            .into_iter()
            .filter_map(|(r, _)| peers.get(&r))
            .map(|p| p.clone() as Arc<dyn TimeSource>)
            .collect();
        let sync = Arc::new(BerkeleySync::new(
            Arc::new(LocalTime::new(node_id.clone(), Arc::clone(wall_clock))),
            participants,
            config.timesync.query_timeout(),
        ));

        Ok(CoordinatorServices {
            sessions,
            sync,
            strikes: StrikeTracker::new(),
        })
    }

    pub fn peer(&self, role: Role) -> Option<&Arc<NodeClient>> {
        self.peers.get(&role)
    }
}

// ============================================================================
// Server
// ============================================================================

/// Shared state for request handlers
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<NodeContext>,
    pub start_time: Instant,
}

pub struct NodeServer {
    config: Config,
    role: Role,
    state: AppState,
}

impl NodeServer {
    pub fn new(config: Config, role: Role) -> std::result::Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::ConfigError(e.to_string()))?;

        let ctx =
            NodeContext::build(&config, role).map_err(|e| ServerError::InitError(e.to_string()))?;

        Ok(Self {
            config,
            role,
            state: AppState {
                ctx: Arc::new(ctx),
                start_time: Instant::now(),
            },
        })
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.state.ctx
    }

    pub fn build_router(&self) -> Router {
        let mut router = api::create_router(self.state.clone());

        if self.config.rpc.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }

        router.layer(TraceLayer::new_for_http())
    }

    pub async fn start(&self) -> std::result::Result<(), ServerError> {
        self.start_with_shutdown(std::future::pending()).await
    }

    pub async fn start_with_shutdown<F>(&self, signal: F) -> std::result::Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.cluster.peer(self.role).bind_address;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("{addr}: {e}")))?;

        self.serve(listener, signal).await
    }

    /// Serve on an already-bound listener until `signal` resolves.
    pub async fn serve<F>(
        &self,
        listener: TcpListener,
        signal: F,
    ) -> std::result::Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr().ok();
        tracing::info!(
            role = %self.role,
            node = %self.state.ctx.node_id,
            addr = ?local_addr,
            "Node server listening"
        );

        self.spawn_background_tasks();

        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| ServerError::ServeError(e.to_string()))?;

        if let Some(services) = &self.state.ctx.coordinator {
            let dropped = services.sessions.shutdown().await;
            if dropped > 0 {
                tracing::warn!(dropped, "Live sessions dropped on shutdown");
            }
        }

        tracing::info!(role = %self.role, "Node server stopped");
        Ok(())
    }

    fn spawn_background_tasks(&self) {
        let Some(services) = &self.state.ctx.coordinator else {
            return;
        };
        if self.config.timesync.startup_sync {
            // No deadline is stamped until the startup sync settles the clock
            services.sessions.hold_admissions();
            tokio::spawn(bootstrap_sync(
                Arc::clone(&self.state.ctx),
                self.config.timesync.clone(),
            ));
        }
    }

    pub fn info(&self) -> ServerInfo {
        let own = self.config.cluster.peer(self.role);
        ServerInfo {
            role: self.role,
            node_id: own.node_id(),
            bind_address: own.bind_address,
            url: own.url.clone(),
            cors_enabled: self.config.rpc.enable_cors,
        }
    }
}

/// Wait for peers, sync once, then keep resyncing if configured.
async fn bootstrap_sync(ctx: Arc<NodeContext>, config: TimeSyncConfig) {
    let Some(services) = ctx.coordinator.as_ref() else {
        return;
    };

    let retry = RetryConfig::for_window(
        Duration::from_secs(config.startup_wait_secs),
        Duration::from_secs(1),
    );
    let probes = ctx.peers.iter().map(|(role, peer)| {
        let peer = Arc::clone(peer);
        let retry = retry.clone();
        async move {
            let probe = with_retry(&retry, || {
                let peer = Arc::clone(&peer);
                async move { Ok(peer.health().await?) }
            })
            .await;
            if let Err(e) = probe {
                tracing::warn!(peer = %role, error = %e, "Peer not healthy, syncing without it");
            }
        }
    });
    futures::future::join_all(probes).await;

    match services.sync.run_sync().await {
        Ok(report) => tracing::info!("{}", report.display().trim_end()),
        Err(e) => tracing::error!(error = %e, "Startup sync failed, admitting on the local clock"),
    }
    services.sessions.open_admissions();

    if let Some(secs) = config.resync_interval_secs.filter(|s| *s > 0) {
        Arc::clone(&services.sync).start_periodic(Duration::from_secs(secs));
    }
}

// ============================================================================
// Server Info
// ============================================================================

#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub role: Role,
    pub node_id: NodeId,
    pub bind_address: SocketAddr,
    pub url: String,
    pub cors_enabled: bool,
}

impl ServerInfo {
    pub fn display(&self) -> String {
        format!(
            "Proctor node\n\
             ============\n\
             Role:     {}\n\
             Node ID:  {}\n\
             Bind:     {}\n\
             URL:      {}\n\
             CORS:     {}",
            self.role,
            self.node_id,
            self.bind_address,
            self.url,
            if self.cors_enabled { "enabled" } else { "disabled" }
        )
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum ServerError {
    ConfigError(String),
    InitError(String),
    BindError(String),
    ServeError(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "Configuration error: {msg}"),
            Self::InitError(msg) => write!(f, "Initialization error: {msg}"),
            Self::BindError(msg) => write!(f, "Failed to bind: {msg}"),
            Self::ServeError(msg) => write!(f, "Server error: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {}
