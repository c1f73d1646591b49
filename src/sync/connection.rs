//! ConnectionManager - the single authoritative "connected" flag
//!
//! Owns the connect/disconnect lifecycle against the external system. Every
//! push and poll is gated on [`ConnectionManager::is_connected`]. A generation
//! counter is bumped on each state change so that results of network calls
//! started under an older state can be recognized and discarded.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{ConfigStore, ConnectionState};
use crate::drivers::{Driver, Endpoint};
use crate::error::{SyncError, SyncResult};

/// Connection status shown to the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub message: String,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            connected: false,
            message: "Disconnected".to_string(),
        }
    }
}

/// Callback invoked on every committed status change
pub type StatusCallback = Box<dyn Fn(ConnectionStatus) + Send + Sync>;

#[derive(Clone)]
pub struct ConnectionManager {
    driver: Arc<dyn Driver>,
    store: ConfigStore,
    state: Arc<RwLock<ConnectionState>>,
    /// Handshake in progress; never part of the committed state
    connecting: Arc<AtomicBool>,
    /// Endpoint of the last committed session
    last_endpoint: Arc<RwLock<Option<Endpoint>>>,
    generation: Arc<AtomicU64>,
    status: Arc<RwLock<ConnectionStatus>>,
    status_callbacks: Arc<RwLock<Vec<StatusCallback>>>,
}

impl ConnectionManager {
    pub fn new(driver: Arc<dyn Driver>, store: ConfigStore) -> Self {
        Self {
            driver,
            store,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            connecting: Arc::new(AtomicBool::new(false)),
            last_endpoint: Arc::new(RwLock::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
            status: Arc::new(RwLock::new(ConnectionStatus::default())),
            status_callbacks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Committed state, or `Connecting` while a first handshake runs
    pub fn state(&self) -> ConnectionState {
        let committed = *self.state.read();
        if committed == ConnectionState::Disconnected && self.is_connecting() {
            return ConnectionState::Connecting;
        }
        committed
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        *self.state.read() == ConnectionState::Connected
    }

    /// Bumped on every committed state change
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.read().clone()
    }

    /// Subscribe to status changes
    pub fn on_status(&self, callback: StatusCallback) {
        self.status_callbacks.write().push(callback);
    }

    fn emit_status(&self, status: ConnectionStatus) {
        *self.status.write() = status.clone();
        for callback in self.status_callbacks.read().iter() {
            callback(status.clone());
        }
    }

    fn bump(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Handshake with `host:port` and commit the connected state
    ///
    /// The committed state stays in force while the handshake runs, so a
    /// re-connect keeps pushing to the current endpoint, and a failed
    /// attempt leaves everything as it was. Returns whether the endpoint
    /// differs from the one of the last committed session.
    pub async fn connect(&self, host: &str, port: u16) -> SyncResult<bool> {
        let host = host.trim();
        if host.is_empty() {
            return Err(SyncError::Configuration("vMix host cannot be empty".into()));
        }
        if self.connecting.swap(true, Ordering::SeqCst) {
            return Err(SyncError::Connectivity(
                "a connection attempt is already in progress".into(),
            ));
        }

        let attempt = self.generation();
        let endpoint = Endpoint::new(host, port);
        let result = self.driver.connect(&endpoint).await;
        self.connecting.store(false, Ordering::SeqCst);

        if let Err(e) = result {
            warn!("❌ Connection to vMix at {} failed: {}", endpoint, e);
            return Err(e);
        }
        if self.generation() != attempt {
            // disconnect() ran while the handshake was in flight
            debug!("Discarding superseded connection to {}", endpoint);
            self.driver.disconnect().await;
            return Err(SyncError::Connectivity("connection attempt cancelled".into()));
        }

        *self.state.write() = ConnectionState::Connected;
        self.bump();
        let previous = self.last_endpoint.write().replace(endpoint.clone());
        let endpoint_changed = previous.is_some_and(|previous| previous != endpoint);

        self.store
            .set_connection(host, port, ConnectionState::Connected);
        self.store.persist_or_warn().await;

        info!("✅ Connected to vMix at {} via {}", endpoint, self.driver.name());
        self.emit_status(ConnectionStatus {
            connected: true,
            message: format!("Connected to {}", endpoint),
        });
        Ok(endpoint_changed)
    }

    /// Commit the disconnected state; always succeeds locally
    pub async fn disconnect(&self) {
        *self.state.write() = ConnectionState::Disconnected;
        self.bump();
        self.driver.disconnect().await;

        let (host, port) = self.store.read(|c| (c.vmix.host.clone(), c.vmix.port));
        self.store
            .set_connection(&host, port, ConnectionState::Disconnected);
        self.store.persist_or_warn().await;

        info!("🔌 Disconnected from vMix");
        self.emit_status(ConnectionStatus::default());
    }

    /// Probe reachability without touching the committed state
    pub async fn test_connection(&self, host: &str, port: u16) -> SyncResult<String> {
        let endpoint = Endpoint::new(host.trim(), port);
        let version = self.driver.test_connection(&endpoint).await?;
        debug!("vMix reachable at {} ({})", endpoint, version);
        Ok(version)
    }
}
