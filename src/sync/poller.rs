//! OverlayPoller - periodic on-air status polling
//!
//! While connected, each tick fetches the overlay layers and the input map
//! and swaps them in as one [`OverlaySnapshot`]. A failed tick keeps the
//! previous snapshot so the UI never flickers on a transient blip.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connection::ConnectionManager;
use crate::drivers::{Driver, KnownInput, LayerState};

/// Result of the last successful poll
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlaySnapshot {
    pub overlays: BTreeMap<u8, LayerState>,
    /// number -> input
    pub inputs: HashMap<String, KnownInput>,
    pub polled_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct OverlayPoller {
    driver: Arc<dyn Driver>,
    connection: ConnectionManager,
    current: Arc<RwLock<Arc<OverlaySnapshot>>>,
    interval: Arc<RwLock<Duration>>,
    shutdown_flag: Arc<AtomicBool>,
    /// Set while polls keep failing, to log only the first failure loudly
    failing: Arc<AtomicBool>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl OverlayPoller {
    pub fn new(driver: Arc<dyn Driver>, connection: ConnectionManager, interval: Duration) -> Self {
        Self {
            driver,
            connection,
            current: Arc::new(RwLock::new(Arc::new(OverlaySnapshot::default()))),
            interval: Arc::new(RwLock::new(interval)),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            failing: Arc::new(AtomicBool::new(false)),
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn current(&self) -> Arc<OverlaySnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Forget the on-air state (disconnect)
    pub fn clear(&self) {
        *self.current.write() = Arc::new(OverlaySnapshot::default());
    }

    pub fn set_interval(&self, interval: Duration) {
        *self.interval.write() = interval;
    }

    /// Poll once; returns whether the snapshot was replaced
    pub async fn tick(&self) -> bool {
        if !self.connection.is_connected() {
            return false;
        }
        let generation = self.connection.generation();

        match self.driver.poll_overlay_state().await {
            Ok(result) => {
                if self.connection.generation() != generation || !self.connection.is_connected() {
                    debug!("Connection changed during poll, result discarded");
                    return false;
                }
                if self.failing.swap(false, Ordering::SeqCst) {
                    info!("✅ vMix polling recovered");
                }
                *self.current.write() = Arc::new(OverlaySnapshot {
                    overlays: result.overlays,
                    inputs: result.inputs,
                    polled_at: Some(Utc::now()),
                });
                true
            },
            Err(e) => {
                if self.failing.swap(true, Ordering::SeqCst) {
                    debug!("vMix poll still failing: {}", e);
                } else {
                    warn!("⚠️ vMix poll failed, keeping last overlay state: {}", e);
                }
                false
            },
        }
    }

    /// Spawn the polling loop (idempotent)
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            return;
        }
        self.shutdown_flag.store(false, Ordering::SeqCst);

        let poller = self.clone();
        *task = Some(tokio::spawn(async move {
            debug!("Overlay poller started");
            loop {
                let interval = *poller.interval.read();
                tokio::time::sleep(interval).await;

                if poller.shutdown_flag.load(Ordering::SeqCst) {
                    debug!("Overlay poller shutting down");
                    break;
                }
                poller.tick().await;
            }
        }));
    }

    /// Stop the loop; a later `start` spawns a fresh one
    pub fn stop(&self) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}
