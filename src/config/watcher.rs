//! Configuration file watcher for hot-reload support
//!
//! A reload that differs from the live `ConfigStore` contents is a settings
//! save; the engine answers it with a cache reset and a forced resync. Our own
//! write-backs (connection state, remaps) reload identical content and are
//! dropped here.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{AppConfig, ConfigStore};

/// Time given to editors to finish writing before the file is re-read
const RELOAD_SETTLE: Duration = Duration::from_millis(100);

/// Config watcher that monitors file changes and sends reload notifications
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<AppConfig>,
}

impl ConfigWatcher {
    /// Watch `config_path`, comparing reloads against `store`
    pub fn new(config_path: PathBuf, store: ConfigStore) -> Result<Self> {
        let (tx, rx) = mpsc::channel(10);

        let path_for_events = config_path.clone();

        // notify callbacks run on their own OS thread, not in Tokio context
        let runtime_handle = tokio::runtime::Handle::current();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        return;
                    }
                    debug!("Config file modified: {:?}", event.paths);

                    let config_path = path_for_events.clone();
                    let store = store.clone();
                    let tx = tx.clone();

                    runtime_handle.spawn(async move {
                        tokio::time::sleep(RELOAD_SETTLE).await;

                        match AppConfig::load(&config_path).await {
                            Ok(new_config) => {
                                if store.read(|current| *current == new_config) {
                                    debug!("Config reload matches live settings, ignoring");
                                    return;
                                }
                                info!("Configuration changed on disk");
                                if let Err(e) = tx.send(new_config).await {
                                    error!("Failed to send config update: {}", e);
                                }
                            }
                            Err(e) => {
                                warn!("Failed to reload config (keeping old config): {:#}", e);
                            }
                        }
                    });
                }
                Err(e) => {
                    error!("Watch error: {}", e);
                }
            }
        })?;

        watcher
            .watch(&config_path, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config file: {}", config_path.display()))?;

        info!("Config file watcher started for: {}", config_path.display());

        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Wait for the next changed configuration
    /// Returns None if the watcher has been closed
    pub async fn next_config(&mut self) -> Option<AppConfig> {
        self.rx.recv().await
    }
}
