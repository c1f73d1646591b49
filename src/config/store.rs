//! ConfigStore - live configuration shared by the engine
//!
//! Holds the current `AppConfig` behind a lock and writes edits back to the
//! YAML file. Reads never block on I/O.

use super::{AppConfig, ConnectionState, InputConfig};
use anyhow::Result;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct ConfigStore {
    config: Arc<RwLock<AppConfig>>,
    /// Backing file; `None` keeps the store memory-only (tests, dry runs)
    path: Option<PathBuf>,
}

impl ConfigStore {
    pub fn new(config: AppConfig, path: Option<PathBuf>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            path,
        }
    }

    pub fn in_memory(config: AppConfig) -> Self {
        Self::new(config, None)
    }

    /// Clone of the whole configuration
    pub fn snapshot(&self) -> AppConfig {
        self.config.read().clone()
    }

    /// Read a value without cloning the whole config
    pub fn read<R>(&self, f: impl FnOnce(&AppConfig) -> R) -> R {
        f(&self.config.read())
    }

    pub fn input(&self, id: &str) -> Option<InputConfig> {
        self.config.read().vmix.inputs.get(id).cloned()
    }

    /// Inputs in `input_order`, followed by unlisted inputs sorted by id
    pub fn ordered_inputs(&self) -> Vec<InputConfig> {
        let config = self.config.read();
        let inputs = &config.vmix.inputs;

        let mut ordered: Vec<InputConfig> = config
            .vmix
            .input_order
            .iter()
            .filter_map(|id| inputs.get(id).cloned())
            .collect();

        // BTreeMap iteration is already sorted by id
        ordered.extend(
            inputs
                .values()
                .filter(|input| !config.vmix.input_order.contains(&input.id))
                .cloned(),
        );
        ordered
    }

    pub fn enabled_inputs(&self) -> Vec<InputConfig> {
        self.ordered_inputs()
            .into_iter()
            .filter(|input| input.enabled)
            .collect()
    }

    /// Replace the whole configuration (hot reload)
    pub fn replace(&self, mut config: AppConfig) {
        for (id, input) in config.vmix.inputs.iter_mut() {
            input.id = id.clone();
        }
        *self.config.write() = config;
    }

    /// Apply an edit to one input; returns the input as it was before the edit
    pub fn update_input(
        &self,
        id: &str,
        edit: impl FnOnce(&mut InputConfig),
    ) -> Option<InputConfig> {
        let mut config = self.config.write();
        let input = config.vmix.inputs.get_mut(id)?;
        let before = input.clone();
        edit(input);
        Some(before)
    }

    /// Record the committed connection state (and the endpoint it applies to)
    pub fn set_connection(&self, host: &str, port: u16, state: ConnectionState) {
        let mut config = self.config.write();
        config.vmix.host = host.to_string();
        config.vmix.port = port;
        config.vmix.connection_state = state;
    }

    /// Write the current configuration back to disk
    pub async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let config = self.snapshot();
        config.save(path).await?;
        debug!("Configuration persisted to {}", path.display());
        Ok(())
    }

    /// Persist and log failures; persistence is best-effort for the engine
    pub async fn persist_or_warn(&self) {
        if let Err(e) = self.persist().await {
            warn!("Failed to persist configuration: {:#}", e);
        }
    }
}
