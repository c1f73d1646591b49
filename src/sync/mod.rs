//! Sync engine - mirrors match state into vMix
//!
//! `SyncEngine` composes the parts and is the only surface the UI layer
//! (HTTP API, CLI) talks to:
//! - `ConnectionManager` gates everything on the committed connected flag
//! - `UpdatePipeline` debounces and diff-caches field writes per input
//! - `OverlayPoller` keeps the latest on-air state
//! - `IdentityResolver` answers overlay queries from that state
//! - `LogoStore` keeps logo files in step with the state's base64 payloads
//!
//! Failures never escape as errors: operations return [`OpResult`] and poll
//! problems are only logged.

pub mod connection;
pub mod identity;
pub mod pipeline;
pub mod poller;
pub mod resolver;

#[cfg(test)]
mod tests;

use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use connection::{ConnectionManager, ConnectionStatus};
pub use identity::IdentityResolver;
pub use pipeline::UpdatePipeline;
pub use poller::{OverlayPoller, OverlaySnapshot};
pub use resolver::FieldResolver;

use crate::config::{AppConfig, ConfigStore, InputConfig};
use crate::drivers::{Driver, KnownInput};
use crate::error::{OpResult, SyncError, SyncResult};
use crate::logos::LogoStore;
use crate::scoring::Side;
use crate::snapshot::MatchSnapshot;

/// New external identifiers for an input
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RemapTarget {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl From<&KnownInput> for RemapTarget {
    fn from(input: &KnownInput) -> Self {
        let non_empty = |s: &str| Some(s.trim().to_string()).filter(|s| !s.is_empty());
        Self {
            key: non_empty(&input.key),
            number: non_empty(&input.number),
            title: non_empty(&input.title),
        }
    }
}

/// Overlay status of one configured input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OverlayStatus {
    pub active: bool,
    pub another_on_air: bool,
}

fn logo_payload(state: &Value, side: Side) -> Option<String> {
    state
        .pointer(&format!("/{}/logoBase64", side.team_key()))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn team_mut(state: &mut Value, side: Side) -> Option<&mut serde_json::Map<String, Value>> {
    state.get_mut(side.team_key()).and_then(Value::as_object_mut)
}

fn resolver_for(config: &AppConfig) -> FieldResolver {
    FieldResolver::new(config.colors.clone(), config.logos.public_base_url.clone())
}

/// Connect once to the configured endpoint and list its inputs
///
/// Runs on a detached in-memory store, so the persisted connection state
/// is left exactly as it was.
pub async fn list_inputs_once(
    driver: Arc<dyn Driver>,
    config: &AppConfig,
) -> SyncResult<Vec<KnownInput>> {
    let engine = SyncEngine::new(ConfigStore::in_memory(config.clone()), driver, None);
    engine
        .connection
        .connect(&config.vmix.host, config.vmix.port)
        .await?;
    let inputs = engine.list_known_inputs().await;
    engine.connection.disconnect().await;
    inputs
}

#[derive(Clone)]
pub struct SyncEngine {
    store: ConfigStore,
    driver: Arc<dyn Driver>,
    connection: ConnectionManager,
    pipeline: UpdatePipeline,
    poller: OverlayPoller,
    /// layer -> input id last shown on it from here
    claims: Arc<Mutex<BTreeMap<u8, String>>>,
    logos: Option<Arc<LogoStore>>,
}

impl SyncEngine {
    pub fn new(store: ConfigStore, driver: Arc<dyn Driver>, logos: Option<LogoStore>) -> Self {
        let config = store.snapshot();
        let connection = ConnectionManager::new(Arc::clone(&driver), store.clone());
        let pipeline = UpdatePipeline::new(
            Arc::clone(&driver),
            store.clone(),
            connection.clone(),
            resolver_for(&config),
            config.sync.debounce(),
        );
        let poller = OverlayPoller::new(
            Arc::clone(&driver),
            connection.clone(),
            config.sync.poll_interval(),
        );

        let logos = logos.map(|logos| {
            let hook_pipeline = pipeline.clone();
            logos.set_on_change(Box::new(move || hook_pipeline.reset_image_fields_cache()));
            Arc::new(logos)
        });

        Self {
            store,
            driver,
            connection,
            pipeline,
            poller,
            claims: Arc::new(Mutex::new(BTreeMap::new())),
            logos,
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn pipeline(&self) -> &UpdatePipeline {
        &self.pipeline
    }

    pub fn poller(&self) -> &OverlayPoller {
        &self.poller
    }

    pub fn logos(&self) -> Option<&LogoStore> {
        self.logos.as_deref()
    }

    // ===== Connection =====

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub async fn connect(&self, host: &str, port: u16) -> OpResult {
        match self.connection.connect(host, port).await {
            Ok(true) => {
                // The cache describes another vMix machine
                info!("vMix endpoint changed, forcing a full resend");
                self.poller.clear();
                self.claims.lock().clear();
                self.pipeline.reset_all();
                self.pipeline.requeue(true);
                OpResult::ok()
            },
            Ok(false) => {
                // Catch vMix up with whatever changed while offline
                self.pipeline.requeue(false);
                OpResult::ok()
            },
            Err(e) => OpResult::failed(e.to_string()),
        }
    }

    /// Reconnect to the configured endpoint if the last session ended connected
    pub async fn restore_connection(&self) -> Option<OpResult> {
        let (host, port, state) = self.store.read(|c| {
            (c.vmix.host.clone(), c.vmix.port, c.vmix.connection_state)
        });
        if state != crate::config::ConnectionState::Connected {
            return None;
        }
        info!("Restoring vMix connection to {}:{}", host, port);
        Some(self.connect(&host, port).await)
    }

    pub async fn disconnect(&self) -> OpResult {
        self.connection.disconnect().await;
        self.pipeline.cancel_all();
        self.poller.clear();
        self.claims.lock().clear();
        OpResult::ok()
    }

    pub async fn test_connection(&self, host: &str, port: u16) -> OpResult {
        match self.connection.test_connection(host, port).await {
            Ok(_) => OpResult::ok(),
            Err(e) => OpResult::failed(e.to_string()),
        }
    }

    pub fn start_poller(&self) {
        self.poller.start();
    }

    pub async fn shutdown(&self) {
        self.poller.stop();
        self.pipeline.cancel_all();
        debug!("Sync engine stopped");
    }

    // ===== Match data =====

    pub fn update_match_data(&self, snapshot: MatchSnapshot, force: bool) {
        self.pipeline.update_match_data(snapshot, force);
    }

    /// Settings were saved: apply them, drop every cache and resend everything
    pub fn on_settings_saved(&self, config: AppConfig) {
        self.pipeline
            .reconfigure(resolver_for(&config), config.sync.debounce());
        self.poller.set_interval(config.sync.poll_interval());
        self.store.replace(config);

        self.pipeline.reset_all();
        self.pipeline.requeue(true);
        info!("⚙️ Settings applied, forced resync queued");
    }

    /// A state record was loaded: reconcile both logo slots, then queue it
    ///
    /// A present `logoBase64` is rewritten to disk. Without one the payload
    /// is recovered from the slot's file. The returned snapshot carries the
    /// reconciled `logoBase64` and `logoPath` values.
    pub async fn load_match(&self, mut state: Value, force: bool) -> Result<MatchSnapshot> {
        if let Some(logos) = &self.logos {
            for side in [Side::A, Side::B] {
                let payload = logo_payload(&state, side);
                let loaded = logos.load_team_logo(side, payload.as_deref()).await?;
                if let Some(team) = team_mut(&mut state, side) {
                    match loaded {
                        Some(logo) => {
                            team.insert("logoBase64".into(), Value::String(logo.base64));
                            team.insert("logoPath".into(), Value::String(logo.path));
                        },
                        None => {
                            team.remove("logoPath");
                        },
                    }
                }
            }
        }

        let snapshot = MatchSnapshot::new(state);
        self.pipeline.update_match_data(snapshot.clone(), force);
        Ok(snapshot)
    }

    /// Teams swapped sides: re-derive both logo files, then force a resend
    ///
    /// `state` is the state record after the swap. Its logo paths are
    /// rewritten to the freshly derived files.
    pub async fn on_teams_swapped(&self, mut state: Value) -> Result<MatchSnapshot> {
        if let Some(logos) = &self.logos {
            let (a, b) = (logo_payload(&state, Side::A), logo_payload(&state, Side::B));
            let paths = logos.swap_team_logos(a.as_deref(), b.as_deref()).await?;

            for (side, path) in [(Side::A, paths.0), (Side::B, paths.1)] {
                if let Some(team) = team_mut(&mut state, side) {
                    match path {
                        Some(path) => team.insert("logoPath".into(), Value::String(path)),
                        None => team.remove("logoPath"),
                    };
                }
            }
        }

        let snapshot = MatchSnapshot::new(state);
        self.pipeline.update_match_data(snapshot.clone(), true);
        Ok(snapshot)
    }

    /// Persist a team logo; returns its relative path
    pub async fn save_logo(&self, payload: &str, slot: Side) -> Result<String> {
        let logos = self
            .logos
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Logo storage is not configured"))?;
        logos.save_logo(payload, slot).await
    }

    // ===== Overlays =====

    fn overlay_input(&self, input_id: &str) -> SyncResult<(InputConfig, String)> {
        let input = self
            .store
            .input(input_id)
            .ok_or_else(|| SyncError::unknown_input(input_id))?;
        if !input.enabled {
            return Err(SyncError::Configuration(format!(
                "input '{}' is disabled",
                input.label()
            )));
        }
        let target = input.target().ok_or_else(|| {
            SyncError::Configuration(format!("input '{}' has no vMix identifier", input.label()))
        })?;
        if !self.connection.is_connected() {
            return Err(SyncError::not_connected());
        }
        Ok((input, target))
    }

    pub async fn show_overlay(&self, input_id: &str) -> OpResult {
        let result: SyncResult<()> = async {
            let (input, target) = self.overlay_input(input_id)?;
            self.driver.show_overlay(&target, input.overlay_layer).await?;
            self.claims
                .lock()
                .insert(input.overlay_layer, input.id.clone());
            info!("📺 '{}' on overlay {}", input.label(), input.overlay_layer);
            Ok(())
        }
        .await;
        result.into()
    }

    pub async fn hide_overlay(&self, input_id: &str) -> OpResult {
        let result: SyncResult<()> = async {
            let (input, target) = self.overlay_input(input_id)?;
            self.driver.hide_overlay(&target, input.overlay_layer).await?;
            let mut claims = self.claims.lock();
            if claims.get(&input.overlay_layer) == Some(&input.id) {
                claims.remove(&input.overlay_layer);
            }
            info!("'{}' off overlay {}", input.label(), input.overlay_layer);
            Ok(())
        }
        .await;
        result.into()
    }

    fn with_identity<R>(&self, f: impl FnOnce(&IdentityResolver<'_>) -> R) -> R {
        let overlay = self.poller.current();
        let inputs = self.store.ordered_inputs();
        let claims = self.claims.lock().clone();
        f(&IdentityResolver::new(&overlay, &inputs, &claims))
    }

    pub fn is_overlay_active(&self, input_id: &str) -> bool {
        self.with_identity(|identity| identity.is_overlay_active(input_id))
    }

    pub fn is_another_overlay_on_air_for_same_input(&self, input_id: &str) -> bool {
        self.with_identity(|identity| identity.is_another_overlay_on_air_for_same_input(input_id))
    }

    pub fn overlay_status(&self, input_id: &str) -> OverlayStatus {
        self.with_identity(|identity| OverlayStatus {
            active: identity.is_overlay_active(input_id),
            another_on_air: identity.is_another_overlay_on_air_for_same_input(input_id),
        })
    }

    // ===== Identity =====

    pub async fn list_known_inputs(&self) -> SyncResult<Vec<KnownInput>> {
        if !self.connection.is_connected() {
            return Err(SyncError::not_connected());
        }
        self.driver.list_known_inputs().await
    }

    /// Point an input at a different vMix input
    ///
    /// Cache entries written under the old and new identifiers are dropped
    /// so the next cycle resends every field.
    pub async fn remap(&self, input_id: &str, target: RemapTarget) -> OpResult {
        let clean = |s: Option<String>| s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        let target = RemapTarget {
            key: clean(target.key),
            number: clean(target.number),
            title: clean(target.title),
        };
        if target == RemapTarget::default() {
            return OpResult::failed(
                SyncError::Configuration("remap needs a key, number or title".into()).to_string(),
            );
        }

        let before = self.store.update_input(input_id, |input| {
            input.external_key = target.key.clone();
            input.external_number = target.number.clone();
            input.external_title = target.title.clone();
        });
        let Some(before) = before else {
            return OpResult::failed(SyncError::unknown_input(input_id).to_string());
        };

        let mut stale = before.identifiers();
        stale.extend(
            [&target.key, &target.number, &target.title]
                .into_iter()
                .flatten()
                .cloned(),
        );
        self.pipeline.invalidate_targets(&stale);
        self.pipeline.reset_image_fields_cache();

        info!(
            "🔀 Input '{}' remapped from {:?} (key={:?}, number={:?}, title={:?})",
            before.label(),
            before.identifiers(),
            target.key,
            target.number,
            target.title
        );
        self.store.persist_or_warn().await;

        if self.connection.is_connected() {
            self.pipeline.requeue_input(input_id, false);
        } else {
            warn!("Remap stored; fields will be sent on the next connection");
        }
        OpResult::ok()
    }
}
