//! Console driver - logs all operations for dry runs and tests
//!
//! Stands in for vMix without a network:
//! - Every call is logged and recorded for inspection
//! - Overlay show/hide updates a simulated layer table (one input per layer)
//! - Reachability and push failures can be scripted

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::drivers::{Driver, Endpoint, FieldBatch, KnownInput, LayerState, PollResult};
use crate::error::{SyncError, SyncResult};

/// One recorded driver call
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    TestConnection(Endpoint),
    Connect(Endpoint),
    Disconnect,
    ListInputs,
    Push { target: String, batch: FieldBatch },
    Show { target: String, layer: u8 },
    Hide { target: String, layer: u8 },
    Poll,
}

#[derive(Clone)]
pub struct ConsoleDriver {
    name: String,
    calls: Arc<Mutex<Vec<DriverCall>>>,
    endpoint: Arc<RwLock<Option<Endpoint>>>,
    inputs: Arc<RwLock<Vec<KnownInput>>>,
    overlays: Arc<RwLock<std::collections::BTreeMap<u8, LayerState>>>,
    reachable: Arc<AtomicBool>,
    fail_pushes: Arc<AtomicBool>,
    fail_polls: Arc<AtomicBool>,
    /// Simulated network latency for pushes
    push_delay: Arc<RwLock<Option<Duration>>>,
    /// Simulated handshake latency
    connect_delay: Arc<RwLock<Option<Duration>>>,
    /// Handshakes fail while the attached endpoint keeps working
    refuse_connects: Arc<AtomicBool>,
}

impl ConsoleDriver {
    pub fn new(name: impl Into<String>) -> Self {
        let overlays = (1..=4).map(|layer| (layer, LayerState::default())).collect();
        Self {
            name: name.into(),
            calls: Arc::new(Mutex::new(Vec::new())),
            endpoint: Arc::new(RwLock::new(None)),
            inputs: Arc::new(RwLock::new(Vec::new())),
            overlays: Arc::new(RwLock::new(overlays)),
            reachable: Arc::new(AtomicBool::new(true)),
            fail_pushes: Arc::new(AtomicBool::new(false)),
            fail_polls: Arc::new(AtomicBool::new(false)),
            push_delay: Arc::new(RwLock::new(None)),
            connect_delay: Arc::new(RwLock::new(None)),
            refuse_connects: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Script the inputs vMix reports
    pub fn with_inputs(self, inputs: Vec<KnownInput>) -> Self {
        *self.inputs.write() = inputs;
        self
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_fail_pushes(&self, fail: bool) {
        self.fail_pushes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_polls(&self, fail: bool) {
        self.fail_polls.store(fail, Ordering::SeqCst);
    }

    pub fn set_push_delay(&self, delay: Option<Duration>) {
        *self.push_delay.write() = delay;
    }

    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        *self.connect_delay.write() = delay;
    }

    pub fn set_refuse_connects(&self, refuse: bool) {
        self.refuse_connects.store(refuse, Ordering::SeqCst);
    }

    /// Put a number on air directly, as an operator in vMix would
    pub fn set_layer(&self, layer: u8, number: Option<&str>) {
        self.overlays.write().insert(
            layer,
            LayerState {
                active: number.is_some(),
                active_input_number: number.map(str::to_string),
            },
        );
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().clone()
    }

    /// Recorded pushes as (target, batch)
    pub fn pushes(&self) -> Vec<(String, FieldBatch)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                DriverCall::Push { target, batch } => Some((target.clone(), batch.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: DriverCall) {
        self.calls.lock().push(call);
    }

    fn ensure_attached(&self) -> SyncResult<()> {
        if self.endpoint.read().is_none() {
            return Err(SyncError::not_connected());
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(SyncError::Connectivity("console vMix unreachable".into()));
        }
        Ok(())
    }

    /// Number of the simulated input addressed by key, number or title
    fn number_for(&self, target: &str) -> Option<String> {
        self.inputs
            .read()
            .iter()
            .find(|input| {
                input.key == target
                    || input.number == target
                    || input.title.eq_ignore_ascii_case(target)
                    || input.short_title.eq_ignore_ascii_case(target)
            })
            .map(|input| input.number.clone())
    }
}

#[async_trait]
impl Driver for ConsoleDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn test_connection(&self, endpoint: &Endpoint) -> SyncResult<String> {
        self.record(DriverCall::TestConnection(endpoint.clone()));
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(SyncError::Connectivity(format!("{} unreachable", endpoint)));
        }
        Ok(format!("console ({})", self.name))
    }

    async fn connect(&self, endpoint: &Endpoint) -> SyncResult<()> {
        self.record(DriverCall::Connect(endpoint.clone()));

        let delay = *self.connect_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if !self.reachable.load(Ordering::SeqCst) || self.refuse_connects.load(Ordering::SeqCst) {
            return Err(SyncError::Connectivity(format!("{} unreachable", endpoint)));
        }
        *self.endpoint.write() = Some(endpoint.clone());
        info!("🔌 ConsoleDriver '{}' attached to {}", self.name, endpoint);
        Ok(())
    }

    async fn disconnect(&self) {
        self.record(DriverCall::Disconnect);
        *self.endpoint.write() = None;
        info!("ConsoleDriver '{}' detached", self.name);
    }

    async fn list_known_inputs(&self) -> SyncResult<Vec<KnownInput>> {
        self.record(DriverCall::ListInputs);
        self.ensure_attached()?;
        Ok(self.inputs.read().clone())
    }

    async fn push_fields(&self, target: &str, batch: &FieldBatch) -> SyncResult<()> {
        self.record(DriverCall::Push {
            target: target.to_string(),
            batch: batch.clone(),
        });

        let delay = *self.push_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.ensure_attached()?;
        if self.fail_pushes.load(Ordering::SeqCst) {
            warn!("ConsoleDriver '{}' failing push to {}", self.name, target);
            return Err(SyncError::TransientPush(format!("scripted failure for {}", target)));
        }

        info!(
            "🎨 [{}] push {} -> text={:?} color={:?} visibility={:?} image={:?}",
            self.name, target, batch.text, batch.color, batch.visibility, batch.image
        );
        Ok(())
    }

    async fn show_overlay(&self, target: &str, layer: u8) -> SyncResult<()> {
        self.record(DriverCall::Show {
            target: target.to_string(),
            layer,
        });
        self.ensure_attached()?;

        let number = self
            .number_for(target)
            .ok_or_else(|| SyncError::TransientPush(format!("input '{}' not found", target)))?;
        self.set_layer(layer, Some(&number));
        info!("📺 [{}] overlay {} <- {} (#{})", self.name, layer, target, number);
        Ok(())
    }

    async fn hide_overlay(&self, target: &str, layer: u8) -> SyncResult<()> {
        self.record(DriverCall::Hide {
            target: target.to_string(),
            layer,
        });
        self.ensure_attached()?;
        self.set_layer(layer, None);
        info!("[{}] overlay {} cleared", self.name, layer);
        Ok(())
    }

    async fn poll_overlay_state(&self) -> SyncResult<PollResult> {
        self.record(DriverCall::Poll);
        self.ensure_attached()?;
        if self.fail_polls.load(Ordering::SeqCst) {
            return Err(SyncError::Connectivity("scripted poll failure".into()));
        }

        Ok(PollResult {
            overlays: self.overlays.read().clone(),
            inputs: self
                .inputs
                .read()
                .iter()
                .map(|input| (input.number.clone(), input.clone()))
                .collect(),
        })
    }
}

#[cfg(test)]
pub(crate) fn known(number: &str, key: &str, title: &str) -> KnownInput {
    KnownInput {
        number: number.to_string(),
        key: key.to_string(),
        title: title.to_string(),
        short_title: title.to_string(),
        input_type: "GT".to_string(),
    }
}
