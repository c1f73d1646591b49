//! External system drivers
//!
//! The sync engine talks to the on-air graphics system only through the
//! [`Driver`] trait. `VmixDriver` speaks the vMix Web API; `ConsoleDriver`
//! logs and records every call for dry runs and tests.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::error::SyncResult;

pub mod console;
pub mod vmix;

pub use console::ConsoleDriver;
pub use vmix::VmixDriver;

/// Network location of the external system
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One input as reported by the external system
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KnownInput {
    pub number: String,
    pub key: String,
    pub title: String,
    pub short_title: String,
    #[serde(rename = "type")]
    pub input_type: String,
}

/// Field writes for one input, split by field type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldBatch {
    pub text: BTreeMap<String, String>,
    pub color: BTreeMap<String, String>,
    pub visibility: BTreeMap<String, bool>,
    pub image: BTreeMap<String, String>,
}

impl FieldBatch {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.text.len() + self.color.len() + self.visibility.len() + self.image.len()
    }
}

/// On-air state of one overlay layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LayerState {
    pub active: bool,
    pub active_input_number: Option<String>,
}

/// Result of one status poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollResult {
    pub overlays: BTreeMap<u8, LayerState>,
    /// number -> input
    pub inputs: HashMap<String, KnownInput>,
}

/// Driver trait - the external graphics system's control surface
///
/// All methods take &self to support Arc<dyn Driver>; implementations use
/// interior mutability for the attached endpoint.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Driver name for logs (e.g. "vmix", "console")
    fn name(&self) -> &str;

    /// Probe an endpoint without attaching to it
    async fn test_connection(&self, endpoint: &Endpoint) -> SyncResult<String>;

    /// Handshake with an endpoint and attach to it on success
    async fn connect(&self, endpoint: &Endpoint) -> SyncResult<()>;

    /// Detach from the current endpoint (always succeeds locally)
    async fn disconnect(&self);

    /// All inputs currently known to the external system
    async fn list_known_inputs(&self) -> SyncResult<Vec<KnownInput>>;

    /// Write a batch of fields to one input
    async fn push_fields(&self, target: &str, batch: &FieldBatch) -> SyncResult<()>;

    /// Put `target` on air on overlay `layer`
    async fn show_overlay(&self, target: &str, layer: u8) -> SyncResult<()>;

    /// Take overlay `layer` off air
    async fn hide_overlay(&self, target: &str, layer: u8) -> SyncResult<()>;

    /// Current overlay layers plus the number -> input map
    async fn poll_overlay_state(&self) -> SyncResult<PollResult>;
}
