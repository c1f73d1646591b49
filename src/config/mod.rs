//! Configuration management for Scorebridge
//!
//! Handles loading, parsing, validation and saving of the YAML configuration
//! file, which holds the vMix connection and the mapping of local inputs to
//! vMix inputs and their fields.

pub mod store;
pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

pub use store::ConfigStore;
pub use watcher::ConfigWatcher;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AppConfig {
    pub vmix: VmixConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub colors: ColorDefaults,
    #[serde(default)]
    pub logos: LogoConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// vMix connection and input mapping
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct VmixConfig {
    #[serde(default = "default_vmix_host")]
    pub host: String,
    #[serde(default = "default_vmix_port")]
    pub port: u16,
    /// Last committed connection state, restored at startup
    #[serde(default)]
    pub connection_state: ConnectionState,
    /// Display order and default identification precedence
    #[serde(default)]
    pub input_order: Vec<String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, InputConfig>,
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// A local input definition mapped onto one vMix input
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct InputConfig {
    /// Locally generated stable id (the key in `vmix.inputs`)
    #[serde(default, skip_serializing)]
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    /// Preferred stable vMix reference (the input GUID)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_key: Option<String>,
    /// Best-effort; drifts when inputs are reordered in vMix
    #[serde(
        default,
        deserialize_with = "de_opt_scalar_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub external_number: Option<String>,
    /// Best-effort; drifts when inputs are renamed in vMix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_title: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_overlay_layer")]
    pub overlay_layer: u8,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldConfig>,
}

/// Field mapping: exactly one of `data_map_key` / `custom_value`
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct FieldConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_map_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_value: Option<serde_json::Value>,
    #[serde(default)]
    pub vmix_field_type: FieldType,
}

/// vMix field kind, selects the write function and cache lane
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    Text,
    Color,
    Visibility,
    Image,
}

/// Where a field's value comes from
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldSource<'a> {
    DataMapKey(&'a str),
    CustomValue(&'a serde_json::Value),
}

impl FieldConfig {
    pub fn data(key: &str, field_type: FieldType) -> Self {
        Self {
            data_map_key: Some(key.to_string()),
            custom_value: None,
            vmix_field_type: field_type,
        }
    }

    pub fn custom(value: serde_json::Value, field_type: FieldType) -> Self {
        Self {
            data_map_key: None,
            custom_value: Some(value),
            vmix_field_type: field_type,
        }
    }

    pub fn source(&self) -> Option<FieldSource<'_>> {
        match (&self.data_map_key, &self.custom_value) {
            (Some(key), None) => Some(FieldSource::DataMapKey(key)),
            (None, Some(value)) => Some(FieldSource::CustomValue(value)),
            _ => None,
        }
    }
}

impl InputConfig {
    /// Reference used to address the vMix input: key, then number, then title
    pub fn target(&self) -> Option<String> {
        [&self.external_key, &self.external_number, &self.external_title]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// All stored external identifiers (non-empty), key first
    pub fn identifiers(&self) -> Vec<String> {
        [&self.external_key, &self.external_number, &self.external_title]
            .into_iter()
            .flatten()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.id
        } else {
            &self.display_name
        }
    }
}

/// Timing constants of the sync engine
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SyncConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Fallback colors used when a team color is missing
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ColorDefaults {
    #[serde(default = "default_team_a_color")]
    pub team_a: String,
    #[serde(default = "default_team_b_color")]
    pub team_b: String,
}

impl Default for ColorDefaults {
    fn default() -> Self {
        Self {
            team_a: default_team_a_color(),
            team_b: default_team_b_color(),
        }
    }
}

/// Logo file cache location
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct LogoConfig {
    /// Directory for logo files (defaults to `<data dir>/logos`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// Public base URL vMix uses to fetch logos, e.g. `http://10.0.0.5:8126`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_base_url: Option<String>,
}

/// HTTP control API
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_api_port(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::from_yaml(&contents)
            .with_context(|| format!("Failed to load config: {}", path.display()))?;

        Ok(config)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let mut config: AppConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;

        // Map keys are the authoritative input ids
        for (id, input) in config.vmix.inputs.iter_mut() {
            input.id = id.clone();
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.vmix.host.trim().is_empty() {
            anyhow::bail!("vmix.host cannot be empty");
        }
        if self.sync.debounce_ms == 0 {
            anyhow::bail!("sync.debounce_ms must be greater than 0");
        }
        if self.sync.poll_interval_ms == 0 {
            anyhow::bail!("sync.poll_interval_ms must be greater than 0");
        }

        let mut seen = HashSet::new();
        for id in &self.vmix.input_order {
            if !self.vmix.inputs.contains_key(id) {
                anyhow::bail!("input_order references unknown input '{}'", id);
            }
            if !seen.insert(id) {
                anyhow::bail!("input_order lists input '{}' twice", id);
            }
        }

        for (id, input) in &self.vmix.inputs {
            if id.trim().is_empty() {
                anyhow::bail!("Input id cannot be empty");
            }
            if !(1..=4).contains(&input.overlay_layer) {
                anyhow::bail!(
                    "Input '{}' has invalid overlay_layer {} (must be 1-4)",
                    id,
                    input.overlay_layer
                );
            }
            for (name, field) in &input.fields {
                if field.source().is_none() {
                    anyhow::bail!(
                        "Field '{}' of input '{}' must set exactly one of 'data_map_key' or 'custom_value'",
                        name,
                        id
                    );
                }
            }
        }

        Ok(())
    }
}

fn de_opt_scalar_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Number(i64),
    }

    Ok(Option::<Scalar>::deserialize(deserializer)?.map(|s| match s {
        Scalar::Text(t) => t,
        Scalar::Number(n) => n.to_string(),
    }))
}

// Default value functions
fn default_vmix_host() -> String { "127.0.0.1".to_string() }
fn default_vmix_port() -> u16 { 8088 }
fn default_true() -> bool { true }
fn default_overlay_layer() -> u8 { 1 }
fn default_debounce_ms() -> u64 { 300 }
fn default_poll_interval_ms() -> u64 { 2000 }
fn default_request_timeout_ms() -> u64 { 2000 }
fn default_team_a_color() -> String { "#0047AB".to_string() }
fn default_team_b_color() -> String { "#D62828".to_string() }
fn default_api_port() -> u16 { 8126 }
