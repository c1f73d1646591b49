//! FieldResolver - computes the value of one field from a snapshot
//!
//! Resolution never fails loudly: anything that cannot produce a value is
//! logged at debug level and the field is omitted from the batch, leaving its
//! siblings untouched.

use serde_json::Value;
use tracing::debug;

use crate::config::{ColorDefaults, FieldConfig, FieldSource, FieldType};
use crate::error::SyncError;
use crate::scoring::Side;
use crate::snapshot::{is_truthy, render_scalar, MatchSnapshot};

/// A resolved field value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedValue {
    Text(String),
    Visible(bool),
}

impl ResolvedValue {
    /// Cache representation
    pub fn cache_repr(&self) -> String {
        match self {
            ResolvedValue::Text(s) => s.clone(),
            ResolvedValue::Visible(b) => b.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldResolver {
    colors: ColorDefaults,
    /// Base URL prefixed to relative image references
    image_base: Option<String>,
}

impl FieldResolver {
    pub fn new(colors: ColorDefaults, image_base: Option<String>) -> Self {
        Self { colors, image_base }
    }

    /// Resolve one field; `None` means "omit this field"
    pub fn resolve(
        &self,
        name: &str,
        field: &FieldConfig,
        snapshot: &MatchSnapshot,
    ) -> Option<ResolvedValue> {
        match self.try_resolve(field, snapshot) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("Field '{}' omitted: {}", name, e);
                None
            }
        }
    }

    fn try_resolve(
        &self,
        field: &FieldConfig,
        snapshot: &MatchSnapshot,
    ) -> Result<ResolvedValue, SyncError> {
        let source = field
            .source()
            .ok_or_else(|| SyncError::Configuration("field has no value source".into()))?;

        match field.vmix_field_type {
            FieldType::Text => Ok(ResolvedValue::Text(match source {
                FieldSource::DataMapKey(path) => snapshot.text(path),
                FieldSource::CustomValue(literal) => render_scalar(literal),
            })),
            FieldType::Visibility => Ok(ResolvedValue::Visible(match source {
                FieldSource::DataMapKey(key) => snapshot
                    .predicate(key)
                    .unwrap_or_else(|| snapshot.get(key).map(is_truthy).unwrap_or(false)),
                FieldSource::CustomValue(literal) => is_truthy(literal),
            })),
            FieldType::Color => self.resolve_color(source, snapshot).map(ResolvedValue::Text),
            FieldType::Image => self.resolve_image(source, snapshot).map(ResolvedValue::Text),
        }
    }

    fn resolve_color(
        &self,
        source: FieldSource<'_>,
        snapshot: &MatchSnapshot,
    ) -> Result<String, SyncError> {
        let (raw, side) = match source {
            FieldSource::DataMapKey(path) => {
                let side = path.split('.').next().and_then(Side::parse);
                (snapshot.text(path), side)
            }
            FieldSource::CustomValue(literal) => (render_scalar(literal), None),
        };

        if raw.trim().is_empty() {
            let side = side.ok_or_else(|| {
                SyncError::Data("color missing and no team side to fall back on".into())
            })?;
            let fallback = match side {
                Side::A => &self.colors.team_a,
                Side::B => &self.colors.team_b,
            };
            return normalize_color(fallback)
                .ok_or_else(|| SyncError::Data(format!("invalid default color '{}'", fallback)));
        }

        normalize_color(&raw).ok_or_else(|| SyncError::Data(format!("invalid color '{}'", raw)))
    }

    fn resolve_image(
        &self,
        source: FieldSource<'_>,
        snapshot: &MatchSnapshot,
    ) -> Result<String, SyncError> {
        let reference = match source {
            FieldSource::DataMapKey(path) => snapshot.text(path),
            FieldSource::CustomValue(literal) => render_scalar(literal),
        };
        let reference = reference.trim();

        // An empty reference clears the image in vMix
        if reference.is_empty() || is_absolute_reference(reference) {
            return Ok(reference.to_string());
        }

        Ok(match &self.image_base {
            Some(base) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                reference.trim_start_matches('/')
            ),
            None => reference.to_string(),
        })
    }
}

fn is_absolute_reference(reference: &str) -> bool {
    let lower = reference.to_ascii_lowercase();
    lower.starts_with("http://")
        || lower.starts_with("https://")
        || lower.starts_with("data:")
        || lower.starts_with("\\\\")
        || std::path::Path::new(reference).is_absolute()
        || reference.as_bytes().get(1) == Some(&b':')
}

/// Normalize a CSS-like color to `#RRGGBB`
///
/// Accepts `#RGB`, `#RRGGBB`, `#RRGGBBAA` (alpha dropped), the same without
/// `#`, and `rgb(r, g, b)`.
pub fn normalize_color(input: &str) -> Option<String> {
    let s = input.trim();

    if let Some(args) = s
        .strip_prefix("rgb(")
        .or_else(|| s.strip_prefix("RGB("))
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let parts: Vec<u8> = args
            .split(',')
            .map(|p| p.trim().parse::<u8>())
            .collect::<Result<_, _>>()
            .ok()?;
        if parts.len() != 3 {
            return None;
        }
        return Some(format!("#{:02X}{:02X}{:02X}", parts[0], parts[1], parts[2]));
    }

    let hex = s.strip_prefix('#').unwrap_or(s);
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let rgb = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect::<String>(),
        6 => hex.to_string(),
        8 => hex[..6].to_string(),
        _ => return None,
    };
    Some(format!("#{}", rgb.to_ascii_uppercase()))
}
