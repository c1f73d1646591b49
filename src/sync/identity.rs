//! IdentityResolver - maps stored identifiers onto live vMix input numbers
//!
//! vMix renumbers inputs when they are reordered and users rename them, so
//! the stored key is treated as primary and the number/title as a
//! best-effort fallback chain. Overlay activity is recomputed from the latest
//! poll on every query; nothing here caches an "active" flag.

use std::collections::{BTreeMap, HashMap};

use super::poller::OverlaySnapshot;
use crate::config::InputConfig;
use crate::drivers::KnownInput;

/// Numeric reference in an identifier: `"7"` or `"Input 7"`
pub fn parse_numeric_ref(identifier: &str) -> Option<String> {
    let s = identifier.trim();
    let digits = match s.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("input") => s[5..].trim_start(),
        _ => s,
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let number: u32 = digits.parse().ok()?;
    Some(number.to_string())
}

/// Inputs ordered by number, so that "first match" is stable across polls
fn by_number(inputs: &HashMap<String, KnownInput>) -> Vec<&KnownInput> {
    let mut sorted: Vec<&KnownInput> = inputs.values().collect();
    sorted.sort_by_key(|input| {
        (
            input.number.trim().parse::<u32>().unwrap_or(u32::MAX),
            input.number.clone(),
        )
    });
    sorted
}

/// Resolve a name against titles: case-insensitive exact match, then substring
pub fn resolve_by_name(name: &str, inputs: &HashMap<String, KnownInput>) -> Option<String> {
    let needle = name.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    let sorted = by_number(inputs);

    let exact = sorted.iter().find(|input| {
        input.title.to_lowercase() == needle || input.short_title.to_lowercase() == needle
    });
    let found = exact.or_else(|| {
        sorted.iter().find(|input| {
            input.title.to_lowercase().contains(&needle)
                || input.short_title.to_lowercase().contains(&needle)
        })
    });
    found.map(|input| input.number.trim().to_string())
}

/// Resolve one identifier: numeric references are used directly
pub fn resolve_identifier(identifier: &str, inputs: &HashMap<String, KnownInput>) -> Option<String> {
    parse_numeric_ref(identifier).or_else(|| resolve_by_name(identifier, inputs))
}

/// Current vMix number of a configured input
///
/// Key lookup first, then any numeric identifier, then title matching.
pub fn resolve_input_number(
    input: &InputConfig,
    inputs: &HashMap<String, KnownInput>,
) -> Option<String> {
    if let Some(key) = input.external_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        if let Some(found) = inputs.values().find(|i| i.key.eq_ignore_ascii_case(key)) {
            return Some(found.number.trim().to_string());
        }
    }

    let identifiers = input.identifiers();
    identifiers
        .iter()
        .find_map(|id| parse_numeric_ref(id))
        .or_else(|| {
            identifiers
                .iter()
                .find_map(|id| resolve_by_name(id, inputs))
        })
}

/// Answers overlay queries against one poll snapshot
pub struct IdentityResolver<'a> {
    overlay: &'a OverlaySnapshot,
    /// Configured inputs in `input_order` precedence
    inputs: &'a [InputConfig],
    /// layer -> input id that was last shown on it from here
    claims: &'a BTreeMap<u8, String>,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(
        overlay: &'a OverlaySnapshot,
        inputs: &'a [InputConfig],
        claims: &'a BTreeMap<u8, String>,
    ) -> Self {
        Self {
            overlay,
            inputs,
            claims,
        }
    }

    fn find(&self, input_id: &str) -> Option<&'a InputConfig> {
        self.inputs.iter().find(|input| input.id == input_id)
    }

    pub fn number_of(&self, input: &InputConfig) -> Option<String> {
        resolve_input_number(input, &self.overlay.inputs)
    }

    /// Local input credited with what `layer` currently shows
    ///
    /// vMix reports numbers only. When several configs resolve to the
    /// on-air number, the one last shown on that layer wins, then the first
    /// in `input_order`.
    fn owner_of_layer(&self, layer: u8) -> Option<&'a InputConfig> {
        let state = self.overlay.overlays.get(&layer)?;
        if !state.active {
            return None;
        }
        let on_air = state.active_input_number.as_deref()?.trim();

        let candidates: Vec<&'a InputConfig> = self
            .inputs
            .iter()
            .filter(|input| input.overlay_layer == layer)
            .filter(|input| self.number_of(input).as_deref() == Some(on_air))
            .collect();

        let owner = self
            .claims
            .get(&layer)
            .and_then(|claimant| candidates.iter().find(|input| &input.id == claimant))
            .or_else(|| candidates.first())
            .copied();
        owner
    }

    /// True iff the input's layer is on air showing this input
    pub fn is_overlay_active(&self, input_id: &str) -> bool {
        let Some(input) = self.find(input_id) else {
            return false;
        };
        self.owner_of_layer(input.overlay_layer)
            .map(|owner| owner.id == input.id)
            .unwrap_or(false)
    }

    /// True iff another config resolving to the same vMix input is on air
    pub fn is_another_overlay_on_air_for_same_input(&self, input_id: &str) -> bool {
        let Some(input) = self.find(input_id) else {
            return false;
        };
        let Some(number) = self.number_of(input) else {
            return false;
        };

        self.inputs
            .iter()
            .filter(|other| other.id != input.id)
            .filter(|other| self.number_of(other).as_deref() == Some(number.as_str()))
            .any(|other| self.is_overlay_active(&other.id))
    }
}
