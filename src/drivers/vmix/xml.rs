//! vMix status XML parsing
//!
//! `GET /api/` returns the whole vMix state. Only the version, the input list
//! and the overlay layers are read; everything else is ignored.

use quick_xml::de::from_str;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::drivers::{KnownInput, LayerState, PollResult};
use crate::error::{SyncError, SyncResult};

#[derive(Debug, Deserialize)]
struct RawStatus {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    inputs: RawInputs,
    #[serde(default)]
    overlays: RawOverlays,
}

#[derive(Debug, Default, Deserialize)]
struct RawInputs {
    #[serde(default, rename = "input")]
    items: Vec<RawInput>,
}

#[derive(Debug, Deserialize)]
struct RawInput {
    #[serde(rename = "@key", default)]
    key: String,
    #[serde(rename = "@number", default)]
    number: String,
    #[serde(rename = "@type", default)]
    input_type: String,
    #[serde(rename = "@title", default)]
    title: String,
    #[serde(rename = "@shortTitle", default)]
    short_title: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawOverlays {
    #[serde(default, rename = "overlay")]
    items: Vec<RawOverlay>,
}

#[derive(Debug, Deserialize)]
struct RawOverlay {
    #[serde(rename = "@number")]
    number: u8,
    #[serde(rename = "$text", default)]
    input: Option<String>,
}

/// Parsed vMix status document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VmixStatus {
    pub version: String,
    pub inputs: Vec<KnownInput>,
    pub overlays: BTreeMap<u8, LayerState>,
}

impl VmixStatus {
    pub fn parse(xml: &str) -> SyncResult<Self> {
        let raw: RawStatus = from_str(xml)
            .map_err(|e| SyncError::Connectivity(format!("unexpected vMix status reply: {}", e)))?;

        // Every vMix status document carries its version
        let version = raw
            .version
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SyncError::Connectivity("reply is not a vMix status document".into()))?;

        let inputs = raw
            .inputs
            .items
            .into_iter()
            .map(|input| KnownInput {
                number: input.number.trim().to_string(),
                key: input.key,
                title: input.title,
                short_title: input.short_title,
                input_type: input.input_type,
            })
            .collect();

        let overlays = raw
            .overlays
            .items
            .into_iter()
            .map(|overlay| {
                let number = overlay
                    .input
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty());
                let state = LayerState {
                    active: number.is_some(),
                    active_input_number: number,
                };
                (overlay.number, state)
            })
            .collect();

        Ok(Self {
            version,
            inputs,
            overlays,
        })
    }

    pub fn into_poll_result(self) -> PollResult {
        PollResult {
            overlays: self.overlays,
            inputs: self
                .inputs
                .into_iter()
                .map(|input| (input.number.clone(), input))
                .collect(),
        }
    }
}

#[cfg(test)]
pub(crate) const SAMPLE_STATUS: &str = r#"<vmix>
<version>27.0.0.49</version>
<edition>4K</edition>
<inputs>
<input key="26cae087-b7b6-4d45-98e4-de03ab4feb6b" number="1" type="Colour" title="Black" shortTitle="Black" state="Paused">Black</input>
<input key="score-target" number="13" type="GT" title="Scoreboard.gtzip" shortTitle="Scoreboard" state="Running">Scoreboard.gtzip
<text index="0" name="TeamA.Text">Alpha</text>
<image index="0" name="LogoA.Source"></image>
</input>
</inputs>
<overlays>
<overlay number="1">13</overlay>
<overlay number="2" />
<overlay number="3"></overlay>
<overlay number="4" />
</overlays>
<preview>1</preview>
<active>1</active>
</vmix>"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        let status = VmixStatus::parse(SAMPLE_STATUS).unwrap();
        assert_eq!(status.version, "27.0.0.49");
        assert_eq!(status.inputs.len(), 2);

        let score = &status.inputs[1];
        assert_eq!(score.number, "13");
        assert_eq!(score.key, "score-target");
        assert_eq!(score.short_title, "Scoreboard");
        assert_eq!(score.input_type, "GT");

        assert_eq!(
            status.overlays[&1],
            LayerState {
                active: true,
                active_input_number: Some("13".into())
            }
        );
        assert!(!status.overlays[&2].active);
        assert!(!status.overlays[&3].active);

        let poll = status.into_poll_result();
        assert_eq!(poll.inputs["1"].title, "Black");
        assert_eq!(poll.overlays.len(), 4);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            VmixStatus::parse("<html><body>not vmix</body></html>"),
            Err(SyncError::Connectivity(_))
        ));
    }
}
