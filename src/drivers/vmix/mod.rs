//! vMix Web API driver
//!
//! Provides integration with vMix via its HTTP API for:
//! - Status polling (inputs, overlay layers) from the XML status document
//! - Field writes (text, color, visibility, image) per input
//! - Overlay show/hide per layer

mod client;
mod xml;

pub use client::VmixDriver;
pub use xml::VmixStatus;

#[cfg(test)]
pub(crate) use xml::SAMPLE_STATUS;
