//! Scorebridge - mirror live match state into vMix graphics
//!
//! The binary wires these modules together; the library exposes them for
//! embedding and integration tests.

pub mod api;
pub mod config;
pub mod drivers;
pub mod error;
pub mod logos;
pub mod paths;
pub mod scoring;
pub mod snapshot;
pub mod sync;
