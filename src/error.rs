//! Error taxonomy for the sync engine
//!
//! Engine operations never propagate errors past the engine boundary: the UI
//! receives an [`OpResult`] with a displayable message instead.

use serde::Serialize;
use thiserror::Error;

/// Failure classes of the synchronization engine
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// vMix is unreachable, timed out, or the engine is not connected
    #[error("connectivity: {0}")]
    Connectivity(String),

    /// Input disabled, missing identifier, unmapped field, unknown input id
    #[error("configuration: {0}")]
    Configuration(String),

    /// A single push attempt failed; the next debounce cycle retries it
    #[error("push failed: {0}")]
    TransientPush(String),

    /// A snapshot path or literal could not be turned into a field value
    #[error("data: {0}")]
    Data(String),
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;

impl SyncError {
    pub fn not_connected() -> Self {
        SyncError::Connectivity("not connected to vMix".to_string())
    }

    pub fn unknown_input(input_id: &str) -> Self {
        SyncError::Configuration(format!("unknown input '{}'", input_id))
    }
}

/// Result shape handed to the UI layer
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OpResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OpResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

impl From<SyncResult<()>> for OpResult {
    fn from(result: SyncResult<()>) -> Self {
        match result {
            Ok(()) => OpResult::ok(),
            Err(e) => OpResult::failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_result_from_error() {
        let result: OpResult = Err(SyncError::unknown_input("score")).into();
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("configuration: unknown input 'score'")
        );

        let json = serde_json::to_value(OpResult::ok()).unwrap();
        assert_eq!(json, serde_json::json!({ "success": true }));
    }
}
