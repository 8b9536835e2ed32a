//! Error types for event handling

use qbscript_core::EngineError;

/// Failures at the host seams; script errors are reported as data instead
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EventError {
    /// Entity or script lookup failed
    #[error("Store error: {0}")]
    Store(String),

    /// The script runner could not run the script at all
    #[error("Script runner error: {0}")]
    Runner(String),

    /// `on_attributes_modified` failed
    #[error("Callback error: {0}")]
    Callback(String),
}

impl From<EventError> for EngineError {
    fn from(err: EventError) -> Self {
        EngineError::Event(err.to_string())
    }
}

/// Result type for event operations
pub type Result<T> = std::result::Result<T, EventError>;
