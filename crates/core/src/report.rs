//! Script error payloads handed to the host for persistence

use crate::IdGenerator;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Error report for one failed script run
///
/// The engine only produces this payload; whether it is stored, shown, or
/// used to disable the script is up to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptErrorReport {
    pub id: String,
    pub script_id: String,
    pub character_id: Option<String>,
    pub error_message: String,
    pub line_number: Option<usize>,
    pub stack_trace: Option<String>,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl ScriptErrorReport {
    pub fn new(
        ids: &IdGenerator,
        script_id: impl Into<String>,
        character_id: Option<String>,
        error_message: impl Into<String>,
        line_number: Option<usize>,
        stack_trace: &[String],
    ) -> Self {
        Self {
            id: ids.next_id("script-error"),
            script_id: script_id.into(),
            character_id,
            error_message: error_message.into(),
            line_number,
            stack_trace: if stack_trace.is_empty() {
                None
            } else {
                Some(stack_trace.join("\n"))
            },
            timestamp: current_time_millis(),
        }
    }
}

fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
