//! Out-of-band messages a run produces for the host's worker channel

use serde::{Deserialize, Serialize};

/// Message surfaced to the host while (or after) a script runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerSignal {
    /// Script called `log(...)`
    ConsoleLog { args: Vec<serde_json::Value> },

    /// Script called `announce(...)`
    Announce {
        message: String,
        #[serde(rename = "announcementId", skip_serializing_if = "Option::is_none", default)]
        announcement_id: Option<String>,
    },
}
