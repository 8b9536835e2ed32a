//! Core type definitions
//!
//! These are immutable snapshots of host-owned records. The engine never
//! persists them; it receives one per invocation.

use serde::{Deserialize, Serialize};

/// Kind of entity a script is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Attribute,
    Item,
    Action,
    /// Global utility script not bound to one entity
    Global,
}

impl EntityType {
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "attribute" => Some(Self::Attribute),
            "item" => Some(Self::Item),
            "action" => Some(Self::Action),
            "global" => Some(Self::Global),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Attribute => "attribute",
            Self::Item => "item",
            Self::Action => "action",
            Self::Global => "global",
        }
    }
}

/// Persisted qbscript source attached to an attribute, item or action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    pub id: String,
    pub ruleset_id: String,
    pub entity_type: EntityType,
    pub entity_id: Option<String>,
    pub source_code: String,
    pub enabled: bool,
    #[serde(default)]
    pub is_global: bool,
}

impl Script {
    /// Build an enabled script snapshot
    pub fn new(
        id: impl Into<String>,
        ruleset_id: impl Into<String>,
        entity_type: EntityType,
        entity_id: Option<String>,
        source_code: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            ruleset_id: ruleset_id.into(),
            entity_type,
            entity_id,
            source_code: source_code.into(),
            enabled: true,
            is_global: entity_type == EntityType::Global,
        }
    }
}

/// Tabular data entity; `data` is a JSON-encoded 2-D array whose first row
/// is the header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chart {
    pub id: String,
    pub ruleset_id: String,
    pub title: String,
    pub data: String,
}

/// Action definition as the executor sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub id: String,
    pub ruleset_id: String,
    pub title: String,
    pub script_id: Option<String>,
}

/// Item definition as the executor sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
    pub id: String,
    pub ruleset_id: String,
    pub title: String,
    pub script_id: Option<String>,
}
