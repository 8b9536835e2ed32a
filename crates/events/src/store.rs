//! Entity lookup seam
//!
//! The executor only reads through [`EntityStore`]; persistence is the
//! host's business. [`InMemoryStore`] backs tests and the CLI.

use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use qbscript_core::{ActionRecord, Chart, ItemRecord, Script};

/// Read access to the entities an event handler needs
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn action(&self, action_id: &str) -> Result<Option<ActionRecord>>;
    async fn item(&self, item_id: &str) -> Result<Option<ItemRecord>>;
    async fn script(&self, script_id: &str) -> Result<Option<Script>>;

    /// Charts of a ruleset, made available to `Chart(name)`
    async fn charts(&self, ruleset_id: &str) -> Result<Vec<Chart>>;
}

/// Entity store held in memory
#[derive(Debug, Default)]
pub struct InMemoryStore {
    actions: DashMap<String, ActionRecord>,
    items: DashMap<String, ItemRecord>,
    scripts: DashMap<String, Script>,
    charts: DashMap<String, Chart>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_action(&self, action: ActionRecord) {
        self.actions.insert(action.id.clone(), action);
    }

    pub fn insert_item(&self, item: ItemRecord) {
        self.items.insert(item.id.clone(), item);
    }

    pub fn insert_script(&self, script: Script) {
        self.scripts.insert(script.id.clone(), script);
    }

    pub fn insert_chart(&self, chart: Chart) {
        self.charts.insert(chart.id.clone(), chart);
    }

    pub fn remove_script(&self, script_id: &str) -> Option<Script> {
        self.scripts.remove(script_id).map(|(_, script)| script)
    }

    /// Enable or disable a stored script; false when it does not exist
    pub fn set_script_enabled(&self, script_id: &str, enabled: bool) -> bool {
        match self.scripts.get_mut(script_id) {
            Some(mut script) => {
                script.enabled = enabled;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn action(&self, action_id: &str) -> Result<Option<ActionRecord>> {
        Ok(self.actions.get(action_id).map(|a| a.clone()))
    }

    async fn item(&self, item_id: &str) -> Result<Option<ItemRecord>> {
        Ok(self.items.get(item_id).map(|i| i.clone()))
    }

    async fn script(&self, script_id: &str) -> Result<Option<Script>> {
        Ok(self.scripts.get(script_id).map(|s| s.clone()))
    }

    async fn charts(&self, ruleset_id: &str) -> Result<Vec<Chart>> {
        let mut charts: Vec<Chart> = self
            .charts
            .iter()
            .filter(|c| c.ruleset_id == ruleset_id)
            .map(|c| c.clone())
            .collect();
        charts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(charts)
    }
}
