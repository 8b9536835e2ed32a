//! Subscription manager
//!
//! Tracks which attributes each script reads. The forward (script to
//! attributes) and reverse (attribute to scripts) maps are always exact
//! inverses: every mutation updates both under one lock.

use crate::error::{Result, ScriptError};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Registry {
    current: Option<String>,
    forward: HashMap<String, BTreeSet<String>>,
    reverse: HashMap<String, BTreeSet<String>>,
}

impl Registry {
    fn insert(&mut self, script_id: &str, attribute: &str) {
        self.forward
            .entry(script_id.to_string())
            .or_default()
            .insert(attribute.to_string());
        self.reverse
            .entry(attribute.to_string())
            .or_default()
            .insert(script_id.to_string());
    }

    fn remove_script(&mut self, script_id: &str) {
        let Some(attributes) = self.forward.remove(script_id) else {
            return;
        };
        for attribute in attributes {
            if let Some(bucket) = self.reverse.get_mut(&attribute) {
                bucket.remove(script_id);
                if bucket.is_empty() {
                    self.reverse.remove(&attribute);
                }
            }
        }
    }
}

/// Session-scoped dependency registry
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    registry: Mutex<Registry>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attribute subsequent `register_subscription` calls to `script_id`
    pub fn set_current_script(&self, script_id: impl Into<String>) {
        self.registry.lock().current = Some(script_id.into());
    }

    pub fn clear_current_script(&self) {
        self.registry.lock().current = None;
    }

    pub fn current_script(&self) -> Option<String> {
        self.registry.lock().current.clone()
    }

    /// Record that the current script depends on each of `names`
    pub fn register_subscription<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        let mut registry = self.registry.lock();
        let Some(script_id) = registry.current.clone() else {
            warn!("Rejected subscription to {} attribute(s): no current script", names.len());
            return Err(ScriptError::NoScriptContext);
        };
        for name in names {
            registry.insert(&script_id, name.as_ref());
        }
        debug!("Script {} subscribed to {} attribute(s)", script_id, names.len());
        Ok(())
    }

    /// Record subscriptions for an explicit script, independent of the
    /// current-script slot
    pub fn register_for<S: AsRef<str>>(&self, script_id: &str, names: &[S]) {
        let mut registry = self.registry.lock();
        for name in names {
            registry.insert(script_id, name.as_ref());
        }
        debug!("Script {} subscribed to {} attribute(s)", script_id, names.len());
    }

    /// Scripts that read `attribute`
    pub fn get_subscribers(&self, attribute: &str) -> BTreeSet<String> {
        self.registry
            .lock()
            .reverse
            .get(attribute)
            .cloned()
            .unwrap_or_default()
    }

    /// Attributes `script_id` reads
    pub fn get_dependencies(&self, script_id: &str) -> BTreeSet<String> {
        self.registry
            .lock()
            .forward
            .get(script_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop every subscription of `script_id` from both maps
    pub fn clear_subscriptions(&self, script_id: &str) {
        self.registry.lock().remove_script(script_id);
    }

    pub fn clear_all(&self) {
        let mut registry = self.registry.lock();
        registry.forward.clear();
        registry.reverse.clear();
    }

    /// Number of scripts with at least one subscription
    pub fn script_count(&self) -> usize {
        self.registry.lock().forward.len()
    }

    /// Number of attributes with at least one subscriber
    pub fn attribute_count(&self) -> usize {
        self.registry.lock().reverse.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_register_both_directions() {
        let manager = SubscriptionManager::new();
        manager.set_current_script("s1");
        manager.register_subscription(&["HP", "MP"]).unwrap();

        assert_eq!(manager.get_dependencies("s1"), set(&["HP", "MP"]));
        assert_eq!(manager.get_subscribers("HP"), set(&["s1"]));
        assert_eq!(manager.get_subscribers("MP"), set(&["s1"]));
    }

    #[test]
    fn test_clear_subscriptions_prunes_buckets() {
        let manager = SubscriptionManager::new();
        manager.set_current_script("s1");
        manager.register_subscription(&["HP", "MP"]).unwrap();
        manager.register_for("s2", &["HP"]);

        manager.clear_subscriptions("s1");

        assert!(manager.get_dependencies("s1").is_empty());
        assert_eq!(manager.get_subscribers("HP"), set(&["s2"]));
        assert!(manager.get_subscribers("MP").is_empty());
        assert_eq!(manager.attribute_count(), 1);

        manager.clear_subscriptions("s2");
        assert_eq!(manager.attribute_count(), 0);
        assert_eq!(manager.script_count(), 0);
    }

    #[test]
    fn test_register_without_current_script() {
        let manager = SubscriptionManager::new();
        assert_eq!(
            manager.register_subscription(&["HP"]),
            Err(ScriptError::NoScriptContext)
        );

        manager.set_current_script("s1");
        manager.clear_current_script();
        assert_eq!(
            manager.register_subscription(&["HP"]),
            Err(ScriptError::NoScriptContext)
        );
        assert!(manager.get_subscribers("HP").is_empty());
    }

    #[test]
    fn test_clear_all() {
        let manager = SubscriptionManager::new();
        manager.register_for("s1", &["HP"]);
        manager.register_for("s2", &["STR", "DEX"]);
        manager.clear_all();

        assert_eq!(manager.script_count(), 0);
        assert_eq!(manager.attribute_count(), 0);
    }

    #[test]
    fn test_sessions_are_independent() {
        let a = SubscriptionManager::new();
        let b = SubscriptionManager::new();
        a.register_for("s1", &["HP"]);
        assert!(b.get_subscribers("HP").is_empty());
    }
}
