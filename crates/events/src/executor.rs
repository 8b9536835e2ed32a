//! Event handler executor
//!
//! Runs the handler function (`on_equip`, `on_unequip`, `on_consume`,
//! `on_activate`, ...) of an item's or action's script and tells the host
//! which attributes it changed.
//!
//! # Behaviour
//!
//! - Missing entity, missing script and disabled script are silent no-ops.
//! - `on_attributes_modified` is called exactly once when the run succeeded
//!   and reported modified attributes, and never otherwise.
//! - A failing script produces a [`ScriptErrorReport`] for the host to
//!   persist; it is not an `Err`.

use crate::error::{EventError, Result};
use crate::runner::{RunScriptFn, ScriptRunRequest};
use crate::store::EntityStore;
use futures::future::BoxFuture;
use qbscript_core::{IdGenerator, ScriptErrorReport};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Host callback: `(attribute_ids, character_id, ruleset_id)`
pub type OnAttributesModifiedFn =
    Arc<dyn Fn(Vec<String>, String, String) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// What an event did
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    /// The item or action does not exist
    NoEntity,
    /// The entity has no script, or its script does not exist
    NoScript,
    /// The entity's script is disabled
    Disabled,
    /// The handler ran; `modified` lists the attribute ids it wrote
    Completed { modified: Vec<String> },
    /// The handler failed
    Failed(ScriptErrorReport),
}

/// Entity resolved for an event
struct EventTarget {
    kind: &'static str,
    id: String,
    ruleset_id: String,
    script_id: Option<String>,
}

/// Executes item and action event handlers
pub struct EventHandlerExecutor {
    store: Arc<dyn EntityStore>,
    run_script: RunScriptFn,
    on_attributes_modified: OnAttributesModifiedFn,
    ids: IdGenerator,
}

impl EventHandlerExecutor {
    pub fn new(store: Arc<dyn EntityStore>, run_script: RunScriptFn, on_attributes_modified: OnAttributesModifiedFn) -> Self {
        Self {
            store,
            run_script,
            on_attributes_modified,
            ids: IdGenerator::new(),
        }
    }

    /// Build the callback from any async closure
    pub fn callback<F, Fut>(callback: F) -> OnAttributesModifiedFn
    where
        F: Fn(Vec<String>, String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Arc::new(move |ids: Vec<String>, character_id: String, ruleset_id: String| -> BoxFuture<'static, Result<()>> {
            Box::pin(callback(ids, character_id, ruleset_id))
        })
    }

    /// Run `event_name` on an action's script. `context` is passed to the
    /// handler as its first argument.
    pub async fn execute_action_event(
        &self,
        action_id: &str,
        character_id: &str,
        context: Option<serde_json::Value>,
        event_name: &str,
    ) -> Result<EventOutcome> {
        let Some(action) = self.store.action(action_id).await? else {
            debug!("Action {} not found; ignoring '{}'", action_id, event_name);
            return Ok(EventOutcome::NoEntity);
        };

        let target = EventTarget {
            kind: "action",
            id: action.id,
            ruleset_id: action.ruleset_id,
            script_id: action.script_id,
        };
        let args = context.into_iter().collect();
        self.execute(target, character_id, event_name, args).await
    }

    /// Run `event_name` on an item's script
    pub async fn execute_item_event(&self, item_id: &str, character_id: &str, event_name: &str) -> Result<EventOutcome> {
        let Some(item) = self.store.item(item_id).await? else {
            debug!("Item {} not found; ignoring '{}'", item_id, event_name);
            return Ok(EventOutcome::NoEntity);
        };

        let target = EventTarget {
            kind: "item",
            id: item.id,
            ruleset_id: item.ruleset_id,
            script_id: item.script_id,
        };
        self.execute(target, character_id, event_name, Vec::new()).await
    }

    async fn execute(
        &self,
        target: EventTarget,
        character_id: &str,
        event_name: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<EventOutcome> {
        let Some(script_id) = target.script_id else {
            debug!("{} {} has no script", target.kind, target.id);
            return Ok(EventOutcome::NoScript);
        };
        let Some(script) = self.store.script(&script_id).await? else {
            debug!("Script {} of {} {} not found", script_id, target.kind, target.id);
            return Ok(EventOutcome::NoScript);
        };
        if !script.enabled {
            debug!("Script {} of {} {} is disabled", script_id, target.kind, target.id);
            return Ok(EventOutcome::Disabled);
        }

        let charts = self.store.charts(&target.ruleset_id).await?;
        let request = ScriptRunRequest {
            script,
            event: Some(event_name.to_string()),
            character_id: Some(character_id.to_string()),
            args,
            charts,
        };
        let result = (self.run_script)(request).await?;

        if let Some(error) = result.error {
            warn!(
                "'{}' of {} {} failed for character {}: {}",
                event_name, target.kind, target.id, character_id, error.message
            );
            let report = ScriptErrorReport::new(
                &self.ids,
                script_id,
                Some(character_id.to_string()),
                error.message,
                error.line,
                &error.stack_trace,
            );
            return Ok(EventOutcome::Failed(report));
        }

        let modified = result.modified_attribute_ids.unwrap_or_default();
        if !modified.is_empty() {
            info!(
                "'{}' of {} {} modified {} attribute(s) of character {}",
                event_name,
                target.kind,
                target.id,
                modified.len(),
                character_id
            );
            (self.on_attributes_modified)(modified.clone(), character_id.to_string(), target.ruleset_id)
                .await
                .map_err(|e| match e {
                    EventError::Callback(_) => e,
                    other => EventError::Callback(other.to_string()),
                })?;
        }

        Ok(EventOutcome::Completed { modified })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{EngineRunner, ScriptRunError, ScriptRunResult};
    use crate::sheet::CharacterSheet;
    use crate::store::InMemoryStore;
    use parking_lot::Mutex;
    use qbscript_core::{ActionRecord, Chart, EntityType, ItemRecord, Script};
    use qbscript_scripting::ScriptEngine;

    type Calls = Arc<Mutex<Vec<(Vec<String>, String, String)>>>;

    fn recording_callback() -> (OnAttributesModifiedFn, Calls) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let callback = EventHandlerExecutor::callback(move |ids, character_id, ruleset_id| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push((ids, character_id, ruleset_id));
                Ok(())
            }
        });
        (callback, calls)
    }

    fn stub_runner(result: ScriptRunResult) -> RunScriptFn {
        Arc::new(move |_request: ScriptRunRequest| -> BoxFuture<'static, Result<ScriptRunResult>> {
            let result = result.clone();
            Box::pin(async move { Ok(result) })
        })
    }

    fn store_with_item(source: &str) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store.insert_item(ItemRecord {
            id: "item-potion".into(),
            ruleset_id: "ruleset-1".into(),
            title: "Potion".into(),
            script_id: Some("script-potion".into()),
        });
        store.insert_script(Script::new(
            "script-potion",
            "ruleset-1",
            EntityType::Item,
            Some("item-potion".into()),
            source,
        ));
        store
    }

    #[tokio::test]
    async fn test_callback_invoked_exactly_once() {
        let (callback, calls) = recording_callback();
        let runner = stub_runner(ScriptRunResult {
            modified_attribute_ids: Some(vec!["attr-stamina".into()]),
            ..Default::default()
        });
        let executor = EventHandlerExecutor::new(store_with_item(""), runner, callback);

        let outcome = executor.execute_item_event("item-potion", "char-1", "on_consume").await.unwrap();

        assert_eq!(
            outcome,
            EventOutcome::Completed {
                modified: vec!["attr-stamina".into()]
            }
        );
        let calls = calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            (vec!["attr-stamina".to_string()], "char-1".to_string(), "ruleset-1".to_string())
        );
    }

    #[tokio::test]
    async fn test_callback_never_invoked_on_error() {
        let (callback, calls) = recording_callback();
        let runner = stub_runner(ScriptRunResult {
            modified_attribute_ids: Some(vec!["attr-stamina".into()]),
            error: Some(ScriptRunError {
                message: "boom".into(),
                line: Some(3),
                stack_trace: vec!["at on_consume (line 3)".into()],
            }),
            ..Default::default()
        });
        let executor = EventHandlerExecutor::new(store_with_item(""), runner, callback);

        let outcome = executor.execute_item_event("item-potion", "char-1", "on_consume").await.unwrap();

        match outcome {
            EventOutcome::Failed(report) => {
                assert_eq!(report.script_id, "script-potion");
                assert_eq!(report.character_id.as_deref(), Some("char-1"));
                assert_eq!(report.line_number, Some(3));
                assert_eq!(report.error_message, "boom");
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_callback_never_invoked_without_ids() {
        let (callback, calls) = recording_callback();
        let executor = EventHandlerExecutor::new(store_with_item(""), stub_runner(ScriptRunResult::default()), callback);

        let outcome = executor.execute_item_event("item-potion", "char-1", "on_equip").await.unwrap();

        assert_eq!(outcome, EventOutcome::Completed { modified: vec![] });
        assert!(calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_silent_no_ops() {
        let (callback, calls) = recording_callback();
        let store = store_with_item("");
        store.insert_item(ItemRecord {
            id: "item-rock".into(),
            ruleset_id: "ruleset-1".into(),
            title: "Rock".into(),
            script_id: None,
        });
        store.insert_item(ItemRecord {
            id: "item-ghost".into(),
            ruleset_id: "ruleset-1".into(),
            title: "Ghost".into(),
            script_id: Some("script-deleted".into()),
        });
        let runner = stub_runner(ScriptRunResult {
            modified_attribute_ids: Some(vec!["attr-stamina".into()]),
            ..Default::default()
        });
        let executor = EventHandlerExecutor::new(store.clone(), runner, callback);

        let outcome = executor.execute_item_event("item-missing", "char-1", "on_equip").await.unwrap();
        assert_eq!(outcome, EventOutcome::NoEntity);

        let outcome = executor.execute_item_event("item-rock", "char-1", "on_equip").await.unwrap();
        assert_eq!(outcome, EventOutcome::NoScript);

        let outcome = executor.execute_item_event("item-ghost", "char-1", "on_equip").await.unwrap();
        assert_eq!(outcome, EventOutcome::NoScript);

        store.set_script_enabled("script-potion", false);
        let outcome = executor.execute_item_event("item-potion", "char-1", "on_equip").await.unwrap();
        assert_eq!(outcome, EventOutcome::Disabled);

        let outcome = executor.execute_action_event("action-missing", "char-1", None, "on_activate").await.unwrap();
        assert_eq!(outcome, EventOutcome::NoEntity);

        assert!(calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_callback_error_propagates() {
        let callback = EventHandlerExecutor::callback(|_, _, _| async { Err(EventError::Store("offline".into())) });
        let runner = stub_runner(ScriptRunResult {
            modified_attribute_ids: Some(vec!["attr-stamina".into()]),
            ..Default::default()
        });
        let executor = EventHandlerExecutor::new(store_with_item(""), runner, callback);

        let err = executor.execute_item_event("item-potion", "char-1", "on_consume").await.unwrap_err();
        assert!(matches!(err, EventError::Callback(_)));
    }

    #[tokio::test]
    async fn test_engine_backed_item_event() {
        let store = store_with_item(
            "on_consume():\n    Owner.Attribute(\"Stamina\").add(10)\non_equip():\n    log(\"equipped\")\n",
        );
        let sheet = CharacterSheet::new("char-1", "ruleset-1");
        sheet.add_attribute("attr-stamina", "Stamina", 5);

        let runner = Arc::new(EngineRunner::new(Arc::new(ScriptEngine::with_defaults())));
        runner.add_sheet(sheet.clone());

        let (callback, calls) = recording_callback();
        let executor = EventHandlerExecutor::new(store, runner.into_fn(), callback);

        let outcome = executor.execute_item_event("item-potion", "char-1", "on_consume").await.unwrap();
        assert_eq!(
            outcome,
            EventOutcome::Completed {
                modified: vec!["attr-stamina".into()]
            }
        );
        assert_eq!(sheet.value("Stamina"), Some(serde_json::json!(15)));

        // Handlers that change nothing, or do not exist, never notify
        executor.execute_item_event("item-potion", "char-1", "on_equip").await.unwrap();
        executor.execute_item_event("item-potion", "char-1", "on_unequip").await.unwrap();
        assert_eq!(calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_action_event_receives_context() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_action(ActionRecord {
            id: "action-rest".into(),
            ruleset_id: "ruleset-1".into(),
            title: "Rest".into(),
            script_id: Some("script-rest".into()),
        });
        store.insert_script(Script::new(
            "script-rest",
            "ruleset-1",
            EntityType::Action,
            Some("action-rest".into()),
            "on_activate(context):\n    Owner.Attribute(\"HP\").set(context.hours * 2)\n",
        ));
        let sheet = CharacterSheet::new("char-1", "ruleset-1");
        sheet.add_attribute("attr-hp", "HP", 1);

        let runner = Arc::new(EngineRunner::new(Arc::new(ScriptEngine::with_defaults())));
        runner.add_sheet(sheet.clone());
        let (callback, calls) = recording_callback();
        let executor = EventHandlerExecutor::new(store, runner.into_fn(), callback);

        let outcome = executor
            .execute_action_event("action-rest", "char-1", Some(serde_json::json!({"hours": 8})), "on_activate")
            .await
            .unwrap();

        assert_eq!(outcome, EventOutcome::Completed { modified: vec!["attr-hp".into()] });
        assert_eq!(sheet.value("HP"), Some(serde_json::json!(16)));
        assert_eq!(calls.lock()[0].0, vec!["attr-hp".to_string()]);
    }

    #[tokio::test]
    async fn test_store_charts_reach_the_script() {
        let store = store_with_item(
            "on_equip():\n    bonus = Chart(\"Bonuses\").rowWhere(\"Item\", \"Potion\").valueInColumn(\"Stamina\")\n    Owner.Attribute(\"Stamina\").add(bonus)\n",
        );
        store.insert_chart(Chart {
            id: "chart-bonuses".into(),
            ruleset_id: "ruleset-1".into(),
            title: "Bonuses".into(),
            data: r#"[["Item","Stamina"],["Rope",1],["Potion",4]]"#.into(),
        });
        let sheet = CharacterSheet::new("char-1", "ruleset-1");
        sheet.add_attribute("attr-stamina", "Stamina", 5);

        let runner = Arc::new(EngineRunner::new(Arc::new(ScriptEngine::with_defaults())));
        runner.add_sheet(sheet.clone());
        let (callback, _calls) = recording_callback();
        let executor = EventHandlerExecutor::new(store, runner.into_fn(), callback);

        let outcome = executor.execute_item_event("item-potion", "char-1", "on_equip").await.unwrap();
        assert!(matches!(outcome, EventOutcome::Completed { .. }), "{:?}", outcome);
        assert_eq!(sheet.value("Stamina"), Some(serde_json::json!(9)));
    }

    #[tokio::test]
    async fn test_failed_handler_leaves_sheet_untouched() {
        let store = store_with_item("on_consume():\n    Owner.Attribute(\"Stamina\").add(10)\n    return undefined_bonus\n");
        let sheet = CharacterSheet::new("char-1", "ruleset-1");
        sheet.add_attribute("attr-stamina", "Stamina", 5);

        let runner = Arc::new(EngineRunner::new(Arc::new(ScriptEngine::with_defaults())));
        runner.add_sheet(sheet.clone());
        let (callback, calls) = recording_callback();
        let executor = EventHandlerExecutor::new(store, runner.into_fn(), callback);

        let outcome = executor.execute_item_event("item-potion", "char-1", "on_consume").await.unwrap();
        assert!(matches!(outcome, EventOutcome::Failed(_)), "{:?}", outcome);
        assert_eq!(sheet.value("Stamina"), Some(serde_json::json!(5)));
        assert!(calls.lock().is_empty());
    }
}
