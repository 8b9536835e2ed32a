//! Script runner seam
//!
//! The executor never evaluates scripts itself; it hands a
//! [`ScriptRunRequest`] to a [`RunScriptFn`]. The default runner
//! ([`EngineRunner`]) evaluates in-process with a [`ScriptEngine`]; tests and
//! sandboxed hosts inject their own.
//!
//! Requests and results are plain serde data so they can cross thread or
//! process boundaries.

use crate::error::Result;
use crate::sheet::CharacterSheet;
use dashmap::DashMap;
use futures::future::BoxFuture;
use qbscript_core::{Chart, Script};
use qbscript_scripting::{EvalResult, EvaluationContext, ScriptEngine, Value, WorkerSignal};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Async script runner
pub type RunScriptFn = Arc<dyn Fn(ScriptRunRequest) -> BoxFuture<'static, Result<ScriptRunResult>> + Send + Sync>;

/// What to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptRunRequest {
    pub script: Script,
    /// Handler function to call; `None` runs the script top to bottom
    pub event: Option<String>,
    pub character_id: Option<String>,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    /// Charts of the script's ruleset, in addition to any the runner holds
    #[serde(default)]
    pub charts: Vec<Chart>,
}

/// Script failure as reported by a runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptRunError {
    pub message: String,
    pub line: Option<usize>,
    #[serde(default)]
    pub stack_trace: Vec<String>,
}

/// Outcome of a run, detached from the interpreter's values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptRunResult {
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub announce_messages: Vec<String>,
    #[serde(default)]
    pub log_messages: Vec<String>,
    #[serde(default)]
    pub signals: Vec<WorkerSignal>,
    /// `None` when the run modified nothing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_attribute_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ScriptRunError>,
}

impl From<EvalResult> for ScriptRunResult {
    fn from(result: EvalResult) -> Self {
        Self {
            value: result.value.to_json(),
            announce_messages: result.announce_messages.into_iter().map(|a| a.message).collect(),
            log_messages: result.log_messages,
            signals: result.signals,
            modified_attribute_ids: if result.modified_attribute_ids.is_empty() {
                None
            } else {
                Some(result.modified_attribute_ids)
            },
            error: result.error.map(|failure| ScriptRunError {
                message: failure.error.to_string(),
                line: failure.line,
                stack_trace: failure.stack_trace,
            }),
        }
    }
}

/// In-process runner backed by a [`ScriptEngine`]
#[derive(Debug)]
pub struct EngineRunner {
    engine: Arc<ScriptEngine>,
    /// Sheets by character id
    sheets: DashMap<String, CharacterSheet>,
    /// Charts by ruleset id
    charts: DashMap<String, Vec<Chart>>,
}

impl EngineRunner {
    pub fn new(engine: Arc<ScriptEngine>) -> Self {
        Self {
            engine,
            sheets: DashMap::new(),
            charts: DashMap::new(),
        }
    }

    pub fn engine(&self) -> &Arc<ScriptEngine> {
        &self.engine
    }

    /// Make a character's sheet available as `Owner` in runs for that
    /// character
    pub fn add_sheet(&self, sheet: CharacterSheet) {
        self.sheets.insert(sheet.character_id().to_string(), sheet);
    }

    pub fn sheet(&self, character_id: &str) -> Option<CharacterSheet> {
        self.sheets.get(character_id).map(|s| s.clone())
    }

    pub fn add_chart(&self, chart: Chart) {
        self.charts.entry(chart.ruleset_id.clone()).or_default().push(chart);
    }

    /// Run synchronously on the calling thread
    pub fn run(&self, request: &ScriptRunRequest) -> ScriptRunResult {
        let script = &request.script;
        let mut ctx = EvaluationContext::for_script(script);
        let mut staged = None;

        if let Some(character_id) = &request.character_id {
            ctx = ctx.with_character(character_id.clone());
            if let Some(sheet) = self.sheets.get(character_id) {
                staged = Some(sheet.install(&mut ctx));
            }
        }
        if let Some(charts) = self.charts.get(&script.ruleset_id) {
            for chart in charts.iter() {
                ctx.add_chart(chart.clone());
            }
        }
        for chart in &request.charts {
            ctx.add_chart(chart.clone());
        }

        let result = match &request.event {
            Some(event) => {
                debug!("Running '{}' of script {}", event, script.id);
                let args = request.args.iter().map(Value::from_json).collect();
                self.engine.run_event(script, event, args, &mut ctx)
            }
            None => self.engine.run_script(script, &mut ctx),
        };

        // Attribute writes land only when the whole run succeeded
        match staged {
            Some(staged) if result.is_ok() => {
                let applied = staged.commit();
                debug!("Committed {} attribute write(s) of script {}", applied, script.id);
            }
            Some(staged) => debug!(
                "Discarded {} attribute write(s) of failed script {}",
                staged.attribute_ids().len(),
                script.id
            ),
            None => {}
        }

        ScriptRunResult::from(result)
    }

    /// Wrap the runner as a [`RunScriptFn`]
    pub fn into_fn(self: Arc<Self>) -> RunScriptFn {
        Arc::new(move |request: ScriptRunRequest| -> BoxFuture<'static, Result<ScriptRunResult>> {
            let result = self.run(&request);
            Box::pin(futures::future::ready(Ok(result)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qbscript_core::EntityType;
    use serde_json::json;

    fn item_script(source: &str) -> Script {
        Script::new("script-potion", "ruleset-1", EntityType::Item, Some("item-potion".into()), source)
    }

    #[tokio::test]
    async fn test_engine_runner_event() {
        let runner = Arc::new(EngineRunner::new(Arc::new(ScriptEngine::with_defaults())));
        let sheet = CharacterSheet::new("char-1", "ruleset-1");
        sheet.add_attribute("attr-stamina", "Stamina", 10);
        runner.add_sheet(sheet.clone());

        let run = Arc::clone(&runner).into_fn();
        let result = run(ScriptRunRequest {
            script: item_script("on_consume():\n    Owner.Attribute(\"Stamina\").add(5)\n    announce(\"Refreshed\")\n"),
            event: Some("on_consume".into()),
            character_id: Some("char-1".into()),
            args: vec![],
            charts: vec![],
        })
        .await
        .unwrap();

        assert_eq!(result.error, None);
        assert_eq!(result.modified_attribute_ids, Some(vec!["attr-stamina".to_string()]));
        assert_eq!(result.announce_messages, vec!["Refreshed"]);
        assert_eq!(sheet.value("Stamina"), Some(json!(15)));
    }

    #[tokio::test]
    async fn test_engine_runner_reports_errors() {
        let runner = Arc::new(EngineRunner::new(Arc::new(ScriptEngine::with_defaults())));
        let run = runner.into_fn();

        let result = run(ScriptRunRequest {
            script: item_script("on_equip():\n    return missing + 1\n"),
            event: Some("on_equip".into()),
            character_id: None,
            args: vec![],
            charts: vec![],
        })
        .await
        .unwrap();

        let error = result.error.expect("error expected");
        assert_eq!(error.line, Some(2));
        assert_eq!(error.stack_trace.len(), 2);
        assert_eq!(result.modified_attribute_ids, None);
    }

    #[tokio::test]
    async fn test_engine_runner_failed_run_keeps_sheet() {
        let runner = Arc::new(EngineRunner::new(Arc::new(ScriptEngine::with_defaults())));
        let sheet = CharacterSheet::new("char-1", "ruleset-1");
        sheet.add_attribute("attr-stamina", "Stamina", 10);
        runner.add_sheet(sheet.clone());

        let run = runner.into_fn();
        let result = run(ScriptRunRequest {
            script: item_script("on_consume():\n    Owner.Attribute(\"Stamina\").add(5)\n    return missing\n"),
            event: Some("on_consume".into()),
            character_id: Some("char-1".into()),
            args: vec![],
            charts: vec![],
        })
        .await
        .unwrap();

        assert_eq!(result.error.map(|e| e.line), Some(Some(3)));
        assert_eq!(sheet.value("Stamina"), Some(json!(10)));
    }

    #[tokio::test]
    async fn test_engine_runner_charts() {
        let runner = EngineRunner::new(Arc::new(ScriptEngine::with_defaults()));
        runner.add_chart(Chart {
            id: "chart-1".into(),
            ruleset_id: "ruleset-1".into(),
            title: "Levels".into(),
            data: r#"[["Level","Ability Points"],[1,3],[2,6]]"#.into(),
        });

        let result = runner.run(&ScriptRunRequest {
            script: item_script("Chart(\"Levels\").rowWhere(\"Level\", \"2\").valueInColumn(\"Ability Points\")"),
            event: None,
            character_id: None,
            args: vec![],
            charts: vec![],
        });
        assert_eq!(result.value, json!(6));
    }

    #[test]
    fn test_result_wire_format() {
        let result = ScriptRunResult {
            value: json!(3),
            modified_attribute_ids: Some(vec!["attr-stamina".into()]),
            ..Default::default()
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["modifiedAttributeIds"], json!(["attr-stamina"]));
        assert!(json.get("error").is_none());
    }
}
