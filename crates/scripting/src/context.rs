//! Script execution context
//!
//! An [`EvaluationContext`] is created fresh for every run and never shared:
//! it carries the script being run, host-injected globals and charts, and
//! accumulates the run's side effects.

use crate::chart::ChartProxy;
use crate::error::{Result, ScriptError};
use crate::signals::WorkerSignal;
use crate::value::{HostObject, NativeFunction, Value};
use qbscript_core::{Chart, Script};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::rc::Rc;

/// Message produced by `announce(...)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub message: String,
    pub announcement_id: Option<String>,
}

/// Side effects accumulated during one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SideEffects {
    pub announcements: Vec<Announcement>,
    pub log_messages: Vec<String>,
    pub signals: Vec<WorkerSignal>,
    pub modified_attribute_ids: Vec<String>,
}

impl SideEffects {
    /// Record that an attribute was written; ids are kept unique, in first
    /// write order
    pub fn mark_modified(&mut self, attribute_id: impl Into<String>) {
        let attribute_id = attribute_id.into();
        if !self.modified_attribute_ids.contains(&attribute_id) {
            self.modified_attribute_ids.push(attribute_id);
        }
    }

    pub fn announce(&mut self, message: String, announcement_id: Option<String>) {
        self.signals.push(WorkerSignal::Announce {
            message: message.clone(),
            announcement_id: announcement_id.clone(),
        });
        self.announcements.push(Announcement {
            message,
            announcement_id,
        });
    }

    pub fn log(&mut self, args: &[Value]) {
        let line = args
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        self.signals.push(WorkerSignal::ConsoleLog {
            args: args.iter().map(Value::to_json).collect(),
        });
        self.log_messages.push(line);
    }
}

/// Per-run evaluation context
#[derive(Debug, Default)]
pub struct EvaluationContext {
    /// Script being run; subscriptions are attributed to it
    script_id: Option<String>,

    /// Character the run is for (if any)
    character_id: Option<String>,

    /// Ruleset the run belongs to (if any)
    ruleset_id: Option<String>,

    /// Host-injected globals (attribute/item proxies and the like)
    globals: HashMap<String, Value>,

    /// Charts reachable through `Chart(name)`, by title and by id
    charts: HashMap<String, Chart>,

    /// Charts already parsed during this run
    parsed_charts: HashMap<String, Rc<ChartProxy>>,

    effects: SideEffects,
}

impl EvaluationContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Context attributed to `script`
    pub fn for_script(script: &Script) -> Self {
        let mut ctx = Self::new();
        ctx.script_id = Some(script.id.clone());
        ctx.ruleset_id = Some(script.ruleset_id.clone());
        ctx
    }

    pub fn with_character(mut self, character_id: impl Into<String>) -> Self {
        self.character_id = Some(character_id.into());
        self
    }

    pub fn script_id(&self) -> Option<&str> {
        self.script_id.as_deref()
    }

    pub fn set_script_id(&mut self, script_id: impl Into<String>) {
        self.script_id = Some(script_id.into());
    }

    pub fn character_id(&self) -> Option<&str> {
        self.character_id.as_deref()
    }

    pub fn ruleset_id(&self) -> Option<&str> {
        self.ruleset_id.as_deref()
    }

    /// Inject a global value
    pub fn define_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    /// Inject a host object as a global
    pub fn define_object(&mut self, name: impl Into<String>, object: Rc<dyn HostObject>) {
        self.define_global(name, Value::Object(object));
    }

    /// Inject a host function as a global
    pub fn define_function(&mut self, function: NativeFunction) {
        let name = function.name.clone();
        self.define_global(name, Value::Native(Rc::new(function)));
    }

    /// Get a global variable
    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    pub fn has_global(&self, name: &str) -> bool {
        self.globals.contains_key(name)
    }

    /// Make a chart available to `Chart(title)` and `Chart(id)`
    pub fn add_chart(&mut self, chart: Chart) {
        self.charts.insert(chart.id.clone(), chart.clone());
        self.charts.insert(chart.title.clone(), chart);
    }

    /// Resolve and parse a chart by title or id; parsed charts are reused
    /// for the rest of the run
    pub fn chart(&mut self, name: &str) -> Result<Rc<ChartProxy>> {
        if let Some(proxy) = self.parsed_charts.get(name) {
            return Ok(Rc::clone(proxy));
        }

        let chart = self
            .charts
            .get(name)
            .ok_or_else(|| ScriptError::Runtime(format!("Chart '{}' not found", name)))?;
        let proxy = Rc::new(ChartProxy::new(chart)?);
        self.parsed_charts.insert(name.to_string(), Rc::clone(&proxy));
        Ok(proxy)
    }

    pub fn effects(&self) -> &SideEffects {
        &self.effects
    }

    pub fn effects_mut(&mut self) -> &mut SideEffects {
        &mut self.effects
    }

    /// Take the accumulated side effects, leaving the context empty
    pub fn take_effects(&mut self) -> SideEffects {
        std::mem::take(&mut self.effects)
    }
}
