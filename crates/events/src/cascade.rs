//! Attribute recompute cascade
//!
//! Attribute scripts compute an attribute's value and `subscribe(...)` to
//! the attributes they read. When attributes change, every script that
//! transitively depends on them is collected first, then the collection is
//! run in dependency order: a script runs only after the scripts producing
//! the attributes it subscribes to. Each result is written back to the
//! sheet.
//!
//! Each script runs at most once per cascade. Dependency cycles are broken
//! by running the earliest discovered script of the cycle first. A failing
//! script leaves its attribute and every attribute it wrote untouched.

use crate::sheet::{CharacterSheet, StagedWrites};
use qbscript_core::{Chart, EntityType, IdGenerator, Script, ScriptErrorReport};
use qbscript_scripting::{EvalResult, EvaluationContext, ScriptEngine};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What one cascade did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CascadeReport {
    /// Scripts that ran successfully, in run order
    pub recomputed: Vec<String>,
    /// Names of attributes whose value changed
    pub changed: Vec<String>,
    pub failures: Vec<ScriptErrorReport>,
    /// The run limit stopped the cascade early
    pub truncated: bool,
}

impl CascadeReport {
    fn runs(&self) -> usize {
        self.recomputed.len() + self.failures.len()
    }
}

/// Successful run of one attribute script
struct Recomputed {
    /// Name of the attribute the script computes
    produced: Option<String>,
    changed: bool,
    /// Names of other attributes written through `Owner`
    touched: Vec<String>,
}

/// Re-runs attribute scripts of one character
pub struct RecomputeCascade {
    engine: Arc<ScriptEngine>,
    sheet: CharacterSheet,
    /// Attribute scripts by id
    scripts: BTreeMap<String, Script>,
    charts: Vec<Chart>,
    max_runs: usize,
    ids: IdGenerator,
}

impl RecomputeCascade {
    pub fn new(engine: Arc<ScriptEngine>, sheet: CharacterSheet) -> Self {
        let max_runs = engine.config().max_cascade_passes;
        Self {
            engine,
            sheet,
            scripts: BTreeMap::new(),
            charts: Vec::new(),
            max_runs,
            ids: IdGenerator::new(),
        }
    }

    pub fn sheet(&self) -> &CharacterSheet {
        &self.sheet
    }

    /// Register an attribute script; other script kinds are ignored
    pub fn add_script(&mut self, script: Script) -> bool {
        if script.entity_type != EntityType::Attribute {
            debug!("Script {} is not an attribute script", script.id);
            return false;
        }
        self.engine.forget_script(&script.id);
        self.scripts.insert(script.id.clone(), script);
        true
    }

    /// Drop a script and its subscriptions
    pub fn remove_script(&mut self, script_id: &str) -> Option<Script> {
        self.engine.forget_script(script_id);
        self.scripts.remove(script_id)
    }

    pub fn add_chart(&mut self, chart: Chart) {
        self.charts.push(chart);
    }

    /// Run every attribute script once, in dependency order.
    ///
    /// A silent first pass in id order records the subscriptions the order
    /// is derived from; its writes are discarded.
    pub fn recompute_all(&self) -> CascadeReport {
        for script in self.scripts.values() {
            let (result, _discarded) = self.evaluate(script);
            if let Some(failure) = &result.error {
                debug!("Script {} failed while recording subscriptions: {}", script.id, failure.error);
            }
        }

        let ids: Vec<String> = self.scripts.keys().cloned().collect();
        let mut report = CascadeReport::default();
        for script_id in self.dependency_order(&ids) {
            if let Some(script) = self.scripts.get(&script_id) {
                self.record(script, &mut report);
            }
        }

        info!(
            "Recomputed {} attribute script(s) for character {} ({} failed)",
            report.recomputed.len(),
            self.sheet.character_id(),
            report.failures.len()
        );
        report
    }

    /// Re-run everything that depends on `names`
    pub fn attributes_changed<S: AsRef<str>>(&self, names: &[S]) -> CascadeReport {
        let mut report = CascadeReport::default();
        let mut ran: HashSet<String> = HashSet::new();
        let mut changed: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();

        // Attributes written through `Owner` start another round
        while !changed.is_empty() {
            let affected = self.affected_by(&changed, &ran);
            changed.clear();

            for script_id in self.dependency_order(&affected) {
                if report.runs() >= self.max_runs {
                    warn!(
                        "Cascade for character {} stopped after {} script run(s)",
                        self.sheet.character_id(),
                        report.runs()
                    );
                    report.truncated = true;
                    return report;
                }
                ran.insert(script_id.clone());

                let Some(script) = self.scripts.get(&script_id) else {
                    continue;
                };
                debug!("Recomputing script {}", script_id);
                if let Some(run) = self.record(script, &mut report) {
                    changed.extend(run.touched);
                }
            }
        }

        report
    }

    /// Name of the attribute `script` computes
    fn produced_name(&self, script: &Script) -> Option<String> {
        let attribute_id = script.entity_id.as_deref()?;
        self.sheet.attribute_by_id(attribute_id).map(|a| a.name)
    }

    /// Scripts that transitively subscribe to `names`, in discovery order.
    /// Scripts in `ran` are neither collected nor followed.
    fn affected_by(&self, names: &[String], ran: &HashSet<String>) -> Vec<String> {
        let mut affected = Vec::new();
        let mut seen_scripts: HashSet<String> = HashSet::new();
        let mut seen_names: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = names.iter().cloned().collect();

        while let Some(name) = queue.pop_front() {
            if !seen_names.insert(name.clone()) {
                continue;
            }
            for script_id in self.engine.subscriptions().get_subscribers(&name) {
                if ran.contains(&script_id) || !seen_scripts.insert(script_id.clone()) {
                    continue;
                }
                let Some(script) = self.scripts.get(&script_id) else {
                    debug!("Subscriber {} of '{}' is not an attribute script here", script_id, name);
                    continue;
                };
                queue.extend(self.produced_name(script));
                affected.push(script_id);
            }
        }

        affected
    }

    /// Order `script_ids` so producers run before their subscribers. Ties
    /// and cycles resolve by position in `script_ids`.
    fn dependency_order(&self, script_ids: &[String]) -> Vec<String> {
        let count = script_ids.len();
        let producers: HashMap<String, usize> = script_ids
            .iter()
            .enumerate()
            .filter_map(|(index, id)| {
                let name = self.produced_name(self.scripts.get(id)?)?;
                Some((name, index))
            })
            .collect();

        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut waiting_on = vec![0usize; count];
        for (index, id) in script_ids.iter().enumerate() {
            for dependency in self.engine.subscriptions().get_dependencies(id) {
                match producers.get(&dependency) {
                    Some(&producer) if producer != index => {
                        dependents[producer].push(index);
                        waiting_on[index] += 1;
                    }
                    _ => {}
                }
            }
        }

        let mut ready: BTreeSet<usize> = (0..count).filter(|&i| waiting_on[i] == 0).collect();
        let mut done = vec![false; count];
        let mut order = Vec::with_capacity(count);

        while order.len() < count {
            let next = match ready.pop_first() {
                Some(next) => next,
                None => {
                    let Some(next) = (0..count).find(|&i| !done[i]) else {
                        break;
                    };
                    debug!("Dependency cycle through script {}", script_ids[next]);
                    next
                }
            };
            if done[next] {
                continue;
            }
            done[next] = true;
            order.push(script_ids[next].clone());

            for &dependent in &dependents[next] {
                waiting_on[dependent] = waiting_on[dependent].saturating_sub(1);
                if waiting_on[dependent] == 0 && !done[dependent] {
                    ready.insert(dependent);
                }
            }
        }

        order
    }

    fn record(&self, script: &Script, report: &mut CascadeReport) -> Option<Recomputed> {
        match self.run(script) {
            Ok(run) => {
                report.recomputed.push(script.id.clone());
                if run.changed {
                    report.changed.extend(run.produced.clone());
                }
                Some(run)
            }
            Err(failure) => {
                report.failures.push(failure);
                None
            }
        }
    }

    /// Run `script` against the sheet without applying its writes
    fn evaluate(&self, script: &Script) -> (EvalResult, StagedWrites) {
        let mut ctx = EvaluationContext::for_script(script).with_character(self.sheet.character_id());
        let staged = self.sheet.install(&mut ctx);
        for chart in &self.charts {
            ctx.add_chart(chart.clone());
        }
        (self.engine.run_script(script, &mut ctx), staged)
    }

    fn run(&self, script: &Script) -> Result<Recomputed, ScriptErrorReport> {
        let (result, staged) = self.evaluate(script);
        if let Some(failure) = &result.error {
            return Err(failure.report(&self.ids, &script.id, Some(self.sheet.character_id())));
        }
        staged.commit();

        let touched = result
            .modified_attribute_ids
            .iter()
            .filter(|id| script.entity_id.as_deref() != Some(id.as_str()))
            .filter_map(|id| self.sheet.attribute_by_id(id).map(|a| a.name))
            .collect();

        let mut produced = None;
        let mut changed = false;
        if let Some(attribute_id) = &script.entity_id {
            let value = result.value.to_json();
            let previous = self.sheet.attribute_by_id(attribute_id).map(|a| a.value);
            changed = previous.as_ref() != Some(&value);
            produced = self.sheet.set_value_by_id(attribute_id, value);
        }

        Ok(Recomputed {
            produced,
            changed,
            touched,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qbscript_config::EngineConfig;
    use serde_json::json;

    fn attribute_script(id: &str, attribute_id: &str, source: &str) -> Script {
        Script::new(id, "ruleset-1", EntityType::Attribute, Some(attribute_id.into()), source)
    }

    fn sheet() -> CharacterSheet {
        let sheet = CharacterSheet::new("char-1", "ruleset-1");
        sheet.add_attribute("attr-str", "Strength", 16);
        sheet.add_attribute("attr-str-mod", "Strength Modifier", 0);
        sheet.add_attribute("attr-carry", "Carry Capacity", 0);
        sheet
    }

    fn modifier_chain(engine: Arc<ScriptEngine>) -> RecomputeCascade {
        let mut cascade = RecomputeCascade::new(engine, sheet());
        cascade.add_script(attribute_script(
            "script-str-mod",
            "attr-str-mod",
            "subscribe(\"Strength\")\nfloor((Owner.Attribute(\"Strength\").value - 10) / 2)\n",
        ));
        cascade.add_script(attribute_script(
            "script-carry",
            "attr-carry",
            "subscribe(\"Strength Modifier\")\n50 + Owner.Attribute(\"Strength Modifier\").value * 10\n",
        ));
        cascade
    }

    #[test]
    fn test_recompute_all_primes_subscriptions() {
        let engine = Arc::new(ScriptEngine::with_defaults());
        let cascade = modifier_chain(Arc::clone(&engine));

        let report = cascade.recompute_all();
        assert_eq!(report.recomputed, vec!["script-str-mod", "script-carry"]);
        assert_eq!(report.changed, vec!["Strength Modifier", "Carry Capacity"]);
        assert_eq!(cascade.sheet().value("Strength Modifier"), Some(json!(3)));
        assert_eq!(cascade.sheet().value("Carry Capacity"), Some(json!(80)));

        let subscribers = engine.subscriptions().get_subscribers("Strength");
        assert!(subscribers.contains("script-str-mod"));
    }

    #[test]
    fn test_modifier_chain() {
        let engine = Arc::new(ScriptEngine::with_defaults());
        let cascade = modifier_chain(engine);
        cascade.recompute_all();

        cascade.sheet().set_value("Strength", json!(20));
        let report = cascade.attributes_changed(&["Strength"]);

        assert_eq!(report.recomputed, vec!["script-str-mod", "script-carry"]);
        assert_eq!(report.changed, vec!["Strength Modifier", "Carry Capacity"]);
        assert!(report.failures.is_empty());
        assert_eq!(cascade.sheet().value("Strength Modifier"), Some(json!(5)));
        assert_eq!(cascade.sheet().value("Carry Capacity"), Some(json!(100)));
    }

    /// A feeds B directly and C through E; D sums B and C
    fn diamond(engine: Arc<ScriptEngine>) -> RecomputeCascade {
        let sheet = CharacterSheet::new("char-1", "ruleset-1");
        for name in ["A", "B", "C", "D", "E"] {
            sheet.add_attribute(format!("attr-{}", name.to_lowercase()), name, 1);
        }

        let mut cascade = RecomputeCascade::new(engine, sheet);
        cascade.add_script(attribute_script("script-b", "attr-b", "subscribe(\"A\")\nOwner.Attribute(\"A\").value + 1\n"));
        cascade.add_script(attribute_script("script-e", "attr-e", "subscribe(\"A\")\nOwner.Attribute(\"A\").value + 1\n"));
        cascade.add_script(attribute_script("script-c", "attr-c", "subscribe(\"E\")\nOwner.Attribute(\"E\").value + 1\n"));
        cascade.add_script(attribute_script(
            "script-d",
            "attr-d",
            "subscribe(\"B\", \"C\")\nOwner.Attribute(\"B\").value + Owner.Attribute(\"C\").value\n",
        ));
        cascade
    }

    #[test]
    fn test_diamond_joins_after_both_branches() {
        let engine = Arc::new(ScriptEngine::with_defaults());
        let cascade = diamond(engine);
        cascade.recompute_all();
        assert_eq!(cascade.sheet().value("D"), Some(json!(5)));

        cascade.sheet().set_value("A", json!(10));
        let report = cascade.attributes_changed(&["A"]);

        assert_eq!(report.recomputed, vec!["script-b", "script-e", "script-c", "script-d"]);
        assert_eq!(cascade.sheet().value("B"), Some(json!(11)));
        assert_eq!(cascade.sheet().value("C"), Some(json!(12)));
        assert_eq!(cascade.sheet().value("D"), Some(json!(23)));
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_multi_level_chain_runs_bottom_up() {
        let engine = Arc::new(ScriptEngine::with_defaults());
        let sheet = CharacterSheet::new("char-1", "ruleset-1");
        sheet.add_attribute("attr-level", "Level", 1);
        sheet.add_attribute("attr-base", "Base", 0);
        sheet.add_attribute("attr-mid", "Mid", 0);
        sheet.add_attribute("attr-total", "Total", 0);

        // Ids sort opposite to the dependency order
        let mut cascade = RecomputeCascade::new(engine, sheet);
        cascade.add_script(attribute_script("script-1-total", "attr-total", "subscribe(\"Mid\")\nOwner.Attribute(\"Mid\").value * 10\n"));
        cascade.add_script(attribute_script("script-2-mid", "attr-mid", "subscribe(\"Base\")\nOwner.Attribute(\"Base\").value + 1\n"));
        cascade.add_script(attribute_script("script-3-base", "attr-base", "subscribe(\"Level\")\nOwner.Attribute(\"Level\").value * 2\n"));

        let report = cascade.recompute_all();
        assert_eq!(report.recomputed, vec!["script-3-base", "script-2-mid", "script-1-total"]);
        assert_eq!(cascade.sheet().value("Total"), Some(json!(30)));

        // Mid is found first, yet Total still waits for Base and Mid
        cascade.sheet().set_value("Level", json!(4));
        let report = cascade.attributes_changed(&["Mid", "Level"]);
        assert_eq!(report.recomputed, vec!["script-3-base", "script-2-mid", "script-1-total"]);
        assert_eq!(report.changed, vec!["Base", "Mid", "Total"]);
        assert_eq!(cascade.sheet().value("Total"), Some(json!(90)));
    }

    #[test]
    fn test_cycle_terminates() {
        let engine = Arc::new(ScriptEngine::with_defaults());
        let sheet = CharacterSheet::new("char-1", "ruleset-1");
        sheet.add_attribute("attr-a", "A", 1);
        sheet.add_attribute("attr-b", "B", 1);

        let mut cascade = RecomputeCascade::new(engine, sheet);
        cascade.add_script(attribute_script("script-a", "attr-a", "subscribe(\"B\")\nOwner.Attribute(\"B\").value + 1\n"));
        cascade.add_script(attribute_script("script-b", "attr-b", "subscribe(\"A\")\nOwner.Attribute(\"A\").value + 1\n"));
        cascade.recompute_all();

        let report = cascade.attributes_changed(&["A"]);
        assert_eq!(report.recomputed, vec!["script-b", "script-a"]);
        assert!(!report.truncated);
    }

    #[test]
    fn test_failure_leaves_value_unchanged() {
        let engine = Arc::new(ScriptEngine::with_defaults());
        let mut cascade = modifier_chain(engine);
        cascade.recompute_all();

        cascade.add_script(attribute_script(
            "script-carry",
            "attr-carry",
            "subscribe(\"Strength Modifier\")\nOwner.Attribute(\"Strength Modifier\").value * missing\n",
        ));
        // Re-register the subscription of the replaced source
        let report = cascade.recompute_all();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(cascade.sheet().value("Carry Capacity"), Some(json!(80)));

        cascade.sheet().set_value("Strength", json!(12));
        let report = cascade.attributes_changed(&["Strength"]);

        assert_eq!(report.recomputed, vec!["script-str-mod"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].script_id, "script-carry");
        assert_eq!(report.failures[0].line_number, Some(2));
        assert_eq!(cascade.sheet().value("Strength Modifier"), Some(json!(1)));
        assert_eq!(cascade.sheet().value("Carry Capacity"), Some(json!(80)));
    }

    #[test]
    fn test_run_limit_truncates() {
        let config = EngineConfig {
            max_cascade_passes: 1,
            ..Default::default()
        };
        let engine = Arc::new(ScriptEngine::new(config));
        let cascade = modifier_chain(engine);
        cascade.recompute_all();

        let report = cascade.attributes_changed(&["Strength"]);
        assert_eq!(report.recomputed, vec!["script-str-mod"]);
        assert!(report.truncated);
    }

    #[test]
    fn test_non_attribute_scripts_are_ignored() {
        let engine = Arc::new(ScriptEngine::with_defaults());
        let mut cascade = RecomputeCascade::new(engine, sheet());
        let item = Script::new("script-item", "ruleset-1", EntityType::Item, Some("item-1".into()), "1");
        assert!(!cascade.add_script(item));
        assert!(cascade.recompute_all().recomputed.is_empty());
    }
}
