//! Script engine session
//!
//! A [`ScriptEngine`] owns the subscription registry and the AST cache for
//! one session. It is `Send + Sync`; every run still gets its own
//! [`EvaluationContext`].

use crate::cache::{AstCache, CacheOutcome};
use crate::context::EvaluationContext;
use crate::error::Result;
use crate::interpreter::{evaluate, EvalFailure, EvalOptions, EvalResult, Interpreter};
use crate::lang::{parse_source, Program};
use crate::subscriptions::SubscriptionManager;
use crate::value::Value;
use qbscript_config::EngineConfig;
use qbscript_core::Script;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Script engine session
#[derive(Debug)]
pub struct ScriptEngine {
    config: EngineConfig,
    options: EvalOptions,
    subscriptions: SubscriptionManager,
    cache: AstCache,
}

impl ScriptEngine {
    /// Create a new session
    pub fn new(config: EngineConfig) -> Self {
        info!(
            "Script engine ready (call depth {}, loop budget {}, AST cache {})",
            config.max_call_depth, config.max_loop_iterations, config.ast_cache_capacity
        );
        Self {
            options: EvalOptions::from(&config),
            subscriptions: SubscriptionManager::new(),
            cache: AstCache::new(config.ast_cache_capacity),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn options(&self) -> &EvalOptions {
        &self.options
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn cache(&self) -> &AstCache {
        &self.cache
    }

    /// Parse `source` for `script_id`, reusing the cached program while the
    /// source is unchanged. Changed or unparsable source also drops the
    /// script's old subscriptions.
    pub fn parse_cached(&self, script_id: &str, source: &str) -> Result<Arc<Program>> {
        let (program, outcome) = match self.cache.get_or_parse(script_id, source) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.subscriptions.clear_subscriptions(script_id);
                return Err(e);
            }
        };
        if outcome == CacheOutcome::Replaced {
            debug!("Source of script {} changed; clearing its subscriptions", script_id);
            self.subscriptions.clear_subscriptions(script_id);
        }
        Ok(program)
    }

    /// Evaluate a parsed program
    pub fn evaluate(&self, program: &Program, ctx: &mut EvaluationContext) -> EvalResult {
        let result = evaluate(program, ctx, &self.subscriptions, &self.options);
        self.log_outcome(ctx, &result);
        result
    }

    /// Parse and evaluate source that has no script id (nothing is cached)
    pub fn evaluate_source(&self, source: &str, ctx: &mut EvaluationContext) -> EvalResult {
        match parse_source(source) {
            Ok(program) => self.evaluate(&program, ctx),
            Err(e) => {
                let result = EvalResult::failed(EvalFailure::from_parse_error(e));
                self.log_outcome(ctx, &result);
                result
            }
        }
    }

    /// Run a stored script. Its subscriptions are rebuilt by the run.
    /// Disabled scripts do nothing.
    pub fn run_script(&self, script: &Script, ctx: &mut EvaluationContext) -> EvalResult {
        if !script.enabled {
            debug!("Skipping disabled script {}", script.id);
            return EvalResult::empty();
        }
        if ctx.script_id().is_none() {
            ctx.set_script_id(script.id.clone());
        }

        let program = match self.parse_cached(&script.id, &script.source_code) {
            Ok(program) => program,
            Err(e) => {
                let result = EvalResult::failed(EvalFailure::from_parse_error(e));
                self.log_outcome(ctx, &result);
                return result;
            }
        };

        self.subscriptions.clear_subscriptions(&script.id);
        self.evaluate(&program, ctx)
    }

    /// Call the function named `event` in a stored script. A script that
    /// does not define the function, or is disabled, does nothing. Missing
    /// arguments are `null`; extra ones are dropped.
    pub fn run_event(&self, script: &Script, event: &str, args: Vec<Value>, ctx: &mut EvaluationContext) -> EvalResult {
        if !script.enabled {
            debug!("Skipping disabled script {}", script.id);
            return EvalResult::empty();
        }
        if ctx.script_id().is_none() {
            ctx.set_script_id(script.id.clone());
        }

        let program = match self.parse_cached(&script.id, &script.source_code) {
            Ok(program) => program,
            Err(e) => {
                let result = EvalResult::failed(EvalFailure::from_parse_error(e));
                self.log_outcome(ctx, &result);
                return result;
            }
        };

        let Some(decl) = program.function(event) else {
            debug!("Script {} has no '{}' handler", script.id, event);
            return EvalResult::empty();
        };
        let mut args = args;
        args.resize(decl.params.len(), Value::Null);

        let result = Interpreter::new(ctx, &self.subscriptions, self.options.clone()).run_function(&program, event, args);
        self.log_outcome(ctx, &result);
        result
    }

    /// Forget everything the session knows about a script
    pub fn forget_script(&self, script_id: &str) {
        self.cache.invalidate(script_id);
        self.subscriptions.clear_subscriptions(script_id);
    }

    fn log_outcome(&self, ctx: &EvaluationContext, result: &EvalResult) {
        let script = ctx.script_id().unwrap_or("<anonymous>");
        match &result.error {
            Some(failure) => warn!(
                "Script {} failed at line {}: {}",
                script,
                failure.line.map_or_else(|| "?".to_string(), |l| l.to_string()),
                failure.error
            ),
            None => debug!(
                "Script {} evaluated to {} ({} attribute(s) modified)",
                script,
                result.value,
                result.modified_attribute_ids.len()
            ),
        }
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}
