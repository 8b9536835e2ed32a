//! # qbscript Scripting Engine
//!
//! This crate parses and evaluates qbscript, the formula and event-handler
//! language attached to attributes, items and actions on a character sheet.
//!
//! ## Features
//! - Indentation-significant lexer and recursive descent parser
//! - Tree-walking evaluator with lexical scoping and hoisted functions
//! - Built-in math helpers, array methods and chart lookups
//! - Subscription registry tracking which attributes each script reads
//! - AST cache keyed by script id and source hash
//!
//! ## Example
//!
//! ```
//! use qbscript_scripting::{EvaluationContext, ScriptEngine, Value};
//!
//! let engine = ScriptEngine::with_defaults();
//! let mut ctx = EvaluationContext::new();
//! let result = engine.evaluate_source("modifier(score):\n    return floor((score - 10) / 2)\nmodifier(16)", &mut ctx);
//! assert!(matches!(result.value, Value::Number(n) if n == 3.0));
//! ```

pub mod error;
pub mod lang;
pub mod value;
pub mod context;
pub mod signals;
pub mod builtins;
pub mod chart;
pub mod interpreter;
pub mod subscriptions;
pub mod cache;
pub mod engine;

pub use error::{ScriptError, Result};
pub use lang::{parse_source, tokenize, Program};
pub use value::{HostObject, NativeFunction, Value};
pub use context::{Announcement, EvaluationContext, SideEffects};
pub use signals::WorkerSignal;
pub use builtins::{ArrayMethod, Builtin, ChartMethod, RowMethod};
pub use chart::{ChartProxy, Row};
pub use interpreter::{evaluate, EvalFailure, EvalOptions, EvalResult, Interpreter};
pub use subscriptions::SubscriptionManager;
pub use cache::{AstCache, CacheOutcome, CacheStats};
pub use engine::ScriptEngine;
