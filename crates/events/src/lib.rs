//! # qbscript Event Handling
//!
//! Runs item and action event handlers (`on_equip`, `on_consume`, ...)
//! against a character sheet and notifies the host about attributes the
//! handler changed.
//!
//! ## Host seams
//! - [`EntityStore`]: async lookup of actions, items, scripts and charts
//! - [`RunScriptFn`]: async script runner, engine-backed by default and
//!   replaceable with a stub
//! - [`OnAttributesModifiedFn`]: async notification callback
//!
//! [`RecomputeCascade`] re-runs attribute scripts that subscribed to
//! changed attributes.

pub mod error;
pub mod store;
pub mod sheet;
pub mod runner;
pub mod executor;
pub mod cascade;

pub use error::{EventError, Result};
pub use store::{EntityStore, InMemoryStore};
pub use sheet::{AttributeState, CharacterSheet, StagedWrites};
pub use runner::{EngineRunner, RunScriptFn, ScriptRunError, ScriptRunRequest, ScriptRunResult};
pub use executor::{EventHandlerExecutor, EventOutcome, OnAttributesModifiedFn};
pub use cascade::{CascadeReport, RecomputeCascade};
