//! qbscript core - shared records and utilities
//!
//! Everything the engine receives from, or hands back to, the host lives
//! here: persisted script/chart/entity snapshots and the error report shape.

mod error;
mod types;
mod idgen;
mod report;

pub use error::*;
pub use types::*;
pub use idgen::*;
pub use report::*;
