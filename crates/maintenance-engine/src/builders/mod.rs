//! Recipe builders: pure functions expanding a typed operation request plus a
//! cluster snapshot into an ordered [`Step`] list.
//!
//! No direct donor analogue (the donor's `Workflow::on_start()` decides actions
//! reactively rather than pre-expanding a full plan) — these are plain pure
//! functions in the spirit of the donor's "deterministic state machine" framing
//! (`durable/src/workflow/definition.rs`). Step ordering is total and
//! reproducible for identical inputs; no step mutates shared state; validation
//! errors name the offending parameter and the allowed set.

mod engine_upgrade;
mod instance_cycle;
mod instance_type_change;

use thiserror::Error;

use crate::types::{ClusterSnapshot, OperationParams, Step};

#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("unknown target instance type '{value}', allowed: {allowed:?}")]
    UnknownTargetInstanceType { value: String, allowed: Vec<String> },

    #[error("unknown target engine version '{value}', allowed: {allowed:?}")]
    UnknownTargetEngineVersion { value: String, allowed: Vec<String> },

    #[error("cluster '{0}' has no writer instance")]
    NoWriterFound(String),

    #[error(
        "cluster already has an active blue/green deployment targeting '{existing}', but '{requested}' was requested"
    )]
    MismatchedBlueGreenTarget { existing: String, requested: String },
}

/// Expand `params` against `snapshot` into the ordered step list for the
/// operation. Deterministic: identical inputs always yield an identical
/// sequence of step name/description/action triples.
pub fn build_steps(params: &OperationParams, snapshot: &ClusterSnapshot) -> Result<Vec<Step>, BuilderError> {
    match params {
        OperationParams::InstanceTypeChange(p) => instance_type_change::build(p, snapshot),
        OperationParams::EngineUpgrade(p) => engine_upgrade::build(p, snapshot),
        OperationParams::InstanceCycle(p) => instance_cycle::build(p, snapshot),
    }
}

pub use engine_upgrade::build as build_engine_upgrade;
pub use instance_cycle::build as build_instance_cycle;
pub use instance_type_change::build as build_instance_type_change;
