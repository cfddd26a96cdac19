//! Error types for the safety core.

use thiserror::Error;

use crate::command::VehicleCommand;

/// Errors raised while building or validating a geofence.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FenceError {
    #[error("fence {fence_id}: vertex index {index} out of range (declared {declared} vertices)")]
    VertexIndexOutOfRange {
        fence_id: u32,
        index: usize,
        declared: usize,
    },
    #[error("fence {fence_id}: polygon not finalized ({missing} vertices missing)")]
    Incomplete { fence_id: u32, missing: usize },
    #[error("fence {fence_id}: degenerate polygon ({reason})")]
    Degenerate { fence_id: u32, reason: String },
}

/// Errors raised by plan construction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("waypoint time {time_s:.3}s does not follow previous time {previous_s:.3}s")]
    NonIncreasingTime { time_s: f64, previous_s: f64 },
    #[error("plan is empty")]
    Empty,
}

/// Errors raised by the replanning engines.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlannerError {
    #[error("start position lies outside the search area")]
    StartOutOfBounds,
    #[error("goal position lies outside the search area")]
    GoalOutOfBounds,
    #[error("search exhausted after {expansions} expansions without reaching the goal")]
    Exhausted { expansions: usize },
    #[error("no candidate resolution available: {0}")]
    NoCandidate(String),
    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// Outcome of a command that the vehicle did not accept.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("command rejected by autopilot: {0:?}")]
    Rejected(VehicleCommand),
    #[error("command denied by autopilot: {0:?}")]
    AccessDenied(VehicleCommand),
    #[error("no acknowledgement within {waited_ms} ms for {command:?}")]
    Timeout {
        command: VehicleCommand,
        waited_ms: u64,
    },
    #[error("command link closed")]
    LinkClosed,
}

/// Errors raised while parsing monitor parameters.
#[derive(Debug, Error)]
pub enum ParamError {
    #[error("invalid parameter set: {0}")]
    Invalid(#[from] serde_json::Error),
    #[error("parameter {key}: {reason}")]
    OutOfRange { key: String, reason: String },
}
