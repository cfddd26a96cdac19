pub mod command;
pub mod conflict;
pub mod daa;
pub mod error;
pub mod fms;
pub mod geofence;
pub mod grid_planner;
pub mod models;
pub mod params;
pub mod polygon;
pub mod resolver;
pub mod rrt;
pub mod spatial;

pub use command::{AckStatus, CommandAck, CommandLink, FlightMode, VehicleCommand};
pub use conflict::{Conflict, ConflictDetector, ConflictKind, ConflictSource};
pub use daa::{BandRegion, DaaCapability, DaaReport, HeadingBand, SeparationBands, TrafficAlert};
pub use error::{CommandError, FenceError, ParamError, PlanError, PlannerError};
pub use fms::{
    CycleReport, FlightPhase, FlightStateMachine, ManeuverStage, ResolveState, TrajectoryStage,
};
pub use geofence::{FenceDefinition, FenceStatus, FenceType, GeoFence};
pub use grid_planner::{go_above_plan, GridPlanResult, GridPlanner, GridPlannerConfig};
pub use models::{
    CycleSnapshot, MissionSignal, NavPoint, OwnshipState, Plan, Position, TrafficTrack, Velocity,
    VehicleStatus,
};
pub use params::{KeepOutStrategy, MonitorParams, TrafficStrategy};
pub use resolver::{
    intercept_plan, plan_is_feasible, CandidateLength, Maneuver, Resolution, ResolutionContext,
    Resolver, ResumeTarget, TrajectoryResolution,
};
pub use rrt::{RrtConfig, SamplingPlanner, SearchNode, SearchTree};
pub use spatial::{haversine_distance, LocalProjection};
