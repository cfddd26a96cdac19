//! Flight management state machine.
//!
//! Sequences the vehicle through takeoff, mission cruise and landing, runs
//! conflict detection every cycle while cruising, and drives the nested
//! resolve machine (compute, maneuver or trajectory, resume).

use crate::command::{CommandLink, FlightMode, VehicleCommand};
use crate::conflict::{Conflict, ConflictDetector, ConflictKind, ConflictSource};
use crate::daa::DaaCapability;
use crate::error::CommandError;
use crate::geofence::{FenceStatus, GeoFence};
use crate::models::{CycleSnapshot, MissionSignal, OwnshipState, Plan, Position};
use crate::params::MonitorParams;
use crate::resolver::{
    intercept_plan, Resolution, ResolutionContext, Resolver, ResumeTarget, TrajectoryResolution,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Upper bound on resolve transitions taken within one cycle.
const MAX_TRANSITIONS_PER_CYCLE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightPhase {
    Idle,
    Takeoff,
    Climb,
    Cruise,
    Land,
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManeuverStage {
    Start,
    Guide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrajectoryStage {
    Start,
    Fix,
    Enroute,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum ResolveState {
    Idle,
    Compute,
    Maneuver(ManeuverStage),
    Trajectory(TrajectoryStage),
    Resume,
}

impl ResolveState {
    pub fn is_trajectory(&self) -> bool {
        matches!(self, ResolveState::Trajectory(_) | ResolveState::Resume)
    }
}

/// Outcome of one control cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub time_s: f64,
    pub phase: FlightPhase,
    pub resolve_state: ResolveState,
    /// Resolve states entered during this cycle, in order
    pub transitions: Vec<ResolveState>,
    pub conflict_count: usize,
    pub mission_index: usize,
    pub commands: Vec<VehicleCommand>,
    pub failures: Vec<CommandError>,
    /// Resolution computed this cycle, if any
    pub resolution: Option<Resolution>,
}

impl CycleReport {
    fn new(time_s: f64) -> Self {
        Self {
            time_s,
            phase: FlightPhase::Idle,
            resolve_state: ResolveState::Idle,
            transitions: Vec::new(),
            conflict_count: 0,
            mission_index: 0,
            commands: Vec::new(),
            failures: Vec::new(),
            resolution: None,
        }
    }
}

/// Whether the resolve machine should keep stepping this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Wait,
}

pub struct FlightStateMachine<L: CommandLink, D: DaaCapability> {
    params: MonitorParams,
    link: L,
    daa: D,
    detector: ConflictDetector,
    resolver: Resolver,
    fences: Vec<GeoFence>,
    mission: Option<Plan>,

    phase: FlightPhase,
    resolve_state: ResolveState,
    /// Conflict kind the current resolution addresses
    active_kind: Option<ConflictKind>,
    resolution: Option<TrajectoryResolution>,
    resolution_wp: usize,
    /// Set while flying the course back to the mission
    intercepting: bool,

    mission_wp: usize,
    start_index: usize,
    plan_elapsed_s: f64,
    /// Conflict keys seen by the previous detection pass
    last_conflicts: Vec<(ConflictKind, ConflictSource)>,
    takeoff_attempts: u32,
    land_acked: bool,
}

impl<L: CommandLink, D: DaaCapability> FlightStateMachine<L, D> {
    pub fn new(params: MonitorParams, link: L, daa: D) -> Self {
        Self {
            detector: ConflictDetector::new(&params),
            resolver: Resolver::new(&params),
            params,
            link,
            daa,
            fences: Vec::new(),
            mission: None,
            phase: FlightPhase::Idle,
            resolve_state: ResolveState::Idle,
            active_kind: None,
            resolution: None,
            resolution_wp: 0,
            intercepting: false,
            mission_wp: 0,
            start_index: 1,
            plan_elapsed_s: 0.0,
            last_conflicts: Vec::new(),
            takeoff_attempts: 0,
            land_acked: false,
        }
    }

    // ========== Setup ==========

    pub fn load_mission(&mut self, plan: Plan) {
        info!("Mission {} loaded with {} waypoints", plan.id, plan.len());
        self.mission = Some(plan);
        self.mission_wp = 0;
    }

    /// Add a fence, replacing any fence with the same id.
    pub fn add_fence(&mut self, fence: GeoFence) {
        if let Err(e) = fence.ensure_finalized() {
            warn!("Fence {} added before it is usable: {}", fence.id(), e);
        }
        self.fences.retain(|f| f.id() != fence.id());
        self.fences.push(fence);
    }

    // ========== Accessors ==========

    pub fn phase(&self) -> FlightPhase {
        self.phase
    }

    pub fn resolve_state(&self) -> ResolveState {
        self.resolve_state
    }

    pub fn mission_index(&self) -> usize {
        self.mission_wp
    }

    pub fn mission(&self) -> Option<&Plan> {
        self.mission.as_ref()
    }

    pub fn fences(&self) -> &[GeoFence] {
        &self.fences
    }

    pub fn detector(&self) -> &ConflictDetector {
        &self.detector
    }

    pub fn resolution_plan(&self) -> Option<&Plan> {
        self.resolution.as_ref().map(|r| &r.plan)
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    // ========== Cycle ==========

    /// Advance the machine by one control cycle.
    pub fn run_cycle(&mut self, snapshot: &CycleSnapshot) -> CycleReport {
        let mut report = CycleReport::new(snapshot.time_s);

        if let Some(signal) = snapshot.signal {
            self.handle_signal(signal);
        }

        match self.phase {
            FlightPhase::Idle | FlightPhase::Terminate => {}
            FlightPhase::Takeoff => self.takeoff(&mut report),
            FlightPhase::Climb => self.climb(snapshot, &mut report),
            FlightPhase::Cruise => self.cruise(snapshot, &mut report),
            FlightPhase::Land => self.land(snapshot, &mut report),
        }

        report.phase = self.phase;
        report.resolve_state = self.resolve_state;
        report.conflict_count = self.detector.size();
        report.mission_index = self.mission_wp;
        report
    }

    fn handle_signal(&mut self, signal: MissionSignal) {
        match signal {
            MissionSignal::Start { start_index } => {
                if self.phase != FlightPhase::Idle {
                    debug!("Start signal ignored in phase {:?}", self.phase);
                    return;
                }
                if self.mission.as_ref().map_or(true, Plan::is_empty) {
                    warn!("Start signal received without a mission; staying idle");
                    return;
                }
                info!("Mission start requested at waypoint {}", start_index);
                self.start_index = start_index.max(1);
                self.takeoff_attempts = 0;
                self.set_phase(FlightPhase::Takeoff);
            }
            MissionSignal::Stop => {
                if matches!(
                    self.phase,
                    FlightPhase::Takeoff | FlightPhase::Climb | FlightPhase::Cruise
                ) {
                    info!("Stop signal received, landing");
                    self.abandon_resolution();
                    self.land_acked = false;
                    self.set_phase(FlightPhase::Land);
                }
            }
        }
    }

    fn set_phase(&mut self, phase: FlightPhase) {
        if self.phase != phase {
            info!("Flight phase {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    fn set_resolve(&mut self, state: ResolveState, report: &mut CycleReport) {
        if self.resolve_state != state {
            debug!("Resolve state {:?} -> {:?}", self.resolve_state, state);
        }
        self.resolve_state = state;
        report.transitions.push(state);
    }

    fn send(&mut self, command: VehicleCommand, report: &mut CycleReport) -> bool {
        match self.link.send(command.clone()) {
            Ok(()) => {
                report.commands.push(command);
                true
            }
            Err(e) => {
                warn!("Command failed: {}", e);
                report.failures.push(e);
                false
            }
        }
    }

    // ========== Phases ==========

    fn takeoff(&mut self, report: &mut CycleReport) {
        let altitude_m = self.params.takeoff_alt_m;
        let accepted = self.send(VehicleCommand::SetMode { mode: FlightMode::Guided }, report)
            && self.send(VehicleCommand::Arm, report)
            && self.send(VehicleCommand::Takeoff { altitude_m }, report);

        if accepted {
            self.set_phase(FlightPhase::Climb);
            return;
        }
        self.takeoff_attempts += 1;
        if self.takeoff_attempts >= self.params.takeoff_retries {
            warn!(
                "Takeoff failed {} times, returning to idle",
                self.takeoff_attempts
            );
            self.set_phase(FlightPhase::Idle);
        }
    }

    fn climb(&mut self, snapshot: &CycleSnapshot, report: &mut CycleReport) {
        let error = (snapshot.ownship.position.altitude_m - self.params.takeoff_alt_m).abs();
        if error >= self.params.climb_tolerance_m {
            return;
        }
        self.mission_wp = self.start_index;
        self.set_phase(FlightPhase::Cruise);
        self.send(VehicleCommand::SetMode { mode: FlightMode::Auto }, report);
        self.send(
            VehicleCommand::SetMissionCurrent {
                index: self.mission_wp,
            },
            report,
        );
    }

    fn land(&mut self, snapshot: &CycleSnapshot, report: &mut CycleReport) {
        if !self.land_acked {
            let position = snapshot.ownship.position;
            self.land_acked = self.send(VehicleCommand::SetMode { mode: FlightMode::Guided }, report)
                && self.send(VehicleCommand::Land { position }, report);
        }
        if self.land_acked && snapshot.status.landed {
            info!("Landing complete");
            self.set_phase(FlightPhase::Terminate);
        }
    }

    fn cruise(&mut self, snapshot: &CycleSnapshot, report: &mut CycleReport) {
        let Some(mission) = self.mission.as_ref() else {
            self.set_phase(FlightPhase::Land);
            return;
        };
        let own = &snapshot.ownship;

        self.plan_elapsed_s = snapshot
            .plan_elapsed_s
            .or_else(|| mission.approx_elapsed_time(&own.position, self.mission_wp))
            .unwrap_or(0.0);

        // Cross-track is only meaningful while following the mission.
        let (active_plan, elapsed, deviation_leg) =
            match (&self.resolution, self.resolve_state.is_trajectory()) {
                (Some(res), true) => (&res.plan, own.time_s, None),
                _ => (mission, self.plan_elapsed_s, Some(mission)),
            };
        let count = self.detector.monitor(
            &mut self.fences,
            own,
            elapsed,
            Some(active_plan),
            deviation_leg,
            self.mission_wp,
            &snapshot.traffic,
            &self.daa,
        );

        let keys = self.detector.keys();
        if count > 0 && keys != self.last_conflicts {
            warn!(
                "{} conflict(s) active (was {}), computing resolution",
                count,
                self.last_conflicts.len()
            );
            if self.resolve_state.is_trajectory() {
                info!("Abandoning in-flight resolution");
                self.abandon_resolution();
            }
            self.set_resolve(ResolveState::Compute, report);
        }
        self.last_conflicts = keys;

        if self.resolve_state == ResolveState::Idle {
            self.track_mission(snapshot);
            return;
        }

        for _ in 0..MAX_TRANSITIONS_PER_CYCLE {
            if self.step_resolve(snapshot, report) == Flow::Wait {
                break;
            }
        }
    }

    /// Advance the mission index on capture and land at the end.
    fn track_mission(&mut self, snapshot: &CycleSnapshot) {
        let Some(mission) = self.mission.as_ref() else {
            return;
        };
        if let Some(wp) = mission.point(self.mission_wp) {
            if self.captured(&snapshot.ownship.position, &wp.position) {
                self.mission_wp += 1;
                debug!("Mission waypoint captured, next {}", self.mission_wp);
            }
        }
        if self.mission_wp >= mission.len() {
            info!("Mission complete");
            self.set_phase(FlightPhase::Land);
            self.land_acked = false;
        }
    }

    fn captured(&self, position: &Position, target: &Position) -> bool {
        position.distance_h(target) < self.params.capture_h_m
            && position.distance_v(target) < self.params.capture_v_m
    }

    // ========== Resolve machine ==========

    fn step_resolve(&mut self, snapshot: &CycleSnapshot, report: &mut CycleReport) -> Flow {
        match self.resolve_state {
            ResolveState::Idle => Flow::Wait,
            ResolveState::Compute => self.compute(snapshot, report),
            ResolveState::Maneuver(stage) => self.fly_maneuver(stage, snapshot, report),
            ResolveState::Trajectory(stage) => self.fly_trajectory(stage, snapshot, report),
            ResolveState::Resume => self.resume(snapshot, report),
        }
    }

    fn compute(&mut self, snapshot: &CycleSnapshot, report: &mut CycleReport) -> Flow {
        let Some(conflict) = self.detector.highest_priority().cloned() else {
            self.set_resolve(ResolveState::Idle, report);
            return Flow::Wait;
        };
        let conflict = self.retime_against_mission(conflict, &snapshot.ownship);
        let Some(mission) = self.mission.as_ref() else {
            self.set_resolve(ResolveState::Idle, report);
            return Flow::Wait;
        };

        let ctx = ResolutionContext {
            ownship: &snapshot.ownship,
            mission,
            next_mission_wp: self.mission_wp,
            plan_elapsed_s: self.plan_elapsed_s,
            fences: &self.fences,
            traffic: &snapshot.traffic,
            daa: &self.daa,
        };
        let result = self.resolver.resolve(&conflict, &ctx);

        match result {
            Ok(resolution) => {
                self.active_kind = Some(conflict.kind());
                report.resolution = Some(resolution.clone());
                match resolution {
                    Resolution::Maneuver(_) => {
                        self.set_resolve(ResolveState::Maneuver(ManeuverStage::Start), report);
                    }
                    Resolution::Trajectory(trajectory) => {
                        self.install(trajectory, 0, false);
                        self.set_resolve(ResolveState::Trajectory(TrajectoryStage::Start), report);
                    }
                }
                Flow::Continue
            }
            Err(e) => {
                warn!("Resolution for {:?} failed: {}", conflict.kind(), e);
                // Retry next cycle.
                self.last_conflicts.clear();
                self.set_resolve(ResolveState::Idle, report);
                Flow::Wait
            }
        }
    }

    /// Keep-out windows are mission times. A conflict detected against an
    /// abandoned resolution plan gets the fence's mission entry/exit instead,
    /// or none when the mission never crosses it.
    fn retime_against_mission(&mut self, conflict: Conflict, ownship: &OwnshipState) -> Conflict {
        let Conflict::KeepOut { fence_id, status } = conflict else {
            return conflict;
        };
        let Some(mission) = self.mission.as_ref() else {
            return Conflict::KeepOut { fence_id, status };
        };
        let Some(fence) = self.fences.iter_mut().find(|f| f.id() == fence_id) else {
            return Conflict::KeepOut { fence_id, status };
        };
        let on_mission = fence.check_violation(ownship, self.plan_elapsed_s, Some(mission));
        Conflict::KeepOut {
            fence_id,
            status: FenceStatus {
                entry_time: on_mission.entry_time,
                exit_time: on_mission.exit_time,
                ..status
            },
        }
    }

    fn install(&mut self, trajectory: TrajectoryResolution, first_wp: usize, intercepting: bool) {
        info!(
            "Installing {} trajectory with {} waypoints",
            trajectory.plan.id,
            trajectory.plan.len()
        );
        self.resolution = Some(trajectory);
        self.resolution_wp = first_wp;
        self.intercepting = intercepting;
    }

    fn abandon_resolution(&mut self) {
        self.resolution = None;
        self.resolution_wp = 0;
        self.intercepting = false;
    }

    fn fly_maneuver(
        &mut self,
        stage: ManeuverStage,
        snapshot: &CycleSnapshot,
        report: &mut CycleReport,
    ) -> Flow {
        match stage {
            ManeuverStage::Start => {
                self.send(VehicleCommand::SetMode { mode: FlightMode::Guided }, report);
                self.set_resolve(ResolveState::Maneuver(ManeuverStage::Guide), report);
                Flow::Continue
            }
            ManeuverStage::Guide => {
                let trigger = self
                    .active_kind
                    .and_then(|kind| self.detector.of_kind(kind).next().cloned());
                let Some(conflict) = trigger else {
                    info!("Maneuver conflict cleared, resuming mission");
                    self.resume_mission(report);
                    return Flow::Wait;
                };
                let Some(mission) = self.mission.as_ref() else {
                    self.set_resolve(ResolveState::Idle, report);
                    return Flow::Wait;
                };
                let ctx = ResolutionContext {
                    ownship: &snapshot.ownship,
                    mission,
                    next_mission_wp: self.mission_wp,
                    plan_elapsed_s: self.plan_elapsed_s,
                    fences: &self.fences,
                    traffic: &snapshot.traffic,
                    daa: &self.daa,
                };
                match self.resolver.resolve(&conflict, &ctx) {
                    Ok(Resolution::Maneuver(m)) => {
                        self.send(VehicleCommand::SetHeading { heading_deg: m.heading_deg }, report);
                        self.send(
                            VehicleCommand::SetVelocity {
                                vn: m.vn,
                                ve: m.ve,
                                vu: m.vu,
                            },
                            report,
                        );
                        Flow::Wait
                    }
                    Ok(Resolution::Trajectory(trajectory)) => {
                        report.resolution = Some(Resolution::Trajectory(trajectory.clone()));
                        self.install(trajectory, 0, false);
                        self.set_resolve(ResolveState::Trajectory(TrajectoryStage::Start), report);
                        Flow::Continue
                    }
                    Err(e) => {
                        warn!("Maneuver update failed: {}", e);
                        Flow::Wait
                    }
                }
            }
        }
    }

    fn fly_trajectory(
        &mut self,
        stage: TrajectoryStage,
        snapshot: &CycleSnapshot,
        report: &mut CycleReport,
    ) -> Flow {
        match stage {
            TrajectoryStage::Start => {
                self.send(VehicleCommand::SetMode { mode: FlightMode::Guided }, report);
                self.set_resolve(ResolveState::Trajectory(TrajectoryStage::Fix), report);
                Flow::Continue
            }
            TrajectoryStage::Fix => {
                let target = self
                    .resolution
                    .as_ref()
                    .and_then(|r| r.plan.point(self.resolution_wp))
                    .map(|p| p.position);
                match target {
                    Some(position) => {
                        self.send(VehicleCommand::SetPositionTarget { position }, report);
                        self.set_resolve(ResolveState::Trajectory(TrajectoryStage::Enroute), report);
                        Flow::Wait
                    }
                    None => {
                        self.set_resolve(ResolveState::Trajectory(TrajectoryStage::Stop), report);
                        Flow::Continue
                    }
                }
            }
            TrajectoryStage::Enroute => {
                let Some(point) = self
                    .resolution
                    .as_ref()
                    .and_then(|r| r.plan.point(self.resolution_wp))
                    .copied()
                else {
                    self.set_resolve(ResolveState::Trajectory(TrajectoryStage::Stop), report);
                    return Flow::Continue;
                };
                if !self.captured(&snapshot.ownship.position, &point.position) {
                    return Flow::Wait;
                }
                if self.params.wait_for_schedule && snapshot.time_s < point.time_s {
                    return Flow::Wait;
                }
                self.resolution_wp += 1;
                let remaining = self
                    .resolution
                    .as_ref()
                    .map_or(0, |r| r.plan.len().saturating_sub(self.resolution_wp));
                let next = if remaining > 0 {
                    TrajectoryStage::Fix
                } else {
                    TrajectoryStage::Stop
                };
                self.set_resolve(ResolveState::Trajectory(next), report);
                Flow::Continue
            }
            TrajectoryStage::Stop => {
                let finished = self.resolution.take();
                self.resolution_wp = 0;
                if self.intercepting {
                    self.intercepting = false;
                    info!("Back on mission at waypoint {}", self.mission_wp);
                    self.resume_mission(report);
                    return Flow::Wait;
                }
                // Keep the resume decision for the Resume state.
                self.resolution = finished;
                self.set_resolve(ResolveState::Resume, report);
                Flow::Continue
            }
        }
    }

    /// Compute the intercept back to the mission (or unreached goal) and fly
    /// it as a trajectory.
    fn resume(&mut self, snapshot: &CycleSnapshot, report: &mut CycleReport) -> Flow {
        self.detector.clear();
        self.last_conflicts.clear();

        let (resume, mission_index) = self
            .resolution
            .take()
            .map(|r| (r.resume, r.mission_index))
            .unwrap_or((ResumeTarget::Mission, self.mission_wp));
        let mission_len = self.mission.as_ref().map_or(0, Plan::len);
        let here = snapshot.ownship.position;

        let (target, next) = match resume {
            ResumeTarget::Hold => {
                info!("Holding after resolution, mission abandoned");
                self.mission_wp = mission_len;
                self.active_kind = None;
                self.set_resolve(ResolveState::Idle, report);
                return Flow::Wait;
            }
            ResumeTarget::Goal { position } => {
                info!("Retrying unreached resolution goal");
                (
                    position,
                    TrajectoryResolution {
                        plan: Plan::new("goal"),
                        resume: ResumeTarget::Mission,
                        mission_index,
                        candidates: Vec::new(),
                    },
                )
            }
            ResumeTarget::Mission => {
                self.mission_wp = mission_index.min(mission_len);
                let waypoint = self
                    .mission
                    .as_ref()
                    .and_then(|m| m.point(self.mission_wp))
                    .map(|p| p.position);
                let Some(position) = waypoint else {
                    self.active_kind = None;
                    self.set_resolve(ResolveState::Idle, report);
                    return Flow::Wait;
                };
                (
                    position,
                    TrajectoryResolution {
                        plan: Plan::new("intercept"),
                        resume: ResumeTarget::Mission,
                        mission_index: self.mission_wp,
                        candidates: Vec::new(),
                    },
                )
            }
        };

        let intercepting = matches!(resume, ResumeTarget::Mission);
        match intercept_plan(&here, &target, snapshot.time_s, self.params.resolution_speed_mps) {
            Ok(plan) => {
                self.install(TrajectoryResolution { plan, ..next }, 1, intercepting);
                self.set_resolve(ResolveState::Trajectory(TrajectoryStage::Start), report);
                Flow::Continue
            }
            Err(e) => {
                warn!("Intercept course failed: {}", e);
                self.resume_mission(report);
                Flow::Wait
            }
        }
    }

    fn resume_mission(&mut self, report: &mut CycleReport) {
        self.send(VehicleCommand::SetMode { mode: FlightMode::Auto }, report);
        self.send(
            VehicleCommand::SetMissionCurrent {
                index: self.mission_wp,
            },
            report,
        );
        self.detector.clear();
        self.last_conflicts.clear();
        self.active_kind = None;
        self.set_resolve(ResolveState::Idle, report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daa::SeparationBands;
    use crate::models::{OwnshipState, Velocity};
    use crate::spatial::LocalProjection;
    use nalgebra::Vector3;

    const ORIGIN_LAT: f64 = 37.1021;
    const ORIGIN_LON: f64 = -76.3872;

    #[derive(Debug, Default)]
    struct RecordingLink {
        sent: Vec<VehicleCommand>,
        reject_takeoff: bool,
    }

    impl CommandLink for RecordingLink {
        fn send(&mut self, command: VehicleCommand) -> Result<(), CommandError> {
            if self.reject_takeoff && matches!(command, VehicleCommand::Takeoff { .. }) {
                return Err(CommandError::Rejected(command));
            }
            self.sent.push(command);
            Ok(())
        }
    }

    fn at(x: f64, y: f64, z: f64) -> Position {
        LocalProjection::new(ORIGIN_LAT, ORIGIN_LON).inverse(&Vector3::new(x, y, z))
    }

    fn mission() -> Plan {
        Plan::timed_at_speed(
            "mission",
            &[at(0.0, 0.0, 30.0), at(100.0, 0.0, 30.0), at(200.0, 0.0, 30.0)],
            0.0,
            5.0,
        )
        .unwrap()
    }

    fn snapshot(time_s: f64, pos: Position) -> CycleSnapshot {
        CycleSnapshot::new(
            time_s,
            OwnshipState::new(pos, Velocity::new(90.0, 5.0, 0.0), time_s),
        )
    }

    fn machine(link: RecordingLink) -> FlightStateMachine<RecordingLink, SeparationBands> {
        FlightStateMachine::new(MonitorParams::default(), link, SeparationBands::default())
    }

    #[test]
    fn test_start_without_mission_stays_idle() {
        let mut fms = machine(RecordingLink::default());
        let mut snap = snapshot(0.0, at(0.0, 0.0, 0.0));
        snap.signal = Some(MissionSignal::Start { start_index: 1 });
        let report = fms.run_cycle(&snap);
        assert_eq!(report.phase, FlightPhase::Idle);
        assert!(report.commands.is_empty());
    }

    #[test]
    fn test_takeoff_retries_then_idles() {
        let mut fms = machine(RecordingLink {
            reject_takeoff: true,
            ..RecordingLink::default()
        });
        fms.load_mission(mission());
        let mut snap = snapshot(0.0, at(0.0, 0.0, 0.0));
        snap.signal = Some(MissionSignal::Start { start_index: 1 });

        let first = fms.run_cycle(&snap);
        assert_eq!(first.phase, FlightPhase::Takeoff);
        assert_eq!(first.failures.len(), 1);

        snap.signal = None;
        fms.run_cycle(&snap);
        let third = fms.run_cycle(&snap);
        assert_eq!(third.phase, FlightPhase::Idle);
    }

    #[test]
    fn test_takeoff_climb_cruise_land() {
        let mut fms = machine(RecordingLink::default());
        fms.load_mission(mission());

        let mut snap = snapshot(0.0, at(0.0, 0.0, 0.0));
        snap.signal = Some(MissionSignal::Start { start_index: 1 });
        let report = fms.run_cycle(&snap);
        assert_eq!(report.phase, FlightPhase::Climb);
        assert_eq!(
            report.commands,
            vec![
                VehicleCommand::SetMode { mode: FlightMode::Guided },
                VehicleCommand::Arm,
                VehicleCommand::Takeoff { altitude_m: 30.0 },
            ]
        );

        let report = fms.run_cycle(&snapshot(5.0, at(0.0, 0.0, 29.8)));
        assert_eq!(report.phase, FlightPhase::Cruise);
        assert_eq!(report.mission_index, 1);
        assert!(report
            .commands
            .contains(&VehicleCommand::SetMissionCurrent { index: 1 }));

        fms.run_cycle(&snapshot(25.0, at(100.0, 0.0, 30.0)));
        assert_eq!(fms.mission_index(), 2);
        let report = fms.run_cycle(&snapshot(45.0, at(200.0, 0.0, 30.0)));
        assert_eq!(report.phase, FlightPhase::Land);

        let report = fms.run_cycle(&snapshot(46.0, at(200.0, 0.0, 30.0)));
        assert!(report
            .commands
            .iter()
            .any(|c| matches!(c, VehicleCommand::Land { .. })));

        let mut landed = snapshot(60.0, at(200.0, 0.0, 0.0));
        landed.status.landed = true;
        assert_eq!(fms.run_cycle(&landed).phase, FlightPhase::Terminate);
    }

    #[test]
    fn test_stop_signal_lands() {
        let mut fms = machine(RecordingLink::default());
        fms.load_mission(mission());
        let mut snap = snapshot(0.0, at(0.0, 0.0, 0.0));
        snap.signal = Some(MissionSignal::Start { start_index: 1 });
        fms.run_cycle(&snap);

        let mut stop = snapshot(2.0, at(0.0, 0.0, 10.0));
        stop.signal = Some(MissionSignal::Stop);
        let report = fms.run_cycle(&stop);
        assert_eq!(report.phase, FlightPhase::Land);
        assert!(report
            .commands
            .iter()
            .any(|c| matches!(c, VehicleCommand::Land { .. })));
    }
}
