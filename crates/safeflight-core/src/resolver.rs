//! Conflict resolution.
//!
//! Each conflict kind maps to either a one-cycle maneuver (heading plus
//! velocity) or a replacement trajectory flown waypoint by waypoint.

use crate::conflict::Conflict;
use crate::daa::DaaCapability;
use crate::error::PlannerError;
use crate::geofence::{FenceStatus, FenceType, GeoFence};
use crate::grid_planner::{go_above_plan, GridPlanner, GridPlannerConfig};
use crate::models::{OwnshipState, Plan, Position, TrafficTrack};
use crate::params::{KeepOutStrategy, MonitorParams, TrafficStrategy};
use crate::rrt::{RrtConfig, SamplingPlanner};
use crate::spatial::{angle_diff_deg, cross_track_offsets, normalize_deg, point_on_leg, track_of};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// Planner starts closer than this to the vehicle are replaced by its
/// position (meters).
const START_MERGE_M: f64 = 0.5;

/// Velocity command valid for one control cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Maneuver {
    pub heading_deg: f64,
    pub vn: f64,
    pub ve: f64,
    pub vu: f64,
}

impl Maneuver {
    pub fn along(heading_deg: f64, speed_mps: f64) -> Self {
        let rad = heading_deg.to_radians();
        Self {
            heading_deg: normalize_deg(heading_deg),
            vn: speed_mps * rad.cos(),
            ve: speed_mps * rad.sin(),
            vu: 0.0,
        }
    }

    pub fn hover(heading_deg: f64) -> Self {
        Self {
            heading_deg: normalize_deg(heading_deg),
            vn: 0.0,
            ve: 0.0,
            vu: 0.0,
        }
    }

    pub fn speed_h(&self) -> f64 {
        self.vn.hypot(self.ve)
    }
}

/// What the FMS does after a trajectory resolution is flown.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResumeTarget {
    /// Rejoin the mission at `mission_index`.
    Mission,
    /// Retry an unreached planner goal first.
    Goal { position: Position },
    /// Stay at the end of the trajectory; the mission is abandoned.
    Hold,
}

/// Length of one keep-out candidate path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateLength {
    pub name: String,
    pub length_m: f64,
    pub feasible: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryResolution {
    pub plan: Plan,
    pub resume: ResumeTarget,
    /// Mission waypoint to rejoin after the trajectory
    pub mission_index: usize,
    /// Keep-out candidates that were compared
    pub candidates: Vec<CandidateLength>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Resolution {
    Maneuver(Maneuver),
    Trajectory(TrajectoryResolution),
}

/// Detector-side state a resolution is computed from.
#[derive(Clone, Copy)]
pub struct ResolutionContext<'a> {
    pub ownship: &'a OwnshipState,
    pub mission: &'a Plan,
    /// Mission waypoint the vehicle is flying toward
    pub next_mission_wp: usize,
    pub plan_elapsed_s: f64,
    pub fences: &'a [GeoFence],
    pub traffic: &'a [TrafficTrack],
    pub daa: &'a dyn DaaCapability,
}

impl ResolutionContext<'_> {
    fn fence(&self, fence_id: u32) -> Option<&GeoFence> {
        self.fences.iter().find(|f| f.id() == fence_id)
    }

    fn active_leg(&self) -> Option<(Position, Position)> {
        if self.next_mission_wp == 0 {
            return None;
        }
        let prev = self.mission.point(self.next_mission_wp - 1)?;
        let next = self.mission.point(self.next_mission_wp)?;
        Some((prev.position, next.position))
    }
}

/// True when no leg of `plan` crosses or ends in a forbidden region.
pub fn plan_is_feasible(plan: &Plan, fences: &[GeoFence]) -> bool {
    plan.points().windows(2).all(|leg| {
        fences
            .iter()
            .all(|f| f.check_waypoint_feasibility(&leg[0].position, &leg[1].position))
    })
}

/// Direct two-point course used to rejoin the mission.
pub fn intercept_plan(
    from: &Position,
    to: &Position,
    start_time_s: f64,
    speed_mps: f64,
) -> Result<Plan, PlannerError> {
    Ok(Plan::timed_at_speed("intercept", &[*from, *to], start_time_s, speed_mps)?)
}

/// Owns the planners so the sampling RNG advances across invocations.
#[derive(Debug, Clone)]
pub struct Resolver {
    params: MonitorParams,
    grid: GridPlanner,
    sampler: SamplingPlanner,
}

impl Resolver {
    pub fn new(params: &MonitorParams) -> Self {
        Self {
            params: params.clone(),
            grid: GridPlanner::new(GridPlannerConfig::from_params(params)),
            sampler: SamplingPlanner::new(RrtConfig::from_params(params)),
        }
    }

    pub fn resolve(
        &mut self,
        conflict: &Conflict,
        ctx: &ResolutionContext<'_>,
    ) -> Result<Resolution, PlannerError> {
        match conflict {
            Conflict::KeepIn { fence_id, status } => self
                .resolve_keep_in(*fence_id, status, ctx)
                .map(Resolution::Trajectory),
            Conflict::KeepOut { fence_id, status } => self
                .resolve_keep_out(*fence_id, status, ctx)
                .map(Resolution::Trajectory),
            Conflict::Traffic { .. } => match self.params.traffic_strategy {
                TrafficStrategy::Maneuver => Ok(Resolution::Maneuver(self.resolve_traffic(ctx))),
                TrafficStrategy::Sampling => self
                    .resolve_traffic_sampling(ctx)
                    .map(Resolution::Trajectory),
            },
            Conflict::FlightPlanDeviation { cross_track_m, .. } => {
                self.resolve_deviation(*cross_track_m, ctx)
            }
        }
    }

    // ========== KEEP-IN ==========

    /// Fly to the recovery point, then rejoin at the first mission waypoint
    /// reachable from it without leaving the fence.
    pub fn resolve_keep_in(
        &self,
        fence_id: u32,
        status: &FenceStatus,
        ctx: &ResolutionContext<'_>,
    ) -> Result<TrajectoryResolution, PlannerError> {
        let now = ctx.ownship.time_s;
        let here = ctx.ownship.position;
        let Some(fence) = ctx.fence(fence_id).filter(|_| !status.degenerate) else {
            error!("Keep-in fence {} unusable, holding and landing", fence_id);
            return Ok(TrajectoryResolution {
                plan: Plan::timed_at_speed("keep-in-hold", &[here], now, self.params.resolution_speed_mps)?,
                resume: ResumeTarget::Hold,
                mission_index: ctx.mission.len(),
                candidates: Vec::new(),
            });
        };

        let recovery = status.recovery_point.unwrap_or(here);
        let arrival = now + (here.distance_3d(&recovery) / self.params.resolution_speed_mps).max(1e-3);
        let mut plan = Plan::new("keep-in");
        plan.add(recovery, arrival)?;

        let rejoin = (ctx.next_mission_wp..ctx.mission.len()).find(|&idx| {
            ctx.mission
                .point(idx)
                .map(|wp| fence.check_waypoint_feasibility(&recovery, &wp.position))
                .unwrap_or(false)
        });

        let (resume, mission_index) = match rejoin {
            Some(idx) => {
                if idx != ctx.next_mission_wp {
                    info!(
                        "Keep-in {}: skipping mission waypoints {}..{}",
                        fence_id, ctx.next_mission_wp, idx
                    );
                }
                (ResumeTarget::Mission, idx)
            }
            None => {
                warn!(
                    "Keep-in {}: no feasible mission waypoint from recovery point, holding",
                    fence_id
                );
                (ResumeTarget::Hold, ctx.mission.len())
            }
        };

        Ok(TrajectoryResolution {
            plan,
            resume,
            mission_index,
            candidates: Vec::new(),
        })
    }

    // ========== KEEP-OUT ==========

    /// Replace the mission segment around the fence's entry/exit window with
    /// the shortest feasible go-around, sampled or go-above path.
    pub fn resolve_keep_out(
        &mut self,
        fence_id: u32,
        status: &FenceStatus,
        ctx: &ResolutionContext<'_>,
    ) -> Result<TrajectoryResolution, PlannerError> {
        let params = &self.params;
        let now = ctx.ownship.time_s;
        let here = ctx.ownship.position;
        let speed = params.resolution_speed_mps;

        let Some(fence) = ctx.fence(fence_id).filter(|_| !status.degenerate) else {
            error!("Keep-out fence {} unusable, continuing mission", fence_id);
            return Ok(TrajectoryResolution {
                plan: Plan::timed_at_speed("keep-out-trivial", &[here], now, speed)?,
                resume: ResumeTarget::Mission,
                mission_index: ctx.next_mission_wp,
                candidates: Vec::new(),
            });
        };

        let lookahead = params.lookahead_s;
        let elapsed = ctx.plan_elapsed_s;
        let plan_end = ctx.mission.last_time().unwrap_or(elapsed).max(elapsed);
        let (raw_start, raw_end) = match (status.entry_time, status.exit_time) {
            (Some(entry), Some(exit)) => (entry - lookahead, exit + lookahead),
            _ => (elapsed, elapsed + 2.0 * lookahead),
        };
        let t0 = raw_start.clamp(elapsed, plan_end);
        let t1 = raw_end.clamp(t0, plan_end);

        let window = ctx.mission.cut_down(t0, t1)?;
        debug!(
            "Keep-out {}: replacing {:.1} m of mission between t={:.1}s and t={:.1}s",
            fence_id,
            window.horizontal_length_m(),
            t0,
            t1
        );
        let (Some(window_start), Some(window_end)) = (window.point(0), window.points().last()) else {
            return Err(PlannerError::NoCandidate("mission plan is empty".to_string()));
        };
        let start = if status.violation {
            status.recovery_point.unwrap_or(here)
        } else if t0 > elapsed {
            window_start.position
        } else {
            here
        };
        let goal = window_end.position;
        let mission_index = ctx
            .mission
            .segment_at(t1)
            .map(|leg| leg + 1)
            .unwrap_or(ctx.mission.len())
            .min(ctx.mission.len());

        let mut candidates: Vec<(String, Plan)> = Vec::new();
        let mut partial: Option<Plan> = None;

        let (primary, fallback) = match params.keep_out_strategy {
            KeepOutStrategy::Grid => (vec![Planner::Grid], Some(Planner::Sampling)),
            KeepOutStrategy::Sampling => (vec![Planner::Sampling], Some(Planner::Grid)),
            KeepOutStrategy::Both => (vec![Planner::Grid, Planner::Sampling], None),
        };
        let mut any_lateral = false;
        for planner in primary {
            if let Some(plan) = self.run_planner(planner, ctx, &start, &goal, &mut partial) {
                candidates.push((planner.label().to_string(), plan));
                any_lateral = true;
            }
        }
        if !any_lateral {
            if let Some(planner) = fallback {
                debug!("Keep-out {}: primary planner failed, trying {}", fence_id, planner.label());
                if let Some(plan) = self.run_planner(planner, ctx, &start, &goal, &mut partial) {
                    candidates.push((planner.label().to_string(), plan));
                }
            }
        }

        let params = &self.params;
        let ceiling_limit = ctx
            .fences
            .iter()
            .filter(|f| f.fence_type() == FenceType::KeepIn && f.is_finalized())
            .map(GeoFence::ceiling_m)
            .fold(params.max_ceiling_m, f64::min);
        let transit_alt = fence.ceiling_m() + params.go_above_margin_m;
        if transit_alt <= ceiling_limit {
            match go_above_plan(&start, &goal, transit_alt, now, speed) {
                Ok(plan) => candidates.push(("go-above".to_string(), plan)),
                Err(e) => warn!("Keep-out {}: go-above profile failed: {}", fence_id, e),
            }
        } else {
            debug!(
                "Keep-out {}: go-above excluded ({:.1} m above limit {:.1} m)",
                fence_id, transit_alt, ceiling_limit
            );
        }

        let lengths: Vec<CandidateLength> = candidates
            .iter()
            .map(|(name, plan)| CandidateLength {
                name: name.clone(),
                length_m: plan.path_length_m(),
                feasible: plan_is_feasible(plan, ctx.fences),
            })
            .collect();
        for c in &lengths {
            debug!(
                "Keep-out {} candidate {}: {:.1} m (feasible: {})",
                fence_id, c.name, c.length_m, c.feasible
            );
        }

        let best = candidates
            .into_iter()
            .zip(lengths.iter())
            .filter(|(_, len)| len.feasible)
            .min_by(|(_, a), (_, b)| a.length_m.total_cmp(&b.length_m))
            .map(|((name, plan), _)| (name, plan));

        if let Some((name, mut plan)) = best {
            info!("Keep-out {} resolved with {} path", fence_id, name);
            prepend_current(&mut plan, &here, status.violation, now, speed)?;
            return Ok(TrajectoryResolution {
                plan,
                resume: ResumeTarget::Mission,
                mission_index,
                candidates: lengths,
            });
        }

        let mut plan = match partial {
            Some(plan) => plan,
            None => {
                let start_state = OwnshipState::new(start, ctx.ownship.velocity, now);
                let daa = (!ctx.traffic.is_empty()).then_some(ctx.daa);
                self.sampler
                    .search(ctx.fences, ctx.traffic, daa, &start_state, &goal)
                    .plan(now, speed)?
            }
        };
        warn!(
            "Keep-out {}: no path reached the goal, flying partial path of {} waypoints",
            fence_id,
            plan.len()
        );
        prepend_current(&mut plan, &here, status.violation, now, speed)?;
        Ok(TrajectoryResolution {
            plan,
            resume: ResumeTarget::Goal { position: goal },
            mission_index,
            candidates: lengths,
        })
    }

    fn run_planner(
        &mut self,
        planner: Planner,
        ctx: &ResolutionContext<'_>,
        start: &Position,
        goal: &Position,
        partial: &mut Option<Plan>,
    ) -> Option<Plan> {
        let now = ctx.ownship.time_s;
        let speed = self.params.resolution_speed_mps;
        match planner {
            Planner::Grid => match self.grid.plan_around(ctx.fences, start, goal, now) {
                Ok(result) => Some(result.plan),
                Err(e) => {
                    warn!("Grid planner failed: {}", e);
                    None
                }
            },
            Planner::Sampling => {
                let start_state = OwnshipState::new(*start, ctx.ownship.velocity, now);
                let daa = (!ctx.traffic.is_empty()).then_some(ctx.daa);
                let tree = self
                    .sampler
                    .search(ctx.fences, ctx.traffic, daa, &start_state, goal);
                let plan = match tree.plan(now, speed) {
                    Ok(plan) => plan,
                    Err(e) => {
                        warn!("Sampling planner produced no plan: {}", e);
                        return None;
                    }
                };
                if tree.goal_reached() {
                    Some(plan)
                } else {
                    *partial = Some(plan);
                    None
                }
            }
        }
    }

    // ========== TRAFFIC ==========

    /// Heading-band maneuver with a drift back toward the mission leg.
    pub fn resolve_traffic(&self, ctx: &ResolutionContext<'_>) -> Maneuver {
        let own = ctx.ownship;
        let current = own.velocity.track_deg;
        let speed = self.params.resolution_speed_mps;
        let report = ctx.daa.evaluate(own, ctx.traffic);

        let Some(preferred) = report.preferred_heading_deg else {
            warn!("No conflict-free heading available, hovering");
            return Maneuver::hover(current);
        };
        let pad = self.params.traffic_heading_pad_deg;
        let mut heading = normalize_deg(if report.preferred_right {
            preferred + pad
        } else {
            preferred - pad
        });
        if report.is_conflict_heading(heading) {
            heading = preferred;
        }

        if let Some((prev, next)) = ctx.active_leg() {
            let (_, along) = cross_track_offsets(&prev, &next, &own.position);
            let lead = speed * self.params.lookahead_s;
            let leg_len = prev.distance_h(&next);
            let rejoin = point_on_leg(&prev, &next, (along + lead).clamp(0.0, leg_len));
            let direct = own.position.track_to(&rejoin);

            if !report.is_conflict_heading(direct) && !report.turn_crosses_conflict(current, direct) {
                return Maneuver::along(direct, speed);
            }

            let drift = angle_diff_deg(direct, heading).clamp(-pad, pad);
            let drifted = normalize_deg(heading + drift);
            if !report.is_conflict_heading(drifted) && !report.turn_crosses_conflict(current, drifted) {
                heading = drifted;
            }
        }

        Maneuver::along(heading, speed)
    }

    /// Traffic-aware sampling path to the next mission waypoint. An
    /// unreached waypoint is retried after the partial path is flown.
    pub fn resolve_traffic_sampling(
        &mut self,
        ctx: &ResolutionContext<'_>,
    ) -> Result<TrajectoryResolution, PlannerError> {
        let now = ctx.ownship.time_s;
        let speed = self.params.resolution_speed_mps;
        let goal = ctx
            .mission
            .point(ctx.next_mission_wp)
            .map(|wp| wp.position)
            .ok_or_else(|| PlannerError::NoCandidate("no mission waypoint ahead".to_string()))?;

        let report = ctx.daa.evaluate(ctx.ownship, ctx.traffic);
        match report.earliest_violation() {
            Some(t) => info!(
                "Traffic: separation lost in {:.1}s, sampling a path to waypoint {}",
                t, ctx.next_mission_wp
            ),
            None => info!(
                "Traffic: sampling a path to waypoint {}",
                ctx.next_mission_wp
            ),
        }

        let tree = self
            .sampler
            .search(ctx.fences, ctx.traffic, Some(ctx.daa), ctx.ownship, &goal);
        let plan = tree.plan(now, speed)?;
        let mission_index = (ctx.next_mission_wp + 1).min(ctx.mission.len());
        let resume = if tree.goal_reached() {
            ResumeTarget::Mission
        } else {
            warn!(
                "Traffic: waypoint {} not reached, closest {:.1} m",
                ctx.next_mission_wp,
                tree.closest_distance_m()
            );
            ResumeTarget::Goal { position: goal }
        };
        Ok(TrajectoryResolution {
            plan,
            resume,
            mission_index,
            candidates: Vec::new(),
        })
    }

    // ========== FLIGHT PLAN DEVIATION ==========

    /// Proportional cross-track correction, or a direct return to the leg
    /// when the deviation is more than twice the allowance.
    pub fn resolve_deviation(
        &self,
        cross_track_m: f64,
        ctx: &ResolutionContext<'_>,
    ) -> Result<Resolution, PlannerError> {
        let Some((prev, next)) = ctx.active_leg() else {
            return Err(PlannerError::NoCandidate("no active mission leg".to_string()));
        };
        let speed = self.params.resolution_speed_mps;
        let own = &ctx.ownship.position;

        if cross_track_m.abs() <= 2.0 * self.params.xtrk_dev_m {
            let vs = (-self.params.xtrk_gain * cross_track_m).clamp(-speed, speed);
            let vf = (speed * speed - vs * vs).max(0.0).sqrt();
            let track = prev.track_to(&next).to_radians();
            let vn = vf * track.cos() - vs * track.sin();
            let ve = vf * track.sin() + vs * track.cos();
            return Ok(Resolution::Maneuver(Maneuver {
                heading_deg: track_of(ve, vn),
                vn,
                ve,
                vu: 0.0,
            }));
        }

        let (_, along) = cross_track_offsets(&prev, &next, own);
        let closest = point_on_leg(&prev, &next, along.clamp(0.0, prev.distance_h(&next)));
        info!(
            "Deviation {:.1} m exceeds correction range, returning to leg",
            cross_track_m
        );
        Ok(Resolution::Trajectory(TrajectoryResolution {
            plan: Plan::timed_at_speed("return-to-leg", &[*own, closest], ctx.ownship.time_s, speed)?,
            resume: ResumeTarget::Mission,
            mission_index: ctx.next_mission_wp,
            candidates: Vec::new(),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Planner {
    Grid,
    Sampling,
}

impl Planner {
    fn label(self) -> &'static str {
        match self {
            Planner::Grid => "go-around",
            Planner::Sampling => "sampling",
        }
    }
}

/// Start the plan from the recovery point when the vehicle is inside the
/// fence; otherwise fly from the current position to the planner's start.
fn prepend_current(
    plan: &mut Plan,
    here: &Position,
    in_violation: bool,
    now: f64,
    speed_mps: f64,
) -> Result<(), PlannerError> {
    let Some(first) = plan.point(0).map(|p| p.position) else {
        return Ok(());
    };
    if in_violation {
        return Ok(());
    }
    let skip = usize::from(first.distance_3d(here) < START_MERGE_M);
    let positions: Vec<Position> = std::iter::once(*here)
        .chain(plan.points().iter().skip(skip).map(|p| p.position))
        .collect();
    *plan = Plan::timed_at_speed(plan.id.clone(), &positions, now, speed_mps)?;
    Ok(())
}
