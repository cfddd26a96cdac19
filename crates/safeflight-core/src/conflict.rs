//! Conflict detection for geofences, traffic and flight-plan deviation.
//!
//! The detector keeps one entry per (kind, source). Each `check_*` call
//! rebuilds the entries of its own kind from the current snapshot; only the
//! hysteresis state (deviation latch, traffic hold timers) carries over
//! between cycles.

use crate::daa::DaaCapability;
use crate::geofence::{FenceStatus, FenceType, GeoFence};
use crate::models::{OwnshipState, Plan, TrafficTrack};
use crate::params::MonitorParams;
use crate::spatial::cross_track_offsets;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Conflict categories, ordered by resolution priority (lowest first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictKind {
    FlightPlanDeviation,
    KeepOut,
    KeepIn,
    Traffic,
}

/// What raised a conflict; together with the kind it forms the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConflictSource {
    Fence(u32),
    Traffic(String),
    Mission,
}

/// A detected conflict with the data its resolution needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Conflict {
    KeepIn {
        fence_id: u32,
        status: FenceStatus,
    },
    KeepOut {
        fence_id: u32,
        status: FenceStatus,
    },
    Traffic {
        traffic_id: String,
        time_to_violation_s: Option<f64>,
        last_asserted_s: f64,
    },
    FlightPlanDeviation {
        /// Index of the waypoint the leg ends at
        leg_end: usize,
        /// Positive right of track
        cross_track_m: f64,
        along_track_m: f64,
    },
}

impl Conflict {
    pub fn kind(&self) -> ConflictKind {
        match self {
            Conflict::KeepIn { .. } => ConflictKind::KeepIn,
            Conflict::KeepOut { .. } => ConflictKind::KeepOut,
            Conflict::Traffic { .. } => ConflictKind::Traffic,
            Conflict::FlightPlanDeviation { .. } => ConflictKind::FlightPlanDeviation,
        }
    }

    pub fn source(&self) -> ConflictSource {
        match self {
            Conflict::KeepIn { fence_id, .. } | Conflict::KeepOut { fence_id, .. } => {
                ConflictSource::Fence(*fence_id)
            }
            Conflict::Traffic { traffic_id, .. } => ConflictSource::Traffic(traffic_id.clone()),
            Conflict::FlightPlanDeviation { .. } => ConflictSource::Mission,
        }
    }

    /// Higher wins.
    pub fn priority(&self) -> u8 {
        match self.kind() {
            ConflictKind::Traffic => 4,
            ConflictKind::KeepIn => 3,
            ConflictKind::KeepOut => 2,
            ConflictKind::FlightPlanDeviation => 1,
        }
    }
}

/// Real-time conflict aggregation for the ownship.
#[derive(Debug, Clone)]
pub struct ConflictDetector {
    /// Allowed cross-track deviation (meters)
    pub allowed_deviation_m: f64,
    /// Deviation clears below allowed * ratio
    pub deviation_clear_ratio: f64,
    /// Seconds a traffic conflict outlives its last assertion
    pub traffic_hold_s: f64,

    conflicts: BTreeMap<(ConflictKind, ConflictSource), Conflict>,
    deviation_latched: bool,
    /// Traffic id -> (last assertion time, last time-to-violation)
    traffic_asserted: HashMap<String, (f64, Option<f64>)>,
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::new(&MonitorParams::default())
    }
}

impl ConflictDetector {
    pub fn new(params: &MonitorParams) -> Self {
        Self {
            allowed_deviation_m: params.xtrk_dev_m,
            deviation_clear_ratio: params.xtrk_clear_ratio,
            traffic_hold_s: params.traffic_hold_s,
            conflicts: BTreeMap::new(),
            deviation_latched: false,
            traffic_asserted: HashMap::new(),
        }
    }

    /// Insert or replace the entry for the conflict's (kind, source).
    pub fn raise(&mut self, conflict: Conflict) {
        self.conflicts
            .insert((conflict.kind(), conflict.source()), conflict);
    }

    fn drop_kind(&mut self, kind: ConflictKind) {
        self.conflicts.retain(|(k, _), _| *k != kind);
    }

    /// Run `check_violation` on every fence and rebuild the fence conflicts.
    pub fn check_geofences(
        &mut self,
        fences: &mut [GeoFence],
        ownship: &OwnshipState,
        plan_elapsed_s: f64,
        active_plan: Option<&Plan>,
    ) -> usize {
        self.drop_kind(ConflictKind::KeepIn);
        self.drop_kind(ConflictKind::KeepOut);

        let mut raised = 0;
        for fence in fences.iter_mut() {
            let status = fence.check_violation(ownship, plan_elapsed_s, active_plan);
            if !status.conflict {
                continue;
            }
            let fence_id = fence.id();
            let conflict = match fence.fence_type() {
                FenceType::KeepIn => Conflict::KeepIn { fence_id, status },
                FenceType::KeepOut => Conflict::KeepOut { fence_id, status },
            };
            self.raise(conflict);
            raised += 1;
        }
        raised
    }

    /// Cross-track check against the mission leg ending at `next_wp`.
    ///
    /// Returns the signed cross-track deviation when a leg is active.
    pub fn check_flight_plan_deviation(
        &mut self,
        ownship: &OwnshipState,
        mission: Option<&Plan>,
        next_wp: usize,
    ) -> Option<f64> {
        self.drop_kind(ConflictKind::FlightPlanDeviation);

        let leg = mission.and_then(|plan| {
            if next_wp == 0 {
                return None;
            }
            Some((plan.point(next_wp - 1)?, plan.point(next_wp)?))
        });
        let Some((prev, next)) = leg else {
            self.deviation_latched = false;
            return None;
        };

        let (cross_track_m, along_track_m) =
            cross_track_offsets(&prev.position, &next.position, &ownship.position);

        let magnitude = cross_track_m.abs();
        if magnitude > self.allowed_deviation_m {
            self.deviation_latched = true;
        } else if magnitude < self.allowed_deviation_m * self.deviation_clear_ratio {
            self.deviation_latched = false;
        }

        if self.deviation_latched {
            self.raise(Conflict::FlightPlanDeviation {
                leg_end: next_wp,
                cross_track_m,
                along_track_m,
            });
        }
        Some(cross_track_m)
    }

    /// Assert traffic conflicts from DAA alerts and apply the hold timer.
    pub fn check_traffic(
        &mut self,
        ownship: &OwnshipState,
        traffic: &[TrafficTrack],
        daa: &dyn DaaCapability,
        now_s: f64,
    ) -> usize {
        self.drop_kind(ConflictKind::Traffic);

        if !traffic.is_empty() {
            let report = daa.evaluate(ownship, traffic);
            let lookahead = daa.lookahead_s();
            let mut any_asserted = false;
            for alert in &report.alerts {
                if let Some(ttv) = alert.time_to_violation_s {
                    if (0.0..=lookahead).contains(&ttv) {
                        self.traffic_asserted
                            .insert(alert.traffic_id.clone(), (now_s, Some(ttv)));
                        any_asserted = true;
                    }
                }
            }

            if !any_asserted && report.is_conflict_heading(ownship.velocity.track_deg) {
                let nearest = traffic.iter().min_by(|a, b| {
                    ownship
                        .position
                        .distance_3d(&a.position)
                        .total_cmp(&ownship.position.distance_3d(&b.position))
                });
                if let Some(track) = nearest {
                    self.traffic_asserted.insert(track.id.clone(), (now_s, None));
                }
            }
        }

        let hold = self.traffic_hold_s;
        self.traffic_asserted.retain(|id, (last, _)| {
            let keep = now_s - *last < hold;
            if !keep {
                debug!("Traffic conflict with {} released after hold", id);
            }
            keep
        });

        let held: Vec<Conflict> = self
            .traffic_asserted
            .iter()
            .map(|(id, (last, ttv))| Conflict::Traffic {
                traffic_id: id.clone(),
                time_to_violation_s: *ttv,
                last_asserted_s: *last,
            })
            .collect();
        let count = held.len();
        for conflict in held {
            self.raise(conflict);
        }
        count
    }

    /// Run every check and return the aggregate size.
    #[allow(clippy::too_many_arguments)]
    pub fn monitor(
        &mut self,
        fences: &mut [GeoFence],
        ownship: &OwnshipState,
        plan_elapsed_s: f64,
        active_plan: Option<&Plan>,
        mission: Option<&Plan>,
        next_mission_wp: usize,
        traffic: &[TrafficTrack],
        daa: &dyn DaaCapability,
    ) -> usize {
        self.check_geofences(fences, ownship, plan_elapsed_s, active_plan);
        self.check_flight_plan_deviation(ownship, mission, next_mission_wp);
        self.check_traffic(ownship, traffic, daa, ownship.time_s);
        self.size()
    }

    pub fn size(&self) -> usize {
        self.conflicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Drop all entries. Traffic hold timers survive.
    pub fn clear(&mut self) {
        self.conflicts.clear();
        self.deviation_latched = false;
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts.values()
    }

    /// Dedup keys of the active conflicts, in priority order (lowest first).
    pub fn keys(&self) -> Vec<(ConflictKind, ConflictSource)> {
        self.conflicts.keys().cloned().collect()
    }

    pub fn has(&self, kind: ConflictKind) -> bool {
        self.conflicts.keys().any(|(k, _)| *k == kind)
    }

    pub fn of_kind(&self, kind: ConflictKind) -> impl Iterator<Item = &Conflict> {
        self.conflicts
            .iter()
            .filter(move |((k, _), _)| *k == kind)
            .map(|(_, c)| c)
    }

    /// Highest-priority conflict; ties go to the lowest source key.
    pub fn highest_priority(&self) -> Option<&Conflict> {
        let top = self.conflicts.keys().map(|(k, _)| *k).max()?;
        self.of_kind(top).next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daa::SeparationBands;
    use crate::models::{Position, Velocity};

    fn mission_north() -> Plan {
        let mut plan = Plan::new("mission");
        plan.add(Position::new(0.0, 0.0, 30.0), 0.0).unwrap();
        plan.add(Position::new(0.01, 0.0, 30.0), 200.0).unwrap();
        plan
    }

    fn ownship_at(lat: f64, lon: f64, time_s: f64) -> OwnshipState {
        OwnshipState::new(
            Position::new(lat, lon, 30.0),
            Velocity::new(0.0, 5.0, 0.0),
            time_s,
        )
    }

    #[test]
    fn test_raise_deduplicates_by_kind_and_source() {
        let mut detector = ConflictDetector::default();
        for ttv in [5.0, 4.0, 3.0] {
            detector.raise(Conflict::Traffic {
                traffic_id: "a".into(),
                time_to_violation_s: Some(ttv),
                last_asserted_s: 0.0,
            });
        }
        assert_eq!(detector.size(), 1);
        let Some(Conflict::Traffic {
            time_to_violation_s,
            ..
        }) = detector.conflicts().next()
        else {
            panic!("expected traffic conflict");
        };
        assert_eq!(*time_to_violation_s, Some(3.0));
    }

    #[test]
    fn test_deviation_sign_and_hysteresis() {
        let mut detector = ConflictDetector::default();
        let plan = mission_north();
        // ~15.5 m east (right of a northbound track).
        let right = ownship_at(0.005, 0.00014, 0.0);
        let dev = detector
            .check_flight_plan_deviation(&right, Some(&plan), 1)
            .unwrap();
        assert!(dev > 10.0);
        assert!(detector.has(ConflictKind::FlightPlanDeviation));

        // ~5.5 m: inside the allowance but above the clear threshold.
        let between = ownship_at(0.005, 0.00005, 1.0);
        detector.check_flight_plan_deviation(&between, Some(&plan), 1);
        assert!(detector.has(ConflictKind::FlightPlanDeviation));

        // ~2.2 m: below allowed / 3, clears.
        let close = ownship_at(0.005, 0.00002, 2.0);
        detector.check_flight_plan_deviation(&close, Some(&plan), 1);
        assert!(!detector.has(ConflictKind::FlightPlanDeviation));

        let left = ownship_at(0.005, -0.00014, 3.0);
        let dev = detector
            .check_flight_plan_deviation(&left, Some(&plan), 1)
            .unwrap();
        assert!(dev < -10.0);
    }

    #[test]
    fn test_no_active_leg_means_no_deviation_conflict() {
        let mut detector = ConflictDetector::default();
        let far = ownship_at(0.005, 0.01, 0.0);
        assert!(detector
            .check_flight_plan_deviation(&far, None, 1)
            .is_none());
        assert!(detector
            .check_flight_plan_deviation(&far, Some(&mission_north()), 0)
            .is_none());
        assert_eq!(detector.size(), 0);
    }

    #[test]
    fn test_traffic_hold_outlives_disappearing_track() {
        let mut detector = ConflictDetector::default();
        let daa = SeparationBands::default();
        let own = ownship_at(0.0, 0.0, 0.0);
        let intruder = TrafficTrack::new(
            "intruder",
            own.position.offset(120.0, 0.0),
            Velocity::new(180.0, 5.0, 0.0),
        );

        assert_eq!(detector.check_traffic(&own, &[intruder], &daa, 0.0), 1);
        // Track disappears: conflict persists until the hold expires.
        assert_eq!(detector.check_traffic(&own, &[], &daa, 5.0), 1);
        assert_eq!(detector.check_traffic(&own, &[], &daa, 9.9), 1);
        assert_eq!(detector.check_traffic(&own, &[], &daa, 10.0), 0);
    }

    #[test]
    fn test_highest_priority_prefers_traffic() {
        let mut detector = ConflictDetector::default();
        detector.raise(Conflict::FlightPlanDeviation {
            leg_end: 1,
            cross_track_m: 12.0,
            along_track_m: 40.0,
        });
        detector.raise(Conflict::KeepOut {
            fence_id: 2,
            status: FenceStatus::default(),
        });
        assert_eq!(
            detector.highest_priority().map(Conflict::kind),
            Some(ConflictKind::KeepOut)
        );
        detector.raise(Conflict::Traffic {
            traffic_id: "t".into(),
            time_to_violation_s: None,
            last_asserted_s: 0.0,
        });
        assert_eq!(
            detector.highest_priority().map(Conflict::kind),
            Some(ConflictKind::Traffic)
        );
        detector.clear();
        assert_eq!(detector.size(), 0);
    }
}
