//! Detect-and-avoid interface.
//!
//! The flight manager consumes separation alerts and heading bands through
//! [`DaaCapability`]. [`SeparationBands`] is a self-contained reference
//! implementation (cylindrical separation, constant-velocity extrapolation).

use crate::models::{OwnshipState, TrafficTrack};
use crate::params::MonitorParams;
use crate::spatial::{angle_diff_deg, normalize_deg, LocalProjection};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Classification of a heading band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandRegion {
    Clear,
    Caution,
    Conflict,
}

/// Contiguous heading interval [low, high] in degrees, low <= high.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadingBand {
    pub low_deg: f64,
    pub high_deg: f64,
    pub region: BandRegion,
}

impl HeadingBand {
    pub fn contains(&self, heading_deg: f64) -> bool {
        let h = normalize_deg(heading_deg);
        h >= self.low_deg && h <= self.high_deg
    }
}

/// Per-intruder alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficAlert {
    pub traffic_id: String,
    /// Seconds until loss of separation on current velocities
    pub time_to_violation_s: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaaReport {
    pub alerts: Vec<TrafficAlert>,
    pub bands: Vec<HeadingBand>,
    /// Nearest non-conflict heading to the current track
    pub preferred_heading_deg: Option<f64>,
    /// True when the preferred heading is reached by turning right
    pub preferred_right: bool,
    pub lookahead_s: f64,
}

impl DaaReport {
    pub fn region_of(&self, heading_deg: f64) -> BandRegion {
        self.bands
            .iter()
            .filter(|band| band.contains(heading_deg))
            .map(|band| band.region)
            .max()
            .unwrap_or(BandRegion::Clear)
    }

    pub fn is_conflict_heading(&self, heading_deg: f64) -> bool {
        self.region_of(heading_deg) == BandRegion::Conflict
    }

    /// Earliest loss of separation within the lookahead, if any.
    pub fn earliest_violation(&self) -> Option<f64> {
        self.alerts
            .iter()
            .filter_map(|a| a.time_to_violation_s)
            .filter(|t| *t <= self.lookahead_s)
            .min_by(f64::total_cmp)
    }

    /// True when turning from `old_heading` to `new_heading` sweeps a
    /// conflict band.
    pub fn turn_crosses_conflict(&self, old_heading: f64, new_heading: f64) -> bool {
        self.bands
            .iter()
            .filter(|band| band.region == BandRegion::Conflict)
            .any(|band| check_turn_conflict(band.low_deg, band.high_deg, new_heading, old_heading))
    }
}

/// Whether the shorter turn from `old_heading` to `new_heading` passes
/// through the band [low, high]. The starting heading itself is excluded.
pub fn check_turn_conflict(low_deg: f64, high_deg: f64, new_heading: f64, old_heading: f64) -> bool {
    const SWEEP_STEP_DEG: f64 = 0.5;

    let turn = angle_diff_deg(new_heading, old_heading);
    let steps = (turn.abs() / SWEEP_STEP_DEG).ceil().max(1.0) as usize;
    let step = turn / steps as f64;
    (1..=steps).any(|k| {
        let h = normalize_deg(old_heading + step * k as f64);
        h >= low_deg && h <= high_deg
    })
}

/// Source of separation alerts and heading bands.
pub trait DaaCapability {
    fn lookahead_s(&self) -> f64;

    /// Time until `track` and the ownship lose separation on current
    /// velocities, if that happens within the lookahead.
    fn time_to_violation(&self, ownship: &OwnshipState, track: &TrafficTrack) -> Option<f64>;

    fn evaluate(&self, ownship: &OwnshipState, traffic: &[TrafficTrack]) -> DaaReport;
}

/// Reference band computation.
#[derive(Debug, Clone, PartialEq)]
pub struct SeparationBands {
    pub horizontal_sep_m: f64,
    pub vertical_sep_m: f64,
    pub lookahead_s: f64,
    pub caution_multiplier: f64,
    pub heading_step_deg: f64,
    /// Speed assumed for band computation when hovering
    pub min_speed_mps: f64,
}

impl Default for SeparationBands {
    fn default() -> Self {
        Self::from_params(&MonitorParams::default())
    }
}

impl SeparationBands {
    pub fn from_params(params: &MonitorParams) -> Self {
        Self {
            horizontal_sep_m: params.daa_horizontal_sep_m,
            vertical_sep_m: params.daa_vertical_sep_m,
            lookahead_s: params.lookahead_s,
            caution_multiplier: params.daa_caution_multiplier,
            heading_step_deg: params.daa_heading_step_deg,
            min_speed_mps: params.resolution_speed_mps,
        }
    }

    /// Earliest t in [0, lookahead] with horizontal distance below
    /// `h_sep` and vertical distance below the vertical separation.
    fn loss_time(&self, rel_pos: &Vector3<f64>, rel_vel: &Vector3<f64>, h_sep: f64) -> Option<f64> {
        let horizon = self.lookahead_s;

        let (h_lo, h_hi) = {
            let r = rel_pos.xy();
            let v = rel_vel.xy();
            let a = v.norm_squared();
            let c = r.norm_squared() - h_sep * h_sep;
            if a < 1e-12 {
                if c < 0.0 {
                    (0.0, horizon)
                } else {
                    return None;
                }
            } else {
                let b = 2.0 * r.dot(&v);
                let disc = b * b - 4.0 * a * c;
                if disc <= 0.0 {
                    return None;
                }
                let root = disc.sqrt();
                ((-b - root) / (2.0 * a), (-b + root) / (2.0 * a))
            }
        };

        let (v_lo, v_hi) = {
            let rz = rel_pos.z;
            let vz = rel_vel.z;
            if vz.abs() < 1e-9 {
                if rz.abs() < self.vertical_sep_m {
                    (0.0, horizon)
                } else {
                    return None;
                }
            } else {
                let t1 = (-self.vertical_sep_m - rz) / vz;
                let t2 = (self.vertical_sep_m - rz) / vz;
                (t1.min(t2), t1.max(t2))
            }
        };

        let lo = h_lo.max(v_lo).max(0.0);
        let hi = h_hi.min(v_hi).min(horizon);
        if lo <= hi {
            Some(lo)
        } else {
            None
        }
    }

    fn relative_state(
        &self,
        projection: &LocalProjection,
        ownship: &OwnshipState,
        own_velocity: &Vector3<f64>,
        track: &TrafficTrack,
    ) -> (Vector3<f64>, Vector3<f64>) {
        let own = projection.project(&ownship.position);
        let other = projection.project(&track.position);
        (other - own, track.velocity.to_enu() - own_velocity)
    }

    fn region_for(
        &self,
        projection: &LocalProjection,
        ownship: &OwnshipState,
        own_velocity: &Vector3<f64>,
        traffic: &[TrafficTrack],
    ) -> BandRegion {
        let mut region = BandRegion::Clear;
        for track in traffic {
            let (rel_pos, rel_vel) = self.relative_state(projection, ownship, own_velocity, track);
            if self
                .loss_time(&rel_pos, &rel_vel, self.horizontal_sep_m)
                .is_some()
            {
                return BandRegion::Conflict;
            }
            let caution_sep = self.horizontal_sep_m * self.caution_multiplier;
            if self.loss_time(&rel_pos, &rel_vel, caution_sep).is_some() {
                region = BandRegion::Caution;
            }
        }
        region
    }
}

impl DaaCapability for SeparationBands {
    fn lookahead_s(&self) -> f64 {
        self.lookahead_s
    }

    fn time_to_violation(&self, ownship: &OwnshipState, track: &TrafficTrack) -> Option<f64> {
        let projection = LocalProjection::at(&ownship.position);
        let own_velocity = ownship.velocity.to_enu();
        let (rel_pos, rel_vel) = self.relative_state(&projection, ownship, &own_velocity, track);
        self.loss_time(&rel_pos, &rel_vel, self.horizontal_sep_m)
    }

    fn evaluate(&self, ownship: &OwnshipState, traffic: &[TrafficTrack]) -> DaaReport {
        let projection = LocalProjection::at(&ownship.position);

        let alerts = traffic
            .iter()
            .map(|track| TrafficAlert {
                traffic_id: track.id.clone(),
                time_to_violation_s: self.time_to_violation(ownship, track),
            })
            .collect();

        let speed = ownship.velocity.ground_speed_mps.max(self.min_speed_mps);
        let vz = ownship.velocity.vertical_speed_mps;
        let step = self.heading_step_deg.clamp(0.1, 90.0);
        let samples = (360.0 / step).round().max(1.0) as usize;
        let step = 360.0 / samples as f64;

        let regions: Vec<BandRegion> = (0..samples)
            .map(|k| {
                let heading = (k as f64 * step).to_radians();
                let vel = Vector3::new(speed * heading.sin(), speed * heading.cos(), vz);
                self.region_for(&projection, ownship, &vel, traffic)
            })
            .collect();

        let mut bands: Vec<HeadingBand> = Vec::new();
        for (k, region) in regions.iter().enumerate() {
            let low = (k as f64 * step - step / 2.0).max(0.0);
            let high = (k as f64 * step + step / 2.0).min(360.0);
            match bands.last_mut() {
                Some(last) if last.region == *region => last.high_deg = high,
                _ => bands.push(HeadingBand {
                    low_deg: low,
                    high_deg: high,
                    region: *region,
                }),
            }
        }
        // The last sample wraps past north.
        if let Some(&first_region) = regions.first() {
            bands.push(HeadingBand {
                low_deg: 360.0 - step / 2.0,
                high_deg: 360.0,
                region: first_region,
            });
        }

        let current = ownship.velocity.track_deg;
        let mut preferred: Option<(f64, bool)> = None;
        for target in [BandRegion::Clear, BandRegion::Caution] {
            let right = (0..=samples / 2).find(|&k| {
                regions[((current / step).round() as usize + k) % samples] <= target
            });
            let left = (0..=samples / 2).find(|&k| {
                regions[((current / step).round() as usize + samples - k % samples) % samples]
                    <= target
            });
            preferred = match (right, left) {
                (Some(r), Some(l)) if l < r => Some((current - l as f64 * step, false)),
                (Some(r), _) => Some((current + r as f64 * step, true)),
                (None, Some(l)) => Some((current - l as f64 * step, false)),
                (None, None) => None,
            };
            if preferred.is_some() {
                break;
            }
        }

        DaaReport {
            alerts,
            bands,
            preferred_heading_deg: preferred.map(|(h, _)| normalize_deg(h)),
            preferred_right: preferred.map(|(_, right)| right).unwrap_or(true),
            lookahead_s: self.lookahead_s,
        }
    }
}
