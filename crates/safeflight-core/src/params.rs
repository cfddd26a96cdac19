//! Monitor parameters and thresholds.
//!
//! Every field has a default; a deployment overrides a subset through
//! key/value pairs at startup.

use crate::error::ParamError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which planner(s) the keep-out resolver consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeepOutStrategy {
    Grid,
    Sampling,
    /// Run both and keep the shorter feasible path.
    Both,
}

/// How traffic conflicts are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficStrategy {
    /// One-cycle heading maneuver from the DAA bands.
    Maneuver,
    /// Traffic-aware sampling path to the next mission waypoint.
    Sampling,
}

/// Configuration for detection, resolution and flight management.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorParams {
    // ---- geofence ----
    /// Horizontal proximity that counts as a fence conflict (meters)
    pub h_threshold_m: f64,
    /// Vertical proximity that counts as a fence conflict (meters)
    pub v_threshold_m: f64,
    /// Horizontal step-back applied to recovery points (meters)
    pub h_stepback_m: f64,
    /// Vertical step-back applied to recovery points (meters)
    pub v_stepback_m: f64,
    /// Prediction horizon for fence and traffic conflicts (seconds)
    pub lookahead_s: f64,

    // ---- resolution ----
    pub resolution_speed_mps: f64,
    /// Allowed cross-track deviation before a conflict is raised (meters)
    pub xtrk_dev_m: f64,
    /// Proportional gain for cross-track correction
    pub xtrk_gain: f64,
    /// Fraction of the allowed deviation below which the conflict clears
    pub xtrk_clear_ratio: f64,
    /// Time a traffic conflict persists after its last assertion (seconds)
    pub traffic_hold_s: f64,
    /// Heading pad added to the preferred resolution heading (degrees)
    pub traffic_heading_pad_deg: f64,
    pub keep_out_strategy: KeepOutStrategy,
    pub traffic_strategy: TrafficStrategy,
    /// Highest altitude a resolution may use (meters)
    pub max_ceiling_m: f64,
    /// Clearance kept above a fence ceiling when flying over it (meters)
    pub go_above_margin_m: f64,

    // ---- grid planner ----
    pub grid_size_m: f64,
    pub grid_buffer_m: f64,
    pub grid_free_weight: f64,
    pub grid_obstacle_weight: f64,
    pub grid_max_expansions: usize,

    // ---- sampling planner ----
    pub rrt_iterations: usize,
    pub rrt_substeps: usize,
    pub rrt_dt_s: f64,
    pub rrt_damping_gain: f64,
    /// Norm limit of the sampled velocity input (m/s)
    pub rrt_max_input_mps: f64,
    pub rrt_goal_tolerance_m: f64,
    pub rrt_traffic_separation_m: f64,
    /// Half-width of the sampling box when no containment fence exists
    pub rrt_default_extent_m: f64,
    /// Fixed seed for reproducible sampling; random when absent
    pub rrt_seed: Option<u64>,

    // ---- detect and avoid (reference bands) ----
    pub daa_horizontal_sep_m: f64,
    pub daa_vertical_sep_m: f64,
    pub daa_caution_multiplier: f64,
    pub daa_heading_step_deg: f64,

    // ---- flight management ----
    pub takeoff_alt_m: f64,
    pub climb_tolerance_m: f64,
    pub takeoff_retries: u32,
    pub capture_h_m: f64,
    pub capture_v_m: f64,
    /// Hold at each trajectory waypoint until its scheduled time
    pub wait_for_schedule: bool,
}

impl Default for MonitorParams {
    fn default() -> Self {
        Self {
            h_threshold_m: 5.0,
            v_threshold_m: 2.0,
            h_stepback_m: 5.0,
            v_stepback_m: 2.0,
            lookahead_s: 20.0,

            resolution_speed_mps: 5.0,
            xtrk_dev_m: 10.0,
            xtrk_gain: 0.3,
            xtrk_clear_ratio: 1.0 / 3.0,
            traffic_hold_s: 10.0,
            traffic_heading_pad_deg: 5.0,
            keep_out_strategy: KeepOutStrategy::Both,
            traffic_strategy: TrafficStrategy::Maneuver,
            max_ceiling_m: 100.0,
            go_above_margin_m: 1.0,

            grid_size_m: 10.0,
            grid_buffer_m: 20.0,
            grid_free_weight: 5.0,
            grid_obstacle_weight: 100.0,
            grid_max_expansions: 50_000,

            rrt_iterations: 1000,
            rrt_substeps: 5,
            rrt_dt_s: 1.0,
            rrt_damping_gain: 0.3,
            rrt_max_input_mps: 2.0,
            rrt_goal_tolerance_m: 3.0,
            rrt_traffic_separation_m: 8.0,
            rrt_default_extent_m: 100.0,
            rrt_seed: None,

            daa_horizontal_sep_m: 30.0,
            daa_vertical_sep_m: 15.0,
            daa_caution_multiplier: 2.0,
            daa_heading_step_deg: 2.0,

            takeoff_alt_m: 30.0,
            climb_tolerance_m: 0.5,
            takeoff_retries: 3,
            capture_h_m: 2.0,
            capture_v_m: 1.0,
            wait_for_schedule: false,
        }
    }
}

impl MonitorParams {
    /// Build parameters from string key/value pairs.
    ///
    /// Keys are the field names (case-insensitive). Values are parsed as
    /// JSON scalars where possible, so `"12.5"`, `"true"` and `"grid"` all work.
    /// Unknown keys are rejected.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ParamError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut map = Map::new();
        for (key, value) in pairs {
            let key = key.as_ref().trim().to_ascii_lowercase();
            let raw = value.as_ref().trim();
            let parsed = serde_json::from_str::<Value>(raw)
                .unwrap_or_else(|_| Value::String(raw.to_ascii_lowercase()));
            map.insert(key, parsed);
        }
        let params: MonitorParams = serde_json::from_value(Value::Object(map))?;
        params.validate()?;
        Ok(params)
    }

    /// Reject values that would stall or invert the algorithms.
    pub fn validate(&self) -> Result<(), ParamError> {
        let positive = [
            ("lookahead_s", self.lookahead_s),
            ("resolution_speed_mps", self.resolution_speed_mps),
            ("xtrk_dev_m", self.xtrk_dev_m),
            ("grid_size_m", self.grid_size_m),
            ("rrt_dt_s", self.rrt_dt_s),
            ("rrt_max_input_mps", self.rrt_max_input_mps),
            ("daa_heading_step_deg", self.daa_heading_step_deg),
            ("capture_h_m", self.capture_h_m),
            ("capture_v_m", self.capture_v_m),
        ];
        for (key, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ParamError::OutOfRange {
                    key: key.to_string(),
                    reason: format!("must be positive, got {value}"),
                });
            }
        }
        if !(0.0..=1.0).contains(&self.xtrk_clear_ratio) {
            return Err(ParamError::OutOfRange {
                key: "xtrk_clear_ratio".to_string(),
                reason: format!("must lie in [0, 1], got {}", self.xtrk_clear_ratio),
            });
        }
        // Recovery points must land outside the conflict band.
        let stepbacks = [
            ("h_stepback_m", self.h_stepback_m, "h_threshold_m", self.h_threshold_m),
            ("v_stepback_m", self.v_stepback_m, "v_threshold_m", self.v_threshold_m),
        ];
        for (key, stepback, threshold_key, threshold) in stepbacks {
            if stepback < threshold {
                return Err(ParamError::OutOfRange {
                    key: key.to_string(),
                    reason: format!("must not be below {threshold_key} ({threshold}), got {stepback}"),
                });
            }
        }
        if self.grid_obstacle_weight < self.grid_free_weight {
            return Err(ParamError::OutOfRange {
                key: "grid_obstacle_weight".to_string(),
                reason: "must not be below grid_free_weight".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let params = MonitorParams::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.keep_out_strategy, KeepOutStrategy::Both);
        assert!((params.traffic_hold_s - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_from_pairs_overrides_subset() {
        let params = MonitorParams::from_pairs([
            ("LOOKAHEAD_S", "30"),
            ("keep_out_strategy", "Grid"),
            ("rrt_seed", "42"),
            ("wait_for_schedule", "true"),
        ])
        .unwrap();
        assert!((params.lookahead_s - 30.0).abs() < f64::EPSILON);
        assert_eq!(params.keep_out_strategy, KeepOutStrategy::Grid);
        assert_eq!(params.rrt_seed, Some(42));
        assert!(params.wait_for_schedule);
        assert!((params.h_threshold_m - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_from_pairs_rejects_unknown_key() {
        let err = MonitorParams::from_pairs([("not_a_param", "1")]).unwrap_err();
        assert!(matches!(err, ParamError::Invalid(_)));
    }

    #[test]
    fn test_stepback_inside_conflict_band_is_rejected() {
        let err = MonitorParams::from_pairs([("v_stepback_m", "1")]).unwrap_err();
        match err {
            ParamError::OutOfRange { key, .. } => assert_eq!(key, "v_stepback_m"),
            other => panic!("unexpected error {other:?}"),
        }

        let err = MonitorParams::from_pairs([("h_threshold_m", "8")]).unwrap_err();
        assert!(matches!(err, ParamError::OutOfRange { ref key, .. } if key == "h_stepback_m"));

        let widened = MonitorParams::from_pairs([("h_threshold_m", "8"), ("h_stepback_m", "8")]);
        assert!(widened.is_ok());
    }

    #[test]
    fn test_traffic_strategy_parses() {
        assert_eq!(
            MonitorParams::default().traffic_strategy,
            TrafficStrategy::Maneuver
        );
        let params = MonitorParams::from_pairs([("traffic_strategy", "Sampling")]).unwrap();
        assert_eq!(params.traffic_strategy, TrafficStrategy::Sampling);
    }

    #[test]
    fn test_from_pairs_rejects_non_positive_lookahead() {
        let err = MonitorParams::from_pairs([("lookahead_s", "0")]).unwrap_err();
        assert!(matches!(err, ParamError::OutOfRange { .. }));
    }
}
