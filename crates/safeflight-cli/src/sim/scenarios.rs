//! Predefined simulation scenarios.
//!
//! All geometry is laid out in meters east/north of a common origin.

use std::sync::Arc;

use nalgebra::Vector3;
use safeflight_core::{FenceDefinition, FenceType, LocalProjection, MonitorParams, Plan, Position};

use super::paths::{FlightPath, LinearPath};
use super::vehicle::VehicleConfig;

/// Newport News test range.
pub const ORIGIN_LAT: f64 = 37.1021;
pub const ORIGIN_LON: f64 = -76.3872;

const CRUISE_ALT_M: f64 = 30.0;
const SPEED_MPS: f64 = 5.0;

/// Wind applied to the vehicle over `[from_s, until_s)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gust {
    pub from_s: f64,
    pub until_s: f64,
    pub wind_enu: Vector3<f64>,
}

/// One mission, its airspace and surrounding traffic.
pub struct Scenario {
    pub name: String,
    pub description: String,
    pub home: Position,
    pub mission: Plan,
    pub fences: Vec<FenceDefinition>,
    pub traffic: Vec<(String, Arc<dyn FlightPath>)>,
    pub gusts: Vec<Gust>,
    pub vehicle: VehicleConfig,
    pub params: MonitorParams,
    pub duration_s: f64,
}

impl Scenario {
    /// Wind acting at `t`; overlapping gusts add up.
    pub fn wind_at(&self, t: f64) -> Vector3<f64> {
        self.gusts
            .iter()
            .filter(|g| t >= g.from_s && t < g.until_s)
            .map(|g| g.wind_enu)
            .sum()
    }
}

fn local(x: f64, y: f64, z: f64) -> Position {
    LocalProjection::new(ORIGIN_LAT, ORIGIN_LON).inverse(&Vector3::new(x, y, z))
}

fn mission(id: &str, legs: &[(f64, f64)]) -> Plan {
    let positions: Vec<Position> = legs
        .iter()
        .map(|(x, y)| local(*x, *y, CRUISE_ALT_M))
        .collect();
    // Distinct points at a positive speed always produce increasing times.
    Plan::timed_at_speed(id, &positions, 0.0, SPEED_MPS).unwrap_or_else(|_| Plan::new(id))
}

fn square_fence(
    id: u32,
    fence_type: FenceType,
    center: (f64, f64),
    half_m: f64,
    ceiling_m: f64,
) -> FenceDefinition {
    let (cx, cy) = center;
    let vertices = [
        (cx - half_m, cy - half_m),
        (cx + half_m, cy - half_m),
        (cx + half_m, cy + half_m),
        (cx - half_m, cy + half_m),
    ]
    .iter()
    .map(|(x, y)| {
        let p = local(*x, *y, 0.0);
        [p.lat, p.lon]
    })
    .collect();

    FenceDefinition {
        id,
        fence_type,
        floor_m: 0.0,
        ceiling_m,
        vertices,
    }
}

fn base(name: &str, description: &str, mission: Plan) -> Scenario {
    Scenario {
        name: name.to_string(),
        description: description.to_string(),
        home: local(0.0, 0.0, 0.0),
        mission,
        fences: Vec::new(),
        traffic: Vec::new(),
        gusts: Vec::new(),
        vehicle: VehicleConfig {
            cruise_speed_mps: SPEED_MPS,
            ..VehicleConfig::default()
        },
        params: MonitorParams::default(),
        duration_s: 180.0,
    }
}

/// Straight leg with nothing in the way.
pub fn create_nominal_scenario() -> Scenario {
    base(
        "nominal",
        "Take off, fly 200 m east and land",
        mission("nominal", &[(0.0, 0.0), (200.0, 0.0)]),
    )
}

/// A: keep-out fence straddling the mission leg.
pub fn create_keep_out_scenario() -> Scenario {
    let mut scenario = base(
        "keep-out",
        "Keep-out block across a 300 m eastbound leg",
        mission("keep-out", &[(0.0, 0.0), (300.0, 0.0)]),
    );
    scenario
        .fences
        .push(square_fence(10, FenceType::KeepOut, (100.0, 0.0), 20.0, 50.0));
    scenario.duration_s = 240.0;
    scenario
}

/// B: intruder head-on along the mission leg.
pub fn create_traffic_scenario() -> Scenario {
    let mut scenario = base(
        "traffic",
        "Intruder flying south down a northbound leg",
        mission("traffic", &[(0.0, 0.0), (0.0, 400.0)]),
    );
    let intruder = Arc::new(LinearPath::new(
        local(0.0, 400.0, CRUISE_ALT_M),
        local(0.0, -200.0, CRUISE_ALT_M),
        SPEED_MPS,
    )) as Arc<dyn FlightPath>;
    scenario.traffic.push(("INTRUDER1".to_string(), intruder));
    scenario.duration_s = 240.0;
    scenario
}

/// C: crosswind gust pushes the vehicle off a northbound leg.
pub fn create_deviation_scenario() -> Scenario {
    let mut scenario = base(
        "deviation",
        "Eastward gust during a 400 m northbound leg",
        mission("deviation", &[(0.0, 0.0), (0.0, 400.0)]),
    );
    scenario.gusts.push(Gust {
        from_s: 20.0,
        until_s: 35.0,
        wind_enu: Vector3::new(3.0, 0.0, 0.0),
    });
    scenario.duration_s = 240.0;
    scenario
}

/// D: gust carries the vehicle out of its keep-in area.
pub fn create_keep_in_scenario() -> Scenario {
    let mut scenario = base(
        "keep-in",
        "Out-and-back inside a keep-in box, northerly gust near the boundary",
        mission("keep-in", &[(0.0, 0.0), (0.0, 100.0), (0.0, -100.0)]),
    );
    scenario
        .fences
        .push(square_fence(1, FenceType::KeepIn, (0.0, 0.0), 110.0, 100.0));
    scenario.gusts.push(Gust {
        from_s: 25.0,
        until_s: 45.0,
        wind_enu: Vector3::new(0.0, 7.0, 0.0),
    });
    scenario.duration_s = 300.0;
    scenario
}
