//! Scripted traffic paths.

use std::f64::consts::PI;

use safeflight_core::{Position, Velocity};

/// Trait for intruder flight paths.
pub trait FlightPath: Send + Sync {
    /// Position at `t` seconds after scenario start.
    fn position_at(&self, t: f64) -> Position;

    /// Velocity at `t`. Default: finite difference over 0.1 s.
    fn velocity_at(&self, t: f64) -> Velocity {
        let dt = 0.1;
        let a = self.position_at(t);
        let b = self.position_at(t + dt);
        let gs = a.distance_h(&b) / dt;
        if gs < 1e-6 {
            return Velocity::new(0.0, 0.0, (b.altitude_m - a.altitude_m) / dt);
        }
        Velocity::new(a.track_to(&b), gs, (b.altitude_m - a.altitude_m) / dt)
    }
}

/// Straight, constant-speed leg; holds position at the end.
#[derive(Debug, Clone)]
pub struct LinearPath {
    pub start: Position,
    pub end: Position,
    pub speed_mps: f64,
    pub duration_s: f64,
    track_deg: f64,
}

impl LinearPath {
    pub fn new(start: Position, end: Position, speed_mps: f64) -> Self {
        let distance_m = start.distance_3d(&end);
        let duration_s = if speed_mps > 0.0 {
            distance_m / speed_mps
        } else {
            0.0
        };
        Self {
            start,
            end,
            speed_mps,
            duration_s,
            track_deg: start.track_to(&end),
        }
    }

    fn progress(&self, t: f64) -> f64 {
        if self.duration_s > 0.0 {
            (t / self.duration_s).clamp(0.0, 1.0)
        } else {
            1.0
        }
    }
}

impl FlightPath for LinearPath {
    fn position_at(&self, t: f64) -> Position {
        let p = self.progress(t);
        Position::new(
            self.start.lat + p * (self.end.lat - self.start.lat),
            self.start.lon + p * (self.end.lon - self.start.lon),
            self.start.altitude_m + p * (self.end.altitude_m - self.start.altitude_m),
        )
    }

    fn velocity_at(&self, t: f64) -> Velocity {
        if t >= self.duration_s || self.duration_s <= 0.0 {
            return Velocity::default();
        }
        let climb = (self.end.altitude_m - self.start.altitude_m) / self.duration_s;
        let gs = self.start.distance_h(&self.end) / self.duration_s;
        Velocity::new(self.track_deg, gs, climb)
    }
}

/// Constant-altitude orbit around a center.
#[derive(Debug, Clone)]
pub struct CircularPath {
    pub center: Position,
    pub radius_m: f64,
    pub speed_mps: f64,
    /// Bearing of the starting point from the center (degrees)
    pub start_bearing_deg: f64,
    pub clockwise: bool,
    period_s: f64,
}

impl CircularPath {
    pub fn new(
        center: Position,
        radius_m: f64,
        speed_mps: f64,
        start_bearing_deg: f64,
        clockwise: bool,
    ) -> Self {
        let period_s = 2.0 * PI * radius_m / speed_mps.max(1e-6);
        Self {
            center,
            radius_m,
            speed_mps,
            start_bearing_deg,
            clockwise,
            period_s,
        }
    }

    pub fn period_s(&self) -> f64 {
        self.period_s
    }

    fn bearing_at(&self, t: f64) -> f64 {
        let swept = 360.0 * t / self.period_s;
        if self.clockwise {
            self.start_bearing_deg + swept
        } else {
            self.start_bearing_deg - swept
        }
    }
}

impl FlightPath for CircularPath {
    fn position_at(&self, t: f64) -> Position {
        self.center.offset(self.radius_m, self.bearing_at(t))
    }

    fn velocity_at(&self, t: f64) -> Velocity {
        let tangent = if self.clockwise { 90.0 } else { -90.0 };
        Velocity::new(self.bearing_at(t) + tangent, self.speed_mps, 0.0)
    }
}
