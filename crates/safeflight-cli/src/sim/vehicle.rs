//! Simulated vehicle and autopilot.
//!
//! Point-mass kinematics in a local ENU frame. Commands are acknowledged
//! immediately; the autopilot flies the uploaded mission in AUTO and
//! position/velocity targets in GUIDED.

use std::collections::VecDeque;

use nalgebra::Vector3;
use safeflight_core::{
    AckStatus, CommandAck, CommandError, CommandLink, FlightMode, LocalProjection, OwnshipState,
    Plan, Position, VehicleCommand, VehicleStatus, Velocity,
};

#[derive(Debug, Clone, PartialEq)]
pub struct VehicleConfig {
    /// Horizontal speed in AUTO and toward GUIDED position targets (m/s)
    pub cruise_speed_mps: f64,
    pub climb_rate_mps: f64,
    /// Constant disturbance added to every step (east, north, up; m/s)
    pub wind_enu: Vector3<f64>,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            cruise_speed_mps: 5.0,
            climb_rate_mps: 3.0,
            wind_enu: Vector3::zeros(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum GuidedTarget {
    Position(Vector3<f64>),
    Velocity(Vector3<f64>),
}

pub struct SimVehicle {
    pub config: VehicleConfig,
    projection: LocalProjection,
    position: Vector3<f64>,
    velocity: Vector3<f64>,
    mode: Option<FlightMode>,
    armed: bool,
    landing: bool,
    climb_to: Option<f64>,
    mission: Vec<Vector3<f64>>,
    mission_current: usize,
    guided: Option<GuidedTarget>,
    /// Verdicts handed out before falling back to accepting
    scripted_acks: VecDeque<AckStatus>,
    log: Vec<CommandAck>,
}

impl SimVehicle {
    /// Vehicle on the ground at `home`.
    pub fn new(home: Position, config: VehicleConfig) -> Self {
        let projection = LocalProjection::at(&home);
        let position = projection.project(&home.with_altitude(0.0));
        Self {
            config,
            projection,
            position,
            velocity: Vector3::zeros(),
            mode: None,
            armed: false,
            landing: false,
            climb_to: None,
            mission: Vec::new(),
            mission_current: 0,
            guided: None,
            scripted_acks: VecDeque::new(),
            log: Vec::new(),
        }
    }

    /// Upload the mission the autopilot flies in AUTO.
    pub fn upload_mission(&mut self, plan: &Plan) {
        self.mission = plan
            .points()
            .iter()
            .map(|p| self.projection.project(&p.position))
            .collect();
        self.mission_current = 0;
    }

    /// Answer the next commands with `statuses`, in order.
    pub fn script_acks(&mut self, statuses: impl IntoIterator<Item = AckStatus>) {
        self.scripted_acks.extend(statuses);
    }

    pub fn position(&self) -> Position {
        self.projection.inverse(&self.position)
    }

    pub fn velocity(&self) -> Velocity {
        Velocity::from_enu(self.velocity.x, self.velocity.y, self.velocity.z)
    }

    pub fn ownship(&self, time_s: f64) -> OwnshipState {
        OwnshipState::new(self.position(), self.velocity(), time_s)
    }

    pub fn status(&self) -> VehicleStatus {
        VehicleStatus {
            armed: self.armed,
            landed: self.on_ground() && !self.armed,
            battery_pct: None,
            mode: self
                .mode
                .map(|m| format!("{:?}", m).to_uppercase())
                .unwrap_or_default(),
        }
    }

    pub fn mode(&self) -> Option<FlightMode> {
        self.mode
    }

    pub fn mission_current(&self) -> usize {
        self.mission_current
    }

    /// Every acknowledged command, oldest first.
    pub fn command_log(&self) -> &[CommandAck] {
        &self.log
    }

    fn on_ground(&self) -> bool {
        self.position.z <= 1e-3
    }

    fn apply(&mut self, command: &VehicleCommand) -> AckStatus {
        match command {
            VehicleCommand::SetMode { mode } => {
                self.mode = Some(*mode);
                self.guided = None;
                AckStatus::Accepted
            }
            VehicleCommand::Arm => {
                self.armed = true;
                AckStatus::Accepted
            }
            VehicleCommand::Takeoff { altitude_m } => {
                if !self.armed || self.mode != Some(FlightMode::Guided) {
                    return AckStatus::Failed;
                }
                self.climb_to = Some(*altitude_m);
                self.landing = false;
                AckStatus::Accepted
            }
            VehicleCommand::Land { .. } => {
                self.landing = true;
                self.climb_to = None;
                self.guided = None;
                AckStatus::Accepted
            }
            VehicleCommand::SetVelocity { vn, ve, vu } => {
                if self.mode != Some(FlightMode::Guided) {
                    return AckStatus::Denied;
                }
                self.guided = Some(GuidedTarget::Velocity(Vector3::new(*ve, *vn, *vu)));
                AckStatus::Accepted
            }
            // Point-mass model; the velocity command carries the direction.
            VehicleCommand::SetHeading { .. } => AckStatus::Accepted,
            VehicleCommand::SetPositionTarget { position } => {
                if self.mode != Some(FlightMode::Guided) {
                    return AckStatus::Denied;
                }
                let target = self.projection.project(position);
                self.guided = Some(GuidedTarget::Position(target));
                AckStatus::Accepted
            }
            VehicleCommand::SetMissionCurrent { index } => {
                if *index >= self.mission.len() {
                    return AckStatus::Failed;
                }
                self.mission_current = *index;
                AckStatus::Accepted
            }
        }
    }

    /// Advance the vehicle by `dt` seconds.
    pub fn step(&mut self, dt: f64) {
        let commanded = self.commanded_velocity(dt);
        let wind = if self.on_ground() && commanded.z <= 0.0 {
            Vector3::zeros()
        } else {
            self.config.wind_enu
        };
        self.velocity = commanded + wind;
        self.position += self.velocity * dt;

        if self.position.z <= 0.0 {
            self.position.z = 0.0;
            if self.landing {
                self.landing = false;
                self.armed = false;
                self.velocity = Vector3::zeros();
            }
        }
    }

    fn commanded_velocity(&mut self, dt: f64) -> Vector3<f64> {
        if !self.armed {
            return Vector3::zeros();
        }
        if self.landing {
            return Vector3::new(0.0, 0.0, -self.config.climb_rate_mps);
        }
        if let Some(altitude) = self.climb_to {
            let remaining = altitude - self.position.z;
            if remaining.abs() < 1e-3 {
                self.climb_to = None;
                return Vector3::zeros();
            }
            let rate = self.config.climb_rate_mps.min(remaining.abs() / dt);
            return Vector3::new(0.0, 0.0, rate * remaining.signum());
        }

        match (self.mode, self.guided) {
            (Some(FlightMode::Auto), _) => {
                let Some(target) = self.mission.get(self.mission_current).copied() else {
                    return Vector3::zeros();
                };
                let (velocity, arrived) = self.toward(target, dt);
                if arrived && self.mission_current + 1 < self.mission.len() {
                    self.mission_current += 1;
                }
                velocity
            }
            (Some(FlightMode::Guided), Some(GuidedTarget::Position(target))) => {
                self.toward(target, dt).0
            }
            (Some(FlightMode::Guided), Some(GuidedTarget::Velocity(v))) => v,
            _ => Vector3::zeros(),
        }
    }

    /// Velocity that reaches `target` at cruise speed without overshoot.
    fn toward(&self, target: Vector3<f64>, dt: f64) -> (Vector3<f64>, bool) {
        let delta = target - self.position;
        let distance = delta.norm();
        let step = self.config.cruise_speed_mps * dt;
        if distance <= step {
            return (delta / dt, true);
        }
        (delta * (self.config.cruise_speed_mps / distance), false)
    }
}

impl CommandLink for SimVehicle {
    fn send(&mut self, command: VehicleCommand) -> Result<(), CommandError> {
        let status = match self.scripted_acks.pop_front() {
            Some(status) => status,
            None => self.apply(&command),
        };
        tracing::debug!("Vehicle {:?} -> {:?}", command, status);
        let ack = CommandAck::new(command, status);
        self.log.push(ack.clone());
        ack.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn home() -> Position {
        Position::new(37.1, -76.4, 0.0)
    }

    fn airborne(altitude_m: f64) -> SimVehicle {
        let mut vehicle = SimVehicle::new(home(), VehicleConfig::default());
        vehicle.send(VehicleCommand::SetMode { mode: FlightMode::Guided }).unwrap();
        vehicle.send(VehicleCommand::Arm).unwrap();
        vehicle.send(VehicleCommand::Takeoff { altitude_m }).unwrap();
        for _ in 0..200 {
            vehicle.step(0.1);
        }
        vehicle
    }

    #[test]
    fn test_takeoff_requires_arming() {
        let mut vehicle = SimVehicle::new(home(), VehicleConfig::default());
        vehicle.send(VehicleCommand::SetMode { mode: FlightMode::Guided }).unwrap();
        assert!(matches!(
            vehicle.send(VehicleCommand::Takeoff { altitude_m: 30.0 }),
            Err(CommandError::Rejected(_))
        ));
    }

    #[test]
    fn test_takeoff_climbs_to_altitude() {
        let vehicle = airborne(30.0);
        assert!((vehicle.position().altitude_m - 30.0).abs() < 1e-6);
        assert!(vehicle.status().armed);
        assert!(!vehicle.status().landed);
    }

    #[test]
    fn test_auto_flies_mission_in_order() {
        let mut vehicle = airborne(30.0);
        let a = home().with_altitude(30.0).offset(20.0, 90.0);
        let b = a.offset(20.0, 0.0);
        let plan = Plan::timed_at_speed("m", &[home().with_altitude(30.0), a, b], 0.0, 5.0).unwrap();
        vehicle.upload_mission(&plan);
        vehicle.send(VehicleCommand::SetMode { mode: FlightMode::Auto }).unwrap();
        vehicle.send(VehicleCommand::SetMissionCurrent { index: 1 }).unwrap();

        for _ in 0..100 {
            vehicle.step(0.1);
        }
        assert_eq!(vehicle.mission_current(), 2);
        assert!(vehicle.position().distance_h(&b) < 0.01);
    }

    #[test]
    fn test_guided_targets_need_guided_mode() {
        let mut vehicle = airborne(30.0);
        vehicle.send(VehicleCommand::SetMode { mode: FlightMode::Auto }).unwrap();
        assert!(matches!(
            vehicle.send(VehicleCommand::SetVelocity { vn: 1.0, ve: 0.0, vu: 0.0 }),
            Err(CommandError::AccessDenied(_))
        ));
    }

    #[test]
    fn test_land_disarms_on_touchdown() {
        let mut vehicle = airborne(10.0);
        vehicle.send(VehicleCommand::Land { position: vehicle.position() }).unwrap();
        for _ in 0..100 {
            vehicle.step(0.1);
        }
        assert!(vehicle.status().landed);
        assert!(!vehicle.status().armed);
    }

    #[test]
    fn test_scripted_acks_take_precedence() {
        let mut vehicle = SimVehicle::new(home(), VehicleConfig::default());
        vehicle.script_acks([AckStatus::Failed]);
        assert!(vehicle.send(VehicleCommand::Arm).is_err());
        assert!(vehicle.send(VehicleCommand::Arm).is_ok());
        assert_eq!(vehicle.command_log().len(), 2);
    }
}
