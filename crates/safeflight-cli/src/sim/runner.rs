//! Lock-step simulation of the flight manager against the simulated vehicle.

use safeflight_core::{
    CycleReport, CycleSnapshot, FenceError, FlightPhase, FlightStateMachine, GeoFence,
    MissionSignal, Position, Resolution, SeparationBands, TrafficTrack,
};
use serde::Serialize;

use super::scenarios::Scenario;
use super::vehicle::SimVehicle;

/// Resolution installed during the run.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionEvent {
    pub time_s: f64,
    /// "maneuver" or the trajectory plan id
    pub kind: String,
    pub candidates: Vec<(String, f64)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationSummary {
    pub scenario: String,
    pub final_phase: FlightPhase,
    pub elapsed_s: f64,
    pub cycles: usize,
    pub peak_conflicts: usize,
    pub command_failures: usize,
    pub resolutions: Vec<ResolutionEvent>,
    /// Closest horizontal approach to any intruder (meters)
    pub min_traffic_separation_m: Option<f64>,
    /// Ownship position once per simulated second
    pub track: Vec<Position>,
}

pub struct Simulation {
    scenario: Scenario,
    fms: FlightStateMachine<SimVehicle, SeparationBands>,
    time_s: f64,
}

impl Simulation {
    /// Build the flight manager and vehicle for `scenario`. `seed` fixes the
    /// sampling planner.
    pub fn new(mut scenario: Scenario, seed: Option<u64>) -> Result<Self, FenceError> {
        if seed.is_some() {
            scenario.params.rrt_seed = seed;
        }
        let params = scenario.params.clone();

        let mut vehicle = SimVehicle::new(scenario.home, scenario.vehicle.clone());
        vehicle.upload_mission(&scenario.mission);

        let daa = SeparationBands::from_params(&params);
        let mut fms = FlightStateMachine::new(params.clone(), vehicle, daa);
        fms.load_mission(scenario.mission.clone());
        for definition in &scenario.fences {
            fms.add_fence(GeoFence::from_definition(definition, &params)?);
        }

        Ok(Self {
            scenario,
            fms,
            time_s: 0.0,
        })
    }

    pub fn flight_manager(&self) -> &FlightStateMachine<SimVehicle, SeparationBands> {
        &self.fms
    }

    pub fn vehicle_mut(&mut self) -> &mut SimVehicle {
        self.fms.link_mut()
    }

    fn traffic_at(&self, t: f64) -> Vec<TrafficTrack> {
        self.scenario
            .traffic
            .iter()
            .map(|(id, path)| TrafficTrack::new(id.clone(), path.position_at(t), path.velocity_at(t)))
            .collect()
    }

    /// One control cycle followed by one vehicle step of `dt` seconds.
    pub fn step(&mut self, dt: f64, signal: Option<MissionSignal>) -> (CycleReport, Vec<TrafficTrack>) {
        let t = self.time_s;
        let traffic = self.traffic_at(t);

        let vehicle = self.fms.link();
        let mut snapshot = CycleSnapshot::new(t, vehicle.ownship(t));
        snapshot.status = vehicle.status();
        snapshot.traffic = traffic.clone();
        snapshot.signal = signal;

        let report = self.fms.run_cycle(&snapshot);

        let wind = self.scenario.wind_at(t);
        let vehicle = self.fms.link_mut();
        vehicle.config.wind_enu = wind;
        vehicle.step(dt);
        self.time_s += dt;

        (report, traffic)
    }

    /// Run until the vehicle terminates or the scenario duration elapses.
    pub fn run(mut self, dt: f64) -> SimulationSummary {
        let dt = dt.max(1e-3);
        let mut summary = SimulationSummary {
            scenario: self.scenario.name.clone(),
            final_phase: FlightPhase::Idle,
            elapsed_s: 0.0,
            cycles: 0,
            peak_conflicts: 0,
            command_failures: 0,
            resolutions: Vec::new(),
            min_traffic_separation_m: None,
            track: Vec::new(),
        };

        tracing::info!("Running scenario {}: {}", self.scenario.name, self.scenario.description);
        let mut signal = Some(MissionSignal::Start { start_index: 1 });
        let mut next_sample = 0.0;

        while self.time_s < self.scenario.duration_s {
            let t = self.time_s;
            let own = self.fms.link().position();
            if t >= next_sample {
                summary.track.push(own);
                next_sample += 1.0;
            }

            let (report, traffic) = self.step(dt, signal.take());
            summary.cycles += 1;
            summary.peak_conflicts = summary.peak_conflicts.max(report.conflict_count);
            summary.command_failures += report.failures.len();

            for track in &traffic {
                let d = own.distance_h(&track.position);
                summary.min_traffic_separation_m =
                    Some(summary.min_traffic_separation_m.map_or(d, |m: f64| m.min(d)));
            }

            if let Some(resolution) = report.resolution {
                let event = match resolution {
                    Resolution::Maneuver(_) => ResolutionEvent {
                        time_s: t,
                        kind: "maneuver".to_string(),
                        candidates: Vec::new(),
                    },
                    Resolution::Trajectory(trajectory) => ResolutionEvent {
                        time_s: t,
                        kind: trajectory.plan.id.clone(),
                        candidates: trajectory
                            .candidates
                            .iter()
                            .filter(|c| c.feasible)
                            .map(|c| (c.name.clone(), c.length_m))
                            .collect(),
                    },
                };
                tracing::info!("t={:.1}s resolution {}", t, event.kind);
                summary.resolutions.push(event);
            }

            if report.phase == FlightPhase::Terminate {
                break;
            }
        }

        summary.final_phase = self.fms.phase();
        summary.elapsed_s = self.time_s;
        summary
    }
}
