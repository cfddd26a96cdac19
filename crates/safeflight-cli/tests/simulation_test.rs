//! End-to-end simulation runs.

use safeflight_cli::sim::scenarios::{
    create_keep_out_scenario, create_nominal_scenario, create_traffic_scenario,
};
use safeflight_cli::sim::Simulation;
use safeflight_core::{AckStatus, FlightPhase, MissionSignal};

#[test]
fn test_nominal_flight_lands_and_terminates() {
    let summary = Simulation::new(create_nominal_scenario(), Some(1))
        .unwrap()
        .run(0.1);

    assert_eq!(summary.final_phase, FlightPhase::Terminate);
    assert!(summary.resolutions.is_empty());
    assert_eq!(summary.command_failures, 0);
    assert!(summary.min_traffic_separation_m.is_none());
    // Takeoff, 200 m at 5 m/s and the descent.
    assert!(summary.elapsed_s > 50.0 && summary.elapsed_s < 120.0);

    let last = summary.track.last().unwrap();
    let first = summary.track.first().unwrap();
    assert!((last.distance_h(first) - 200.0).abs() < 5.0);
}

#[test]
fn test_takeoff_retried_after_rejection() {
    let mut sim = Simulation::new(create_nominal_scenario(), Some(1)).unwrap();
    sim.vehicle_mut().script_acks([AckStatus::Failed]);

    let (report, _) = sim.step(0.1, Some(MissionSignal::Start { start_index: 1 }));
    assert_eq!(report.phase, FlightPhase::Takeoff);
    assert_eq!(report.failures.len(), 1);

    let (report, _) = sim.step(0.1, None);
    assert_eq!(report.phase, FlightPhase::Climb);
    assert!(report.failures.is_empty());
    assert_eq!(sim.flight_manager().phase(), FlightPhase::Climb);
}

#[test]
fn test_keep_out_resolution_compares_candidates() {
    let summary = Simulation::new(create_keep_out_scenario(), Some(7))
        .unwrap()
        .run(0.1);

    let event = summary
        .resolutions
        .iter()
        .find(|e| e.kind != "maneuver")
        .expect("trajectory resolution");
    assert!(!event.candidates.is_empty());
    assert!(event.candidates.iter().all(|(_, length)| *length > 0.0));
}

#[test]
fn test_traffic_triggers_resolution() {
    let summary = Simulation::new(create_traffic_scenario(), Some(3))
        .unwrap()
        .run(0.1);

    assert!(!summary.resolutions.is_empty());
    assert!(summary.peak_conflicts >= 1);
    assert!(summary.min_traffic_separation_m.is_some());
}
