//! Control loop driven from shared state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use safeflight_core::{
    CommandError, CommandLink, FenceDefinition, FenceType, FlightMode, FlightPhase,
    FlightStateMachine, MissionSignal, MonitorParams, NavPoint, Plan, Position, SeparationBands,
    VehicleCommand, VehicleStatus, Velocity,
};
use safeflight_monitor::ingest::TelemetryMessage;
use safeflight_monitor::loops::control_loop::{run_control_loop, LoopSettings};
use safeflight_monitor::state::SharedState;

#[derive(Clone, Default)]
struct SharedLink {
    sent: Arc<Mutex<Vec<VehicleCommand>>>,
}

impl CommandLink for SharedLink {
    fn send(&mut self, command: VehicleCommand) -> Result<(), CommandError> {
        self.sent.lock().unwrap().push(command);
        Ok(())
    }
}

fn ground_telemetry() -> TelemetryMessage {
    TelemetryMessage {
        position: Position::new(37.1, -76.4, 0.0),
        velocity: Velocity::default(),
        plan_elapsed_s: None,
        status: VehicleStatus::default(),
        timestamp: Utc::now(),
    }
}

fn mission() -> Plan {
    Plan::from_points(
        "loop-test",
        vec![
            NavPoint::new(Position::new(37.1, -76.4, 0.0), 0.0),
            NavPoint::new(Position::new(37.1, -76.399, 30.0), 20.0),
        ],
    )
    .unwrap()
}

fn settings(params: &MonitorParams) -> LoopSettings {
    LoopSettings {
        period: Duration::from_millis(10),
        traffic_stale_after: Duration::from_secs(3),
        params: params.clone(),
    }
}

/// Run the loop on a thread for `duration`, then stop it.
fn run_for(
    state: Arc<SharedState>,
    link: SharedLink,
    duration: Duration,
) -> FlightPhase {
    let params = MonitorParams::default();
    let fms = FlightStateMachine::new(params.clone(), link, SeparationBands::from_params(&params));
    let running = Arc::new(AtomicBool::new(true));

    let handle = thread::spawn({
        let running = running.clone();
        let settings = settings(&params);
        move || run_control_loop(state, fms, settings, running)
    });
    thread::sleep(duration);
    running.store(false, Ordering::SeqCst);
    handle.join().unwrap()
}

#[test]
fn test_loop_waits_for_telemetry() {
    let state = Arc::new(SharedState::new());
    state.set_mission(mission());
    state.signal(MissionSignal::Start { start_index: 1 });

    let link = SharedLink::default();
    let phase = run_for(state.clone(), link.clone(), Duration::from_millis(100));

    // No snapshot without telemetry, so the signal is never consumed.
    assert_eq!(phase, FlightPhase::Idle);
    assert!(link.sent.lock().unwrap().is_empty());
}

#[test]
fn test_loop_applies_mission_and_takes_off() {
    let state = Arc::new(SharedState::new());
    state.update_telemetry(ground_telemetry());
    state.set_mission(mission());
    state.signal(MissionSignal::Start { start_index: 1 });

    let link = SharedLink::default();
    let phase = run_for(state.clone(), link.clone(), Duration::from_millis(150));

    // Still on the ground, so the climb never completes.
    assert_eq!(phase, FlightPhase::Climb);
    let sent = link.sent.lock().unwrap().clone();
    assert_eq!(
        sent,
        vec![
            VehicleCommand::SetMode {
                mode: FlightMode::Guided
            },
            VehicleCommand::Arm,
            VehicleCommand::Takeoff {
                altitude_m: MonitorParams::default().takeoff_alt_m
            },
        ]
    );
    assert!(state.take_updates().is_empty());
}

#[test]
fn test_loop_survives_bad_fence() {
    let state = Arc::new(SharedState::new());
    state.update_telemetry(ground_telemetry());
    state.add_fence(FenceDefinition {
        id: 9,
        fence_type: FenceType::KeepOut,
        floor_m: 50.0,
        ceiling_m: 10.0,
        vertices: vec![[37.1, -76.4], [37.2, -76.4]],
    });

    let phase = run_for(state.clone(), SharedLink::default(), Duration::from_millis(50));
    assert_eq!(phase, FlightPhase::Idle);
    assert!(state.take_updates().is_empty());
}
