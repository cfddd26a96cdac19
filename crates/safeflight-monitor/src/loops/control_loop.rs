//! Fixed-rate control loop.
//!
//! Runs on a blocking thread: applies pending mission/fence updates, takes
//! one snapshot of shared state and advances the flight state machine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use safeflight_core::{
    CommandLink, DaaCapability, FlightPhase, FlightStateMachine, GeoFence, MonitorParams,
};

use crate::state::SharedState;

/// Settings the loop needs from [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub period: Duration,
    pub traffic_stale_after: Duration,
    pub params: MonitorParams,
}

/// Run until `running` clears or the machine terminates; returns the final
/// phase.
pub fn run_control_loop<L, D>(
    state: Arc<SharedState>,
    mut fms: FlightStateMachine<L, D>,
    settings: LoopSettings,
    running: Arc<AtomicBool>,
) -> FlightPhase
where
    L: CommandLink,
    D: DaaCapability,
{
    let started = Instant::now();
    let mut next_tick = started;
    let mut cycles: u64 = 0;
    let mut telemetry_stale = false;

    tracing::info!(
        "Control loop running every {} ms",
        settings.period.as_millis()
    );

    while running.load(Ordering::SeqCst) {
        apply_updates(&state, &mut fms, &settings.params);

        let now = Utc::now();
        let stale = state
            .last_telemetry_at()
            .and_then(|at| (now - at).to_std().ok())
            .is_some_and(|age| age > settings.traffic_stale_after);
        if stale != telemetry_stale {
            if stale {
                tracing::warn!("Telemetry is stale");
            } else {
                tracing::info!("Telemetry resumed");
            }
            telemetry_stale = stale;
        }

        let time_s = started.elapsed().as_secs_f64();
        if let Some(snapshot) = state.snapshot(time_s, now, settings.traffic_stale_after) {
            let report = fms.run_cycle(&snapshot);
            cycles += 1;
            if !report.failures.is_empty() {
                tracing::warn!(
                    "Cycle {}: {} command(s) failed",
                    cycles,
                    report.failures.len()
                );
            }
            tracing::debug!(
                "Cycle {}: phase {:?}, resolve {:?}, {} conflict(s), mission wp {}",
                cycles,
                report.phase,
                report.resolve_state,
                report.conflict_count,
                report.mission_index
            );
            if report.phase == FlightPhase::Terminate {
                tracing::info!("Flight terminated after {} cycles", cycles);
                break;
            }
        }

        next_tick += settings.period;
        let now = Instant::now();
        if next_tick > now {
            std::thread::sleep(next_tick - now);
        } else {
            // Overran; do not try to catch up.
            next_tick = now;
        }
    }

    fms.phase()
}

fn apply_updates<L, D>(state: &SharedState, fms: &mut FlightStateMachine<L, D>, params: &MonitorParams)
where
    L: CommandLink,
    D: DaaCapability,
{
    let updates = state.take_updates();
    if updates.is_empty() {
        return;
    }
    if let Some(plan) = updates.mission {
        fms.load_mission(plan);
    }
    for definition in updates.fences {
        match GeoFence::from_definition(&definition, params) {
            Ok(fence) => fms.add_fence(fence),
            Err(e) => tracing::error!("Fence {} rejected: {}", definition.id, e),
        }
    }
}
