//! Shared vehicle/mission state behind one coarse lock.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use safeflight_core::{
    CycleSnapshot, FenceDefinition, MissionSignal, OwnshipState, Plan, TrafficTrack, VehicleStatus,
};

use crate::ingest::TelemetryMessage;

/// Mission and fence updates the control thread has not applied yet.
#[derive(Debug, Default)]
pub struct PendingUpdates {
    pub mission: Option<Plan>,
    pub fences: Vec<FenceDefinition>,
}

impl PendingUpdates {
    pub fn is_empty(&self) -> bool {
        self.mission.is_none() && self.fences.is_empty()
    }
}

#[derive(Debug, Default)]
struct Inner {
    ownship: Option<OwnshipState>,
    status: VehicleStatus,
    plan_elapsed_s: Option<f64>,
    telemetry_at: Option<DateTime<Utc>>,
    traffic: Vec<TrafficTrack>,
    traffic_at: Option<DateTime<Utc>>,
    signal: Option<MissionSignal>,
    pending: PendingUpdates,
}

/// State written by the ingest task and read once per control cycle.
#[derive(Debug, Default)]
pub struct SharedState {
    inner: Mutex<Inner>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicked writer leaves plain data behind; keep serving it.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn update_telemetry(&self, telemetry: TelemetryMessage) {
        let mut inner = self.lock();
        inner.ownship = Some(OwnshipState::new(
            telemetry.position,
            telemetry.velocity,
            0.0,
        ));
        inner.status = telemetry.status;
        inner.plan_elapsed_s = telemetry.plan_elapsed_s;
        inner.telemetry_at = Some(telemetry.timestamp);
    }

    pub fn update_traffic(&self, tracks: Vec<TrafficTrack>, received_at: DateTime<Utc>) {
        let mut inner = self.lock();
        inner.traffic = tracks;
        inner.traffic_at = Some(received_at);
    }

    pub fn set_mission(&self, plan: Plan) {
        self.lock().pending.mission = Some(plan);
    }

    pub fn add_fence(&self, fence: FenceDefinition) {
        self.lock().pending.fences.push(fence);
    }

    /// Latest signal wins; a stop is never replaced by a later start.
    pub fn signal(&self, signal: MissionSignal) {
        let mut inner = self.lock();
        if inner.signal != Some(MissionSignal::Stop) {
            inner.signal = Some(signal);
        }
    }

    pub fn take_updates(&self) -> PendingUpdates {
        std::mem::take(&mut self.lock().pending)
    }

    pub fn last_telemetry_at(&self) -> Option<DateTime<Utc>> {
        self.lock().telemetry_at
    }

    /// One consistent read for the control cycle at `time_s`. Consumes any
    /// pending signal. None until the first telemetry arrives.
    pub fn snapshot(
        &self,
        time_s: f64,
        now: DateTime<Utc>,
        traffic_stale_after: Duration,
    ) -> Option<CycleSnapshot> {
        let mut inner = self.lock();
        let mut ownship = inner.ownship?;
        ownship.time_s = time_s;

        let traffic_fresh = inner
            .traffic_at
            .and_then(|at| (now - at).to_std().ok().or(Some(Duration::ZERO)))
            .map(|age| age <= traffic_stale_after)
            .unwrap_or(false);
        let traffic = if traffic_fresh {
            inner.traffic.clone()
        } else {
            Vec::new()
        };

        let mut snapshot = CycleSnapshot::new(time_s, ownship);
        snapshot.traffic = traffic;
        snapshot.status = inner.status.clone();
        snapshot.plan_elapsed_s = inner.plan_elapsed_s;
        snapshot.signal = inner.signal.take();
        Some(snapshot)
    }
}
