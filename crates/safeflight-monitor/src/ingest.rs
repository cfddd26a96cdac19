//! JSON-lines ingest and egress.
//!
//! Inbound lines carry telemetry, traffic, mission/fence definitions,
//! start/stop signals and command acknowledgements. Outbound lines carry one
//! vehicle command each.

use std::sync::mpsc as std_mpsc;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};

use safeflight_core::{
    CommandAck, FenceDefinition, MissionSignal, NavPoint, Plan, PlanError, Position, TrafficTrack,
    VehicleCommand, VehicleStatus, Velocity,
};

use crate::state::SharedState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryMessage {
    pub position: Position,
    pub velocity: Velocity,
    #[serde(default)]
    pub plan_elapsed_s: Option<f64>,
    #[serde(default)]
    pub status: VehicleStatus,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Telemetry(TelemetryMessage),
    Traffic {
        tracks: Vec<TrafficTrack>,
    },
    Mission {
        id: String,
        waypoints: Vec<NavPoint>,
    },
    Fence(FenceDefinition),
    Start {
        #[serde(default = "default_start_index")]
        start_index: usize,
    },
    Stop,
    Ack(CommandAck),
}

fn default_start_index() -> usize {
    1
}

/// Route one inbound message into shared state or the ack channel.
pub fn apply_message(
    message: InboundMessage,
    state: &SharedState,
    acks: &std_mpsc::Sender<CommandAck>,
) -> Result<(), PlanError> {
    match message {
        InboundMessage::Telemetry(telemetry) => state.update_telemetry(telemetry),
        InboundMessage::Traffic { tracks } => state.update_traffic(tracks, Utc::now()),
        InboundMessage::Mission { id, waypoints } => {
            let plan = Plan::from_points(id, waypoints)?;
            tracing::info!("Mission {} received ({} waypoints)", plan.id, plan.len());
            state.set_mission(plan);
        }
        InboundMessage::Fence(fence) => {
            tracing::info!("Fence {} received ({:?})", fence.id, fence.fence_type);
            state.add_fence(fence);
        }
        InboundMessage::Start { start_index } => state.signal(MissionSignal::Start { start_index }),
        InboundMessage::Stop => state.signal(MissionSignal::Stop),
        InboundMessage::Ack(ack) => {
            if acks.send(ack).is_err() {
                tracing::debug!("Ack dropped: command link closed");
            }
        }
    }
    Ok(())
}

/// Read JSON lines until EOF or shutdown. Malformed lines are logged and
/// skipped.
pub async fn run_ingest<R>(
    reader: R,
    state: Arc<SharedState>,
    acks: std_mpsc::Sender<CommandAck>,
    mut shutdown: broadcast::Receiver<()>,
) where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Ingest shutting down");
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<InboundMessage>(line) {
                            Ok(message) => {
                                if let Err(e) = apply_message(message, &state, &acks) {
                                    tracing::warn!("Rejected inbound message: {}", e);
                                }
                            }
                            Err(e) => tracing::warn!("Malformed inbound line: {}", e),
                        }
                    }
                    Ok(None) => {
                        tracing::info!("Ingest stream closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("Ingest read failed: {}", e);
                        break;
                    }
                }
            }
        }
    }
}

/// Write each command as one JSON line.
pub async fn run_egress<W>(
    mut writer: W,
    mut commands: mpsc::UnboundedReceiver<VehicleCommand>,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<W>
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Egress shutting down");
                break;
            }
            command = commands.recv() => {
                let Some(command) = command else {
                    break;
                };
                let mut line = serde_json::to_vec(&command).map_err(std::io::Error::other)?;
                line.push(b'\n');
                writer.write_all(&line).await?;
                writer.flush().await?;
            }
        }
    }
    Ok(writer)
}
