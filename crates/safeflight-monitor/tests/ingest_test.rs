//! Ingest and egress stream tests.

use std::sync::{mpsc as std_mpsc, Arc};
use std::time::Duration;

use chrono::Utc;
use safeflight_core::{AckStatus, FenceType, FlightMode, MissionSignal, VehicleCommand};
use safeflight_monitor::ingest::{run_egress, run_ingest, InboundMessage};
use safeflight_monitor::state::SharedState;
use tokio::sync::{broadcast, mpsc};

const STREAM: &str = r#"
{"type":"telemetry","position":{"lat":37.1,"lon":-76.4,"altitude_m":30.0},"velocity":{"track_deg":90.0,"ground_speed_mps":5.0,"vertical_speed_mps":0.0},"plan_elapsed_s":4.0}
this is not json
{"type":"mission","id":"survey","waypoints":[{"position":{"lat":37.1,"lon":-76.4,"altitude_m":0.0},"time_s":0.0},{"position":{"lat":37.1,"lon":-76.399,"altitude_m":30.0},"time_s":20.0}]}
{"type":"mission","id":"backwards","waypoints":[{"position":{"lat":37.1,"lon":-76.4,"altitude_m":0.0},"time_s":5.0},{"position":{"lat":37.1,"lon":-76.399,"altitude_m":30.0},"time_s":1.0}]}
{"type":"fence","id":3,"fence_type":"KEEP_OUT","floor_m":0.0,"ceiling_m":100.0,"vertices":[[37.1,-76.4],[37.101,-76.4],[37.101,-76.399]]}
{"type":"start"}
{"type":"ack","command":{"type":"ARM"},"status":"accepted"}
"#;

#[tokio::test]
async fn test_ingest_routes_messages() {
    let state = Arc::new(SharedState::new());
    let (ack_tx, ack_rx) = std_mpsc::channel();
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

    run_ingest(STREAM.as_bytes(), state.clone(), ack_tx, shutdown_rx).await;

    let updates = state.take_updates();
    // The backwards mission is rejected and leaves the earlier one pending.
    let mission = updates.mission.expect("mission pending");
    assert_eq!(mission.id, "survey");
    assert_eq!(mission.len(), 2);
    assert_eq!(updates.fences.len(), 1);
    assert_eq!(updates.fences[0].fence_type, FenceType::KeepOut);

    let snapshot = state
        .snapshot(1.0, Utc::now(), Duration::from_secs(3))
        .expect("telemetry received");
    assert_eq!(snapshot.plan_elapsed_s, Some(4.0));
    assert_eq!(snapshot.signal, Some(MissionSignal::Start { start_index: 1 }));

    let ack = ack_rx.try_recv().expect("ack forwarded");
    assert_eq!(ack.command, VehicleCommand::Arm);
    assert_eq!(ack.status, AckStatus::Accepted);
}

#[tokio::test]
async fn test_ingest_stops_on_shutdown() {
    let state = Arc::new(SharedState::new());
    let (ack_tx, _ack_rx) = std_mpsc::channel();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    // A reader that never yields a line.
    let (_keep_open, reader) = tokio::io::duplex(64);
    let task = tokio::spawn(run_ingest(
        tokio::io::BufReader::new(reader),
        state,
        ack_tx,
        shutdown_rx,
    ));
    shutdown_tx.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("ingest exits")
        .unwrap();
}

#[tokio::test]
async fn test_egress_writes_json_lines() {
    let (tx, rx) = mpsc::unbounded_channel();
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

    tx.send(VehicleCommand::SetMode {
        mode: FlightMode::Guided,
    })
    .unwrap();
    tx.send(VehicleCommand::SetMissionCurrent { index: 2 }).unwrap();
    drop(tx);

    let written = run_egress(Vec::new(), rx, shutdown_rx).await.unwrap();
    let text = String::from_utf8(written).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);

    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["type"], "SET_MODE");
    assert_eq!(first["mode"], "GUIDED");
    let second: VehicleCommand = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(second, VehicleCommand::SetMissionCurrent { index: 2 });
}

#[test]
fn test_stop_message_parses() {
    let message: InboundMessage = serde_json::from_str(r#"{"type":"stop"}"#).unwrap();
    assert_eq!(message, InboundMessage::Stop);

    let message: InboundMessage =
        serde_json::from_str(r#"{"type":"start","start_index":3}"#).unwrap();
    assert_eq!(message, InboundMessage::Start { start_index: 3 });
}
