//! Command link acknowledgement handling.

use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::{Duration, Instant};

use safeflight_core::{AckStatus, CommandAck, CommandError, CommandLink, VehicleCommand};
use safeflight_monitor::link::ChannelLink;
use tokio::sync::mpsc;

/// Answer every forwarded command with `status` from a background thread.
fn responder(
    mut commands: mpsc::UnboundedReceiver<VehicleCommand>,
    acks: std_mpsc::Sender<CommandAck>,
    status: AckStatus,
) -> thread::JoinHandle<usize> {
    thread::spawn(move || {
        let mut answered = 0;
        while let Some(command) = commands.blocking_recv() {
            if acks.send(CommandAck::new(command, status)).is_err() {
                break;
            }
            answered += 1;
        }
        answered
    })
}

#[test]
fn test_accepted_command() {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (ack_tx, ack_rx) = std_mpsc::channel();
    let handle = responder(cmd_rx, ack_tx, AckStatus::Accepted);

    let mut link = ChannelLink::new(cmd_tx, ack_rx, Duration::from_secs(1));
    assert!(link.send(VehicleCommand::Arm).is_ok());
    assert!(link
        .send(VehicleCommand::Takeoff { altitude_m: 30.0 })
        .is_ok());

    drop(link);
    assert_eq!(handle.join().unwrap(), 2);
}

#[test]
fn test_rejected_and_denied_commands() {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (ack_tx, ack_rx) = std_mpsc::channel();
    let _handle = responder(cmd_rx, ack_tx, AckStatus::Failed);
    let mut link = ChannelLink::new(cmd_tx, ack_rx, Duration::from_secs(1));
    assert_eq!(
        link.send(VehicleCommand::Arm),
        Err(CommandError::Rejected(VehicleCommand::Arm))
    );

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (ack_tx, ack_rx) = std_mpsc::channel();
    let _handle = responder(cmd_rx, ack_tx, AckStatus::Denied);
    let mut link = ChannelLink::new(cmd_tx, ack_rx, Duration::from_secs(1));
    assert_eq!(
        link.send(VehicleCommand::Arm),
        Err(CommandError::AccessDenied(VehicleCommand::Arm))
    );
}

#[test]
fn test_missing_ack_times_out() {
    let (cmd_tx, _cmd_rx) = mpsc::unbounded_channel();
    let (_ack_tx, ack_rx) = std_mpsc::channel::<CommandAck>();
    let mut link = ChannelLink::new(cmd_tx, ack_rx, Duration::from_millis(50));

    let started = Instant::now();
    let result = link.send(VehicleCommand::Arm);
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert!(started.elapsed() < Duration::from_secs(1));
    match result {
        Err(CommandError::Timeout { command, waited_ms }) => {
            assert_eq!(command, VehicleCommand::Arm);
            assert!(waited_ms >= 50);
        }
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[test]
fn test_ack_for_other_command_is_ignored() {
    let (cmd_tx, _cmd_rx) = mpsc::unbounded_channel();
    let (ack_tx, ack_rx) = std_mpsc::channel();
    let mut link = ChannelLink::new(cmd_tx, ack_rx, Duration::from_millis(200));

    let sender = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        ack_tx
            .send(CommandAck::new(
                VehicleCommand::SetMissionCurrent { index: 4 },
                AckStatus::Accepted,
            ))
            .unwrap();
        thread::sleep(Duration::from_millis(20));
        ack_tx
            .send(CommandAck::new(VehicleCommand::Arm, AckStatus::Accepted))
            .unwrap();
    });

    assert!(link.send(VehicleCommand::Arm).is_ok());
    sender.join().unwrap();
}

#[test]
fn test_closed_egress_reports_link_closed() {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    drop(cmd_rx);
    let (_ack_tx, ack_rx) = std_mpsc::channel::<CommandAck>();
    let mut link = ChannelLink::new(cmd_tx, ack_rx, Duration::from_millis(50));
    assert_eq!(link.send(VehicleCommand::Arm), Err(CommandError::LinkClosed));
}
