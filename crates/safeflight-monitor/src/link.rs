//! Command link with bounded acknowledgement waits.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use safeflight_core::{CommandAck, CommandError, CommandLink, VehicleCommand};
use tokio::sync::mpsc::UnboundedSender;

/// Forwards commands to the egress task and waits on the ack channel.
///
/// Used from the blocking control thread only.
pub struct ChannelLink {
    commands: UnboundedSender<VehicleCommand>,
    acks: Receiver<CommandAck>,
    timeout: Duration,
}

impl ChannelLink {
    pub fn new(
        commands: UnboundedSender<VehicleCommand>,
        acks: Receiver<CommandAck>,
        timeout: Duration,
    ) -> Self {
        Self {
            commands,
            acks,
            timeout,
        }
    }
}

impl CommandLink for ChannelLink {
    fn send(&mut self, command: VehicleCommand) -> Result<(), CommandError> {
        // Acks left over from earlier timed-out commands.
        while let Ok(stale) = self.acks.try_recv() {
            tracing::debug!("Discarding late ack for {:?}", stale.command);
        }

        self.commands
            .send(command.clone())
            .map_err(|_| CommandError::LinkClosed)?;

        let started = Instant::now();
        let deadline = started + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.acks.recv_timeout(remaining) {
                Ok(ack) if ack.command == command => return ack.into_result(),
                Ok(other) => {
                    tracing::debug!("Ignoring ack for {:?}", other.command);
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(CommandError::Timeout {
                        command,
                        waited_ms: started.elapsed().as_millis() as u64,
                    });
                }
                Err(RecvTimeoutError::Disconnected) => return Err(CommandError::LinkClosed),
            }
        }
    }
}
