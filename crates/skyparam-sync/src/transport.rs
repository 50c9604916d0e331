//! # Link Transport
//!
//! Channel pair connecting the engine to whatever actually talks to the
//! vehicle (a telemetry router, a serial link, or a simulator).
//!
//! ## Topology
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Transport Channels                               │
//! │                                                                         │
//! │   ┌──────────────────┐   ParamCommand    ┌──────────────────────────┐  │
//! │   │                  │ ────────────────► │                          │  │
//! │   │ ParameterEngine  │  TransportHandle  │      LinkEndpoint        │  │
//! │   │  (owner task)    │                   │  (link / simulator task) │  │
//! │   │                  │ ◄──────────────── │                          │  │
//! │   └──────────────────┘  InboundMessage   └──────────────────────────┘  │
//! │                                                                         │
//! │  The engine never waits on the link: a full command queue drops the    │
//! │  command, exactly like a lost radio frame, and the retry timer          │
//! │  re-issues it.                                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::error::{ParamError, ParamResult};
use crate::protocol::{InboundMessage, ParamCommand};

/// Default queue depth in each direction.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Transport Handle (engine side)
// =============================================================================

/// Engine-side sender of outbound commands.
#[derive(Clone)]
pub struct TransportHandle {
    outgoing_tx: mpsc::Sender<ParamCommand>,
}

impl TransportHandle {
    /// Queues a command without waiting.
    ///
    /// A full queue drops the command; the caller's retry logic recovers.
    pub fn send(&self, command: ParamCommand) -> ParamResult<()> {
        debug!(cmd_type = %command.type_name(), component = %command.component(), "Sending command");
        match self.outgoing_tx.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(cmd)) => {
                warn!(cmd_type = %cmd.type_name(), "Link queue full, command dropped");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => {
                Err(ParamError::ChannelError("Link endpoint dropped".into()))
            }
        }
    }

    /// Returns true once the link side has gone away.
    pub fn is_closed(&self) -> bool {
        self.outgoing_tx.is_closed()
    }
}

// =============================================================================
// Link Endpoint (link side)
// =============================================================================

/// Link-side end: receives commands, delivers notifications.
pub struct LinkEndpoint {
    commands_rx: mpsc::Receiver<ParamCommand>,
    inbound_tx: mpsc::Sender<InboundMessage>,
}

impl LinkEndpoint {
    /// Waits for the next command. `None` once the engine is gone.
    pub async fn recv_command(&mut self) -> Option<ParamCommand> {
        self.commands_rx.recv().await
    }

    /// Takes a queued command if there is one.
    pub fn try_recv_command(&mut self) -> Option<ParamCommand> {
        self.commands_rx.try_recv().ok()
    }

    /// Delivers a notification to the engine.
    pub async fn deliver(&self, message: InboundMessage) -> ParamResult<()> {
        self.inbound_tx
            .send(message)
            .await
            .map_err(|_| ParamError::ChannelError("Engine inbound receiver dropped".into()))
    }

    /// Returns a clonable sender for notifications.
    pub fn inbound_sender(&self) -> mpsc::Sender<InboundMessage> {
        self.inbound_tx.clone()
    }
}

/// Creates a connected transport.
///
/// Returns the engine's command handle, the engine's inbound receiver and
/// the link-side endpoint.
pub fn channel(capacity: usize) -> (TransportHandle, mpsc::Receiver<InboundMessage>, LinkEndpoint) {
    let (outgoing_tx, commands_rx) = mpsc::channel(capacity);
    let (inbound_tx, inbound_rx) = mpsc::channel(capacity);

    (
        TransportHandle { outgoing_tx },
        inbound_rx,
        LinkEndpoint {
            commands_rx,
            inbound_tx,
        },
    )
}
