//! Transport Plumbing
//!
//! Per-connection pieces between the WebSocket edge and the coordinator:
//! the inbound guard (sender authentication, sequencing, violation
//! escalation) and the outbound queue (bounded, fire-and-forget; overflow
//! on a slow client disconnects that client only). Nothing here ever
//! blocks the coordinator's processing loop.

use tokio::sync::{mpsc, oneshot};

use crate::game::state::ParticipantId;
use crate::network::protocol::{
    decode_client_frame, ClientMessage, JoinAccepted, JoinRequest, ProtocolViolation,
    RejectReason, SequenceTracker, ServerEnvelope, ServerMessage, UNASSIGNED_SENDER,
};

/// Default outbound queue depth per connection.
pub const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Default violation count that escalates to disconnection.
pub const MAX_VIOLATIONS: u32 = 8;

// =============================================================================
// INTENTS
// =============================================================================

/// One unit of work for the coordinator's single ordered inbound queue.
#[derive(Debug)]
pub enum Intent {
    /// Join handshake from a fresh connection.
    Hello {
        /// The request.
        request: JoinRequest,
        /// Where this connection's broadcasts go.
        outbound: mpsc::Sender<ServerEnvelope>,
        /// Handshake reply channel back to the connection task.
        reply: oneshot::Sender<Result<JoinAccepted, RejectReason>>,
    },

    /// Validated message from an authenticated participant.
    Message {
        /// Authenticated sender.
        participant: ParticipantId,
        /// Envelope sequence (echoed in rejections).
        seq: u64,
        /// The message.
        msg: ClientMessage,
    },

    /// The connection's socket closed or its violations escalated.
    ConnectionClosed {
        /// Affected participant.
        participant: ParticipantId,
    },

    /// Host-only: start the match (arrives over the local loop-back).
    StartMatch {
        /// Result back to the host surface.
        reply: oneshot::Sender<Result<(), RejectReason>>,
    },

    /// Host-only: end the session for everyone.
    Shutdown {
        /// Operator-facing reason.
        reason: String,
    },
}

// =============================================================================
// OUTBOUND QUEUE
// =============================================================================

/// Send-side failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OutboundError {
    /// Bounded queue is full; the client is too slow to keep up.
    #[error("Outbound queue full")]
    QueueFull,

    /// Writer task is gone.
    #[error("Connection closed")]
    Closed,
}

/// Fire-and-forget sender for one connection.
///
/// Wraps every message in a host envelope with its own monotonic sequence.
/// `try_send` never awaits; a full queue is reported so the coordinator can
/// disconnect the slow client without stalling anyone else.
#[derive(Debug)]
pub struct Outbound {
    tx: mpsc::Sender<ServerEnvelope>,
    host_slot: u8,
    seq: u64,
}

impl Outbound {
    /// Wrap a connection's writer channel.
    pub fn new(tx: mpsc::Sender<ServerEnvelope>, host_slot: u8) -> Self {
        Self { tx, host_slot, seq: 0 }
    }

    /// Queue a message without blocking.
    pub fn try_send(&mut self, msg: ServerMessage) -> Result<(), OutboundError> {
        self.seq += 1;
        let envelope = ServerEnvelope { sender: self.host_slot, seq: self.seq, msg };
        self.tx.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => OutboundError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => OutboundError::Closed,
        })
    }

    /// Sequence of the last queued message.
    pub fn last_seq(&self) -> u64 {
        self.seq
    }
}

// =============================================================================
// CONNECTION GUARD
// =============================================================================

/// Outcome of ingesting one frame.
#[derive(Debug)]
pub enum Ingest {
    /// First join on this connection; forward as a `Hello` intent.
    Join(JoinRequest),

    /// Validated message from the authenticated sender.
    Message {
        /// Envelope sequence.
        seq: u64,
        /// The message.
        msg: ClientMessage,
    },

    /// Duplicate or regressed sequence; dropped idempotently.
    Discard,

    /// Violation recorded; frame dropped, connection stays up.
    Violation(ProtocolViolation),

    /// Violation limit reached; the connection must be dropped.
    Escalate(ProtocolViolation),
}

/// Per-connection inbound validation state.
///
/// Owned by the connection's read task; the coordinator never sees invalid
/// traffic. A client cannot impersonate another id because the guard pins
/// the slot assigned during its own handshake.
#[derive(Debug)]
pub struct ConnectionGuard {
    assigned: Option<ParticipantId>,
    tracker: SequenceTracker,
    violations: u32,
    max_violations: u32,
}

impl ConnectionGuard {
    /// Create a guard for a fresh connection.
    pub fn new(max_violations: u32) -> Self {
        Self {
            assigned: None,
            tracker: SequenceTracker::new(),
            violations: 0,
            max_violations,
        }
    }

    /// Pin the slot the coordinator assigned during the handshake.
    pub fn assign(&mut self, id: ParticipantId) {
        self.assigned = Some(id);
    }

    /// The authenticated slot, once assigned.
    pub fn participant(&self) -> Option<ParticipantId> {
        self.assigned
    }

    /// Violations recorded so far.
    pub fn violations(&self) -> u32 {
        self.violations
    }

    /// Validate one already-framed payload.
    pub fn ingest(&mut self, payload: &[u8]) -> Ingest {
        let envelope = match decode_client_frame(payload) {
            Ok(env) => env,
            Err(violation) => return self.record(violation),
        };

        match (&envelope.msg, self.assigned) {
            (ClientMessage::Join(_), Some(_)) => self.record(ProtocolViolation::AlreadyJoined),
            (ClientMessage::Join(request), None) => {
                if envelope.sender != UNASSIGNED_SENDER {
                    return self.record(ProtocolViolation::SpoofedSender {
                        claimed: envelope.sender,
                        expected: UNASSIGNED_SENDER,
                    });
                }
                if !self.tracker.accept(envelope.seq) {
                    return Ingest::Discard;
                }
                Ingest::Join(request.clone())
            }
            (_, None) => self.record(ProtocolViolation::NotJoined),
            (_, Some(id)) => {
                if envelope.sender != id.0 {
                    return self.record(ProtocolViolation::SpoofedSender {
                        claimed: envelope.sender,
                        expected: id.0,
                    });
                }
                if !self.tracker.accept(envelope.seq) {
                    return Ingest::Discard;
                }
                Ingest::Message { seq: envelope.seq, msg: envelope.msg }
            }
        }
    }

    fn record(&mut self, violation: ProtocolViolation) -> Ingest {
        self.violations += 1;
        if self.violations >= self.max_violations {
            Ingest::Escalate(violation)
        } else {
            Ingest::Violation(violation)
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
