//! Network Layer
//!
//! WebSocket edge, typed protocol, and the coordinator task. This layer is
//! **non-deterministic** - all session logic runs through `game/`.

pub mod protocol;
pub mod transport;
pub mod spectate;
pub mod coordinator;
pub mod server;

pub use protocol::{
    ClientMessage, ServerMessage, ClientEnvelope, ServerEnvelope, JoinRequest, JoinAccepted,
    RejectReason, ProtocolViolation, SequenceTracker, FullSync, PROTOCOL_VERSION,
};
pub use transport::{ConnectionGuard, Ingest, Intent, Outbound, OutboundError};
pub use spectate::SpectatorRouter;
pub use coordinator::{CoordinatorConfig, LocalHandle, SessionCoordinator};
pub use server::{ArenaConfig, ArenaServer, ArenaServerError};
