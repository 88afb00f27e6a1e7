//! # Ledger Arena Server
//!
//! Host-authoritative synchronization and PvP battle resolution for an
//! elimination session of up to 8 participants.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    LEDGER ARENA SERVER                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── rng.rs      - Xorshift128+ PRNG + seed derivation       │
//! │  └── hash.rs     - State hashing for desync detection        │
//! │                                                              │
//! │  game/           - Session logic (deterministic)             │
//! │  ├── state.rs    - Session, participants, ownership          │
//! │  ├── timer.rs    - Round countdown state machine             │
//! │  ├── pairing.rs  - Seeded pairing with no-repeat rule        │
//! │  ├── battle.rs   - Battle FSM + pure resolution              │
//! │  ├── roster.rs   - Elimination and winner detection          │
//! │  └── tick.rs     - Authoritative per-tick advance            │
//! │                                                              │
//! │  network/        - Networking (non-deterministic)            │
//! │  ├── server.rs   - WebSocket edge, per-connection loops      │
//! │  ├── protocol.rs - Message catalog + sequencing              │
//! │  ├── transport.rs- Guards, queues, intents                   │
//! │  └── coordinator - Single-writer session owner               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority Model
//!
//! The host's coordinator task is the only writer of session state. Every
//! client connection feeds one ordered intent queue; a client's claims are
//! only ever accepted about its own participant. Pairing shuffles and
//! battle rolls derive from seeds broadcast at match start, so clients can
//! replay them - but on any divergence the host's broadcast is canonical.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use crate::core::rng::DeterministicRng;
pub use crate::game::state::{SessionState, SessionPhase, Participant, ParticipantId};
pub use crate::game::battle::{BattleMove, BattleOutcome, resolve_battle};
pub use crate::network::server::{ArenaConfig, ArenaServer};
pub use crate::network::coordinator::LocalHandle;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Simulation tick rate (Hz)
pub const TICK_RATE: u32 = 20;

/// Total participant capacity (7 clients plus the host's own seat)
pub const MAX_PARTICIPANTS: usize = 8;

/// Inbound client connection slots
pub const CLIENT_CAPACITY: usize = 7;

/// Lives each participant starts with
pub const STARTING_LIVES: u8 = 2;

/// Round countdown duration (seconds)
pub const ROUND_DURATION_SECS: u32 = 90;

/// Battle move-selection window (seconds)
pub const MOVE_DEADLINE_SECS: u32 = 30;
