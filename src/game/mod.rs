//! Session Logic Module
//!
//! All deterministic session logic. Nothing here touches the network; the
//! coordinator feeds it already-validated intents and relays its events.
//!
//! ## Module Structure
//!
//! - `state`: session, participant, and battle ownership
//! - `timer`: round countdown state machine
//! - `pairing`: seeded pairing with the no-repeat constraint
//! - `battle`: per-pair battle state machine and pure resolution
//! - `roster`: elimination tracking and winner detection
//! - `tick`: authoritative per-tick advance
//! - `events`: events for broadcast and verification

pub mod state;
pub mod timer;
pub mod pairing;
pub mod battle;
pub mod roster;
pub mod tick;
pub mod events;

// Re-export key types
pub use state::{SessionState, SessionPhase, Participant, ParticipantId, Role, CombatProfile};
pub use timer::{MatchTimer, TimerState};
pub use pairing::{PairingStrategy, SeededRandomPairing, RoundPairing};
pub use battle::{BattleInstance, BattleMove, BattlePhase, BattleOutcome, resolve_battle};
pub use tick::{RoundRules, TickResult};
pub use events::{SessionEvent, SessionEventData};
