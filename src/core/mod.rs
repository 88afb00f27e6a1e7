//! Core deterministic primitives.
//!
//! All types in this module are designed for perfect cross-platform
//! determinism. They are what allows clients to replay the host's pairing
//! shuffles and battle rolls bit-for-bit.

pub mod rng;
pub mod hash;

// Re-export core types
pub use rng::{DeterministicRng, derive_session_seed, derive_round_seed, derive_battle_seed};
pub use hash::{StateHash, StateHasher, compute_state_hash};
