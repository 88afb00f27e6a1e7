//! Deterministic Random Number Generator
//!
//! Uses Xorshift128+ algorithm for fast, high-quality, deterministic randomness.
//! Given the same seed, produces identical sequence on all platforms, which is
//! what lets host and clients replay the same battle rolls independently.

use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};

/// Deterministic PRNG using Xorshift128+ algorithm.
///
/// # Determinism Guarantee
///
/// Given the same seed, this RNG will produce the exact same sequence
/// of random numbers on any platform (x86, ARM, WASM).
///
/// # Example
///
/// ```
/// use ledger_arena::core::rng::DeterministicRng;
///
/// let mut rng = DeterministicRng::new(12345);
/// let value = rng.next_u64();
/// assert_eq!(value, 6233086606872742541); // Always the same!
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the internal state, ensuring
    /// good distribution even from weak seeds.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Ensure state is never all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a random u32.
    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        self.next_u64() as u32
    }

    /// Generate a random integer in range [0, max).
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        // Simple modulo - slight bias for very large max, but acceptable
        (self.next_u64() % max as u64) as u32
    }

    /// Generate a random integer in range [min, max].
    #[inline]
    pub fn next_int_range(&mut self, min: i32, max: i32) -> i32 {
        if min >= max {
            return min;
        }
        let range = (max - min + 1) as u32;
        min + self.next_int(range) as i32
    }

    /// Roll one die with the given number of sides, yielding [1, sides].
    #[inline]
    pub fn roll_die(&mut self, sides: u32) -> i32 {
        if sides == 0 {
            return 0;
        }
        self.next_int(sides) as i32 + 1
    }

    /// Roll `count` dice with the given number of sides and sum the results.
    pub fn roll_dice(&mut self, count: u32, sides: u32) -> i32 {
        (0..count).map(|_| self.roll_die(sides)).sum()
    }

    /// Shuffle a slice in place using Fisher-Yates algorithm.
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        let len = slice.len();
        for i in (1..len).rev() {
            let j = self.next_int((i + 1) as u32) as usize;
            slice.swap(i, j);
        }
    }

    /// Select a random element from a slice.
    pub fn choose<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            None
        } else {
            let idx = self.next_int(slice.len() as u32) as usize;
            Some(&slice[idx])
        }
    }

    /// Get current state (for checkpointing/debugging).
    pub fn state(&self) -> [u64; 2] {
        self.state
    }

    /// Restore from saved state.
    pub fn set_state(&mut self, state: [u64; 2]) {
        self.state = state;
    }
}

/// SplitMix64 for seed initialization.
/// Produces well-distributed values from sequential seeds.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive the session seed from the session id and the joined roster.
///
/// The seed is fixed at `MATCH_START` and broadcast to every client, so any
/// participant can replay the host's rolls. Hashing the sorted roster into
/// the seed means neither the host's session id alone nor any single client
/// chooses it.
///
/// # Parameters
///
/// - `session_id`: unique per session (UUID bytes)
/// - `participant_ids`: all participant ids at match start (MUST be sorted)
pub fn derive_session_seed(session_id: &[u8; 16], participant_ids: &[u8]) -> u64 {
    let mut hasher = Sha256::new();

    // Domain separator
    hasher.update(b"LEDGER_ARENA_SEED_V1");

    hasher.update(session_id);

    // Participant ids (sorted for determinism)
    // IMPORTANT: Caller must ensure participant_ids is sorted!
    hasher.update(participant_ids);

    let hash = hasher.finalize();
    u64::from_le_bytes(hash[0..8].try_into().unwrap())
}

/// Derive the per-round pairing seed from the session seed.
pub fn derive_round_seed(session_seed: u64, round: u32) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(b"LEDGER_ARENA_ROUND_V1");
    hasher.update(session_seed.to_le_bytes());
    hasher.update(round.to_le_bytes());

    let hash = hasher.finalize();
    u64::from_le_bytes(hash[0..8].try_into().unwrap())
}

/// Derive the result seed for one battle instance.
///
/// Fixed per instance; host and both combatants compute identical rolls
/// from it. The pair is normalized (low id, high id) by the caller.
pub fn derive_battle_seed(session_seed: u64, round: u32, side_a: u8, side_b: u8) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(b"LEDGER_ARENA_BATTLE_V1");
    hasher.update(session_seed.to_le_bytes());
    hasher.update(round.to_le_bytes());
    hasher.update([side_a, side_b]);

    let hash = hasher.finalize();
    u64::from_le_bytes(hash[0..8].try_into().unwrap())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_determinism() {
        // Same seed must produce same sequence
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(12345);

        for _ in 0..1000 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_rng_different_seeds() {
        // Different seeds produce different sequences
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(54321);

        // Very unlikely to match
        assert_ne!(rng1.next_u64(), rng2.next_u64());
    }

    #[test]
    fn test_rng_known_values() {
        // Verify specific output for regression testing
        let mut rng = DeterministicRng::new(42);
        let val1 = rng.next_u64();
        let val2 = rng.next_u64();
        let val3 = rng.next_u64();

        // These values must never change!
        // If they do, recorded battle replays will break.
        assert_eq!(val1, 16629283624882167704);
        assert_eq!(val2, 1420492921613871959);
        assert_eq!(val3, 9768315062676884790);
    }

    #[test]
    fn test_next_int() {
        let mut rng = DeterministicRng::new(1234);

        // Test range
        for _ in 0..1000 {
            let val = rng.next_int(100);
            assert!(val < 100);
        }

        // Edge case: max = 0
        assert_eq!(rng.next_int(0), 0);

        // Edge case: max = 1
        assert_eq!(rng.next_int(1), 0);
    }

    #[test]
    fn test_next_int_range() {
        let mut rng = DeterministicRng::new(5678);

        for _ in 0..1000 {
            let val = rng.next_int_range(-10, 10);
            assert!(val >= -10 && val <= 10);
        }

        // Edge case: min = max
        assert_eq!(rng.next_int_range(5, 5), 5);
    }

    #[test]
    fn test_roll_die() {
        let mut rng = DeterministicRng::new(9999);

        for _ in 0..1000 {
            let val = rng.roll_die(20);
            assert!((1..=20).contains(&val));
        }

        // Degenerate dice
        assert_eq!(rng.roll_die(0), 0);
        assert_eq!(rng.roll_die(1), 1);
    }

    #[test]
    fn test_roll_dice_sum() {
        let mut rng = DeterministicRng::new(7777);

        for _ in 0..500 {
            let val = rng.roll_dice(2, 6);
            assert!((2..=12).contains(&val));
        }

        assert_eq!(rng.roll_dice(0, 6), 0);
    }

    #[test]
    fn test_shuffle_determinism() {
        let mut rng1 = DeterministicRng::new(1111);
        let mut rng2 = DeterministicRng::new(1111);

        let mut arr1 = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        let mut arr2 = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];

        rng1.shuffle(&mut arr1);
        rng2.shuffle(&mut arr2);

        assert_eq!(arr1, arr2);
    }

    #[test]
    fn test_derive_session_seed() {
        let session_id = [1u8; 16];
        let roster = [0u8, 1, 2, 3];

        let seed1 = derive_session_seed(&session_id, &roster);
        let seed2 = derive_session_seed(&session_id, &roster);

        // Same inputs = same seed
        assert_eq!(seed1, seed2);

        // Different input = different seed
        let other_session = [99u8; 16];
        let seed3 = derive_session_seed(&other_session, &roster);
        assert_ne!(seed1, seed3);

        let other_roster = [0u8, 1, 2];
        let seed4 = derive_session_seed(&session_id, &other_roster);
        assert_ne!(seed1, seed4);
    }

    #[test]
    fn test_derive_round_and_battle_seeds() {
        let session_seed = 0xDEADBEEF;

        // Round seeds differ per round
        assert_ne!(
            derive_round_seed(session_seed, 1),
            derive_round_seed(session_seed, 2)
        );

        // Battle seeds differ per pair and per round
        assert_ne!(
            derive_battle_seed(session_seed, 1, 0, 1),
            derive_battle_seed(session_seed, 1, 2, 3)
        );
        assert_ne!(
            derive_battle_seed(session_seed, 1, 0, 1),
            derive_battle_seed(session_seed, 2, 0, 1)
        );

        // And are stable
        assert_eq!(
            derive_battle_seed(session_seed, 1, 0, 1),
            derive_battle_seed(session_seed, 1, 0, 1)
        );
    }

    #[test]
    fn test_state_checkpoint() {
        let mut rng = DeterministicRng::new(5555);

        // Advance some
        for _ in 0..50 {
            rng.next_u64();
        }

        // Save state
        let saved_state = rng.state();

        // Advance more
        let next_values: Vec<u64> = (0..10).map(|_| rng.next_u64()).collect();

        // Restore state
        rng.set_state(saved_state);

        // Should produce same values again
        for expected in next_values {
            assert_eq!(rng.next_u64(), expected);
        }
    }
}
