//! Round Pairing
//!
//! Partitions the alive roster into battle pairs when the round timer
//! expires. The shuffle is seeded per round so the host's pairing can be
//! replayed by any client, and the exact pair from the immediately
//! preceding round is avoided while more than 2 players remain.

use std::collections::BTreeSet;

use crate::core::rng::DeterministicRng;
use crate::game::state::ParticipantId;

/// An opposing pair, normalized to (low id, high id).
pub type Pair = (ParticipantId, ParticipantId);

/// Normalize a pair so comparisons ignore side order.
#[inline]
pub fn ordered_pair(a: ParticipantId, b: ParticipantId) -> Pair {
    if a <= b { (a, b) } else { (b, a) }
}

/// Result of pairing one round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundPairing {
    /// Round this pairing belongs to.
    pub round: u32,
    /// Seed the shuffle ran with (recorded for reproducibility).
    pub seed: u64,
    /// Opposing pairs, each normalized.
    pub pairs: Vec<Pair>,
    /// Unmatched participant on an odd count; advances without a battle.
    pub bye: Option<ParticipantId>,
}

/// Pairing algorithm, replaceable per session.
///
/// The default is a seeded random shuffle with the no-repeat constraint;
/// a score- or position-weighted strategy can be swapped in without
/// touching the coordinator.
pub trait PairingStrategy: Send {
    /// Partition `alive` into pairs (plus at most one bye).
    ///
    /// `previous` holds the normalized pairs of the immediately preceding
    /// round. Every id in `alive` must appear exactly once in the output.
    fn pair_round(
        &self,
        alive: &[ParticipantId],
        previous: &BTreeSet<Pair>,
        round: u32,
        seed: u64,
    ) -> RoundPairing;
}

/// Seeded Fisher-Yates shuffle, adjacent entries paired, last entry byed
/// on odd counts.
///
/// Repeat avoidance is best-effort: a bounded number of reshuffles (each a
/// continuation of the same RNG stream, so still fully reproducible), after
/// which the constraint is waived. With exactly 2 players the constraint is
/// waived outright.
#[derive(Clone, Copy, Debug)]
pub struct SeededRandomPairing {
    /// Reshuffle attempts before the no-repeat rule is waived.
    pub max_reshuffles: u32,
}

impl Default for SeededRandomPairing {
    fn default() -> Self {
        Self { max_reshuffles: 16 }
    }
}

impl SeededRandomPairing {
    fn build(order: &[ParticipantId]) -> (Vec<Pair>, Option<ParticipantId>) {
        let mut pairs = Vec::with_capacity(order.len() / 2);
        for chunk in order.chunks_exact(2) {
            pairs.push(ordered_pair(chunk[0], chunk[1]));
        }
        let bye = if order.len() % 2 == 1 {
            order.last().copied()
        } else {
            None
        };
        (pairs, bye)
    }

    fn repeats_previous(pairs: &[Pair], previous: &BTreeSet<Pair>) -> bool {
        pairs.iter().any(|p| previous.contains(p))
    }
}

impl PairingStrategy for SeededRandomPairing {
    fn pair_round(
        &self,
        alive: &[ParticipantId],
        previous: &BTreeSet<Pair>,
        round: u32,
        seed: u64,
    ) -> RoundPairing {
        let mut rng = DeterministicRng::new(seed);
        let mut order: Vec<ParticipantId> = alive.to_vec();

        rng.shuffle(&mut order);
        let (mut pairs, mut bye) = Self::build(&order);

        // No-repeat only binds above 2 players; below that there is only
        // one possible pairing anyway.
        if alive.len() > 2 {
            let mut attempts = 0;
            while Self::repeats_previous(&pairs, previous) && attempts < self.max_reshuffles {
                rng.shuffle(&mut order);
                let rebuilt = Self::build(&order);
                pairs = rebuilt.0;
                bye = rebuilt.1;
                attempts += 1;
            }
            // Constraint waived after max_reshuffles; the caller logs it.
        }

        RoundPairing { round, seed, pairs, bye }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(raw: &[u8]) -> Vec<ParticipantId> {
        raw.iter().copied().map(ParticipantId).collect()
    }

    /// Every alive participant appears exactly once across pairs and bye.
    fn assert_partition(alive: &[ParticipantId], pairing: &RoundPairing) {
        let mut seen = BTreeSet::new();
        for (a, b) in &pairing.pairs {
            assert!(seen.insert(*a), "{a:?} paired twice");
            assert!(seen.insert(*b), "{b:?} paired twice");
            assert_ne!(a, b, "participant paired with itself");
        }
        if let Some(bye) = pairing.bye {
            assert!(seen.insert(bye), "bye participant also paired");
        }
        let expected: BTreeSet<_> = alive.iter().copied().collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_even_count_no_bye() {
        let alive = ids(&[0, 1, 2, 3, 4, 5, 6, 7]);
        let pairing =
            SeededRandomPairing::default().pair_round(&alive, &BTreeSet::new(), 1, 42);

        assert_eq!(pairing.pairs.len(), 4);
        assert_eq!(pairing.bye, None);
        assert_partition(&alive, &pairing);
    }

    #[test]
    fn test_odd_count_gets_bye() {
        let alive = ids(&[0, 1, 2]);
        let pairing =
            SeededRandomPairing::default().pair_round(&alive, &BTreeSet::new(), 1, 7);

        assert_eq!(pairing.pairs.len(), 1);
        assert!(pairing.bye.is_some());
        assert_partition(&alive, &pairing);
    }

    #[test]
    fn test_deterministic_for_seed() {
        let alive = ids(&[0, 1, 2, 3, 4, 5]);
        let strategy = SeededRandomPairing::default();

        let p1 = strategy.pair_round(&alive, &BTreeSet::new(), 3, 999);
        let p2 = strategy.pair_round(&alive, &BTreeSet::new(), 3, 999);
        assert_eq!(p1, p2);
    }

    #[test]
    fn test_avoids_previous_round_pairs() {
        let alive = ids(&[0, 1, 2, 3]);
        let strategy = SeededRandomPairing::default();

        // Whatever the first round produced becomes forbidden next round.
        let first = strategy.pair_round(&alive, &BTreeSet::new(), 1, 1234);
        let previous: BTreeSet<Pair> = first.pairs.iter().copied().collect();

        for seed in 0..50u64 {
            let next = strategy.pair_round(&alive, &previous, 2, seed);
            assert_partition(&alive, &next);
            for pair in &next.pairs {
                assert!(
                    !previous.contains(pair),
                    "seed {seed}: repeated pair {pair:?}"
                );
            }
        }
    }

    #[test]
    fn test_constraint_waived_for_two_players() {
        let alive = ids(&[3, 5]);
        let strategy = SeededRandomPairing::default();

        let mut previous = BTreeSet::new();
        previous.insert(ordered_pair(ParticipantId(3), ParticipantId(5)));

        // Only one pairing is possible; the repeat must be allowed.
        let pairing = strategy.pair_round(&alive, &previous, 2, 77);
        assert_eq!(pairing.pairs, vec![ordered_pair(ParticipantId(3), ParticipantId(5))]);
        assert_eq!(pairing.bye, None);
    }

    #[test]
    fn test_pairs_are_normalized() {
        let alive = ids(&[7, 2, 5, 0]);
        let pairing =
            SeededRandomPairing::default().pair_round(&alive, &BTreeSet::new(), 1, 5);

        for (a, b) in &pairing.pairs {
            assert!(a < b);
        }
    }

    proptest! {
        #[test]
        fn prop_every_alive_exactly_once(
            raw in proptest::collection::btree_set(0u8..8, 2..=8),
            seed in any::<u64>(),
        ) {
            let alive: Vec<ParticipantId> =
                raw.iter().copied().map(ParticipantId).collect();
            let pairing = SeededRandomPairing::default()
                .pair_round(&alive, &BTreeSet::new(), 1, seed);

            assert_partition(&alive, &pairing);
            prop_assert_eq!(
                pairing.pairs.len() * 2 + usize::from(pairing.bye.is_some()),
                alive.len()
            );
        }

        #[test]
        fn prop_no_immediate_repeat_above_two(
            raw in proptest::collection::btree_set(0u8..8, 3..=8),
            seed1 in any::<u64>(),
            seed2 in any::<u64>(),
        ) {
            let alive: Vec<ParticipantId> =
                raw.iter().copied().map(ParticipantId).collect();
            let strategy = SeededRandomPairing::default();

            let first = strategy.pair_round(&alive, &BTreeSet::new(), 1, seed1);
            let previous: BTreeSet<Pair> = first.pairs.iter().copied().collect();
            let next = strategy.pair_round(&alive, &previous, 2, seed2);

            // Best-effort: with <= 8 participants and 16 reshuffles an
            // alternative always exists in practice for these sizes.
            for pair in &next.pairs {
                prop_assert!(!previous.contains(pair));
            }
        }
    }
}
