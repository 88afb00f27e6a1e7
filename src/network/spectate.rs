//! Spectator Router
//!
//! Maps eliminated participants onto the live participant whose stream
//! they follow. A new request replaces the old subscription; no missed
//! frames are buffered, so a fresh subscriber simply waits for the next
//! full resync.

use std::collections::BTreeMap;

use crate::game::state::ParticipantId;

/// Subscription table, spectator -> watched target.
#[derive(Debug, Default)]
pub struct SpectatorRouter {
    subscriptions: BTreeMap<ParticipantId, ParticipantId>,
}

impl SpectatorRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe (or switch) a spectator to a target.
    ///
    /// Validation (spectator eliminated, target alive) happens in the
    /// coordinator; the router only tracks the mapping.
    pub fn subscribe(&mut self, spectator: ParticipantId, target: ParticipantId) {
        self.subscriptions.insert(spectator, target);
    }

    /// Drop a spectator's subscription.
    pub fn unsubscribe(&mut self, spectator: ParticipantId) {
        self.subscriptions.remove(&spectator);
    }

    /// The target a spectator currently watches.
    pub fn target_of(&self, spectator: ParticipantId) -> Option<ParticipantId> {
        self.subscriptions.get(&spectator).copied()
    }

    /// Spectators currently watching the given target, ascending.
    pub fn spectators_of(&self, target: ParticipantId) -> Vec<ParticipantId> {
        self.subscriptions
            .iter()
            .filter(|(_, t)| **t == target)
            .map(|(s, _)| *s)
            .collect()
    }

    /// Clear every subscription pointing at a now-dead target.
    ///
    /// Affected spectators re-request; until then they only receive the
    /// session-wide low-frequency traffic.
    pub fn drop_target(&mut self, target: ParticipantId) -> Vec<ParticipantId> {
        let orphaned = self.spectators_of(target);
        for spectator in &orphaned {
            self.subscriptions.remove(spectator);
        }
        orphaned
    }

    /// Number of active subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether no one is spectating.
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(id: u8) -> ParticipantId {
        ParticipantId(id)
    }

    #[test]
    fn test_subscribe_and_switch() {
        let mut router = SpectatorRouter::new();

        router.subscribe(p(3), p(0));
        assert_eq!(router.target_of(p(3)), Some(p(0)));

        // Switching replaces, never stacks
        router.subscribe(p(3), p(1));
        assert_eq!(router.target_of(p(3)), Some(p(1)));
        assert!(router.spectators_of(p(0)).is_empty());
        assert_eq!(router.len(), 1);
    }

    #[test]
    fn test_spectators_of_target() {
        let mut router = SpectatorRouter::new();
        router.subscribe(p(3), p(0));
        router.subscribe(p(5), p(0));
        router.subscribe(p(6), p(1));

        assert_eq!(router.spectators_of(p(0)), vec![p(3), p(5)]);
        assert_eq!(router.spectators_of(p(1)), vec![p(6)]);
    }

    #[test]
    fn test_drop_target_orphans_spectators() {
        let mut router = SpectatorRouter::new();
        router.subscribe(p(3), p(0));
        router.subscribe(p(5), p(0));
        router.subscribe(p(6), p(1));

        let orphaned = router.drop_target(p(0));
        assert_eq!(orphaned, vec![p(3), p(5)]);
        assert_eq!(router.target_of(p(3)), None);
        assert_eq!(router.target_of(p(6)), Some(p(1)));
    }
}
