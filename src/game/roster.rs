//! Roster & Elimination Tracker
//!
//! Applies battle losses, maintains the alive/eliminated split, and detects
//! the terminal single-survivor condition. The winner check runs on every
//! elimination: dropping the second-to-last participant declares the winner
//! immediately, not at round end.

use tracing::info;

use crate::game::events::{SessionEvent, SessionEventData};
use crate::game::state::{ParticipantId, SessionPhase, SessionState};

/// Apply a battle loss: decrement lives, eliminating at zero.
pub fn apply_battle_loss(state: &mut SessionState, loser: ParticipantId) -> Vec<SessionEvent> {
    let tick = state.tick;
    let mut events = Vec::new();

    let lives_left = {
        let Some(participant) = state.participant_mut(loser) else {
            return events;
        };
        if !participant.alive {
            return events;
        }
        participant.lives = participant.lives.saturating_sub(1);
        participant.lives
    };

    events.push(SessionEvent::new(
        tick,
        SessionEventData::LivesLost { id: loser, lives_left },
    ));

    if lives_left == 0 {
        events.extend(mark_eliminated(state, loser));
    }
    events
}

/// Eliminate a participant outright (zero lives or lapsed grace window).
///
/// Idempotent; re-evaluates the survivor count afterwards.
pub fn mark_eliminated(state: &mut SessionState, id: ParticipantId) -> Vec<SessionEvent> {
    let tick = state.tick;
    let mut events = Vec::new();

    {
        let Some(participant) = state.participant_mut(id) else {
            return events;
        };
        if !participant.alive {
            return events;
        }
        participant.alive = false;
        participant.lives = 0;
        participant.eliminated_tick = Some(tick);
    }

    info!(participant = %id, tick, "participant eliminated");
    events.push(SessionEvent::new(tick, SessionEventData::ParticipantEliminated { id }));

    debug_assert!(invariant_holds(state));

    events.extend(check_winner(state));
    events
}

/// Declare the winner if exactly one participant remains alive.
///
/// Emits at most one `MatchWinner` per session; this is the only path to
/// `SessionPhase::Ended` besides explicit host shutdown.
pub fn check_winner(state: &mut SessionState) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    if state.phase == SessionPhase::Ended {
        return events;
    }

    let alive = state.alive_ids();
    if alive.len() == 1 {
        let winner = alive[0];
        state.winner = Some(winner);
        state.phase = SessionPhase::Ended;
        state.timer.complete();
        // No further battle actions are accepted once the winner stands
        state.battles.clear();

        info!(winner = %winner, tick = state.tick, "match winner declared");
        events.push(SessionEvent::new(state.tick, SessionEventData::MatchWinner { id: winner }));
    }
    events
}

/// `count(alive) + count(eliminated) == total` at all times.
pub fn invariant_holds(state: &SessionState) -> bool {
    state.alive_count() + state.eliminated_count() == state.participants.len()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::Role;

    fn session_with(count: u8) -> SessionState {
        let mut s = SessionState::new([1; 16], 1800);
        s.add_participant("host".into(), Role::Host, 0).unwrap();
        for i in 1..count {
            s.add_participant(format!("c{i}"), Role::Client, i as u64).unwrap();
        }
        s.phase = SessionPhase::InProgress;
        s
    }

    #[test]
    fn test_loss_decrements_lives() {
        let mut s = session_with(4);
        let loser = ParticipantId(2);

        let events = apply_battle_loss(&mut s, loser);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].data,
            SessionEventData::LivesLost { lives_left: 1, .. }
        ));
        assert!(s.participant(loser).unwrap().alive);
        assert!(invariant_holds(&s));
    }

    #[test]
    fn test_second_loss_eliminates() {
        let mut s = session_with(4);
        let loser = ParticipantId(2);

        apply_battle_loss(&mut s, loser);
        let events = apply_battle_loss(&mut s, loser);

        assert!(events.iter().any(|e| matches!(
            e.data,
            SessionEventData::ParticipantEliminated { id } if id == loser
        )));
        assert!(!s.participant(loser).unwrap().alive);
        assert_eq!(s.alive_count(), 3);
        assert!(invariant_holds(&s));
        // Four participants remain; no winner yet
        assert_eq!(s.phase, SessionPhase::InProgress);
    }

    #[test]
    fn test_mark_eliminated_idempotent() {
        let mut s = session_with(4);
        let id = ParticipantId(3);

        let first = mark_eliminated(&mut s, id);
        assert!(!first.is_empty());
        let second = mark_eliminated(&mut s, id);
        assert!(second.is_empty());
        assert_eq!(s.eliminated_count(), 1);
    }

    #[test]
    fn test_second_to_last_elimination_declares_winner() {
        let mut s = session_with(2);

        let events = mark_eliminated(&mut s, ParticipantId(1));

        let winners: Vec<_> = events
            .iter()
            .filter(|e| matches!(e.data, SessionEventData::MatchWinner { .. }))
            .collect();
        assert_eq!(winners.len(), 1, "exactly one MATCH_WINNER");
        assert_eq!(s.winner, Some(ParticipantId(0)));
        assert_eq!(s.phase, SessionPhase::Ended);
        assert!(s.battles.is_empty());

        // A later elimination cannot produce a second winner
        let more = check_winner(&mut s);
        assert!(more.is_empty());
    }

    #[test]
    fn test_loss_on_eliminated_is_noop() {
        let mut s = session_with(4);
        let id = ParticipantId(1);
        mark_eliminated(&mut s, id);

        let events = apply_battle_loss(&mut s, id);
        assert!(events.is_empty());
        assert_eq!(s.participant(id).unwrap().lives, 0);
    }
}
