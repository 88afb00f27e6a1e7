//! Authoritative Session Tick
//!
//! The deterministic per-tick advance: liveness sweep, round countdown,
//! pairing on expiry, battle deadlines and resolution, round rollover.
//! Deadlines are tick comparisons, never wall-time signals, so a slow or
//! disconnected client cannot stall the match.

use tracing::warn;

use crate::core::rng::{derive_battle_seed, derive_round_seed};
use crate::game::battle::{BattleInstance, BattlePhase};
use crate::game::events::{SessionEvent, SessionEventData};
use crate::game::pairing::PairingStrategy;
use crate::game::roster;
use crate::game::state::{ConnectionState, ParticipantId, Role, SessionPhase, SessionState};
use crate::game::timer::TimerState;

/// Tick-denominated timeouts for a session.
#[derive(Clone, Copy, Debug)]
pub struct RoundRules {
    /// Overworld countdown per round.
    pub round_duration_ticks: u32,
    /// Move-selection window per battle.
    pub move_deadline_ticks: u32,
    /// Silence before a participant is marked disconnected.
    pub heartbeat_timeout_ticks: u64,
    /// Disconnection time before a participant is permanently dead.
    pub reconnect_grace_ticks: u64,
}

impl Default for RoundRules {
    fn default() -> Self {
        Self {
            round_duration_ticks: crate::ROUND_DURATION_SECS * crate::TICK_RATE,
            move_deadline_ticks: crate::MOVE_DEADLINE_SECS * crate::TICK_RATE,
            heartbeat_timeout_ticks: (10 * crate::TICK_RATE) as u64,
            reconnect_grace_ticks: (30 * crate::TICK_RATE) as u64,
        }
    }
}

/// Result of one tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Events generated this tick, in application order.
    pub events: Vec<SessionEvent>,
    /// Whether the session has ended.
    pub ended: bool,
    /// Winner, once declared.
    pub winner: Option<ParticipantId>,
}

/// Advance the session by one tick.
///
/// The only caller is the coordinator task; everything here mutates the
/// single state value synchronously, from already-buffered data.
pub fn advance(
    state: &mut SessionState,
    rules: &RoundRules,
    pairing: &dyn PairingStrategy,
) -> TickResult {
    let mut result = TickResult::default();

    if state.phase == SessionPhase::Ended {
        result.ended = true;
        result.winner = state.winner;
        return result;
    }

    state.tick += 1;

    sweep_liveness(state, rules, &mut result.events);

    if state.phase == SessionPhase::InProgress {
        step_timer(state, rules, pairing, &mut result.events);
        step_battles(state, &mut result.events);
        step_round_rollover(state, &mut result.events);
    }

    result.ended = state.phase == SessionPhase::Ended;
    result.winner = state.winner;
    result
}

/// Mark silent participants disconnected; eliminate past the grace window.
///
/// The host is exempt: it speaks over the in-process loop-back, and its
/// failure is the fatal `CoordinatorFailure` path, not a liveness event.
fn sweep_liveness(state: &mut SessionState, rules: &RoundRules, events: &mut Vec<SessionEvent>) {
    let now = state.tick;
    let ids: Vec<ParticipantId> = state.participants.keys().copied().collect();

    for id in ids {
        let (role, connection, last_seen, alive) = {
            let p = &state.participants[&id];
            (p.role, p.connection, p.last_seen_tick, p.alive)
        };
        if role == Role::Host {
            continue;
        }

        match connection {
            ConnectionState::Connected | ConnectionState::Reconnecting => {
                if now.saturating_sub(last_seen) > rules.heartbeat_timeout_ticks {
                    if let Some(p) = state.participant_mut(id) {
                        p.connection = ConnectionState::Disconnected { since_tick: now };
                    }
                    warn!(participant = %id, tick = now, "liveness timeout, marked disconnected");
                    events.push(SessionEvent::new(
                        now,
                        SessionEventData::ParticipantDisconnected { id },
                    ));
                }
            }
            ConnectionState::Disconnected { since_tick } => {
                if now.saturating_sub(since_tick) <= rules.reconnect_grace_ticks {
                    continue;
                }
                if state.phase == SessionPhase::Lobby {
                    // Pre-match the slot is simply freed
                    state.remove_participant(id);
                    events.push(SessionEvent::new(
                        now,
                        SessionEventData::ParticipantDisconnected { id },
                    ));
                } else if alive {
                    // Default through any pending battle so the opponent
                    // still gets a resolution, then eliminate.
                    for battle in state.battles.values_mut() {
                        if battle.involves(id) && battle.force_default(id) {
                            events.push(SessionEvent::new(
                                now,
                                SessionEventData::BattleDefaulted { battle_id: battle.id, side: id },
                            ));
                        }
                    }
                    warn!(participant = %id, tick = now, "grace window lapsed");
                    events.extend(roster::mark_eliminated(state, id));
                }
            }
        }
    }
}

/// Count down; on expiry partition the alive roster into battle pairs.
fn step_timer(
    state: &mut SessionState,
    rules: &RoundRules,
    pairing: &dyn PairingStrategy,
    events: &mut Vec<SessionEvent>,
) {
    if !state.timer.tick() {
        return;
    }
    let round = state.round;
    events.push(SessionEvent::new(state.tick, SessionEventData::TimerExpired { round }));

    let alive = state.alive_ids();
    // A lone survivor ends the session at elimination time, so two or more
    // are always left to pair here.
    let seed = derive_round_seed(state.seed, round);
    let round_pairing = pairing.pair_round(&alive, &state.previous_pairs, round, seed);

    if round_pairing.pairs.iter().any(|p| state.previous_pairs.contains(p)) {
        warn!(round, "no-repeat constraint waived for this pairing");
    }

    events.push(SessionEvent::new(
        state.tick,
        SessionEventData::PairingResolved {
            round,
            pairs: round_pairing.pairs.clone(),
            bye: round_pairing.bye,
        },
    ));

    state.previous_pairs = round_pairing.pairs.iter().copied().collect();
    state.current_bye = round_pairing.bye;

    let deadline = state.tick + rules.move_deadline_ticks as u64;
    for (a, b) in round_pairing.pairs {
        let id = state.allocate_battle_id();
        let result_seed = derive_battle_seed(state.seed, round, a.0, b.0);
        state
            .battles
            .insert(id, BattleInstance::new(id, round, a, b, deadline, result_seed));
        events.push(SessionEvent::new(
            state.tick,
            SessionEventData::BattleStarted { battle_id: id, side_a: a, side_b: b, deadline_tick: deadline },
        ));
    }

    state.timer.begin_pairing();
}

/// Apply deadline defaults, resolve ready battles, free finished instances.
fn step_battles(state: &mut SessionState, events: &mut Vec<SessionEvent>) {
    let now = state.tick;

    for battle in state.battles.values_mut() {
        for side in battle.apply_deadline(now) {
            events.push(SessionEvent::new(
                now,
                SessionEventData::BattleDefaulted { battle_id: battle.id, side },
            ));
        }
    }

    let resolving: Vec<u32> = state
        .battles
        .values()
        .filter(|b| b.phase == BattlePhase::Resolving)
        .map(|b| b.id)
        .collect();

    for battle_id in resolving {
        let (side_a, side_b) = {
            let b = &state.battles[&battle_id];
            (b.side_a, b.side_b)
        };
        let profile_a = state.participant(side_a).map(|p| p.profile).unwrap_or_default();
        let profile_b = state.participant(side_b).map(|p| p.profile).unwrap_or_default();

        let Some(outcome) = state
            .battles
            .get_mut(&battle_id)
            .and_then(|b| b.resolve(&profile_a, &profile_b))
        else {
            continue;
        };

        events.push(SessionEvent::new(
            now,
            SessionEventData::BattleResolved { battle_id, outcome },
        ));

        if let Some(winner) = state.participant_mut(outcome.winner) {
            winner.wins += 1;
        }
        events.extend(roster::apply_battle_loss(state, outcome.loser));

        // The winner check may have ended the session and dropped the map
        if let Some(b) = state.battles.get_mut(&battle_id) {
            b.finish();
        }
    }

    state.battles.retain(|_, b| b.phase != BattlePhase::Done);
}

/// Once every battle of the round is freed, restart the countdown.
fn step_round_rollover(state: &mut SessionState, events: &mut Vec<SessionEvent>) {
    if state.phase != SessionPhase::InProgress {
        return;
    }
    if state.timer.state == TimerState::Pairing && state.battles.is_empty() {
        state.round += 1;
        state.current_bye = None;
        state.timer.reset();
        events.push(SessionEvent::new(
            state.tick,
            SessionEventData::RoundStarted { round: state.round },
        ));
    }
}

// =============================================================================
// TESTS
// =============================================================================
