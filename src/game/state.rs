//! Session State Definitions
//!
//! The authoritative state value owned exclusively by the Session
//! Coordinator. Every other component operates on references handed to it;
//! clients only ever see broadcast projections. Uses BTreeMap for
//! deterministic iteration order.

use std::collections::{BTreeMap, BTreeSet};
use serde::{Serialize, Deserialize};

use crate::core::hash::{StateHash, compute_state_hash};
use crate::game::battle::BattleInstance;
use crate::game::pairing::Pair;
use crate::game::timer::MatchTimer;
use crate::{MAX_PARTICIPANTS, STARTING_LIVES};

// =============================================================================
// PARTICIPANT ID
// =============================================================================

/// Participant identifier, 0-7, stable for the session lifetime.
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub u8);

impl ParticipantId {
    /// Raw slot index.
    #[inline]
    pub fn index(self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P{}", self.0)
    }
}

// =============================================================================
// PARTICIPANT
// =============================================================================

/// Whether the participant runs the authoritative coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Owns the session; joined through the local loop-back link.
    Host,
    /// Remote connection.
    Client,
}

/// Connection lifecycle as the coordinator sees it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Traffic flowing normally.
    Connected,
    /// No traffic or socket closed; grace window open.
    Disconnected {
        /// Tick the disconnect was observed.
        since_tick: u64,
    },
    /// Resume handshake accepted; waiting for the resync to land.
    Reconnecting,
}

impl ConnectionState {
    /// Whether broadcasts should be attempted for this participant.
    #[inline]
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Reconnecting)
    }
}

/// Overworld facing, relayed as-is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Facing {
    /// Facing up.
    Up = 0,
    /// Facing down (spawn default).
    #[default]
    Down = 1,
    /// Facing left.
    Left = 2,
    /// Facing right.
    Right = 3,
}

/// Battle-relevant stats, snapshotted from the participant's party at join.
///
/// Numbers follow the level-1 progression of the single-player game:
/// HP = max hit die + CON mod, AC = class baseline + DEX, attack =
/// proficiency + primary mod.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatProfile {
    /// Hit points at battle start.
    pub max_hp: i32,
    /// Armor class attacks roll against.
    pub armor_class: i32,
    /// Added to every d20 attack roll.
    pub attack_bonus: i32,
    /// Added to every damage roll.
    pub damage_bonus: i32,
    /// Added to the initiative roll.
    pub initiative_bonus: i32,
}

impl Default for CombatProfile {
    fn default() -> Self {
        Self {
            max_hp: 12,
            armor_class: 13,
            attack_bonus: 4,
            damage_bonus: 2,
            initiative_bonus: 1,
        }
    }
}

/// One participant in the session.
///
/// Created on a successful join handshake; destroyed only when the session
/// ends (lobby leavers excepted, since their slot is reusable).
#[derive(Clone, Debug)]
pub struct Participant {
    /// Stable identifier.
    pub id: ParticipantId,
    /// Display name from the join request.
    pub display_name: String,
    /// Host or client.
    pub role: Role,
    /// Still in the running.
    pub alive: bool,
    /// Battle losses left before elimination.
    pub lives: u8,
    /// Lobby readiness (character setup complete).
    pub ready: bool,
    /// Overworld position, client-reported for its own participant only.
    pub x: i32,
    /// Overworld position.
    pub y: i32,
    /// Overworld facing.
    pub facing: Facing,
    /// Connection lifecycle.
    pub connection: ConnectionState,
    /// Last tick any traffic was seen from this participant.
    pub last_seen_tick: u64,
    /// Token required to resume this slot after a disconnect.
    pub reconnect_token: u64,
    /// Battle stats snapshot.
    pub profile: CombatProfile,
    /// Tick of elimination, if eliminated.
    pub eliminated_tick: Option<u64>,
    /// Battles won (final scores at session end).
    pub wins: u32,
}

impl Participant {
    /// Create a freshly joined participant.
    pub fn new(id: ParticipantId, display_name: String, role: Role, reconnect_token: u64) -> Self {
        Self {
            id,
            display_name,
            role,
            alive: true,
            lives: STARTING_LIVES,
            ready: false,
            x: 0,
            y: 0,
            facing: Facing::default(),
            connection: ConnectionState::Connected,
            last_seen_tick: 0,
            reconnect_token,
            profile: CombatProfile::default(),
            eliminated_tick: None,
            wins: 0,
        }
    }

    /// Whether broadcasts should be attempted for this participant.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }
}

// =============================================================================
// SESSION STATE
// =============================================================================

/// Session lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionPhase {
    /// Pre-match; joins and readiness.
    Lobby = 0,
    /// Rounds running.
    InProgress = 1,
    /// Winner declared or host shut down.
    Ended = 2,
}

/// Roster mutation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RosterError {
    /// All 8 slots taken.
    #[error("Session is full")]
    SessionFull,

    /// New joins are lobby-only.
    #[error("Match already in progress")]
    MatchInProgress,

    /// A second host-role participant was offered.
    #[error("Session already has a host")]
    DuplicateHost,
}

/// The single authoritative state value.
///
/// Exactly one exists per match, owned by the coordinator task. Nothing
/// here is behind a lock: the coordinator is the only writer.
#[derive(Clone, Debug)]
pub struct SessionState {
    /// Unique session identifier (UUID bytes).
    pub session_id: [u8; 16],
    /// Lifecycle phase.
    pub phase: SessionPhase,
    /// Authoritative tick counter.
    pub tick: u64,
    /// Current round, 1-based once the match starts.
    pub round: u32,
    /// Session seed, derived at match start; 0 in the lobby.
    pub seed: u64,
    /// Full participant set, keyed by id for deterministic iteration.
    pub participants: BTreeMap<ParticipantId, Participant>,
    /// Round countdown.
    pub timer: MatchTimer,
    /// Live battle instances, keyed by instance id.
    pub battles: BTreeMap<u32, BattleInstance>,
    /// Next battle instance id.
    pub next_battle_id: u32,
    /// Normalized pairs of the immediately preceding round.
    pub previous_pairs: BTreeSet<Pair>,
    /// Participants byed this round.
    pub current_bye: Option<ParticipantId>,
    /// Winner, once declared.
    pub winner: Option<ParticipantId>,
}

impl SessionState {
    /// Create a lobby-phase session.
    pub fn new(session_id: [u8; 16], round_duration_ticks: u32) -> Self {
        Self {
            session_id,
            phase: SessionPhase::Lobby,
            tick: 0,
            round: 0,
            seed: 0,
            participants: BTreeMap::new(),
            timer: MatchTimer::new(round_duration_ticks),
            battles: BTreeMap::new(),
            next_battle_id: 1,
            previous_pairs: BTreeSet::new(),
            current_bye: None,
            winner: None,
        }
    }

    /// Add a participant into the lowest free slot.
    pub fn add_participant(
        &mut self,
        display_name: String,
        role: Role,
        reconnect_token: u64,
    ) -> Result<ParticipantId, RosterError> {
        if self.phase != SessionPhase::Lobby {
            return Err(RosterError::MatchInProgress);
        }
        if role == Role::Host && self.host_id().is_some() {
            return Err(RosterError::DuplicateHost);
        }

        let id = (0..MAX_PARTICIPANTS as u8)
            .map(ParticipantId)
            .find(|id| !self.participants.contains_key(id))
            .ok_or(RosterError::SessionFull)?;

        let mut participant = Participant::new(id, display_name, role, reconnect_token);
        participant.last_seen_tick = self.tick;
        self.participants.insert(id, participant);
        Ok(id)
    }

    /// Remove a participant (lobby leavers only; in-match slots persist).
    pub fn remove_participant(&mut self, id: ParticipantId) -> bool {
        if self.phase != SessionPhase::Lobby {
            return false;
        }
        self.participants.remove(&id).is_some()
    }

    /// Look up a participant.
    #[inline]
    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    /// Look up a participant mutably.
    #[inline]
    pub fn participant_mut(&mut self, id: ParticipantId) -> Option<&mut Participant> {
        self.participants.get_mut(&id)
    }

    /// The host-role participant, if joined.
    pub fn host_id(&self) -> Option<ParticipantId> {
        self.participants
            .values()
            .find(|p| p.role == Role::Host)
            .map(|p| p.id)
    }

    /// Ids of alive participants, ascending.
    pub fn alive_ids(&self) -> Vec<ParticipantId> {
        self.participants
            .values()
            .filter(|p| p.alive)
            .map(|p| p.id)
            .collect()
    }

    /// Number of alive participants.
    pub fn alive_count(&self) -> usize {
        self.participants.values().filter(|p| p.alive).count()
    }

    /// Number of eliminated participants.
    pub fn eliminated_count(&self) -> usize {
        self.participants.values().filter(|p| !p.alive).count()
    }

    /// All connected participants are ready and at least two are present.
    pub fn lobby_ready(&self) -> bool {
        let connected: Vec<_> = self
            .participants
            .values()
            .filter(|p| p.is_connected())
            .collect();
        connected.len() >= 2 && connected.iter().all(|p| p.ready)
    }

    /// Allocate the next battle instance id.
    pub fn allocate_battle_id(&mut self) -> u32 {
        let id = self.next_battle_id;
        self.next_battle_id += 1;
        id
    }

    /// The battle the participant is currently fighting in, if any.
    pub fn battle_of(&self, id: ParticipantId) -> Option<u32> {
        self.battles
            .values()
            .find(|b| b.involves(id))
            .map(|b| b.id)
    }

    /// Hash the authoritative state for desync detection.
    ///
    /// Covers everything a client projection can drift on; wire projections
    /// carry this hash so clients can self-check.
    pub fn compute_hash(&self) -> StateHash {
        compute_state_hash(self.tick, self.seed, |h| {
            h.update_u8(self.phase as u8);
            h.update_u32(self.round);
            h.update_u8(self.timer.state as u8);
            h.update_u32(self.timer.remaining_ticks);

            for p in self.participants.values() {
                h.update_u8(p.id.0);
                h.update_str(&p.display_name);
                h.update_bool(p.alive);
                h.update_u8(p.lives);
                h.update_bool(p.ready);
                h.update_i32(p.x);
                h.update_i32(p.y);
                h.update_u8(p.facing as u8);
                h.update_u32(p.wins);
            }

            for b in self.battles.values() {
                h.update_u32(b.id);
                h.update_u8(b.phase as u8);
                h.update_u8(b.side_a.0);
                h.update_u8(b.side_b.0);
                h.update_u8(b.move_a.map(|m| m as u8 + 1).unwrap_or(0));
                h.update_u8(b.move_b.map(|m| m as u8 + 1).unwrap_or(0));
                h.update_u64(b.deadline_tick);
            }

            h.update_u8(self.winner.map(|w| w.0 + 1).unwrap_or(0));
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionState {
        SessionState::new([7; 16], 1800)
    }

    #[test]
    fn test_slots_assigned_lowest_free() {
        let mut s = session();
        let host = s.add_participant("host".into(), Role::Host, 1).unwrap();
        let c1 = s.add_participant("alice".into(), Role::Client, 2).unwrap();
        let c2 = s.add_participant("bob".into(), Role::Client, 3).unwrap();

        assert_eq!(host, ParticipantId(0));
        assert_eq!(c1, ParticipantId(1));
        assert_eq!(c2, ParticipantId(2));

        // Freed lobby slot is reused
        s.remove_participant(c1);
        let c3 = s.add_participant("carol".into(), Role::Client, 4).unwrap();
        assert_eq!(c3, ParticipantId(1));
    }

    #[test]
    fn test_capacity_and_host_invariants() {
        let mut s = session();
        s.add_participant("host".into(), Role::Host, 0).unwrap();
        for i in 0..7 {
            s.add_participant(format!("c{i}"), Role::Client, i).unwrap();
        }

        assert!(matches!(
            s.add_participant("late".into(), Role::Client, 99),
            Err(RosterError::SessionFull)
        ));
        assert!(matches!(
            s.add_participant("host2".into(), Role::Host, 98),
            Err(RosterError::DuplicateHost)
        ));
    }

    #[test]
    fn test_no_joins_in_progress() {
        let mut s = session();
        s.add_participant("host".into(), Role::Host, 0).unwrap();
        s.phase = SessionPhase::InProgress;

        assert!(matches!(
            s.add_participant("late".into(), Role::Client, 1),
            Err(RosterError::MatchInProgress)
        ));
        // And in-match slots are never removed
        assert!(!s.remove_participant(ParticipantId(0)));
    }

    #[test]
    fn test_lobby_ready_requires_all_connected() {
        let mut s = session();
        let host = s.add_participant("host".into(), Role::Host, 0).unwrap();
        let c1 = s.add_participant("alice".into(), Role::Client, 1).unwrap();

        assert!(!s.lobby_ready());

        s.participant_mut(host).unwrap().ready = true;
        s.participant_mut(c1).unwrap().ready = true;
        assert!(s.lobby_ready());

        // A disconnected unready participant does not block
        let c2 = s.add_participant("bob".into(), Role::Client, 2).unwrap();
        assert!(!s.lobby_ready());
        s.participant_mut(c2).unwrap().connection =
            ConnectionState::Disconnected { since_tick: 0 };
        assert!(s.lobby_ready());
    }

    #[test]
    fn test_alive_accounting() {
        let mut s = session();
        s.add_participant("host".into(), Role::Host, 0).unwrap();
        s.add_participant("alice".into(), Role::Client, 1).unwrap();
        s.add_participant("bob".into(), Role::Client, 2).unwrap();

        assert_eq!(s.alive_count(), 3);
        s.participant_mut(ParticipantId(1)).unwrap().alive = false;
        assert_eq!(s.alive_count(), 2);
        assert_eq!(s.eliminated_count(), 1);
        assert_eq!(s.alive_count() + s.eliminated_count(), s.participants.len());
        assert_eq!(s.alive_ids(), vec![ParticipantId(0), ParticipantId(2)]);
    }

    #[test]
    fn test_state_hash_tracks_mutations() {
        let mut s = session();
        s.add_participant("host".into(), Role::Host, 0).unwrap();
        s.add_participant("alice".into(), Role::Client, 1).unwrap();

        let h1 = s.compute_hash();
        assert_eq!(h1, s.compute_hash());

        s.participant_mut(ParticipantId(1)).unwrap().x = 42;
        let h2 = s.compute_hash();
        assert_ne!(h1, h2);

        s.tick += 1;
        assert_ne!(h2, s.compute_hash());
    }
}
