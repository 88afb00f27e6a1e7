//! Session Events
//!
//! Events produced by the deterministic tick and by intent application.
//! The coordinator converts these into protocol broadcasts; medium-cadence
//! traffic is exactly "an event happened".

use serde::{Serialize, Deserialize};

use crate::game::battle::BattleOutcome;
use crate::game::pairing::Pair;
use crate::game::state::ParticipantId;

/// Event payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum SessionEventData {
    /// The lobby transitioned to the first round.
    MatchStarted {
        /// Starting round number.
        round: u32,
    },

    /// A new round's countdown began.
    RoundStarted {
        /// Round number.
        round: u32,
    },

    /// The round countdown hit zero; overworld actions freeze.
    TimerExpired {
        /// Round number.
        round: u32,
    },

    /// Pairing for the round resolved.
    PairingResolved {
        /// Round number.
        round: u32,
        /// Opposing pairs, normalized.
        pairs: Vec<Pair>,
        /// Unmatched participant advancing automatically.
        bye: Option<ParticipantId>,
    },

    /// A battle instance opened; both sides may select moves.
    BattleStarted {
        /// Instance id.
        battle_id: u32,
        /// Lower-id side.
        side_a: ParticipantId,
        /// Higher-id side.
        side_b: ParticipantId,
        /// Tick after which missing moves default.
        deadline_tick: u64,
    },

    /// One side has chosen; the other is still owed.
    BattleWaiting {
        /// Instance id.
        battle_id: u32,
        /// Side still owing a move.
        waiting_on: ParticipantId,
    },

    /// A side missed the deadline; the basic attack was substituted.
    BattleDefaulted {
        /// Instance id.
        battle_id: u32,
        /// Defaulted side.
        side: ParticipantId,
    },

    /// A battle resolved.
    BattleResolved {
        /// Instance id.
        battle_id: u32,
        /// Canonical outcome.
        outcome: BattleOutcome,
    },

    /// A participant lost a life.
    LivesLost {
        /// The participant.
        id: ParticipantId,
        /// Lives remaining after the loss.
        lives_left: u8,
    },

    /// A participant dropped to zero lives (or lapsed its grace window).
    ParticipantEliminated {
        /// The participant.
        id: ParticipantId,
    },

    /// Liveness timeout or socket close observed.
    ParticipantDisconnected {
        /// The participant.
        id: ParticipantId,
    },

    /// A disconnected participant resumed within the grace window.
    ParticipantReconnected {
        /// The participant.
        id: ParticipantId,
    },

    /// Single survivor; the session is over.
    MatchWinner {
        /// The winner.
        id: ParticipantId,
    },
}

/// A session event with its tick.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Tick the event occurred on.
    pub tick: u64,
    /// Event payload.
    pub data: SessionEventData,
}

impl SessionEvent {
    /// Create a new event.
    pub fn new(tick: u64, data: SessionEventData) -> Self {
        Self { tick, data }
    }

    /// Participant the event is about, when there is exactly one.
    pub fn subject(&self) -> Option<ParticipantId> {
        match &self.data {
            SessionEventData::LivesLost { id, .. }
            | SessionEventData::ParticipantEliminated { id }
            | SessionEventData::ParticipantDisconnected { id }
            | SessionEventData::ParticipantReconnected { id }
            | SessionEventData::MatchWinner { id }
            | SessionEventData::BattleDefaulted { side: id, .. }
            | SessionEventData::BattleWaiting { waiting_on: id, .. } => Some(*id),
            _ => None,
        }
    }
}
