//! Protocol Messages
//!
//! Wire format for client-host communication over WebSocket. Every frame is
//! an envelope `{sender, seq, msg}` where `msg` carries a `type` tag from a
//! closed catalog. Serialized as JSON for debugging ease; WebSocket framing
//! supplies the length delimiting, so decoding always starts from one
//! complete buffer.

use serde::{Serialize, Deserialize};

use crate::core::hash::StateHash;
use crate::game::battle::{BattleMove, BattleOutcome, BattlePhase};
use crate::game::state::{CombatProfile, Facing, ParticipantId, Role, SessionPhase};
use crate::game::timer::TimerState;

/// Protocol version; checked during the join handshake.
pub const PROTOCOL_VERSION: u16 = 1;

/// Sender id used on the JOIN envelope before a slot is assigned.
pub const UNASSIGNED_SENDER: u8 = 0xFF;

/// Upper bound on a single frame; larger frames are a violation.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

// =============================================================================
// CLIENT -> HOST MESSAGES
// =============================================================================

/// Messages sent from client to host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join the session (or resume a slot after a disconnect).
    Join(JoinRequest),

    /// Lobby readiness (character setup complete).
    Ready {
        /// Ready or not.
        ready: bool,
    },

    /// Own overworld position; never accepted about anyone else.
    PositionUpdate {
        /// World x.
        x: i32,
        /// World y.
        y: i32,
        /// Facing.
        facing: Facing,
    },

    /// Chosen move for a battle instance.
    BattleAction {
        /// Instance the move is for.
        battle_id: u32,
        /// The move.
        battle_move: BattleMove,
    },

    /// Subscribe to a live participant's stream (eliminated senders only).
    SpectateRequest {
        /// Participant to watch.
        target: ParticipantId,
    },

    /// Local computation disagreed with a host broadcast.
    DesyncReport {
        /// The client's state hash.
        state_hash: StateHash,
    },

    /// Liveness probe.
    Heartbeat {
        /// Sender's current tick view.
        tick: u64,
    },

    /// Answer to a host heartbeat.
    HeartbeatAck {
        /// Echoed tick.
        tick: u64,
    },

    /// Voluntary exit.
    Leave,
}

/// Join request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Name shown in rosters.
    pub display_name: String,
    /// Client build version, logged for compatibility triage.
    pub client_version: String,
    /// Present when resuming an existing slot within the grace window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume: Option<ResumeRequest>,
}

/// Resume credentials issued at the original join.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResumeRequest {
    /// Slot being resumed.
    pub participant_id: ParticipantId,
    /// Token issued in `JoinAccepted`.
    pub reconnect_token: u64,
}

// =============================================================================
// HOST -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from host to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Join handshake succeeded.
    JoinAccepted(JoinAccepted),

    /// Roster snapshot; rebroadcast on every lobby change.
    LobbyState(LobbyState),

    /// The match began.
    MatchStart {
        /// Starting round number.
        round: u32,
        /// Seed all pairing shuffles and battle rolls derive from.
        session_seed: u64,
    },

    /// Per-tick position relay (high frequency).
    PositionUpdate(PositionBatch),

    /// A battle encounter opened for the listed participants.
    EncounterTrigger {
        /// Encounter kind.
        kind: EncounterKind,
        /// Participants involved.
        participants: Vec<ParticipantId>,
        /// Battle instance, for PvP encounters.
        battle_id: u32,
    },

    /// Countdown state (roughly once a second).
    TimerSync {
        /// Round number.
        round: u32,
        /// Whole seconds left.
        remaining_secs: u32,
        /// Timer state machine position.
        timer_state: TimerState,
    },

    /// Pairing for the round.
    PairingResult(PairingResult),

    /// Canonical battle outcome (involved sides and their spectators).
    BattleResult {
        /// Instance id.
        battle_id: u32,
        /// Outcome; clients replaying locally must adopt this on mismatch.
        outcome: BattleOutcome,
        /// Loser's lives after the decrement.
        loser_lives_left: u8,
    },

    /// A participant was eliminated.
    PlayerDied {
        /// The participant.
        participant_id: ParticipantId,
    },

    /// Single survivor; final standings attached.
    MatchWinner {
        /// The winner.
        participant_id: ParticipantId,
        /// Final scores for every participant.
        scores: Vec<FinalScore>,
    },

    /// Full-state resync (low frequency, and on demand after a desync).
    Resync(FullSync),

    /// A validated intent could not be applied; no state changed.
    Rejected {
        /// Sequence number of the rejected intent.
        seq: u64,
        /// Why it was rejected.
        reason: RejectReason,
    },

    /// Liveness probe.
    Heartbeat {
        /// Authoritative tick.
        tick: u64,
    },

    /// Answer to a client heartbeat.
    HeartbeatAck {
        /// Echoed tick.
        tick: u64,
    },

    /// Host is ending the session.
    Shutdown {
        /// Operator-facing reason.
        reason: String,
    },
}

/// Join handshake result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinAccepted {
    /// Assigned (or resumed) slot.
    pub participant_id: ParticipantId,
    /// Token for grace-window resumes.
    pub reconnect_token: u64,
    /// Host protocol version.
    pub protocol_version: u16,
    /// Session identifier (hex).
    pub session_id: String,
}

/// Roster snapshot for the lobby.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyState {
    /// Session phase.
    pub phase: SessionPhase,
    /// One entry per joined participant.
    pub participants: Vec<LobbyEntry>,
}

/// One roster line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyEntry {
    /// Slot.
    pub id: ParticipantId,
    /// Display name.
    pub display_name: String,
    /// Host or client.
    pub role: Role,
    /// Setup complete.
    pub ready: bool,
    /// Currently connected.
    pub connected: bool,
}

/// Position entries for one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionBatch {
    /// Authoritative tick.
    pub tick: u64,
    /// Alive participants' positions.
    pub entries: Vec<PositionEntry>,
}

/// One participant's position.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PositionEntry {
    /// Participant.
    pub id: ParticipantId,
    /// World x.
    pub x: i32,
    /// World y.
    pub y: i32,
    /// Facing.
    pub facing: Facing,
}

/// Encounter kinds the coordinator can announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncounterKind {
    /// Round-pairing PvP battle.
    PvpBattle,
}

/// Pairing broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingResult {
    /// Round number.
    pub round: u32,
    /// One entry per battle instance.
    pub pairs: Vec<PairEntry>,
    /// Unmatched participant advancing automatically.
    pub bye: Option<ParticipantId>,
}

/// One pairing line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PairEntry {
    /// Battle instance id.
    pub battle_id: u32,
    /// Lower-id side.
    pub side_a: ParticipantId,
    /// Higher-id side.
    pub side_b: ParticipantId,
    /// Tick after which missing moves default.
    pub deadline_tick: u64,
}

/// Final standing line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalScore {
    /// Participant.
    pub id: ParticipantId,
    /// Display name.
    pub display_name: String,
    /// Battles won.
    pub wins: u32,
    /// Lives remaining at session end.
    pub lives: u8,
    /// Survived to the end.
    pub alive: bool,
}

/// Full-state snapshot, the self-heal payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullSync {
    /// Authoritative tick.
    pub tick: u64,
    /// Round number.
    pub round: u32,
    /// Session phase.
    pub phase: SessionPhase,
    /// Timer position.
    pub timer_state: TimerState,
    /// Whole seconds left on the countdown.
    pub remaining_secs: u32,
    /// Session seed (0 before match start).
    pub session_seed: u64,
    /// Every participant.
    pub participants: Vec<ParticipantSync>,
    /// Every live battle instance.
    pub battles: Vec<BattleSync>,
    /// Hash of the authoritative state this snapshot was taken from.
    pub state_hash: StateHash,
}

/// Participant projection inside a resync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantSync {
    /// Slot.
    pub id: ParticipantId,
    /// Display name.
    pub display_name: String,
    /// Host or client.
    pub role: Role,
    /// Still in the running.
    pub alive: bool,
    /// Lives left.
    pub lives: u8,
    /// Lobby readiness.
    pub ready: bool,
    /// Currently connected.
    pub connected: bool,
    /// World x.
    pub x: i32,
    /// World y.
    pub y: i32,
    /// Facing.
    pub facing: Facing,
    /// Battles won.
    pub wins: u32,
    /// Battle stats, so clients can replay resolutions.
    pub profile: CombatProfile,
}

/// Battle projection inside a resync.
///
/// Moves are reported as presence flags only; a combatant must not learn
/// the opponent's choice before resolution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BattleSync {
    /// Instance id.
    pub battle_id: u32,
    /// Round it belongs to.
    pub round: u32,
    /// Lower-id side.
    pub side_a: ParticipantId,
    /// Higher-id side.
    pub side_b: ParticipantId,
    /// Phase.
    pub phase: BattlePhase,
    /// Selection deadline.
    pub deadline_tick: u64,
    /// Side A has chosen.
    pub has_move_a: bool,
    /// Side B has chosen.
    pub has_move_b: bool,
    /// Seed for client-side replay after resolution.
    pub result_seed: u64,
}

/// Typed reasons an intent is rejected without being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Operation is lobby-only.
    #[error("Session is not in the lobby")]
    NotInLobby,

    /// Host-only operation attempted by a client.
    #[error("Only the host may do this")]
    NotHost,

    /// Not every connected participant is ready.
    #[error("Not all participants are ready")]
    NotReady,

    /// Operation requires a running match.
    #[error("Match is not in progress")]
    MatchNotInProgress,

    /// Overworld actions are frozen after the countdown expires.
    #[error("Overworld actions are frozen")]
    ActionsFrozen,

    /// Sender has been eliminated.
    #[error("Sender is not alive")]
    NotAlive,

    /// Spectating is for eliminated participants.
    #[error("Sender has not been eliminated")]
    NotEliminated,

    /// Spectate target is not alive.
    #[error("Target is not alive")]
    TargetNotAlive,

    /// No such battle instance.
    #[error("Unknown battle instance")]
    UnknownBattle,

    /// Sender does not fight in that battle.
    #[error("Not a combatant in this battle")]
    NotACombatant,

    /// Sender already chose a move.
    #[error("Move already submitted")]
    AlreadySubmitted,

    /// The move arrived after the deadline; the default applies.
    #[error("Action is stale")]
    StaleAction,

    /// All slots are taken.
    #[error("Session is full")]
    SessionFull,

    /// Resume credentials did not match any slot in its grace window.
    #[error("Resume token rejected")]
    BadResumeToken,
}

// =============================================================================
// ENVELOPES & VALIDATION
// =============================================================================

/// Client-to-host envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEnvelope {
    /// Claimed sender slot (`UNASSIGNED_SENDER` on the join frame).
    pub sender: u8,
    /// Per-sender monotonically increasing counter.
    pub seq: u64,
    /// The message.
    pub msg: ClientMessage,
}

/// Host-to-client envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEnvelope {
    /// Host participant slot.
    pub sender: u8,
    /// Per-connection monotonically increasing counter.
    pub seq: u64,
    /// The message.
    pub msg: ServerMessage,
}

/// Malformed, spoofed, or schema-invalid input.
///
/// The offending frame is dropped; repeated violations from one sender
/// escalate to disconnection of that sender.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolViolation {
    /// Frame did not parse as an envelope from the catalog.
    #[error("Malformed frame: {detail}")]
    MalformedFrame {
        /// Parser detail.
        detail: String,
    },

    /// Frame exceeded `MAX_FRAME_BYTES`.
    #[error("Oversized frame: {len} bytes")]
    OversizedFrame {
        /// Received length.
        len: usize,
    },

    /// Envelope claims a sender other than the authenticated slot.
    #[error("Spoofed sender: claimed {claimed}, connection is {expected}")]
    SpoofedSender {
        /// Claimed slot.
        claimed: u8,
        /// Authenticated slot.
        expected: u8,
    },

    /// Non-join traffic before the join handshake completed.
    #[error("Message before join handshake")]
    NotJoined,

    /// A second join on an already-joined connection.
    #[error("Duplicate join on one connection")]
    AlreadyJoined,
}

/// Per-sender sequence bookkeeping.
///
/// Monotonic with gaps allowed; duplicates and retransmits are discarded
/// idempotently (not a violation).
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceTracker {
    last: u64,
}

impl SequenceTracker {
    /// Create a tracker that accepts any `seq >= 1` first.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `seq` if it is strictly greater than the last accepted one.
    #[inline]
    pub fn accept(&mut self, seq: u64) -> bool {
        if seq > self.last {
            self.last = seq;
            true
        } else {
            false
        }
    }

    /// Last accepted sequence number.
    #[inline]
    pub fn last(&self) -> u64 {
        self.last
    }
}

impl ClientEnvelope {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerEnvelope {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Decode one already-framed buffer into a client envelope.
///
/// Transport-agnostic: the caller hands in whatever its framing produced
/// (a WebSocket text or binary payload).
pub fn decode_client_frame(payload: &[u8]) -> Result<ClientEnvelope, ProtocolViolation> {
    if payload.len() > MAX_FRAME_BYTES {
        return Err(ProtocolViolation::OversizedFrame { len: payload.len() });
    }
    let text = std::str::from_utf8(payload).map_err(|e| ProtocolViolation::MalformedFrame {
        detail: e.to_string(),
    })?;
    ClientEnvelope::from_json(text).map_err(|e| ProtocolViolation::MalformedFrame {
        detail: e.to_string(),
    })
}

// =============================================================================
// TESTS
// =============================================================================
