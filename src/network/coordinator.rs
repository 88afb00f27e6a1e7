//! Session Coordinator
//!
//! The single writer of session state. Every connection task feeds one
//! ordered inbound queue; the coordinator applies each validated intent in
//! arrival order, advances the deterministic tick, and broadcasts at three
//! cadences: positions every tick, transitions on change, and a periodic
//! full-state resync that self-heals any drifted client. Intent
//! application never blocks on network I/O; every send is fire-and-forget
//! through a bounded per-connection queue.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::core::rng::derive_session_seed;
use crate::game::battle::{BattleMove, MoveError};
use crate::game::events::{SessionEvent, SessionEventData};
use crate::game::pairing::{PairingStrategy, SeededRandomPairing};
use crate::game::roster;
use crate::game::state::{
    ConnectionState, Facing, ParticipantId, Role, RosterError, SessionPhase, SessionState,
};
use crate::game::tick::{advance, RoundRules};
use crate::game::timer::TimerState;
use crate::network::protocol::{
    BattleSync, ClientMessage, EncounterKind, FinalScore, FullSync, JoinAccepted, JoinRequest,
    LobbyEntry, LobbyState, PairEntry, PairingResult, ParticipantSync, PositionBatch,
    PositionEntry, RejectReason, ServerEnvelope, ServerMessage, PROTOCOL_VERSION,
};
use crate::network::spectate::SpectatorRouter;
use crate::network::transport::{Intent, Outbound, OutboundError};

/// Coordinator timing and identity knobs.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Simulation tick rate (Hz).
    pub tick_rate: u32,
    /// Tick-denominated session rules.
    pub rules: RoundRules,
    /// Ticks between full-state resync broadcasts.
    pub resync_interval_ticks: u64,
    /// Ticks between host heartbeat broadcasts.
    pub heartbeat_interval_ticks: u64,
    /// Display name for the host's own participant.
    pub host_name: String,
    /// Inbound intent queue depth.
    pub inbound_queue_depth: usize,
    /// Outbound queue depth for the host's loop-back link.
    pub outbound_queue_depth: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            tick_rate: crate::TICK_RATE,
            rules: RoundRules::default(),
            resync_interval_ticks: (5 * crate::TICK_RATE) as u64,
            heartbeat_interval_ticks: (2 * crate::TICK_RATE) as u64,
            host_name: "host".to_string(),
            inbound_queue_depth: 256,
            outbound_queue_depth: crate::network::transport::OUTBOUND_QUEUE_DEPTH,
        }
    }
}

/// The host process's own seat at the table.
///
/// The host participant speaks over this in-process loop-back instead of a
/// socket; `start_match` is only reachable from here, which is what makes
/// it host-only.
pub struct LocalHandle {
    host_id: ParticipantId,
    intents: mpsc::Sender<Intent>,
    /// Broadcasts addressed to the host participant.
    pub messages: mpsc::Receiver<ServerEnvelope>,
}

impl LocalHandle {
    /// The host's participant id.
    pub fn host_id(&self) -> ParticipantId {
        self.host_id
    }

    /// Send a gameplay message as the host participant.
    pub async fn send(&self, msg: ClientMessage) -> bool {
        self.intents
            .send(Intent::Message { participant: self.host_id, seq: 0, msg })
            .await
            .is_ok()
    }

    /// Start the match. Fails with `NotReady` until every connected
    /// participant has completed setup.
    pub async fn start_match(&self) -> Result<(), RejectReason> {
        let (reply, result) = oneshot::channel();
        if self.intents.send(Intent::StartMatch { reply }).await.is_err() {
            return Err(RejectReason::MatchNotInProgress);
        }
        result.await.unwrap_or(Err(RejectReason::MatchNotInProgress))
    }

    /// End the session for everyone.
    pub async fn shutdown(&self, reason: &str) -> bool {
        self.intents
            .send(Intent::Shutdown { reason: reason.to_string() })
            .await
            .is_ok()
    }
}

/// The authoritative session owner.
pub struct SessionCoordinator {
    config: CoordinatorConfig,
    state: SessionState,
    pairing: Box<dyn PairingStrategy>,
    links: BTreeMap<ParticipantId, Outbound>,
    spectators: SpectatorRouter,
    inbound: mpsc::Receiver<Intent>,
    host_id: ParticipantId,
    last_resync_tick: u64,
    last_heartbeat_tick: u64,
}

impl SessionCoordinator {
    /// Create a coordinator plus its intake handle and the host's seat.
    pub fn new(config: CoordinatorConfig) -> (Self, mpsc::Sender<Intent>, LocalHandle) {
        let session_id = uuid::Uuid::new_v4().into_bytes();
        let mut state = SessionState::new(session_id, config.rules.round_duration_ticks);

        let host_token = fresh_token();
        let host_id = state
            .add_participant(config.host_name.clone(), Role::Host, host_token)
            .expect("empty session always has a host slot");

        let (intent_tx, intent_rx) = mpsc::channel(config.inbound_queue_depth);
        let (host_tx, host_rx) = mpsc::channel(config.outbound_queue_depth);

        let mut links = BTreeMap::new();
        links.insert(host_id, Outbound::new(host_tx, host_id.0));

        let coordinator = Self {
            config,
            state,
            pairing: Box::new(SeededRandomPairing::default()),
            links,
            spectators: SpectatorRouter::new(),
            inbound: intent_rx,
            host_id,
            last_resync_tick: 0,
            last_heartbeat_tick: 0,
        };
        let handle = LocalHandle { host_id, intents: intent_tx.clone(), messages: host_rx };

        (coordinator, intent_tx, handle)
    }

    /// Swap in a different pairing strategy (lobby only).
    pub fn set_pairing_strategy(&mut self, strategy: Box<dyn PairingStrategy>) {
        self.pairing = strategy;
    }

    /// Session id (for logs and the join handshake).
    pub fn session_id(&self) -> [u8; 16] {
        self.state.session_id
    }

    /// Run until the session ends or the host shuts it down.
    pub async fn run(mut self) {
        let tick_duration = Duration::from_micros(1_000_000 / self.config.tick_rate as u64);
        let mut ticker = interval(tick_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(session = %hex::encode(&self.state.session_id[..4]), "coordinator running");

        loop {
            tokio::select! {
                maybe_intent = self.inbound.recv() => {
                    match maybe_intent {
                        Some(intent) => {
                            if self.apply_intent(intent) {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if self.advance_tick() {
                        break;
                    }
                }
            }
        }

        info!(session = %hex::encode(&self.state.session_id[..4]), "coordinator stopped");
    }

    // =========================================================================
    // INTENT APPLICATION (strictly ordered, single writer)
    // =========================================================================

    /// Apply one intent. Returns `true` when the session should stop.
    fn apply_intent(&mut self, intent: Intent) -> bool {
        match intent {
            Intent::Hello { request, outbound, reply } => {
                let result = self.handle_join(request, outbound);
                let _ = reply.send(result);
                false
            }
            Intent::Message { participant, seq, msg } => {
                self.handle_message(participant, seq, msg);
                false
            }
            Intent::ConnectionClosed { participant } => {
                self.handle_connection_closed(participant);
                false
            }
            Intent::StartMatch { reply } => {
                let result = self.handle_start_match();
                let _ = reply.send(result);
                false
            }
            Intent::Shutdown { reason } => {
                info!(reason, "host shutdown");
                self.state.phase = SessionPhase::Ended;
                self.broadcast_all(ServerMessage::Shutdown { reason });
                true
            }
        }
    }

    /// Join or resume. The reply travels back to the connection task; the
    /// new link is installed on success.
    fn handle_join(
        &mut self,
        request: JoinRequest,
        outbound: mpsc::Sender<ServerEnvelope>,
    ) -> Result<JoinAccepted, RejectReason> {
        if let Some(resume) = request.resume {
            return self.handle_resume(resume.participant_id, resume.reconnect_token, outbound);
        }

        if self.state.phase != SessionPhase::Lobby {
            return Err(RejectReason::NotInLobby);
        }

        let token = fresh_token();
        let id = self
            .state
            .add_participant(request.display_name.clone(), Role::Client, token)
            .map_err(|e| match e {
                RosterError::SessionFull => RejectReason::SessionFull,
                _ => RejectReason::NotInLobby,
            })?;

        self.links.insert(id, Outbound::new(outbound, self.host_id.0));
        info!(
            participant = %id,
            name = %request.display_name,
            version = %request.client_version,
            "participant joined"
        );

        let accepted = JoinAccepted {
            participant_id: id,
            reconnect_token: token,
            protocol_version: PROTOCOL_VERSION,
            session_id: hex::encode(self.state.session_id),
        };
        // The handshake result is also the first message on the new link,
        // so the client's inbound sequence starts from it
        self.send_to(id, ServerMessage::JoinAccepted(accepted.clone()));
        self.broadcast_lobby_state();

        Ok(accepted)
    }

    /// Grace-window resume with the token issued at the original join.
    fn handle_resume(
        &mut self,
        id: ParticipantId,
        token: u64,
        outbound: mpsc::Sender<ServerEnvelope>,
    ) -> Result<JoinAccepted, RejectReason> {
        let now = self.state.tick;
        {
            let Some(participant) = self.state.participant(id) else {
                return Err(RejectReason::BadResumeToken);
            };
            if participant.reconnect_token != token {
                warn!(participant = %id, "resume with wrong token rejected");
                return Err(RejectReason::BadResumeToken);
            }
            // Past the grace window the slot is permanently dead to the
            // match, but an eliminated participant may still reattach to
            // spectate.
            if let ConnectionState::Disconnected { since_tick } = participant.connection {
                let lapsed =
                    now.saturating_sub(since_tick) > self.config.rules.reconnect_grace_ticks;
                if lapsed && participant.alive {
                    return Err(RejectReason::BadResumeToken);
                }
            }
        }

        self.links.insert(id, Outbound::new(outbound, self.host_id.0));
        if let Some(participant) = self.state.participant_mut(id) {
            participant.connection = ConnectionState::Reconnecting;
            participant.last_seen_tick = now;
        }

        info!(participant = %id, tick = now, "participant resumed");
        let accepted = JoinAccepted {
            participant_id: id,
            reconnect_token: token,
            protocol_version: PROTOCOL_VERSION,
            session_id: hex::encode(self.state.session_id),
        };
        self.send_to(id, ServerMessage::JoinAccepted(accepted.clone()));
        // A resumed client starts from a fresh snapshot, never from history
        self.send_resync(id);
        if let Some(participant) = self.state.participant_mut(id) {
            participant.connection = ConnectionState::Connected;
        }
        if self.state.phase == SessionPhase::Lobby {
            self.broadcast_lobby_state();
        }

        Ok(accepted)
    }

    /// Dispatch one validated gameplay message.
    fn handle_message(&mut self, from: ParticipantId, seq: u64, msg: ClientMessage) {
        // Any traffic proves liveness
        let now = self.state.tick;
        if let Some(participant) = self.state.participant_mut(from) {
            participant.last_seen_tick = now;
            if !participant.is_connected() {
                participant.connection = ConnectionState::Connected;
                info!(participant = %from, "traffic resumed from disconnected participant");
            } else if participant.connection == ConnectionState::Reconnecting {
                participant.connection = ConnectionState::Connected;
            }
        } else {
            debug!(participant = %from, "message from unknown participant dropped");
            return;
        }

        match msg {
            ClientMessage::Join(_) => {
                // The connection guard forwards joins as Hello intents;
                // a host-side Join over the loop-back is meaningless.
                debug!(participant = %from, "stray join ignored");
            }
            ClientMessage::Ready { ready } => self.handle_ready(from, seq, ready),
            ClientMessage::PositionUpdate { x, y, facing } => {
                self.handle_position(from, seq, x, y, facing)
            }
            ClientMessage::BattleAction { battle_id, battle_move } => {
                self.handle_battle_action(from, seq, battle_id, battle_move)
            }
            ClientMessage::SpectateRequest { target } => self.handle_spectate(from, seq, target),
            ClientMessage::DesyncReport { state_hash } => {
                warn!(
                    participant = %from,
                    client_hash = %hex::encode(&state_hash[..8]),
                    host_hash = %hex::encode(&self.state.compute_hash()[..8]),
                    "desync reported, forcing resync"
                );
                self.send_resync(from);
            }
            ClientMessage::Heartbeat { tick } => {
                self.send_to(from, ServerMessage::HeartbeatAck { tick });
            }
            ClientMessage::HeartbeatAck { .. } => {}
            ClientMessage::Leave => self.handle_leave(from),
        }
    }

    fn handle_ready(&mut self, from: ParticipantId, seq: u64, ready: bool) {
        if self.state.phase != SessionPhase::Lobby {
            self.reject(from, seq, RejectReason::NotInLobby);
            return;
        }
        if let Some(participant) = self.state.participant_mut(from) {
            participant.ready = ready;
        }
        debug!(participant = %from, ready, "readiness updated");
        self.broadcast_lobby_state();
    }

    /// A client's claim about its own position; never about anyone else's.
    fn handle_position(&mut self, from: ParticipantId, seq: u64, x: i32, y: i32, facing: Facing) {
        if self.state.phase != SessionPhase::InProgress {
            self.reject(from, seq, RejectReason::MatchNotInProgress);
            return;
        }
        if self.state.timer.state != TimerState::Running {
            // Overworld is frozen between expiry and the next round
            self.reject(from, seq, RejectReason::ActionsFrozen);
            return;
        }
        match self.state.participant_mut(from) {
            Some(p) if p.alive => {
                p.x = x;
                p.y = y;
                p.facing = facing;
            }
            _ => self.reject(from, seq, RejectReason::NotAlive),
        }
    }

    fn handle_battle_action(
        &mut self,
        from: ParticipantId,
        seq: u64,
        battle_id: u32,
        battle_move: BattleMove,
    ) {
        if self.state.phase != SessionPhase::InProgress {
            self.reject(from, seq, RejectReason::MatchNotInProgress);
            return;
        }
        let now = self.state.tick;
        let Some(battle) = self.state.battles.get_mut(&battle_id) else {
            self.reject(from, seq, RejectReason::UnknownBattle);
            return;
        };

        match battle.submit_move(from, battle_move, now) {
            Ok(()) => {
                let phase = battle.phase;
                let (side_a, side_b) = (battle.side_a, battle.side_b);
                debug!(participant = %from, battle_id, ?phase, "move accepted");
                // Medium cadence: phase transition pushed to the involved
                // sides (and whoever is watching them) as a snapshot
                self.sync_involved(&[side_a, side_b]);
            }
            Err(e) => {
                let reason = match e {
                    MoveError::NotACombatant => RejectReason::NotACombatant,
                    MoveError::AlreadySubmitted => RejectReason::AlreadySubmitted,
                    MoveError::NotAcceptingMoves | MoveError::DeadlinePassed => {
                        RejectReason::StaleAction
                    }
                };
                self.reject(from, seq, reason);
            }
        }
    }

    fn handle_spectate(&mut self, from: ParticipantId, seq: u64, target: ParticipantId) {
        let eliminated = self.state.participant(from).map(|p| !p.alive).unwrap_or(false);
        if !eliminated {
            self.reject(from, seq, RejectReason::NotEliminated);
            return;
        }
        let target_alive = self.state.participant(target).map(|p| p.alive).unwrap_or(false);
        if !target_alive {
            self.reject(from, seq, RejectReason::TargetNotAlive);
            return;
        }

        self.spectators.subscribe(from, target);
        info!(spectator = %from, target = %target, "spectator subscribed");
        // No history is replayed; the next resync catches them up
    }

    fn handle_leave(&mut self, from: ParticipantId) {
        info!(participant = %from, "participant left");
        self.links.remove(&from);
        self.spectators.unsubscribe(from);

        if self.state.phase == SessionPhase::Lobby {
            self.state.remove_participant(from);
            self.broadcast_lobby_state();
            return;
        }

        // A voluntary leave mid-match forfeits immediately: default any
        // pending battle move, then eliminate.
        for battle in self.state.battles.values_mut() {
            if battle.involves(from) {
                battle.force_default(from);
            }
        }
        let events = roster::mark_eliminated(&mut self.state, from);
        self.dispatch_events(&events);
    }

    /// Socket closed or violations escalated: non-fatal, grace window opens.
    fn handle_connection_closed(&mut self, participant: ParticipantId) {
        self.links.remove(&participant);
        let now = self.state.tick;
        if let Some(p) = self.state.participant_mut(participant) {
            if p.is_connected() {
                p.connection = ConnectionState::Disconnected { since_tick: now };
                warn!(participant = %participant, tick = now, "connection lost");
            }
        }
        if self.state.phase == SessionPhase::Lobby {
            self.broadcast_lobby_state();
        }
    }

    /// Host-only guarded transition out of the lobby.
    fn handle_start_match(&mut self) -> Result<(), RejectReason> {
        if self.state.phase != SessionPhase::Lobby {
            return Err(RejectReason::NotInLobby);
        }
        if !self.state.lobby_ready() {
            return Err(RejectReason::NotReady);
        }

        let roster_ids: Vec<u8> = self.state.participants.keys().map(|id| id.0).collect();
        self.state.seed = derive_session_seed(&self.state.session_id, &roster_ids);
        self.state.phase = SessionPhase::InProgress;
        self.state.round = 1;
        self.state.timer.reset();

        info!(
            session = %hex::encode(&self.state.session_id[..4]),
            participants = roster_ids.len(),
            seed = self.state.seed,
            "match started"
        );

        self.broadcast_all(ServerMessage::MatchStart {
            round: 1,
            session_seed: self.state.seed,
        });
        self.broadcast_timer_sync();
        Ok(())
    }

    // =========================================================================
    // TICK & BROADCAST CADENCES
    // =========================================================================

    /// Advance one tick and emit the cadenced broadcasts.
    /// Returns `true` once the session has ended and the winner is out.
    fn advance_tick(&mut self) -> bool {
        let result = advance(&mut self.state, &self.config.rules, self.pairing.as_ref());
        self.dispatch_events(&result.events);

        if result.ended {
            return true;
        }

        if self.state.phase == SessionPhase::InProgress
            && self.state.timer.state == TimerState::Running
        {
            // High frequency: overworld positions every tick
            self.broadcast_positions();

            // Roughly once a second: countdown sync
            if self.state.tick % self.config.tick_rate as u64 == 0 {
                self.broadcast_timer_sync();
            }
        }

        if self.state.tick.saturating_sub(self.last_heartbeat_tick)
            >= self.config.heartbeat_interval_ticks
        {
            self.last_heartbeat_tick = self.state.tick;
            self.broadcast_all(ServerMessage::Heartbeat { tick: self.state.tick });
        }

        // Low frequency: the self-heal resync
        if self.state.tick.saturating_sub(self.last_resync_tick)
            >= self.config.resync_interval_ticks
        {
            self.last_resync_tick = self.state.tick;
            self.broadcast_resync();
        }

        false
    }

    /// Convert session events into catalog messages at medium cadence.
    fn dispatch_events(&mut self, events: &[SessionEvent]) {
        for event in events {
            match &event.data {
                SessionEventData::MatchStarted { .. } => {}
                SessionEventData::RoundStarted { .. }
                | SessionEventData::TimerExpired { .. } => {
                    self.broadcast_timer_sync();
                }
                SessionEventData::PairingResolved { round, pairs: _, bye } => {
                    let pairs: Vec<PairEntry> = self
                        .state
                        .battles
                        .values()
                        .map(|b| PairEntry {
                            battle_id: b.id,
                            side_a: b.side_a,
                            side_b: b.side_b,
                            deadline_tick: b.deadline_tick,
                        })
                        .collect();
                    self.broadcast_all(ServerMessage::PairingResult(PairingResult {
                        round: *round,
                        pairs,
                        bye: *bye,
                    }));
                }
                SessionEventData::BattleStarted { battle_id, side_a, side_b, .. } => {
                    self.broadcast_all(ServerMessage::EncounterTrigger {
                        kind: EncounterKind::PvpBattle,
                        participants: vec![*side_a, *side_b],
                        battle_id: *battle_id,
                    });
                }
                SessionEventData::BattleWaiting { .. } => {}
                SessionEventData::BattleDefaulted { battle_id, side } => {
                    debug!(battle_id, side = %side, "deadline default applied");
                }
                SessionEventData::BattleResolved { battle_id, outcome } => {
                    let loser_lives_left = self
                        .state
                        .participant(outcome.loser)
                        .map(|p| p.lives)
                        .unwrap_or(0);
                    let msg = ServerMessage::BattleResult {
                        battle_id: *battle_id,
                        outcome: *outcome,
                        loser_lives_left,
                    };
                    self.send_involved(&[outcome.winner, outcome.loser], msg);
                }
                SessionEventData::LivesLost { id, lives_left } => {
                    debug!(participant = %id, lives_left, "life lost");
                }
                SessionEventData::ParticipantEliminated { id } => {
                    // A dead target can no longer be watched
                    let orphaned = self.spectators.drop_target(*id);
                    for spectator in orphaned {
                        debug!(spectator = %spectator, "spectate target eliminated");
                    }
                    self.broadcast_all(ServerMessage::PlayerDied { participant_id: *id });
                }
                SessionEventData::ParticipantDisconnected { id } => {
                    debug!(participant = %id, "disconnected");
                    if self.state.phase == SessionPhase::Lobby {
                        self.broadcast_lobby_state();
                    }
                }
                SessionEventData::ParticipantReconnected { id } => {
                    debug!(participant = %id, "reconnected");
                }
                SessionEventData::MatchWinner { id } => {
                    let scores = self.final_scores();
                    self.broadcast_all(ServerMessage::MatchWinner {
                        participant_id: *id,
                        scores,
                    });
                }
            }
        }
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    /// Queue a message to one participant; a full queue drops that client.
    fn send_to(&mut self, id: ParticipantId, msg: ServerMessage) {
        let result = match self.links.get_mut(&id) {
            Some(link) => link.try_send(msg),
            None => return,
        };
        if let Err(error) = result {
            match error {
                OutboundError::QueueFull => {
                    warn!(participant = %id, "outbound overflow, dropping slow client")
                }
                OutboundError::Closed => debug!(participant = %id, "outbound closed"),
            }
            self.handle_connection_closed(id);
        }
    }

    /// Broadcast to every linked participant.
    fn broadcast_all(&mut self, msg: ServerMessage) {
        let ids: Vec<ParticipantId> = self.links.keys().copied().collect();
        for id in ids {
            self.send_to(id, msg.clone());
        }
    }

    /// Send to the involved participants plus everyone spectating them.
    fn send_involved(&mut self, involved: &[ParticipantId], msg: ServerMessage) {
        let mut recipients: Vec<ParticipantId> = involved.to_vec();
        for id in involved {
            recipients.extend(self.spectators.spectators_of(*id));
        }
        recipients.sort_unstable();
        recipients.dedup();
        for id in recipients {
            self.send_to(id, msg.clone());
        }
    }

    /// Push a fresh snapshot to the involved sides and their spectators.
    fn sync_involved(&mut self, involved: &[ParticipantId]) {
        let sync = self.full_sync();
        self.send_involved(involved, ServerMessage::Resync(sync));
    }

    /// High-frequency position relay. Alive participants get the full
    /// batch; spectators get their target's stream only.
    fn broadcast_positions(&mut self) {
        let entries: Vec<PositionEntry> = self
            .state
            .participants
            .values()
            .filter(|p| p.alive)
            .map(|p| PositionEntry { id: p.id, x: p.x, y: p.y, facing: p.facing })
            .collect();
        let tick = self.state.tick;

        let ids: Vec<ParticipantId> = self.links.keys().copied().collect();
        for id in ids {
            let alive = self.state.participant(id).map(|p| p.alive).unwrap_or(false);
            if alive {
                self.send_to(
                    id,
                    ServerMessage::PositionUpdate(PositionBatch { tick, entries: entries.clone() }),
                );
            } else if let Some(target) = self.spectators.target_of(id) {
                let filtered: Vec<PositionEntry> =
                    entries.iter().copied().filter(|e| e.id == target).collect();
                self.send_to(
                    id,
                    ServerMessage::PositionUpdate(PositionBatch { tick, entries: filtered }),
                );
            }
        }
    }

    fn broadcast_timer_sync(&mut self) {
        let msg = ServerMessage::TimerSync {
            round: self.state.round,
            remaining_secs: self.state.timer.remaining_secs(self.config.tick_rate),
            timer_state: self.state.timer.state,
        };
        self.broadcast_all(msg);
    }

    fn broadcast_lobby_state(&mut self) {
        let lobby = LobbyState {
            phase: self.state.phase,
            participants: self
                .state
                .participants
                .values()
                .map(|p| LobbyEntry {
                    id: p.id,
                    display_name: p.display_name.clone(),
                    role: p.role,
                    ready: p.ready,
                    connected: p.is_connected(),
                })
                .collect(),
        };
        self.broadcast_all(ServerMessage::LobbyState(lobby));
    }

    fn broadcast_resync(&mut self) {
        let sync = self.full_sync();
        self.broadcast_all(ServerMessage::Resync(sync));
    }

    fn send_resync(&mut self, id: ParticipantId) {
        let sync = self.full_sync();
        self.send_to(id, ServerMessage::Resync(sync));
    }

    /// Snapshot the authoritative state for the self-heal payload.
    fn full_sync(&self) -> FullSync {
        FullSync {
            tick: self.state.tick,
            round: self.state.round,
            phase: self.state.phase,
            timer_state: self.state.timer.state,
            remaining_secs: self.state.timer.remaining_secs(self.config.tick_rate),
            session_seed: self.state.seed,
            participants: self
                .state
                .participants
                .values()
                .map(|p| ParticipantSync {
                    id: p.id,
                    display_name: p.display_name.clone(),
                    role: p.role,
                    alive: p.alive,
                    lives: p.lives,
                    ready: p.ready,
                    connected: p.is_connected(),
                    x: p.x,
                    y: p.y,
                    facing: p.facing,
                    wins: p.wins,
                    profile: p.profile,
                })
                .collect(),
            battles: self
                .state
                .battles
                .values()
                .map(|b| BattleSync {
                    battle_id: b.id,
                    round: b.round,
                    side_a: b.side_a,
                    side_b: b.side_b,
                    phase: b.phase,
                    deadline_tick: b.deadline_tick,
                    has_move_a: b.move_a.is_some(),
                    has_move_b: b.move_b.is_some(),
                    result_seed: b.result_seed,
                })
                .collect(),
            state_hash: self.state.compute_hash(),
        }
    }

    fn final_scores(&self) -> Vec<FinalScore> {
        self.state
            .participants
            .values()
            .map(|p| FinalScore {
                id: p.id,
                display_name: p.display_name.clone(),
                wins: p.wins,
                lives: p.lives,
                alive: p.alive,
            })
            .collect()
    }

    fn reject(&mut self, id: ParticipantId, seq: u64, reason: RejectReason) {
        debug!(participant = %id, seq, %reason, "intent rejected");
        self.send_to(id, ServerMessage::Rejected { seq, reason });
    }
}

/// Entropy for reconnect tokens (network-side, not part of the
/// deterministic simulation).
fn fresh_token() -> u64 {
    let bytes = uuid::Uuid::new_v4().into_bytes();
    u64::from_le_bytes(bytes[..8].try_into().expect("uuid has 16 bytes"))
}

// =============================================================================
// TESTS
// =============================================================================
