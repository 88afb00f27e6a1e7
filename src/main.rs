//! Ledger Arena Server
//!
//! Headless host process: owns the authoritative session, readies its own
//! seat, starts the match once every connected participant is ready, and
//! logs the session's progress until a winner stands.

use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ledger_arena::network::coordinator::LocalHandle;
use ledger_arena::network::protocol::{ClientMessage, RejectReason, ServerMessage};
use ledger_arena::network::server::{ArenaConfig, ArenaServer};
use ledger_arena::{TICK_RATE, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ArenaConfig::from_env();
    info!("Ledger Arena Server v{}", VERSION);
    info!("Tick Rate: {} Hz", TICK_RATE);
    info!("Round: {}s, Move Deadline: {}s", config.round_secs, config.move_deadline_secs);

    let (server, handle) = ArenaServer::new(config);
    let host_task = tokio::spawn(run_host(handle));

    server.run().await.context("arena server failed")?;
    host_task.abort();
    Ok(())
}

/// Drive the host's own seat: ready up, start when the lobby is, narrate.
async fn run_host(mut handle: LocalHandle) {
    if !handle.send(ClientMessage::Ready { ready: true }).await {
        return;
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut started = false;

    loop {
        tokio::select! {
            _ = ticker.tick(), if !started => {
                match handle.start_match().await {
                    Ok(()) => started = true,
                    Err(RejectReason::NotReady) => {}
                    Err(RejectReason::NotInLobby) => started = true,
                    Err(reason) => warn!(%reason, "start attempt failed"),
                }
            }
            maybe_msg = handle.messages.recv() => {
                let Some(envelope) = maybe_msg else { break };
                match envelope.msg {
                    ServerMessage::LobbyState(lobby) => {
                        let ready = lobby.participants.iter().filter(|p| p.ready).count();
                        info!("lobby: {}/{} ready", ready, lobby.participants.len());
                    }
                    ServerMessage::MatchStart { round, session_seed } => {
                        info!(round, seed = session_seed, "match started");
                    }
                    ServerMessage::PairingResult(pairing) => {
                        info!(
                            round = pairing.round,
                            battles = pairing.pairs.len(),
                            bye = ?pairing.bye,
                            "pairing resolved"
                        );
                    }
                    ServerMessage::BattleResult { battle_id, outcome, loser_lives_left } => {
                        info!(
                            battle_id,
                            winner = %outcome.winner,
                            loser = %outcome.loser,
                            loser_lives_left,
                            "battle resolved"
                        );
                    }
                    ServerMessage::PlayerDied { participant_id } => {
                        info!(participant = %participant_id, "eliminated");
                    }
                    ServerMessage::MatchWinner { participant_id, scores } => {
                        info!(winner = %participant_id, "match over");
                        for score in scores {
                            info!(
                                participant = %score.id,
                                name = %score.display_name,
                                wins = score.wins,
                                lives = score.lives,
                                "final score"
                            );
                        }
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
}
