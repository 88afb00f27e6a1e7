//! WebSocket Arena Server
//!
//! The network edge: accepts up to 7 inbound client connections (the host
//! holds the eighth seat over an in-process loop-back), runs an
//! independent read/write loop per connection, and forwards validated
//! intents into the coordinator's single ordered queue. WebSocket frames
//! provide the length-delimited framing the protocol layer decodes from.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::game::state::ParticipantId;
use crate::game::tick::RoundRules;
use crate::network::coordinator::{CoordinatorConfig, LocalHandle, SessionCoordinator};
use crate::network::protocol::{ClientMessage, RejectReason, ServerEnvelope, ServerMessage};
use crate::network::transport::{
    ConnectionGuard, Ingest, Intent, MAX_VIOLATIONS, OUTBOUND_QUEUE_DEPTH,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ArenaConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Inbound client slots (the host's seat is not one of them).
    pub max_clients: usize,
    /// Simulation tick rate (Hz).
    pub tick_rate: u32,
    /// Round countdown (seconds).
    pub round_secs: u32,
    /// Battle move-selection window (seconds).
    pub move_deadline_secs: u32,
    /// Silence before a participant is marked disconnected (seconds).
    pub heartbeat_timeout_secs: u32,
    /// Disconnection before a participant is permanently dead (seconds).
    pub reconnect_grace_secs: u32,
    /// Interval between full-state resyncs (seconds).
    pub resync_interval_secs: u32,
    /// Outbound queue depth per connection.
    pub outbound_queue_depth: usize,
    /// Protocol violations tolerated before disconnect.
    pub max_violations: u32,
    /// Display name for the host participant.
    pub host_name: String,
    /// Server version string.
    pub version: String,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7777".parse().expect("static address parses"),
            max_clients: crate::CLIENT_CAPACITY,
            tick_rate: crate::TICK_RATE,
            round_secs: crate::ROUND_DURATION_SECS,
            move_deadline_secs: crate::MOVE_DEADLINE_SECS,
            heartbeat_timeout_secs: 10,
            reconnect_grace_secs: 30,
            resync_interval_secs: 5,
            outbound_queue_depth: OUTBOUND_QUEUE_DEPTH,
            max_violations: MAX_VIOLATIONS,
            host_name: "host".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ArenaConfig {
    /// Build a config from the environment, falling back to defaults.
    ///
    /// Recognized variables: `ARENA_BIND`, `ARENA_HOST_NAME`,
    /// `ARENA_MAX_CLIENTS`, `ARENA_ROUND_SECS`, `ARENA_MOVE_DEADLINE_SECS`,
    /// `ARENA_GRACE_SECS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(addr) = env_parse::<SocketAddr>("ARENA_BIND") {
            config.bind_addr = addr;
        }
        if let Ok(name) = std::env::var("ARENA_HOST_NAME") {
            if !name.is_empty() {
                config.host_name = name;
            }
        }
        if let Some(n) = env_parse::<usize>("ARENA_MAX_CLIENTS") {
            config.max_clients = n.min(crate::CLIENT_CAPACITY);
        }
        if let Some(n) = env_parse::<u32>("ARENA_ROUND_SECS") {
            config.round_secs = n.max(1);
        }
        if let Some(n) = env_parse::<u32>("ARENA_MOVE_DEADLINE_SECS") {
            config.move_deadline_secs = n.max(1);
        }
        if let Some(n) = env_parse::<u32>("ARENA_GRACE_SECS") {
            config.reconnect_grace_secs = n;
        }
        config
    }

    /// Map onto the coordinator's tick-denominated knobs.
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            tick_rate: self.tick_rate,
            rules: RoundRules {
                round_duration_ticks: self.round_secs * self.tick_rate,
                move_deadline_ticks: self.move_deadline_secs * self.tick_rate,
                heartbeat_timeout_ticks: (self.heartbeat_timeout_secs * self.tick_rate) as u64,
                reconnect_grace_ticks: (self.reconnect_grace_secs * self.tick_rate) as u64,
            },
            resync_interval_ticks: (self.resync_interval_secs * self.tick_rate) as u64,
            heartbeat_interval_ticks: (2 * self.tick_rate) as u64,
            host_name: self.host_name.clone(),
            inbound_queue_depth: 256,
            outbound_queue_depth: self.outbound_queue_depth,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ArenaServerError {
    /// Failed to bind to the configured address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error surfaced outside a connection task.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// The arena server: one session, one coordinator, many connections.
pub struct ArenaServer {
    config: ArenaConfig,
    coordinator: SessionCoordinator,
    intents: mpsc::Sender<Intent>,
}

impl ArenaServer {
    /// Create a server and the host's seat at the session.
    pub fn new(config: ArenaConfig) -> (Self, LocalHandle) {
        let (coordinator, intents, handle) =
            SessionCoordinator::new(config.coordinator_config());
        (Self { config, coordinator, intents }, handle)
    }

    /// Session id (for logs and discovery surfaces).
    pub fn session_id(&self) -> [u8; 16] {
        self.coordinator.session_id()
    }

    /// Run until the session ends or the host shuts down.
    pub async fn run(self) -> Result<(), ArenaServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!(
            addr = %self.config.bind_addr,
            version = %self.config.version,
            slots = self.config.max_clients,
            "arena server listening"
        );

        let mut coordinator_task = tokio::spawn(self.coordinator.run());
        let active = Arc::new(AtomicUsize::new(0));

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if active.load(Ordering::SeqCst) >= self.config.max_clients {
                                warn!(%addr, "client slots exhausted, rejecting connection");
                                continue;
                            }
                            debug!(%addr, "new connection");
                            spawn_connection(
                                stream,
                                addr,
                                self.intents.clone(),
                                self.config.max_violations,
                                self.config.outbound_queue_depth,
                                active.clone(),
                            );
                        }
                        Err(e) => error!("accept error: {e}"),
                    }
                }
                _ = &mut coordinator_task => {
                    info!("session over, server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Spawn the read/write loops for one client connection.
fn spawn_connection(
    stream: TcpStream,
    addr: SocketAddr,
    intents: mpsc::Sender<Intent>,
    max_violations: u32,
    queue_depth: usize,
    active: Arc<AtomicUsize>,
) {
    active.fetch_add(1, Ordering::SeqCst);

    tokio::spawn(async move {
        let result = drive_connection(stream, addr, intents, max_violations, queue_depth).await;
        if let Some(participant) = result {
            debug!(%addr, participant = %participant, "connection finished");
        }
        active.fetch_sub(1, Ordering::SeqCst);
    });
}

/// The connection's lifetime: handshake, read loop, cleanup.
/// Returns the participant that was attached, if the join completed.
async fn drive_connection(
    stream: TcpStream,
    addr: SocketAddr,
    intents: mpsc::Sender<Intent>,
    max_violations: u32,
    queue_depth: usize,
) -> Option<ParticipantId> {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(%addr, "websocket handshake failed: {e}");
            return None;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerEnvelope>(queue_depth);

    // Independent writer: drains the bounded outbound queue. The
    // coordinator only ever try_sends into it.
    let writer = tokio::spawn(async move {
        while let Some(envelope) = out_rx.recv().await {
            let text = match envelope.to_json() {
                Ok(t) => t,
                Err(e) => {
                    error!("failed to serialize outbound message: {e}");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut guard = ConnectionGuard::new(max_violations);

    while let Some(frame) = ws_receiver.next().await {
        let payload = match frame {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(bytes)) => bytes,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => {
                debug!(%addr, "client closed");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                debug!(%addr, "websocket error: {e}");
                break;
            }
        };

        match guard.ingest(&payload) {
            Ingest::Join(request) => {
                let (reply, result) = oneshot::channel();
                if intents
                    .send(Intent::Hello { request, outbound: out_tx.clone(), reply })
                    .await
                    .is_err()
                {
                    break;
                }
                match result.await {
                    Ok(Ok(accepted)) => {
                        guard.assign(accepted.participant_id);
                        info!(%addr, participant = %accepted.participant_id, "join accepted");
                    }
                    Ok(Err(reason)) => {
                        warn!(%addr, %reason, "join refused");
                        send_refusal(&out_tx, reason).await;
                        break;
                    }
                    Err(_) => break,
                }
            }
            Ingest::Message { seq, msg } => {
                let Some(participant) = guard.participant() else { continue };
                let leaving = matches!(msg, ClientMessage::Leave);
                if intents
                    .send(Intent::Message { participant, seq, msg })
                    .await
                    .is_err()
                {
                    break;
                }
                if leaving {
                    break;
                }
            }
            Ingest::Discard => {}
            Ingest::Violation(violation) => {
                warn!(%addr, %violation, violations = guard.violations(), "protocol violation");
            }
            Ingest::Escalate(violation) => {
                warn!(%addr, %violation, "violation limit reached, disconnecting");
                break;
            }
        }
    }

    // The coordinator opens the grace window; reconnection may follow
    let participant = guard.participant();
    if let Some(participant) = participant {
        let _ = intents.send(Intent::ConnectionClosed { participant }).await;
    }

    writer.abort();
    participant
}

/// One-off refusal on a connection that never got a link installed.
async fn send_refusal(out_tx: &mpsc::Sender<ServerEnvelope>, reason: RejectReason) {
    let envelope = ServerEnvelope {
        sender: 0,
        seq: 1,
        msg: ServerMessage::Rejected { seq: 0, reason },
    };
    let _ = out_tx.send(envelope).await;
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ArenaConfig::default();
        assert_eq!(config.max_clients, 7);
        assert_eq!(config.tick_rate, 20);
        assert_eq!(config.round_secs, 90);
        assert_eq!(config.move_deadline_secs, 30);
    }

    #[test]
    fn test_coordinator_config_mapping() {
        let config = ArenaConfig::default();
        let mapped = config.coordinator_config();

        assert_eq!(mapped.rules.round_duration_ticks, 90 * 20);
        assert_eq!(mapped.rules.move_deadline_ticks, 30 * 20);
        assert_eq!(mapped.rules.reconnect_grace_ticks, (30 * 20) as u64);
        assert_eq!(mapped.resync_interval_ticks, (5 * 20) as u64);
    }

    #[tokio::test]
    async fn test_server_creation() {
        let config = ArenaConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let (server, handle) = ArenaServer::new(config);

        // The host seat is installed before any socket exists
        assert_eq!(handle.host_id(), ParticipantId(0));
        assert_ne!(server.session_id(), [0; 16]);
    }
}
