//! One handler per transport link. Turns a raw TCP stream into a validated,
//! latency-instrumented command/event channel bound to exactly one identity
//! in one room.
//!
//! Frames are newline-delimited JSON, one self-describing object per line.
//! The first line is the handshake; everything after is commands in, events
//! out. Outbound events ride a per-connection queue drained by a dedicated
//! writer task, so a slow client only ever stalls itself.

use crate::clock;
use crate::config::EngineConfig;
use crate::registry::{RoomHandle, RoomRegistry};
use crate::room::{JoinRequest, Role, RoomMsg};
use log::{debug, info, warn};
use serde::Serialize;
use shared::{GameCommand, GameEvent, HeartbeatId, Hello, HelloReply, JoinError};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, timeout, MissedTickBehavior};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Entry point for each accepted socket.
pub async fn handle(
    stream: TcpStream,
    addr: SocketAddr,
    registry: RoomRegistry,
    config: EngineConfig,
) {
    match drive(stream, addr, registry, config).await {
        Ok(()) => debug!("connection {}: closed", addr),
        Err(e) => debug!("connection {}: closed: {}", addr, e),
    }
}

async fn drive(
    stream: TcpStream,
    addr: SocketAddr,
    registry: RoomRegistry,
    config: EngineConfig,
) -> Result<(), BoxError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // handshake: the first frame names the room and the identity shape
    let first = match timeout(config.handshake_timeout, lines.next_line()).await {
        Ok(Ok(Some(line))) => line,
        Ok(Ok(None)) => return Ok(()),
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Err("handshake timed out".into()),
    };
    let hello: Hello = serde_json::from_str(&first)?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<GameEvent>();
    let (code, request) = match hello {
        Hello::Create { board } => {
            let (code, host_token) = registry.create(board).await;
            info!("connection {}: created room {}", addr, code);
            write_line(&mut write_half, &HelloReply::Created { code, host_token }).await?;
            return Ok(());
        }
        Hello::Join { code, name } => (
            code,
            JoinRequest::NewPlayer {
                name,
                sender: event_tx.clone(),
            },
        ),
        Hello::Resume { code, pid, token } => (
            code,
            JoinRequest::Resume {
                pid,
                token,
                sender: event_tx.clone(),
            },
        ),
        Hello::Host { code, host_token } => (
            code,
            JoinRequest::Host {
                token: host_token,
                sender: event_tx.clone(),
            },
        ),
    };

    let room = match registry.lookup(&code).await {
        Some(handle) => handle,
        None => {
            return reject(&mut write_half, JoinError::RoomNotFound {}).await;
        }
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    if !room.send(RoomMsg::Join {
        request,
        reply: reply_tx,
    }) {
        return reject(&mut write_half, JoinError::RoomNotFound {}).await;
    }
    let role = match reply_rx.await {
        Ok(Ok(role)) => role,
        Ok(Err(reason)) => {
            return reject(&mut write_half, reason).await;
        }
        // room torn down while the join was in flight
        Err(_) => {
            return reject(&mut write_half, JoinError::RoomNotFound {}).await;
        }
    };
    info!("connection {}: joined room {} as {:?}", addr, code, role);

    // writer task: drains this connection's own queue; detached on exit and
    // finishes once every sender clone is gone
    let _writer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let mut line = match serde_json::to_string(&event) {
                Ok(line) => line,
                Err(e) => {
                    warn!("failed to encode event: {}", e);
                    continue;
                }
            };
            line.push('\n');
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let result = steady_state(&mut lines, &room, &event_tx, role, &config).await;

    // the identity survives; only the connection capability is revoked
    room.send(RoomMsg::Left { from: role });
    drop(event_tx);
    result
}

async fn reject(write_half: &mut OwnedWriteHalf, reason: JoinError) -> Result<(), BoxError> {
    info!("handshake rejected: {}", reason);
    write_line(write_half, &HelloReply::Rejected { reason }).await
}

async fn steady_state(
    lines: &mut Lines<BufReader<OwnedReadHalf>>,
    room: &RoomHandle,
    event_tx: &mpsc::UnboundedSender<GameEvent>,
    role: Role,
    config: &EngineConfig,
) -> Result<(), BoxError> {
    let mut heartbeat = interval(config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut probes = ProbeTracker::new();
    // the host never buzzes, so its latency is not sampled
    let sample_latency = matches!(role, Role::Player(_));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let text = match line {
                    Ok(Some(text)) => text,
                    Ok(None) => return Ok(()),
                    Err(e) => return Err(e.into()),
                };
                if text.trim().is_empty() {
                    continue;
                }
                // an unrecognized tag or malformed payload is a protocol
                // error: it costs this connection, never the room
                let cmd: GameCommand = serde_json::from_str(&text)
                    .map_err(|e| format!("protocol error: {}", e))?;
                match cmd {
                    GameCommand::HeartbeatAck { hbid, .. } => {
                        if let Some(rtt) = probes.complete(hbid, config.probe_timeout) {
                            // assumes a symmetric path: one-way latency is
                            // taken as half the measured round trip
                            let latency_ms = (rtt.as_millis() as u64) / 2;
                            if let Role::Player(pid) = role {
                                room.send(RoomMsg::Latency { pid, latency_ms });
                            }
                        }
                        let _ = event_tx.send(GameEvent::HeartbeatSeen { hbid });
                    }
                    GameCommand::LatencyReport { hbid, latency_ms } => {
                        // diagnostic display only; never feeds arbitration
                        debug!(
                            "{:?} reports perceived latency {}ms (hbid {})",
                            role, latency_ms, hbid
                        );
                    }
                    cmd => {
                        if !room.send(RoomMsg::Command { from: role, cmd }) {
                            let _ = event_tx.send(GameEvent::RoomClosed {});
                            return Err("room closed".into());
                        }
                    }
                }
            }
            _ = heartbeat.tick(), if sample_latency => {
                let hbid = probes.begin();
                let _ = event_tx.send(GameEvent::Heartbeat {
                    hbid,
                    sent_ms: clock::unix_ms(),
                });
            }
        }
    }
}

async fn write_line<T: Serialize>(writer: &mut OwnedWriteHalf, msg: &T) -> Result<(), BoxError> {
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    Ok(())
}

/// Bookkeeping for the probe exchange: at most one probe is outstanding, and
/// starting a new one silently supersedes an unanswered predecessor.
struct ProbeTracker {
    next_hbid: HeartbeatId,
    pending: Option<(HeartbeatId, Instant)>,
}

impl ProbeTracker {
    fn new() -> Self {
        Self {
            next_hbid: 0,
            pending: None,
        }
    }

    fn begin(&mut self) -> HeartbeatId {
        self.next_hbid = self.next_hbid.wrapping_add(1);
        self.pending = Some((self.next_hbid, Instant::now()));
        self.next_hbid
    }

    /// Returns the round trip for the outstanding probe, or None when the
    /// ack is stale, unmatched, or too old to trust.
    fn complete(&mut self, hbid: HeartbeatId, max_age: Duration) -> Option<Duration> {
        match self.pending {
            Some((expected, sent)) if expected == hbid => {
                self.pending = None;
                let rtt = sent.elapsed();
                if rtt <= max_age {
                    Some(rtt)
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}
