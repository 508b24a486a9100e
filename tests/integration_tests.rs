//! Integration tests for the room session engine
//!
//! These tests drive the engine over real TCP sockets: handshake and error
//! taxonomy, framing, heartbeat-derived latency, and full question rounds.

use serde::Serialize;
use server::config::EngineConfig;
use server::network::Server;
use shared::{
    Board, Category, GameCommand, GameEvent, Hello, HelloReply, HostToken, JoinError, Phase,
    PlayerId, PlayerToken, Question, RoomCode,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// HANDSHAKE TESTS
mod handshake_tests {
    use super::*;

    #[tokio::test]
    async fn create_then_join_as_host_and_player() {
        let addr = start_server(test_config()).await;
        let (code, host_token) = create_room(addr).await;

        let mut host = TestClient::connect(addr).await;
        host.send(&Hello::Host {
            code: code.clone(),
            host_token,
        })
        .await;
        host.wait_for(|e| matches!(e, GameEvent::PlayerList { .. }))
            .await;
        let snapshot = host
            .wait_for(|e| matches!(e, GameEvent::GameSnapshot { .. }))
            .await;
        match snapshot {
            GameEvent::GameSnapshot { phase, board, .. } => {
                assert_eq!(phase, Phase::Lobby);
                assert_eq!(board.categories.len(), 1);
            }
            _ => unreachable!(),
        }

        let (mut player, pid, _token) = join_player(addr, &code, "Alice").await;
        assert_eq!(pid, 1);
        player
            .wait_for(|e| matches!(e, GameEvent::GameSnapshot { .. }))
            .await;

        // the host sees the roster change
        let list = host
            .wait_for(|e| matches!(e, GameEvent::PlayerList { .. }))
            .await;
        match list {
            GameEvent::PlayerList { players } => {
                assert_eq!(players.len(), 1);
                assert_eq!(players[0].name, "Alice");
                assert!(players[0].connected);
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn unknown_room_is_rejected() {
        let addr = start_server(test_config()).await;

        let mut client = TestClient::connect(addr).await;
        client
            .send(&Hello::Join {
                code: RoomCode::from("ZZZZZZ"),
                name: "Alice".to_string(),
            })
            .await;

        match client.recv_reply().await {
            HelloReply::Rejected { reason } => assert_eq!(reason, JoinError::RoomNotFound {}),
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(client.recv_raw().await.is_none(), "connection should close");
    }

    #[tokio::test]
    async fn wrong_tokens_are_rejected() {
        let addr = start_server(test_config()).await;
        let (code, _host_token) = create_room(addr).await;

        let mut impostor = TestClient::connect(addr).await;
        impostor
            .send(&Hello::Host {
                code: code.clone(),
                host_token: HostToken::generate(),
            })
            .await;
        match impostor.recv_reply().await {
            HelloReply::Rejected { reason } => assert_eq!(reason, JoinError::InvalidToken {}),
            other => panic!("expected rejection, got {:?}", other),
        }

        let mut stale = TestClient::connect(addr).await;
        stale
            .send(&Hello::Resume {
                code,
                pid: 42,
                token: PlayerToken::generate(),
            })
            .await;
        match stale.recv_reply().await {
            HelloReply::Rejected { reason } => assert_eq!(reason, JoinError::InvalidToken {}),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn full_room_rejects_new_identities() {
        let config = EngineConfig {
            max_players: 1,
            ..test_config()
        };
        let addr = start_server(config).await;
        let (code, _host_token) = create_room(addr).await;

        let (_alice, _, alice_token) = join_player(addr, &code, "Alice").await;

        let mut bob = TestClient::connect(addr).await;
        bob.send(&Hello::Join {
            code: code.clone(),
            name: "Bob".to_string(),
        })
        .await;
        match bob.recv_reply().await {
            HelloReply::Rejected { reason } => assert_eq!(reason, JoinError::RoomFull {}),
            other => panic!("expected rejection, got {:?}", other),
        }

        // the cap limits identities, not reconnects
        let mut alice_again = TestClient::connect(addr).await;
        alice_again
            .send(&Hello::Resume {
                code,
                pid: 1,
                token: alice_token,
            })
            .await;
        let state = alice_again
            .wait_for(|e| matches!(e, GameEvent::PlayerState { .. }))
            .await;
        match state {
            GameEvent::PlayerState { pid, .. } => assert_eq!(pid, 1),
            _ => unreachable!(),
        }
    }
}

/// GAME ROUND TESTS
mod round_tests {
    use super::*;

    #[tokio::test]
    async fn full_round_scores_the_buzz_winner() {
        let addr = start_server(test_config()).await;
        let (code, host_token) = create_room(addr).await;
        let mut host = join_host(addr, &code, host_token).await;
        let (mut alice, alice_pid, _) = join_player(addr, &code, "Alice").await;
        let (mut bob, _bob_pid, _) = join_player(addr, &code, "Bob").await;

        host.send(&GameCommand::StartGame {}).await;
        host.send(&GameCommand::HostChoice {
            category: 0,
            question: 0,
        })
        .await;
        host.send(&GameCommand::HostReady {}).await;

        // Alice buzzes first; both have a zero latency estimate, so earliest
        // server receipt wins
        alice
            .wait_for(|e| matches!(e, GameEvent::BuzzWindowOpen { .. }))
            .await;
        alice.send(&GameCommand::Buzz {}).await;
        sleep(Duration::from_millis(50)).await;
        bob.wait_for(|e| matches!(e, GameEvent::BuzzWindowOpen { .. }))
            .await;
        bob.send(&GameCommand::Buzz {}).await;

        let result = host
            .wait_for(|e| matches!(e, GameEvent::BuzzResult { .. }))
            .await;
        match result {
            GameEvent::BuzzResult { winner, name } => {
                assert_eq!(winner, Some(alice_pid));
                assert_eq!(name.as_deref(), Some("Alice"));
            }
            _ => unreachable!(),
        }

        host.send(&GameCommand::HostChecked { correct: true }).await;
        let judged = host
            .wait_for(|e| matches!(e, GameEvent::AnswerJudged { .. }))
            .await;
        match judged {
            GameEvent::AnswerJudged {
                pid,
                correct,
                delta,
                score,
            } => {
                assert_eq!(pid, alice_pid);
                assert!(correct);
                assert_eq!(delta, 200);
                assert_eq!(score, 200);
            }
            _ => unreachable!(),
        }

        host.send(&GameCommand::HostContinue {}).await;
        host.wait_for(
            |e| matches!(e, GameEvent::GameSnapshot { phase: Phase::Selection, current_question: None, .. }),
        )
        .await;

        host.send(&GameCommand::EndGame {}).await;
        let ending = host
            .wait_for(|e| matches!(e, GameEvent::GameSnapshot { phase: Phase::GameEnd, .. }))
            .await;
        match ending {
            GameEvent::GameSnapshot { winner, .. } => assert_eq!(winner, Some(alice_pid)),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn measured_latency_compensates_slow_connections() {
        // one probe only: the interval's first tick fires immediately, and a
        // second probe would supersede it before the delayed ack lands
        let config = EngineConfig {
            buzz_window: Duration::from_millis(1000),
            heartbeat_interval: Duration::from_secs(10),
            ..test_config()
        };
        let addr = start_server(config).await;
        let (code, host_token) = create_room(addr).await;
        let mut host = join_host(addr, &code, host_token).await;
        let (mut fast, fast_pid, _) = join_player(addr, &code, "Fast").await;
        let (mut slow, slow_pid, _) = join_player(addr, &code, "Slow").await;

        // Fast ignores probes (estimate stays 0). Slow acknowledges one probe
        // after ~200ms, so the server books ~100ms of one-way latency.
        let probe = slow
            .wait_for(|e| matches!(e, GameEvent::Heartbeat { .. }))
            .await;
        let hbid = match probe {
            GameEvent::Heartbeat { hbid, .. } => hbid,
            _ => unreachable!(),
        };
        sleep(Duration::from_millis(200)).await;
        slow.send(&GameCommand::HeartbeatAck {
            hbid,
            client_recv_ms: 0,
        })
        .await;
        slow.wait_for(|e| matches!(e, GameEvent::HeartbeatSeen { .. }))
            .await;

        host.send(&GameCommand::StartGame {}).await;
        host.send(&GameCommand::HostChoice {
            category: 0,
            question: 0,
        })
        .await;
        host.send(&GameCommand::HostReady {}).await;

        // Fast's buzz reaches the server ~50ms ahead of Slow's, but Slow's
        // ~100ms credit places its action earlier once adjusted.
        fast.wait_for(|e| matches!(e, GameEvent::BuzzWindowOpen { .. }))
            .await;
        fast.send(&GameCommand::Buzz {}).await;
        slow.wait_for(|e| matches!(e, GameEvent::BuzzWindowOpen { .. }))
            .await;
        sleep(Duration::from_millis(50)).await;
        slow.send(&GameCommand::Buzz {}).await;

        let result = host
            .wait_for(|e| matches!(e, GameEvent::BuzzResult { .. }))
            .await;
        match result {
            GameEvent::BuzzResult { winner, .. } => {
                assert_eq!(winner, Some(slow_pid));
                assert_ne!(winner, Some(fast_pid));
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn skip_during_window_bypasses_arbitration() {
        let addr = start_server(test_config()).await;
        let (code, host_token) = create_room(addr).await;
        let mut host = join_host(addr, &code, host_token).await;
        let (mut alice, _, _) = join_player(addr, &code, "Alice").await;

        host.send(&GameCommand::StartGame {}).await;
        host.send(&GameCommand::HostChoice {
            category: 0,
            question: 0,
        })
        .await;
        host.send(&GameCommand::HostReady {}).await;

        alice
            .wait_for(|e| matches!(e, GameEvent::BuzzWindowOpen { .. }))
            .await;
        alice.send(&GameCommand::Buzz {}).await;
        sleep(Duration::from_millis(50)).await;
        host.send(&GameCommand::HostSkip {}).await;

        // the next phase change must be the reveal, with no result in between
        let event = host
            .wait_for(|e| {
                matches!(
                    e,
                    GameEvent::BuzzResult { .. }
                        | GameEvent::GameSnapshot {
                            phase: Phase::AnswerReveal,
                            ..
                        }
                )
            })
            .await;
        match event {
            GameEvent::GameSnapshot { players, .. } => {
                assert_eq!(players[0].score, 0, "skip never moves scores");
            }
            GameEvent::BuzzResult { .. } => panic!("skip must not run arbitration"),
            _ => unreachable!(),
        }
    }
}

/// CONNECTION LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn reconnect_restores_the_same_identity() {
        let addr = start_server(test_config()).await;
        let (code, _host_token) = create_room(addr).await;

        let (alice, pid, token) = join_player(addr, &code, "Alice").await;
        drop(alice); // connection gone, identity retained

        let mut revived = TestClient::connect(addr).await;
        revived
            .send(&Hello::Resume {
                code: code.clone(),
                pid,
                token,
            })
            .await;
        let state = revived
            .wait_for(|e| matches!(e, GameEvent::PlayerState { .. }))
            .await;
        match state {
            GameEvent::PlayerState { pid: got, .. } => assert_eq!(got, pid),
            _ => unreachable!(),
        }

        // a fresh join is a different identity
        let (_bob, bob_pid, _) = join_player(addr, &code, "Bob").await;
        assert_ne!(bob_pid, pid);
    }

    #[tokio::test]
    async fn protocol_error_drops_connection_but_not_identity() {
        let addr = start_server(test_config()).await;
        let (code, _host_token) = create_room(addr).await;
        let (mut alice, pid, token) = join_player(addr, &code, "Alice").await;

        alice.send_raw("{\"Teleport\":{}}\n").await;
        assert!(
            alice.drain_until_closed().await,
            "unknown tag should close the connection"
        );

        // the entry survived the protocol fault; reconnect works
        let mut revived = TestClient::connect(addr).await;
        revived
            .send(&Hello::Resume { code, pid, token })
            .await;
        let state = revived
            .wait_for(|e| matches!(e, GameEvent::PlayerState { .. }))
            .await;
        assert!(matches!(state, GameEvent::PlayerState { pid: got, .. } if got == pid));
    }

    #[tokio::test]
    async fn idle_room_is_reaped() {
        let config = EngineConfig {
            room_ttl: Duration::from_millis(300),
            ..test_config()
        };
        let addr = start_server(config).await;
        let (code, _host_token) = create_room(addr).await;

        // no one ever connects; the room removes itself after the TTL
        sleep(Duration::from_millis(700)).await;

        let mut late = TestClient::connect(addr).await;
        late.send(&Hello::Join {
            code,
            name: "Alice".to_string(),
        })
        .await;
        match late.recv_reply().await {
            HelloReply::Rejected { reason } => assert_eq!(reason, JoinError::RoomNotFound {}),
            other => panic!("expected rejection, got {:?}", other),
        }
    }
}

// HELPER FUNCTIONS

fn test_config() -> EngineConfig {
    EngineConfig {
        buzz_window: Duration::from_millis(400),
        heartbeat_interval: Duration::from_millis(200),
        tick_interval: Duration::from_millis(10),
        open_lead: Duration::from_millis(0),
        room_ttl: Duration::from_secs(60),
        ..EngineConfig::default()
    }
}

fn test_board() -> Board {
    Board {
        categories: vec![Category {
            title: "Numbers".to_string(),
            questions: vec![
                Question {
                    prompt: "2+2?".to_string(),
                    answer: "4".to_string(),
                    value: 200,
                    answered: false,
                },
                Question {
                    prompt: "6*2?".to_string(),
                    answer: "12".to_string(),
                    value: 400,
                    answered: false,
                },
            ],
        }],
    }
}

async fn start_server(config: EngineConfig) -> SocketAddr {
    let server = Server::new("127.0.0.1:0", config)
        .await
        .expect("failed to bind test server");
    let addr = server.local_addr().expect("no local addr");
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    addr
}

async fn create_room(addr: SocketAddr) -> (RoomCode, HostToken) {
    let mut client = TestClient::connect(addr).await;
    client
        .send(&Hello::Create {
            board: test_board(),
        })
        .await;
    match client.recv_reply().await {
        HelloReply::Created { code, host_token } => (code, host_token),
        other => panic!("room creation failed: {:?}", other),
    }
}

async fn join_host(addr: SocketAddr, code: &RoomCode, host_token: HostToken) -> TestClient {
    let mut host = TestClient::connect(addr).await;
    host.send(&Hello::Host {
        code: code.clone(),
        host_token,
    })
    .await;
    host.wait_for(|e| matches!(e, GameEvent::GameSnapshot { .. }))
        .await;
    host
}

async fn join_player(
    addr: SocketAddr,
    code: &RoomCode,
    name: &str,
) -> (TestClient, PlayerId, PlayerToken) {
    let mut client = TestClient::connect(addr).await;
    client
        .send(&Hello::Join {
            code: code.clone(),
            name: name.to_string(),
        })
        .await;
    let welcome = client
        .wait_for(|e| matches!(e, GameEvent::NewPlayer { .. }))
        .await;
    match welcome {
        GameEvent::NewPlayer { pid, token } => (client, pid, token),
        _ => unreachable!(),
    }
}

struct TestClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect failed");
        let (read_half, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read_half).lines(),
            writer,
        }
    }

    async fn send<T: Serialize>(&mut self, msg: &T) {
        let mut line = serde_json::to_string(msg).expect("encode failed");
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .expect("write failed");
    }

    async fn send_raw(&mut self, raw: &str) {
        self.writer
            .write_all(raw.as_bytes())
            .await
            .expect("write failed");
    }

    /// Next frame, or None once the server closes the connection.
    async fn recv_raw(&mut self) -> Option<String> {
        timeout(EVENT_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for a frame")
            .expect("read failed")
    }

    async fn recv_reply(&mut self) -> HelloReply {
        let line = self.recv_raw().await.expect("connection closed");
        serde_json::from_str(&line).expect("bad handshake reply")
    }

    /// Reads events until one matches the predicate, ignoring the rest.
    async fn wait_for<F>(&mut self, pred: F) -> GameEvent
    where
        F: Fn(&GameEvent) -> bool,
    {
        loop {
            let line = self.recv_raw().await.expect("connection closed");
            let event: GameEvent = serde_json::from_str(&line).expect("bad event frame");
            if pred(&event) {
                return event;
            }
        }
    }

    /// Consumes remaining frames; true when the server closed the stream.
    async fn drain_until_closed(&mut self) -> bool {
        loop {
            match timeout(EVENT_TIMEOUT, self.lines.next_line()).await {
                Ok(Ok(Some(_))) => continue,
                Ok(Ok(None)) => return true,
                Ok(Err(_)) => return true,
                Err(_) => return false,
            }
        }
    }
}
