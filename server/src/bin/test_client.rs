//! Headless smoke client: creates a room, connects a host and two players,
//! and drives one full question round over the wire, printing every frame.

use serde::Serialize;
use shared::{
    Board, Category, GameCommand, GameEvent, Hello, HelloReply, Question,
};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

// Get current timestamp in milliseconds
fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

struct Connection {
    label: &'static str,
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn open(
        addr: &str,
        label: &'static str,
        hello: &Hello,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, writer) = stream.into_split();
        let mut conn = Connection {
            label,
            lines: BufReader::new(read_half).lines(),
            writer,
        };
        conn.send(hello).await?;
        Ok(conn)
    }

    async fn send<T: Serialize>(&mut self, msg: &T) -> Result<(), Box<dyn std::error::Error>> {
        let mut line = serde_json::to_string(msg)?;
        println!("[{}] -> {}", self.label, line);
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn next_line(&mut self) -> Result<String, Box<dyn std::error::Error>> {
        match self.lines.next_line().await? {
            Some(line) => Ok(line),
            None => Err("connection closed".into()),
        }
    }

    /// Reads events until one matches, printing everything and answering
    /// heartbeat probes along the way.
    async fn wait_for<F>(
        &mut self,
        pred: F,
    ) -> Result<GameEvent, Box<dyn std::error::Error>>
    where
        F: Fn(&GameEvent) -> bool,
    {
        loop {
            let line = self.next_line().await?;
            println!("[{}] <- {}", self.label, line);
            let event: GameEvent = serde_json::from_str(&line)?;
            if let GameEvent::Heartbeat { hbid, .. } = &event {
                self.send(&GameCommand::HeartbeatAck {
                    hbid: *hbid,
                    client_recv_ms: get_timestamp(),
                })
                .await?;
                continue;
            }
            if pred(&event) {
                return Ok(event);
            }
        }
    }
}

fn sample_board() -> Board {
    Board {
        categories: vec![Category {
            title: "Warm-up".to_string(),
            questions: vec![
                Question {
                    prompt: "What is 2 + 2?".to_string(),
                    answer: "4".to_string(),
                    value: 200,
                    answered: false,
                },
                Question {
                    prompt: "What is 6 * 7?".to_string(),
                    answer: "42".to_string(),
                    value: 400,
                    answered: false,
                },
            ],
        }],
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8080".to_string());

    // Create a room; the creation connection closes after the reply
    let mut creator = Connection::open(
        &addr,
        "create",
        &Hello::Create {
            board: sample_board(),
        },
    )
    .await?;
    let reply = creator.next_line().await?;
    println!("[create] <- {}", reply);
    let (code, host_token) = match serde_json::from_str::<HelloReply>(&reply)? {
        HelloReply::Created { code, host_token } => (code, host_token),
        HelloReply::Rejected { reason } => return Err(reason.into()),
    };
    println!("Room created: {}", code);

    // Host plus two players
    let mut host = Connection::open(
        &addr,
        "host",
        &Hello::Host {
            code: code.clone(),
            host_token,
        },
    )
    .await?;
    host.wait_for(|e| matches!(e, GameEvent::GameSnapshot { .. }))
        .await?;

    let mut alice = Connection::open(
        &addr,
        "alice",
        &Hello::Join {
            code: code.clone(),
            name: "Alice".to_string(),
        },
    )
    .await?;
    alice
        .wait_for(|e| matches!(e, GameEvent::GameSnapshot { .. }))
        .await?;

    let mut bob = Connection::open(
        &addr,
        "bob",
        &Hello::Join {
            code: code.clone(),
            name: "Bob".to_string(),
        },
    )
    .await?;
    bob.wait_for(|e| matches!(e, GameEvent::GameSnapshot { .. }))
        .await?;

    // One full round: select, arm the window, race, judge, continue
    host.send(&GameCommand::StartGame {}).await?;
    host.send(&GameCommand::HostChoice {
        category: 0,
        question: 0,
    })
    .await?;
    host.send(&GameCommand::HostReady {}).await?;

    alice
        .wait_for(|e| matches!(e, GameEvent::BuzzWindowOpen { .. }))
        .await?;
    alice.send(&GameCommand::Buzz {}).await?;
    bob.wait_for(|e| matches!(e, GameEvent::BuzzWindowOpen { .. }))
        .await?;
    bob.send(&GameCommand::Buzz {}).await?;

    let result = host
        .wait_for(|e| matches!(e, GameEvent::BuzzResult { .. }))
        .await?;
    println!("Arbitration outcome: {:?}", result);

    host.send(&GameCommand::HostChecked { correct: true }).await?;
    host.wait_for(|e| matches!(e, GameEvent::AnswerJudged { .. }))
        .await?;
    host.send(&GameCommand::HostContinue {}).await?;
    host.send(&GameCommand::EndGame {}).await?;

    let ending = host
        .wait_for(|e| {
            matches!(
                e,
                GameEvent::GameSnapshot {
                    phase: shared::Phase::GameEnd,
                    ..
                }
            )
        })
        .await?;
    println!("Final snapshot: {:?}", ending);
    println!("Round complete");

    Ok(())
}
