//! Wire protocol for the buzzer trivia server.
//!
//! Every message is a single self-describing JSON object, externally tagged
//! as `{"Tag": { ...fields }}` for commands, events and handshake frames
//! alike. Unknown fields inside a known tag are ignored; an unknown tag is a
//! protocol error and terminates the connection that sent it.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type PlayerId = u32;
pub type HeartbeatId = u32;

/// Room code alphabet. Lookalike characters (I, L, O, 0, 1) are omitted so
/// codes survive being read aloud or typed from a projector.
const CODE_CHARSET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
pub const CODE_LEN: usize = 6;
const TOKEN_LEN: usize = 32;

/// Identifier of one game room, e.g. "KWR7PN". Unique per process, immutable
/// after creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomCode(String);

impl RoomCode {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code: String = (0..CODE_LEN)
            .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
            .collect();
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RoomCode {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Opaque credential issued to a player on first join; presenting it again
/// reclaims the same player id on reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerToken(String);

impl PlayerToken {
    pub fn generate() -> Self {
        Self(random_token())
    }
}

impl fmt::Display for PlayerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque credential granted once at room creation; authorizes host-only
/// commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostToken(String);

impl HostToken {
    pub fn generate() -> Self {
        Self(random_token())
    }
}

impl fmt::Display for HostToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One question cell on the board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub prompt: String,
    pub answer: String,
    pub value: u32,
    #[serde(default)]
    pub answered: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub title: String,
    pub questions: Vec<Question>,
}

/// The full question board: ordered categories of ordered questions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Board {
    pub categories: Vec<Category>,
}

impl Board {
    pub fn question(&self, category: usize, question: usize) -> Option<&Question> {
        self.categories.get(category)?.questions.get(question)
    }

    pub fn question_mut(&mut self, category: usize, question: usize) -> Option<&mut Question> {
        self.categories.get_mut(category)?.questions.get_mut(question)
    }
}

/// Game phase as seen by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    #[default]
    Lobby,
    Selection,
    QuestionReading,
    WaitingForBuzz,
    Answer,
    AnswerReveal,
    GameEnd,
}

/// Public view of one player, as carried in snapshots. Never includes the
/// reclaim token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub pid: PlayerId,
    pub name: String,
    pub score: i64,
    #[serde(rename = "hasBuzzed")]
    pub has_buzzed: bool,
    pub connected: bool,
}

/// Commands sent from clients (players and the host) to the engine.
///
/// All variants use struct syntax so every frame serializes to the
/// `{"Tag": {...}}` shape, e.g. `{"Buzz":{}}` or
/// `{"HostChoice":{"category":1,"question":2}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GameCommand {
    StartGame {},
    EndGame {},
    Buzz {},
    HostReady {},
    HostChoice {
        category: usize,
        question: usize,
    },
    HostChecked {
        correct: bool,
    },
    HostSkip {},
    HostContinue {},
    /// Acknowledges a server heartbeat probe. The client receipt timestamp is
    /// carried for diagnostics; the server derives latency from its own clock.
    HeartbeatAck {
        hbid: HeartbeatId,
        #[serde(rename = "clientRecvMs")]
        client_recv_ms: u64,
    },
    /// Client-perceived one-way latency, for diagnostic display only. Never
    /// feeds buzz arbitration.
    LatencyReport {
        hbid: HeartbeatId,
        #[serde(rename = "latencyMs")]
        latency_ms: u64,
    },
}

/// Events sent from the engine to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GameEvent {
    /// First event on a new identity: the assigned pid and the reclaim token.
    NewPlayer {
        pid: PlayerId,
        token: PlayerToken,
    },
    /// A player's own view: score and buzz eligibility.
    PlayerState {
        pid: PlayerId,
        score: i64,
        #[serde(rename = "hasBuzzed")]
        has_buzzed: bool,
        #[serde(rename = "canBuzz")]
        can_buzz: bool,
    },
    /// Full restatement of room state; clients can render from this alone.
    GameSnapshot {
        phase: Phase,
        board: Board,
        players: Vec<Player>,
        #[serde(rename = "currentQuestion")]
        current_question: Option<(usize, usize)>,
        winner: Option<PlayerId>,
    },
    /// Roster push, sent to the host whenever it changes.
    PlayerList {
        players: Vec<Player>,
    },
    BuzzWindowOpen {
        #[serde(rename = "durationMs")]
        duration_ms: u64,
    },
    BuzzWindowClosed {},
    /// Arbitration outcome; `winner: None` means the window closed with no
    /// candidates.
    BuzzResult {
        winner: Option<PlayerId>,
        name: Option<String>,
    },
    /// Host ruling on the current answer, with the applied score delta.
    AnswerJudged {
        pid: PlayerId,
        correct: bool,
        delta: i64,
        score: i64,
    },
    /// Heartbeat probe; clients answer with [`GameCommand::HeartbeatAck`].
    Heartbeat {
        hbid: HeartbeatId,
        #[serde(rename = "sentMs")]
        sent_ms: u64,
    },
    /// Echo confirming the ack arrived.
    HeartbeatSeen {
        hbid: HeartbeatId,
    },
    /// The room this connection belonged to is gone; the connection closes
    /// after this event.
    RoomClosed {},
}

/// First frame of every connection: either a room-creation request or a join
/// with one of the three identity shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Hello {
    /// New identity: needs a display name.
    Join {
        code: RoomCode,
        name: String,
    },
    /// Reconnect: reclaims an existing pid with its token.
    Resume {
        code: RoomCode,
        pid: PlayerId,
        token: PlayerToken,
    },
    /// Host connection, authorized by the token granted at creation.
    Host {
        code: RoomCode,
        #[serde(rename = "hostToken")]
        host_token: HostToken,
    },
    /// Creates a room for the given board and returns its code and host
    /// token. The connection closes after the reply.
    Create {
        board: Board,
    },
}

/// Direct replies to [`Hello`] frames that do not enter the event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HelloReply {
    Created {
        code: RoomCode,
        #[serde(rename = "hostToken")]
        host_token: HostToken,
    },
    Rejected {
        reason: JoinError,
    },
}

/// Handshake failure taxonomy. Terminates only the offending connection
/// attempt; the room is unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum JoinError {
    #[error("room not found")]
    RoomNotFound {},
    #[error("invalid token")]
    InvalidToken {},
    #[error("room is full")]
    RoomFull {},
}
