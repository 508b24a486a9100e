//! The per-room engine: a single task owning all room state, reached only
//! through its inbox. The control loop waits on whichever comes first of an
//! inbox message or the periodic tick; the tick drives buzz-window expiry and
//! room lifetime checks. No lock guards any of this state.

use crate::arbiter::{BuzzCandidate, BuzzWindow};
use crate::clock;
use crate::config::EngineConfig;
use crate::registry::RoomRegistry;
use log::{debug, info};
use shared::{
    Board, GameCommand, GameEvent, HostToken, JoinError, Phase, Player, PlayerId, PlayerToken,
    RoomCode,
};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};

pub type EventTx = mpsc::UnboundedSender<GameEvent>;
pub type RoomTx = mpsc::UnboundedSender<RoomMsg>;

/// Who a command came from. Host-only commands from players are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Player(PlayerId),
}

/// Inbox traffic for the room task. Connection handlers only ever talk to a
/// room through these.
#[derive(Debug)]
pub enum RoomMsg {
    Join {
        request: JoinRequest,
        reply: oneshot::Sender<Result<Role, JoinError>>,
    },
    Command {
        from: Role,
        cmd: GameCommand,
    },
    /// Fresh latency estimate from a connection's heartbeat exchange.
    Latency {
        pid: PlayerId,
        latency_ms: u64,
    },
    Left {
        from: Role,
    },
}

#[derive(Debug)]
pub enum JoinRequest {
    NewPlayer {
        name: String,
        sender: EventTx,
    },
    Resume {
        pid: PlayerId,
        token: PlayerToken,
        sender: EventTx,
    },
    Host {
        token: HostToken,
        sender: EventTx,
    },
}

/// Event routing computed by the state machine; the task fans it out without
/// ever blocking on a client.
#[derive(Debug)]
enum Recipient {
    All,
    Host,
    Player(PlayerId),
}

#[derive(Debug)]
pub struct Outgoing {
    to: Recipient,
    event: GameEvent,
    /// Hold-back before sending, for latency-leveled delivery.
    delay_ms: u64,
}

impl Outgoing {
    fn all(event: GameEvent) -> Self {
        Self {
            to: Recipient::All,
            event,
            delay_ms: 0,
        }
    }

    fn host(event: GameEvent) -> Self {
        Self {
            to: Recipient::Host,
            event,
            delay_ms: 0,
        }
    }

    fn player(pid: PlayerId, event: GameEvent) -> Self {
        Self {
            to: Recipient::Player(pid),
            event,
            delay_ms: 0,
        }
    }

    fn player_delayed(pid: PlayerId, event: GameEvent, delay_ms: u64) -> Self {
        Self {
            to: Recipient::Player(pid),
            event,
            delay_ms,
        }
    }
}

/// A player identity. Outlives any one connection so it can be reclaimed on
/// reconnect; `sender` is the revocable capability attached to it.
#[derive(Debug)]
struct PlayerEntry {
    pid: PlayerId,
    name: String,
    token: PlayerToken,
    score: i64,
    latency_ms: u64,
    has_buzzed: bool,
    sender: Option<EventTx>,
}

impl PlayerEntry {
    fn snapshot(&self) -> Player {
        Player {
            pid: self.pid,
            name: self.name.clone(),
            score: self.score,
            has_buzzed: self.has_buzzed,
            connected: self.sender.is_some(),
        }
    }
}

#[derive(Debug)]
struct HostEntry {
    sender: EventTx,
}

pub struct Room {
    code: RoomCode,
    host_token: HostToken,
    board: Board,
    phase: Phase,
    current_question: Option<(usize, usize)>,
    players: Vec<PlayerEntry>,
    host: Option<HostEntry>,
    buzz: Option<BuzzWindow>,
    /// Winner of the last resolved window; scoring target for HostChecked.
    buzz_winner: Option<PlayerId>,
    winner: Option<PlayerId>,
    next_pid: PlayerId,
    config: EngineConfig,
    last_activity: Instant,
}

impl Room {
    pub fn new(code: RoomCode, host_token: HostToken, board: Board, config: EngineConfig) -> Self {
        Self {
            code,
            host_token,
            board,
            phase: Phase::Lobby,
            current_question: None,
            players: Vec::new(),
            host: None,
            buzz: None,
            buzz_winner: None,
            winner: None,
            next_pid: 1,
            config,
            last_activity: Instant::now(),
        }
    }

    fn entry(&self, pid: PlayerId) -> Option<&PlayerEntry> {
        self.players.iter().find(|p| p.pid == pid)
    }

    fn entry_mut(&mut self, pid: PlayerId) -> Option<&mut PlayerEntry> {
        self.players.iter_mut().find(|p| p.pid == pid)
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn roster(&self) -> Vec<Player> {
        self.players.iter().map(PlayerEntry::snapshot).collect()
    }

    fn snapshot_event(&self) -> GameEvent {
        GameEvent::GameSnapshot {
            phase: self.phase,
            board: self.board.clone(),
            players: self.roster(),
            current_question: self.current_question,
            winner: self.winner,
        }
    }

    fn player_state_event(&self, entry: &PlayerEntry) -> GameEvent {
        GameEvent::PlayerState {
            pid: entry.pid,
            score: entry.score,
            has_buzzed: entry.has_buzzed,
            can_buzz: self.phase == Phase::WaitingForBuzz && !entry.has_buzzed,
        }
    }

    /// Snapshot to everyone plus a personal state message per player.
    fn broadcast_state(&self) -> Vec<Outgoing> {
        let mut out = vec![Outgoing::all(self.snapshot_event())];
        for p in &self.players {
            out.push(Outgoing::player(p.pid, self.player_state_event(p)));
        }
        out
    }

    /// Binds a connection to an identity, or rejects the attempt. Welcome
    /// events ride the new connection's own queue.
    pub fn register(&mut self, request: JoinRequest) -> Result<(Role, Vec<Outgoing>), JoinError> {
        self.touch();
        match request {
            JoinRequest::Host { token, sender } => {
                if token != self.host_token {
                    return Err(JoinError::InvalidToken {});
                }
                if self.host.is_some() {
                    info!("room {}: host connection replaced", self.code);
                } else {
                    info!("room {}: host connected", self.code);
                }
                self.host = Some(HostEntry { sender });
                Ok((
                    Role::Host,
                    vec![
                        Outgoing::host(GameEvent::PlayerList {
                            players: self.roster(),
                        }),
                        Outgoing::host(self.snapshot_event()),
                    ],
                ))
            }
            JoinRequest::NewPlayer { name, sender } => {
                if self.players.len() >= self.config.max_players {
                    return Err(JoinError::RoomFull {});
                }
                let pid = self.next_pid;
                self.next_pid += 1;
                let token = PlayerToken::generate();
                info!("room {}: player {} \"{}\" joined", self.code, pid, name);
                self.players.push(PlayerEntry {
                    pid,
                    name,
                    token: token.clone(),
                    score: 0,
                    latency_ms: 0,
                    has_buzzed: false,
                    sender: Some(sender),
                });
                Ok((
                    Role::Player(pid),
                    vec![
                        Outgoing::player(pid, GameEvent::NewPlayer { pid, token }),
                        Outgoing::player(
                            pid,
                            GameEvent::PlayerState {
                                pid,
                                score: 0,
                                has_buzzed: false,
                                can_buzz: self.phase == Phase::WaitingForBuzz,
                            },
                        ),
                        Outgoing::player(pid, self.snapshot_event()),
                        Outgoing::host(GameEvent::PlayerList {
                            players: self.roster(),
                        }),
                    ],
                ))
            }
            JoinRequest::Resume { pid, token, sender } => {
                {
                    let entry = self
                        .players
                        .iter_mut()
                        .find(|p| p.pid == pid)
                        .ok_or(JoinError::InvalidToken {})?;
                    if entry.token != token {
                        return Err(JoinError::InvalidToken {});
                    }
                    // rebinding drops whatever connection held this identity
                    entry.sender = Some(sender);
                }
                info!("room {}: player {} reconnected", self.code, pid);
                let mut out = Vec::new();
                if let Some(entry) = self.entry(pid) {
                    out.push(Outgoing::player(pid, self.player_state_event(entry)));
                }
                out.push(Outgoing::player(pid, self.snapshot_event()));
                out.push(Outgoing::host(GameEvent::PlayerList {
                    players: self.roster(),
                }));
                Ok((Role::Player(pid), out))
            }
        }
    }

    /// Applies one command. Commands that are invalid for the current phase
    /// or sender are silently ignored; stale client state during transitions
    /// is expected and harmless.
    pub fn handle_command(&mut self, from: Role, cmd: GameCommand, now_ms: u64) -> Vec<Outgoing> {
        self.touch();
        if self.phase == Phase::GameEnd {
            return Vec::new();
        }
        match cmd {
            GameCommand::StartGame {} if from == Role::Host => self.handle_start(),
            GameCommand::EndGame {} if from == Role::Host => self.handle_end(),
            GameCommand::HostChoice { category, question } if from == Role::Host => {
                self.handle_choice(category, question)
            }
            GameCommand::HostReady {} if from == Role::Host => self.handle_ready(now_ms),
            GameCommand::HostChecked { correct } if from == Role::Host => {
                self.handle_checked(correct)
            }
            GameCommand::HostSkip {} if from == Role::Host => self.handle_skip(),
            GameCommand::HostContinue {} if from == Role::Host => self.handle_continue(),
            GameCommand::Buzz {} => match from {
                Role::Player(pid) => self.handle_buzz(pid, now_ms),
                Role::Host => Vec::new(),
            },
            // latency sampling lives in the connection layer
            GameCommand::HeartbeatAck { .. } | GameCommand::LatencyReport { .. } => Vec::new(),
            other => {
                debug!("room {}: ignoring {:?} from {:?}", self.code, other, from);
                Vec::new()
            }
        }
    }

    fn handle_start(&mut self) -> Vec<Outgoing> {
        if self.phase != Phase::Lobby {
            return Vec::new();
        }
        info!("room {}: game started", self.code);
        self.phase = Phase::Selection;
        self.broadcast_state()
    }

    fn handle_end(&mut self) -> Vec<Outgoing> {
        self.winner = self.determine_winner();
        self.phase = Phase::GameEnd;
        self.buzz = None;
        info!("room {}: game ended, winner {:?}", self.code, self.winner);
        self.broadcast_state()
    }

    /// Highest score wins; a tie (or an empty roster) yields no winner.
    fn determine_winner(&self) -> Option<PlayerId> {
        let best = self.players.iter().map(|p| p.score).max()?;
        let mut at_best = self.players.iter().filter(|p| p.score == best);
        match (at_best.next(), at_best.next()) {
            (Some(leader), None) => Some(leader.pid),
            _ => None,
        }
    }

    fn handle_choice(&mut self, category: usize, question: usize) -> Vec<Outgoing> {
        if self.phase != Phase::Selection {
            return Vec::new();
        }
        match self.board.question(category, question) {
            Some(q) if !q.answered => {}
            _ => {
                debug!(
                    "room {}: host chose unavailable question ({}, {})",
                    self.code, category, question
                );
                return Vec::new();
            }
        }
        self.current_question = Some((category, question));
        self.buzz_winner = None;
        for p in &mut self.players {
            p.has_buzzed = false;
        }
        self.phase = Phase::QuestionReading;
        self.broadcast_state()
    }

    fn handle_ready(&mut self, now_ms: u64) -> Vec<Outgoing> {
        if self.phase != Phase::QuestionReading {
            return Vec::new();
        }
        let duration_ms = self.config.buzz_window.as_millis() as u64;
        self.buzz = Some(BuzzWindow::new(now_ms + duration_ms));
        self.phase = Phase::WaitingForBuzz;
        info!("room {}: buzz window open for {}ms", self.code, duration_ms);
        let mut out = self.broadcast_state();
        out.extend(self.leveled_window_open(duration_ms));
        out
    }

    /// Staggers the window-open event so every player perceives it at about
    /// the same wall instant: a slow connection's copy leaves earlier within
    /// the lead time.
    fn leveled_window_open(&self, duration_ms: u64) -> Vec<Outgoing> {
        let lead_ms = self.config.open_lead.as_millis() as u64;
        let mut out = vec![Outgoing::host(GameEvent::BuzzWindowOpen { duration_ms })];
        for p in &self.players {
            out.push(Outgoing::player_delayed(
                p.pid,
                GameEvent::BuzzWindowOpen { duration_ms },
                lead_ms.saturating_sub(p.latency_ms),
            ));
        }
        out
    }

    fn handle_buzz(&mut self, pid: PlayerId, now_ms: u64) -> Vec<Outgoing> {
        if self.phase != Phase::WaitingForBuzz {
            return Vec::new();
        }
        let latency_ms = match self.entry(pid) {
            Some(e) if !e.has_buzzed => e.latency_ms,
            _ => return Vec::new(),
        };
        let accepted = match self.buzz.as_mut() {
            Some(window) => window.submit(
                BuzzCandidate {
                    pid,
                    received_at_ms: now_ms,
                    latency_ms,
                },
                now_ms,
            ),
            None => false,
        };
        if !accepted {
            return Vec::new();
        }
        if let Some(entry) = self.entry_mut(pid) {
            entry.has_buzzed = true;
        }
        info!(
            "room {}: player {} buzzed (receipt {}ms, latency {}ms)",
            self.code, pid, now_ms, latency_ms
        );
        // only the submitter learns anything now; the winner is announced at
        // window close, never on first arrival
        match self.entry(pid) {
            Some(entry) => vec![Outgoing::player(pid, self.player_state_event(entry))],
            None => Vec::new(),
        }
    }

    /// Tick body: closes an elapsed buzz window and resolves the winner.
    pub fn poll(&mut self, now_ms: u64) -> Vec<Outgoing> {
        if self.phase != Phase::WaitingForBuzz {
            return Vec::new();
        }
        let expired = matches!(&self.buzz, Some(w) if !w.is_open(now_ms));
        if !expired {
            return Vec::new();
        }
        let winner = match self.buzz.take() {
            Some(window) => window.resolve(),
            None => None,
        };

        let mut out = vec![Outgoing::all(GameEvent::BuzzWindowClosed {})];
        match winner {
            Some(c) => {
                self.buzz_winner = Some(c.pid);
                let name = self.entry(c.pid).map(|e| e.name.clone());
                info!("room {}: player {} wins the buzz", self.code, c.pid);
                out.push(Outgoing::all(GameEvent::BuzzResult {
                    winner: Some(c.pid),
                    name,
                }));
            }
            None => {
                self.buzz_winner = None;
                info!("room {}: buzz window closed with no candidates", self.code);
                out.push(Outgoing::all(GameEvent::BuzzResult {
                    winner: None,
                    name: None,
                }));
            }
        }
        self.phase = Phase::Answer;
        out.extend(self.broadcast_state());
        out
    }

    fn handle_checked(&mut self, correct: bool) -> Vec<Outgoing> {
        if self.phase != Phase::Answer {
            return Vec::new();
        }
        let (cat, q) = match self.current_question {
            Some(pair) => pair,
            None => return Vec::new(),
        };
        let value = match self.board.question(cat, q) {
            Some(question) => question.value as i64,
            None => return Vec::new(),
        };

        let mut out = Vec::new();
        if let Some(pid) = self.buzz_winner {
            let delta = if correct { value } else { -value };
            if let Some(entry) = self.entry_mut(pid) {
                entry.score += delta;
                let score = entry.score;
                info!(
                    "room {}: player {} answer judged {} ({:+})",
                    self.code,
                    pid,
                    if correct { "correct" } else { "incorrect" },
                    delta
                );
                out.push(Outgoing::all(GameEvent::AnswerJudged {
                    pid,
                    correct,
                    delta,
                    score,
                }));
            }
        }
        if let Some(question) = self.board.question_mut(cat, q) {
            question.answered = true;
        }
        self.phase = Phase::AnswerReveal;
        out.extend(self.broadcast_state());
        out
    }

    fn handle_skip(&mut self) -> Vec<Outgoing> {
        if !matches!(
            self.phase,
            Phase::QuestionReading | Phase::WaitingForBuzz | Phase::Answer
        ) {
            return Vec::new();
        }
        let (cat, q) = match self.current_question {
            Some(pair) => pair,
            None => return Vec::new(),
        };
        // skipping discards accumulated candidates without arbitration
        self.buzz = None;
        self.buzz_winner = None;
        if let Some(question) = self.board.question_mut(cat, q) {
            question.answered = true;
        }
        info!("room {}: question ({}, {}) skipped", self.code, cat, q);
        self.phase = Phase::AnswerReveal;
        self.broadcast_state()
    }

    fn handle_continue(&mut self) -> Vec<Outgoing> {
        if self.phase != Phase::AnswerReveal {
            return Vec::new();
        }
        self.current_question = None;
        self.buzz_winner = None;
        self.phase = Phase::Selection;
        self.broadcast_state()
    }

    pub fn set_latency(&mut self, pid: PlayerId, latency_ms: u64) {
        let code = self.code.clone();
        if let Some(entry) = self.entry_mut(pid) {
            debug!(
                "room {}: player {} latency {}ms",
                code, pid, latency_ms
            );
            entry.latency_ms = latency_ms;
        }
    }

    /// A connection went away. The identity stays; only the capability is
    /// revoked.
    pub fn connection_lost(&mut self, from: Role) -> Vec<Outgoing> {
        self.touch();
        match from {
            Role::Host => {
                info!("room {}: host disconnected", self.code);
                self.host = None;
                Vec::new()
            }
            Role::Player(pid) => {
                if let Some(entry) = self.entry_mut(pid) {
                    entry.sender = None;
                }
                info!(
                    "room {}: player {} disconnected, entry retained",
                    self.code, pid
                );
                vec![Outgoing::host(GameEvent::PlayerList {
                    players: self.roster(),
                })]
            }
        }
    }

    fn has_connections(&self) -> bool {
        self.host.is_some() || self.players.iter().any(|p| p.sender.is_some())
    }

    fn is_finished(&self) -> bool {
        self.phase == Phase::GameEnd && !self.has_connections()
    }

    fn idle_expired(&self) -> bool {
        !self.has_connections() && self.last_activity.elapsed() >= self.config.room_ttl
    }

    /// Fans events out. Every write goes to a connection's own queue; a slow
    /// client can never stall the room loop or its peers.
    fn dispatch(&self, out: Vec<Outgoing>) {
        for Outgoing {
            to,
            event,
            delay_ms,
        } in out
        {
            match to {
                Recipient::All => {
                    if let Some(host) = &self.host {
                        let _ = host.sender.send(event.clone());
                    }
                    for p in &self.players {
                        if let Some(tx) = &p.sender {
                            let _ = tx.send(event.clone());
                        }
                    }
                }
                Recipient::Host => {
                    if let Some(host) = &self.host {
                        let _ = host.sender.send(event);
                    }
                }
                Recipient::Player(pid) => {
                    if let Some(tx) = self.entry(pid).and_then(|p| p.sender.clone()) {
                        if delay_ms == 0 {
                            let _ = tx.send(event);
                        } else {
                            tokio::spawn(async move {
                                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                                let _ = tx.send(event);
                            });
                        }
                    }
                }
            }
        }
    }
}

/// The room control loop. Exits once the game is over and every connection
/// has closed, or after the idle TTL; either way it removes itself from the
/// registry. In-flight inbox messages are dropped at that point.
pub async fn run(
    mut room: Room,
    mut inbox: mpsc::UnboundedReceiver<RoomMsg>,
    registry: RoomRegistry,
) {
    let mut tick = interval(room.config.tick_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let code = room.code.clone();
    info!("room {}: engine loop started", code);

    loop {
        tokio::select! {
            msg = inbox.recv() => {
                match msg {
                    Some(RoomMsg::Join { request, reply }) => match room.register(request) {
                        Ok((role, out)) => {
                            room.dispatch(out);
                            let _ = reply.send(Ok(role));
                        }
                        Err(e) => {
                            let _ = reply.send(Err(e));
                        }
                    },
                    Some(RoomMsg::Command { from, cmd }) => {
                        let out = room.handle_command(from, cmd, clock::unix_ms());
                        room.dispatch(out);
                    }
                    Some(RoomMsg::Latency { pid, latency_ms }) => {
                        room.set_latency(pid, latency_ms);
                    }
                    Some(RoomMsg::Left { from }) => {
                        let out = room.connection_lost(from);
                        room.dispatch(out);
                    }
                    None => break,
                }
            }
            _ = tick.tick() => {
                let out = room.poll(clock::unix_ms());
                room.dispatch(out);
                if room.is_finished() {
                    info!("room {}: game over and all connections closed", code);
                    break;
                }
                if room.idle_expired() {
                    info!("room {}: idle past TTL, reaping", code);
                    break;
                }
            }
        }
    }

    registry.remove(&code).await;
    info!("room {}: engine loop ended", code);
}
