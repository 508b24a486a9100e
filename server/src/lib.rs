//! # Buzzer Trivia Game Server
//!
//! Authoritative server for a real-time, buzzer-style trivia game: a host
//! drives a question board, players join a room over the network and race to
//! buzz in, and the server decides who buzzed first despite every player
//! sitting behind a different network latency.
//!
//! ## Architecture
//!
//! Each room is an isolated actor: one task owns all of its state and is
//! reached only through an inbox channel, so no lock ever guards game state.
//! The room loop waits on whichever of the following becomes ready first:
//!
//! - the next command from any connection in the room,
//! - the periodic tick (buzz-window expiry, room lifetime checks),
//! - join/leave notifications.
//!
//! Connection handlers sit between transports and rooms. Each owns its own
//! outbound queue and writer task, so back-pressure from one slow client
//! never delays another. The handlers also run the heartbeat exchange that
//! produces the per-player latency estimates arbitration depends on.
//!
//! ## Buzz arbitration
//!
//! Buzzes are collected for the whole window and resolved only when it
//! closes: each candidate's receipt time is reduced by its measured one-way
//! latency, and the earliest adjusted instant wins. First-arrival-wins would
//! reward proximity to the server rather than reflexes.
//!
//! ## Module Organization
//!
//! - [`arbiter`] — buzz window bookkeeping and winner resolution
//! - [`room`] — the per-room state machine and its actor loop
//! - [`registry`] — process-wide room code lookup, the only shared state
//! - [`connection`] — handshake, framing, heartbeats, per-client queues
//! - [`network`] — the TCP listener and accept loop
//! - [`config`] — every tunable the game design leaves open
//! - [`clock`] — wall-clock millisecond timestamps

pub mod arbiter;
pub mod clock;
pub mod config;
pub mod connection;
pub mod network;
pub mod registry;
pub mod room;
