//! Buzz arbitration: collect candidates while the window is open, resolve a
//! single winner under latency compensation when it closes.
//!
//! Resolution is deliberately deferred to window close. Declaring a winner on
//! first arrival would hand the round to whoever sits closest to the server;
//! subtracting each candidate's measured one-way latency from its receipt
//! time credits a slow connection with the earlier action instant it earned.

use log::debug;
use shared::PlayerId;

/// One buzz attempt, frozen at the moment the command was processed.
#[derive(Debug, Clone)]
pub struct BuzzCandidate {
    pub pid: PlayerId,
    /// Server clock (unix ms) when the buzz command was processed.
    pub received_at_ms: u64,
    /// The player's latency estimate sampled at that moment, not re-derived
    /// later.
    pub latency_ms: u64,
}

impl BuzzCandidate {
    /// Estimated true client-side action instant.
    pub fn adjusted_ms(&self) -> u64 {
        self.received_at_ms.saturating_sub(self.latency_ms)
    }
}

/// The open buzz window: a deadline plus the candidates accumulated so far.
#[derive(Debug)]
pub struct BuzzWindow {
    window_end_ms: u64,
    candidates: Vec<BuzzCandidate>,
}

impl BuzzWindow {
    pub fn new(window_end_ms: u64) -> Self {
        Self {
            window_end_ms,
            candidates: Vec::new(),
        }
    }

    pub fn is_open(&self, now_ms: u64) -> bool {
        now_ms < self.window_end_ms
    }

    pub fn window_end_ms(&self) -> u64 {
        self.window_end_ms
    }

    /// Adds a candidate unless the window has closed or the player already
    /// buzzed. Returns whether the candidate was accepted.
    pub fn submit(&mut self, candidate: BuzzCandidate, now_ms: u64) -> bool {
        if !self.is_open(now_ms) {
            debug!(
                "buzz from player {} arrived {}ms after window close, dropped",
                candidate.pid,
                now_ms - self.window_end_ms
            );
            return false;
        }
        if self.candidates.iter().any(|c| c.pid == candidate.pid) {
            return false;
        }
        self.candidates.push(candidate);
        true
    }

    pub fn candidates(&self) -> &[BuzzCandidate] {
        &self.candidates
    }

    /// Consumes the window and returns the winner, if any candidate buzzed.
    pub fn resolve(self) -> Option<BuzzCandidate> {
        let winner = self
            .candidates
            .into_iter()
            .min_by_key(|c| (c.adjusted_ms(), c.received_at_ms, c.pid));
        if let Some(ref w) = winner {
            debug!(
                "buzz window resolved: player {} wins with adjusted t={}ms (receipt {}ms, latency {}ms)",
                w.pid,
                w.adjusted_ms(),
                w.received_at_ms,
                w.latency_ms
            );
        }
        winner
    }
}
