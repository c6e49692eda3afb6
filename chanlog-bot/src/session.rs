//! Per-process session state mutated by the event loop.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tokio::time::Instant;

use crate::config::Timing;
use crate::timers::Timers;

/// An invite waiting for the NAMES reply that proves the inviter's rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInvite {
    /// Full `nick!user@host` of the inviter.
    pub inviter_source: String,
    pub inviter_nick: String,
    /// Owner/admin/op nicks seen in 353 replies so far.
    pub privileged_nicks: Vec<String>,
    pub cooldown_key: String,
}

#[derive(Debug)]
pub struct Session {
    /// Our nick, as confirmed by the server at registration.
    pub nick: String,
    /// Name the server gave in its end-of-MOTD reply; PING target.
    pub server_name: String,
    /// Seconds to wait before the next reconnect; `None` while connected.
    pub backoff_seconds: Option<u64>,
    pub joined_channels: BTreeSet<String>,
    pub pending_invites: BTreeMap<String, PendingInvite>,
    /// Channels the server reported during an in-flight WHOIS cycle.
    pub reconciliation: Option<BTreeSet<String>>,
    pub timers: Timers,
    /// Channels still waiting for a staggered TOPIC request.
    pub topic_queue: VecDeque<String>,
    /// Consecutive PINGs that went unanswered.
    pub pong_misses: u32,
    /// Set by handlers that need the connection dropped.
    pub drop_requested: bool,
    outbox: Vec<String>,
}

impl Session {
    pub fn new(nick: &str) -> Self {
        Self {
            nick: nick.to_string(),
            server_name: String::new(),
            backoff_seconds: None,
            joined_channels: BTreeSet::new(),
            pending_invites: BTreeMap::new(),
            reconciliation: None,
            timers: Timers::default(),
            topic_queue: VecDeque::new(),
            pong_misses: 0,
            drop_requested: false,
            outbox: Vec::new(),
        }
    }

    /// Queue a line for the transport; the event loop flushes after each step.
    pub fn send(&mut self, line: impl Into<String>) {
        self.outbox.push(line.into());
    }

    pub fn take_outbox(&mut self) -> Vec<String> {
        std::mem::take(&mut self.outbox)
    }

    /// Lines queued but not yet flushed.
    pub fn outbox(&self) -> &[String] {
        &self.outbox
    }

    pub fn is_self(&self, nick: &str) -> bool {
        nick.eq_ignore_ascii_case(&self.nick)
    }

    /// Backoff for the next attempt: 1, 2, 4, ... capped at `max`.
    pub fn next_backoff(&mut self, max: u64) -> u64 {
        let next = match self.backoff_seconds {
            None => 1,
            Some(current) => current.saturating_mul(2).min(max),
        };
        let next = next.min(max.max(1));
        self.backoff_seconds = Some(next);
        next
    }

    /// Start-of-connection reset: clears backoff, membership, pending work
    /// and re-arms every timer.
    pub fn on_connected(&mut self, server_name: &str, now: Instant, timing: &Timing) {
        self.server_name = server_name.to_string();
        self.backoff_seconds = None;
        self.joined_channels.clear();
        self.pending_invites.clear();
        self.reconciliation = None;
        self.topic_queue.clear();
        self.pong_misses = 0;
        self.drop_requested = false;
        self.outbox.clear();
        self.timers.reset(now, timing);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut session = Session::new("logbot");
        let delays: Vec<u64> = (0..8).map(|_| session.next_backoff(30)).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn backoff_matches_power_of_two_formula() {
        let max = 300;
        let mut session = Session::new("logbot");
        for n in 1..=12u32 {
            let expected = 2u64.pow(n - 1).min(max);
            assert_eq!(session.next_backoff(max), expected, "attempt {n}");
        }
    }

    #[test]
    fn connect_resets_backoff() {
        let mut session = Session::new("logbot");
        session.next_backoff(300);
        session.next_backoff(300);
        session.joined_channels.insert("#x".into());
        session.on_connected("irc.example.org", Instant::now(), &Timing::default());
        assert_eq!(session.backoff_seconds, None);
        assert!(session.joined_channels.is_empty());
        assert_eq!(session.next_backoff(300), 1);
    }

    #[test]
    fn self_match_ignores_case() {
        let session = Session::new("LogBot");
        assert!(session.is_self("logbot"));
        assert!(!session.is_self("other"));
    }
}
