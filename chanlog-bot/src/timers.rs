//! Deadline-based timers, evaluated once per loop iteration.
//!
//! There are no background tasks: each deadline is an `Instant` compared
//! against the loop's `now`, so firing granularity is one loop iteration.

use std::time::Duration;

use chanlog_sdk::commands;
use tokio::time::Instant;

use crate::bot::Bot;
use crate::config::Timing;

/// Gap between staggered TOPIC requests.
pub const TOPIC_REQUEST_SPACING: Duration = Duration::from_secs(1);

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Timers {
    pub next_ping: Option<Instant>,
    pub pong_timeout: Option<Instant>,
    pub next_topic_reload: Option<Instant>,
    pub next_topic_request: Option<Instant>,
    pub next_channel_reload: Option<Instant>,
}

impl Timers {
    /// Fresh-connection schedule: first PING after the initial delay,
    /// reconciliation right away, topics after the first reconciliation
    /// had a chance to join channels.
    pub fn reset(&mut self, now: Instant, timing: &Timing) {
        *self = Timers {
            next_ping: Some(now + timing.initial_ping_delay()),
            pong_timeout: None,
            next_topic_reload: Some(now + timing.initial_ping_delay()),
            next_topic_request: None,
            next_channel_reload: Some(now),
        };
    }
}

fn due(deadline: Option<Instant>, now: Instant) -> bool {
    deadline.is_some_and(|at| at <= now)
}

impl Bot {
    /// Fire every due timer, in fixed order.
    pub fn run_timers(&mut self, now: Instant) {
        let timing = self.cfg().timing.clone();

        if due(self.session.timers.next_ping, now) {
            let target = self.session.server_name.clone();
            self.session.send(commands::ping(&target));
            self.session.timers.next_ping = None;
            self.session.timers.pong_timeout = Some(now + timing.ping_timeout());
        }

        if due(self.session.timers.pong_timeout, now) {
            self.session.timers.pong_timeout = None;
            self.session.pong_misses += 1;
            tracing::warn!(
                misses = self.session.pong_misses,
                limit = timing.ping_timeout_attempts,
                "PING timed out"
            );
            if self.session.pong_misses >= timing.ping_timeout_attempts {
                tracing::error!("Too many PING timeouts, dropping connection");
                self.session.pong_misses = 0;
                self.session.drop_requested = true;
            } else {
                self.session.timers.next_ping = Some(now);
            }
        }

        if due(self.session.timers.next_topic_reload, now) {
            if !self.session.joined_channels.is_empty() {
                // BTreeSet iterates in ascending order.
                self.session.topic_queue = self.session.joined_channels.iter().cloned().collect();
                self.session.timers.next_topic_request = Some(now);
                tracing::debug!(channels = self.session.topic_queue.len(), "Refreshing topics");
            }
            self.session.timers.next_topic_reload = Some(now + timing.topic_reload_interval());
        }

        if due(self.session.timers.next_topic_request, now) {
            if let Some(channel) = self.session.topic_queue.pop_front() {
                self.session.send(commands::topic(&channel));
            }
            self.session.timers.next_topic_request = if self.session.topic_queue.is_empty() {
                None
            } else {
                Some(now + TOPIC_REQUEST_SPACING)
            };
        }

        if due(self.session.timers.next_channel_reload, now) {
            self.session.timers.next_channel_reload = None;
            self.begin_reconciliation();
        }
    }

    /// A PONG arrived: the connection is alive.
    pub fn on_pong(&mut self, now: Instant) {
        let interval = self.cfg().timing.ping_interval();
        if self.session.pong_misses > 0 {
            tracing::info!(misses = self.session.pong_misses, "PONG received after timeouts");
        }
        self.session.timers.pong_timeout = None;
        self.session.pong_misses = 0;
        self.session.timers.next_ping = Some(now + interval);
        self.touch_liveness();
    }
}
