//! chanlog: an IRC bot that joins channels, publishes their chat to a job
//! queue, and accepts invites from channel operators.
//!
//! The bot core ([`bot::Bot`]) is synchronous and transport-free; the
//! [`runner`] drives it from a single-threaded event loop.

pub mod bot;
pub mod cache;
pub mod channel;
pub mod config;
pub mod control;
pub mod dispatch;
pub mod invite;
pub mod lifecycle;
pub mod logging;
pub mod publish;
pub mod queue;
pub mod reconcile;
pub mod runner;
pub mod session;
pub mod timers;

/// Current time as fractional Unix seconds.
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Timestamp prefix for notes written into the configuration.
pub fn annotation_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
