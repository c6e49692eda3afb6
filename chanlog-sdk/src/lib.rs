//! chanlog-sdk: the protocol side of the chanlog IRC logger.
//!
//! - [`irc`]: message parsing and numeric reply codes
//! - [`commands`]: builders for the outbound lines the bot sends
//! - [`transport`]: plaintext/TLS line transport with poll-style reads
//! - [`format`]: text decoding and formatting-code stripping

pub mod commands;
pub mod format;
pub mod irc;
pub mod transport;
