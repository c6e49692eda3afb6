//! Chat-event publishing.
//!
//! Raw line bytes were already decoded by the transport (UTF-8 with a
//! Windows-1252 fallback); here the text loses its formatting codes and is
//! handed to the job queue. Failures are logged and swallowed so one bad
//! event never stops the loop.

use chanlog_sdk::format;

use crate::bot::Bot;
use crate::channel::canonicalize;
use crate::queue::{ChatEvent, EventKind, PublishError};
use crate::unix_now;

impl Bot {
    /// Sanitize and queue one event. Suppressed for channels that are not
    /// configured or are flagged `no_logs`.
    pub fn publish(&self, channel: &str, kind: EventKind, nick: Option<&str>, text: &str) {
        let channel = canonicalize(channel);
        match self.cfg().channel(&channel) {
            None => {
                tracing::trace!(%channel, "Not publishing: channel not configured");
                return;
            }
            Some(settings) if settings.no_logs => {
                tracing::trace!(%channel, "Not publishing: no_logs");
                return;
            }
            Some(_) => {}
        }

        if let Err(e) = self.try_publish(&channel, kind, nick, text) {
            tracing::error!(%channel, error = %e, "Failed to publish chat event");
        }
    }

    fn try_publish(
        &self,
        channel: &str,
        kind: EventKind,
        nick: Option<&str>,
        text: &str,
    ) -> Result<(), PublishError> {
        let event = ChatEvent {
            timestamp: unix_now(),
            network: self.cfg().network.clone(),
            channel: channel.to_string(),
            event_kind: kind,
            nick: nick.map(str::to_string),
            text: format::strip_formatting(text),
        };
        self.queue.publish(&event)
    }
}
