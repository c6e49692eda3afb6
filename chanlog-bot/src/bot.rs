//! The bot core: session state plus its external collaborators.
//!
//! Everything here is synchronous. Handlers queue outbound lines on the
//! session; the event loop owns the transport and flushes them.

use std::path::PathBuf;

use crate::cache::CooldownCache;
use crate::config::{Config, ConfigStore};
use crate::queue::JobQueue;
use crate::session::Session;

pub struct Bot {
    pub config: ConfigStore,
    pub cache: CooldownCache,
    pub queue: JobQueue,
    pub session: Session,
    /// File rewritten on connect and on every PONG.
    pub liveness_file: Option<PathBuf>,
}

impl Bot {
    pub fn new(config: ConfigStore, cache: CooldownCache, queue: JobQueue) -> Self {
        let session = Session::new(&config.get().nick);
        Self {
            config,
            cache,
            queue,
            session,
            liveness_file: None,
        }
    }

    pub fn with_liveness_file(mut self, path: PathBuf) -> Self {
        self.liveness_file = Some(path);
        self
    }

    pub fn cfg(&self) -> &Config {
        self.config.get()
    }

    /// Rewrite the liveness file with the current time.
    pub fn touch_liveness(&self) {
        let Some(path) = &self.liveness_file else {
            return;
        };
        let stamp = format!("{}\n", chrono::Utc::now().to_rfc3339());
        if let Err(e) = std::fs::write(path, stamp) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to touch liveness file");
        }
    }

    /// Reload the configuration, keeping the old one on failure.
    pub fn reload_config(&mut self) -> bool {
        match self.config.reload() {
            Ok(()) => {
                let ttl = std::time::Duration::from_secs(self.cfg().timing.invite_cooldown);
                self.cache.set_ttl(ttl);
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Config reload failed; keeping current settings");
                false
            }
        }
    }

    /// Log the session snapshot (debug-dump signal).
    pub fn dump_state(&self) {
        let s = &self.session;
        tracing::info!(
            nick = %s.nick,
            server = %s.server_name,
            joined = ?s.joined_channels,
            pending_invites = ?s.pending_invites.keys().collect::<Vec<_>>(),
            reconciling = s.reconciliation.is_some(),
            topic_queue = s.topic_queue.len(),
            pong_misses = s.pong_misses,
            "Debug dump"
        );
        tracing::info!(timers = ?s.timers, "Debug dump: timers");
        for (channel, invite) in &s.pending_invites {
            tracing::info!(%channel, ?invite, "Debug dump: pending invite");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::tests::SAMPLE;
    use std::time::Duration;

    /// A bot with in-memory config, cache and queue.
    pub(crate) fn test_bot() -> Bot {
        let config = ConfigStore::in_memory(Config::from_toml(SAMPLE).unwrap());
        let cache = CooldownCache::in_memory(Duration::from_secs(3600)).unwrap();
        let queue = JobQueue::in_memory().unwrap();
        let mut bot = Bot::new(config, cache, queue);
        bot.session.server_name = "irc.example.org".into();
        bot
    }

    #[test]
    fn liveness_file_gets_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.alive");
        let bot = test_bot().with_liveness_file(path.clone());
        bot.touch_liveness();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(text.trim()).is_ok());
    }
}
