//! Membership reconciliation.
//!
//! The bot asks the server which channels it is in (WHOIS on itself; 319
//! replies, terminated by 318), then joins what the configuration wants
//! and parts what it doesn't.

use std::collections::BTreeSet;

use chanlog_sdk::commands;
use tokio::time::Instant;

use crate::bot::Bot;
use crate::channel::canonicalize;
use crate::config::Config;

/// Most channels named in one JOIN or PART.
pub const MAX_BATCH: usize = 10;

const PART_REASON: &str = "Channel is no longer configured for logging";

/// What one reconciliation cycle will do.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Channels with a key, joined one at a time.
    pub keyed_joins: Vec<(String, String)>,
    /// Unkeyed joins, ascending, at most [`MAX_BATCH`] per batch.
    pub joins: Vec<Vec<String>>,
    pub parts: Vec<Vec<String>>,
    /// Tracked as joined locally but absent from the server's report.
    pub lost: Vec<String>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.keyed_joins.is_empty() && self.joins.is_empty() && self.parts.is_empty() && self.lost.is_empty()
    }
}

/// Diff the configuration against the server's view and the local one.
///
/// Channels in `pending` are waiting on an invite privilege check and are
/// neither parted nor reported as lost; [`Bot::finish_invite`] decides them.
pub fn plan(
    config: &Config,
    reported: &BTreeSet<String>,
    tracked: &BTreeSet<String>,
    pending: &BTreeSet<String>,
) -> Plan {
    let desired: BTreeSet<&String> = config
        .channels
        .iter()
        .filter(|(_, settings)| settings.wanted())
        .map(|(name, _)| name)
        .collect();

    let mut keyed_joins = Vec::new();
    let mut unkeyed = Vec::new();
    for &name in &desired {
        if reported.contains(name) {
            continue;
        }
        match config.channels.get(name).and_then(|c| c.password.as_ref()) {
            Some(key) => keyed_joins.push((name.clone(), key.clone())),
            None => unkeyed.push(name.clone()),
        }
    }

    let to_part: Vec<String> = reported
        .iter()
        .filter(|name| !desired.contains(name) && !pending.contains(*name))
        .cloned()
        .collect();

    let lost = tracked
        .difference(reported)
        .filter(|name| !pending.contains(*name))
        .cloned()
        .collect();

    Plan {
        keyed_joins,
        joins: batches(unkeyed),
        parts: batches(to_part),
        lost,
    }
}

fn batches(names: Vec<String>) -> Vec<Vec<String>> {
    names.chunks(MAX_BATCH).map(<[String]>::to_vec).collect()
}

impl Bot {
    /// Phase one: ask the server for our memberships.
    pub fn begin_reconciliation(&mut self) {
        tracing::debug!("Starting channel reconciliation");
        self.session.reconciliation = Some(BTreeSet::new());
        let nick = self.session.nick.clone();
        self.session.send(commands::whois(&nick));
    }

    /// 319 payload, e.g. `@#ops +#voiced #plain`.
    pub fn on_whois_channels(&mut self, list: &str) {
        let Some(reported) = self.session.reconciliation.as_mut() else {
            return;
        };
        for entry in list.split_whitespace() {
            // Drop membership prefixes (`@`, `+`, ...) in front of the `#`.
            if let Some(start) = entry.find('#') {
                reported.insert(canonicalize(&entry[start..]));
            }
        }
    }

    /// Phase two (318): apply the diff and schedule the next cycle.
    pub fn finish_reconciliation(&mut self, now: Instant) {
        let Some(reported) = self.session.reconciliation.take() else {
            return;
        };
        self.reload_config();

        let pending: BTreeSet<String> = self.session.pending_invites.keys().cloned().collect();
        let plan = plan(self.cfg(), &reported, &self.session.joined_channels, &pending);
        if !plan.is_empty() {
            tracing::info!(
                reported = reported.len(),
                keyed_joins = plan.keyed_joins.len(),
                join_batches = plan.joins.len(),
                part_batches = plan.parts.len(),
                "Reconciling channel membership"
            );
        }

        for (channel, key) in &plan.keyed_joins {
            self.session.send(commands::join_with_key(channel, key));
        }
        for batch in &plan.joins {
            self.session.send(commands::join_many(batch));
        }
        for batch in &plan.parts {
            self.session.send(commands::part_many(batch, Some(PART_REASON)));
        }
        for channel in &plan.lost {
            tracing::warn!(%channel, "Server does not list us in a channel we thought we were in");
            self.session.joined_channels.remove(channel);
        }
        let parting: BTreeSet<&String> = plan.parts.iter().flatten().collect();
        for channel in &reported {
            if parting.contains(channel) || pending.contains(channel) {
                continue;
            }
            if self.session.joined_channels.insert(channel.clone()) {
                tracing::debug!(%channel, "Server lists us in an untracked channel");
            }
        }

        let interval = self.cfg().timing.channel_reload_interval();
        self.session.timers.next_channel_reload = Some(now + interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::tests::test_bot;

    fn config_with(channels: &[&str]) -> Config {
        let mut text = String::from("network = \"n\"\nhost = \"h\"\nnick = \"logbot\"\n");
        for name in channels {
            text.push_str(&format!("[channels.\"{name}\"]\n"));
        }
        Config::from_toml(&text).unwrap()
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn diff_joins_missing_and_parts_extra() {
        let config = config_with(&["#a", "#b", "#c"]);
        let plan = plan(&config, &set(&["#b", "#d"]), &set(&[]), &set(&[]));
        assert_eq!(plan.joins, vec![vec!["#a".to_string(), "#c".to_string()]]);
        assert_eq!(plan.parts, vec![vec!["#d".to_string()]]);
        assert!(plan.keyed_joins.is_empty());
    }

    #[test]
    fn batches_hold_at_most_ten() {
        let names: Vec<String> = (0..23).map(|i| format!("#c{i:02}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let config = config_with(&refs);
        let plan = plan(&config, &set(&[]), &set(&[]), &set(&[]));
        let sizes: Vec<usize> = plan.joins.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![10, 10, 3]);
        assert_eq!(plan.joins[0][0], "#c00");
        assert_eq!(plan.joins[2][2], "#c22");
    }

    #[test]
    fn keyed_and_unwanted_channels() {
        let mut config = config_with(&["#open", "#locked", "#off", "#gone"]);
        config.channels.get_mut("#locked").unwrap().password = Some("k".into());
        config.channels.get_mut("#off").unwrap().disabled = true;
        config.channels.get_mut("#gone").unwrap().archived = true;
        let plan = plan(&config, &set(&["#off"]), &set(&[]), &set(&[]));
        assert_eq!(plan.keyed_joins, vec![("#locked".to_string(), "k".to_string())]);
        assert_eq!(plan.joins, vec![vec!["#open".to_string()]]);
        assert_eq!(plan.parts, vec![vec!["#off".to_string()]]);
    }

    #[test]
    fn tracked_but_unreported_is_lost() {
        let config = config_with(&["#a"]);
        let plan = plan(&config, &set(&["#a"]), &set(&["#a", "#stale"]), &set(&[]));
        assert_eq!(plan.lost, vec!["#stale".to_string()]);
        assert!(plan.joins.is_empty());
    }

    #[test]
    fn pending_invite_is_neither_parted_nor_lost() {
        let config = config_with(&["#a"]);
        let plan = plan(
            &config,
            &set(&["#a", "#new", "#old"]),
            &set(&["#a", "#held"]),
            &set(&["#new", "#held"]),
        );
        assert_eq!(plan.parts, vec![vec!["#old".to_string()]]);
        assert!(plan.lost.is_empty());
    }

    #[test]
    fn full_cycle_sends_commands_and_reschedules() {
        let mut bot = test_bot();
        let now = Instant::now();
        bot.session.joined_channels.insert("#stale".into());

        bot.begin_reconciliation();
        assert_eq!(bot.session.take_outbox(), ["WHOIS logbot"]);
        bot.on_whois_channels("@#tokio +#Random");
        bot.finish_reconciliation(now);

        // SAMPLE wants #rust (keyed) and #tokio; #old is archived.
        assert_eq!(
            bot.session.take_outbox(),
            [
                "JOIN #rust s3cret",
                "PART #random :Channel is no longer configured for logging",
            ]
        );
        assert!(!bot.session.joined_channels.contains("#stale"));
        assert!(bot.session.joined_channels.contains("#tokio"));
        assert!(bot.session.reconciliation.is_none());
        assert_eq!(
            bot.session.timers.next_channel_reload,
            Some(now + std::time::Duration::from_secs(600))
        );
    }

    #[test]
    fn stray_whois_reply_is_ignored() {
        let mut bot = test_bot();
        bot.on_whois_channels("#x");
        bot.finish_reconciliation(Instant::now());
        assert!(bot.session.outbox().is_empty());
        assert_eq!(bot.session.timers.next_channel_reload, None);
    }
}
