//! Invite workflow.
//!
//! ```text
//! INVITE ──checks──▶ invited ──JOIN (self)──▶ awaiting names ──366──▶ accept | reject
//! ```
//!
//! An invite is honoured only if the inviter holds owner, admin or op
//! status in the channel, which the bot learns from the NAMES reply after
//! joining. Rejected inviters are throttled through the cooldown cache.

use chanlog_sdk::commands;
use chanlog_sdk::irc::{Message, nick_of};

use crate::bot::Bot;
use crate::channel::{canonicalize, is_channel, is_disallowed, mask_matches};
use crate::queue::EventKind;
use crate::session::PendingInvite;
use crate::{annotation_timestamp, unix_now};

/// NAMES prefixes that make a nick eligible to invite the bot.
const PRIVILEGED_PREFIXES: [char; 3] = ['~', '&', '@'];
/// Every membership prefix a NAMES entry may carry.
const MEMBERSHIP_PREFIXES: [char; 5] = ['~', '&', '@', '%', '+'];

/// Cache key for the invite cooldown of one inviter in one channel.
pub fn cooldown_key(network: &str, channel: &str, inviter_source: &str) -> String {
    format!("invite:{network}:{}:{inviter_source}", canonicalize(channel))
}

/// Nicks from a 353 payload that hold owner (`~`), admin (`&`) or op (`@`).
/// Half-ops and voiced users are not privileged.
pub fn privileged_nicks(names: &str) -> Vec<String> {
    names
        .split_whitespace()
        .filter_map(|entry| {
            let nick = entry.trim_start_matches(MEMBERSHIP_PREFIXES);
            let prefixes = &entry[..entry.len() - nick.len()];
            let privileged = prefixes.contains(PRIVILEGED_PREFIXES);
            (privileged && !nick.is_empty()).then(|| nick.to_string())
        })
        .collect()
}

impl Bot {
    /// `:nick!user@host INVITE <us> :#channel`
    pub fn on_invite(&mut self, msg: &Message) {
        let Some(raw_channel) = msg.param(1) else {
            return;
        };
        let inviter_source = msg.prefix.clone();
        let inviter_nick = nick_of(&inviter_source).to_string();
        let channel = canonicalize(raw_channel);

        if self.is_blocked(raw_channel, &inviter_source) {
            tracing::info!(%channel, inviter = %inviter_source, "Ignoring invite: blocked");
            return;
        }
        if self.session.joined_channels.contains(&channel) {
            tracing::info!(%channel, inviter = %inviter_nick, "Ignoring invite: already joined");
            return;
        }
        if is_disallowed(raw_channel) {
            tracing::warn!(channel = %raw_channel, inviter = %inviter_nick, "Ignoring invite: malformed channel name");
            return;
        }

        let key = cooldown_key(&self.cfg().network, &channel, &inviter_source);
        if self.in_cooldown(&key) {
            tracing::info!(%channel, inviter = %inviter_source, "Rejecting invite: cooldown");
            self.session.send(commands::privmsg(
                &inviter_nick,
                &format!("You recently invited me to {channel} without the required privileges. Please wait longer before trying again."),
            ));
            return;
        }

        tracing::info!(%channel, inviter = %inviter_source, "Invited; joining to check privileges");
        self.session.pending_invites.insert(
            channel.clone(),
            PendingInvite {
                inviter_source,
                inviter_nick,
                privileged_nicks: Vec::new(),
                cooldown_key: key,
            },
        );
        let join = match self.cfg().channel(&channel).and_then(|c| c.password.clone()) {
            Some(password) => commands::join_with_key(&channel, &password),
            None => commands::join(&channel),
        };
        self.session.send(join);
    }

    /// Exact channel entries match the invited channel; anything else is a
    /// hostmask matched against the inviter.
    fn is_blocked(&self, raw_channel: &str, inviter_source: &str) -> bool {
        let channel = canonicalize(raw_channel);
        self.cfg().blocked.iter().any(|entry| {
            if is_channel(entry) {
                canonicalize(entry) == channel
            } else {
                mask_matches(entry, inviter_source)
            }
        })
    }

    fn in_cooldown(&self, key: &str) -> bool {
        let window = self.cfg().timing.invite_cooldown as f64;
        match self.cache.get(key) {
            Ok(Some(rejected_at)) => unix_now() - rejected_at < window,
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(error = %e, "Cooldown lookup failed");
                false
            }
        }
    }

    /// 353 for a channel with a pending invite.
    pub fn on_names_reply(&mut self, channel: &str, names: &str) {
        if let Some(pending) = self.session.pending_invites.get_mut(&canonicalize(channel)) {
            pending.privileged_nicks.extend(privileged_nicks(names));
        }
    }

    /// 366 for a channel with a pending invite: accept or reject.
    pub fn finish_invite(&mut self, channel: &str) {
        let channel = canonicalize(channel);
        let Some(pending) = self.session.pending_invites.remove(&channel) else {
            return;
        };
        let privileged = pending
            .privileged_nicks
            .iter()
            .any(|nick| nick.eq_ignore_ascii_case(&pending.inviter_nick));
        if privileged {
            self.accept_invite(&channel, &pending);
        } else {
            self.reject_invite(&channel, &pending);
        }
    }

    fn accept_invite(&mut self, channel: &str, pending: &PendingInvite) {
        tracing::info!(%channel, inviter = %pending.inviter_source, "Invite accepted");
        let note = format!("{} {}", annotation_timestamp(), pending.inviter_source);
        if let Err(e) = self.config.modify_channel(channel, true, |c| {
            c.invite = Some(note);
            c.disabled = false;
            c.archived = false;
        }) {
            tracing::error!(%channel, error = %e, "Failed to record invite");
        }
        self.session.joined_channels.insert(channel.to_string());
        self.session.send(commands::mode(channel));

        let announcement = match self.cfg().log_url_for(channel) {
            Some(url) => format!("This channel is now logged. Logs: {url}"),
            None => "This channel is now logged.".to_string(),
        };
        self.session.send(commands::privmsg(channel, &announcement));
        let own_nick = self.session.nick.clone();
        self.publish(channel, EventKind::Message, Some(&own_nick), &announcement);
    }

    fn reject_invite(&mut self, channel: &str, pending: &PendingInvite) {
        tracing::info!(
            %channel,
            inviter = %pending.inviter_source,
            privileged = ?pending.privileged_nicks,
            "Invite rejected: inviter is not a channel operator"
        );
        self.session.send(commands::part(
            channel,
            Some("Invited by someone without operator status"),
        ));
        self.session.send(commands::privmsg(
            &pending.inviter_nick,
            &format!("You need to be an operator in {channel} to invite me."),
        ));
        if let Err(e) = self.cache.set(&pending.cooldown_key, unix_now()) {
            tracing::warn!(error = %e, "Failed to record invite cooldown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privileged_set_from_names() {
        assert_eq!(privileged_nicks("@alice +bob ~carol dave"), vec!["alice", "carol"]);
    }

    #[test]
    fn halfop_is_not_privileged() {
        assert_eq!(privileged_nicks("%half &admin"), vec!["admin"]);
    }

    #[test]
    fn multi_prefix_entries() {
        assert_eq!(privileged_nicks("@+both +%neither ~@owner"), vec!["both", "owner"]);
    }

    #[test]
    fn cooldown_key_uses_canonical_channel() {
        assert_eq!(
            cooldown_key("net", "#Rust", "a!b@c"),
            cooldown_key("net", "rust", "a!b@c")
        );
    }
}
