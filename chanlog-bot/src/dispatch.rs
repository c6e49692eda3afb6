//! Inbound message dispatch.
//!
//! Each parsed line is first classified into an [`Inbound`] (first match
//! wins, in the order of [`classify`]) and then handled by a `match`.
//! Lines the bot has no use for classify as [`Inbound::Ignored`].

use chanlog_sdk::commands;
use chanlog_sdk::irc::{self, Message};
use tokio::time::Instant;

use crate::annotation_timestamp;
use crate::bot::Bot;
use crate::channel::{canonicalize, is_channel};
use crate::queue::EventKind;

/// Channel modes that carry an argument in a 324 reply.
const MODES_WITH_ARG: [char; 2] = ['k', 'l'];

const CTCP_DELIM: char = '\x01';

/// A classified inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound<'a> {
    Ping { token: &'a str },
    Pong,
    Invite,
    SelfJoined { channel: &'a str },
    SelfParted { channel: &'a str },
    Names { channel: &'a str, names: &'a str },
    EndOfNames { channel: &'a str },
    JoinFailed {
        numeric: &'a str,
        channel: &'a str,
        text: &'a str,
        archive: bool,
        part: bool,
    },
    ChannelKey { channel: &'a str, key: &'a str },
    Kicked {
        channel: &'a str,
        kicker: &'a str,
        reason: Option<&'a str>,
    },
    Chat {
        channel: &'a str,
        kind: EventKind,
        nick: Option<&'a str>,
        text: &'a str,
    },
    Topic {
        channel: &'a str,
        nick: Option<&'a str>,
        text: &'a str,
    },
    PrivateMessage { sender: &'a str },
    WhoisChannels { list: &'a str },
    EndOfWhois,
    ServerError { text: &'a str },
    Ignored,
}

/// Classify `msg` from the point of view of a client named `own_nick`.
pub fn classify<'a>(msg: &'a Message, own_nick: &str) -> Inbound<'a> {
    let is_self = |nick: &str| nick.eq_ignore_ascii_case(own_nick);
    let from_self = msg.source_nick().is_some_and(is_self);
    let param = move |i: usize| msg.param(i).unwrap_or("");

    match msg.command.as_str() {
        "PING" => Inbound::Ping {
            token: msg.trailing().unwrap_or(""),
        },
        "PONG" => Inbound::Pong,
        "INVITE" if is_self(param(0)) => Inbound::Invite,
        "JOIN" if from_self => Inbound::SelfJoined { channel: param(0) },
        "PART" if from_self => Inbound::SelfParted { channel: param(0) },
        irc::RPL_NAMREPLY => Inbound::Names {
            channel: param(2),
            names: msg.trailing().unwrap_or(""),
        },
        irc::RPL_ENDOFNAMES => Inbound::EndOfNames { channel: param(1) },
        irc::ERR_NOSUCHCHANNEL
        | irc::ERR_TOOMANYCHANNELS
        | irc::ERR_NEEDMOREPARAMS
        | irc::ERR_INVITEONLYCHAN
        | irc::ERR_BANNEDFROMCHAN
        | irc::ERR_BADCHANNELKEY
        | irc::ERR_CANNOTSENDTOCHAN => {
            // 461 names the command, not a channel.
            if !is_channel(param(1)) {
                return Inbound::Ignored;
            }
            let numeric = msg.command.as_str();
            Inbound::JoinFailed {
                numeric,
                channel: param(1),
                text: if msg.params.len() > 2 { msg.trailing().unwrap_or("") } else { "" },
                archive: matches!(numeric, irc::ERR_BANNEDFROMCHAN | irc::ERR_CANNOTSENDTOCHAN),
                part: numeric == irc::ERR_CANNOTSENDTOCHAN,
            }
        }
        irc::RPL_CHANNELMODEIS => match channel_key(&msg.params) {
            Some(key) => Inbound::ChannelKey {
                channel: param(1),
                key,
            },
            None => Inbound::Ignored,
        },
        "KICK" if is_self(param(1)) => Inbound::Kicked {
            channel: param(0),
            kicker: &msg.prefix,
            reason: msg.param(2).filter(|r| !r.is_empty()),
        },
        "PRIVMSG" | "NOTICE" if is_channel(param(0)) => {
            let text = param(1);
            let (kind, text) = match ctcp(text) {
                None if msg.command == "NOTICE" => (EventKind::Notice, text),
                None => (EventKind::Message, text),
                Some(("ACTION", body)) if msg.command == "PRIVMSG" => (EventKind::Action, body),
                Some(_) => return Inbound::Ignored,
            };
            Inbound::Chat {
                channel: param(0),
                kind,
                nick: msg.source_nick(),
                text,
            }
        }
        "TOPIC" => Inbound::Topic {
            channel: param(0),
            nick: msg.source_nick(),
            text: param(1),
        },
        irc::RPL_TOPIC => Inbound::Topic {
            channel: param(1),
            nick: None,
            text: msg.trailing().unwrap_or(""),
        },
        irc::RPL_NOTOPIC => Inbound::Topic {
            channel: param(1),
            nick: None,
            text: "",
        },
        "PRIVMSG" if is_self(param(0)) && ctcp(param(1)).is_none() => match msg.source_nick() {
            Some(sender) => Inbound::PrivateMessage { sender },
            None => Inbound::Ignored,
        },
        irc::RPL_WHOISCHANNELS if is_self(param(1)) => Inbound::WhoisChannels {
            list: msg.trailing().unwrap_or(""),
        },
        irc::RPL_ENDOFWHOIS if is_self(param(1)) => Inbound::EndOfWhois,
        "ERROR" => Inbound::ServerError {
            text: msg.trailing().unwrap_or(""),
        },
        _ => Inbound::Ignored,
    }
}

/// Split a CTCP payload into command and body.
fn ctcp(text: &str) -> Option<(&str, &str)> {
    let inner = text.strip_prefix(CTCP_DELIM)?;
    let inner = inner.strip_suffix(CTCP_DELIM).unwrap_or(inner);
    Some(inner.split_once(' ').unwrap_or((inner, "")))
}

/// Key from a 324 reply: `<me> <chan> <modes> [args...]`. Mode arguments
/// are positional, in the order their letters appear.
fn channel_key(params: &[String]) -> Option<&str> {
    let modes = params.get(2)?;
    let mut args = params.iter().skip(3);
    for letter in modes.chars() {
        if !MODES_WITH_ARG.contains(&letter) {
            continue;
        }
        let arg = args.next();
        if letter == 'k' {
            return arg.map(String::as_str).filter(|k| !k.is_empty() && *k != "*");
        }
    }
    None
}

impl Bot {
    /// Handle one inbound message.
    pub fn dispatch(&mut self, msg: &Message, now: Instant) {
        let own_nick = self.session.nick.clone();
        match classify(msg, &own_nick) {
            Inbound::Ping { token } => self.session.send(commands::pong(token)),
            Inbound::Pong => self.on_pong(now),
            Inbound::Invite => self.on_invite(msg),
            Inbound::SelfJoined { channel } => self.on_self_join(channel),
            Inbound::SelfParted { channel } => {
                for channel in channel.split(',') {
                    let channel = canonicalize(channel);
                    tracing::info!(%channel, "Parted");
                    self.session.joined_channels.remove(&channel);
                }
            }
            Inbound::Names { channel, names } => self.on_names_reply(channel, names),
            Inbound::EndOfNames { channel } => self.finish_invite(channel),
            Inbound::JoinFailed {
                numeric,
                channel,
                text,
                archive,
                part,
            } => self.on_join_failed(numeric, channel, text, archive, part),
            Inbound::ChannelKey { channel, key } => self.on_channel_key(channel, key),
            Inbound::Kicked {
                channel,
                kicker,
                reason,
            } => self.on_kicked(channel, kicker, reason.unwrap_or("kicked")),
            Inbound::Chat {
                channel,
                kind,
                nick,
                text,
            } => self.publish(channel, kind, nick, text),
            Inbound::Topic { channel, nick, text } => {
                self.publish(channel, EventKind::Topic, nick, text)
            }
            Inbound::PrivateMessage { sender } => self.send_help(sender),
            Inbound::WhoisChannels { list } => self.on_whois_channels(list),
            Inbound::EndOfWhois => self.finish_reconciliation(now),
            Inbound::ServerError { text } => {
                tracing::error!(error = %text, "Server closed the link");
                self.session.drop_requested = true;
            }
            Inbound::Ignored => {}
        }
    }

    fn on_self_join(&mut self, channel: &str) {
        let channel = canonicalize(channel);
        tracing::info!(%channel, "Joined");
        self.session.joined_channels.insert(channel.clone());
        if self.session.pending_invites.contains_key(&channel) {
            self.session.send(commands::names(&channel));
        } else {
            self.session.send(commands::mode(&channel));
        }
    }

    fn on_join_failed(&mut self, numeric: &str, channel: &str, text: &str, archive: bool, part: bool) {
        let channel = canonicalize(channel);
        tracing::warn!(%channel, %numeric, reason = %text, "Channel refused us");
        self.session.joined_channels.remove(&channel);

        let note = format!("{} {numeric} {text}", annotation_timestamp());
        if let Err(e) = self.config.modify_channel(&channel, false, |c| {
            c.error = Some(note);
            if archive {
                c.archived = true;
            }
        }) {
            tracing::error!(%channel, error = %e, "Failed to record join error");
        }

        if let Some(pending) = self.session.pending_invites.remove(&channel) {
            self.session.send(commands::privmsg(
                &pending.inviter_nick,
                &format!("I could not join {channel}: {text}"),
            ));
        }
        if part {
            self.session.send(commands::part(&channel, None));
        }
    }

    fn on_channel_key(&mut self, channel: &str, key: &str) {
        let channel = canonicalize(channel);
        match self.config.modify_channel(&channel, false, |c| c.password = Some(key.to_string())) {
            Ok(true) => tracing::info!(%channel, "Stored new channel key"),
            Ok(false) => {}
            Err(e) => tracing::error!(%channel, error = %e, "Failed to store channel key"),
        }
    }

    fn on_kicked(&mut self, channel: &str, kicker: &str, reason: &str) {
        let channel = canonicalize(channel);
        tracing::warn!(%channel, %kicker, %reason, "Kicked; disabling channel");
        self.session.joined_channels.remove(&channel);
        self.session.pending_invites.remove(&channel);

        let note = format!("{} {kicker}: {reason}", annotation_timestamp());
        if let Err(e) = self.config.modify_channel(&channel, false, |c| {
            c.disabled = true;
            c.kick = Some(note);
        }) {
            tracing::error!(%channel, error = %e, "Failed to record kick");
        }
    }

    fn send_help(&mut self, sender: &str) {
        let Some(help) = self.cfg().help.clone() else {
            return;
        };
        for line in help.lines().filter(|l| !l.trim().is_empty()) {
            self.session.send(commands::privmsg(sender, line));
        }
    }
}
