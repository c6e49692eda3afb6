//! IRC message parsing.
//!
//! Implements the RFC 2812 line shape:
//!   [`@`tags SPACE] [`:`prefix SPACE] command [SPACE params] [SPACE `:` trailing]
//!
//! Tags are dropped during parsing. Lines without a prefix get
//! [`SERVER_SOURCE`] so every parsed message carries a source.

use std::fmt;

/// Source given to lines the server sent without a prefix (e.g. `PING :x`).
pub const SERVER_SOURCE: &str = "*server*";

// Numeric replies the bot reacts to.
pub const RPL_WELCOME: &str = "001";
pub const RPL_ENDOFWHOIS: &str = "318";
pub const RPL_WHOISCHANNELS: &str = "319";
pub const RPL_CHANNELMODEIS: &str = "324";
pub const RPL_NOTOPIC: &str = "331";
pub const RPL_TOPIC: &str = "332";
pub const RPL_NAMREPLY: &str = "353";
pub const RPL_ENDOFNAMES: &str = "366";
pub const RPL_ENDOFMOTD: &str = "376";
pub const ERR_NOSUCHCHANNEL: &str = "403";
pub const ERR_CANNOTSENDTOCHAN: &str = "404";
pub const ERR_TOOMANYCHANNELS: &str = "405";
pub const ERR_NOMOTD: &str = "422";
pub const ERR_NICKNAMEINUSE: &str = "433";
pub const ERR_NEEDMOREPARAMS: &str = "461";
pub const ERR_INVITEONLYCHAN: &str = "473";
pub const ERR_BANNEDFROMCHAN: &str = "474";
pub const ERR_BADCHANNELKEY: &str = "475";

/// A parsed IRC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Source prefix without the leading `:`; [`SERVER_SOURCE`] when absent.
    pub prefix: String,
    /// Command, upper-cased (`PRIVMSG`, `001`, ...).
    pub command: String,
    /// Parameters; the trailing parameter (if any) is last.
    pub params: Vec<String>,
}

impl Message {
    /// Parse one line (line ending optional). Returns `None` for blank or
    /// structurally broken lines.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);

        // IRCv3 message tags carry nothing the logger needs.
        if let Some(tagged) = rest.strip_prefix('@') {
            let (_, after) = tagged.split_once(' ')?;
            rest = after.trim_start_matches(' ');
        }

        let prefix = if let Some(sourced) = rest.strip_prefix(':') {
            let (prefix, after) = sourced.split_once(' ')?;
            rest = after.trim_start_matches(' ');
            prefix.to_string()
        } else {
            SERVER_SOURCE.to_string()
        };

        let (command, mut remaining) = match rest.split_once(' ') {
            Some((cmd, after)) => (cmd, after),
            None => (rest, ""),
        };
        if command.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        loop {
            remaining = remaining.trim_start_matches(' ');
            if remaining.is_empty() {
                break;
            }
            if let Some(trailing) = remaining.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match remaining.split_once(' ') {
                Some((param, after)) => {
                    params.push(param.to_string());
                    remaining = after;
                }
                None => {
                    params.push(remaining.to_string());
                    break;
                }
            }
        }

        Some(Message {
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    /// Nick part of a `nick!user@host` source; `None` for server sources.
    pub fn source_nick(&self) -> Option<&str> {
        self.prefix.split_once('!').map(|(nick, _)| nick)
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// Last parameter, which is where free text lives.
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.prefix != SERVER_SOURCE {
            write!(f, ":{} ", self.prefix)?;
        }
        f.write_str(&self.command)?;
        if let Some((last, init)) = self.params.split_last() {
            for param in init {
                write!(f, " {param}")?;
            }
            write!(f, " :{last}")?;
        }
        Ok(())
    }
}

/// Split a `nick!user@host` source into its nick.
pub fn nick_of(source: &str) -> &str {
    source.split_once('!').map(|(nick, _)| nick).unwrap_or(source)
}
