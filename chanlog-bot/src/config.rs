//! Bot configuration, persisted as TOML.
//!
//! The file is read-mostly: operators edit it by hand, and the bot writes
//! back facts it learns (channel keys, invite/kick/error notes, disabled
//! and archived flags). Every write goes through [`ConfigStore::modify_channel`],
//! which reloads first and saves only when something actually changed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::canonicalize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("can't read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("bad config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("can't serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("can't save {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Network name; part of cooldown keys and published events.
    pub network: String,
    /// Server host, optionally prefixed with `tls://`, `ircs://` or `irc://`.
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub nick: String,
    /// Ident; defaults to the nick.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default = "default_realname")]
    pub realname: String,
    /// NickServ password, sent with IDENTIFY after registration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Connection password (PASS).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_password: Option<String>,
    #[serde(default)]
    pub tls_insecure: bool,
    /// Public log location, with `{network}` and `{channel}` placeholders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_url: Option<String>,
    /// Reply sent to private messages, one PRIVMSG per line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    #[serde(default = "default_quit_message")]
    pub quit_message: String,
    /// Channel names or `nick!user@host` masks whose invites are ignored.
    #[serde(default)]
    pub blocked: Vec<String>,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub timing: Timing,
    /// Keyed by canonical channel name.
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelConfig>,
}

/// Per-channel settings and learned facts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChannelConfig {
    #[serde(skip_serializing_if = "is_false")]
    pub disabled: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub archived: bool,
    /// Keep membership but publish nothing.
    #[serde(skip_serializing_if = "is_false")]
    pub no_logs: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Last join failure: `<timestamp> <numeric> <server text>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Last kick: `<timestamp> <kicker>: <reason>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kick: Option<String>,
    /// Accepted invite: `<timestamp> <inviter source>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite: Option<String>,
}

impl ChannelConfig {
    /// Whether reconciliation should keep the bot in this channel.
    pub fn wanted(&self) -> bool {
        !self.disabled && !self.archived
    }
}

/// File locations; unset entries default to siblings of the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Paths {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_db: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liveness_file: Option<PathBuf>,
}

/// Paths with defaults filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPaths {
    pub state_db: PathBuf,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
    pub liveness_file: PathBuf,
}

impl Paths {
    /// Fill unset paths from the config file location: `bot.toml` gives
    /// `bot.db`, `bot.pid`, `bot.log` and `bot.alive` in the same directory.
    pub fn resolve(&self, config_path: &Path) -> ResolvedPaths {
        let sibling = |ext: &str| config_path.with_extension(ext);
        ResolvedPaths {
            state_db: self.state_db.clone().unwrap_or_else(|| sibling("db")),
            pid_file: self.pid_file.clone().unwrap_or_else(|| sibling("pid")),
            log_file: self.log_file.clone().unwrap_or_else(|| sibling("log")),
            liveness_file: self.liveness_file.clone().unwrap_or_else(|| sibling("alive")),
        }
    }
}

/// Timer and retry parameters, all in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Timing {
    pub initial_ping_delay: u64,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    /// Consecutive missed PONGs before the connection is dropped.
    pub ping_timeout_attempts: u32,
    pub topic_reload_interval: u64,
    pub channel_reload_interval: u64,
    pub invite_cooldown: u64,
    pub max_reconnect_interval: u64,
    pub login_timeout: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            initial_ping_delay: 30,
            ping_interval: 60,
            ping_timeout: 30,
            ping_timeout_attempts: 3,
            topic_reload_interval: 3600,
            channel_reload_interval: 600,
            invite_cooldown: 3600,
            max_reconnect_interval: 300,
            login_timeout: 120,
        }
    }
}

impl Timing {
    pub fn initial_ping_delay(&self) -> Duration {
        Duration::from_secs(self.initial_ping_delay)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout)
    }

    pub fn topic_reload_interval(&self) -> Duration {
        Duration::from_secs(self.topic_reload_interval)
    }

    pub fn channel_reload_interval(&self) -> Duration {
        Duration::from_secs(self.channel_reload_interval)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout)
    }
}

fn default_port() -> u16 {
    6697
}

fn default_realname() -> String {
    "chanlog channel logger".to_string()
}

fn default_quit_message() -> String {
    "Shutting down".to_string()
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Config {
    /// Parse TOML and canonicalize channel keys.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        let mut config: Config = toml::from_str(text)?;
        config.normalize();
        Ok(config)
    }

    fn normalize(&mut self) {
        let raw = std::mem::take(&mut self.channels);
        for (name, settings) in raw {
            let key = canonicalize(&name);
            if key != name {
                tracing::debug!(from = %name, to = %key, "Canonicalized channel key");
            }
            if self.channels.insert(key.clone(), settings).is_some() {
                tracing::warn!(channel = %key, "Duplicate channel entry after canonicalization; keeping the last");
            }
        }
    }

    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.nick)
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelConfig> {
        self.channels.get(&canonicalize(name))
    }

    /// Public log URL for `channel`, if a template is configured.
    pub fn log_url_for(&self, channel: &str) -> Option<String> {
        let canonical = canonicalize(channel);
        self.log_url.as_ref().map(|template| {
            template
                .replace("{network}", &self.network)
                .replace("{channel}", canonical.trim_start_matches('#'))
        })
    }
}

/// Owner of the current configuration and its backing file.
#[derive(Debug)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    config: Config,
}

impl ConfigStore {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = read_file(path)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            config,
        })
    }

    /// A store with no backing file: reloads keep the current value and
    /// saves are dropped.
    pub fn in_memory(config: Config) -> Self {
        Self { path: None, config }
    }

    pub fn get(&self) -> &Config {
        &self.config
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Re-read the file to pick up external edits. On error the current
    /// configuration is kept.
    pub fn reload(&mut self) -> Result<(), ConfigError> {
        if let Some(path) = &self.path {
            self.config = read_file(path)?;
        }
        Ok(())
    }

    /// Write the configuration back, atomically replacing the file.
    pub fn save(&self) -> Result<(), ConfigError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let text = toml::to_string_pretty(&self.config)?;
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, text).map_err(|source| ConfigError::Write {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, path).map_err(|source| ConfigError::Write {
            path: path.clone(),
            source,
        })
    }

    /// Reload, apply `change` to the channel's entry, and save if the entry
    /// changed. A channel without an entry is created only when `create` is
    /// set; otherwise nothing happens. Returns whether a save occurred.
    pub fn modify_channel(
        &mut self,
        channel: &str,
        create: bool,
        change: impl FnOnce(&mut ChannelConfig),
    ) -> Result<bool, ConfigError> {
        self.reload()?;
        let key = canonicalize(channel);
        let before = self.config.channels.get(&key).cloned();
        if before.is_none() && !create {
            return Ok(false);
        }
        let mut after = before.clone().unwrap_or_default();
        change(&mut after);
        if before.as_ref() == Some(&after) {
            return Ok(false);
        }
        self.config.channels.insert(key.clone(), after);
        self.save()?;
        tracing::debug!(channel = %key, "Saved channel settings");
        Ok(true)
    }
}

fn read_file(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Config::from_toml(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
