//! Invite workflow, driven line by line through the dispatcher.

use std::time::Duration;

use chanlog::bot::Bot;
use chanlog::cache::CooldownCache;
use chanlog::config::{Config, ConfigStore};
use chanlog::invite::cooldown_key;
use chanlog::queue::{EventKind, JobQueue};
use chanlog_sdk::irc::Message;
use tokio::time::Instant;

const CONFIG: &str = r##"
network = "testnet"
host = "irc.example.org"
nick = "logbot"
log_url = "https://logs.example.org/{network}/{channel}"
blocked = ["#spam", "*!*@badhost"]

[channels.existing]
"##;

fn bot_with(store: ConfigStore) -> Bot {
    let cache = CooldownCache::in_memory(Duration::from_secs(3600)).unwrap();
    let queue = JobQueue::in_memory().unwrap();
    let mut bot = Bot::new(store, cache, queue);
    bot.session.server_name = "irc.example.org".into();
    bot
}

fn bot() -> Bot {
    bot_with(ConfigStore::in_memory(Config::from_toml(CONFIG).unwrap()))
}

fn feed(bot: &mut Bot, line: &str) -> Vec<String> {
    bot.dispatch(&Message::parse(line).unwrap(), Instant::now());
    bot.session.take_outbox()
}

#[test]
fn blocked_mask_creates_no_pending_invite() {
    let mut bot = bot();
    let out = feed(&mut bot, ":evil!user@badhost INVITE logbot :#fresh");
    assert!(out.is_empty());
    assert!(bot.session.pending_invites.is_empty());
}

#[test]
fn blocked_channel_is_ignored() {
    let mut bot = bot();
    let out = feed(&mut bot, ":alice!a@good INVITE logbot :#SPAM");
    assert!(out.is_empty());
    assert!(bot.session.pending_invites.is_empty());
}

#[test]
fn invite_addressed_to_someone_else_is_ignored() {
    let mut bot = bot();
    let out = feed(&mut bot, ":alice!a@good INVITE bob :#fresh");
    assert!(out.is_empty());
    assert!(bot.session.pending_invites.is_empty());
}

#[test]
fn malformed_channel_is_ignored() {
    let mut bot = bot();
    assert!(feed(&mut bot, ":alice!a@good INVITE logbot :#_hidden").is_empty());
    assert!(feed(&mut bot, ":alice!a@good INVITE logbot :##double").is_empty());
    assert!(bot.session.pending_invites.is_empty());
}

#[test]
fn already_joined_channel_is_ignored() {
    let mut bot = bot();
    bot.session.joined_channels.insert("#existing".into());
    assert!(feed(&mut bot, ":alice!a@good INVITE logbot :#existing").is_empty());
}

#[test]
fn operator_invite_is_accepted() {
    let mut bot = bot();

    let out = feed(&mut bot, ":alice!a@good INVITE logbot :#Fresh");
    assert_eq!(out, ["JOIN #fresh"]);
    assert!(bot.session.pending_invites.contains_key("#fresh"));

    let out = feed(&mut bot, ":logbot!l@h JOIN #fresh");
    assert_eq!(out, ["NAMES #fresh"]);

    feed(&mut bot, ":irc.example.org 353 logbot = #fresh :@alice +bob ~carol dave");
    let pending = &bot.session.pending_invites["#fresh"];
    assert_eq!(pending.privileged_nicks, ["alice", "carol"]);

    let out = feed(&mut bot, ":irc.example.org 366 logbot #fresh :End of /NAMES list.");
    assert_eq!(
        out,
        [
            "MODE #fresh",
            "PRIVMSG #fresh :This channel is now logged. Logs: https://logs.example.org/testnet/fresh",
        ]
    );
    assert!(bot.session.pending_invites.is_empty());
    assert!(bot.session.joined_channels.contains("#fresh"));

    let settings = bot.cfg().channel("#fresh").unwrap();
    assert!(settings.invite.as_deref().unwrap().ends_with(" alice!a@good"));
    assert!(!settings.disabled && !settings.archived);

    let events = bot.queue.events().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_kind, EventKind::Message);
    assert_eq!(events[0].nick.as_deref(), Some("logbot"));
}

#[test]
fn accept_clears_disabled_and_archived() {
    let mut config = Config::from_toml(CONFIG).unwrap();
    let entry = config.channels.get_mut("#existing").unwrap();
    entry.disabled = true;
    entry.archived = true;
    let mut bot = bot_with(ConfigStore::in_memory(config));

    feed(&mut bot, ":alice!a@good INVITE logbot :#existing");
    feed(&mut bot, ":logbot!l@h JOIN #existing");
    feed(&mut bot, ":irc.example.org 353 logbot = #existing :@Alice");
    feed(&mut bot, ":irc.example.org 366 logbot #existing :End of /NAMES list.");

    let settings = bot.cfg().channel("#existing").unwrap();
    assert!(settings.wanted());
}

#[test]
fn voiced_inviter_is_rejected_then_throttled() {
    let mut bot = bot();

    feed(&mut bot, ":bob!b@good INVITE logbot :#fresh");
    feed(&mut bot, ":logbot!l@h JOIN #fresh");
    feed(&mut bot, ":irc.example.org 353 logbot = #fresh :@alice +bob");
    let out = feed(&mut bot, ":irc.example.org 366 logbot #fresh :End of /NAMES list.");
    assert_eq!(
        out,
        [
            "PART #fresh :Invited by someone without operator status",
            "PRIVMSG bob :You need to be an operator in #fresh to invite me.",
        ]
    );
    assert!(bot.cfg().channel("#fresh").is_none());
    let key = cooldown_key("testnet", "#fresh", "bob!b@good");
    assert!(bot.cache.get(&key).unwrap().is_some());

    // Second attempt inside the window: no JOIN, no privilege check.
    let out = feed(&mut bot, ":bob!b@good INVITE logbot :#fresh");
    assert_eq!(out.len(), 1);
    assert!(out[0].starts_with("PRIVMSG bob :"));
    assert!(bot.session.pending_invites.is_empty());
}

#[test]
fn cooldown_is_per_inviter() {
    let mut bot = bot();
    let key = cooldown_key("testnet", "#fresh", "bob!b@good");
    bot.cache.set(&key, chanlog::unix_now()).unwrap();

    let out = feed(&mut bot, ":alice!a@good INVITE logbot :#fresh");
    assert_eq!(out, ["JOIN #fresh"]);
}

#[test]
fn expired_cooldown_allows_new_invite() {
    let mut bot = bot();
    let key = cooldown_key("testnet", "#fresh", "bob!b@good");
    bot.cache.set(&key, chanlog::unix_now() - 7200.0).unwrap();

    let out = feed(&mut bot, ":bob!b@good INVITE logbot :#fresh");
    assert_eq!(out, ["JOIN #fresh"]);
}

#[test]
fn join_failure_notifies_inviter_and_drops_invite() {
    let mut bot = bot();
    feed(&mut bot, ":alice!a@good INVITE logbot :#locked");
    let out = feed(
        &mut bot,
        ":irc.example.org 473 logbot #locked :Cannot join channel (+i)",
    );
    assert_eq!(
        out,
        ["PRIVMSG alice :I could not join #locked: Cannot join channel (+i)"]
    );
    assert!(bot.session.pending_invites.is_empty());
}

#[test]
fn accepted_invite_is_saved_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bot.toml");
    std::fs::write(&path, CONFIG).unwrap();
    let mut bot = bot_with(ConfigStore::load(&path).unwrap());

    feed(&mut bot, ":alice!a@good INVITE logbot :#fresh");
    feed(&mut bot, ":logbot!l@h JOIN #fresh");
    feed(&mut bot, ":irc.example.org 353 logbot = #fresh :&alice");
    feed(&mut bot, ":irc.example.org 366 logbot #fresh :End of /NAMES list.");

    let reloaded = ConfigStore::load(&path).unwrap();
    let settings = reloaded.get().channel("#fresh").unwrap();
    assert!(settings.invite.is_some());
    assert!(reloaded.get().channel("#existing").is_some());
}
