//! Outbound command lines.
//!
//! Every builder returns the line without the `\r\n` terminator; the
//! transport appends it on write.

pub fn pass(password: &str) -> String {
    format!("PASS {password}")
}

pub fn user(user: &str, realname: &str) -> String {
    format!("USER {user} 0 * :{realname}")
}

pub fn nick(nick: &str) -> String {
    format!("NICK {nick}")
}

/// NickServ identification.
pub fn identify(password: &str) -> String {
    privmsg("NickServ", &format!("IDENTIFY {password}"))
}

pub fn ping(target: &str) -> String {
    format!("PING {target}")
}

pub fn pong(token: &str) -> String {
    format!("PONG :{token}")
}

pub fn join(channel: &str) -> String {
    format!("JOIN {channel}")
}

pub fn join_with_key(channel: &str, key: &str) -> String {
    format!("JOIN {channel} {key}")
}

/// Comma-joined JOIN for several channels at once.
pub fn join_many<S: AsRef<str>>(channels: &[S]) -> String {
    let list: Vec<&str> = channels.iter().map(AsRef::as_ref).collect();
    format!("JOIN {}", list.join(","))
}

pub fn part(channel: &str, reason: Option<&str>) -> String {
    match reason {
        Some(reason) => format!("PART {channel} :{reason}"),
        None => format!("PART {channel}"),
    }
}

pub fn part_many<S: AsRef<str>>(channels: &[S], reason: Option<&str>) -> String {
    let list: Vec<&str> = channels.iter().map(AsRef::as_ref).collect();
    part(&list.join(","), reason)
}

pub fn topic(channel: &str) -> String {
    format!("TOPIC {channel}")
}

pub fn mode(channel: &str) -> String {
    format!("MODE {channel}")
}

pub fn names(channel: &str) -> String {
    format!("NAMES {channel}")
}

pub fn whois(nick: &str) -> String {
    format!("WHOIS {nick}")
}

pub fn privmsg(target: &str, text: &str) -> String {
    format!("PRIVMSG {target} :{text}")
}

pub fn quit(message: &str) -> String {
    format!("QUIT :{message}")
}

/// Copy of `line` safe to log: credentials in PASS and IDENTIFY are masked.
pub fn redact(line: &str) -> String {
    if line.starts_with("PASS ") {
        return "PASS ****".to_string();
    }
    if let Some(rest) = line.strip_prefix("PRIVMSG NickServ :IDENTIFY ") {
        let masked: String = rest.chars().map(|_| '*').collect();
        return format!("PRIVMSG NickServ :IDENTIFY {masked}");
    }
    line.to_string()
}
