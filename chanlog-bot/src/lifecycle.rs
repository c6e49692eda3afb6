//! Connection lifecycle: connect, register, and reconnect with backoff.

use std::time::Duration;

use chanlog_sdk::commands;
use chanlog_sdk::irc::{self, SERVER_SOURCE};
use chanlog_sdk::transport::{Endpoint, LineTransport, ReadOutcome, TransportError};
use tokio::time::Instant;

use crate::bot::Bot;
use crate::config::Config;
use crate::control::SignalFlags;

/// Poll window for reads while waiting for registration.
const LOGIN_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("{}", closed_before_ready(.tls))]
    ClosedBeforeReady { tls: bool },
    #[error("server refused registration: {0}")]
    Refused(String),
    #[error("nickname {0} is already in use")]
    NickInUse(String),
    #[error("server did not finish registration within {0:?}")]
    LoginTimeout(Duration),
}

fn closed_before_ready(tls: &bool) -> &'static str {
    if *tls {
        "connection closed during registration"
    } else {
        "connection closed during registration (plaintext connection; does the server expect TLS?)"
    }
}

impl ConnectError {
    /// Errors that retrying cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConnectError::NickInUse(_))
    }
}

/// What the server told us during registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub nick: String,
    pub server_name: String,
}

/// Send the login commands and wait for end-of-MOTD, bounded by the
/// configured login timeout.
pub async fn login(transport: &mut LineTransport, config: &Config) -> Result<Registration, ConnectError> {
    let limit = config.timing.login_timeout();
    match tokio::time::timeout(limit, register(transport, config)).await {
        Ok(result) => result,
        Err(_) => Err(ConnectError::LoginTimeout(limit)),
    }
}

async fn register(transport: &mut LineTransport, config: &Config) -> Result<Registration, ConnectError> {
    if let Some(password) = &config.server_password {
        transport.write_line(&commands::pass(password)).await?;
    }
    transport
        .write_line(&commands::user(config.username(), &config.realname))
        .await?;
    transport.write_line(&commands::nick(&config.nick)).await?;

    let mut nick = config.nick.clone();
    loop {
        let msg = match transport.read_line(LOGIN_POLL).await {
            ReadOutcome::Idle => continue,
            ReadOutcome::Disconnected => {
                return Err(ConnectError::ClosedBeforeReady {
                    tls: transport.is_tls(),
                });
            }
            ReadOutcome::Line(msg) => msg,
        };

        match msg.command.as_str() {
            "PING" => {
                let token = msg.trailing().unwrap_or("");
                transport.write_line(&commands::pong(token)).await?;
            }
            irc::RPL_WELCOME => {
                if let Some(confirmed) = msg.param(0) {
                    nick = confirmed.to_string();
                }
                tracing::info!(%nick, "Registered");
            }
            irc::ERR_NICKNAMEINUSE => return Err(ConnectError::NickInUse(config.nick.clone())),
            "ERROR" => {
                let text = msg.trailing().unwrap_or("").to_string();
                tracing::error!(error = %text, "Server refused registration");
                return Err(ConnectError::Refused(text));
            }
            irc::RPL_ENDOFMOTD | irc::ERR_NOMOTD => {
                let server_name = if msg.prefix == SERVER_SOURCE {
                    Endpoint::resolve(&config.host, config.port).host
                } else {
                    msg.prefix.clone()
                };
                if let Some(password) = &config.password {
                    transport.write_line(&commands::identify(password)).await?;
                }
                return Ok(Registration { nick, server_name });
            }
            _ => tracing::trace!(line = %msg, "Registration chatter"),
        }
    }
}

impl Bot {
    /// Connect, retrying with exponential backoff. Returns `Ok(None)` when
    /// quit was requested before a connection came up; fatal errors are
    /// returned.
    pub async fn ensure_connected(&mut self, flags: &SignalFlags) -> Result<Option<LineTransport>, ConnectError> {
        loop {
            if flags.quit_requested() {
                return Ok(None);
            }
            match self.connect_once().await {
                Ok(transport) => return Ok(Some(transport)),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    let max = self.cfg().timing.max_reconnect_interval;
                    let delay = self.session.next_backoff(max);
                    tracing::error!(error = %e, retry_in = delay, "Connection failed");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
                        _ = flags.quit_signalled() => return Ok(None),
                    }
                }
            }
        }
    }

    async fn connect_once(&mut self) -> Result<LineTransport, ConnectError> {
        let config = self.cfg().clone();
        let endpoint = Endpoint::resolve(&config.host, config.port);
        tracing::info!(addr = %endpoint.addr(), tls = endpoint.tls, "Connecting");

        let mut transport = LineTransport::connect(&endpoint, config.tls_insecure).await?;
        let registration = match login(&mut transport, &config).await {
            Ok(registration) => registration,
            Err(e) => {
                transport.shutdown().await;
                return Err(e);
            }
        };
        self.on_registered(&registration, Instant::now());
        Ok(transport)
    }

    /// Fresh-connection bookkeeping.
    pub fn on_registered(&mut self, registration: &Registration, now: Instant) {
        tracing::info!(
            server = %registration.server_name,
            nick = %registration.nick,
            "Connected and ready"
        );
        self.session.nick = registration.nick.clone();
        let timing = self.cfg().timing.clone();
        self.session.on_connected(&registration.server_name, now, &timing);
        self.touch_liveness();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::tests::test_bot;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    fn config(extra: &str) -> Config {
        Config::from_toml(&format!(
            "network = \"n\"\nhost = \"irc.example.org\"\nport = 6667\nnick = \"logbot\"\n{extra}"
        ))
        .unwrap()
    }

    async fn sent_lines(server: DuplexStream, count: usize) -> Vec<String> {
        let mut lines = BufReader::new(server).lines();
        let mut out = Vec::new();
        for _ in 0..count {
            out.push(lines.next_line().await.unwrap().unwrap());
        }
        out
    }

    #[tokio::test]
    async fn login_sends_credentials_and_waits_for_motd() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut transport = LineTransport::from_stream(client, false);
        server
            .write_all(
                b":irc.example.org 001 logbot_ :Welcome\r\n\
                  PING :tok\r\n\
                  :irc.example.org 376 logbot_ :End of /MOTD\r\n",
            )
            .await
            .unwrap();

        let cfg = config("password = \"nspass\"\nserver_password = \"srvpass\"\nrealname = \"Logger\"");
        let registration = login(&mut transport, &cfg).await.unwrap();
        assert_eq!(
            registration,
            Registration {
                nick: "logbot_".into(),
                server_name: "irc.example.org".into()
            }
        );

        drop(transport);
        assert_eq!(
            sent_lines(server, 5).await,
            vec![
                "PASS srvpass",
                "USER logbot 0 * :Logger",
                "NICK logbot",
                "PONG :tok",
                "PRIVMSG NickServ :IDENTIFY nspass",
            ]
        );
    }

    #[tokio::test]
    async fn no_motd_also_means_ready() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut transport = LineTransport::from_stream(client, false);
        server
            .write_all(b":hub.example.org 422 logbot :MOTD File is missing\r\n")
            .await
            .unwrap();
        let registration = login(&mut transport, &config("")).await.unwrap();
        assert_eq!(registration.server_name, "hub.example.org");
    }

    #[tokio::test]
    async fn nick_in_use_is_fatal() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut transport = LineTransport::from_stream(client, false);
        server
            .write_all(b":irc.example.org 433 * logbot :Nickname is already in use\r\n")
            .await
            .unwrap();
        let err = login(&mut transport, &config("")).await.unwrap_err();
        assert!(matches!(err, ConnectError::NickInUse(ref n) if n == "logbot"));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn early_close_hints_at_tls_mismatch() {
        let (client, server) = tokio::io::duplex(4096);
        let mut transport = LineTransport::from_stream(client, false);
        drop(server);
        let err = login(&mut transport, &config("")).await.unwrap_err();
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("TLS"));
    }

    #[tokio::test]
    async fn server_error_is_a_refusal_not_a_tls_hint() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut transport = LineTransport::from_stream(client, false);
        server
            .write_all(b"ERROR :Closing Link: 127.0.0.1 (Throttled: reconnecting too fast)\r\n")
            .await
            .unwrap();
        let err = login(&mut transport, &config("")).await.unwrap_err();
        assert!(matches!(err, ConnectError::Refused(ref text) if text.contains("Throttled")));
        assert!(!err.is_fatal());
        assert!(!err.to_string().contains("TLS"));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_times_out() {
        let (client, _server) = tokio::io::duplex(4096);
        let mut transport = LineTransport::from_stream(client, false);
        let err = login(&mut transport, &config("[timing]\nlogin_timeout = 5"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::LoginTimeout(d) if d == Duration::from_secs(5)));
    }

    #[test]
    fn registration_resets_session() {
        let mut bot = test_bot();
        bot.session.joined_channels.insert("#stale".into());
        bot.session.backoff_seconds = Some(8);
        let now = Instant::now();
        bot.on_registered(
            &Registration {
                nick: "logbot_".into(),
                server_name: "hub.example.org".into(),
            },
            now,
        );
        assert_eq!(bot.session.nick, "logbot_");
        assert_eq!(bot.session.server_name, "hub.example.org");
        assert_eq!(bot.session.backoff_seconds, None);
        assert!(bot.session.joined_channels.is_empty());
        assert_eq!(bot.session.timers.next_channel_reload, Some(now));
    }

    #[tokio::test]
    async fn failed_connect_backs_off_and_quit_interrupts_the_wait() {
        // Grab a free port, then close it so connects are refused.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let cfg = Config::from_toml(&format!(
            "network = \"n\"\nhost = \"127.0.0.1\"\nport = {port}\nnick = \"logbot\"\n"
        ))
        .unwrap();
        let mut bot = Bot::new(
            crate::config::ConfigStore::in_memory(cfg),
            crate::cache::CooldownCache::in_memory(Duration::from_secs(60)).unwrap(),
            crate::queue::JobQueue::in_memory().unwrap(),
        );

        let flags = std::sync::Arc::new(SignalFlags::default());
        tokio::spawn({
            let flags = flags.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(1500)).await;
                flags.request_quit();
            }
        });

        let started = Instant::now();
        assert!(bot.ensure_connected(&flags).await.unwrap().is_none());
        // First failure waits 1s, the retry fails too and starts a 2s wait
        // that quit cuts short.
        assert_eq!(bot.session.backoff_seconds, Some(2));
        assert!(started.elapsed() < Duration::from_millis(2500));
    }

    #[tokio::test]
    async fn quit_before_connect_returns_none() {
        let mut bot = test_bot();
        let flags = SignalFlags::default();
        flags.request_quit();
        assert!(bot.ensure_connected(&flags).await.unwrap().is_none());
    }
}
