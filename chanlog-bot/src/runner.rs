//! The event loop.
//!
//! One iteration: drain signal flags, make sure a connection exists, read
//! at most one line (bounded wait), fire due timers, dispatch the line,
//! flush queued output. Everything runs on one task.

use std::sync::Arc;
use std::time::Duration;

use chanlog_sdk::commands;
use chanlog_sdk::transport::{LineTransport, ReadOutcome, TransportError};
use tokio::time::Instant;

use crate::bot::Bot;
use crate::control::SignalFlags;
use crate::lifecycle::ConnectError;
use crate::logging::LogFile;

/// Read wait per iteration; also the timer resolution.
pub const READ_POLL: Duration = Duration::from_millis(200);

/// Why [`serve`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The connection is gone or was dropped on purpose; reconnect.
    Dropped,
    /// QUIT was sent; exit.
    Quit,
}

/// Run until quit. Only fatal connection errors are returned.
pub async fn run(mut bot: Bot, flags: Arc<SignalFlags>, log_file: Option<LogFile>) -> Result<(), ConnectError> {
    loop {
        drain_signals(&mut bot, &flags, log_file.as_ref());
        let Some(mut transport) = bot.ensure_connected(&flags).await? else {
            tracing::info!("Quit requested while disconnected");
            return Ok(());
        };
        match serve(&mut bot, &mut transport, &flags, log_file.as_ref()).await {
            SessionEnd::Quit => return Ok(()),
            SessionEnd::Dropped => {
                transport.shutdown().await;
                tracing::warn!("Disconnected; reconnecting");
            }
        }
    }
}

/// Drive one established connection.
pub async fn serve(
    bot: &mut Bot,
    transport: &mut LineTransport,
    flags: &SignalFlags,
    log_file: Option<&LogFile>,
) -> SessionEnd {
    loop {
        drain_signals(bot, flags, log_file);
        if flags.quit_requested() {
            let quit = commands::quit(&bot.cfg().quit_message);
            if let Err(e) = transport.write_line(&quit).await {
                tracing::warn!(error = %e, "Failed to send QUIT");
            }
            transport.shutdown().await;
            tracing::info!("Sent QUIT");
            return SessionEnd::Quit;
        }

        let outcome = transport.read_line(READ_POLL).await;
        let now = Instant::now();
        bot.run_timers(now);
        match outcome {
            ReadOutcome::Idle => {}
            ReadOutcome::Line(msg) => bot.dispatch(&msg, now),
            ReadOutcome::Disconnected => {
                tracing::warn!("Server closed the connection");
                bot.session.drop_requested = true;
            }
        }

        if let Err(e) = flush(bot, transport).await {
            tracing::error!(error = %e, "Write failed");
            bot.session.drop_requested = true;
        }
        if bot.session.drop_requested {
            bot.session.drop_requested = false;
            return SessionEnd::Dropped;
        }
    }
}

async fn flush(bot: &mut Bot, transport: &mut LineTransport) -> Result<(), TransportError> {
    for line in bot.session.take_outbox() {
        tracing::debug!(line = %commands::redact(&line), ">>");
        transport.write_line(&line).await?;
    }
    Ok(())
}

fn drain_signals(bot: &mut Bot, flags: &SignalFlags, log_file: Option<&LogFile>) {
    if flags.take_reload() {
        tracing::info!("Reloading configuration");
        if bot.reload_config()
            && !bot.session.server_name.is_empty()
            && bot.session.reconciliation.is_none()
        {
            bot.session.timers.next_channel_reload = Some(Instant::now());
        }
    }
    if flags.take_debug() {
        bot.dump_state();
    }
    if flags.take_rotate_logs() {
        match log_file {
            Some(file) => match file.reopen() {
                Ok(()) => tracing::info!(path = %file.path().display(), "Reopened log file"),
                Err(e) => tracing::error!(path = %file.path().display(), error = %e, "Failed to reopen log file"),
            },
            None => tracing::info!("No log file to reopen"),
        }
    }
}
