//! chanlog: IRC channel logging bot.
//!
//!   chanlog bot.toml                 Run the bot
//!   chanlog bot.toml --reload        Reload config in the running bot (SIGHUP)
//!   chanlog bot.toml --debug         Dump session state to the log (SIGUSR1)
//!   chanlog bot.toml --rotate-logs   Reopen the log file (SIGUSR2)
//!   chanlog bot.toml --quit          Send QUIT and exit (SIGTERM)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use nix::sys::signal::Signal;

use chanlog::bot::Bot;
use chanlog::cache::CooldownCache;
use chanlog::config::ConfigStore;
use chanlog::control::{self, PidFile, SignalFlags};
use chanlog::queue::JobQueue;
use chanlog::{logging, runner};

#[derive(Parser)]
#[command(name = "chanlog", about = "IRC channel logging bot")]
#[command(group(ArgGroup::new("control").args(["reload", "debug", "rotate_logs", "quit"])))]
struct Args {
    /// Configuration file (TOML)
    config: PathBuf,

    /// Tell the running instance to reload its configuration
    #[arg(long)]
    reload: bool,

    /// Tell the running instance to log a debug dump
    #[arg(long)]
    debug: bool,

    /// Tell the running instance to reopen its log file
    #[arg(long)]
    rotate_logs: bool,

    /// Tell the running instance to quit
    #[arg(long)]
    quit: bool,
}

impl Args {
    fn control_signal(&self) -> Option<Signal> {
        if self.reload {
            Some(Signal::SIGHUP)
        } else if self.debug {
            Some(Signal::SIGUSR1)
        } else if self.rotate_logs {
            Some(Signal::SIGUSR2)
        } else if self.quit {
            Some(Signal::SIGTERM)
        } else {
            None
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let store = ConfigStore::load(&args.config)?;
    let paths = store.get().paths.resolve(&args.config);

    if let Some(sig) = args.control_signal() {
        let pid = control::signal_running(&paths.pid_file, sig)?;
        println!("Sent {} to {pid}", sig.as_str());
        return Ok(());
    }

    let log_file = logging::init(Some(&paths.log_file))
        .with_context(|| format!("can't open log file {}", paths.log_file.display()))?;
    tracing::info!(config = %args.config.display(), network = %store.get().network, "Starting");

    let flags = Arc::new(SignalFlags::default());
    control::listen(flags.clone())?;
    let _pid_file = PidFile::create(&paths.pid_file)?;

    let cooldown = Duration::from_secs(store.get().timing.invite_cooldown);
    let cache = CooldownCache::open(&paths.state_db, cooldown)
        .with_context(|| format!("can't open cooldown cache {}", paths.state_db.display()))?;
    let queue = JobQueue::open(&paths.state_db)
        .with_context(|| format!("can't open job queue {}", paths.state_db.display()))?;
    let bot = Bot::new(store, cache, queue).with_liveness_file(paths.liveness_file);

    if let Err(e) = runner::run(bot, flags, log_file).await {
        tracing::error!(error = %e, "Giving up");
        return Err(e.into());
    }
    tracing::info!("Bye");
    Ok(())
}
