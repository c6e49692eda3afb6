//! Process control: signal flags, the pid file, and signalling a running
//! instance from the command line.
//!
//! | signal          | effect                                   |
//! |-----------------|------------------------------------------|
//! | SIGHUP          | reload config, reconcile channels now    |
//! | SIGUSR1         | debug dump of the session                |
//! | SIGUSR2         | reopen the log file (after rotation)     |
//! | SIGTERM, SIGINT | send QUIT and exit                       |

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tokio::sync::Notify;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("can't read pid file {path}: {source}")]
    ReadPid {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("pid file {path} does not hold a pid: {content:?}")]
    BadPid { path: PathBuf, content: String },
    #[error("can't write pid file {path}: {source}")]
    WritePid {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("can't signal process {pid}: {source}")]
    Kill {
        pid: i32,
        #[source]
        source: nix::Error,
    },
    #[error("can't install signal handler: {0}")]
    Install(#[from] std::io::Error),
}

/// One-shot requests raised by signal handlers and drained by the event
/// loop at the top of each iteration.
#[derive(Debug, Default)]
pub struct SignalFlags {
    reload: AtomicBool,
    debug: AtomicBool,
    rotate_logs: AtomicBool,
    quit: AtomicBool,
    wake: Notify,
}

impl SignalFlags {
    pub fn request_reload(&self) {
        self.reload.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn request_debug(&self) {
        self.debug.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn request_rotate_logs(&self) {
        self.rotate_logs.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn request_quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn take_reload(&self) -> bool {
        self.reload.swap(false, Ordering::SeqCst)
    }

    pub fn take_debug(&self) -> bool {
        self.debug.swap(false, Ordering::SeqCst)
    }

    pub fn take_rotate_logs(&self) -> bool {
        self.rotate_logs.swap(false, Ordering::SeqCst)
    }

    /// Quit is sticky: once requested it stays requested.
    pub fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    /// Resolves once quit has been requested.
    pub async fn quit_signalled(&self) {
        while !self.quit_requested() {
            self.wake.notified().await;
        }
    }
}

/// Spawn a task translating Unix signals into [`SignalFlags`].
pub fn listen(flags: Arc<SignalFlags>) -> Result<(), ControlError> {
    let mut hup = unix_signal(SignalKind::hangup())?;
    let mut usr1 = unix_signal(SignalKind::user_defined1())?;
    let mut usr2 = unix_signal(SignalKind::user_defined2())?;
    let mut term = unix_signal(SignalKind::terminate())?;
    let mut int = unix_signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = hup.recv() => {
                    tracing::info!("SIGHUP: reload requested");
                    flags.request_reload();
                }
                _ = usr1.recv() => flags.request_debug(),
                _ = usr2.recv() => flags.request_rotate_logs(),
                _ = term.recv() => {
                    tracing::info!("SIGTERM: quitting");
                    flags.request_quit();
                }
                _ = int.recv() => {
                    tracing::info!("SIGINT: quitting");
                    flags.request_quit();
                }
            }
        }
    });
    Ok(())
}

/// Pid file that removes itself when dropped.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn create(path: &Path) -> Result<Self, ControlError> {
        std::fs::write(path, format!("{}\n", std::process::id())).map_err(|source| {
            ControlError::WritePid {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove pid file");
        }
    }
}

pub fn read_pid(path: &Path) -> Result<i32, ControlError> {
    let content = std::fs::read_to_string(path).map_err(|source| ControlError::ReadPid {
        path: path.to_path_buf(),
        source,
    })?;
    content
        .trim()
        .parse::<i32>()
        .ok()
        .filter(|pid| *pid > 0)
        .ok_or_else(|| ControlError::BadPid {
            path: path.to_path_buf(),
            content: content.trim().to_string(),
        })
}

/// Send `sig` to the instance recorded in `pid_file`.
pub fn signal_running(pid_file: &Path, sig: Signal) -> Result<i32, ControlError> {
    let pid = read_pid(pid_file)?;
    signal::kill(Pid::from_raw(pid), sig).map_err(|source| ControlError::Kill { pid, source })?;
    Ok(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_one_shot_except_quit() {
        let flags = SignalFlags::default();
        flags.request_reload();
        assert!(flags.take_reload());
        assert!(!flags.take_reload());
        assert!(!flags.take_debug());

        flags.request_quit();
        assert!(flags.quit_requested());
        assert!(flags.quit_requested());
    }

    #[tokio::test]
    async fn quit_wakes_waiter() {
        let flags = Arc::new(SignalFlags::default());
        let waiter = tokio::spawn({
            let flags = flags.clone();
            async move { flags.quit_signalled().await }
        });
        flags.request_reload();
        flags.request_quit();
        waiter.await.unwrap();
    }

    #[test]
    fn pid_file_round_trip_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.pid");
        {
            let _pid = PidFile::create(&path).unwrap();
            assert_eq!(read_pid(&path).unwrap(), std::process::id() as i32);
        }
        assert!(!path.exists());
    }

    #[test]
    fn garbage_pid_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.pid");
        std::fs::write(&path, "not a pid\n").unwrap();
        assert!(matches!(read_pid(&path), Err(ControlError::BadPid { .. })));
    }

    #[test]
    fn missing_pid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = signal_running(&dir.path().join("none.pid"), Signal::SIGHUP).unwrap_err();
        assert!(matches!(err, ControlError::ReadPid { .. }));
    }
}
