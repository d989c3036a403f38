//! Process lifecycle primitives: the shutdown channel and liveness pidfile.
//!
//! Shutdown is an explicit in-process signal rather than an OS signal: the
//! embedding process decides what triggers it (SIGINT handler, admin RPC,
//! test harness) and calls [`ShutdownChannel::trigger`]. The channel is
//! idempotent, so racing double-triggers collapse into one shutdown.

use std::io::Write;
use std::path::{Path, PathBuf};

use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Multi-producer trigger half of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownChannel {
    tx: watch::Sender<bool>,
}

/// Receiver half, handed to [`crate::Server::start`] to interrupt the
/// accept loop.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownChannel {
    /// Create a connected trigger/signal pair.
    pub fn new() -> (Self, ShutdownSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, ShutdownSignal { rx })
    }

    /// Request shutdown. Safe to call any number of times, from any number
    /// of clones, concurrently; only the first transition has an effect.
    pub fn trigger(&self) {
        let already = self.tx.send_replace(true);
        if !already {
            debug!("shutdown requested");
        }
    }

    /// Another signal handle, for additional listeners.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl ShutdownSignal {
    /// Wait until shutdown is requested. Returns immediately if it already
    /// was, including for handles subscribed after the trigger.
    pub async fn recv(&mut self) {
        // Only errors if the sender is gone, which counts as shutdown.
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    /// Whether shutdown has been requested, without waiting.
    pub fn triggered(&self) -> bool {
        *self.rx.borrow()
    }
}

/// The liveness artifact: a pidfile present exactly while the server is
/// between start and completed shutdown.
///
/// Single-writer: only the server that created it removes it. External
/// supervisors may only poll for existence. A crash can leave it stale;
/// observers must treat a stale file as "state unknown", not "running".
#[derive(Debug)]
pub struct Pidfile {
    path: PathBuf,
    armed: bool,
}

impl Pidfile {
    /// Write the pidfile containing the current process id.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = std::fs::File::create(path)?;
        writeln!(file, "{}", std::process::id())?;
        info!(path = %path.display(), "wrote pidfile");
        Ok(Self {
            path: path.to_path_buf(),
            armed: true,
        })
    }

    /// Remove the pidfile. Consumes the handle, so removal happens at most
    /// once per created file.
    pub fn remove(mut self) -> std::io::Result<()> {
        self.armed = false;
        std::fs::remove_file(&self.path)?;
        info!(path = %self.path.display(), "removed pidfile");
        Ok(())
    }

    /// Where the pidfile lives.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Pidfile {
    fn drop(&mut self) {
        // Unwind path only; clean shutdown goes through remove().
        if self.armed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "pidfile left behind");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_trigger_is_idempotent() {
        let (channel, signal) = ShutdownChannel::new();
        channel.trigger();
        channel.trigger();
        channel.trigger();
        assert!(signal.triggered());
    }

    #[tokio::test]
    async fn test_recv_after_trigger_returns_immediately() {
        let (channel, mut signal) = ShutdownChannel::new();
        channel.trigger();
        tokio::time::timeout(Duration::from_millis(10), signal.recv())
            .await
            .expect("signal should already be set");
    }

    #[tokio::test]
    async fn test_concurrent_triggers_wake_all_listeners() {
        let (channel, signal) = ShutdownChannel::new();

        let mut listeners = Vec::new();
        for _ in 0..4 {
            let mut s = channel.subscribe();
            listeners.push(tokio::spawn(async move { s.recv().await }));
        }

        let c1 = channel.clone();
        let c2 = channel.clone();
        let t1 = tokio::spawn(async move { c1.trigger() });
        let t2 = tokio::spawn(async move { c2.trigger() });
        t1.await.unwrap();
        t2.await.unwrap();

        for listener in listeners {
            tokio::time::timeout(Duration::from_millis(100), listener)
                .await
                .expect("listener woke")
                .unwrap();
        }
        assert!(signal.triggered());
    }

    #[test]
    fn test_pidfile_create_and_remove() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("warden.pid");

        let pidfile = Pidfile::create(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());

        pidfile.remove().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_pidfile_drop_cleans_up_on_unwind_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("warden.pid");
        {
            let _pidfile = Pidfile::create(&path).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_pidfile_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run").join("warden.pid");
        let pidfile = Pidfile::create(&path).unwrap();
        assert!(path.exists());
        pidfile.remove().unwrap();
    }
}
