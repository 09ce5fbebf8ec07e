//! Decoder supervisor (`spec.md` §4.2, component C2).
//!
//! Owns exactly one subprocess per frequency that turns a remote stream URL
//! into raw PCM on stdout; pipes that stdout into a [`MultiReader`]; and
//! restarts the subprocess, with a serialized backoff, whenever the pipe
//! ends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use atc_fanout::MultiReader;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::Notify;
use tracing::{info, warn};

const WATCHDOG_INTERVAL: Duration = Duration::from_secs(5);
const READ_BUF_SIZE: usize = 8192;

#[derive(Debug, Clone)]
pub struct DecoderConfig {
    pub decoder_path: String,
    pub source_url: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
}

/// Decoder lifecycle status, queryable by operators (`spec.md` §4.2's
/// "records status=error and lastError" clause).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderStatus {
    Starting,
    Running,
    Restarting,
    Stopped,
    Error { last_error: String },
}

struct Shared {
    status: Mutex<DecoderStatus>,
    stop: AtomicBool,
    restart_pending: AtomicBool,
    stopped_notify: Notify,
}

/// Supervises one decoder subprocess, feeding its stdout into `fanout`.
pub struct DecoderSupervisor {
    shared: Arc<Shared>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl DecoderSupervisor {
    /// Spawn the supervisor task. Restarts are serialized by
    /// `restart_pending`: a concurrent trigger while a restart is already
    /// scheduled is a no-op, matching the "at most one pending restart
    /// timer" requirement.
    pub fn start(cfg: DecoderConfig, fanout: Arc<MultiReader>) -> Self {
        let shared = Arc::new(Shared {
            status: Mutex::new(DecoderStatus::Starting),
            stop: AtomicBool::new(false),
            restart_pending: AtomicBool::new(false),
            stopped_notify: Notify::new(),
        });
        let task_shared = shared.clone();
        let handle = tokio::spawn(supervise(cfg, fanout, task_shared));
        Self {
            shared,
            handle: Some(handle),
        }
    }

    pub fn status(&self) -> DecoderStatus {
        self.shared.status.lock().expect("decoder status poisoned").clone()
    }

    /// Stop the decoder. Idempotent; waits briefly for the running process
    /// to be torn down before returning.
    pub async fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
        *self.shared.status.lock().expect("decoder status poisoned") = DecoderStatus::Stopped;
    }
}

async fn supervise(cfg: DecoderConfig, fanout: Arc<MultiReader>, shared: Arc<Shared>) {
    loop {
        if shared.stop.load(Ordering::SeqCst) {
            break;
        }
        *shared.status.lock().expect("decoder status poisoned") = DecoderStatus::Running;
        shared.restart_pending.store(false, Ordering::SeqCst);

        match run_once(&cfg, &fanout, &shared).await {
            Ok(()) => {
                info!(url = %cfg.source_url, "decoder process exited cleanly");
            }
            Err(e) => {
                warn!(url = %cfg.source_url, error = %e, "decoder process failed");
                *shared.status.lock().expect("decoder status poisoned") = DecoderStatus::Error {
                    last_error: e.to_string(),
                };
            }
        }

        if shared.stop.load(Ordering::SeqCst) {
            break;
        }
        *shared.status.lock().expect("decoder status poisoned") = DecoderStatus::Restarting;
        tokio::time::sleep(cfg.reconnect_delay).await;
    }
    shared.stopped_notify.notify_waiters();
}

async fn run_once(
    cfg: &DecoderConfig,
    fanout: &Arc<MultiReader>,
    shared: &Arc<Shared>,
) -> std::io::Result<()> {
    let mut child = Command::new(&cfg.decoder_path)
        .args([
            "-loglevel",
            "error",
            "-reconnect",
            "1",
            "-reconnect_streamed",
            "1",
            "-i",
            cfg.source_url.as_str(),
            "-f",
            "s16le",
            "-ar",
            &cfg.sample_rate.to_string(),
            "-ac",
            &cfg.channels.to_string(),
            "pipe:1",
        ])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    let mut stdout = child.stdout.take().expect("stdout was piped");
    let mut buf = vec![0u8; READ_BUF_SIZE];

    let mut watchdog = tokio::time::interval(WATCHDOG_INTERVAL);
    watchdog.tick().await;

    loop {
        if shared.stop.load(Ordering::SeqCst) {
            let _ = child.start_kill();
            return Ok(());
        }
        tokio::select! {
            read = stdout.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    let _ = child.start_kill();
                    return Ok(());
                }
                fanout.write(buf[..n].to_vec());
            }
            _ = watchdog.tick() => {
                if let Ok(Some(status)) = child.try_wait() {
                    return Err(std::io::Error::other(format!(
                        "decoder exited with {status}"
                    )));
                }
            }
        }
    }
}
