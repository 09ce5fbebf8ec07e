//! Stream session: binds a frequency to a fan-out buffer and a decoder,
//! and tracks listener clients (`spec.md` §4.3, component C3).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use atc_decoder::{DecoderConfig, DecoderStatus, DecoderSupervisor};
use atc_fanout::MultiReader;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

const IDLE_TIMEOUT: Duration = Duration::from_secs(30);
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);
const ACTIVITY_REFRESH_RATE_LIMIT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session is stopped")]
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Lifecycle {
    Init = 0,
    Running = 1,
    Stopped = 2,
}

struct ClientSlot {
    last_active: Instant,
    closed: Arc<AtomicBool>,
}

struct Inner {
    fanout: Arc<MultiReader>,
    decoder: Mutex<DecoderSupervisor>,
    clients: RwLock<HashMap<String, ClientSlot>>,
    lifecycle: AtomicU8,
}

/// Multiplexes one decoded frequency to many listeners.
///
/// Owns its [`MultiReader`] and [`DecoderSupervisor`] exclusively
/// (`spec.md` §3 ownership rule); both are stopped together by
/// [`StreamSession::stop`].
#[derive(Clone)]
pub struct StreamSession {
    inner: Arc<Inner>,
}

impl StreamSession {
    pub fn start(decoder_cfg: DecoderConfig) -> Self {
        let fanout = Arc::new(MultiReader::new());
        let decoder = DecoderSupervisor::start(decoder_cfg, fanout.clone());
        let session = Self {
            inner: Arc::new(Inner {
                fanout,
                decoder: Mutex::new(decoder),
                clients: RwLock::new(HashMap::new()),
                lifecycle: AtomicU8::new(Lifecycle::Running as u8),
            }),
        };
        session.spawn_liveness_sweep();
        session
    }

    pub fn lifecycle(&self) -> Lifecycle {
        match self.inner.lifecycle.load(Ordering::SeqCst) {
            0 => Lifecycle::Init,
            1 => Lifecycle::Running,
            _ => Lifecycle::Stopped,
        }
    }

    pub async fn decoder_status(&self) -> DecoderStatus {
        self.inner.decoder.lock().await.status()
    }

    /// A reader into the raw decoded PCM stream, independent of any
    /// listener client (used by C5, the transcription processor).
    pub fn tap(&self, reader_id: impl Into<String>) -> Result<atc_fanout::Reader, atc_fanout::FanoutError> {
        self.inner.fanout.create_reader(reader_id)
    }

    /// Admit `client_id`. If the id is already live, its existing reader
    /// is replaced; a fresh [`ClientReader`] is always returned
    /// (`spec.md` §4.3).
    pub async fn add_client(
        &self,
        client_id: impl Into<String>,
    ) -> Result<ClientReader, SessionError> {
        if self.lifecycle() == Lifecycle::Stopped {
            return Err(SessionError::Stopped);
        }
        // Admission policy (duplicate clientID, per-frequency/global caps)
        // is enforced by the orchestrator before this is called; a second
        // add_client for a still-live id here just replaces its reader.
        let client_id = client_id.into();
        self.inner.fanout.remove_reader(&client_id);
        let inner_reader = self
            .inner
            .fanout
            .create_reader(client_id.clone())
            .expect("remove_reader above frees the id unconditionally");

        let closed = Arc::new(AtomicBool::new(false));
        self.inner.clients.write().await.insert(
            client_id.clone(),
            ClientSlot {
                last_active: Instant::now(),
                closed: closed.clone(),
            },
        );

        Ok(ClientReader {
            id: client_id,
            inner: inner_reader,
            closed,
            session: self.inner.clone(),
            last_refresh: Instant::now(),
        })
    }

    pub async fn is_client_connected(&self, client_id: &str) -> bool {
        self.inner
            .clients
            .read()
            .await
            .get(client_id)
            .map(|slot| !slot.closed.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Explicit removal. Idempotent.
    pub async fn remove_client(&self, client_id: &str) {
        if let Some(slot) = self.inner.clients.write().await.remove(client_id) {
            slot.closed.store(true, Ordering::SeqCst);
        }
        self.inner.fanout.remove_reader(client_id);
    }

    pub async fn client_count(&self) -> usize {
        self.inner.clients.read().await.len()
    }

    /// Cancel all client contexts, clear tables, and stop the decoder.
    pub async fn stop(&self) {
        self.inner
            .lifecycle
            .store(Lifecycle::Stopped as u8, Ordering::SeqCst);
        let ids: Vec<String> = {
            let mut clients = self.inner.clients.write().await;
            let ids = clients.keys().cloned().collect::<Vec<_>>();
            for slot in clients.values() {
                slot.closed.store(true, Ordering::SeqCst);
            }
            clients.clear();
            ids
        };
        for id in ids {
            self.inner.fanout.remove_reader(&id);
        }
        self.inner.fanout.close();
        self.inner.decoder.lock().await.stop().await;
    }

    fn spawn_liveness_sweep(&self) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                if inner.lifecycle.load(Ordering::SeqCst) == Lifecycle::Stopped as u8 {
                    break;
                }
                let stale: Vec<String> = {
                    let clients = inner.clients.read().await;
                    clients
                        .iter()
                        .filter(|(_, slot)| {
                            slot.closed.load(Ordering::SeqCst)
                                || slot.last_active.elapsed() > IDLE_TIMEOUT
                        })
                        .map(|(id, _)| id.clone())
                        .collect()
                };
                if stale.is_empty() {
                    continue;
                }
                let mut clients = inner.clients.write().await;
                for id in &stale {
                    if let Some(slot) = clients.remove(id) {
                        slot.closed.store(true, Ordering::SeqCst);
                    }
                }
                drop(clients);
                for id in &stale {
                    inner.fanout.remove_reader(id);
                }
                info!(count = stale.len(), "evicted idle or dead listener clients");
            }
        });
    }
}

/// Wraps a [`atc_fanout::Reader`] so that closing it never closes the
/// shared buffer — only this client's own slot is affected.
///
/// Closing does not re-enter the owning session's client-table lock: the
/// closed flag is set directly, and removal from the table happens on the
/// liveness sweep's own pass over the table (`spec.md` §5 deadlock
/// avoidance rule).
pub struct ClientReader {
    id: String,
    inner: atc_fanout::Reader,
    closed: Arc<AtomicBool>,
    session: Arc<Inner>,
    last_refresh: Instant,
}

impl std::fmt::Debug for ClientReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientReader").field("id", &self.id).finish_non_exhaustive()
    }
}

impl ClientReader {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn read(&mut self) -> Option<Vec<u8>> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        let data = self.inner.read().await;
        if data.is_some() {
            self.refresh_activity().await;
        } else {
            self.closed.store(true, Ordering::SeqCst);
        }
        data
    }

    /// Refresh this client's `last_active` timestamp, rate-limited to once
    /// per [`ACTIVITY_REFRESH_RATE_LIMIT`]: read-lock probe first, upgrade
    /// to a write lock only when the threshold is crossed and the client
    /// still exists (`spec.md` §4.3/§9).
    async fn refresh_activity(&mut self) {
        if self.last_refresh.elapsed() < ACTIVITY_REFRESH_RATE_LIMIT {
            return;
        }
        {
            let clients = self.session.clients.read().await;
            match clients.get(&self.id) {
                Some(slot) if slot.last_active.elapsed() < ACTIVITY_REFRESH_RATE_LIMIT => {
                    self.last_refresh = Instant::now();
                    return;
                }
                None => return,
                _ => {}
            }
        }
        let mut clients = self.session.clients.write().await;
        if let Some(slot) = clients.get_mut(&self.id) {
            slot.last_active = Instant::now();
            self.last_refresh = slot.last_active;
        }
    }

    /// Close this reader only. Never touches the session's client table
    /// lock; the table entry is garbage-collected by the next liveness
    /// sweep once it observes `closed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Drop for ClientReader {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_decoder_config() -> DecoderConfig {
        DecoderConfig {
            decoder_path: "/bin/cat".to_owned(),
            source_url: "/dev/null".to_owned(),
            sample_rate: 16_000,
            channels: 1,
            reconnect_delay: Duration::from_millis(20),
            connect_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn add_and_remove_client_is_idempotent_on_second_removal() {
        let session = StreamSession::start(noop_decoder_config());
        let _reader = session.add_client("c1").await.unwrap();
        assert_eq!(session.client_count().await, 1);
        session.remove_client("c1").await;
        assert_eq!(session.client_count().await, 0);
        // Second removal is a no-op, not an error.
        session.remove_client("c1").await;
        assert_eq!(session.client_count().await, 0);
    }

    #[tokio::test]
    async fn closing_one_client_reader_does_not_affect_another() {
        let session = StreamSession::start(noop_decoder_config());
        let mut a = session.add_client("a").await.unwrap();
        let b = session.add_client("b").await.unwrap();
        a.close();
        assert!(a.read().await.is_none());
        assert!(session.is_client_connected("b").await);
        drop(b);
        session.stop().await;
    }

    #[tokio::test]
    async fn stop_evicts_all_clients() {
        let session = StreamSession::start(noop_decoder_config());
        let _a = session.add_client("a").await.unwrap();
        let _b = session.add_client("b").await.unwrap();
        session.stop().await;
        assert_eq!(session.client_count().await, 0);
        assert_eq!(session.lifecycle(), Lifecycle::Stopped);
    }
}
