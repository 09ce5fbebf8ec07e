//! In-process byte fan-out (`spec.md` §4.1, component C1).
//!
//! Generalizes the teacher's `FanoutServer` (a TCP-accept loop keyed by
//! listen address) into an in-process buffer keyed by reader id: `write()`
//! is called directly by the upstream decoder instead of arriving over a
//! socket, and readers are looked up by the id `StreamSession` (C3) assigns
//! each client rather than by the peer `SocketAddr` of an accepted
//! connection. The backpressure mechanism — a `broadcast::channel` per
//! buffer, one subscription per reader, tail-drop on lag — is unchanged.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::{broadcast, watch};

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum FanoutError {
    #[error("reader {0:?} already registered")]
    AlreadyExists(String),
}

struct Inner {
    tx: broadcast::Sender<Vec<u8>>,
    readers: Mutex<HashMap<String, watch::Sender<bool>>>,
    closed: AtomicBool,
}

/// A single producer, many-consumer byte buffer. Every chunk passed to
/// [`MultiReader::write`] is delivered to every currently-registered
/// [`Reader`]; a reader that falls behind the channel's capacity silently
/// drops its oldest unread chunks and resumes from what it can still see
/// (`spec.md` §4.1 invariant: readers observe a contiguous suffix, not
/// necessarily the full stream).
pub struct MultiReader {
    inner: std::sync::Arc<Inner>,
}

impl MultiReader {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            inner: std::sync::Arc::new(Inner {
                tx,
                readers: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Register a new reader under `id`. Fails if `id` is already
    /// registered; a prior [`remove_reader`](Self::remove_reader) call must
    /// happen first. If the buffer is already closed, the returned reader
    /// yields `None` on its first `read()` call instead of erroring.
    pub fn create_reader(&self, id: impl Into<String>) -> Result<Reader, FanoutError> {
        let id = id.into();
        let mut readers = self.inner.readers.lock().expect("fanout registry poisoned");
        if readers.contains_key(&id) {
            return Err(FanoutError::AlreadyExists(id));
        }
        let (closed_tx, closed_rx) = watch::channel(self.inner.closed.load(Ordering::SeqCst));
        readers.insert(id.clone(), closed_tx);
        Ok(Reader {
            id,
            rx: self.inner.tx.subscribe(),
            closed_rx,
        })
    }

    /// Unregister `id`. Idempotent: removing an id that isn't registered (or
    /// removing it twice) is not an error. Any `Reader` still held by the
    /// caller observes this as EOF on its next `read()`.
    pub fn remove_reader(&self, id: &str) {
        if let Some(closed_tx) = self
            .inner
            .readers
            .lock()
            .expect("fanout registry poisoned")
            .remove(id)
        {
            let _ = closed_tx.send(true);
        }
    }

    /// Broadcast `data` to every currently-registered reader. Returns the
    /// number of bytes written regardless of whether any reader was
    /// listening — a zero-reader buffer is not an error (`spec.md` §4.1).
    pub fn write(&self, data: Vec<u8>) -> usize {
        let len = data.len();
        let _ = self.inner.tx.send(data);
        len
    }

    /// Close the buffer: every registered reader observes EOF and any
    /// future `create_reader` call returns a reader that is already at EOF.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let mut readers = self.inner.readers.lock().expect("fanout registry poisoned");
        for (_, closed_tx) in readers.drain() {
            let _ = closed_tx.send(true);
        }
    }

    pub fn reader_count(&self) -> usize {
        self.inner.readers.lock().expect("fanout registry poisoned").len()
    }
}

impl Default for MultiReader {
    fn default() -> Self {
        Self::new()
    }
}

/// A single consumer's view into a [`MultiReader`].
pub struct Reader {
    id: String,
    rx: broadcast::Receiver<Vec<u8>>,
    closed_rx: watch::Receiver<bool>,
}

impl Reader {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Await the next chunk. Returns `None` once the buffer has been closed
    /// or this reader has been removed; transparently skips chunks dropped
    /// to lag rather than surfacing the drop to the caller.
    pub async fn read(&mut self) -> Option<Vec<u8>> {
        loop {
            if *self.closed_rx.borrow() {
                return None;
            }
            tokio::select! {
                biased;
                changed = self.closed_rx.changed() => {
                    if changed.is_err() || *self.closed_rx.borrow() {
                        return None;
                    }
                }
                msg = self.rx.recv() => {
                    match msg {
                        Ok(data) => return Some(data),
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reader_receives_bytes_written_after_registration() {
        let fanout = MultiReader::new();
        let mut reader = fanout.create_reader("r1").unwrap();
        fanout.write(b"hello".to_vec());
        assert_eq!(reader.read().await, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn duplicate_reader_id_is_rejected() {
        let fanout = MultiReader::new();
        let _r1 = fanout.create_reader("r1").unwrap();
        assert!(matches!(
            fanout.create_reader("r1"),
            Err(FanoutError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn removed_reader_observes_eof() {
        let fanout = MultiReader::new();
        let mut reader = fanout.create_reader("r1").unwrap();
        fanout.remove_reader("r1");
        assert_eq!(reader.read().await, None);
    }

    #[tokio::test]
    async fn slow_reader_drops_oldest_and_resumes() {
        let fanout = MultiReader::with_capacity(2);
        let mut reader = fanout.create_reader("r1").unwrap();
        for i in 0..5u8 {
            fanout.write(vec![i]);
        }
        // The slow reader missed chunks past its capacity but keeps
        // receiving — it never blocks the writer and never hangs forever.
        let next = reader.read().await;
        assert!(next.is_some());
    }

    #[tokio::test]
    async fn close_ends_all_existing_and_future_readers() {
        let fanout = MultiReader::new();
        let mut before = fanout.create_reader("before").unwrap();
        fanout.close();
        assert_eq!(before.read().await, None);
        let mut after = fanout.create_reader("after").unwrap();
        assert_eq!(after.read().await, None);
    }

    #[tokio::test]
    async fn independent_readers_each_see_every_write() {
        let fanout = MultiReader::new();
        let mut a = fanout.create_reader("a").unwrap();
        let mut b = fanout.create_reader("b").unwrap();
        fanout.write(b"x".to_vec());
        assert_eq!(a.read().await, Some(b"x".to_vec()));
        assert_eq!(b.read().await, Some(b"x".to_vec()));
    }
}
