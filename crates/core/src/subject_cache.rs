// crates/core/src/subject_cache.rs
//! Per-subject timeline cache: an in-memory hot layer over a durable store.
//!
//! The hot layer is authoritative for the current process. Durable work is
//! handed to a single background task that executes it strictly in
//! submission order, and durable reads travel through the same queue, so a
//! read-back of a subject always observes that subject's last save (or its
//! eviction).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::frame::Frame;
use crate::store::{timeline_key, TimelineStore};

enum StoreOp {
    Set { key: String, frames: Vec<Frame> },
    Delete { key: String },
    Get {
        key: String,
        reply: oneshot::Sender<Option<Vec<Frame>>>,
    },
    Flush(oneshot::Sender<()>),
}

/// Counters for durable work, mostly for diagnostics and tests.
#[derive(Debug, Default)]
pub struct PersistStats {
    writes: AtomicU64,
    failures: AtomicU64,
}

impl PersistStats {
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Maps subject identity to its frame history.
///
/// Subjects without an identity (`None`) live in a single in-memory slot and
/// are never written durably; [`SubjectCache::rekey`] moves them under their
/// real id once the upload is confirmed.
///
/// Must be constructed inside a Tokio runtime.
pub struct SubjectCache {
    hot: HashMap<String, Vec<Frame>>,
    transient: Option<Vec<Frame>>,
    ops: mpsc::UnboundedSender<StoreOp>,
    stats: Arc<PersistStats>,
}

impl SubjectCache {
    pub fn new(store: Arc<dyn TimelineStore>) -> Self {
        let (ops, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(PersistStats::default());
        tokio::spawn(run_store_worker(store, rx, Arc::clone(&stats)));
        Self {
            hot: HashMap::new(),
            transient: None,
            ops,
            stats,
        }
    }

    /// Record the full frame sequence for a subject.
    ///
    /// Updates the hot copy immediately and schedules a durable write;
    /// never blocks and never fails from the caller's point of view.
    pub fn save(&mut self, subject: Option<&str>, frames: Vec<Frame>) {
        let Some(id) = subject else {
            self.transient = Some(frames);
            return;
        };
        self.hot.insert(id.to_string(), frames.clone());
        self.submit(StoreOp::Set {
            key: timeline_key(id),
            frames,
        });
    }

    /// Hot copy, else durable copy, else empty.
    pub async fn load(&mut self, subject: Option<&str>) -> Vec<Frame> {
        let Some(id) = subject else {
            return self.transient.clone().unwrap_or_default();
        };
        if let Some(frames) = self.hot.get(id) {
            return frames.clone();
        }

        let (reply, rx) = oneshot::channel();
        self.submit(StoreOp::Get {
            key: timeline_key(id),
            reply,
        });
        match rx.await {
            Ok(Some(frames)) => {
                debug!(subject = %id, frames = frames.len(), "restored timeline from durable store");
                self.hot.insert(id.to_string(), frames.clone());
                frames
            }
            Ok(None) => Vec::new(),
            Err(_) => {
                warn!(subject = %id, "timeline store worker gone; treating history as empty");
                Vec::new()
            }
        }
    }

    /// Drop both the hot and the durable copy.
    pub fn evict(&mut self, subject: Option<&str>) {
        let Some(id) = subject else {
            self.transient = None;
            return;
        };
        self.hot.remove(id);
        self.submit(StoreOp::Delete {
            key: timeline_key(id),
        });
    }

    /// Move the identity-less frames under `new_id` and persist them.
    /// Returns how many frames were moved.
    pub fn rekey(&mut self, new_id: &str) -> usize {
        let frames = self.transient.take().unwrap_or_default();
        let moved = frames.len();
        self.save(Some(new_id), frames);
        moved
    }

    /// Whether a hot copy exists for `subject`.
    pub fn is_hot(&self, subject: Option<&str>) -> bool {
        match subject {
            Some(id) => self.hot.contains_key(id),
            None => self.transient.is_some(),
        }
    }

    /// Wait until every durable operation queued so far has run.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.submit(StoreOp::Flush(tx));
        let _ = rx.await;
    }

    pub fn stats(&self) -> &PersistStats {
        &self.stats
    }

    fn submit(&self, op: StoreOp) {
        if self.ops.send(op).is_err() {
            warn!("timeline store worker stopped; durable write skipped");
        }
    }
}

async fn run_store_worker(
    store: Arc<dyn TimelineStore>,
    mut rx: mpsc::UnboundedReceiver<StoreOp>,
    stats: Arc<PersistStats>,
) {
    while let Some(op) = rx.recv().await {
        match op {
            StoreOp::Set { key, frames } => match store.set(&key, &frames).await {
                Ok(()) => {
                    stats.writes.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    stats.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(key = %key, error = %e, "Timeline persist failed (non-fatal)");
                }
            },
            StoreOp::Delete { key } => {
                if let Err(e) = store.delete(&key).await {
                    stats.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(key = %key, error = %e, "Timeline delete failed (non-fatal)");
                }
            }
            StoreOp::Get { key, reply } => {
                let frames = match store.get(&key).await {
                    Ok(frames) => frames,
                    Err(e) => {
                        stats.failures.fetch_add(1, Ordering::Relaxed);
                        warn!(key = %key, error = %e, "Timeline load failed; using empty history");
                        None
                    }
                };
                let _ = reply.send(frames);
            }
            StoreOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}
