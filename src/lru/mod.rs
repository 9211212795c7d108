//! Bounded concurrent LRU engine.
//!
//! A lock-free map with per-entry recency stamps and watermark-driven
//! eviction. Reads and writes never pay for eviction bookkeeping beyond an
//! atomic stamp store; a background worker sweeps the map down to its
//! acceptable size in approximate least-recently-used order, invoking a
//! caller-supplied callback for every entry it actually removes. The
//! vertex cache uses that callback to migrate still-volatile vertices into
//! its unbounded tier before they drop.

use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::config::Watermarks;

/// Invoked from the sweep worker for every evicted (key, value) pair.
pub type EvictionCallback<K, V> = Box<dyn Fn(K, &V) + Send + Sync>;

enum SweepMessage {
    /// Run one sweep pass; the optional channel acknowledges completion.
    Sweep(Option<Sender<()>>),
    Shutdown,
}

struct Slot<V> {
    value: V,
    stamp: AtomicU64,
}

struct Inner<K: Eq + Hash, V> {
    map: DashMap<K, Slot<V>>,
    size: AtomicUsize,
    clock: AtomicU64,
    alive: AtomicBool,
    sweep_pending: AtomicBool,
    marks: Watermarks,
    on_evict: EvictionCallback<K, V>,
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Copy + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// One eviction pass: snapshot (key, stamp) pairs, evict the oldest
    /// until the tracked size is back at the acceptable mark. An entry
    /// whose stamp moved between snapshot and removal was touched in the
    /// meantime and is spared this pass.
    fn sweep(&self) {
        let before = self.size.load(Ordering::Relaxed);
        if before <= self.marks.acceptable {
            return;
        }
        let mut entries: Vec<(K, u64)> = self
            .map
            .iter()
            .map(|entry| (*entry.key(), entry.value().stamp.load(Ordering::Relaxed)))
            .collect();
        entries.sort_unstable_by_key(|&(_, stamp)| stamp);
        let excess = entries.len().saturating_sub(self.marks.acceptable);
        let mut evicted = 0usize;
        for (key, stamp) in entries.into_iter().take(excess) {
            if self.size.load(Ordering::Relaxed) <= self.marks.acceptable {
                break;
            }
            let removed = self
                .map
                .remove_if(&key, |_, slot| slot.stamp.load(Ordering::Relaxed) == stamp);
            if let Some((key, slot)) = removed {
                self.size.fetch_sub(1, Ordering::Relaxed);
                (self.on_evict)(key, &slot.value);
                evicted += 1;
            }
        }
        debug!(
            before,
            evicted,
            after = self.size.load(Ordering::Relaxed),
            "lru.sweep"
        );
    }
}

struct Worker {
    tx: Sender<SweepMessage>,
    handle: Option<thread::JoinHandle<()>>,
}

/// Fixed-capacity concurrent map with background LRU demotion.
pub struct LruEngine<K: Eq + Hash, V> {
    inner: Arc<Inner<K, V>>,
    worker: Mutex<Option<Worker>>,
}

impl<K, V> LruEngine<K, V>
where
    K: Eq + Hash + Copy + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates an engine that sweeps down to `capacity` and reports every
    /// eviction through `on_evict` (called from the sweep thread).
    pub fn new(capacity: usize, on_evict: EvictionCallback<K, V>) -> Self {
        let inner = Arc::new(Inner {
            map: DashMap::new(),
            size: AtomicUsize::new(0),
            clock: AtomicU64::new(0),
            alive: AtomicBool::new(true),
            sweep_pending: AtomicBool::new(false),
            marks: Watermarks::for_capacity(capacity),
            on_evict,
        });
        let (tx, rx) = mpsc::channel();
        let worker_inner = Arc::clone(&inner);
        let handle = thread::spawn(move || Self::sweep_loop(worker_inner, rx));
        Self {
            inner,
            worker: Mutex::new(Some(Worker {
                tx,
                handle: Some(handle),
            })),
        }
    }

    fn sweep_loop(inner: Arc<Inner<K, V>>, rx: Receiver<SweepMessage>) {
        loop {
            match rx.recv() {
                Ok(SweepMessage::Sweep(ack)) => {
                    inner.sweep_pending.store(false, Ordering::Relaxed);
                    inner.sweep();
                    if let Some(ack) = ack {
                        let _ = ack.send(());
                    }
                }
                Ok(SweepMessage::Shutdown) | Err(_) => break,
            }
        }
    }

    /// Looks up a value, refreshing its recency stamp while the engine is
    /// alive.
    pub fn get(&self, key: &K) -> Option<V> {
        let slot = self.inner.map.get(key)?;
        if self.inner.alive.load(Ordering::Relaxed) {
            slot.stamp.store(self.inner.tick(), Ordering::Relaxed);
        }
        Some(slot.value.clone())
    }

    /// Inserts or overwrites a value.
    pub fn put(&self, key: K, value: V) {
        let slot = Slot {
            value,
            stamp: AtomicU64::new(self.inner.tick()),
        };
        if self.inner.map.insert(key, slot).is_none() {
            self.inner.size.fetch_add(1, Ordering::Relaxed);
        }
        self.maybe_sweep();
    }

    /// Inserts unless the key is present; returns the existing value when
    /// another caller won the race, so all callers converge on one
    /// instance.
    pub fn put_if_absent(&self, key: K, value: V) -> Option<V> {
        let existing = match self.inner.map.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                let slot = entry.get();
                if self.inner.alive.load(Ordering::Relaxed) {
                    slot.stamp.store(self.inner.tick(), Ordering::Relaxed);
                }
                Some(slot.value.clone())
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Slot {
                    value,
                    stamp: AtomicU64::new(self.inner.tick()),
                });
                self.inner.size.fetch_add(1, Ordering::Relaxed);
                None
            }
        };
        if existing.is_none() {
            self.maybe_sweep();
        }
        existing
    }

    /// Whether the key is present. Does not refresh recency.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.map.contains_key(key)
    }

    /// Approximate number of entries.
    pub fn len(&self) -> usize {
        self.inner.size.load(Ordering::Relaxed)
    }

    /// Whether the engine currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The watermark set this engine sweeps against.
    pub fn watermarks(&self) -> Watermarks {
        self.inner.marks
    }

    /// Enables or disables recency tracking. While disabled the engine
    /// behaves as a plain bounded map with arbitrary eviction order,
    /// which is all a bulk-load phase needs.
    pub fn set_alive(&self, alive: bool) {
        self.inner.alive.store(alive, Ordering::Relaxed);
    }

    /// Runs a full sweep pass on the worker thread and waits for it.
    /// Falls back to sweeping inline once the engine is destroyed.
    pub fn force_sweep(&self) {
        let sent = {
            let guard = self.worker.lock();
            match &*guard {
                Some(worker) => {
                    let (ack_tx, ack_rx) = mpsc::channel();
                    if worker.tx.send(SweepMessage::Sweep(Some(ack_tx))).is_ok() {
                        Some(ack_rx)
                    } else {
                        None
                    }
                }
                None => None,
            }
        };
        match sent {
            Some(ack_rx) => {
                let _ = ack_rx.recv();
            }
            None => self.inner.sweep(),
        }
    }

    /// Stops the sweep worker and releases every entry. Idempotent; the
    /// engine must not be used afterwards.
    pub fn destroy(&self) {
        let worker = self.worker.lock().take();
        if let Some(mut worker) = worker {
            let _ = worker.tx.send(SweepMessage::Shutdown);
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
        self.inner.map.clear();
        self.inner.size.store(0, Ordering::Relaxed);
        trace!("lru.destroyed");
    }

    /// Crossing the low mark schedules a background sweep; crossing the
    /// high mark means the worker has fallen behind, so the inserting
    /// thread blocks on a full pass (eviction callbacks still run on the
    /// worker thread) rather than letting the map grow unbounded.
    fn maybe_sweep(&self) {
        let size = self.inner.size.load(Ordering::Relaxed);
        if size > self.inner.marks.high {
            self.force_sweep();
        } else if size > self.inner.marks.low
            && !self.inner.sweep_pending.swap(true, Ordering::Relaxed)
        {
            let guard = self.worker.lock();
            if let Some(worker) = &*guard {
                let _ = worker.tx.send(SweepMessage::Sweep(None));
            }
        }
    }
}

impl<K: Eq + Hash, V> Drop for LruEngine<K, V> {
    fn drop(&mut self) {
        let worker = self.worker.lock().take();
        if let Some(mut worker) = worker {
            let _ = worker.tx.send(SweepMessage::Shutdown);
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}
