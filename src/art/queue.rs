//! Pending thumbnail work
//!
//! Two FIFO lanes (visible before prefetch) plus a map of every key that is
//! queued or being decoded, which is what coalesces duplicate requests.
use std::collections::{HashMap, VecDeque};

use parking_lot::{Condvar, Mutex};

use super::key::CacheKey;
use super::resolver::ArtSource;

/// Default bound on queued (not yet loading) requests
pub const DEFAULT_QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    /// Speculative: just outside the visible range, may be dropped
    Prefetch,
    /// On screen now, never dropped
    Visible,
}

/// One unit of work for the loader threads
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub key: CacheKey,
    pub source: ArtSource,
    pub target_size: u32,
    pub priority: Priority,
}

/// What happened to a `request` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// New work was queued
    Queued,
    /// A queued prefetch for the key moved to the visible lane
    Promoted,
    /// The key is already queued or loading
    AlreadyPending,
    /// A thumbnail at a compatible size is already cached
    Cached,
    /// The key is known to have no artwork
    Blacklisted,
    /// Prefetch work shed because the queue is full, or the queue is closed
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Queued(Priority),
    Loading,
}

struct QueueInner {
    visible: VecDeque<LoadRequest>,
    prefetch: VecDeque<LoadRequest>,
    pending: HashMap<CacheKey, Pending>,
    max_depth: usize,
    dropped: u64,
    closed: bool,
}

impl QueueInner {
    fn queued_len(&self) -> usize {
        self.visible.len() + self.prefetch.len()
    }

    /// Shed the oldest prefetch requests while over depth.
    /// Returns `true` if `key` itself was shed.
    fn shed(&mut self, key: &CacheKey) -> bool {
        let mut shed_key = false;
        while self.queued_len() > self.max_depth {
            let Some(dropped) = self.prefetch.pop_front() else {
                // Only visible work left; it is allowed to exceed the depth
                break;
            };
            self.pending.remove(&dropped.key);
            self.dropped += 1;
            shed_key |= &dropped.key == key;
            log::debug!("Queue full, dropped prefetch for {}", dropped.key);
        }
        shed_key
    }
}

/// De-duplicating, prioritised work queue shared by the UI thread and the
/// loader threads.
pub struct LoadQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
}

impl LoadQueue {
    pub fn new(max_depth: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                visible: VecDeque::new(),
                prefetch: VecDeque::new(),
                pending: HashMap::new(),
                max_depth: max_depth.max(1),
                dropped: 0,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Queue `request` unless its key is already queued or loading.
    ///
    /// `settled` runs under the queue lock once the key is known not to be
    /// pending; returning `Some` (cached, blacklisted, ...) skips the enqueue.
    /// Checking there closes the window between a worker publishing a result
    /// and clearing its pending mark.
    pub fn request<F>(&self, request: LoadRequest, settled: F) -> RequestOutcome
    where
        F: FnOnce(&LoadRequest) -> Option<RequestOutcome>,
    {
        let mut inner = self.inner.lock();
        if inner.closed {
            return RequestOutcome::Dropped;
        }

        match inner.pending.get(&request.key).copied() {
            Some(Pending::Loading) | Some(Pending::Queued(Priority::Visible)) => {
                return RequestOutcome::AlreadyPending;
            }
            Some(Pending::Queued(Priority::Prefetch)) => {
                if request.priority == Priority::Prefetch {
                    return RequestOutcome::AlreadyPending;
                }
                inner.prefetch.retain(|r| r.key != request.key);
                inner.pending.insert(request.key.clone(), Pending::Queued(Priority::Visible));
                log::debug!("Promoted {} to visible", request.key);
                inner.visible.push_back(request);
                drop(inner);
                self.available.notify_one();
                return RequestOutcome::Promoted;
            }
            None => {}
        }

        if let Some(outcome) = settled(&request) {
            return outcome;
        }

        let key = request.key.clone();
        inner.pending.insert(key.clone(), Pending::Queued(request.priority));
        match request.priority {
            Priority::Visible => inner.visible.push_back(request),
            Priority::Prefetch => inner.prefetch.push_back(request),
        }

        let outcome = if inner.shed(&key) {
            RequestOutcome::Dropped
        } else {
            RequestOutcome::Queued
        };
        drop(inner);

        if outcome == RequestOutcome::Queued {
            self.available.notify_one();
        }
        outcome
    }

    /// Block until work is available and mark it as loading.
    /// Returns `None` once the queue has been closed.
    pub fn pop_blocking(&self) -> Option<LoadRequest> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return None;
            }
            let next = inner.visible.pop_front().or_else(|| inner.prefetch.pop_front());
            if let Some(request) = next {
                inner.pending.insert(request.key.clone(), Pending::Loading);
                return Some(request);
            }
            self.available.wait(&mut inner);
        }
    }

    /// Non-blocking variant of [`LoadQueue::pop_blocking`]
    #[cfg(test)]
    fn try_pop(&self) -> Option<LoadRequest> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return None;
        }
        let request = inner.visible.pop_front().or_else(|| inner.prefetch.pop_front())?;
        inner.pending.insert(request.key.clone(), Pending::Loading);
        Some(request)
    }

    /// Clear the pending mark for a key whose result has been published
    pub fn complete(&self, key: &CacheKey) {
        self.inner.lock().pending.remove(key);
    }

    /// True while `key` is queued or loading
    pub fn is_pending(&self, key: &CacheKey) -> bool {
        self.inner.lock().pending.contains_key(key)
    }

    /// Drop everything still waiting in the lanes; loading work is unaffected
    pub fn clear_queued(&self) {
        let mut inner = self.inner.lock();
        let QueueInner {
            visible,
            prefetch,
            pending,
            ..
        } = &mut *inner;
        for request in visible.drain(..).chain(prefetch.drain(..)) {
            pending.remove(&request.key);
        }
    }

    /// Number of requests waiting (not yet loading)
    pub fn len(&self) -> usize {
        self.inner.lock().queued_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys queued or loading
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Total prefetch requests shed since creation
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }

    /// Wake every waiting loader and make them exit
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.available.notify_all();
    }
}

impl Default for LoadQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH)
    }
}
