//! Hand-off of "thumbnail ready" notifications to display threads
//!
//! Loader threads never touch view state. They post a [`ThumbnailEvent`]
//! into a channel owned by each subscribed view; the view drains it on its
//! own thread and repaints.
use std::sync::mpsc::{self, Receiver, Sender};

use parking_lot::Mutex;

use super::key::CacheKey;

/// How a load request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// A bitmap is now in the store
    Ready,
    /// No usable artwork; the key is in the negative cache
    NoArtwork,
}

/// Posted once per finished load request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailEvent {
    pub key: CacheKey,
    pub status: LoadStatus,
}

/// Receives completion notifications from loader threads.
///
/// Called without any cache lock held. Implementations must only post or
/// queue; they must not call into display-thread state directly.
pub trait CompletionSink: Send + Sync {
    fn notify(&self, event: ThumbnailEvent);
}

type Waker = Box<dyn Fn() + Send + Sync>;

/// Fans notifications out to every subscribed view.
///
/// Views come and go (a grid may be torn down and rebuilt on layout
/// changes) while the cache lives on, so subscribers whose receiver was
/// dropped are pruned on the next notification.
#[derive(Default)]
pub struct CompletionHub {
    subscribers: Mutex<Vec<Sender<ThumbnailEvent>>>,
    waker: Mutex<Option<Waker>>,
}

impl CompletionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// New receiver that sees every event posted from now on
    pub fn subscribe(&self) -> Receiver<ThumbnailEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Install a callback run after each post, e.g. to wake an idle UI loop
    pub fn set_waker<F>(&self, waker: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.waker.lock() = Some(Box::new(waker));
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl CompletionSink for CompletionHub {
    fn notify(&self, event: ThumbnailEvent) {
        self.subscribers.lock().retain(|tx| tx.send(event.clone()).is_ok());

        if let Some(wake) = self.waker.lock().as_ref() {
            wake();
        }
    }
}
