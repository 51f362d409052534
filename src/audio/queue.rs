use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use tokio::{sync::Notify, time::Instant};
use tracing::{debug, info};

use crate::audio::track::Track;

/// Why [`SessionQueue::take_next`] returned without a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueWait {
    /// Nothing arrived before the deadline.
    TimedOut,
    /// The owning session was torn down.
    Closed,
}

/// Pending tracks for one guild.
///
/// FIFO unless shuffled. Mutation is limited to appending, shuffling and
/// draining through [`take_next`](Self::take_next), which has a single
/// consumer per guild (the session's advance step).
#[derive(Debug)]
pub struct SessionQueue {
    items: Mutex<VecDeque<Track>>,
    available: Notify,
    closed: AtomicBool,
    max_size: usize,
}

impl SessionQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            closed: AtomicBool::new(false),
            max_size,
        }
    }

    /// Appends tracks in order until the queue is full. Returns how many were added.
    pub fn extend(&self, tracks: impl IntoIterator<Item = Track>) -> usize {
        let added = {
            let mut items = self.items.lock();
            let room = self.max_size.saturating_sub(items.len());
            let before = items.len();
            items.extend(tracks.into_iter().take(room));
            items.len() - before
        };

        if added > 0 {
            debug!("➕ {} track(s) queued", added);
            self.available.notify_one();
        }
        added
    }

    /// Waits up to `timeout` for the next track.
    pub async fn take_next(&self, timeout: Duration) -> Result<Track, QueueWait> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Registrar antes de mirar la cola para no perder un aviso
            notified.as_mut().enable();

            if self.closed.load(Ordering::Acquire) {
                return Err(QueueWait::Closed);
            }
            if let Some(track) = self.items.lock().pop_front() {
                return Ok(track);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(QueueWait::TimedOut);
            }
        }
    }

    /// Shuffles the pending tracks in place.
    pub fn shuffle(&self) {
        let mut items = self.items.lock();
        items.make_contiguous().shuffle(&mut rand::thread_rng());
        info!("🔀 Queue shuffled ({} tracks)", items.len());
    }

    /// Wakes any waiter and makes every later wait return [`QueueWait::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.items.lock().clear();
        self.available.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Read-only copy of the pending tracks, front first.
    pub fn snapshot(&self) -> Vec<Track> {
        self.items.lock().iter().cloned().collect()
    }
}
