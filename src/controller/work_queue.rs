//! Rate-limited, de-duplicating work queue
//!
//! Keys move through three sets: `queue` (waiting), `processing` (handed to
//! a worker) and `dirty` (needs processing). A key is in `queue` at most
//! once and is never handed to two workers at the same time; adding a key
//! that is being processed marks it dirty and it is queued again by `done`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

use crate::controller::error::BackoffConfig;

struct State<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    failures: HashMap<T, u32>,
    shutting_down: bool,
}

pub struct WorkQueue<T> {
    state: Mutex<State<T>>,
    /// Signalled when an item is queued or the queue shuts down
    available: Notify,
    /// Signalled when a processed item is marked done
    drained: Notify,
    backoff: BackoffConfig,
}

impl<T> Default for WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + 'static,
{
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + 'static,
{
    pub fn new(backoff: BackoffConfig) -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                failures: HashMap::new(),
                shutting_down: false,
            }),
            available: Notify::new(),
            drained: Notify::new(),
            backoff,
        }
    }

    /// Mark `item` as needing processing
    pub async fn add(&self, item: T) {
        let mut state = self.state.lock().await;
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.available.notify_one();
    }

    /// Add `item` once `delay` has elapsed
    pub fn add_after(self: &Arc<Self>, item: T, delay: Duration) {
        if delay.is_zero() {
            let queue = Arc::clone(self);
            tokio::spawn(async move { queue.add(item).await });
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item).await;
        });
    }

    /// Re-add `item` after its per-item exponential backoff
    pub async fn add_rate_limited(self: &Arc<Self>, item: T) {
        let delay = {
            let mut state = self.state.lock().await;
            let failures = state.failures.entry(item.clone()).or_insert(0);
            let delay = self.backoff.delay_for_attempt(*failures);
            *failures = failures.saturating_add(1);
            delay
        };
        self.add_after(item, delay);
    }

    /// Clear the backoff history of `item`
    pub async fn forget(&self, item: &T) {
        self.state.lock().await.failures.remove(item);
    }

    /// Number of times `item` has been requeued with backoff
    pub async fn num_requeues(&self, item: &T) -> u32 {
        self.state
            .lock()
            .await
            .failures
            .get(item)
            .copied()
            .unwrap_or(0)
    }

    /// Wait for the next item
    ///
    /// Returns `None` once the queue is shut down and no queued item is left.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    // Pass the wakeup on if more work is waiting
                    if !state.queue.is_empty() {
                        self.available.notify_one();
                    }
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Finish processing `item`
    pub async fn done(&self, item: &T) {
        let mut state = self.state.lock().await;
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            self.available.notify_one();
        }
        drop(state);
        self.drained.notify_waiters();
    }

    /// Number of queued items, not counting the ones being processed
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop accepting new items and wake all waiting workers
    pub async fn shut_down(&self) {
        self.state.lock().await.shutting_down = true;
        self.available.notify_waiters();
    }

    /// Shut down and wait until every item handed to a worker is done
    pub async fn shut_down_with_drain(&self) {
        self.shut_down().await;
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.state.lock().await.processing.is_empty() {
                return;
            }
            notified.await;
        }
    }

    pub async fn is_shutting_down(&self) -> bool {
        self.state.lock().await.shutting_down
    }
}
