//! A deduplicating, rate-limited work queue of resource keys.
//!
//! A key is held at most once while it waits to be processed, and a key is
//! never handed to more than one worker at a time: if a key is added while a
//! worker holds it, it is queued again once that worker calls
//! [`Queue::done`].

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use parking_lot::Mutex;
use std::{collections::VecDeque, hash::Hash, sync::Arc};
use tokio::{sync::Notify, time};

/// Per-key exponential backoff: `base * 2^failures`, capped at `max`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    base: time::Duration,
    max: time::Duration,
}

#[derive(Debug)]
pub struct Queue<K> {
    inner: Arc<Inner<K>>,
}

#[derive(Debug)]
struct Inner<K> {
    state: Mutex<State<K>>,
    notify: Notify,
    backoff: Backoff,
}

#[derive(Debug)]
struct State<K> {
    /// Keys ready to be handed out, in order.
    queue: VecDeque<K>,

    /// Keys that need processing, whether queued or waiting on an in-flight
    /// worker to finish.
    dirty: HashSet<K>,

    /// Keys currently held by a worker.
    processing: HashSet<K>,

    /// Rate-limited requeues per key since it was last forgotten.
    failures: HashMap<K, u32>,

    shutting_down: bool,
}

// === impl Backoff ===

impl Backoff {
    pub fn new(base: time::Duration, max: time::Duration) -> Self {
        Self { base, max }
    }

    pub fn delay(&self, failures: u32) -> time::Duration {
        self.base
            .saturating_mul(2u32.saturating_pow(failures))
            .min(self.max)
    }
}

impl Default for Backoff {
    /// 5ms, 10ms, 20ms, ... up to 1000s.
    fn default() -> Self {
        Self::new(
            time::Duration::from_millis(5),
            time::Duration::from_secs(1000),
        )
    }
}

// === impl Queue ===

impl<K> Clone for Queue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K> Queue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    pub fn new(backoff: Backoff) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    failures: HashMap::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
                backoff,
            }),
        }
    }

    /// Marks a key as needing processing. Keys that are already pending are
    /// ignored, as are all keys once the queue is shutting down.
    pub fn add(&self, key: K) {
        let mut state = self.inner.state.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            // Requeued by `done`.
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Waits for the next key to process.
    ///
    /// Returns `None` once the queue is shutting down. Every key returned must
    /// be passed to [`Queue::done`] when its processing completes.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking the state so that a concurrent `add`
            // or `shut_down` can't be missed.
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Marks a key's processing as complete, requeueing it if it was added
    /// in the meantime.
    pub fn done(&self, key: &K) {
        let mut state = self.inner.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Adds a key after a delay that grows with each rate-limited requeue of
    /// that key.
    pub fn add_rate_limited(&self, key: K) {
        let delay = {
            let mut state = self.inner.state.lock();
            let failures = state.failures.entry(key.clone()).or_default();
            let delay = self.inner.backoff.delay(*failures);
            *failures += 1;
            delay
        };
        self.add_after(key, delay);
    }

    pub fn add_after(&self, key: K, delay: time::Duration) {
        if delay.is_zero() {
            return self.add(key);
        }
        let queue = self.clone();
        tokio::spawn(async move {
            time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Clears a key's retry history.
    pub fn forget(&self, key: &K) {
        self.inner.state.lock().failures.remove(key);
    }

    /// The number of rate-limited requeues of a key since it was last
    /// forgotten.
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.inner
            .state
            .lock()
            .failures
            .get(key)
            .copied()
            .unwrap_or_default()
    }

    /// The number of keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops accepting keys and releases every pending [`Queue::get`].
    pub fn shut_down(&self) {
        self.inner.state.lock().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    fn mk_queue() -> Queue<String> {
        Queue::new(Backoff::default())
    }

    #[tokio::test]
    async fn deduplicates_pending_keys() {
        let queue = mk_queue();
        queue.add("ns-0/a".to_string());
        queue.add("ns-0/b".to_string());
        queue.add("ns-0/a".to_string());
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.get().await.as_deref(), Some("ns-0/a"));
        assert_eq!(queue.get().await.as_deref(), Some("ns-0/b"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn key_added_while_processing_is_requeued_on_done() {
        let queue = mk_queue();
        let key = "ns-0/a".to_string();
        queue.add(key.clone());
        assert_eq!(queue.get().await, Some(key.clone()));

        // The key must not be handed out again while it's in flight.
        queue.add(key.clone());
        queue.add(key.clone());
        assert!(queue.is_empty());
        assert!(timeout(Duration::from_millis(10), queue.get())
            .await
            .is_err());

        queue.done(&key);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await, Some(key.clone()));
        queue.done(&key);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn get_waits_for_add() {
        let queue = mk_queue();
        let getter = tokio::spawn({
            let queue = queue.clone();
            async move { queue.get().await }
        });
        tokio::task::yield_now().await;
        queue.add("ns-0/a".to_string());
        let key = timeout(Duration::from_secs(1), getter)
            .await
            .expect("get must complete")
            .unwrap();
        assert_eq!(key.as_deref(), Some("ns-0/a"));
    }

    #[tokio::test]
    async fn shut_down_releases_getters() {
        let queue = mk_queue();
        let getters = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.get().await })
            })
            .collect::<Vec<_>>();
        tokio::task::yield_now().await;

        queue.shut_down();
        for getter in getters {
            let key = timeout(Duration::from_secs(1), getter)
                .await
                .expect("get must complete")
                .unwrap();
            assert_eq!(key, None);
        }

        queue.add("ns-0/a".to_string());
        assert!(queue.is_empty());
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_adds_back_off() {
        let queue = mk_queue();
        let key = "ns-0/a".to_string();

        queue.add_rate_limited(key.clone());
        assert_eq!(queue.num_requeues(&key), 1);
        tokio::task::yield_now().await;
        assert!(queue.is_empty(), "the first retry waits 5ms");
        assert_eq!(
            timeout(Duration::from_millis(10), queue.get()).await,
            Ok(Some(key.clone()))
        );
        queue.done(&key);

        queue.add_rate_limited(key.clone());
        assert_eq!(queue.num_requeues(&key), 2);
        tokio::task::yield_now().await;
        time::advance(Duration::from_millis(9)).await;
        assert!(queue.is_empty(), "the second retry waits 10ms");
        time::advance(Duration::from_millis(1)).await;
        assert_eq!(queue.get().await, Some(key.clone()));
        queue.done(&key);

        queue.forget(&key);
        assert_eq!(queue.num_requeues(&key), 0);
    }

    #[test]
    fn backoff_doubles_up_to_max() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(0), Duration::from_millis(5));
        assert_eq!(backoff.delay(1), Duration::from_millis(10));
        assert_eq!(backoff.delay(14), Duration::from_millis(81_920));
        assert_eq!(backoff.delay(40), Duration::from_secs(1000));
    }
}
