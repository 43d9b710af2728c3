//! Shared buffers and atomic coordination primitives.
//!
//! The one genuinely concurrent surface of the runtime: independent
//! agents hold `Arc` clones of the registry and coordinate through
//! word-indexed atomics with SeqCst ordering. Unresolved ids and
//! out-of-range indices are non-fatal: the operation logs and answers
//! a neutral sentinel. `wait` is the only blocking operation and
//! always honors a caller-supplied timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering::SeqCst};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

/// Outcome of an atomic `wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// Woken by a notify.
    Ok,
    /// The word did not hold the expected value (also the sentinel for
    /// an unresolved id or index).
    NotEqual,
    TimedOut,
}

/// Registry of independently addressable shared buffers.
///
/// Ids are monotonically increasing from 1 and never reused within one
/// registry instance, even after destruction. Share the registry
/// itself via `Arc`.
pub struct SharedBufferRegistry {
    next_id: AtomicU32,
    buffers: RwLock<HashMap<u32, Arc<SharedBuffer>>>,
}

struct SharedBuffer {
    words: Box<[AtomicU32]>,
    /// Futex-style wait queues, one per word index, created on first
    /// wait.
    queues: Mutex<HashMap<u32, Arc<WordQueue>>>,
}

struct WordQueue {
    state: Mutex<WaitState>,
    cv: Condvar,
}

#[derive(Default)]
struct WaitState {
    waiters: u32,
    /// Wake tickets granted by `notify` but not yet consumed.
    pending_wakes: u32,
}

impl SharedBuffer {
    fn queue(&self, index: u32) -> Arc<WordQueue> {
        let mut queues = self.queues.lock();
        queues
            .entry(index)
            .or_insert_with(|| {
                Arc::new(WordQueue {
                    state: Mutex::new(WaitState::default()),
                    cv: Condvar::new(),
                })
            })
            .clone()
    }
}

impl Default for SharedBufferRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedBufferRegistry {
    pub fn new() -> Self {
        SharedBufferRegistry {
            next_id: AtomicU32::new(1),
            buffers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a buffer of `size` bytes (rounded up to whole 32-bit
    /// words). Returns its id, or 0 for an empty size.
    pub fn create(&self, size: u32) -> u32 {
        if size == 0 {
            log::warn!("refusing to create an empty shared buffer");
            return 0;
        }
        let words = size.div_ceil(4);
        let storage: Box<[AtomicU32]> =
            (0..words).map(|_| AtomicU32::new(0)).collect();
        let id = self.next_id.fetch_add(1, SeqCst);
        self.buffers.write().insert(
            id,
            Arc::new(SharedBuffer {
                words: storage,
                queues: Mutex::new(HashMap::new()),
            }),
        );
        id
    }

    /// Unregister a buffer. Agents already blocked in `wait` keep
    /// their own reference and run out their timeouts.
    pub fn destroy(&self, id: u32) -> bool {
        self.buffers.write().remove(&id).is_some()
    }

    fn resolve(&self, id: u32, index: u32) -> Option<(Arc<SharedBuffer>, u32)> {
        let buffer = match self.buffers.read().get(&id) {
            Some(buffer) => buffer.clone(),
            None => {
                log::warn!("shared buffer {id} is not registered");
                return None;
            }
        };
        if index as usize >= buffer.words.len() {
            log::warn!(
                "word index {index} is out of range for shared buffer {id} \
                 ({} words)",
                buffer.words.len()
            );
            return None;
        }
        Some((buffer, index))
    }

    /// Atomic load; 0 on an unresolved id/index.
    pub fn load(&self, id: u32, index: u32) -> u32 {
        match self.resolve(id, index) {
            Some((buffer, index)) => buffer.words[index as usize].load(SeqCst),
            None => 0,
        }
    }

    /// Atomic store; returns the stored value, 0 on error.
    pub fn store(&self, id: u32, index: u32, value: u32) -> u32 {
        match self.resolve(id, index) {
            Some((buffer, index)) => {
                buffer.words[index as usize].store(value, SeqCst);
                value
            }
            None => 0,
        }
    }

    /// Atomic add; returns the prior value.
    pub fn add(&self, id: u32, index: u32, value: u32) -> u32 {
        match self.resolve(id, index) {
            Some((buffer, index)) => buffer.words[index as usize].fetch_add(value, SeqCst),
            None => 0,
        }
    }

    /// Write `replacement` only when the word equals `expected`;
    /// always returns the prior value.
    pub fn compare_exchange(&self, id: u32, index: u32, expected: u32, replacement: u32) -> u32 {
        match self.resolve(id, index) {
            Some((buffer, index)) => {
                match buffer.words[index as usize]
                    .compare_exchange(expected, replacement, SeqCst, SeqCst)
                {
                    Ok(prior) | Err(prior) => prior,
                }
            }
            None => 0,
        }
    }

    /// Block until the word is notified away from `expected`, or until
    /// `timeout` elapses (`None` waits indefinitely).
    pub fn wait(
        &self,
        id: u32,
        index: u32,
        expected: u32,
        timeout: Option<Duration>,
    ) -> WaitResult {
        let Some((buffer, index)) = self.resolve(id, index) else {
            return WaitResult::NotEqual;
        };
        let queue = buffer.queue(index);
        let mut state = queue.state.lock();

        // The initial value check happens under the queue lock, so a
        // store-then-notify from another agent cannot slip between the
        // check and the sleep.
        if buffer.words[index as usize].load(SeqCst) != expected {
            return WaitResult::NotEqual;
        }

        state.waiters += 1;
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if state.pending_wakes > 0 {
                state.pending_wakes -= 1;
                state.waiters -= 1;
                return WaitResult::Ok;
            }
            match deadline {
                Some(deadline) => {
                    if queue.cv.wait_until(&mut state, deadline).timed_out() {
                        if state.pending_wakes > 0 {
                            state.pending_wakes -= 1;
                            state.waiters -= 1;
                            return WaitResult::Ok;
                        }
                        state.waiters -= 1;
                        return WaitResult::TimedOut;
                    }
                }
                None => queue.cv.wait(&mut state),
            }
        }
    }

    /// Wake up to `count` agents blocked on the word (`None` wakes
    /// all); returns the number actually woken. No ordering guarantee
    /// among the woken.
    pub fn notify(&self, id: u32, index: u32, count: Option<u32>) -> u32 {
        let Some((buffer, index)) = self.resolve(id, index) else {
            return 0;
        };
        let queue = {
            let queues = buffer.queues.lock();
            match queues.get(&index) {
                Some(queue) => queue.clone(),
                None => return 0,
            }
        };
        let mut state = queue.state.lock();
        let available = state.waiters - state.pending_wakes;
        let woken = count.unwrap_or(u32::MAX).min(available);
        state.pending_wakes += woken;
        drop(state);
        queue.cv.notify_all();
        woken
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn ids_start_at_one_and_are_never_reused() {
        let registry = SharedBufferRegistry::new();
        let a = registry.create(64);
        let b = registry.create(64);
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert!(registry.destroy(a));
        assert!(!registry.destroy(a), "double destroy reports false");
        let c = registry.create(64);
        assert_eq!(c, 3, "destroyed ids are not recycled");
    }

    #[test]
    fn unresolved_ids_and_indices_answer_sentinels() {
        let registry = SharedBufferRegistry::new();
        assert_eq!(registry.load(99, 0), 0);
        assert_eq!(registry.store(99, 0, 5), 0);
        let id = registry.create(8); // two words
        assert_eq!(registry.load(id, 2), 0);
        assert_eq!(registry.add(id, 2, 1), 0);
        assert_eq!(
            registry.wait(id, 2, 0, Some(Duration::from_millis(1))),
            WaitResult::NotEqual
        );
        assert_eq!(registry.notify(id, 2, None), 0);
    }

    #[test]
    fn create_rejects_empty_buffers() {
        let registry = SharedBufferRegistry::new();
        assert_eq!(registry.create(0), 0);
    }

    #[test]
    fn add_returns_the_prior_value() {
        let registry = SharedBufferRegistry::new();
        let id = registry.create(4);
        assert_eq!(registry.add(id, 0, 5), 0);
        assert_eq!(registry.add(id, 0, 3), 5);
        assert_eq!(registry.load(id, 0), 8);
    }

    #[test]
    fn compare_exchange_only_writes_on_match() {
        let registry = SharedBufferRegistry::new();
        let id = registry.create(4);
        registry.store(id, 0, 7);

        // Mismatch: unchanged, prior returned.
        assert_eq!(registry.compare_exchange(id, 0, 9, 1), 7);
        assert_eq!(registry.load(id, 0), 7);

        // Match: replaced, prior (pre-write) returned.
        assert_eq!(registry.compare_exchange(id, 0, 7, 1), 7);
        assert_eq!(registry.load(id, 0), 1);
    }

    #[test]
    fn wait_returns_not_equal_without_blocking() {
        let registry = SharedBufferRegistry::new();
        let id = registry.create(4);
        registry.store(id, 0, 3);
        assert_eq!(
            registry.wait(id, 0, 4, Some(Duration::from_secs(10))),
            WaitResult::NotEqual
        );
    }

    #[test]
    fn wait_times_out() {
        let registry = SharedBufferRegistry::new();
        let id = registry.create(4);
        let start = Instant::now();
        assert_eq!(
            registry.wait(id, 0, 0, Some(Duration::from_millis(50))),
            WaitResult::TimedOut
        );
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn notify_wakes_a_blocked_agent() {
        let registry = Arc::new(SharedBufferRegistry::new());
        let id = registry.create(4);

        let waiter = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.wait(id, 0, 0, Some(Duration::from_secs(30))))
        };

        // Keep notifying until the waiter is actually parked.
        let mut woken = 0;
        for _ in 0..1000 {
            registry.store(id, 0, 1);
            woken = registry.notify(id, 0, None);
            if woken == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(woken, 1);
        assert_eq!(waiter.join().expect("join"), WaitResult::Ok);
    }

    #[test]
    fn notify_honors_the_count_and_reports_woken() {
        let registry = Arc::new(SharedBufferRegistry::new());
        let id = registry.create(4);

        let spawn_waiter = |registry: &Arc<SharedBufferRegistry>| {
            let registry = Arc::clone(registry);
            thread::spawn(move || registry.wait(id, 0, 0, Some(Duration::from_secs(30))))
        };
        let first = spawn_waiter(&registry);
        let second = spawn_waiter(&registry);

        // Wait for both to park, then wake exactly one.
        let mut woken = 0;
        for _ in 0..1000 {
            woken = registry.notify(id, 0, Some(1));
            if woken == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(woken, 1);

        // Wake the rest.
        let mut remaining = 0;
        for _ in 0..1000 {
            remaining = registry.notify(id, 0, None);
            if remaining == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(remaining, 1);
        assert_eq!(first.join().expect("join"), WaitResult::Ok);
        assert_eq!(second.join().expect("join"), WaitResult::Ok);
    }
}
