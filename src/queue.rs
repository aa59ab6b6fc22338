//! Bounded inter-task queues (spec.md §4.F, §5). Two distinct overflow
//! policies share one `Mutex`/`Condvar` core, the same primitives the
//! teacher crate uses for its closing/shutdown coordination:
//!
//! - [`DropOldestQueue`]: a producer that outruns its consumer drops the
//!   oldest buffered item rather than blocking (the capture task feeding
//!   raw frames into the processing task).
//! - [`BlockingQueue`]: a producer blocks until space frees up (the
//!   processing task handing finished [`crate::lpx_image::LPXImage`]s to the
//!   network broadcast task) so no frame is silently discarded before a
//!   client has had a chance to see it.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A bounded queue that drops its oldest item when a push would exceed
/// capacity. Never blocks a producer.
pub struct DropOldestQueue<T> {
    capacity: usize,
    state: Mutex<Inner<T>>,
    not_empty: Condvar,
}

impl<T> DropOldestQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            capacity,
            state: Mutex::new(Inner { items: VecDeque::with_capacity(capacity), closed: false }),
            not_empty: Condvar::new(),
        }
    }

    /// Pushes `item`, dropping the oldest buffered item if already full.
    /// Returns `true` if an item was dropped to make room.
    pub fn push(&self, item: T) -> bool {
        let mut state = self.state.lock().expect("queue poisoned");
        let dropped = if state.items.len() >= self.capacity {
            state.items.pop_front();
            true
        } else {
            false
        };
        state.items.push_back(item);
        self.not_empty.notify_one();
        dropped
    }

    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock().expect("queue poisoned");
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self.not_empty.wait(state).expect("queue poisoned");
        }
    }

    pub fn close(&self) {
        let mut state = self.state.lock().expect("queue poisoned");
        state.closed = true;
        self.not_empty.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("queue poisoned").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A bounded queue whose producer blocks (with a timeout, so it can still
/// observe shutdown) while full.
pub struct BlockingQueue<T> {
    capacity: usize,
    state: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BlockingQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            capacity,
            state: Mutex::new(Inner { items: VecDeque::with_capacity(capacity), closed: false }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Blocks until there is room or the queue closes, in which case the
    /// item is not enqueued and `false` is returned.
    pub fn push(&self, item: T) -> bool {
        let mut state = self.state.lock().expect("queue poisoned");
        loop {
            if state.closed {
                return false;
            }
            if state.items.len() < self.capacity {
                state.items.push_back(item);
                self.not_empty.notify_one();
                return true;
            }
            let (guard, _timeout) = self
                .not_full
                .wait_timeout(state, Duration::from_millis(100))
                .expect("queue poisoned");
            state = guard;
        }
    }

    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock().expect("queue poisoned");
        loop {
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self.not_empty.wait(state).expect("queue poisoned");
        }
    }

    pub fn close(&self) {
        let mut state = self.state.lock().expect("queue poisoned");
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("queue poisoned").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn drop_oldest_evicts_when_full() {
        let q = DropOldestQueue::new(2);
        assert!(!q.push(1));
        assert!(!q.push(2));
        assert!(q.push(3));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
    }

    #[test]
    fn drop_oldest_pop_returns_none_after_close() {
        let q = DropOldestQueue::<i32>::new(1);
        q.close();
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn blocking_queue_wakes_a_blocked_pop() {
        let q = Arc::new(BlockingQueue::new(4));
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.pop());
        thread::sleep(Duration::from_millis(20));
        q.push(42);
        assert_eq!(handle.join().unwrap(), Some(42));
    }

    #[test]
    fn blocking_queue_push_fails_after_close() {
        let q = BlockingQueue::new(1);
        q.push(1).then_some(()).unwrap();
        q.close();
        assert!(!q.push(2));
    }
}
