use crate::sync::{Condvar, Mutex};
use derive_more::Debug;
use std::collections::VecDeque;

/// Unbounded multi-producer multi-consumer FIFO whose consumers park until
/// an item arrives or the queue is killed.
#[derive(Debug)]
pub(crate) struct BlockingQueue<T> {
    #[debug(skip)]
    state: Mutex<QueueState<T>>,
    #[debug(skip)]
    cond: Condvar,
}

struct QueueState<T> {
    items: VecDeque<T>,
    killed: bool,
}

impl<T> BlockingQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                killed: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn push(&self, item: T) {
        let mut state = self.state.lock().expect("BlockingQueue::push: [1]");
        debug_assert!(!state.killed, "BlockingQueue::push: [2]");
        state.items.push_back(item);
        drop(state);
        self.cond.notify_one();
    }

    /// Block until an item is available. Returns `None` once the queue has
    /// been killed and every remaining item was handed out.
    pub(crate) fn pop(&self) -> Option<T> {
        let mut state = self.state.lock().expect("BlockingQueue::pop: [1]");
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.killed {
                return None;
            }
            state = self.cond.wait(state).expect("BlockingQueue::pop: [2]");
        }
    }

    /// Wake every consumer; they drain what is left and then stop.
    pub(crate) fn kill(&self) {
        self.state.lock().expect("BlockingQueue::kill: [1]").killed = true;
        self.cond.notify_all();
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn fifo_order() {
        let queue = BlockingQueue::new();
        for i in 0..4 {
            queue.push(i);
        }
        queue.kill();
        let drained: Vec<_> = core::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(drained, [0, 1, 2, 3]);
    }

    #[test]
    fn kill_releases_parked_consumers() {
        let queue = Arc::new(BlockingQueue::<u32>::new());
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.pop())
            })
            .collect();
        queue.push(7);
        queue.kill();
        let mut popped: Vec<_> = consumers
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();
        popped.sort_unstable();
        assert_eq!(popped, [None, None, Some(7)]);
    }
}
