use crate::types::ThreadHandle;
use std::collections::VecDeque;

pub trait Scheduler: Send {
    /// Select next thread to run
    fn schedule(&mut self) -> Option<ThreadHandle>;

    /// Thread that `schedule` would return, without removing it
    fn peek(&self) -> Option<ThreadHandle>;

    /// Add thread to ready queue
    fn enqueue(&mut self, thread: ThreadHandle);

    /// Remove thread from ready queue (e.g. if it exited)
    fn dequeue(&mut self, thread: ThreadHandle) -> bool;
}

pub struct RoundRobinScheduler {
    ready_queue: VecDeque<ThreadHandle>,
}

impl Default for RoundRobinScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundRobinScheduler {
    pub fn new() -> Self {
        Self {
            ready_queue: VecDeque::new(),
        }
    }
}

impl Scheduler for RoundRobinScheduler {
    fn schedule(&mut self) -> Option<ThreadHandle> {
        self.ready_queue.pop_front()
    }

    fn peek(&self) -> Option<ThreadHandle> {
        self.ready_queue.front().copied()
    }

    fn enqueue(&mut self, thread: ThreadHandle) {
        self.ready_queue.push_back(thread);
    }

    fn dequeue(&mut self, thread: ThreadHandle) -> bool {
        if let Some(pos) = self.ready_queue.iter().position(|&h| h == thread) {
            self.ready_queue.remove(pos);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: u32) -> ThreadHandle {
        ThreadHandle::new(id).unwrap()
    }

    #[test]
    fn round_robin_is_fifo() {
        let mut sched = RoundRobinScheduler::new();
        sched.enqueue(handle(1));
        sched.enqueue(handle(2));
        sched.enqueue(handle(3));

        assert_eq!(sched.peek(), Some(handle(1)));
        assert!(sched.dequeue(handle(2)));
        assert!(!sched.dequeue(handle(2)));
        assert_eq!(sched.schedule(), Some(handle(1)));
        assert_eq!(sched.schedule(), Some(handle(3)));
        assert_eq!(sched.schedule(), None);
    }
}
