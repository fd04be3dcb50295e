use super::intr_cell::IntrCell;
use crate::error::KernelError;
use crate::memory::{HeapBlock, KString};
use crate::thread::wchan::WaitChannel;
use crate::thread::{SplGuard, ThreadContext};
use crate::types::WaitChannelId;
use core::fmt;
use core::mem;
use log::debug;
use std::sync::Arc;

/// Counting semaphore.
pub struct Semaphore {
    name: KString,
    count: IntrCell<usize>,
    wchan: WaitChannel,
    _storage: HeapBlock,
}

impl Semaphore {
    pub fn create(
        cx: &ThreadContext,
        name: &str,
        initial_count: usize,
    ) -> Result<Arc<Self>, KernelError> {
        let storage = cx.heap().kmalloc(mem::size_of::<Self>())?;
        let name = cx.heap().kstrdup(name)?;
        let sem = Self {
            name,
            count: IntrCell::new(cx.processor(), initial_count),
            wchan: WaitChannel::new(cx.processor()),
            _storage: storage,
        };
        debug!("semaphore {} created with count {}", sem, initial_count);
        Ok(Arc::new(sem))
    }

    /// Drop the creator's reference. No thread may be asleep on the
    /// semaphore.
    pub fn destroy(self: Arc<Self>, cx: &ThreadContext) {
        {
            let spl = self.raise(cx);
            assert!(
                !self.wchan.has_sleepers(&spl),
                "semaphore {}: destroyed while threads sleep on it",
                self
            );
        }
        debug!("semaphore {} destroyed", self);
    }

    /// Take one unit, sleeping until one is available.
    pub fn p(&self, cx: &ThreadContext) {
        // Checked even when the P would not block.
        assert!(
            !cx.in_interrupt(),
            "semaphore {}: P from an interrupt handler",
            self
        );

        let mut spl = self.raise(cx);
        while self.count.get(&spl) == 0 {
            self.wchan.sleep(&mut spl);
        }
        let mut count = self.count.borrow_mut(&spl);
        assert!(*count > 0);
        *count -= 1;
    }

    /// Return one unit and wake everyone waiting for it.
    pub fn v(&self, cx: &ThreadContext) {
        let spl = self.raise(cx);
        {
            let mut count = self.count.borrow_mut(&spl);
            *count = match count.checked_add(1) {
                Some(next) => next,
                None => panic!("semaphore {}: count overflow", self),
            };
        }
        self.wchan.wakeup(&spl);
    }

    pub fn count(&self, cx: &ThreadContext) -> usize {
        let spl = self.raise(cx);
        self.count.get(&spl)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> WaitChannelId {
        self.wchan.id()
    }

    /// Raise the level, checking that `cx` runs on this semaphore's processor.
    fn raise<'a>(&self, cx: &'a ThreadContext) -> SplGuard<'a> {
        let spl = cx.splhigh();
        spl.assert_on(self.wchan.processor(), self);
        spl
    }
}

impl fmt::Display for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.name, self.wchan.id())
    }
}
