use super::intr_cell::IntrCell;
use crate::error::KernelError;
use crate::memory::{HeapBlock, KString};
use crate::thread::wchan::WaitChannel;
use crate::thread::{SplGuard, ThreadContext};
use crate::types::{ThreadHandle, WaitChannelId};
use core::fmt;
use core::mem;
use log::debug;
use std::sync::Arc;

/// Sleeping mutual-exclusion lock with a single, tracked owner.
///
/// Not reentrant: acquiring a lock the caller already holds, or releasing
/// one it does not hold, is fatal.
pub struct Lock {
    name: KString,
    holder: IntrCell<Option<ThreadHandle>>,
    wchan: WaitChannel,
    _storage: HeapBlock,
}

impl Lock {
    pub fn create(cx: &ThreadContext, name: &str) -> Result<Arc<Self>, KernelError> {
        let storage = cx.heap().kmalloc(mem::size_of::<Self>())?;
        let name = cx.heap().kstrdup(name)?;
        let lock = Self {
            name,
            holder: IntrCell::new(cx.processor(), None),
            wchan: WaitChannel::new(cx.processor()),
            _storage: storage,
        };
        debug!("lock {} created", lock);
        Ok(Arc::new(lock))
    }

    /// Drop the creator's reference. The lock must be free and have no
    /// waiters.
    pub fn destroy(self: Arc<Self>, cx: &ThreadContext) {
        {
            let spl = self.raise(cx);
            if let Some(holder) = self.holder.get(&spl) {
                panic!("lock {}: destroyed while held by {}", self, holder);
            }
            assert!(
                !self.wchan.has_sleepers(&spl),
                "lock {}: destroyed while threads sleep on it",
                self
            );
        }
        debug!("lock {} destroyed", self);
    }

    pub fn acquire(&self, cx: &ThreadContext) {
        let mut spl = self.raise(cx);

        if self.do_i_hold(cx) {
            panic!("lock {}: deadlock, {} already holds it", self, cx.handle());
        }

        while self.holder.get(&spl).is_some() {
            self.wchan.sleep(&mut spl);
        }
        self.holder.set(&spl, Some(cx.handle()));
    }

    pub fn release(&self, cx: &ThreadContext) {
        let spl = self.raise(cx);

        if !self.do_i_hold(cx) {
            panic!(
                "lock {}: released by {} which does not hold it",
                self,
                cx.handle()
            );
        }

        self.holder.set(&spl, None);
        self.wchan.wakeup(&spl);
    }

    /// Whether the calling thread is the holder. Never blocks.
    pub fn do_i_hold(&self, cx: &ThreadContext) -> bool {
        let spl = self.raise(cx);
        self.holder.get(&spl) == Some(cx.handle())
    }

    pub fn holder(&self, cx: &ThreadContext) -> Option<ThreadHandle> {
        let spl = self.raise(cx);
        self.holder.get(&spl)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> WaitChannelId {
        self.wchan.id()
    }

    /// Raise the level, checking that `cx` runs on this lock's processor.
    fn raise<'a>(&self, cx: &'a ThreadContext) -> SplGuard<'a> {
        let spl = cx.splhigh();
        spl.assert_on(self.wchan.processor(), self);
        spl
    }
}

impl fmt::Display for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.name, self.wchan.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::uniproc::{Uniprocessor, UniprocessorConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn ownership_follows_acquire_and_release() {
        init_logger();
        let cpu = Uniprocessor::new(UniprocessorConfig::default());
        let cx = cpu.attach("main");
        let lock = Lock::create(&cx, "lk").unwrap();

        assert!(!lock.do_i_hold(&cx));
        lock.acquire(&cx);
        assert!(lock.do_i_hold(&cx));
        assert_eq!(lock.holder(&cx), Some(cx.handle()));

        let other_sees_held = {
            let lock = Arc::clone(&lock);
            cpu.spawn("other", move |cx| lock.do_i_hold(cx)).unwrap()
        };
        assert!(!other_sees_held.join().unwrap());

        lock.release(&cx);
        assert!(!lock.do_i_hold(&cx));
        assert_eq!(lock.holder(&cx), None);
        lock.destroy(&cx);
        assert_eq!(cx.heap().used(), 0);
    }

    #[test]
    fn contended_lock_admits_one_holder_at_a_time() {
        init_logger();
        let cpu = Uniprocessor::new(UniprocessorConfig::default());
        let cx = cpu.attach("main");
        let lock = Lock::create(&cx, "contended").unwrap();
        let inside = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|i| {
                let lock = Arc::clone(&lock);
                let inside = Arc::clone(&inside);
                let overlaps = Arc::clone(&overlaps);
                cpu.spawn(&format!("worker{i}"), move |cx| {
                    for _ in 0..50 {
                        lock.acquire(cx);
                        if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        cx.yield_now();
                        inside.fetch_sub(1, Ordering::SeqCst);
                        lock.release(cx);
                    }
                })
                .unwrap()
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(lock.holder(&cx), None);
        lock.destroy(&cx);
    }

    #[test]
    #[should_panic(expected = "does not hold it")]
    fn release_by_non_holder_is_fatal() {
        let cpu = Uniprocessor::new(UniprocessorConfig::default());
        let cx = cpu.attach("main");
        let lock = Lock::create(&cx, "lk").unwrap();
        lock.release(&cx);
    }

    #[test]
    fn release_by_other_thread_is_fatal() {
        init_logger();
        let cpu = Uniprocessor::new(UniprocessorConfig::default());
        let cx = cpu.attach("main");
        let lock = Lock::create(&cx, "lk").unwrap();
        lock.acquire(&cx);

        let thief = {
            let lock = Arc::clone(&lock);
            cpu.spawn("thief", move |cx| lock.release(cx)).unwrap()
        };
        assert!(thief.join().is_err());
        assert!(lock.do_i_hold(&cx));
        lock.release(&cx);
    }

    #[test]
    #[should_panic(expected = "belongs to")]
    fn do_i_hold_from_another_processor_is_fatal() {
        let home = Uniprocessor::new(UniprocessorConfig::default());
        let away = Uniprocessor::new(UniprocessorConfig::default());
        let owner = home.attach("owner");
        let lock = Lock::create(&owner, "homelock").unwrap();

        let stranger = away.attach("stranger");
        lock.do_i_hold(&stranger);
    }

    #[test]
    #[should_panic(expected = "destroyed while held")]
    fn destroy_while_held_is_fatal() {
        let cpu = Uniprocessor::new(UniprocessorConfig::default());
        let cx = cpu.attach("main");
        let lock = Lock::create(&cx, "lk").unwrap();
        lock.acquire(&cx);
        lock.destroy(&cx);
    }
}
