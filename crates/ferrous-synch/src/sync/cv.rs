use super::lock::Lock;
use crate::error::KernelError;
use crate::memory::{HeapBlock, KString};
use crate::thread::wchan::WaitChannel;
use crate::thread::{SplGuard, ThreadContext};
use crate::types::WaitChannelId;
use core::fmt;
use core::mem;
use log::debug;
use std::sync::Arc;

/// Condition variable.
///
/// Keeps no state besides its wait channel. The lock guarding the condition
/// is passed to every call and must be the same one each time; that is not
/// checked.
pub struct Cv {
    name: KString,
    wchan: WaitChannel,
    _storage: HeapBlock,
}

impl Cv {
    pub fn create(cx: &ThreadContext, name: &str) -> Result<Arc<Self>, KernelError> {
        let storage = cx.heap().kmalloc(mem::size_of::<Self>())?;
        let name = cx.heap().kstrdup(name)?;
        let cv = Self {
            name,
            wchan: WaitChannel::new(cx.processor()),
            _storage: storage,
        };
        debug!("cv {} created", cv);
        Ok(Arc::new(cv))
    }

    pub fn destroy(self: Arc<Self>, cx: &ThreadContext) {
        {
            let spl = self.raise(cx);
            assert!(
                !self.wchan.has_sleepers(&spl),
                "cv {}: destroyed while threads sleep on it",
                self
            );
        }
        debug!("cv {} destroyed", self);
    }

    /// Release `lock`, sleep until signalled, then take `lock` back.
    ///
    /// The release and the sleep happen under one raised level, so a
    /// signal from another thread cannot slip in between them. Callers
    /// re-check their condition on return.
    pub fn wait(&self, cx: &ThreadContext, lock: &Lock) {
        let mut spl = self.raise(cx);
        self.check_holder(cx, lock, "wait");

        lock.release(cx);
        self.wchan.sleep(&mut spl);
        lock.acquire(cx);
    }

    /// Wake the waiters. Every waiter is woken, as with `broadcast`.
    pub fn signal(&self, cx: &ThreadContext, lock: &Lock) {
        self.wake_all(cx, lock, "signal");
    }

    pub fn broadcast(&self, cx: &ThreadContext, lock: &Lock) {
        self.wake_all(cx, lock, "broadcast");
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> WaitChannelId {
        self.wchan.id()
    }

    /// Raise the level, checking that `cx` runs on this cv's processor.
    fn raise<'a>(&self, cx: &'a ThreadContext) -> SplGuard<'a> {
        let spl = cx.splhigh();
        spl.assert_on(self.wchan.processor(), self);
        spl
    }

    fn wake_all(&self, cx: &ThreadContext, lock: &Lock, op: &str) {
        let spl = self.raise(cx);
        self.check_holder(cx, lock, op);
        self.wchan.wakeup(&spl);
    }

    fn check_holder(&self, cx: &ThreadContext, lock: &Lock, op: &str) {
        if !lock.do_i_hold(cx) {
            panic!(
                "cv {}: {} by {} without holding lock {}",
                self,
                op,
                cx.handle(),
                lock
            );
        }
    }
}

impl fmt::Display for Cv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.name, self.wchan.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::uniproc::{Uniprocessor, UniprocessorConfig};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn wait_returns_holding_the_lock() {
        init_logger();
        let cpu = Uniprocessor::new(UniprocessorConfig::default());
        let cx = cpu.attach("main");
        let lock = Lock::create(&cx, "lk").unwrap();
        let cv = Cv::create(&cx, "cv").unwrap();
        let ready = Arc::new(AtomicBool::new(false));

        let waiter = {
            let (lock, cv, ready) = (Arc::clone(&lock), Arc::clone(&cv), Arc::clone(&ready));
            cpu.spawn("waiter", move |cx| {
                lock.acquire(cx);
                while !ready.load(Ordering::SeqCst) {
                    cv.wait(cx, &lock);
                    assert!(lock.do_i_hold(cx));
                }
                lock.release(cx);
            })
            .unwrap()
        };

        while cpu.sleepers(cv.channel()) == 0 {
            std::thread::yield_now();
        }
        // The waiter gave the lock up while it sleeps.
        assert_eq!(lock.holder(&cx), None);

        lock.acquire(&cx);
        ready.store(true, Ordering::SeqCst);
        cv.signal(&cx, &lock);
        lock.release(&cx);

        waiter.join().unwrap();
        cv.destroy(&cx);
        lock.destroy(&cx);
        assert_eq!(cx.heap().used(), 0);
    }

    #[test]
    fn signal_with_no_waiters_is_harmless() {
        let cpu = Uniprocessor::new(UniprocessorConfig::default());
        let cx = cpu.attach("main");
        let lock = Lock::create(&cx, "lk").unwrap();
        let cv = Cv::create(&cx, "cv").unwrap();

        lock.acquire(&cx);
        cv.signal(&cx, &lock);
        cv.broadcast(&cx, &lock);
        assert!(lock.do_i_hold(&cx));
        lock.release(&cx);
    }

    #[test]
    #[should_panic(expected = "signal by thread#1 without holding lock")]
    fn signal_without_lock_is_fatal() {
        let cpu = Uniprocessor::new(UniprocessorConfig::default());
        let cx = cpu.attach("main");
        let lock = Lock::create(&cx, "lk").unwrap();
        let cv = Cv::create(&cx, "cv").unwrap();
        cv.signal(&cx, &lock);
    }

    #[test]
    #[should_panic(expected = "broadcast by")]
    fn broadcast_without_lock_is_fatal() {
        let cpu = Uniprocessor::new(UniprocessorConfig::default());
        let cx = cpu.attach("main");
        let lock = Lock::create(&cx, "lk").unwrap();
        let cv = Cv::create(&cx, "cv").unwrap();
        cv.broadcast(&cx, &lock);
    }

    #[test]
    #[should_panic(expected = "wait by")]
    fn wait_without_lock_is_fatal() {
        let cpu = Uniprocessor::new(UniprocessorConfig::default());
        let cx = cpu.attach("main");
        let lock = Lock::create(&cx, "lk").unwrap();
        let cv = Cv::create(&cx, "cv").unwrap();
        cv.wait(&cx, &lock);
    }

    #[test]
    #[should_panic(expected = "belongs to")]
    fn broadcast_from_another_processor_is_fatal() {
        let home = Uniprocessor::new(UniprocessorConfig::default());
        let away = Uniprocessor::new(UniprocessorConfig::default());
        let owner = home.attach("owner");
        let cv = Cv::create(&owner, "homecv").unwrap();

        let stranger = away.attach("stranger");
        let lock = Lock::create(&stranger, "awaylock").unwrap();
        lock.acquire(&stranger);
        cv.broadcast(&stranger, &lock);
    }

    #[test]
    #[should_panic(expected = "in an interrupt handler")]
    fn wait_in_interrupt_handler_is_fatal() {
        let cpu = Uniprocessor::new(UniprocessorConfig::default());
        let cx = cpu.attach("main");
        let lock = Lock::create(&cx, "lk").unwrap();
        let cv = Cv::create(&cx, "cv").unwrap();

        lock.acquire(&cx);
        cx.interrupt(|icx| cv.wait(icx, &lock));
    }

    #[test]
    fn destroy_with_waiter_is_detected() {
        init_logger();
        let cpu = Uniprocessor::new(UniprocessorConfig::default());
        let cx = cpu.attach("main");
        let lock = Lock::create(&cx, "lk").unwrap();
        let cv = Cv::create(&cx, "cv").unwrap();
        let keep = Arc::clone(&cv);

        let waiter = {
            let (lock, cv) = (Arc::clone(&lock), Arc::clone(&cv));
            cpu.spawn("waiter", move |cx| {
                lock.acquire(cx);
                cv.wait(cx, &lock);
                lock.release(cx);
            })
            .unwrap()
        };
        while cpu.sleepers(cv.channel()) == 0 {
            std::thread::yield_now();
        }

        let fault = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cv.destroy(&cx)));
        assert!(fault.is_err());

        lock.acquire(&cx);
        keep.broadcast(&cx, &lock);
        lock.release(&cx);
        waiter.join().unwrap();
    }
}
