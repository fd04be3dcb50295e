pub mod scheduler;
pub mod tcb;
pub mod uniproc;
pub mod wchan;

use crate::memory::KernelHeap;
use crate::platform::{Ipl, Platform};
use crate::types::{ProcessorId, ThreadHandle};
use core::cell::Cell;
use core::fmt;
use log::debug;
use std::sync::Arc;

/// Execution context of one kernel thread.
///
/// Every synchronization operation receives the context of the thread
/// performing it; there is no global "current thread".
pub struct ThreadContext {
    platform: Arc<dyn Platform>,
    processor: ProcessorId,
    handle: ThreadHandle,
    name: String,
    in_interrupt: Cell<bool>,
}

impl ThreadContext {
    /// Register the calling host thread with `platform` as a kernel thread.
    pub fn attach(platform: Arc<dyn Platform>, name: &str) -> Self {
        let processor = platform.processor();
        let handle = platform.thread_attach(name);
        debug!("{} ({}) attached to {}", handle, name, processor);
        Self {
            platform,
            processor,
            handle,
            name: name.to_string(),
            in_interrupt: Cell::new(false),
        }
    }

    pub fn handle(&self) -> ThreadHandle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Processor this thread runs on.
    pub fn processor(&self) -> ProcessorId {
        self.processor
    }

    pub fn platform(&self) -> &dyn Platform {
        self.platform.as_ref()
    }

    pub fn heap(&self) -> &KernelHeap {
        self.platform.heap()
    }

    /// True while this thread is running an interrupt handler.
    pub fn in_interrupt(&self) -> bool {
        self.in_interrupt.get()
    }

    /// Raise the interrupt level until the returned guard is dropped.
    pub fn splhigh(&self) -> SplGuard<'_> {
        let prior = self.platform.splhigh(self.handle);
        SplGuard { cx: self, prior }
    }

    /// Run `handler` as an interrupt handler: at raised level, with blocking
    /// forbidden.
    pub fn interrupt<R>(&self, handler: impl FnOnce(&ThreadContext) -> R) -> R {
        let _spl = self.splhigh();
        assert!(
            !self.in_interrupt.get(),
            "{} ({}): nested interrupt",
            self.handle,
            self.name
        );
        let _frame = InterruptFrame::enter(self);
        handler(self)
    }

    pub fn yield_now(&self) {
        self.platform.thread_yield(self.handle);
    }
}

impl Drop for ThreadContext {
    fn drop(&mut self) {
        debug!("{} ({}) exiting", self.handle, self.name);
        self.platform.thread_exit(self.handle);
    }
}

impl fmt::Debug for ThreadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadContext")
            .field("processor", &self.processor)
            .field("handle", &self.handle)
            .field("name", &self.name)
            .field("in_interrupt", &self.in_interrupt.get())
            .finish()
    }
}

struct InterruptFrame<'a> {
    cx: &'a ThreadContext,
}

impl<'a> InterruptFrame<'a> {
    fn enter(cx: &'a ThreadContext) -> Self {
        cx.in_interrupt.set(true);
        Self { cx }
    }
}

impl Drop for InterruptFrame<'_> {
    fn drop(&mut self) {
        self.cx.in_interrupt.set(false);
    }
}

/// Proof that the interrupt level is raised. Restores the prior level on
/// drop, unwinding included.
pub struct SplGuard<'a> {
    cx: &'a ThreadContext,
    prior: Ipl,
}

impl<'a> SplGuard<'a> {
    pub fn context(&self) -> &'a ThreadContext {
        self.cx
    }

    /// Level that will be restored when this guard goes away.
    pub fn prior(&self) -> Ipl {
        self.prior
    }

    /// Panic unless the guard's thread runs on `owner`.
    ///
    /// A raised level only excludes threads of the same processor, so
    /// objects created on one processor must never be touched from another.
    pub fn assert_on(&self, owner: ProcessorId, object: impl fmt::Display) {
        if self.cx.processor != owner {
            panic!(
                "{}: used by {} on {}, belongs to {}",
                object, self.cx.handle, self.cx.processor, owner
            );
        }
    }
}

impl Drop for SplGuard<'_> {
    fn drop(&mut self) {
        self.cx.platform.splx(self.cx.handle, self.prior);
    }
}

#[cfg(test)]
mod tests {
    use super::uniproc::{Uniprocessor, UniprocessorConfig};
    use crate::platform::{Ipl, Platform};

    #[test]
    fn spl_nests_and_restores() {
        let cpu = Uniprocessor::new(UniprocessorConfig::default());
        let cx = cpu.attach("main");

        let outer = cx.splhigh();
        assert_eq!(outer.prior(), Ipl::LOW);
        {
            let inner = cx.splhigh();
            assert_eq!(inner.prior(), Ipl::HIGH);
        }
        assert_eq!(cpu.level_owner(), Some(cx.handle()));
        drop(outer);
        assert_eq!(cpu.level_owner(), None);
    }

    #[test]
    fn interrupt_flag_is_scoped_to_handler() {
        let cpu = Uniprocessor::new(UniprocessorConfig::default());
        let cx = cpu.attach("main");

        assert!(!cx.in_interrupt());
        let seen = cx.interrupt(|icx| icx.in_interrupt());
        assert!(seen);
        assert!(!cx.in_interrupt());
        assert_eq!(cpu.level_owner(), None);
    }

    #[test]
    #[should_panic(expected = "belongs to")]
    fn guard_rejects_objects_of_another_processor() {
        let home = Uniprocessor::new(UniprocessorConfig::default());
        let away = Uniprocessor::new(UniprocessorConfig::default());
        let cx = away.attach("stranger");

        let spl = cx.splhigh();
        spl.assert_on(home.processor(), "object");
    }

    #[test]
    fn guard_restores_level_when_unwinding() {
        let cpu = Uniprocessor::new(UniprocessorConfig::default());
        let cx = cpu.attach("main");

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _spl = cx.splhigh();
            panic!("fault at raised level");
        }));
        assert!(result.is_err());
        assert_eq!(cpu.level_owner(), None);
    }
}
