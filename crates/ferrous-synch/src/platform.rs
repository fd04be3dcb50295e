use crate::memory::KernelHeap;
use crate::types::{ProcessorId, ThreadHandle, WaitChannelId};
use core::fmt;

/// Interrupt priority level.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct Ipl(u8);

impl Ipl {
    /// All interrupts enabled.
    pub const LOW: Ipl = Ipl(0);
    /// No interrupt and no preemption can be delivered.
    pub const HIGH: Ipl = Ipl(15);
}

impl fmt::Display for Ipl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "spl{}", self.0)
    }
}

/// Services the synchronization layer needs from the rest of the kernel.
///
/// # Safety
///
/// Implementations model a single processor. From the moment `splhigh`
/// returns for a thread until its matching `splx` (or until it calls
/// `thread_sleep`), no other thread attached to the same processor may
/// return from `splhigh` or `thread_sleep`. Primitives keep their state in
/// unsynchronized cells and rely on this for exclusion. `processor` must
/// return the same id for the life of the value and an id no other
/// processor uses.
pub unsafe trait Platform: Send + Sync {
    fn processor(&self) -> ProcessorId;

    /// Raise the level to `Ipl::HIGH` on behalf of `thread`, returning the
    /// level it replaced.
    fn splhigh(&self, thread: ThreadHandle) -> Ipl;

    /// Undo the most recent `splhigh` by `thread`.
    fn splx(&self, thread: ThreadHandle, prior: Ipl);

    /// Deschedule `thread` until `chan` is woken. Must be called at
    /// `Ipl::HIGH`; the level is held again when this returns.
    fn thread_sleep(&self, thread: ThreadHandle, chan: WaitChannelId);

    /// Make every thread sleeping on `chan` runnable. Returns how many were
    /// woken.
    fn thread_wakeup(&self, chan: WaitChannelId) -> usize;

    fn thread_hassleepers(&self, chan: WaitChannelId) -> bool;

    /// Give up the processor voluntarily; `thread` stays runnable.
    fn thread_yield(&self, thread: ThreadHandle);

    /// Register a new kernel thread.
    fn thread_attach(&self, name: &str) -> ThreadHandle;

    fn thread_exit(&self, thread: ThreadHandle);

    fn heap(&self) -> &KernelHeap;
}
