use core::fmt;
use core::num::{NonZeroU32, NonZeroU64};
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Thread identifier
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ThreadHandle(NonZeroU32);

impl ThreadHandle {
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Self)
    }

    pub fn val(&self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread#{}", self.0)
    }
}

/// Identity of a wait channel.
///
/// Handed out once per channel and never reused, so two live objects can
/// never share a queue.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct WaitChannelId(NonZeroU64);

static NEXT_CHANNEL: AtomicU64 = AtomicU64::new(1);

impl WaitChannelId {
    pub fn allocate() -> Self {
        let id = NEXT_CHANNEL.fetch_add(1, Ordering::Relaxed);
        // The counter starts at 1 and a u64 does not wrap in practice.
        Self(NonZeroU64::new(id).unwrap_or(NonZeroU64::MIN))
    }

    pub fn val(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for WaitChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wchan@{:#x}", self.0.get())
    }
}

/// Identity of one processor. Objects created on a processor may only be
/// used by its threads.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ProcessorId(NonZeroU32);

static NEXT_PROCESSOR: AtomicU32 = AtomicU32::new(1);

impl ProcessorId {
    pub fn allocate() -> Self {
        let id = NEXT_PROCESSOR.fetch_add(1, Ordering::Relaxed);
        Self(NonZeroU32::new(id).unwrap_or(NonZeroU32::MIN))
    }
}

impl fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_handle_rejects_zero() {
        assert!(ThreadHandle::new(0).is_none());
        assert_eq!(ThreadHandle::new(7).map(|h| h.val()), Some(7));
    }

    #[test]
    fn wait_channels_are_never_shared() {
        let a = WaitChannelId::allocate();
        let b = WaitChannelId::allocate();
        assert_ne!(a, b);
        assert!(b.val() > a.val());
    }

    #[test]
    fn processors_get_distinct_ids() {
        assert_ne!(ProcessorId::allocate(), ProcessorId::allocate());
    }
}
