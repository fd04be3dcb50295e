use super::SplGuard;
use crate::types::{ProcessorId, WaitChannelId};
use log::trace;

/// Queue of threads blocked on one synchronization object.
///
/// Each primitive owns its channel; the channel's id is the only key the
/// platform ever sees. A channel belongs to the processor it was made on.
#[derive(Debug)]
pub struct WaitChannel {
    id: WaitChannelId,
    processor: ProcessorId,
}

impl WaitChannel {
    pub fn new(processor: ProcessorId) -> Self {
        Self {
            id: WaitChannelId::allocate(),
            processor,
        }
    }

    pub fn id(&self) -> WaitChannelId {
        self.id
    }

    pub fn processor(&self) -> ProcessorId {
        self.processor
    }

    /// Block the guard's thread until this channel is woken.
    ///
    /// Taking the guard mutably keeps every `IntrCell` borrow made under it
    /// from living across the sleep.
    pub fn sleep(&self, spl: &mut SplGuard<'_>) {
        spl.assert_on(self.processor, self.id);
        let cx = spl.context();
        assert!(
            !cx.in_interrupt(),
            "{} tried to sleep on {} in an interrupt handler",
            cx.handle(),
            self.id
        );

        trace!("{} sleeping on {}", cx.handle(), self.id);
        cx.platform().thread_sleep(cx.handle(), self.id);
        trace!("{} resumed from {}", cx.handle(), self.id);
    }

    /// Wake every thread sleeping on this channel.
    pub fn wakeup(&self, spl: &SplGuard<'_>) -> usize {
        spl.assert_on(self.processor, self.id);
        let woken = spl.context().platform().thread_wakeup(self.id);
        if woken > 0 {
            trace!("{} woke {} thread(s)", self.id, woken);
        }
        woken
    }

    pub fn has_sleepers(&self, spl: &SplGuard<'_>) -> bool {
        spl.assert_on(self.processor, self.id);
        spl.context().platform().thread_hassleepers(self.id)
    }
}
