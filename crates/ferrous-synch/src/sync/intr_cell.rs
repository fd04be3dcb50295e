use crate::thread::SplGuard;
use crate::types::ProcessorId;
use core::cell::{RefCell, RefMut};

/// State that may only be touched with the interrupt level raised on the
/// processor that owns it.
///
/// On a single processor the raised level already excludes every other
/// thread, so no further locking happens here. Borrows are tied to the
/// `SplGuard` they were made under.
pub struct IntrCell<T> {
    processor: ProcessorId,
    data: RefCell<T>,
}

// SAFETY: every access needs an `SplGuard` of a thread on `processor`, and
// `Platform` guarantees one such guard is live at a time.
unsafe impl<T: Send> Sync for IntrCell<T> {}

impl<T> IntrCell<T> {
    pub const fn new(processor: ProcessorId, data: T) -> Self {
        Self {
            processor,
            data: RefCell::new(data),
        }
    }

    pub fn borrow_mut<'g>(&'g self, spl: &'g SplGuard<'_>) -> RefMut<'g, T> {
        spl.assert_on(self.processor, "interrupt-protected state");
        self.data.borrow_mut()
    }

    pub fn set(&self, spl: &SplGuard<'_>, value: T) {
        *self.borrow_mut(spl) = value;
    }
}

impl<T: Copy> IntrCell<T> {
    pub fn get(&self, spl: &SplGuard<'_>) -> T {
        *self.borrow_mut(spl)
    }
}
