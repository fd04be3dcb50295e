use crate::error::KernelError;
use core::fmt;
use core::ops::Deref;
use core::sync::atomic::{AtomicUsize, Ordering};
use log::trace;
use std::sync::Arc;

struct HeapAccount {
    capacity: usize,
    used: AtomicUsize,
}

/// Byte-accounted kernel heap.
///
/// Every kernel object charges its storage here before it is built, so an
/// exhausted heap turns into a `KernelError::OutOfMemory` from `create`
/// rather than an abort.
#[derive(Clone)]
pub struct KernelHeap {
    inner: Arc<HeapAccount>,
}

impl KernelHeap {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HeapAccount {
                capacity,
                used: AtomicUsize::new(0),
            }),
        }
    }

    pub fn used(&self) -> usize {
        self.inner.used.load(Ordering::Acquire)
    }

    /// Reserve `bytes` of kernel memory. The reservation is returned when the
    /// block is dropped.
    pub fn kmalloc(&self, bytes: usize) -> Result<HeapBlock, KernelError> {
        let capacity = self.inner.capacity;
        self.inner
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|&total| total <= capacity)
            })
            .map_err(|used| KernelError::OutOfMemory {
                requested: bytes,
                available: capacity - used,
            })?;

        trace!("kmalloc: {} bytes ({} in use)", bytes, self.used());
        Ok(HeapBlock {
            heap: self.clone(),
            bytes,
        })
    }

    /// Duplicate `s` into kernel memory.
    pub fn kstrdup(&self, s: &str) -> Result<KString, KernelError> {
        let block = self.kmalloc(s.len())?;

        let mut text = String::new();
        text.try_reserve_exact(s.len())
            .map_err(|_| KernelError::OutOfMemory {
                requested: s.len(),
                available: 0,
            })?;
        text.push_str(s);

        Ok(KString {
            text,
            _block: block,
        })
    }

    fn kfree(&self, bytes: usize) {
        let previous = self.inner.used.fetch_sub(bytes, Ordering::AcqRel);
        debug_assert!(previous >= bytes, "kfree of {} bytes with only {} in use", bytes, previous);
        trace!("kfree: {} bytes ({} in use)", bytes, previous - bytes);
    }
}

impl fmt::Debug for KernelHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelHeap")
            .field("capacity", &self.inner.capacity)
            .field("used", &self.used())
            .finish()
    }
}

/// A live reservation against a `KernelHeap`.
#[derive(Debug)]
pub struct HeapBlock {
    heap: KernelHeap,
    bytes: usize,
}

impl Drop for HeapBlock {
    fn drop(&mut self) {
        self.heap.kfree(self.bytes);
    }
}

/// A string whose storage is charged to the kernel heap.
pub struct KString {
    text: String,
    _block: HeapBlock,
}

impl Deref for KString {
    type Target = str;
    fn deref(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for KString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl fmt::Debug for KString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.text, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_return_their_bytes() {
        let heap = KernelHeap::new(64);
        let a = heap.kmalloc(40).unwrap();
        assert_eq!(heap.used(), 40);

        let err = heap.kmalloc(32).unwrap_err();
        assert_eq!(
            err,
            KernelError::OutOfMemory {
                requested: 32,
                available: 24
            }
        );

        drop(a);
        assert_eq!(heap.used(), 0);
        assert!(heap.kmalloc(64).is_ok());
    }

    #[test]
    fn kstrdup_charges_name_length() {
        let heap = KernelHeap::new(16);
        let name = heap.kstrdup("sem0").unwrap();
        assert_eq!(&*name, "sem0");
        assert_eq!(heap.used(), 4);

        assert!(heap.kstrdup("a name that is far too long").is_err());
        assert_eq!(heap.used(), 4);

        drop(name);
        assert_eq!(heap.used(), 0);
    }
}
