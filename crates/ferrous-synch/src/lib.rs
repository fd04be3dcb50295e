//! Synchronization primitives for the Ferrous kernel: semaphores, locks and
//! condition variables for a single processor.
//!
//! Raising the interrupt level is the only source of atomicity and sleeping
//! on a wait channel the only way to block. The rest of the kernel (thread
//! switching, the sleep queues, interrupt control, the heap) is reached
//! through [`Platform`]; [`Uniprocessor`] provides one on host threads.

pub mod error;
pub mod memory;
pub mod platform;
pub mod sync;
pub mod synchtest;
pub mod thread;
pub mod types;

pub use error::KernelError;
pub use memory::KernelHeap;
pub use platform::{Ipl, Platform};
pub use sync::{Cv, Lock, Semaphore};
pub use thread::uniproc::{Uniprocessor, UniprocessorConfig};
pub use thread::{SplGuard, ThreadContext};
pub use types::{ProcessorId, ThreadHandle, WaitChannelId};
