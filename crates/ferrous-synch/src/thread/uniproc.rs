//! A single simulated processor hosted on OS threads.
//!
//! Every kernel thread is a host thread, but only the thread that owns the
//! raised interrupt level may touch kernel state. Sleeping hands the level
//! back; waking queues the sleeper on the round-robin ready queue, and the
//! front of that queue gets the level before any fresh `splhigh` caller.

use super::scheduler::{RoundRobinScheduler, Scheduler};
use super::tcb::{LevelState, ThreadControlBlock, ThreadState};
use super::ThreadContext;
use crate::memory::KernelHeap;
use crate::platform::{Ipl, Platform};
use crate::types::{ProcessorId, ThreadHandle, WaitChannelId};
use log::{debug, trace, warn};
use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

#[derive(Debug, Clone)]
pub struct UniprocessorConfig {
    /// Bytes of kernel heap available to synchronization objects.
    pub heap_bytes: usize,
}

impl Default for UniprocessorConfig {
    fn default() -> Self {
        Self {
            heap_bytes: 1024 * 1024,
        }
    }
}

struct CpuState {
    threads: BTreeMap<ThreadHandle, ThreadControlBlock>,
    scheduler: Box<dyn Scheduler>,
    level: LevelState,
    next_handle: u32,
}

impl CpuState {
    fn tcb_mut(&mut self, thread: ThreadHandle) -> &mut ThreadControlBlock {
        match self.threads.get_mut(&thread) {
            Some(tcb) => tcb,
            None => panic!("{} is not a thread on this processor", thread),
        }
    }

    fn may_resume(&self, thread: ThreadHandle) -> bool {
        let ready = self
            .threads
            .get(&thread)
            .is_some_and(|tcb| tcb.state == ThreadState::Ready);
        ready && self.level.owner.is_none() && self.scheduler.peek() == Some(thread)
    }

    fn sleepers(&self, chan: WaitChannelId) -> usize {
        self.threads
            .values()
            .filter(|tcb| tcb.state == ThreadState::Sleeping(chan))
            .count()
    }
}

pub struct Uniprocessor {
    id: ProcessorId,
    state: Mutex<CpuState>,
    dispatch: Condvar,
    heap: KernelHeap,
}

impl Uniprocessor {
    pub fn new(config: UniprocessorConfig) -> Arc<Self> {
        let id = ProcessorId::allocate();
        debug!("{} up, {} bytes of kernel heap", id, config.heap_bytes);
        Arc::new(Self {
            id,
            state: Mutex::new(CpuState {
                threads: BTreeMap::new(),
                scheduler: Box::new(RoundRobinScheduler::new()),
                level: LevelState::default(),
                next_handle: 1,
            }),
            dispatch: Condvar::new(),
            heap: KernelHeap::new(config.heap_bytes),
        })
    }

    /// Adopt the calling host thread as a kernel thread.
    pub fn attach(self: &Arc<Self>, name: &str) -> ThreadContext {
        let platform: Arc<dyn Platform> = self.clone();
        ThreadContext::attach(platform, name)
    }

    /// Start a kernel thread running `entry`.
    pub fn spawn<F, R>(self: &Arc<Self>, name: &str, entry: F) -> io::Result<JoinHandle<R>>
    where
        F: FnOnce(&ThreadContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        let cpu = Arc::clone(self);
        let thread_name = name.to_string();
        std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let cx = cpu.attach(&thread_name);
                entry(&cx)
            })
    }

    /// Number of threads currently asleep on `chan`.
    pub fn sleepers(&self, chan: WaitChannelId) -> usize {
        self.cpu().sleepers(chan)
    }

    pub fn thread_count(&self) -> usize {
        self.cpu().threads.len()
    }

    /// Thread currently running at raised level, if any.
    pub fn level_owner(&self) -> Option<ThreadHandle> {
        self.cpu().level.owner
    }

    fn cpu(&self) -> MutexGuard<'_, CpuState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(
        &self,
        cpu: MutexGuard<'a, CpuState>,
        blocked: impl FnMut(&mut CpuState) -> bool,
    ) -> MutexGuard<'a, CpuState> {
        self.dispatch
            .wait_while(cpu, blocked)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// SAFETY: `level.owner` is only set while no other thread owns the level,
// and a sleeper only resumes once the level is free, both under `state`.
unsafe impl Platform for Uniprocessor {
    fn processor(&self) -> ProcessorId {
        self.id
    }

    fn splhigh(&self, thread: ThreadHandle) -> Ipl {
        let mut cpu = self.cpu();
        if cpu.level.owner == Some(thread) {
            cpu.level.depth += 1;
            return Ipl::HIGH;
        }

        // Woken sleepers go first.
        let mut cpu = self.wait(cpu, |cpu| {
            cpu.level.owner.is_some() || cpu.scheduler.peek().is_some()
        });
        cpu.level = LevelState {
            owner: Some(thread),
            depth: 1,
        };
        Ipl::LOW
    }

    fn splx(&self, thread: ThreadHandle, prior: Ipl) {
        let mut cpu = self.cpu();
        assert_eq!(
            cpu.level.owner,
            Some(thread),
            "splx by {} which does not hold the raised level",
            thread
        );
        cpu.level.depth -= 1;
        if cpu.level.depth == 0 {
            debug_assert_eq!(prior, Ipl::LOW);
            cpu.level.owner = None;
            drop(cpu);
            self.dispatch.notify_all();
        } else {
            debug_assert_eq!(prior, Ipl::HIGH);
        }
    }

    fn thread_sleep(&self, thread: ThreadHandle, chan: WaitChannelId) {
        let mut cpu = self.cpu();
        assert_eq!(
            cpu.level.owner,
            Some(thread),
            "{} tried to sleep on {} without raising the level",
            thread,
            chan
        );

        let state = &mut *cpu;
        let tcb = match state.threads.get_mut(&thread) {
            Some(tcb) => tcb,
            None => panic!("{} is not a thread on this processor", thread),
        };
        tcb.state = ThreadState::Sleeping(chan);
        tcb.context.save_from(&mut state.level);
        self.dispatch.notify_all();

        let mut cpu = self.wait(cpu, |cpu| !cpu.may_resume(thread));
        cpu.scheduler.schedule();

        let state = &mut *cpu;
        let tcb = state.tcb_mut(thread);
        tcb.state = ThreadState::Running;
        let saved = tcb.context;
        saved.restore_to(&mut state.level, thread);
    }

    fn thread_wakeup(&self, chan: WaitChannelId) -> usize {
        let mut cpu = self.cpu();
        let state = &mut *cpu;
        let mut woken = 0;
        for tcb in state.threads.values_mut() {
            if tcb.state == ThreadState::Sleeping(chan) {
                tcb.state = ThreadState::Ready;
                state.scheduler.enqueue(tcb.handle);
                woken += 1;
            }
        }
        if woken > 0 {
            drop(cpu);
            self.dispatch.notify_all();
        }
        woken
    }

    fn thread_hassleepers(&self, chan: WaitChannelId) -> bool {
        self.cpu().sleepers(chan) > 0
    }

    fn thread_yield(&self, thread: ThreadHandle) {
        trace!("{} yielding", thread);
        std::thread::yield_now();
    }

    fn thread_attach(&self, name: &str) -> ThreadHandle {
        let mut cpu = self.cpu();
        let handle = match ThreadHandle::new(cpu.next_handle) {
            Some(handle) => handle,
            None => panic!("thread handles exhausted"),
        };
        cpu.next_handle += 1;
        cpu.threads.insert(handle, ThreadControlBlock::new(handle, name));
        handle
    }

    fn thread_exit(&self, thread: ThreadHandle) {
        let mut cpu = self.cpu();
        if let Some(tcb) = cpu.threads.remove(&thread) {
            debug!("{} ({}) reaped", thread, tcb.name);
        }
        if cpu.scheduler.dequeue(thread) {
            warn!("{} exited while queued to run", thread);
        }
        if cpu.level.owner == Some(thread) {
            warn!("{} exited at raised level; lowering", thread);
            cpu.level = LevelState::default();
            drop(cpu);
            self.dispatch.notify_all();
        }
    }

    fn heap(&self) -> &KernelHeap {
        &self.heap
    }
}
