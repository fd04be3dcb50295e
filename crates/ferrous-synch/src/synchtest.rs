//! Stress tests for the synchronization primitives, runnable from the
//! kernel menu as `sy1` (semaphores), `sy2` (locks) and `sy3` (condition
//! variables).

use crate::error::KernelError;
use crate::sync::{Cv, Lock, Semaphore};
use crate::thread::uniproc::Uniprocessor;
use crate::thread::ThreadContext;
use core::fmt;
use log::{debug, info};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct SynchTestConfig {
    pub threads: usize,
    pub loops: usize,
    /// Yield at random points to shake out interleavings.
    pub stir: bool,
}

impl Default for SynchTestConfig {
    fn default() -> Self {
        Self {
            threads: 32,
            loops: 120,
            stir: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum SynchTestError {
    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error("failed to spawn kernel thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("{test}: worker {worker} panicked")]
    WorkerPanicked { test: &'static str, worker: usize },

    #[error("{test}: {detail}")]
    Failed { test: &'static str, detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynchTestReport {
    pub test: &'static str,
    pub threads: usize,
    pub iterations: usize,
}

impl fmt::Display for SynchTestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} threads, {} iterations, passed",
            self.test, self.threads, self.iterations
        )
    }
}

fn stir(cx: &ThreadContext, enabled: bool) {
    if enabled {
        for _ in 0..rand::thread_rng().gen_range(0..3) {
            cx.yield_now();
        }
    }
}

fn join_all(test: &'static str, workers: Vec<JoinHandle<()>>) -> Result<(), SynchTestError> {
    let mut first_failure = None;
    for (worker, handle) in workers.into_iter().enumerate() {
        if handle.join().is_err() && first_failure.is_none() {
            first_failure = Some(SynchTestError::WorkerPanicked { test, worker });
        }
    }
    match first_failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Posts a worker's completion, also when it unwinds.
struct DoneSignal<'a> {
    donesem: &'a Semaphore,
    cx: &'a ThreadContext,
}

impl Drop for DoneSignal<'_> {
    fn drop(&mut self) {
        self.donesem.v(self.cx);
    }
}

/// Worker threads of one test, each posting `donesem` when it finishes.
struct Workers {
    test: &'static str,
    donesem: Arc<Semaphore>,
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    fn spawn<F>(
        cpu: &Arc<Uniprocessor>,
        cx: &ThreadContext,
        test: &'static str,
        threads: usize,
        work: F,
    ) -> Result<Self, SynchTestError>
    where
        F: Fn(&ThreadContext, usize) + Send + Sync + 'static,
    {
        let donesem = Semaphore::create(cx, "donesem", 0)?;
        let work = Arc::new(work);
        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let (work, donesem) = (Arc::clone(&work), Arc::clone(&donesem));
            handles.push(cpu.spawn(&format!("{test}{i}"), move |cx| {
                let _done = DoneSignal {
                    donesem: &donesem,
                    cx,
                };
                (*work)(cx, i);
            })?);
        }
        Ok(Self {
            test,
            donesem,
            handles,
        })
    }

    /// Wait for every worker to post, then reap them.
    fn finish(self, cx: &ThreadContext) -> Result<(), SynchTestError> {
        for _ in 0..self.handles.len() {
            self.donesem.p(cx);
        }
        join_all(self.test, self.handles)?;
        self.donesem.destroy(cx);
        Ok(())
    }
}

/// Keeps the other workers from sleeping forever behind one that panicked.
///
/// On unwind the lock is released if the worker held it. With a cv, the
/// run is marked abandoned and every waiter is woken to see it.
struct Abandon<'a> {
    cx: &'a ThreadContext,
    lock: &'a Lock,
    cv: Option<(&'a Cv, &'a AtomicBool)>,
}

impl Drop for Abandon<'_> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        let held = self.lock.do_i_hold(self.cx);
        match self.cv {
            Some((cv, abandoned)) => {
                abandoned.store(true, Ordering::SeqCst);
                if !held {
                    self.lock.acquire(self.cx);
                }
                cv.broadcast(self.cx, self.lock);
                self.lock.release(self.cx);
            }
            None if held => self.lock.release(self.cx),
            None => {}
        }
    }
}

/// `sy1`: at most `SEM_UNITS` threads may be between P and V at once.
pub fn semtest(
    cpu: &Arc<Uniprocessor>,
    config: &SynchTestConfig,
) -> Result<SynchTestReport, SynchTestError> {
    const TEST: &str = "semtest";
    const SEM_UNITS: usize = 2;

    let cx = cpu.attach(TEST);
    let testsem = Semaphore::create(&cx, "testsem", SEM_UNITS)?;
    let inside = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    info!("{}: starting {} threads", TEST, config.threads);

    // Hold every unit so the workers pile up asleep first.
    for _ in 0..SEM_UNITS {
        testsem.p(&cx);
    }

    let workers = {
        let (testsem, inside, peak) = (
            Arc::clone(&testsem),
            Arc::clone(&inside),
            Arc::clone(&peak),
        );
        let (loops, stirring) = (config.loops, config.stir);
        Workers::spawn(cpu, &cx, TEST, config.threads, move |cx, _| {
            for _ in 0..loops {
                testsem.p(cx);
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                stir(cx, stirring);
                inside.fetch_sub(1, Ordering::SeqCst);
                testsem.v(cx);
            }
        })?
    };

    for _ in 0..SEM_UNITS {
        testsem.v(&cx);
    }
    workers.finish(&cx)?;

    let count = testsem.count(&cx);
    let peak = peak.load(Ordering::SeqCst);
    debug!("{}: final count {}, peak occupancy {}", TEST, count, peak);
    if count != SEM_UNITS {
        return Err(SynchTestError::Failed {
            test: TEST,
            detail: format!("final count {count}, expected {SEM_UNITS}"),
        });
    }
    if peak > SEM_UNITS {
        return Err(SynchTestError::Failed {
            test: TEST,
            detail: format!("{peak} threads inside at once, limit {SEM_UNITS}"),
        });
    }

    testsem.destroy(&cx);
    Ok(SynchTestReport {
        test: TEST,
        threads: config.threads,
        iterations: config.threads * config.loops,
    })
}

struct LockTestData {
    testval1: AtomicUsize,
    testval2: AtomicUsize,
    testval3: AtomicUsize,
    failures: AtomicUsize,
}

/// `sy2`: values written under the lock stay consistent until it is
/// released.
pub fn locktest(
    cpu: &Arc<Uniprocessor>,
    config: &SynchTestConfig,
) -> Result<SynchTestReport, SynchTestError> {
    const TEST: &str = "locktest";

    let cx = cpu.attach(TEST);
    let lock = Lock::create(&cx, "testlock")?;
    let data = Arc::new(LockTestData {
        testval1: AtomicUsize::new(0),
        testval2: AtomicUsize::new(0),
        testval3: AtomicUsize::new(0),
        failures: AtomicUsize::new(0),
    });

    info!("{}: starting {} threads", TEST, config.threads);

    let workers = {
        let (lock, data) = (Arc::clone(&lock), Arc::clone(&data));
        let (loops, stirring) = (config.loops, config.stir);
        Workers::spawn(cpu, &cx, TEST, config.threads, move |cx, i| {
            let _abandon = Abandon {
                cx,
                lock: &lock,
                cv: None,
            };
            for _ in 0..loops {
                lock.acquire(cx);
                data.testval1.store(i, Ordering::Relaxed);
                stir(cx, stirring);
                data.testval2.store(i * i, Ordering::Relaxed);
                stir(cx, stirring);
                data.testval3.store(i % 3, Ordering::Relaxed);
                stir(cx, stirring);

                let v1 = data.testval1.load(Ordering::Relaxed);
                let consistent = v1 == i
                    && data.testval2.load(Ordering::Relaxed) == v1 * v1
                    && data.testval3.load(Ordering::Relaxed) == v1 % 3
                    && lock.do_i_hold(cx);
                if !consistent {
                    data.failures.fetch_add(1, Ordering::SeqCst);
                }
                lock.release(cx);
            }
        })?
    };
    workers.finish(&cx)?;

    let failures = data.failures.load(Ordering::SeqCst);
    if failures > 0 {
        return Err(SynchTestError::Failed {
            test: TEST,
            detail: format!("{failures} inconsistent critical sections"),
        });
    }

    lock.destroy(&cx);
    Ok(SynchTestReport {
        test: TEST,
        threads: config.threads,
        iterations: config.threads * config.loops,
    })
}

/// `sy3`: threads take turns in descending order, each waiting on the cv
/// until the shared turn names it.
pub fn cvtest(
    cpu: &Arc<Uniprocessor>,
    config: &SynchTestConfig,
) -> Result<SynchTestReport, SynchTestError> {
    const TEST: &str = "cvtest";

    if config.threads == 0 {
        return Err(SynchTestError::Failed {
            test: TEST,
            detail: "needs at least one thread".to_string(),
        });
    }

    let cx = cpu.attach(TEST);
    let lock = Lock::create(&cx, "testlock")?;
    let cv = Cv::create(&cx, "testcv")?;
    let threads = config.threads;
    // Protected by `lock`.
    let turn = Arc::new(AtomicUsize::new(threads - 1));
    let misordered = Arc::new(AtomicUsize::new(0));
    let abandoned = Arc::new(AtomicBool::new(false));

    info!("{}: starting {} threads", TEST, threads);

    let workers = {
        let (lock, cv) = (Arc::clone(&lock), Arc::clone(&cv));
        let (turn, misordered, abandoned) =
            (Arc::clone(&turn), Arc::clone(&misordered), Arc::clone(&abandoned));
        let (loops, stirring) = (config.loops, config.stir);
        Workers::spawn(cpu, &cx, TEST, threads, move |cx, i| {
            let _abandon = Abandon {
                cx,
                lock: &lock,
                cv: Some((&*cv, &*abandoned)),
            };
            for _ in 0..loops {
                lock.acquire(cx);
                while turn.load(Ordering::Relaxed) != i && !abandoned.load(Ordering::SeqCst) {
                    cv.wait(cx, &lock);
                }
                if abandoned.load(Ordering::SeqCst) {
                    lock.release(cx);
                    return;
                }
                stir(cx, stirring);
                if turn.load(Ordering::Relaxed) != i || !lock.do_i_hold(cx) {
                    misordered.fetch_add(1, Ordering::SeqCst);
                }
                let next = if i == 0 { threads - 1 } else { i - 1 };
                turn.store(next, Ordering::Relaxed);
                cv.broadcast(cx, &lock);
                lock.release(cx);
            }
        })?
    };
    workers.finish(&cx)?;

    let misordered = misordered.load(Ordering::SeqCst);
    let final_turn = turn.load(Ordering::SeqCst);
    if misordered > 0 || final_turn != threads - 1 {
        return Err(SynchTestError::Failed {
            test: TEST,
            detail: format!("{misordered} turns taken out of order, final turn {final_turn}"),
        });
    }

    cv.destroy(&cx);
    lock.destroy(&cx);
    Ok(SynchTestReport {
        test: TEST,
        threads,
        iterations: threads * config.loops,
    })
}
