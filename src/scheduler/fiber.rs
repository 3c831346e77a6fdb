//! The cooperative reference scheduler.
//!
//! Logical threads become *fibers*: each is backed by a parked OS thread, but a baton
//! handed around by the dispatcher guarantees that exactly one fiber (or the
//! dispatcher itself) executes at any instant. Scheduling is strictly round-robin and
//! switches only at declared suspension points: `yield_now`, waits on a
//! [`FiberCondition`], and the implicit yield at the top of every receive loop. That
//! preserves the run-to-suspension semantics of stackful coroutines while staying in
//! safe, stable Rust; receive can block anywhere in a fiber's call stack.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Instant;

use crate::error::{Error, POISONED_SHARED_MUTEX};
use crate::mailbox::SharedState;

use super::{Body, Condition, Scheduler};

const POISONED_GATE: &str = "poisoned fiber gate";
const POISONED_RUN_QUEUE: &str = "poisoned fiber run queue";

enum Fault {
    Failed(Error),
    Panicked(Box<dyn Any + Send>),
}

enum Phase {
    Parked,
    Running,
    Finished(Option<Fault>),
}

enum Resumed {
    Suspended,
    Finished(Option<Fault>),
}

/// The baton gate of one fiber. Whoever flips the phase holds the gate mutex, so the
/// dispatcher and the fiber's thread can never both believe they are running.
struct Fiber {
    phase: Mutex<Phase>,
    signal: Condvar,
}

impl Fiber {
    fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::Parked),
            signal: Condvar::new(),
        }
    }

    /// Dispatcher side: hand the baton over and sleep until it comes back.
    fn resume(&self) -> Resumed {
        let mut phase = self.phase.lock().expect(POISONED_GATE);
        *phase = Phase::Running;
        self.signal.notify_all();
        while matches!(*phase, Phase::Running) {
            phase = self.signal.wait(phase).expect(POISONED_GATE);
        }
        match &mut *phase {
            Phase::Parked => Resumed::Suspended,
            Phase::Finished(fault) => Resumed::Finished(fault.take()),
            Phase::Running => unreachable!("fiber gate left in running phase"),
        }
    }

    /// Fiber side: sleep until the dispatcher hands the baton over.
    fn wait_for_turn(&self) {
        let mut phase = self.phase.lock().expect(POISONED_GATE);
        while !matches!(*phase, Phase::Running) {
            phase = self.signal.wait(phase).expect(POISONED_GATE);
        }
    }

    /// Fiber side: give the baton back and wait for the next turn.
    fn suspend(&self) {
        {
            let mut phase = self.phase.lock().expect(POISONED_GATE);
            *phase = Phase::Parked;
            self.signal.notify_all();
        }
        self.wait_for_turn();
    }

    /// Fiber side: terminal baton return.
    fn finish(&self, fault: Option<Fault>) {
        let mut phase = self.phase.lock().expect(POISONED_GATE);
        *phase = Phase::Finished(fault);
        self.signal.notify_all();
    }
}

thread_local! {
    static ACTIVE_FIBER: RefCell<Option<Arc<Fiber>>> = RefCell::new(None);
}

/// Suspends the calling fiber. Returns false when the caller is not a fiber.
pub(crate) fn fiber_suspend() -> bool {
    let fiber = ACTIVE_FIBER.with(|cell| cell.borrow().clone());
    match fiber {
        Some(fiber) => {
            fiber.suspend();
            true
        }
        None => false,
    }
}

struct RunQueue {
    fibers: Vec<Arc<Fiber>>,
    cursor: usize,
}

/// Cooperative round-robin scheduler.
///
/// `start` turns the calling thread into the dispatcher and returns once the fiber
/// list drains. A fiber completing with [`Error::OwnerTerminated`] is absorbed so the
/// death of a root does not tear down unrelated peers; any other error terminates the
/// dispatcher and is returned from `start`, and a fiber panic is propagated on the
/// dispatcher thread.
pub struct FiberScheduler {
    run_queue: Mutex<RunQueue>,
}

impl FiberScheduler {
    pub fn new() -> Self {
        Self {
            run_queue: Mutex::new(RunQueue {
                fibers: Vec::new(),
                cursor: 0,
            }),
        }
    }

    fn enqueue(&self, body: Body) {
        let fiber = Arc::new(Fiber::new());
        let handle = Arc::clone(&fiber);
        thread::Builder::new()
            .name("missive-fiber".into())
            .spawn(move || {
                handle.wait_for_turn();
                ACTIVE_FIBER.with(|cell| *cell.borrow_mut() = Some(Arc::clone(&handle)));
                let outcome = catch_unwind(AssertUnwindSafe(body));
                ACTIVE_FIBER.with(|cell| *cell.borrow_mut() = None);
                let fault = match outcome {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) => Some(Fault::Failed(err)),
                    Err(payload) => Some(Fault::Panicked(payload)),
                };
                handle.finish(fault);
            })
            .expect("failed to spawn backing thread for fiber");
        let mut queue = self.run_queue.lock().expect(POISONED_RUN_QUEUE);
        queue.fibers.push(fiber);
    }

    fn remove(&self, fiber: &Arc<Fiber>) {
        let mut queue = self.run_queue.lock().expect(POISONED_RUN_QUEUE);
        if let Some(index) = queue.fibers.iter().position(|f| Arc::ptr_eq(f, fiber)) {
            queue.fibers.remove(index);
            if index < queue.cursor {
                queue.cursor -= 1;
            }
        }
        if queue.cursor >= queue.fibers.len() {
            queue.cursor = 0;
        }
    }

    fn dispatch(&self) -> Result<(), Error> {
        loop {
            let fiber = {
                let mut queue = self.run_queue.lock().expect(POISONED_RUN_QUEUE);
                if queue.fibers.is_empty() {
                    return Ok(());
                }
                if queue.cursor >= queue.fibers.len() {
                    queue.cursor = 0;
                }
                Arc::clone(&queue.fibers[queue.cursor])
            };
            match fiber.resume() {
                Resumed::Suspended => {
                    let mut queue = self.run_queue.lock().expect(POISONED_RUN_QUEUE);
                    if !queue.fibers.is_empty() {
                        queue.cursor = (queue.cursor + 1) % queue.fibers.len();
                    }
                }
                Resumed::Finished(fault) => {
                    self.remove(&fiber);
                    match fault {
                        None => {}
                        Some(Fault::Failed(Error::OwnerTerminated(_))) => {
                            log::trace!("dispatcher absorbed an owner-terminated fiber");
                        }
                        Some(Fault::Failed(err)) => return Err(err),
                        Some(Fault::Panicked(payload)) => resume_unwind(payload),
                    }
                }
            }
        }
    }
}

impl Scheduler for FiberScheduler {
    fn start(self: Arc<Self>, body: Body) -> Result<(), Error> {
        self.enqueue(body);
        self.dispatch()
    }

    fn spawn(&self, body: Body) {
        self.enqueue(body);
        // One yield so the spawner does not dominate the new fiber.
        self.yield_now();
    }

    fn yield_now(&self) {
        fiber_suspend();
    }

    fn new_condition(&self) -> Box<dyn Condition> {
        Box::new(FiberCondition {
            epoch: AtomicU64::new(0),
        })
    }
}

/// Condition analog for fibers: waiting releases the mailbox mutex and yields in a
/// loop until the notification epoch advances, then relocks. Notifying only bumps the
/// epoch; the waiter's own yield loop observes it on its next turn, so no context is
/// ever switched while the mutex is held.
struct FiberCondition {
    epoch: AtomicU64,
}

impl Condition for FiberCondition {
    fn wait<'a>(
        &self,
        lock: &'a Mutex<SharedState>,
        guard: MutexGuard<'a, SharedState>,
    ) -> MutexGuard<'a, SharedState> {
        let seen = self.epoch.load(Ordering::Acquire);
        drop(guard);
        while self.epoch.load(Ordering::Acquire) == seen {
            if !fiber_suspend() {
                // Foreign (non-fiber) waiters have no baton to yield.
                thread::yield_now();
            }
        }
        lock.lock().expect(POISONED_SHARED_MUTEX)
    }

    fn wait_deadline<'a>(
        &self,
        lock: &'a Mutex<SharedState>,
        guard: MutexGuard<'a, SharedState>,
        deadline: Instant,
    ) -> (MutexGuard<'a, SharedState>, bool) {
        let seen = self.epoch.load(Ordering::Acquire);
        drop(guard);
        let mut timed_out = false;
        loop {
            if self.epoch.load(Ordering::Acquire) != seen {
                break;
            }
            if Instant::now() >= deadline {
                timed_out = true;
                break;
            }
            if !fiber_suspend() {
                thread::yield_now();
            }
        }
        (lock.lock().expect(POISONED_SHARED_MUTEX), timed_out)
    }

    fn notify_one(&self) {
        self.epoch.fetch_add(1, Ordering::Release);
    }

    fn notify_all(&self) {
        self.epoch.fetch_add(1, Ordering::Release);
    }
}
