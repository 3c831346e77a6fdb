//! Pluggable execution substrates for logical threads.
//!
//! A [`Scheduler`] decides how logical threads are created and interleaved. Two
//! reference implementations ship with the crate: [`kernel::ThreadScheduler`] (one OS
//! thread per spawn, preemptive) and [`fiber::FiberScheduler`] (cooperative
//! round-robin, exactly one logical thread running at a time).
//!
//! Scheduler selection is a context value, not a process global: every thread carries
//! a current scheduler inherited by its spawnees, installed for a subtree via
//! [`run`](crate::run). Threads that never opted in fall back to a shared default
//! [`ThreadScheduler`](kernel::ThreadScheduler).

pub mod fiber;
pub mod kernel;

use std::cell::RefCell;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Instant;

use crate::error::Error;
use crate::mailbox::SharedState;

/// A wrapped logical-thread body, identity and cleanup already attached.
pub type Body = Box<dyn FnOnce() -> Result<(), Error> + Send + 'static>;

/// Condition-variable analog over a mailbox's shared mutex.
///
/// The point of the abstraction: under a cooperative scheduler a plain
/// [`std::sync::Condvar`] wait would block the only running context, so waiting has
/// to release the mutex and hand control back to the dispatcher instead.
pub trait Condition: Send + Sync {
    /// Releases `guard`, suspends until notified, relocks.
    fn wait<'a>(
        &self,
        lock: &'a Mutex<SharedState>,
        guard: MutexGuard<'a, SharedState>,
    ) -> MutexGuard<'a, SharedState>;

    /// Like [`wait`](Condition::wait) with an absolute deadline. The flag reports
    /// expiry; spurious wakeups are allowed either way.
    fn wait_deadline<'a>(
        &self,
        lock: &'a Mutex<SharedState>,
        guard: MutexGuard<'a, SharedState>,
        deadline: Instant,
    ) -> (MutexGuard<'a, SharedState>, bool);

    fn notify_one(&self);

    fn notify_all(&self);
}

/// The contract every execution substrate satisfies.
pub trait Scheduler: Send + Sync {
    /// Runs `body` as the root logical thread and returns once every logical thread
    /// created under this scheduler has terminated.
    fn start(self: Arc<Self>, body: Body) -> Result<(), Error>;

    /// Creates a logical thread running `body`. The body installs its own per-thread
    /// state before user code observes it.
    fn spawn(&self, body: Body);

    /// Cooperative hand-off; a no-op on preemptive substrates.
    fn yield_now(&self);

    /// A condition variable that suspends correctly under this scheduler.
    fn new_condition(&self) -> Box<dyn Condition>;
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<dyn Scheduler>>> = RefCell::new(None);
}

fn default_scheduler() -> Arc<dyn Scheduler> {
    static DEFAULT: OnceLock<Arc<kernel::ThreadScheduler>> = OnceLock::new();
    let sched = DEFAULT
        .get_or_init(|| Arc::new(kernel::ThreadScheduler::new()))
        .clone();
    sched
}

/// The scheduler governing the calling thread.
pub(crate) fn current() -> Arc<dyn Scheduler> {
    CURRENT
        .with(|cell| cell.borrow().clone())
        .unwrap_or_else(default_scheduler)
}

/// Installs `sched` for the calling thread, returning the previous value.
pub(crate) fn set_current(sched: Option<Arc<dyn Scheduler>>) -> Option<Arc<dyn Scheduler>> {
    CURRENT.with(|cell| cell.replace(sched))
}

/// Cooperative nudge through whatever scheduler governs the calling thread.
pub(crate) fn yield_now() {
    let sched = CURRENT.with(|cell| cell.borrow().clone());
    if let Some(sched) = sched {
        sched.yield_now();
    }
}
