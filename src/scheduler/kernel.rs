//! The preemptive reference scheduler: one OS thread per logical thread.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::error::{Error, POISONED_SHARED_MUTEX};
use crate::mailbox::SharedState;

use super::{Body, Condition, Scheduler};

const POISONED_HANDLE_LIST: &str = "poisoned thread handle list";

/// Spawns each logical thread on its own kernel thread.
///
/// [`start`](Scheduler::start) runs the root body inline on the calling thread, then
/// joins every thread spawned under this scheduler before returning. `yield_now` is
/// empty; the OS preempts. This is also the substrate behind the implicit default
/// used by [`spawn`](crate::spawn) when no scheduler was installed.
pub struct ThreadScheduler {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadScheduler {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(Vec::new()),
        }
    }
}

impl Scheduler for ThreadScheduler {
    fn start(self: Arc<Self>, body: Body) -> Result<(), Error> {
        let me: Arc<dyn Scheduler> = self.clone();
        let prev = super::set_current(Some(me));
        let result = body();
        // Threads joined here may spawn more; drain until the list stays empty.
        loop {
            let handle = self.handles.lock().expect(POISONED_HANDLE_LIST).pop();
            match handle {
                Some(handle) => {
                    let _ = handle.join();
                }
                None => break,
            }
        }
        super::set_current(prev);
        result
    }

    fn spawn(&self, body: Body) {
        // Keep the handle list from growing without bound when start is never used.
        self.handles
            .lock()
            .expect(POISONED_HANDLE_LIST)
            .retain(|handle| !handle.is_finished());
        let spawned = thread::Builder::new()
            .name("missive-thread".into())
            .spawn(move || match body() {
                Ok(()) => {}
                Err(Error::OwnerTerminated(_)) => {
                    log::trace!("logical thread exited after owner termination");
                }
                Err(err) => log::warn!("logical thread exited with error: {err}"),
            })
            .expect("failed to spawn OS thread for logical thread");
        self.handles
            .lock()
            .expect(POISONED_HANDLE_LIST)
            .push(spawned);
    }

    fn yield_now(&self) {}

    fn new_condition(&self) -> Box<dyn Condition> {
        Box::new(ThreadCondition {
            condvar: Condvar::new(),
        })
    }
}

/// Plain OS condition variable.
struct ThreadCondition {
    condvar: Condvar,
}

impl Condition for ThreadCondition {
    fn wait<'a>(
        &self,
        _lock: &'a Mutex<SharedState>,
        guard: MutexGuard<'a, SharedState>,
    ) -> MutexGuard<'a, SharedState> {
        self.condvar.wait(guard).expect(POISONED_SHARED_MUTEX)
    }

    fn wait_deadline<'a>(
        &self,
        _lock: &'a Mutex<SharedState>,
        guard: MutexGuard<'a, SharedState>,
        deadline: Instant,
    ) -> (MutexGuard<'a, SharedState>, bool) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let (guard, result) = self
            .condvar
            .wait_timeout(guard, remaining)
            .expect(POISONED_SHARED_MUTEX);
        (guard, result.timed_out())
    }

    fn notify_one(&self) {
        self.condvar.notify_one();
    }

    fn notify_all(&self) {
        self.condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{receive_only, run, spawn, this_tid};

    #[test]
    fn start_joins_every_spawned_thread() {
        let sched = Arc::new(ThreadScheduler::new());
        let flag = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = Arc::clone(&flag);
        run(sched, move || {
            for _ in 0..4 {
                let seen = Arc::clone(&seen);
                spawn(move || {
                    std::thread::sleep(Duration::from_millis(10));
                    seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(())
                });
            }
            Ok(())
        })
        .expect("run");
        assert_eq!(flag.load(std::sync::atomic::Ordering::SeqCst), 4);
    }

    #[test]
    fn spawned_threads_run_in_parallel() {
        let me = this_tid();
        for i in 0..3i32 {
            let me = me.clone();
            spawn(move || {
                me.send(i)?;
                Ok(())
            });
        }
        let mut seen = [false; 3];
        for _ in 0..3 {
            let v = receive_only::<i32>().expect("receive");
            seen[v as usize] = true;
        }
        assert_eq!(seen, [true; 3]);
    }
}
