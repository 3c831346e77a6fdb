//! Spawn, link, and receive: the crate's front door.
//!
//! Every participating thread owns a [`ThreadInfo`] holder in a thread-local. The
//! holder records the thread's own handle, its owner, and its link set, and its
//! `Drop` impl performs the teardown protocol, so even foreign threads that only
//! ever called [`this_tid`] notify their peers when they exit. Spawned logical
//! threads additionally tear down eagerly through a guard inside their entry
//! wrapper, which makes the `LinkDead` notifications visible before the scheduler
//! considers the thread finished.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::dispatch::Pattern;
use crate::error::Error;
use crate::mailbox::{Mailbox, OnCrowding};
use crate::message::Msg;
use crate::registry;
use crate::scheduler::{self, Body, Scheduler};
use crate::tid::Tid;

//=================
// Per-thread state

pub(crate) struct ThreadInfo {
    pub(crate) ident: Option<Tid>,
    pub(crate) owner: Option<Tid>,
    /// Peer handle to `link_back`: whether this side wants a termination event.
    pub(crate) links: HashMap<Tid, bool>,
}

impl ThreadInfo {
    fn new() -> Self {
        Self {
            ident: None,
            owner: None,
            links: HashMap::new(),
        }
    }

    /// The teardown protocol: close the mailbox (sweeping undrained link deaths),
    /// notify every link and the owner, release registered names. Idempotent, and
    /// unconditional: failures to notify dead peers are swallowed.
    fn dismantle(&mut self) {
        let Some(ident) = self.ident.take() else {
            self.owner = None;
            self.links.clear();
            return;
        };
        let mut owner = self.owner.take();
        let mut links = std::mem::take(&mut self.links);

        ident.mailbox().close(&mut owner, &mut links);
        for (peer, _link_back) in links {
            let _ = peer.send_msg(Msg::link_dead(ident.clone()));
        }
        if let Some(owner) = owner {
            let _ = owner.send_msg(Msg::link_dead(ident.clone()));
        }
        registry::unregister_tid(&ident);
        log::trace!("dismantled logical thread {ident:?}");
    }
}

impl Drop for ThreadInfo {
    fn drop(&mut self) {
        self.dismantle();
    }
}

thread_local! {
    static INFO: RefCell<ThreadInfo> = RefCell::new(ThreadInfo::new());
}

/// Grants short-lived access to the calling thread's info. Callers must not invoke
/// user handlers or re-enter the runtime while inside `f`.
pub(crate) fn with_info<R>(f: impl FnOnce(&mut ThreadInfo) -> R) -> R {
    INFO.with(|cell| f(&mut cell.borrow_mut()))
}

fn new_mailbox_tid(sched: &Arc<dyn Scheduler>) -> Tid {
    Tid::new(Mailbox::new(sched.new_condition(), sched.new_condition()))
}

//=================
// Identity

/// The calling thread's own handle, creating its mailbox on first use.
pub fn this_tid() -> Tid {
    let sched = scheduler::current();
    with_info(|info| {
        if info.ident.is_none() {
            info.ident = Some(new_mailbox_tid(&sched));
        }
        info.ident
            .clone()
            .expect("thread identity initialized above")
    })
}

/// The handle of the thread that spawned the caller.
pub fn owner_tid() -> Result<Tid, Error> {
    with_info(|info| info.owner.clone()).ok_or(Error::NoOwner)
}

/// Cooperative hand-off to the scheduler governing the calling thread; a no-op under
/// preemptive scheduling.
pub fn yield_now() {
    scheduler::yield_now();
}

//=================
// Spawn / lifecycle

/// Spawns a logical thread running `body` and returns its handle.
///
/// The spawner becomes the child's owner: when the spawner terminates, a subsequent
/// `receive` in the child surfaces [`Error::OwnerTerminated`] unless a pattern arm
/// accepts the [`OwnerTerminated`](crate::OwnerTerminated) event.
///
/// The `Send + 'static` bound is the isolation check; captures that alias another
/// thread's mutable state are rejected at compile time:
///
/// ```compile_fail
/// use std::rc::Rc;
/// let local = Rc::new(1);
/// missive::spawn(move || {
///     drop(local); // Rc is not Send
///     Ok(())
/// });
/// ```
pub fn spawn<F>(body: F) -> Tid
where
    F: FnOnce() -> Result<(), Error> + Send + 'static,
{
    spawn_impl(false, body)
}

/// Like [`spawn`], additionally asking for a [`LinkTerminated`](crate::LinkTerminated)
/// event in the spawner when the child terminates.
pub fn spawn_linked<F>(body: F) -> Tid
where
    F: FnOnce() -> Result<(), Error> + Send + 'static,
{
    spawn_impl(true, body)
}

fn spawn_impl<F>(link_back: bool, body: F) -> Tid
where
    F: FnOnce() -> Result<(), Error> + Send + 'static,
{
    let sched = scheduler::current();
    let child = new_mailbox_tid(&sched);
    let parent = this_tid();
    let entry = entry_wrapper(Arc::clone(&sched), child.clone(), Some(parent), body);
    // Recorded before the scheduler sees the child, so a child that dies instantly
    // still finds its link entry in place.
    with_info(|info| info.links.insert(child.clone(), link_back));
    sched.spawn(entry);
    child
}

/// Runs `body` as the root logical thread of `sched` and returns once every logical
/// thread created under it has terminated.
pub fn run<F>(sched: Arc<dyn Scheduler>, body: F) -> Result<(), Error>
where
    F: FnOnce() -> Result<(), Error> + Send + 'static,
{
    let root = new_mailbox_tid(&sched);
    let entry = entry_wrapper(Arc::clone(&sched), root, None, body);
    sched.start(entry)
}

struct TeardownGuard;

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        INFO.with(|cell| cell.borrow_mut().dismantle());
    }
}

fn entry_wrapper<F>(sched: Arc<dyn Scheduler>, ident: Tid, owner: Option<Tid>, body: F) -> Body
where
    F: FnOnce() -> Result<(), Error> + Send + 'static,
{
    Box::new(move || {
        let prev = scheduler::set_current(Some(sched));
        with_info(|info| {
            info.ident = Some(ident);
            info.owner = owner;
        });
        let result = {
            // Tears down on return and panic alike.
            let _teardown = TeardownGuard;
            body()
        };
        scheduler::set_current(prev);
        result
    })
}

//=================
// Receive

/// Blocks until one buffered or incoming message is accepted by `pattern`.
///
/// Messages that match no arm stay buffered and keep their order. Termination events
/// surface here: an unaccepted owner death is [`Error::OwnerTerminated`], an
/// unaccepted linked death is [`Error::LinkTerminated`], and an unaccepted priority
/// message is [`Error::PriorityMessage`].
pub fn receive(pattern: Pattern<'_>) -> Result<(), Error> {
    let me = this_tid();
    let mut pattern = pattern;
    me.mailbox().get(&mut pattern, None).map(|_| ())
}

/// Like [`receive`] with a bound: returns `Ok(false)` if nothing was accepted before
/// `timeout` elapsed. `Duration::ZERO` scans once without waiting.
pub fn receive_timeout(timeout: Duration, pattern: Pattern<'_>) -> Result<bool, Error> {
    let me = this_tid();
    let mut pattern = pattern;
    me.mailbox().get(&mut pattern, Some(timeout))
}

/// Receives exactly one message of type `T` (a tuple type for multi-value messages).
///
/// Any other standard message is consumed and reported as
/// [`Error::MessageMismatch`]; termination events surface as their own errors.
pub fn receive_only<T: Send + 'static>() -> Result<T, Error> {
    let me = this_tid();
    let mut slot: Option<T> = None;
    {
        let mut pattern = Pattern::only(&mut slot);
        me.mailbox().get(&mut pattern, None)?;
    }
    Ok(slot.expect("matched receive_only arm fills the slot"))
}

/// Bounds the standard lane of `tid`'s mailbox to `max_msgs` messages (0 removes the
/// bound) and selects what producers do on overflow. Priority and control messages
/// are never subject to the bound.
pub fn set_max_mailbox_size(tid: &Tid, max_msgs: usize, on_crowding: OnCrowding) {
    tid.mailbox().set_max(max_msgs, on_crowding);
}

#[cfg(test)]
mod tests {
    use std::any::type_name;
    use std::sync::mpsc;
    use std::time::Instant;

    use super::*;
    use crate::error::{LinkTerminated, OwnerTerminated};
    use crate::scheduler::fiber::FiberScheduler;

    //=================
    // Seed scenarios, kernel-thread substrate

    #[test]
    fn echo_round_trip() {
        let child = spawn(|| {
            let owner = owner_tid()?;
            for _ in 0..2 {
                let reply_int = owner.clone();
                let reply_str = owner.clone();
                receive(
                    Pattern::new()
                        .on(move |i: i32| {
                            reply_int.send(i * 2).expect("reply");
                        })
                        .on(move |s: String| {
                            reply_str.send(format!("{s}{s}")).expect("reply");
                        }),
                )?;
            }
            Ok(())
        });
        child.send(42i32).expect("send");
        child.send("hi".to_string()).expect("send");
        assert_eq!(receive_only::<i32>().expect("echo"), 84);
        assert_eq!(receive_only::<String>().expect("echo"), "hihi");
    }

    #[test]
    fn type_mismatch_reports_both_type_names() {
        let child = spawn(|| {
            let owner = owner_tid()?;
            let err = receive_only::<String>().expect_err("an i32 is waiting");
            owner.send(err.to_string())?;
            Ok(())
        });
        child.send(1i32).expect("send");
        let relayed = receive_only::<String>().expect("relay");
        assert_eq!(
            relayed,
            format!(
                "unexpected message type: expected `{}`, got `{}`",
                type_name::<String>(),
                type_name::<i32>()
            )
        );
    }

    #[test]
    fn priority_message_overtakes_standard_backlog() {
        let (all_sent, sendable) = mpsc::channel::<()>();
        let child = spawn(move || {
            let owner = owner_tid()?;
            // Wait outside the mailbox until the backlog is fully queued.
            sendable.recv().expect("gate");
            for _ in 0..3 {
                let record_int = owner.clone();
                let record_str = owner.clone();
                receive(
                    Pattern::new()
                        .on(move |i: i32| record_int.send(format!("i:{i}")).expect("record"))
                        .on(move |s: String| record_str.send(format!("s:{s}")).expect("record")),
                )?;
            }
            Ok(())
        });
        child.send("a".to_string()).expect("send");
        child.send("b".to_string()).expect("send");
        child.send_priority(99i32).expect("priority send");
        all_sent.send(()).expect("gate");

        let order: Vec<String> = (0..3)
            .map(|_| receive_only::<String>().expect("record"))
            .collect();
        assert_eq!(order, vec!["i:99", "s:a", "s:b"]);
    }

    #[test]
    fn owner_termination_reaches_the_child() {
        let collector = this_tid();
        spawn(move || {
            let _child = spawn(move || {
                let outcome = receive(Pattern::new().on(|_: i32| {}));
                let observed = matches!(outcome, Err(Error::OwnerTerminated(_)));
                collector.send(observed)?;
                Ok(())
            });
            // Exit immediately; the child never gets its i32.
            Ok(())
        });
        assert!(receive_only::<bool>().expect("verdict"));
    }

    #[test]
    fn bounded_mailbox_blocks_until_drained() {
        let child = spawn(|| {
            let owner = owner_tid()?;
            for _ in 0..5 {
                let v = receive_only::<i32>()?;
                owner.send(v)?;
            }
            Ok(())
        });
        set_max_mailbox_size(&child, 2, OnCrowding::Block);
        for i in 0..5i32 {
            child.send(i).expect("send blocks, never fails");
        }
        for i in 0..5i32 {
            assert_eq!(receive_only::<i32>().expect("echo"), i);
        }
    }

    //=================
    // Seed scenario 6: cooperative-scheduler parity

    #[test]
    fn fiber_parity_echo() {
        run(Arc::new(FiberScheduler::new()), || {
            let child = spawn(|| {
                let owner = owner_tid()?;
                for _ in 0..2 {
                    let reply_int = owner.clone();
                    let reply_str = owner.clone();
                    receive(
                        Pattern::new()
                            .on(move |i: i32| reply_int.send(i * 2).expect("reply"))
                            .on(move |s: String| {
                                reply_str.send(format!("{s}{s}")).expect("reply")
                            }),
                    )?;
                }
                Ok(())
            });
            child.send(42i32)?;
            child.send("hi".to_string())?;
            assert_eq!(receive_only::<i32>()?, 84);
            assert_eq!(receive_only::<String>()?, "hihi");
            Ok(())
        })
        .expect("run");
    }

    #[test]
    fn fiber_parity_priority_overtake() {
        run(Arc::new(FiberScheduler::new()), || {
            // The child blocks in receive before any send happens; all three sends
            // below complete without a suspension point, so the first drain sees the
            // full backlog at once.
            let child = spawn(|| {
                let owner = owner_tid()?;
                for _ in 0..3 {
                    let record_int = owner.clone();
                    let record_str = owner.clone();
                    receive(
                        Pattern::new()
                            .on(move |i: i32| record_int.send(format!("i:{i}")).expect("record"))
                            .on(move |s: String| {
                                record_str.send(format!("s:{s}")).expect("record")
                            }),
                    )?;
                }
                Ok(())
            });
            child.send("a".to_string())?;
            child.send("b".to_string())?;
            child.send_priority(99i32)?;
            let order: Vec<String> = (0..3)
                .map(|_| receive_only::<String>().expect("record"))
                .collect();
            assert_eq!(order, vec!["i:99", "s:a", "s:b"]);
            Ok(())
        })
        .expect("run");
    }

    #[test]
    fn fiber_parity_mismatch() {
        run(Arc::new(FiberScheduler::new()), || {
            let child = spawn(|| {
                let owner = owner_tid()?;
                let err = receive_only::<String>().expect_err("an i32 is waiting");
                owner.send(err.to_string())?;
                Ok(())
            });
            child.send(1i32)?;
            let relayed = receive_only::<String>()?;
            assert_eq!(
                relayed,
                format!(
                    "unexpected message type: expected `{}`, got `{}`",
                    type_name::<String>(),
                    type_name::<i32>()
                )
            );
            Ok(())
        })
        .expect("run");
    }

    #[test]
    fn fiber_parity_bounded_mailbox() {
        run(Arc::new(FiberScheduler::new()), || {
            let child = spawn(|| {
                let owner = owner_tid()?;
                for _ in 0..5 {
                    let v = receive_only::<i32>()?;
                    owner.send(v)?;
                }
                Ok(())
            });
            set_max_mailbox_size(&child, 2, OnCrowding::Block);
            for i in 0..5i32 {
                child.send(i)?;
            }
            for i in 0..5i32 {
                assert_eq!(receive_only::<i32>()?, i);
            }
            Ok(())
        })
        .expect("run");
    }

    //=================
    // Lifecycle details

    #[test]
    fn owner_of_spawned_thread_is_the_spawner() {
        let me = this_tid();
        spawn(|| {
            let owner = owner_tid()?;
            owner.send(owner.clone())?;
            Ok(())
        });
        assert_eq!(receive_only::<Tid>().expect("owner handle"), me);
    }

    #[test]
    fn plain_thread_has_no_owner() {
        assert!(matches!(owner_tid(), Err(Error::NoOwner)));
    }

    #[test]
    fn linked_child_termination_is_matchable() {
        let child = spawn_linked(|| Ok(()));
        let mut observed = None;
        receive(Pattern::new().on(|event: LinkTerminated| observed = Some(event.tid)))
            .expect("receive");
        assert_eq!(observed, Some(child));
    }

    #[test]
    fn unhandled_link_termination_is_an_error() {
        let child = spawn_linked(|| Ok(()));
        let err = receive(Pattern::new().on(|_: i32| {})).expect_err("link death surfaces");
        match err {
            Error::LinkTerminated(event) => assert_eq!(event.tid, child),
            other => panic!("expected LinkTerminated, got {other}"),
        }
    }

    #[test]
    fn owner_termination_event_is_matchable() {
        let collector = this_tid();
        spawn(move || {
            let _child = spawn(move || {
                let mut observed = None;
                receive(Pattern::new().on(|event: OwnerTerminated| observed = Some(event.tid)))?;
                collector.send(observed.is_some())?;
                Ok(())
            });
            Ok(())
        });
        assert!(receive_only::<bool>().expect("verdict"));
    }

    #[test]
    fn plain_spawn_death_is_absorbed_silently() {
        let child = spawn(|| Ok(()));
        let _ = child;
        // The LinkDead notice is consumed without an event; only the i32 matches.
        let me = this_tid();
        me.send(5i32).expect("send");
        let mut got = None;
        receive(Pattern::new().on(|v: i32| got = Some(v))).expect("receive");
        assert_eq!(got, Some(5));
    }

    #[test]
    fn receive_timeout_expires_on_an_empty_mailbox() {
        let started = Instant::now();
        let matched = receive_timeout(Duration::from_millis(50), Pattern::new().on(|_: i32| {}))
            .expect("receive_timeout");
        assert!(!matched);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    #[should_panic(expected = "receive called recursively")]
    fn reentrant_receive_is_rejected() {
        let me = this_tid();
        me.send(1i32).expect("send");
        let _ = receive(Pattern::new().on(|_: i32| {
            let _ = receive_timeout(Duration::ZERO, Pattern::new().on(|_: i32| {}));
        }));
    }

    #[test]
    fn tuple_messages_dispatch_on_the_tuple_type() {
        let me = this_tid();
        me.send((1u8, "pair".to_string())).expect("send");
        let (n, s) = receive_only::<(u8, String)>().expect("tuple");
        assert_eq!((n, s.as_str()), (1, "pair"));
    }
}
