//! Per-thread message store with standard and priority lanes.
//!
//! A mailbox has two sides. The *shared* side is what producers touch: two lanes of
//! not-yet-drained messages guarded by one mutex, with two condition variables
//! (`put_cv` wakes the receiver, `not_full_cv` wakes blocked producers). The *local*
//! side belongs to the receiving thread alone: messages are spliced over in batches
//! and then scanned without contending with producers.
//!
//! Crowding applies to standard messages only. Producers judge fullness from
//! `local_msgs`, a snapshot of the local standard lane's length refreshed by the
//! receiver on each drain, plus the shared standard lane's length; they never touch
//! the local lanes themselves.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, TryLockError};
use std::time::{Duration, Instant};

use crate::dispatch::Pattern;
use crate::error::{Error, POISONED_SHARED_MUTEX};
use crate::message::{Msg, MsgKind};
use crate::scheduler::{self, Condition};
use crate::tid::Tid;

//=================
// Lanes

/// A message lane: FIFO order with O(1) splice and positional removal for the scan
/// cursor. Backed by the allocator rather than an intrusive free-list; see DESIGN.md.
pub(crate) struct Lane(VecDeque<Msg>);

impl Lane {
    pub(crate) fn new() -> Self {
        Self(VecDeque::new())
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn push_back(&mut self, msg: Msg) {
        self.0.push_back(msg);
    }

    pub(crate) fn pop_front(&mut self) -> Option<Msg> {
        self.0.pop_front()
    }

    /// Moves every message of `other` to the back of `self`, preserving order.
    pub(crate) fn append(&mut self, other: &mut Lane) {
        self.0.append(&mut other.0);
    }

    /// Detaches the whole lane, leaving `self` empty.
    pub(crate) fn take(&mut self) -> Lane {
        Lane(std::mem::take(&mut self.0))
    }

    pub(crate) fn remove(&mut self, index: usize) -> Option<Msg> {
        self.0.remove(index)
    }

    pub(crate) fn insert(&mut self, index: usize, msg: Msg) {
        self.0.insert(index, msg);
    }

    pub(crate) fn clear(&mut self) {
        self.0.clear();
    }
}

//=================
// Overflow policy

/// What a producer does when the standard lane is crowded.
#[derive(Clone)]
pub enum OnCrowding {
    /// Wait until the receiver drains a slot.
    Block,
    /// Fail the send with [`Error::MailboxFull`].
    Fail,
    /// Silently discard the message.
    Drop,
    /// Ask a predicate: `true` blocks, `false` drops. Called with the destination
    /// handle, outside the mailbox lock.
    Decide(Arc<dyn Fn(Tid) -> bool + Send + Sync>),
}

impl fmt::Debug for OnCrowding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnCrowding::Block => f.write_str("Block"),
            OnCrowding::Fail => f.write_str("Fail"),
            OnCrowding::Drop => f.write_str("Drop"),
            OnCrowding::Decide(_) => f.write_str("Decide(..)"),
        }
    }
}

//=================
// Mailbox state

/// Producer-visible state. Public only because scheduler conditions wait on its mutex.
#[doc(hidden)]
pub struct SharedState {
    pub(crate) std_lane: Lane,
    pub(crate) pty_lane: Lane,
    /// Producers currently asleep in `not_full_cv`.
    pub(crate) put_queue: usize,
    pub(crate) closed: bool,
    /// Receiver's local standard-lane length, snapshotted on each drain.
    pub(crate) local_msgs: usize,
    /// 0 = unbounded.
    pub(crate) max_msgs: usize,
    pub(crate) on_crowding: OnCrowding,
}

impl SharedState {
    pub(crate) fn is_crowded(&self) -> bool {
        self.max_msgs != 0 && self.max_msgs <= self.local_msgs + self.std_lane.len()
    }
}

struct LocalState {
    std_lane: Lane,
    pty_lane: Lane,
}

pub(crate) struct Mailbox {
    shared: Mutex<SharedState>,
    local: Mutex<LocalState>,
    put_cv: Box<dyn Condition>,
    not_full_cv: Box<dyn Condition>,
}

impl Mailbox {
    pub(crate) fn new(put_cv: Box<dyn Condition>, not_full_cv: Box<dyn Condition>) -> Self {
        Self {
            shared: Mutex::new(SharedState {
                std_lane: Lane::new(),
                pty_lane: Lane::new(),
                put_queue: 0,
                closed: false,
                local_msgs: 0,
                max_msgs: 0,
                on_crowding: OnCrowding::Block,
            }),
            local: Mutex::new(LocalState {
                std_lane: Lane::new(),
                pty_lane: Lane::new(),
            }),
            put_cv,
            not_full_cv,
        }
    }

    pub(crate) fn set_max(&self, max_msgs: usize, on_crowding: OnCrowding) {
        let mut shared = self.shared.lock().expect(POISONED_SHARED_MUTEX);
        shared.max_msgs = max_msgs;
        shared.on_crowding = on_crowding;
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.shared.lock().expect(POISONED_SHARED_MUTEX).closed
    }

    /// Enqueues `msg`. Priority and control messages are never subject to crowding.
    /// Sends into a closed mailbox are discarded.
    pub(crate) fn put(&self, msg: Msg, tid: &Tid) -> Result<(), Error> {
        let mut shared = self.shared.lock().expect(POISONED_SHARED_MUTEX);
        match msg.kind {
            MsgKind::Priority => {
                if shared.closed {
                    log::trace!("discarding priority message into closed mailbox {tid:?}");
                    return Ok(());
                }
                shared.pty_lane.push_back(msg);
                self.put_cv.notify_one();
                Ok(())
            }
            MsgKind::LinkDead => {
                if shared.closed {
                    log::trace!("discarding control message into closed mailbox {tid:?}");
                    return Ok(());
                }
                shared.std_lane.push_back(msg);
                self.put_cv.notify_one();
                Ok(())
            }
            MsgKind::Standard => {
                let mut msg = Some(msg);
                loop {
                    if shared.closed {
                        log::trace!("discarding message into closed mailbox {tid:?}");
                        return Ok(());
                    }
                    if !shared.is_crowded() {
                        shared
                            .std_lane
                            .push_back(msg.take().expect("message enqueued twice"));
                        self.put_cv.notify_one();
                        return Ok(());
                    }
                    match shared.on_crowding.clone() {
                        OnCrowding::Block => {}
                        OnCrowding::Fail => return Err(Error::MailboxFull(tid.clone())),
                        OnCrowding::Drop => {
                            log::trace!("dropping message for crowded mailbox {tid:?}");
                            return Ok(());
                        }
                        OnCrowding::Decide(decide) => {
                            drop(shared);
                            let block = decide(tid.clone());
                            shared = self.shared.lock().expect(POISONED_SHARED_MUTEX);
                            if !block {
                                log::trace!("predicate dropped message for crowded mailbox {tid:?}");
                                return Ok(());
                            }
                            // Space may have opened while the predicate ran.
                            if !shared.is_crowded() {
                                continue;
                            }
                        }
                    }
                    shared.put_queue += 1;
                    shared = self.not_full_cv.wait(&self.shared, shared);
                    shared.put_queue -= 1;
                }
            }
        }
    }

    /// Blocks until `pattern` extracts one message, or until `timeout` expires.
    ///
    /// Returns `Ok(true)` on a match, `Ok(false)` on expiry. `Duration::ZERO` means a
    /// single scan with no wait. The walk over buffered messages, control-event
    /// synthesis, and handler invocation are all delegated to the pattern; handlers
    /// always run with the shared mutex released.
    ///
    /// # Panics
    ///
    /// When called from inside one of its own handlers; receive is not reentrant.
    pub(crate) fn get(
        &self,
        pattern: &mut Pattern<'_>,
        timeout: Option<Duration>,
    ) -> Result<bool, Error> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut local = match self.local.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                panic!("receive called recursively from a message handler")
            }
            Err(TryLockError::Poisoned(_)) => panic!("poisoned mailbox local mutex"),
        };

        // Pass over what previous drains left behind: priority lane first, always.
        if pattern.take_priority(&mut local.pty_lane)? {
            return Ok(true);
        }
        if pattern.scan(&mut local.std_lane)? {
            return Ok(true);
        }

        loop {
            // Cooperative nudge so a busy receiver cannot starve its peers.
            scheduler::yield_now();

            let mut shared = self.shared.lock().expect(POISONED_SHARED_MUTEX);
            shared.local_msgs = local.std_lane.len();
            while shared.std_lane.is_empty() && shared.pty_lane.is_empty() {
                if shared.put_queue > 0 && !shared.is_crowded() {
                    self.not_full_cv.notify_all();
                }
                shared = match deadline {
                    None => self.put_cv.wait(&self.shared, shared),
                    Some(deadline) => {
                        if Instant::now() >= deadline {
                            return Ok(false);
                        }
                        let (guard, _timed_out) =
                            self.put_cv.wait_deadline(&self.shared, shared, deadline);
                        guard
                    }
                };
            }

            local.pty_lane.append(&mut shared.pty_lane);
            let mut arrived = shared.std_lane.take();
            drop(shared);

            if !local.pty_lane.is_empty() {
                local.std_lane.append(&mut arrived);
                if pattern.take_priority(&mut local.pty_lane)? {
                    return Ok(true);
                }
                continue;
            }
            let local = &mut *local;
            if pattern.scan_arrived(&mut arrived, &mut local.std_lane)? {
                return Ok(true);
            }
        }
    }

    /// Closes the mailbox: undrained `LinkDead` messages are swept into the caller's
    /// link bookkeeping, remaining content is discarded, and blocked producers are
    /// woken so they observe the closure. Idempotent.
    pub(crate) fn close(&self, owner: &mut Option<Tid>, links: &mut HashMap<Tid, bool>) {
        let mut local = match self.local.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut shared = self.shared.lock().expect(POISONED_SHARED_MUTEX);
        if shared.closed {
            return;
        }
        shared.closed = true;

        let mut swept = local.std_lane.take();
        swept.append(&mut shared.std_lane);
        local.pty_lane.clear();
        shared.pty_lane.clear();
        self.not_full_cv.notify_all();
        drop(shared);
        drop(local);

        while let Some(msg) = swept.pop_front() {
            if msg.kind != MsgKind::LinkDead {
                continue;
            }
            if let Ok(tid) = msg.payload.downcast::<Tid>() {
                links.remove(&tid);
                if owner.as_ref() == Some(&tid) {
                    *owner = None;
                }
            }
        }
    }
}
