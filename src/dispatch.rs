//! The receive engine: first-match dispatch over an ordered arm list.
//!
//! A [`Pattern`] is a callback table keyed by dynamic type identity. For every
//! buffered message the arms are walked in declaration order; the first arm whose
//! type accepts the payload fires. Boolean arms may refuse a payload they matched,
//! which continues the walk as if the types had not matched; the message then stays
//! buffered. A final catch-all arm sees every payload and therefore has to be last.
//!
//! `LinkDead` control messages never reach user arms directly. They prune the
//! caller's link and owner bookkeeping and, where the relationship asks for it, are
//! re-dispatched as typed [`OwnerTerminated`] / [`LinkTerminated`] events that
//! patterns can match like any user type; unaccepted events surface as errors.

use std::any::{type_name, TypeId};

use crate::error::{Error, LinkTerminated, OwnerTerminated};
use crate::mailbox::Lane;
use crate::message::{Msg, MsgKind, Variant};
use crate::runtime;
use crate::tid::Tid;

enum ArmBody<'a> {
    /// Void handler: consumes the payload.
    Fire(Box<dyn FnMut(Variant) + 'a>),
    /// Boolean handler: borrows the payload, `false` refuses it.
    Test(Box<dyn FnMut(&Variant) -> bool + 'a>),
    /// Catch-all: consumes any payload.
    Any(Box<dyn FnMut(Variant) + 'a>),
}

struct Arm<'a> {
    type_id: Option<TypeId>,
    body: ArmBody<'a>,
}

enum Walk {
    Matched,
    Unmatched(Variant),
}

pub(crate) enum Outcome {
    /// A handler accepted the message.
    Matched,
    /// A control message was absorbed; keep scanning.
    Consumed,
    /// Nobody accepted; the message goes back where it came from.
    Unmatched(Msg),
}

/// An ordered list of typed receive arms.
///
/// ```
/// use missive::{receive, Pattern};
///
/// let me = missive::this_tid();
/// me.send(3i32).unwrap();
/// let mut doubled = 0;
/// receive(
///     Pattern::new()
///         .on(|n: i32| doubled = n * 2)
///         .on(|s: String| println!("{s}")),
/// )
/// .unwrap();
/// assert_eq!(doubled, 6);
/// ```
pub struct Pattern<'a> {
    arms: Vec<Arm<'a>>,
    has_any: bool,
    /// Strict mode for `receive_only`: the expected type name.
    only: Option<&'static str>,
}

impl<'a> Pattern<'a> {
    pub fn new() -> Self {
        Self {
            arms: Vec::new(),
            has_any: false,
            only: None,
        }
    }

    /// Adds a void arm for messages of type `T`.
    ///
    /// # Panics
    ///
    /// If an arm for `T` already exists, or if a catch-all arm was already added.
    pub fn on<T: Send + 'static>(mut self, mut handler: impl FnMut(T) + 'a) -> Self {
        self.push_arm(
            Some(TypeId::of::<T>()),
            type_name::<T>(),
            ArmBody::Fire(Box::new(move |payload| {
                if let Ok(value) = payload.downcast::<T>() {
                    handler(value);
                }
            })),
        );
        self
    }

    /// Adds a boolean arm for messages of type `T`: returning `false` refuses the
    /// message and the walk continues as if the arm had not matched.
    ///
    /// # Panics
    ///
    /// If an arm for `T` already exists, or if a catch-all arm was already added.
    pub fn when<T: Send + 'static>(
        mut self,
        mut handler: impl FnMut(&T) -> bool + 'a,
    ) -> Self {
        self.push_arm(
            Some(TypeId::of::<T>()),
            type_name::<T>(),
            ArmBody::Test(Box::new(move |payload| {
                payload.downcast_ref::<T>().map(&mut handler).unwrap_or(false)
            })),
        );
        self
    }

    /// Adds the universal fallback arm. It occludes everything after it, so it must
    /// be the last arm added.
    pub fn any(mut self, handler: impl FnMut(Variant) + 'a) -> Self {
        self.push_arm(None, "catch-all", ArmBody::Any(Box::new(handler)));
        self.has_any = true;
        self
    }

    /// The strict single-type pattern behind `receive_only`.
    pub(crate) fn only<T: Send + 'static>(slot: &'a mut Option<T>) -> Self {
        let mut pattern = Pattern::new().on(move |value: T| *slot = Some(value));
        pattern.only = Some(type_name::<T>());
        pattern
    }

    fn push_arm(&mut self, type_id: Option<TypeId>, name: &'static str, body: ArmBody<'a>) {
        assert!(
            !self.has_any,
            "no receive arm may follow the catch-all arm (it would never fire)"
        );
        if let Some(id) = type_id {
            assert!(
                self.arms.iter().all(|arm| arm.type_id != Some(id)),
                "duplicate receive arm for message type `{name}`"
            );
        }
        self.arms.push(Arm { type_id, body });
    }

    fn walk(&mut self, payload: Variant) -> Walk {
        for arm in &mut self.arms {
            match (&arm.type_id, &mut arm.body) {
                (Some(id), ArmBody::Fire(fire)) if payload.matches(*id) => {
                    fire(payload);
                    return Walk::Matched;
                }
                (Some(id), ArmBody::Test(test)) if payload.matches(*id) => {
                    if test(&payload) {
                        return Walk::Matched;
                    }
                }
                (None, ArmBody::Any(fire)) => {
                    fire(payload);
                    return Walk::Matched;
                }
                _ => {}
            }
        }
        Walk::Unmatched(payload)
    }

    /// Runs one message through the engine.
    pub(crate) fn consider(&mut self, msg: Msg) -> Result<Outcome, Error> {
        if msg.kind == MsgKind::LinkDead {
            return self.on_link_dead(msg.payload);
        }
        let kind = msg.kind;
        match self.walk(msg.payload) {
            Walk::Matched => Ok(Outcome::Matched),
            Walk::Unmatched(payload) => {
                if let Some(expected) = self.only {
                    // The mismatched message counts as consumed.
                    return Err(Error::MessageMismatch {
                        expected,
                        got: payload.type_name(),
                    });
                }
                Ok(Outcome::Unmatched(Msg { kind, payload }))
            }
        }
    }

    /// Prunes link/owner state for the dead `tid` and re-dispatches the synthesized
    /// termination event where the relationship requires one.
    fn on_link_dead(&mut self, payload: Variant) -> Result<Outcome, Error> {
        let tid = match payload.downcast::<Tid>() {
            Ok(tid) => tid,
            Err(_) => return Ok(Outcome::Consumed),
        };
        let (was_owner, link_back) = runtime::with_info(|info| {
            let was_owner = info.owner.as_ref() == Some(&tid);
            if was_owner {
                info.owner = None;
            }
            let link_back = info.links.remove(&tid).unwrap_or(false);
            (was_owner, link_back)
        });

        if was_owner {
            let event = OwnerTerminated { tid };
            if self.only.is_some() {
                return Err(event.into());
            }
            return match self.walk(Variant::new(event.clone())) {
                Walk::Matched => Ok(Outcome::Matched),
                Walk::Unmatched(_) => Err(event.into()),
            };
        }
        if link_back {
            let event = LinkTerminated { tid };
            if self.only.is_some() {
                return Err(event.into());
            }
            return match self.walk(Variant::new(event.clone())) {
                Walk::Matched => Ok(Outcome::Matched),
                Walk::Unmatched(_) => Err(event.into()),
            };
        }
        log::trace!("absorbed termination notice from unlinked thread");
        Ok(Outcome::Consumed)
    }

    /// Dispatches the front of the priority lane. An unmatched priority message is
    /// an error, never a skip.
    pub(crate) fn take_priority(&mut self, lane: &mut Lane) -> Result<bool, Error> {
        while let Some(msg) = lane.pop_front() {
            match self.consider(msg)? {
                Outcome::Matched => return Ok(true),
                Outcome::Consumed => continue,
                Outcome::Unmatched(msg) => return Err(Error::PriorityMessage(msg.payload)),
            }
        }
        Ok(false)
    }

    /// Scans a local lane in place, removing the first accepted message.
    pub(crate) fn scan(&mut self, lane: &mut Lane) -> Result<bool, Error> {
        let mut index = 0;
        while index < lane.len() {
            let msg = match lane.remove(index) {
                Some(msg) => msg,
                None => break,
            };
            match self.consider(msg)? {
                Outcome::Matched => return Ok(true),
                Outcome::Consumed => {}
                Outcome::Unmatched(msg) => {
                    lane.insert(index, msg);
                    index += 1;
                }
            }
        }
        Ok(false)
    }

    /// Scans freshly drained messages; refused ones move to the back of `local` so
    /// they are not rescanned this call. On a match the unscanned tail follows them.
    pub(crate) fn scan_arrived(&mut self, arrived: &mut Lane, local: &mut Lane) -> Result<bool, Error> {
        while let Some(msg) = arrived.pop_front() {
            match self.consider(msg) {
                Ok(Outcome::Matched) => {
                    local.append(arrived);
                    return Ok(true);
                }
                Ok(Outcome::Consumed) => {}
                Ok(Outcome::Unmatched(msg)) => local.push_back(msg),
                Err(err) => {
                    // Keep the unscanned tail; only the faulted message is consumed.
                    local.append(arrived);
                    return Err(err);
                }
            }
        }
        Ok(false)
    }
}
