//! Type-erased message payloads.
//!
//! A [`Variant`] wraps an arbitrary `Send` value together with the [`TypeId`] and type
//! name recorded at construction, which is what makes type-directed dispatch in
//! [`Pattern`](crate::dispatch::Pattern) possible without any registration step. A
//! multi-value message is a single tuple value; the tuple type is what receive
//! handlers match on.

use std::any::{self, Any, TypeId};
use std::fmt;

use crate::tid::Tid;

/// Which lane of the mailbox a message travels through.
///
/// `LinkDead` is the only control kind: it bypasses crowding and is interpreted by
/// the receive engine rather than by user handlers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MsgKind {
    Standard,
    Priority,
    LinkDead,
}

/// A dynamically typed message payload.
pub struct Variant {
    value: Box<dyn Any + Send>,
    type_id: TypeId,
    type_name: &'static str,
}

impl Variant {
    /// Wraps `value`, recording its dynamic type identity.
    pub fn new<T: Send + 'static>(value: T) -> Self {
        Self {
            value: Box::new(value),
            type_id: TypeId::of::<T>(),
            type_name: any::type_name::<T>(),
        }
    }

    /// True iff the stored value is a `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    pub(crate) fn matches(&self, type_id: TypeId) -> bool {
        self.type_id == type_id
    }

    /// The `std::any::type_name` of the stored value, as recorded at construction.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Extracts the stored value as a `T`, handing the variant back on a type mismatch.
    pub fn downcast<T: 'static>(self) -> Result<T, Variant> {
        let type_id = self.type_id;
        let type_name = self.type_name;
        match self.value.downcast::<T>() {
            Ok(boxed) => Ok(*boxed),
            Err(value) => Err(Variant {
                value,
                type_id,
                type_name,
            }),
        }
    }

    /// Borrows the stored value as a `T`.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Variant({})", self.type_name)
    }
}

/// One mailbox entry: a payload plus the lane it travels through.
pub(crate) struct Msg {
    pub(crate) kind: MsgKind,
    pub(crate) payload: Variant,
}

impl Msg {
    pub(crate) fn standard(payload: Variant) -> Self {
        Self {
            kind: MsgKind::Standard,
            payload,
        }
    }

    pub(crate) fn priority(payload: Variant) -> Self {
        Self {
            kind: MsgKind::Priority,
            payload,
        }
    }

    /// The control message sent to owner and links when `tid` terminates.
    pub(crate) fn link_dead(tid: Tid) -> Self {
        Self {
            kind: MsgKind::LinkDead,
            payload: Variant::new(tid),
        }
    }
}
