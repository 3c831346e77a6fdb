//! Error taxonomy.
//!
//! The two termination events, [`OwnerTerminated`] and [`LinkTerminated`], play a dual
//! role: they surface as [`Error`] variants when a `receive` call cannot deliver them,
//! and they are injected as ordinary typed payloads that receive handlers can match on
//! like any user type.

use thiserror::Error;

use crate::message::Variant;
use crate::tid::Tid;

pub(crate) const POISONED_SHARED_MUTEX: &str = "poisoned mailbox shared mutex";
pub(crate) const POISONED_REGISTRY_MUTEX: &str = "poisoned name registry mutex";

/// The owner of the receiving thread terminated.
///
/// Matchable in a receive pattern; raised from `receive` when no handler accepts it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("owner thread {tid:?} terminated")]
pub struct OwnerTerminated {
    pub tid: Tid,
}

/// A linked thread terminated.
///
/// Matchable in a receive pattern; raised from `receive` when no handler accepts it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("linked thread {tid:?} terminated")]
pub struct LinkTerminated {
    pub tid: Tid,
}

/// All failures surfaced by the crate's public API.
#[derive(Error, Debug)]
pub enum Error {
    /// `receive_only` consumed a message of an unrequested type.
    #[error("unexpected message type: expected `{expected}`, got `{got}`")]
    MessageMismatch {
        expected: &'static str,
        got: &'static str,
    },

    #[error(transparent)]
    OwnerTerminated(#[from] OwnerTerminated),

    #[error(transparent)]
    LinkTerminated(#[from] LinkTerminated),

    /// A priority message found no matching handler; it is never silently dropped.
    #[error("priority message with no matching handler: {0:?}")]
    PriorityMessage(Variant),

    /// A send hit a full mailbox under the `Fail` overflow policy.
    #[error("mailbox of {0:?} is full")]
    MailboxFull(Tid),

    /// The calling thread has no owner.
    #[error("thread has no owner")]
    NoOwner,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_names_both_types() {
        let err = Error::MessageMismatch {
            expected: std::any::type_name::<String>(),
            got: std::any::type_name::<i32>(),
        };
        assert_eq!(
            err.to_string(),
            "unexpected message type: expected `alloc::string::String`, got `i32`"
        );
    }

    #[test]
    fn termination_events_display_through_error() {
        let tid = crate::this_tid();
        let err: Error = OwnerTerminated { tid: tid.clone() }.into();
        assert_eq!(err.to_string(), OwnerTerminated { tid }.to_string());
    }
}
