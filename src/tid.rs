//! Opaque handles to logical threads.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::Error;
use crate::mailbox::Mailbox;
use crate::message::{Msg, Variant};

/// A handle addressing exactly one mailbox.
///
/// Handles are cheap to clone, freely sent inside messages, and compare equal iff they
/// reference the same mailbox. A handle stays valid after the referenced thread has
/// terminated; sends then silently land in a closed mailbox.
///
/// There is no null handle; "no owner" is `Option<Tid>` (see
/// [`owner_tid`](crate::owner_tid)).
#[derive(Clone)]
pub struct Tid {
    mbox: Arc<Mailbox>,
}

impl Tid {
    pub(crate) fn new(mailbox: Mailbox) -> Self {
        Self {
            mbox: Arc::new(mailbox),
        }
    }

    /// Sends `value` as a standard message.
    ///
    /// Fails with [`Error::MailboxFull`] only under the `Fail` overflow policy. The
    /// `Send + 'static` bound is the isolation check: values aliasing another thread's
    /// mutable state do not cross this boundary.
    pub fn send<T: Send + 'static>(&self, value: T) -> Result<(), Error> {
        self.mbox.put(Msg::standard(Variant::new(value)), self)
    }

    /// Sends `value` on the priority lane, which overtakes standard messages at the
    /// receiver. An unhandled priority message surfaces as
    /// [`Error::PriorityMessage`] in the receiver, never as a silent drop.
    pub fn send_priority<T: Send + 'static>(&self, value: T) -> Result<(), Error> {
        self.mbox.put(Msg::priority(Variant::new(value)), self)
    }

    pub(crate) fn send_msg(&self, msg: Msg) -> Result<(), Error> {
        self.mbox.put(msg, self)
    }

    pub(crate) fn mailbox(&self) -> &Mailbox {
        &self.mbox
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.mbox.is_closed()
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.mbox) as usize
    }
}

impl PartialEq for Tid {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.mbox, &other.mbox)
    }
}

impl Eq for Tid {}

impl Hash for Tid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tid({:#x})", self.addr())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::this_tid;

    #[test]
    fn identity_semantics() {
        let a = this_tid();
        let b = this_tid();
        assert_eq!(a, b, "one thread has one handle");
        let c = crate::spawn(|| Ok(()));
        assert_ne!(a, c);

        let mut set = HashSet::new();
        set.insert(a.clone());
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
    }

    #[test]
    fn debug_is_stable_per_handle() {
        let a = this_tid();
        assert_eq!(format!("{a:?}"), format!("{:?}", a.clone()));
    }
}
