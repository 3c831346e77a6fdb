#![deny(clippy::unwrap_used)]
#![allow(clippy::type_complexity, clippy::new_without_default)]

//! Typed message passing between in-process logical threads.
//!
//! A *logical thread* is an independent execution context addressed by an opaque
//! handle ([`Tid`]). Communication happens exclusively through asynchronous messages
//! into per-thread mailboxes; there is no shared mutable state in the public API.
//! Many logical threads are multiplexed onto an execution substrate chosen by the
//! installed [`Scheduler`]: one kernel thread per spawn ([`ThreadScheduler`], the
//! default) or cooperatively interleaved fibers ([`FiberScheduler`]).
//!
//! ## Core pieces
//!
//! - **Mailboxes** hold a standard and a priority lane; the priority lane is always
//!   drained first. Capacity can be bounded per mailbox with a configurable overflow
//!   policy ([`OnCrowding`]).
//! - **Receive patterns** ([`Pattern`]) dispatch buffered messages to typed arms with
//!   first-match semantics; unmatched messages stay buffered in order.
//! - **Ownership and links**: the spawner owns its spawnee. Terminations travel as
//!   in-band control messages and surface either as matchable events
//!   ([`OwnerTerminated`], [`LinkTerminated`]) or as errors when unhandled.
//!
//! ## Example
//!
//! ```
//! use missive::{receive, spawn, receive_only, owner_tid, Pattern};
//!
//! let doubler = spawn(|| {
//!     let owner = owner_tid()?;
//!     receive(Pattern::new().on(move |n: i32| {
//!         owner.send(n * 2).expect("reply");
//!     }))?;
//!     Ok(())
//! });
//! doubler.send(21).unwrap();
//! assert_eq!(receive_only::<i32>().unwrap(), 42);
//! ```

pub mod dispatch;
pub mod error;
pub mod mailbox;
pub mod message;
pub mod registry;
pub mod runtime;
pub mod scheduler;
mod tid;

pub use dispatch::Pattern;
pub use error::{Error, LinkTerminated, OwnerTerminated};
pub use mailbox::OnCrowding;
pub use message::Variant;
pub use registry::{locate, register, unregister};
pub use runtime::{
    owner_tid, receive, receive_only, receive_timeout, run, set_max_mailbox_size, spawn,
    spawn_linked, this_tid, yield_now,
};
pub use scheduler::{fiber::FiberScheduler, kernel::ThreadScheduler, Condition, Scheduler};
pub use tid::Tid;
