//! Process-wide name registry: string names for handles.
//!
//! One mutex guards one map. Names bound to a thread are released automatically when
//! that thread terminates.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use crate::error::POISONED_REGISTRY_MUTEX;
use crate::tid::Tid;

fn registry() -> &'static Mutex<HashMap<String, Tid>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Tid>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Binds `name` to `tid`. Returns false if the name is already bound or the thread
/// behind `tid` has terminated.
pub fn register(name: &str, tid: Tid) -> bool {
    if tid.is_closed() {
        return false;
    }
    let mut map = registry().lock().expect(POISONED_REGISTRY_MUTEX);
    if map.contains_key(name) {
        return false;
    }
    log::trace!("registering name {name:?} for {tid:?}");
    map.insert(name.to_owned(), tid);
    true
}

/// Releases `name`. Returns false if it was not bound.
pub fn unregister(name: &str) -> bool {
    let mut map = registry().lock().expect(POISONED_REGISTRY_MUTEX);
    map.remove(name).is_some()
}

/// Looks up the handle bound to `name`.
pub fn locate(name: &str) -> Option<Tid> {
    let map = registry().lock().expect(POISONED_REGISTRY_MUTEX);
    map.get(name).cloned()
}

/// Drops every name bound to `tid`; part of thread teardown.
pub(crate) fn unregister_tid(tid: &Tid) {
    let mut map = registry().lock().expect(POISONED_REGISTRY_MUTEX);
    map.retain(|_, bound| bound != tid);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{receive_only, spawn, this_tid};

    #[test]
    fn register_locate_unregister() {
        let me = this_tid();
        assert!(register("registry-basic", me.clone()));
        assert_eq!(locate("registry-basic"), Some(me));
        assert!(unregister("registry-basic"));
        assert_eq!(locate("registry-basic"), None);
        assert!(!unregister("registry-basic"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let me = this_tid();
        assert!(register("registry-dup", me.clone()));
        assert!(!register("registry-dup", me));
        assert!(unregister("registry-dup"));
    }

    #[test]
    fn names_are_released_on_thread_exit() {
        let child = spawn(|| {
            let me = this_tid();
            assert!(register("registry-transient", me));
            let owner = crate::owner_tid()?;
            owner.send(())?;
            Ok(())
        });
        receive_only::<()>().expect("registration signal");
        let _ = child;
        // The child has signalled and exits; poll until its teardown released the name.
        for _ in 0..200 {
            if locate("registry-transient").is_none() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("name still bound long after thread exit");
    }

    #[test]
    fn dead_threads_cannot_be_registered() {
        let child = spawn(|| Ok(()));
        for _ in 0..200 {
            if child.is_closed() {
                assert!(!register("registry-dead", child));
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("child mailbox never closed");
    }
}
