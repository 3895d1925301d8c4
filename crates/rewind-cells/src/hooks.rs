#![forbid(unsafe_code)]

//! Store-level lifecycle hooks.
//!
//! A store exposes four hook points — change, mount, unmount, flush — each
//! supporting any number of independent registrations. Callbacks are held
//! weakly; the strong reference lives inside the returned [`HookHandle`],
//! so dropping the handle makes the callback unreachable immediately and
//! the dead slot is pruned on the next firing.
//!
//! Hooks observe *every* cell, including private ones. Filtering on the
//! private marker is the registrant's job (see `Store::is_private`), which
//! keeps the store itself ignorant of what instrumentation cares about.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::cell::CellId;
use crate::store::Store;

type CellHookFn = dyn Fn(&Store, CellId);
type FlushHookFn = dyn Fn(&Store);

/// RAII guard for a hook registration.
///
/// Dropping the handle drops the only strong reference to the callback;
/// the weak slot in the registry then fails to upgrade and is pruned.
#[must_use = "dropping a HookHandle unregisters the hook"]
pub struct HookHandle {
    _guard: Box<dyn std::any::Any>,
}

impl std::fmt::Debug for HookHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookHandle").finish_non_exhaustive()
    }
}

#[derive(Default)]
pub(crate) struct HookRegistry {
    change: RefCell<Vec<Weak<CellHookFn>>>,
    mount: RefCell<Vec<Weak<CellHookFn>>>,
    unmount: RefCell<Vec<Weak<CellHookFn>>>,
    flush: RefCell<Vec<Weak<FlushHookFn>>>,
}

impl HookRegistry {
    pub(crate) fn add_change(&self, f: impl Fn(&Store, CellId) + 'static) -> HookHandle {
        Self::add_cell_hook(&self.change, f)
    }

    pub(crate) fn add_mount(&self, f: impl Fn(&Store, CellId) + 'static) -> HookHandle {
        Self::add_cell_hook(&self.mount, f)
    }

    pub(crate) fn add_unmount(&self, f: impl Fn(&Store, CellId) + 'static) -> HookHandle {
        Self::add_cell_hook(&self.unmount, f)
    }

    pub(crate) fn add_flush(&self, f: impl Fn(&Store) + 'static) -> HookHandle {
        let strong: Rc<FlushHookFn> = Rc::new(f);
        self.flush.borrow_mut().push(Rc::downgrade(&strong));
        HookHandle {
            _guard: Box::new(strong),
        }
    }

    pub(crate) fn fire_change(&self, store: &Store, id: CellId) {
        Self::fire_cell_hooks(&self.change, store, id);
    }

    pub(crate) fn fire_mount(&self, store: &Store, id: CellId) {
        Self::fire_cell_hooks(&self.mount, store, id);
    }

    pub(crate) fn fire_unmount(&self, store: &Store, id: CellId) {
        Self::fire_cell_hooks(&self.unmount, store, id);
    }

    pub(crate) fn fire_flush(&self, store: &Store) {
        let live: Vec<Rc<FlushHookFn>> = {
            let mut hooks = self.flush.borrow_mut();
            hooks.retain(|w| w.strong_count() > 0);
            hooks.iter().filter_map(Weak::upgrade).collect()
        };
        for hook in live {
            hook(store);
        }
    }

    fn add_cell_hook(
        slot: &RefCell<Vec<Weak<CellHookFn>>>,
        f: impl Fn(&Store, CellId) + 'static,
    ) -> HookHandle {
        let strong: Rc<CellHookFn> = Rc::new(f);
        slot.borrow_mut().push(Rc::downgrade(&strong));
        HookHandle {
            _guard: Box::new(strong),
        }
    }

    /// Collect live callbacks first so none run under the registry borrow —
    /// a hook is allowed to register or drop other hooks while firing.
    fn fire_cell_hooks(slot: &RefCell<Vec<Weak<CellHookFn>>>, store: &Store, id: CellId) {
        let live: Vec<Rc<CellHookFn>> = {
            let mut hooks = slot.borrow_mut();
            hooks.retain(|w| w.strong_count() > 0);
            hooks.iter().filter_map(Weak::upgrade).collect()
        };
        for hook in live {
            hook(store, id);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
