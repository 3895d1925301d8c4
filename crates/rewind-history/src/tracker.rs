#![forbid(unsafe_code)]

//! Store-wide history: bounded value history for every mounted,
//! non-private cell of one store, with no per-cell instrumentation.
//!
//! # Design
//!
//! [`store_history`] derives a cell whose value is a [`StoreHistoryMap`]:
//! a per-store map from cell identity to a bounded, newest-first value
//! history, plus a revision counter. The map cell is seeded per store, so
//! two stores evaluating the same tracker cell never share an entry.
//!
//! The four store hooks are registered in the tracker's own mount callback
//! and torn down atomically by the returned cleanup, which drops the hook
//! handles — instrumentation is active only while the tracker itself is
//! observed, and repeated mount/unmount cycles leak nothing.
//!
//! Tracked values are type-erased (`Rc<dyn Any>`) because the tracked cell
//! set is heterogeneous and open; [`StoreHistoryMap::entries_for`]
//! downcasts back to the cell's value type.
//!
//! # Flush coalescing
//!
//! Mount/change/unmount handlers only flip a dirty flag. The flush hook —
//! fired once per wave — converts a set flag into a single revision bump,
//! so a batch touching many cells notifies tracker subscribers once.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use rewind_cells::{Cell, CellId, ErasedValue, ReadOnlyCell, Unmount};
use tracing::debug;

use crate::action::Action;

/// A store-history cell: read a [`StoreHistoryMap`], write
/// [`Action::Reset`].
pub type StoreHistoryCell = Cell<StoreHistoryMap, Action>;

struct SharedEntries(Rc<RefCell<HashMap<CellId, Vec<ErasedValue>>>>);

impl Clone for SharedEntries {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl SharedEntries {
    fn new() -> Self {
        Self(Rc::new(RefCell::new(HashMap::new())))
    }
}

/// Bounded value history of every mounted, non-private cell of one store.
///
/// The revision counter increments once per wave in which tracked state
/// changed; it is the cheap way to detect "anything new since last look".
pub struct StoreHistoryMap {
    entries: SharedEntries,
    revision: u64,
}

impl Clone for StoreHistoryMap {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            revision: self.revision,
        }
    }
}

impl StoreHistoryMap {
    /// Wave-coalesced change counter.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Number of tracked cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.0.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.0.borrow().is_empty()
    }

    /// Whether the cell behind `id` is currently tracked.
    #[must_use]
    pub fn tracks(&self, id: CellId) -> bool {
        self.entries.0.borrow().contains_key(&id)
    }

    /// Identities of every tracked cell.
    #[must_use]
    pub fn tracked(&self) -> Vec<CellId> {
        self.entries.0.borrow().keys().copied().collect()
    }

    /// Recorded values of `cell`, newest first, downcast to the cell's
    /// value type. `None` if the cell is not tracked.
    #[must_use]
    pub fn entries_for<T: Clone + 'static, A>(&self, cell: &Cell<T, A>) -> Option<Vec<T>> {
        self.entries.0.borrow().get(&cell.id()).map(|values| {
            values
                .iter()
                .filter_map(|value| value.downcast_ref::<T>().cloned())
                .collect()
        })
    }

    /// Recorded values of the cell behind `id`, newest first, type-erased.
    #[must_use]
    pub fn raw_entries(&self, id: CellId) -> Option<Vec<ErasedValue>> {
        self.entries.0.borrow().get(&id).cloned()
    }
}

impl fmt::Debug for StoreHistoryMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHistoryMap")
            .field("tracked", &self.len())
            .field("revision", &self.revision)
            .finish()
    }
}

/// Derive a store-wide history tracker keeping the last `limit` values of
/// every mounted, non-private cell.
///
/// # Panics
///
/// Writing any token other than [`Action::Reset`] panics: the tracker has
/// no navigation semantics, and routing foreign tokens here is host
/// misuse, not a recoverable condition.
pub fn store_history(limit: usize) -> StoreHistoryCell {
    let limit = limit.max(1);
    let refresh = Cell::new(0u64).private().labeled("tracker.refresh");
    let map: ReadOnlyCell<SharedEntries> =
        Cell::seeded(SharedEntries::new).private().labeled("tracker.map");

    let read_refresh = refresh.clone();
    let read_map = map.clone();
    let write_refresh = refresh.clone();
    let write_map = map.clone();
    let mount_refresh = refresh;
    let mount_map = map;
    Cell::derived_rw(
        move |ctx| {
            let revision: u64 = ctx.get(&read_refresh);
            let entries: SharedEntries = ctx.get(&read_map);
            StoreHistoryMap { entries, revision }
        },
        move |ctx, action: Action| match action {
            Action::Reset => {
                let entries: SharedEntries = ctx.get(&write_map);
                entries.0.borrow_mut().clear();
                let round: u64 = ctx.get(&write_refresh);
                ctx.set(&write_refresh, round.wrapping_add(1));
            }
            other => panic!("store history write channel accepts only Action::Reset, got {other:?}"),
        },
    )
    .on_mount(move |ctx| -> Option<Unmount> {
        let entries: SharedEntries = ctx.store().get(&mount_map);
        let changed = Rc::new(RefCell::new(false));

        let mount_entries = entries.clone();
        let mount_changed = Rc::clone(&changed);
        let mounts = ctx.store().on_cell_mount(move |store, id| {
            if store.is_private(id) {
                return;
            }
            let mut map = mount_entries.0.borrow_mut();
            if map.contains_key(&id) {
                return;
            }
            if let Some(value) = store.peek_raw(id) {
                map.insert(id, vec![value]);
                *mount_changed.borrow_mut() = true;
            }
        });

        let change_entries = entries.clone();
        let change_changed = Rc::clone(&changed);
        let changes = ctx.store().on_cell_change(move |store, id| {
            if store.is_private(id) {
                return;
            }
            let mut map = change_entries.0.borrow_mut();
            // A change can land before the mount registration; track the
            // cell lazily as long as it is mounted.
            if !map.contains_key(&id) && !store.is_mounted(id) {
                return;
            }
            let Some(value) = store.peek_raw(id) else {
                return;
            };
            let history = map.entry(id).or_default();
            history.insert(0, value);
            history.truncate(limit);
            *change_changed.borrow_mut() = true;
        });

        let unmount_entries = entries.clone();
        let unmount_changed = Rc::clone(&changed);
        let unmounts = ctx.store().on_cell_unmount(move |store, id| {
            if store.is_private(id) {
                return;
            }
            unmount_entries.0.borrow_mut().remove(&id);
            *unmount_changed.borrow_mut() = true;
        });

        let flush_refresh = mount_refresh.clone();
        let flush_changed = Rc::clone(&changed);
        let flushes = ctx.store().on_flush(move |store| {
            let pending = {
                let mut flag = flush_changed.borrow_mut();
                std::mem::replace(&mut *flag, false)
            };
            if pending {
                let round: u64 = store.get(&flush_refresh);
                store.set(&flush_refresh, round.wrapping_add(1));
            }
        });

        debug!("store history tracker installed");
        Some(Box::new(move || {
            drop(mounts);
            drop(changes);
            drop(unmounts);
            drop(flushes);
            // Tracked history is as volatile as any other history here: it
            // does not survive a period with zero observers.
            entries.0.borrow_mut().clear();
            debug!("store history tracker removed");
        }))
    })
    .private()
    .labeled("history.store")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
