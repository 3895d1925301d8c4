#![forbid(unsafe_code)]

//! Bounded change log for one target cell.
//!
//! # Design
//!
//! [`history_log`] derives a cell whose value is the last `limit` committed
//! values of the target, newest first. The backing buffer is a seeded cell,
//! so each store gets its own; a private refresh counter lets the reset
//! path force a recompute of the log without touching the target.
//!
//! Recording rides the graph's own propagation: each recompute of the log
//! prepends the target's current value. That includes values written by
//! undo/redo navigation — the log is a plain record of what the target
//! held, while the undo stack (see [`crate::undo`]) is the sole authority
//! on navigation.
//!
//! # Lifecycle
//!
//! Mounting seeds the log with the target's current value. Unmounting
//! clears the buffer: history is volatile and does not survive a period
//! with zero observers. Remounting seeds again.

use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use rewind_cells::{Cell, Setter, Unmount};

use crate::action::Action;

/// A history-log cell: read a [`History`], write an [`Action`].
pub type HistoryLogCell<T> = Cell<History<T>, Action>;

/// Snapshot of a target cell's recent values, newest first, plus the
/// capability to reset the log it came from.
pub struct History<T> {
    entries: Vec<T>,
    reset: Setter<Action>,
}

impl<T: Clone> Clone for History<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            reset: self.reset.clone(),
        }
    }
}

impl<T> History<T> {
    /// Recorded values, newest first.
    #[must_use]
    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    /// The most recently committed value.
    #[must_use]
    pub fn newest(&self) -> Option<&T> {
        self.entries.first()
    }

    /// Number of recorded values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear the log. The log recomputes immediately, so dependents observe
    /// a freshly seeded single-entry sequence.
    pub fn reset(&self) {
        self.reset.send(Action::Reset);
    }
}

impl<T> Deref for History<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.entries
    }
}

impl<T: fmt::Debug> fmt::Debug for History<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("History")
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

struct Buf<T>(Rc<RefCell<Vec<T>>>);

impl<T> Clone for Buf<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T> Buf<T> {
    fn new() -> Self {
        Self(Rc::new(RefCell::new(Vec::new())))
    }
}

/// Derive a bounded, newest-first log of `target`'s committed values.
///
/// `limit` caps the number of retained entries and is clamped to at least
/// one. The log's write channel acts on [`Action::Reset`] and ignores the
/// other tokens.
pub fn history_log<T, A>(target: &Cell<T, A>, limit: usize) -> HistoryLogCell<T>
where
    T: Clone + 'static,
    A: 'static,
{
    let limit = limit.max(1);
    let refresh = Cell::new(0u64).private().labeled("history.refresh");
    let buffer: Cell<Buf<T>, ()> = {
        let refresh = refresh.clone();
        Cell::seeded_rw(Buf::new, move |ctx, ()| {
            let shared: Buf<T> = ctx.self_value();
            shared.0.borrow_mut().clear();
            let round: u64 = ctx.get(&refresh);
            ctx.set(&refresh, round.wrapping_add(1));
        })
        .on_mount(|ctx| -> Option<Unmount> {
            let clear = ctx.self_setter::<()>();
            Some(Box::new(move || clear.send(())))
        })
        .private()
        .labeled("history.buffer")
    };

    let read_target = target.clone();
    let read_buffer = buffer.clone();
    let write_buffer = buffer;
    Cell::derived_rw(
        move |ctx| {
            ctx.get(&refresh);
            let shared: Buf<T> = ctx.get(&read_buffer);
            let current: T = ctx.get(&read_target);
            let mut entries = shared.0.borrow_mut();
            entries.insert(0, current);
            entries.truncate(limit);
            History {
                entries: entries.clone(),
                reset: ctx.self_setter(),
            }
        },
        move |ctx, action: Action| {
            if action == Action::Reset {
                ctx.set(&write_buffer, ());
            }
        },
    )
    .labeled("history.log")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use rewind_cells::Store;

    use super::*;

    #[test]
    fn records_sliding_window_newest_first() {
        let store = Store::new();
        let target = Cell::new(0);
        let log = history_log(&target, 3);
        let _sub = store.subscribe(&log, || {});

        for value in [1, 2, 3, 4] {
            store.set(&target, value);
        }
        assert_eq!(store.get(&log).entries(), &[4, 3, 2]);
    }

    #[test]
    fn seeds_with_current_value_on_mount() {
        let store = Store::new();
        let target = Cell::new(7);
        let log = history_log(&target, 5);
        let _sub = store.subscribe(&log, || {});

        assert_eq!(store.get(&log).entries(), &[7]);
    }

    #[test]
    fn short_run_keeps_every_value() {
        let store = Store::new();
        let target = Cell::new(0);
        let log = history_log(&target, 10);
        let _sub = store.subscribe(&log, || {});

        store.set(&target, 1);
        store.set(&target, 2);
        assert_eq!(store.get(&log).entries(), &[2, 1, 0]);
    }

    #[test]
    fn reset_reseeds_from_current_value() {
        let store = Store::new();
        let target = Cell::new(0);
        let log = history_log(&target, 4);
        let _sub = store.subscribe(&log, || {});

        store.set(&target, 1);
        store.set(&target, 2);
        store.set(&log, Action::Reset);
        assert_eq!(store.get(&log).entries(), &[2]);
    }

    #[test]
    fn reset_via_snapshot_capability() {
        let store = Store::new();
        let target = Cell::new(0);
        let log = history_log(&target, 4);
        let _sub = store.subscribe(&log, || {});

        store.set(&target, 5);
        store.get(&log).reset();
        assert_eq!(store.get(&log).entries(), &[5]);
    }

    #[test]
    fn non_reset_tokens_are_ignored() {
        let store = Store::new();
        let target = Cell::new(0);
        let log = history_log(&target, 4);
        let _sub = store.subscribe(&log, || {});

        store.set(&target, 1);
        store.set(&log, Action::Undo);
        store.set(&log, Action::Redo);
        assert_eq!(store.get(&log).entries(), &[1, 0]);
    }

    #[test]
    fn unmount_clears_remount_reseeds() {
        let store = Store::new();
        let target = Cell::new(0);
        let log = history_log(&target, 5);

        let sub = store.subscribe(&log, || {});
        store.set(&target, 1);
        store.set(&target, 2);
        assert_eq!(store.get(&log).len(), 3);
        drop(sub);

        let _sub = store.subscribe(&log, || {});
        assert_eq!(store.get(&log).entries(), &[2]);
    }

    #[test]
    fn limit_zero_behaves_as_one() {
        let store = Store::new();
        let target = Cell::new(0);
        let log = history_log(&target, 0);
        let _sub = store.subscribe(&log, || {});

        store.set(&target, 9);
        assert_eq!(store.get(&log).entries(), &[9]);
    }

    #[test]
    fn logs_on_read_only_derived_target() {
        let store = Store::new();
        let base = Cell::new(1);
        let doubled = {
            let base = base.clone();
            Cell::derived(move |ctx| ctx.get(&base) * 2)
        };
        let log = history_log(&doubled, 3);
        let _sub = store.subscribe(&log, || {});

        store.set(&base, 2);
        store.set(&base, 3);
        assert_eq!(store.get(&log).entries(), &[6, 4, 2]);
    }

    #[test]
    fn independent_logs_do_not_interfere() {
        let store = Store::new();
        let target = Cell::new(0);
        let short = history_log(&target, 2);
        let long = history_log(&target, 10);
        let _short_sub = store.subscribe(&short, || {});
        let _long_sub = store.subscribe(&long, || {});

        for value in [1, 2, 3] {
            store.set(&target, value);
        }
        assert_eq!(store.get(&short).entries(), &[3, 2]);
        assert_eq!(store.get(&long).entries(), &[3, 2, 1, 0]);
    }

    #[test]
    fn two_stores_keep_separate_logs() {
        let first = Store::new();
        let second = Store::new();
        let target = Cell::new(0);
        let log = history_log(&target, 5);
        let _first_sub = first.subscribe(&log, || {});
        let _second_sub = second.subscribe(&log, || {});

        first.set(&target, 1);
        assert_eq!(first.get(&log).entries(), &[1, 0]);
        assert_eq!(second.get(&log).entries(), &[0]);
    }

    #[test]
    fn snapshot_derefs_to_slice() {
        let store = Store::new();
        let target = Cell::new(3);
        let log = history_log(&target, 3);
        let _sub = store.subscribe(&log, || {});

        let snapshot = store.get(&log);
        assert_eq!(snapshot.newest(), Some(&3));
        assert_eq!(snapshot[0], 3);
        assert!(!snapshot.is_empty());
        assert!(format!("{snapshot:?}").contains("History"));
    }

    #[test]
    fn subscriber_sees_each_wave() {
        use std::cell::Cell as Flag;
        use std::rc::Rc;

        let store = Store::new();
        let target = Cell::new(0);
        let log = history_log(&target, 3);
        let hits = Rc::new(Flag::new(0u32));
        let hits_listener = Rc::clone(&hits);
        let _sub = store.subscribe(&log, move || hits_listener.set(hits_listener.get() + 1));

        store.set(&target, 1);
        store.set(&target, 2);
        assert_eq!(hits.get(), 2);
    }
}
