#![forbid(unsafe_code)]

//! History and undo/redo exposed as one cell.
//!
//! [`undoable_history`] composes a private [`history_log`] and, when the
//! target is writable, a private [`undo_stack_with`] behind a single
//! facade.
//! Whether the target is writable is probed exactly once, at construction;
//! the resulting shape is fixed for the cell's lifetime.
//!
//! The facade's write channel multiplexes [`Command`] tokens: `Reset`
//! resets both sublayers, `Undo`/`Redo` delegate to the undo layer (and
//! are silently ignored for read-only targets), and `Forward` passes its
//! arguments verbatim to the target — an ordinary write through the
//! facade.

use std::fmt;
use std::ops::Deref;

use rewind_cells::{Cell, ReadOnly, ReadOnlyCell, Setter};

use crate::action::{Action, Command};
use crate::log::{History, history_log};
use crate::undo::{Undoable, undo_stack_with};

/// A combined history cell: read an [`UndoableHistory`], write a
/// [`Command`].
pub type UndoableHistoryCell<T, A = T> = Cell<UndoableHistory<T, A>, Command<A>>;

/// Recent values of the target merged with navigation controls.
///
/// For read-only targets the controls are absent: `can_undo`/`can_redo`
/// report `false` and `undo`/`redo` are no-ops.
pub struct UndoableHistory<T, A = T> {
    entries: Vec<T>,
    controls: Option<Undoable>,
    control: Setter<Command<A>>,
}

impl<T: Clone, A> Clone for UndoableHistory<T, A> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            controls: self.controls.clone(),
            control: self.control.clone(),
        }
    }
}

impl<T, A: 'static> UndoableHistory<T, A> {
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

    /// Navigation controls, absent for read-only targets.
    #[must_use]
    pub fn controls(&self) -> Option<&Undoable> {
        self.controls.as_ref()
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.controls.as_ref().is_some_and(Undoable::can_undo)
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.controls.as_ref().is_some_and(Undoable::can_redo)
    }

    /// Step the target back. No-op when nothing can be undone or the
    /// target is read-only.
    pub fn undo(&self) {
        if let Some(controls) = &self.controls {
            controls.undo();
        }
    }

    /// Step the target forward. No-op when nothing can be redone or the
    /// target is read-only.
    pub fn redo(&self) {
        if let Some(controls) = &self.controls {
            controls.redo();
        }
    }

    /// Reset both the log and the undo layer, reseeding from the target's
    /// current value.
    pub fn reset(&self) {
        self.control.send(Command::Reset);
    }
}

impl<T, A> Deref for UndoableHistory<T, A> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.entries
    }
}

impl<T: fmt::Debug, A> fmt::Debug for UndoableHistory<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UndoableHistory")
            .field("entries", &self.entries)
            .field("writable", &self.controls.is_some())
            .finish_non_exhaustive()
    }
}

/// [`undoable_history_with`] for targets whose write channel takes the
/// value itself.
pub fn undoable_history<T>(target: &Cell<T, T>, limit: usize) -> UndoableHistoryCell<T, T>
where
    T: Clone + 'static,
{
    undoable_history_with(target, limit, |value: &T| value.clone())
}

/// Combined history for a target with no write channel: history only, no
/// navigation controls.
pub fn undoable_history_readonly<T>(
    target: &ReadOnlyCell<T>,
    limit: usize,
) -> UndoableHistoryCell<T, ReadOnly>
where
    T: Clone + 'static,
{
    undoable_history_with(target, limit, |_value: &T| -> ReadOnly {
        unreachable!("a read-only target is never navigated")
    })
}

/// Compose a bounded history log and undo/redo navigation over `target`
/// into a single cell.
pub fn undoable_history_with<T, A>(
    target: &Cell<T, A>,
    limit: usize,
    to_args: impl Fn(&T) -> A + 'static,
) -> UndoableHistoryCell<T, A>
where
    T: Clone + 'static,
    A: 'static,
{
    let log = history_log(target, limit).private();
    let writable = target.is_writable();
    let undo = writable.then(|| undo_stack_with(&log, target, limit, to_args).private());

    let read_log = log.clone();
    let read_undo = undo.clone();
    let write_log = log;
    let write_undo = undo;
    let write_target = target.clone();
    Cell::derived_rw(
        move |ctx| {
            let log: History<T> = ctx.get(&read_log);
            let controls = read_undo.as_ref().map(|u| ctx.get(u));
            UndoableHistory {
                entries: log.entries().to_vec(),
                controls,
                control: ctx.self_setter(),
            }
        },
        move |ctx, command: Command<A>| match command {
            Command::Reset => {
                ctx.set(&write_log, Action::Reset);
                if let Some(undo) = &write_undo {
                    ctx.set(undo, Action::Reset);
                }
            }
            Command::Undo => {
                if let Some(undo) = &write_undo {
                    ctx.set(undo, Action::Undo);
                }
            }
            Command::Redo => {
                if let Some(undo) = &write_undo {
                    ctx.set(undo, Action::Redo);
                }
            }
            Command::Forward(args) => {
                if writable {
                    ctx.set(&write_target, args);
                }
            }
        },
    )
    .labeled("history.undoable")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
