#![forbid(unsafe_code)]

//! Undo/redo navigation over a history log.
//!
//! # Design
//!
//! [`undo_stack`] derives a cell from a [`HistoryLogCell`] that maintains
//! its own value stack and cursor. On every recompute of the log the stack
//! either *records* (a forward write: discard the redo-able future, push the
//! new head, window to `limit`, move the cursor to the end) or *consumes a
//! navigation tag* (the recompute was caused by this cell's own undo/redo/
//! reset write — recording it would destroy the redo future or recurse).
//!
//! The tag is a one-shot latch with four states (`Idle`, `Undo`, `Redo`,
//! `Reset`): set immediately before the navigation write, cleared by the
//! very next recompute that observes it. This is the central correctness
//! device of the whole overlay.
//!
//! # Invariants
//!
//! 1. `stack` non-empty ⇒ `index < stack.len()`.
//! 2. `can_undo == (index > 0)`; `can_redo == (index + 1 < stack.len())`.
//! 3. `stack.len() <= limit` after every recompute.
//! 4. A pending tag is consumed by exactly one recompute.
//!
//! Undo/redo outside bounds are silent no-ops, surfaced as the two
//! booleans so callers can disable controls instead of handling errors.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rewind_cells::{Cell, Setter, Unmount};
use tracing::trace;

use crate::action::Action;
use crate::log::{History, HistoryLogCell};

/// An undo-stack cell: read an [`Undoable`], write an [`Action`].
pub type UndoStackCell = Cell<Undoable, Action>;

/// Navigation surface of an undo stack.
#[derive(Clone)]
pub struct Undoable {
    can_undo: bool,
    can_redo: bool,
    control: Setter<Action>,
}

impl Undoable {
    /// Whether a step back is available.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.can_undo
    }

    /// Whether a step forward is available.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.can_redo
    }

    /// Step the target back to the previous recorded value. No-op when
    /// nothing can be undone.
    pub fn undo(&self) {
        self.control.send(Action::Undo);
    }

    /// Step the target forward to the next recorded value. No-op when
    /// nothing can be redone.
    pub fn redo(&self) {
        self.control.send(Action::Redo);
    }
}

impl fmt::Debug for Undoable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Undoable")
            .field("can_undo", &self.can_undo)
            .field("can_redo", &self.can_redo)
            .finish_non_exhaustive()
    }
}

/// One-shot navigation latch. `Idle → {Undo, Redo, Reset}` when the
/// corresponding write is issued; back to `Idle` on the next recompute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pending {
    Idle,
    Undo,
    Redo,
    Reset,
}

struct UndoState<T> {
    index: usize,
    stack: Vec<T>,
    pending: Pending,
}

impl<T> Default for UndoState<T> {
    fn default() -> Self {
        Self {
            index: 0,
            stack: Vec::new(),
            pending: Pending::Idle,
        }
    }
}

struct UndoBuf<T>(Rc<RefCell<UndoState<T>>>);

impl<T> Clone for UndoBuf<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T> UndoBuf<T> {
    fn new() -> Self {
        Self(Rc::new(RefCell::new(UndoState::default())))
    }
}

/// [`undo_stack_with`] for targets whose write channel takes the value
/// itself.
pub fn undo_stack<T>(
    history: &HistoryLogCell<T>,
    target: &Cell<T, T>,
    limit: usize,
) -> UndoStackCell
where
    T: Clone + 'static,
{
    undo_stack_with(history, target, limit, |value: &T| value.clone())
}

/// Derive undo/redo navigation for `target` from `history`.
///
/// `to_args` maps a recorded value to the target's write arguments, for
/// targets whose write contract differs from their read value. Arguments
/// the target rejects are the caller's configuration error, surfaced by
/// the target's own write path.
pub fn undo_stack_with<T, A>(
    history: &HistoryLogCell<T>,
    target: &Cell<T, A>,
    limit: usize,
    to_args: impl Fn(&T) -> A + 'static,
) -> UndoStackCell
where
    T: Clone + 'static,
    A: 'static,
{
    let limit = limit.max(1);
    let refresh = Cell::new(0u64).private().labeled("undo.refresh");
    let buffer: Cell<UndoBuf<T>, ()> = {
        let refresh = refresh.clone();
        Cell::seeded_rw(UndoBuf::new, move |ctx, ()| {
            let shared: UndoBuf<T> = ctx.self_value();
            *shared.0.borrow_mut() = UndoState::default();
            let round: u64 = ctx.get(&refresh);
            ctx.set(&refresh, round.wrapping_add(1));
        })
        .private()
        .labeled("undo.state")
    };

    let read_history = history.clone();
    let read_refresh = refresh.clone();
    let read_buffer = buffer.clone();
    let write_refresh = refresh;
    let write_buffer = buffer.clone();
    let write_target = target.clone();
    let mount_buffer = buffer;
    let mount_target = target.clone();
    Cell::derived_rw(
        move |ctx| {
            ctx.get(&read_refresh);
            let log: History<T> = ctx.get(&read_history);
            let shared: UndoBuf<T> = ctx.get(&read_buffer);
            let mut state = shared.0.borrow_mut();
            if state.pending == Pending::Idle {
                // Forward write: discard the redo-able future, record the
                // new head, keep the window, move the cursor to the end.
                let keep = (state.index + 1).min(state.stack.len());
                state.stack.truncate(keep);
                if let Some(newest) = log.newest() {
                    state.stack.push(newest.clone());
                }
                if state.stack.len() > limit {
                    let excess = state.stack.len() - limit;
                    state.stack.drain(..excess);
                }
                state.index = state.stack.len().saturating_sub(1);
            } else {
                // Recompute caused by this cell's own navigation write.
                state.pending = Pending::Idle;
            }
            let can_undo = state.index > 0;
            let can_redo = state.index + 1 < state.stack.len();
            drop(state);
            Undoable {
                can_undo,
                can_redo,
                control: ctx.self_setter(),
            }
        },
        move |ctx, action: Action| match action {
            Action::Undo => {
                let shared: UndoBuf<T> = ctx.get(&write_buffer);
                let recalled = {
                    let mut state = shared.0.borrow_mut();
                    if state.index > 0 {
                        state.index -= 1;
                        state.pending = Pending::Undo;
                        Some(state.stack[state.index].clone())
                    } else {
                        None
                    }
                };
                if let Some(value) = recalled {
                    trace!("undo");
                    ctx.set(&write_target, to_args(&value));
                }
            }
            Action::Redo => {
                let shared: UndoBuf<T> = ctx.get(&write_buffer);
                let recalled = {
                    let mut state = shared.0.borrow_mut();
                    if state.index + 1 < state.stack.len() {
                        state.index += 1;
                        state.pending = Pending::Redo;
                        Some(state.stack[state.index].clone())
                    } else {
                        None
                    }
                };
                if let Some(value) = recalled {
                    trace!("redo");
                    ctx.set(&write_target, to_args(&value));
                }
            }
            Action::Reset => {
                let shared: UndoBuf<T> = ctx.get(&write_buffer);
                let current: T = ctx.get(&write_target);
                *shared.0.borrow_mut() = UndoState {
                    index: 0,
                    stack: vec![current],
                    pending: Pending::Reset,
                };
                let round: u64 = ctx.get(&write_refresh);
                ctx.set(&write_refresh, round.wrapping_add(1));
            }
        },
    )
    .on_mount(move |ctx| -> Option<Unmount> {
        let shared: UndoBuf<T> = ctx.store().get(&mount_buffer);
        let current: T = ctx.store().get(&mount_target);
        *shared.0.borrow_mut() = UndoState {
            index: 0,
            stack: vec![current],
            pending: Pending::Idle,
        };
        let clear = ctx.setter(&mount_buffer);
        Some(Box::new(move || clear.send(())))
    })
    .labeled("undo.stack")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
