#![forbid(unsafe_code)]

//! Bounded change history and undo/redo for [`rewind_cells`] stores.
//!
//! Four overlays, each an ordinary derived cell over a target (or a whole
//! store), each scoped to one target and owning no shared global state:
//!
//! - [`history_log`] — sliding-window log of a target cell's committed
//!   values, newest first
//! - [`undo_stack`] — undo/redo navigation derived from a history log,
//!   with a one-shot latch that keeps its own navigation writes from being
//!   re-recorded
//! - [`undoable_history`] — both of the above behind one cell, with a
//!   multiplexed write channel and verbatim pass-through for ordinary
//!   writes
//! - [`store_history`] — bounded history of *every* mounted, non-private
//!   cell of a store, via the store's lifecycle hooks
//!
//! All recorded state is volatile: it lives only while the overlay cell is
//! observed, and an unmount/remount cycle reseeds from the current value.
//!
//! # Example
//!
//! ```
//! use rewind_cells::{Cell, Store};
//! use rewind_history::undoable_history;
//!
//! let store = Store::new();
//! let text = Cell::new(String::from("draft"));
//! let history = undoable_history(&text, 10);
//! let _sub = store.subscribe(&history, || {});
//!
//! store.set(&text, String::from("draft 2"));
//! store.get(&history).undo();
//! assert_eq!(store.get(&text), "draft");
//! ```

pub mod action;
pub mod combined;
pub mod log;
pub mod tracker;
pub mod undo;

pub use action::{Action, Command};
pub use combined::{
    UndoableHistory, UndoableHistoryCell, undoable_history, undoable_history_readonly,
    undoable_history_with,
};
pub use log::{History, HistoryLogCell, history_log};
pub use tracker::{StoreHistoryCell, StoreHistoryMap, store_history};
pub use undo::{UndoStackCell, Undoable, undo_stack, undo_stack_with};
