#![forbid(unsafe_code)]

//! Push-based reactive cell store.
//!
//! A [`Cell`] is an addressable unit of state; a [`Store`] owns one
//! instance of every cell's state and propagates writes synchronously:
//! setting a cell recomputes every mounted, transitively dependent derived
//! cell exactly once, in dependency order, before the call returns.
//!
//! # Key Components
//!
//! - [`Cell`] — store-independent cell definition (value / seeded / derived)
//! - [`Store`] — per-instance state, propagation, subscriptions
//! - [`Subscription`] — RAII observer guard driving mount/unmount lifecycle
//! - [`HookHandle`] — RAII guard for store-level change/mount/unmount/flush
//!   hooks, the attachment points for store-wide instrumentation
//! - [`Setter`] — weak deferred write handle, safe to embed in cell values
//!
//! # Example
//!
//! ```
//! use rewind_cells::{Cell, Store};
//!
//! let store = Store::new();
//! let count = Cell::new(0);
//! let doubled = {
//!     let count = count.clone();
//!     Cell::derived(move |ctx| ctx.get(&count) * 2)
//! };
//!
//! let _sub = store.subscribe(&doubled, || {});
//! store.set(&count, 21);
//! assert_eq!(store.get(&doubled), 42);
//! ```
//!
//! Everything is single-threaded and synchronous: no locks, no async, no
//! cancellation. Shared interior state is `Rc<RefCell<..>>`.

pub mod cell;
pub mod hooks;
pub mod store;

pub use cell::{Cell, CellId, ErasedValue, ReadOnly, ReadOnlyCell, Unmount};
pub use hooks::HookHandle;
pub use store::{MountCtx, ReadCtx, Setter, Store, Subscription, WriteCtx};
