#![forbid(unsafe_code)]

//! Cell definitions: the addressable units of a reactive store.
//!
//! # Design
//!
//! A [`Cell`] is a *definition*, not state. Cloning a `Cell` clones a cheap
//! handle to the same definition, and the same definition can be used with
//! any number of [`Store`](crate::store::Store)s — every store builds and
//! owns its own state for it. This is what keeps independent stores fully
//! isolated even when they evaluate the same cell graph.
//!
//! Three kinds of cells exist:
//!
//! - **value cells** ([`Cell::new`]): hold a plain value, writing replaces it;
//! - **seeded cells** ([`Cell::seeded`], [`Cell::seeded_rw`]): state is built
//!   per store by an init closure — the idiom for store-local buffers;
//! - **derived cells** ([`Cell::derived`], [`Cell::derived_rw`]): computed
//!   from whatever other cells their read closure touches.
//!
//! The second type parameter `A` is the write-channel argument type. Cells
//! constructed without a write channel use the uninhabited [`ReadOnly`]
//! marker, so writing to them is unrepresentable rather than a runtime
//! error.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::store::{MountCtx, ReadCtx, WriteCtx};

static NEXT_CELL_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of a cell definition.
///
/// Allocated from a process-wide counter at construction; two handles
/// compare equal exactly when they refer to the same definition.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(u64);

impl CellId {
    fn next() -> Self {
        Self(NEXT_CELL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric identity, for diagnostics.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CellId({})", self.0)
    }
}

/// Write-channel marker for cells that have no write channel.
///
/// Uninhabited: a `Store::set` call on a `Cell<T, ReadOnly>` cannot even be
/// written down, because no value of this type exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadOnly {}

/// A cell known to have no write channel.
pub type ReadOnlyCell<T> = Cell<T, ReadOnly>;

/// Cleanup closure returned by a mount callback, run on unmount.
pub type Unmount = Box<dyn FnOnce()>;

/// A cell value as stored: reference-counted and type-erased.
pub type ErasedValue = Rc<dyn Any>;

pub(crate) type InitFn = Box<dyn Fn() -> ErasedValue>;
pub(crate) type ReadFn = Box<dyn Fn(&mut ReadCtx<'_>) -> ErasedValue>;
pub(crate) type WriteFn = Box<dyn Fn(&mut WriteCtx<'_>, Box<dyn Any>)>;
pub(crate) type MountFn = Box<dyn Fn(&MountCtx<'_>) -> Option<Unmount>>;

pub(crate) enum Compute {
    /// State built once per store by the init closure; never recomputed.
    Seed(InitFn),
    /// Recomputed from the cells the read closure touches.
    Derived(ReadFn),
}

pub(crate) struct CellCore {
    pub(crate) id: CellId,
    pub(crate) label: Option<&'static str>,
    pub(crate) compute: Compute,
    pub(crate) write: Option<WriteFn>,
    pub(crate) on_mount: Option<MountFn>,
    pub(crate) private: bool,
}

/// Handle to a cell definition. See the module docs for the three kinds.
pub struct Cell<T, A = T> {
    core: Rc<CellCore>,
    _marker: PhantomData<fn(A) -> T>,
}

impl<T, A> Clone for Cell<T, A> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
            _marker: PhantomData,
        }
    }
}

impl<T, A> fmt::Debug for Cell<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.core.id)
            .field("label", &self.core.label)
            .field("writable", &self.core.write.is_some())
            .field("private", &self.core.private)
            .finish()
    }
}

impl<T: Clone + 'static> Cell<T, T> {
    /// A value cell: holds `initial` per store, writing replaces the value.
    #[must_use]
    pub fn new(initial: T) -> Self {
        let write: WriteFn = Box::new(|ctx: &mut WriteCtx<'_>, args: Box<dyn Any>| {
            let value = args
                .downcast::<T>()
                .unwrap_or_else(|_| panic!("write channel received a mismatched argument type"));
            ctx.replace_self(Rc::new(*value) as ErasedValue);
        });
        Self::build(
            Compute::Seed(Box::new(move || Rc::new(initial.clone()) as ErasedValue)),
            Some(write),
        )
    }
}

impl<T: Clone + 'static> Cell<T, ReadOnly> {
    /// A seeded cell: each store builds its own state by calling `init`.
    #[must_use]
    pub fn seeded(init: impl Fn() -> T + 'static) -> Self {
        Self::build(
            Compute::Seed(Box::new(move || Rc::new(init()) as ErasedValue)),
            None,
        )
    }

    /// A derived cell, recomputed from the cells `read` touches.
    #[must_use]
    pub fn derived(read: impl Fn(&mut ReadCtx<'_>) -> T + 'static) -> Self {
        Self::build(
            Compute::Derived(Box::new(move |ctx| Rc::new(read(ctx)) as ErasedValue)),
            None,
        )
    }
}

impl<T: Clone + 'static, A: 'static> Cell<T, A> {
    /// A seeded cell with a custom write channel.
    #[must_use]
    pub fn seeded_rw(
        init: impl Fn() -> T + 'static,
        write: impl Fn(&mut WriteCtx<'_>, A) + 'static,
    ) -> Self {
        Self::build(
            Compute::Seed(Box::new(move || Rc::new(init()) as ErasedValue)),
            Some(erase_write(write)),
        )
    }

    /// A derived cell with a custom write channel.
    #[must_use]
    pub fn derived_rw(
        read: impl Fn(&mut ReadCtx<'_>) -> T + 'static,
        write: impl Fn(&mut WriteCtx<'_>, A) + 'static,
    ) -> Self {
        Self::build(
            Compute::Derived(Box::new(move |ctx| Rc::new(read(ctx)) as ErasedValue)),
            Some(erase_write(write)),
        )
    }

    fn build(compute: Compute, write: Option<WriteFn>) -> Self {
        Self {
            core: Rc::new(CellCore {
                id: CellId::next(),
                label: None,
                compute,
                write,
                on_mount: None,
                private: false,
            }),
            _marker: PhantomData,
        }
    }

    /// Mark the cell private: store-wide instrumentation skips it.
    #[must_use]
    pub fn private(mut self) -> Self {
        self.core_mut().private = true;
        self
    }

    /// Attach a label, surfaced in `Debug` output and tracing events.
    #[must_use]
    pub fn labeled(mut self, label: &'static str) -> Self {
        self.core_mut().label = Some(label);
        self
    }

    /// Attach a mount callback, run when the cell gains its first observer
    /// in a store. The returned closure, if any, runs at unmount.
    #[must_use]
    pub fn on_mount(mut self, f: impl Fn(&MountCtx<'_>) -> Option<Unmount> + 'static) -> Self {
        self.core_mut().on_mount = Some(Box::new(f));
        self
    }

    fn core_mut(&mut self) -> &mut CellCore {
        Rc::get_mut(&mut self.core)
            .expect("cell options must be set before the cell handle is cloned")
    }

    /// Whether this cell has a write channel.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.core.write.is_some()
    }

    /// Whether this cell is excluded from store-wide instrumentation.
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.core.private
    }

    /// Attached label, if any.
    #[must_use]
    pub fn label(&self) -> Option<&'static str> {
        self.core.label
    }

}

impl<T, A> Cell<T, A> {
    /// Identity of this cell definition.
    #[must_use]
    pub fn id(&self) -> CellId {
        self.core.id
    }

    pub(crate) fn core(&self) -> &Rc<CellCore> {
        &self.core
    }
}

fn erase_write<A: 'static>(write: impl Fn(&mut WriteCtx<'_>, A) + 'static) -> WriteFn {
    Box::new(move |ctx, args| {
        let args = args
            .downcast::<A>()
            .unwrap_or_else(|_| panic!("write channel received a mismatched argument type"));
        write(ctx, *args);
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
