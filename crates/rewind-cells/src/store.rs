#![forbid(unsafe_code)]

//! The store: per-instance cell state, synchronous push propagation, and
//! the subscriber-driven mount/unmount lifecycle.
//!
//! # Design
//!
//! A [`Store`] is a cheap handle over shared, reference-counted interior
//! state (`Rc<RefCell<..>>`). All cell values, dependency edges, listeners
//! and mount flags live here; cell definitions stay store-independent.
//!
//! # Propagation model
//!
//! Every mutating operation runs inside a *wave*. Writes nested in other
//! writes join the enclosing wave; when the outermost operation finishes,
//! the store:
//!
//! 1. recomputes every stale, mounted, transitively dependent derived cell
//!    exactly once, in dependency order (Kahn), draining any writes issued
//!    by change hooks into the same wave;
//! 2. notifies subscribers of cells whose value committed this wave, each
//!    at most once;
//! 3. fires the flush hooks.
//!
//! Unmounted dependents are only marked stale and recompute on demand at
//! the next read. No cell ever observes a partially-updated upstream
//! snapshot: stale dependencies are resolved depth-first before a read
//! returns.
//!
//! # Failure Modes
//!
//! - **Dependency cycles**: a read closure that (transitively) reads its own
//!   cell recurses until the stack overflows. Cycles indicate a design bug
//!   in the host graph and are not detected.
//! - **Type confusion**: forcing a mismatched argument type through an
//!   untyped [`Setter`] panics at delivery. The typed `get`/`set` surface
//!   cannot trigger this.

use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use tracing::{info_span, trace};
use web_time::Instant;

use crate::cell::{Cell, CellCore, CellId, Compute, ErasedValue, Unmount};
use crate::hooks::{HookHandle, HookRegistry};

#[derive(Default)]
struct CellState {
    value: Option<ErasedValue>,
    epoch: u64,
    stale: bool,
    deps: Vec<CellId>,
    dependents: Vec<CellId>,
    listeners: Vec<(u64, Rc<dyn Fn()>)>,
    mounted: bool,
    cleanup: Option<Unmount>,
}

#[derive(Default)]
struct WaveState {
    depth: u32,
    /// Cells committed by writes this wave; propagation roots.
    dirty: Vec<CellId>,
    /// Every cell whose value committed this wave; notification targets.
    changed: Vec<CellId>,
}

#[derive(Default)]
struct StoreCore {
    cells: RefCell<HashMap<CellId, CellState>>,
    defs: RefCell<HashMap<CellId, Rc<CellCore>>>,
    hooks: HookRegistry,
    wave: RefCell<WaveState>,
    listener_seq: RefCell<u64>,
}

/// A store instance. Cloning shares the same interior state.
#[derive(Clone)]
pub struct Store {
    core: Rc<StoreCore>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells = self.core.cells.borrow();
        let mounted = cells.values().filter(|st| st.mounted).count();
        f.debug_struct("Store")
            .field("cells", &cells.len())
            .field("mounted", &mounted)
            .finish()
    }
}

impl Store {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Rc::new(StoreCore::default()),
        }
    }

    /// Current value of `cell`, recomputing it first if stale.
    #[must_use]
    pub fn get<T: Clone + 'static, A: 'static>(&self, cell: &Cell<T, A>) -> T {
        self.register(cell.core());
        let value = self.resolve(cell.id());
        downcast_clone(&value, cell.id())
    }

    /// Write to `cell`'s write channel and synchronously propagate to every
    /// mounted dependent before returning.
    pub fn set<T, A: 'static>(&self, cell: &Cell<T, A>, args: A) {
        self.register(cell.core());
        self.write(cell.id(), Box::new(args));
    }

    /// Group several writes into one wave: subscribers and flush hooks
    /// observe a single coalesced notification when `f` returns.
    pub fn batch<R>(&self, f: impl FnOnce(&Store) -> R) -> R {
        let root = self.begin_op();
        let result = f(self);
        self.end_op(root);
        result
    }

    /// Subscribe to `cell`. The first subscription mounts the cell (and,
    /// transitively, its dependencies); dropping the returned guard
    /// unsubscribes, and the last unsubscribe unmounts.
    ///
    /// The listener runs after each wave in which the cell's value
    /// committed, at most once per wave. It receives no arguments; re-read
    /// through the store for the current value.
    pub fn subscribe<T: Clone + 'static, A: 'static>(
        &self,
        cell: &Cell<T, A>,
        listener: impl Fn() + 'static,
    ) -> Subscription {
        self.register(cell.core());
        let root = self.begin_op();
        self.resolve(cell.id());
        self.mount(cell.id());
        let key = {
            let mut seq = self.core.listener_seq.borrow_mut();
            *seq += 1;
            *seq
        };
        {
            let mut cells = self.core.cells.borrow_mut();
            cells
                .entry(cell.id())
                .or_default()
                .listeners
                .push((key, Rc::new(listener)));
        }
        self.end_op(root);
        Subscription {
            store: Rc::downgrade(&self.core),
            id: cell.id(),
            key,
        }
    }

    /// Register a hook fired after each committed value change.
    pub fn on_cell_change(&self, f: impl Fn(&Store, CellId) + 'static) -> HookHandle {
        self.core.hooks.add_change(f)
    }

    /// Register a hook fired when a cell becomes mounted.
    pub fn on_cell_mount(&self, f: impl Fn(&Store, CellId) + 'static) -> HookHandle {
        self.core.hooks.add_mount(f)
    }

    /// Register a hook fired when a cell becomes unmounted.
    pub fn on_cell_unmount(&self, f: impl Fn(&Store, CellId) + 'static) -> HookHandle {
        self.core.hooks.add_unmount(f)
    }

    /// Register a hook fired at the end of each wave.
    pub fn on_flush(&self, f: impl Fn(&Store) + 'static) -> HookHandle {
        self.core.hooks.add_flush(f)
    }

    /// Cached value of a cell by identity, without recomputing. `None` if
    /// the cell has never been read in this store.
    #[must_use]
    pub fn peek_raw(&self, id: CellId) -> Option<ErasedValue> {
        self.core.cells.borrow().get(&id).and_then(|st| st.value.clone())
    }

    /// Whether the definition behind `id` carries the private marker.
    #[must_use]
    pub fn is_private(&self, id: CellId) -> bool {
        self.core.defs.borrow().get(&id).is_some_and(|def| def.private)
    }

    /// Whether the cell is currently mounted in this store.
    #[must_use]
    pub fn is_mounted(&self, id: CellId) -> bool {
        self.core.cells.borrow().get(&id).is_some_and(|st| st.mounted)
    }

    /// Number of times the cell's value has committed in this store.
    /// Useful for cheap dirty-checking by instrumentation.
    #[must_use]
    pub fn epoch_of(&self, id: CellId) -> u64 {
        self.core.cells.borrow().get(&id).map_or(0, |st| st.epoch)
    }

    // ========================================================================
    // Wave mechanics
    // ========================================================================

    fn begin_op(&self) -> bool {
        let mut wave = self.core.wave.borrow_mut();
        wave.depth += 1;
        wave.depth == 1
    }

    fn end_op(&self, root: bool) {
        if !root {
            self.core.wave.borrow_mut().depth -= 1;
            return;
        }
        self.propagate();
        let changed = {
            let mut wave = self.core.wave.borrow_mut();
            wave.depth = 0;
            let raw = std::mem::take(&mut wave.changed);
            let mut unique = Vec::with_capacity(raw.len());
            for id in raw {
                if !unique.contains(&id) {
                    unique.push(id);
                }
            }
            unique
        };
        self.notify(&changed);
        self.core.hooks.fire_flush(self);
    }

    fn propagate(&self) {
        if self.core.wave.borrow().dirty.is_empty() {
            return;
        }
        let started = Instant::now();
        let _span = info_span!(
            "cells.wave",
            dirty_roots = tracing::field::Empty,
            recomputed = tracing::field::Empty,
            duration_us = tracing::field::Empty
        )
        .entered();
        let mut roots_seen: u64 = 0;
        let mut recomputed: u64 = 0;
        loop {
            let roots: Vec<CellId> = std::mem::take(&mut self.core.wave.borrow_mut().dirty);
            if roots.is_empty() {
                break;
            }
            roots_seen += roots.len() as u64;
            for id in self.affected_order(&roots) {
                let should = {
                    let cells = self.core.cells.borrow();
                    cells.get(&id).is_some_and(|st| st.stale && st.mounted)
                };
                if should {
                    self.compute(id);
                    recomputed += 1;
                }
            }
        }
        let duration_us = started.elapsed().as_micros() as u64;
        let span = tracing::Span::current();
        span.record("dirty_roots", roots_seen);
        span.record("recomputed", recomputed);
        span.record("duration_us", duration_us);
    }

    /// Mounted cells transitively dependent on `roots`, in dependency order.
    ///
    /// Traversal crosses cells that happen to be fresh already (they may
    /// have been recomputed on demand mid-wave) so staleness further down
    /// the graph is still reached; freshness is rechecked at recompute time.
    fn affected_order(&self, roots: &[CellId]) -> Vec<CellId> {
        let mut subset: Vec<CellId> = Vec::new();
        let mut pending: Vec<CellId> = Vec::new();
        for root in roots {
            pending.extend(self.dependents_of(*root));
        }
        while let Some(id) = pending.pop() {
            if subset.contains(&id) || !self.is_mounted(id) {
                continue;
            }
            subset.push(id);
            pending.extend(self.dependents_of(id));
        }
        let mut indegree: Vec<usize> = subset
            .iter()
            .map(|id| {
                self.deps_of(*id)
                    .iter()
                    .filter(|dep| subset.contains(dep))
                    .count()
            })
            .collect();
        let mut queue: VecDeque<usize> = (0..subset.len()).filter(|i| indegree[*i] == 0).collect();
        let mut order = Vec::with_capacity(subset.len());
        while let Some(i) = queue.pop_front() {
            let id = subset[i];
            order.push(id);
            for dependent in self.dependents_of(id) {
                if let Some(j) = subset.iter().position(|c| *c == dependent) {
                    indegree[j] -= 1;
                    if indegree[j] == 0 {
                        queue.push_back(j);
                    }
                }
            }
        }
        order
    }

    fn notify(&self, changed: &[CellId]) {
        let callbacks: Vec<Rc<dyn Fn()>> = {
            let cells = self.core.cells.borrow();
            changed
                .iter()
                .filter_map(|id| cells.get(id))
                .filter(|st| st.mounted)
                .flat_map(|st| st.listeners.iter().map(|(_, cb)| Rc::clone(cb)))
                .collect()
        };
        for callback in callbacks {
            callback();
        }
    }

    // ========================================================================
    // Reads and computation
    // ========================================================================

    fn register(&self, core: &Rc<CellCore>) {
        self.core
            .defs
            .borrow_mut()
            .entry(core.id)
            .or_insert_with(|| Rc::clone(core));
    }

    fn resolve(&self, id: CellId) -> ErasedValue {
        let cached = {
            let cells = self.core.cells.borrow();
            cells
                .get(&id)
                .filter(|st| !st.stale)
                .and_then(|st| st.value.clone())
        };
        match cached {
            Some(value) => value,
            None => self.compute(id),
        }
    }

    fn compute(&self, id: CellId) -> ErasedValue {
        let def = self
            .core
            .defs
            .borrow()
            .get(&id)
            .cloned()
            .unwrap_or_else(|| panic!("{id:?} used before registration"));
        match &def.compute {
            Compute::Seed(init) => {
                let existing = self.peek_raw(id);
                if let Some(value) = existing {
                    return value;
                }
                let value = init();
                let mut cells = self.core.cells.borrow_mut();
                let state = cells.entry(id).or_default();
                state.value = Some(value.clone());
                state.stale = false;
                value
            }
            Compute::Derived(read) => {
                let mut ctx = ReadCtx {
                    store: self,
                    id,
                    deps: Vec::new(),
                };
                let value = read(&mut ctx);
                let new_deps = ctx.deps;
                self.update_deps(id, &new_deps);
                let recomputed = {
                    let mut cells = self.core.cells.borrow_mut();
                    let state = cells.entry(id).or_default();
                    let had_value = state.value.is_some();
                    state.value = Some(value.clone());
                    state.epoch += 1;
                    state.stale = false;
                    state.deps = new_deps;
                    had_value
                };
                if recomputed {
                    self.record_change(id);
                }
                value
            }
        }
    }

    fn update_deps(&self, id: CellId, new_deps: &[CellId]) {
        let (old_deps, mounted) = {
            let cells = self.core.cells.borrow();
            cells
                .get(&id)
                .map(|st| (st.deps.clone(), st.mounted))
                .unwrap_or_default()
        };
        let added: Vec<CellId> = new_deps
            .iter()
            .copied()
            .filter(|dep| !old_deps.contains(dep))
            .collect();
        let removed: Vec<CellId> = old_deps
            .iter()
            .copied()
            .filter(|dep| !new_deps.contains(dep))
            .collect();
        {
            let mut cells = self.core.cells.borrow_mut();
            for dep in &added {
                let state = cells.entry(*dep).or_default();
                if !state.dependents.contains(&id) {
                    state.dependents.push(id);
                }
            }
            for dep in &removed {
                if let Some(state) = cells.get_mut(dep) {
                    state.dependents.retain(|d| *d != id);
                }
            }
        }
        if mounted {
            for dep in &added {
                self.mount(*dep);
            }
            for dep in &removed {
                self.maybe_unmount(*dep);
            }
        }
    }

    // ========================================================================
    // Writes
    // ========================================================================

    fn write(&self, id: CellId, args: Box<dyn Any>) {
        let def = self
            .core
            .defs
            .borrow()
            .get(&id)
            .cloned()
            .unwrap_or_else(|| panic!("{id:?} used before registration"));
        let Some(write) = def.write.as_ref() else {
            panic!("{id:?} has no write channel");
        };
        let root = self.begin_op();
        let mut ctx = WriteCtx {
            store: self,
            target: id,
        };
        write(&mut ctx, args);
        self.end_op(root);
    }

    fn commit_write(&self, id: CellId, value: ErasedValue) {
        {
            let mut cells = self.core.cells.borrow_mut();
            let state = cells.entry(id).or_default();
            state.value = Some(value);
            state.epoch += 1;
            state.stale = false;
        }
        self.mark_dependents_stale(id);
        {
            let mut wave = self.core.wave.borrow_mut();
            wave.dirty.push(id);
            wave.changed.push(id);
        }
        self.core.hooks.fire_change(self, id);
    }

    fn mark_dependents_stale(&self, id: CellId) {
        let mut pending = self.dependents_of(id);
        while let Some(next) = pending.pop() {
            let freshly_marked = {
                let mut cells = self.core.cells.borrow_mut();
                let state = cells.entry(next).or_default();
                if state.stale {
                    false
                } else {
                    state.stale = true;
                    true
                }
            };
            if freshly_marked {
                pending.extend(self.dependents_of(next));
            }
        }
    }

    fn record_change(&self, id: CellId) {
        let in_wave = self.core.wave.borrow().depth > 0;
        if in_wave {
            self.core.wave.borrow_mut().changed.push(id);
        }
        self.core.hooks.fire_change(self, id);
    }

    // ========================================================================
    // Mount lifecycle
    // ========================================================================

    fn mount(&self, id: CellId) {
        let already = self.is_mounted(id);
        if already {
            return;
        }
        self.resolve(id);
        for dep in self.deps_of(id) {
            self.mount(dep);
        }
        {
            let mut cells = self.core.cells.borrow_mut();
            cells.entry(id).or_default().mounted = true;
        }
        trace!(cell = ?id, label = self.label_of(id), "mount");
        self.core.hooks.fire_mount(self, id);
        let def = self.core.defs.borrow().get(&id).cloned();
        if let Some(def) = def {
            if let Some(on_mount) = def.on_mount.as_ref() {
                let ctx = MountCtx { store: self, id };
                if let Some(cleanup) = on_mount(&ctx) {
                    self.core
                        .cells
                        .borrow_mut()
                        .entry(id)
                        .or_default()
                        .cleanup = Some(cleanup);
                }
            }
        }
    }

    fn maybe_unmount(&self, id: CellId) {
        let keep = {
            let cells = self.core.cells.borrow();
            let Some(state) = cells.get(&id) else {
                return;
            };
            !state.mounted
                || !state.listeners.is_empty()
                || state
                    .dependents
                    .iter()
                    .any(|d| cells.get(d).is_some_and(|s| s.mounted))
        };
        if keep {
            return;
        }
        let cleanup = {
            let mut cells = self.core.cells.borrow_mut();
            let state = cells.entry(id).or_default();
            state.mounted = false;
            state.cleanup.take()
        };
        if let Some(cleanup) = cleanup {
            cleanup();
        }
        trace!(cell = ?id, label = self.label_of(id), "unmount");
        self.core.hooks.fire_unmount(self, id);
        for dep in self.deps_of(id) {
            self.maybe_unmount(dep);
        }
    }

    fn remove_listener(&self, id: CellId, key: u64) {
        if let Some(state) = self.core.cells.borrow_mut().get_mut(&id) {
            state.listeners.retain(|(k, _)| *k != key);
        }
    }

    // ========================================================================
    // Small lookups
    // ========================================================================

    fn dependents_of(&self, id: CellId) -> Vec<CellId> {
        self.core
            .cells
            .borrow()
            .get(&id)
            .map(|st| st.dependents.clone())
            .unwrap_or_default()
    }

    fn deps_of(&self, id: CellId) -> Vec<CellId> {
        self.core
            .cells
            .borrow()
            .get(&id)
            .map(|st| st.deps.clone())
            .unwrap_or_default()
    }

    fn label_of(&self, id: CellId) -> Option<&'static str> {
        self.core.defs.borrow().get(&id).and_then(|def| def.label)
    }
}

fn downcast_clone<T: Clone + 'static>(value: &ErasedValue, id: CellId) -> T {
    value
        .downcast_ref::<T>()
        .unwrap_or_else(|| panic!("{id:?} holds a value of an unexpected type"))
        .clone()
}

// ---------------------------------------------------------------------------
// Contexts and guards
// ---------------------------------------------------------------------------

/// Tracking read context passed to derived-cell read closures.
///
/// Every `get` records the read cell as a dependency of the computing cell.
pub struct ReadCtx<'a> {
    store: &'a Store,
    id: CellId,
    deps: Vec<CellId>,
}

impl ReadCtx<'_> {
    /// Read another cell, recording it as a dependency.
    pub fn get<T: Clone + 'static, A: 'static>(&mut self, cell: &Cell<T, A>) -> T {
        self.store.register(cell.core());
        let value = self.store.resolve(cell.id());
        if !self.deps.contains(&cell.id()) {
            self.deps.push(cell.id());
        }
        downcast_clone(&value, cell.id())
    }

    /// A setter addressing the computing cell's own write channel.
    ///
    /// `A` must match the cell's write-channel argument type; a mismatched
    /// send panics at delivery.
    #[must_use]
    pub fn self_setter<A: 'static>(&self) -> Setter<A> {
        Setter::new(self.store, self.id)
    }
}

/// Untracked context passed to write closures.
pub struct WriteCtx<'a> {
    store: &'a Store,
    target: CellId,
}

impl WriteCtx<'_> {
    /// Read a cell without recording a dependency.
    #[must_use]
    pub fn get<T: Clone + 'static, A: 'static>(&self, cell: &Cell<T, A>) -> T {
        self.store.get(cell)
    }

    /// Write to another cell. The write joins the current wave; propagation
    /// happens once, when the outermost operation finishes.
    pub fn set<T, A: 'static>(&self, cell: &Cell<T, A>, args: A) {
        self.store.set(cell, args);
    }

    /// Current value of the cell being written.
    #[must_use]
    pub fn self_value<T: Clone + 'static>(&self) -> T {
        let value = self.store.resolve(self.target);
        downcast_clone(&value, self.target)
    }

    pub(crate) fn replace_self(&mut self, value: ErasedValue) {
        self.store.commit_write(self.target, value);
    }
}

/// Context passed to mount callbacks.
pub struct MountCtx<'a> {
    store: &'a Store,
    id: CellId,
}

impl MountCtx<'_> {
    /// The store the cell is being mounted in.
    #[must_use]
    pub fn store(&self) -> &Store {
        self.store
    }

    /// Identity of the cell being mounted.
    #[must_use]
    pub fn id(&self) -> CellId {
        self.id
    }

    /// A setter addressing the mounting cell's own write channel.
    #[must_use]
    pub fn self_setter<A: 'static>(&self) -> Setter<A> {
        Setter::new(self.store, self.id)
    }

    /// A setter addressing `cell`'s write channel.
    #[must_use]
    pub fn setter<T, A: 'static>(&self, cell: &Cell<T, A>) -> Setter<A> {
        self.store.register(cell.core());
        Setter::new(self.store, cell.id())
    }
}

/// A deferred write handle: a weak store reference plus a cell identity.
///
/// Sending when the store has been dropped is a no-op, so setters can be
/// stored inside cell values without keeping the store alive.
pub struct Setter<A> {
    store: Weak<StoreCore>,
    id: CellId,
    _marker: PhantomData<fn(A)>,
}

impl<A> Clone for Setter<A> {
    fn clone(&self) -> Self {
        Self {
            store: Weak::clone(&self.store),
            id: self.id,
            _marker: PhantomData,
        }
    }
}

impl<A> fmt::Debug for Setter<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setter").field("id", &self.id).finish()
    }
}

impl<A: 'static> Setter<A> {
    fn new(store: &Store, id: CellId) -> Self {
        Self {
            store: Rc::downgrade(&store.core),
            id,
            _marker: PhantomData,
        }
    }

    /// Write to the addressed cell, starting or joining a wave.
    pub fn send(&self, args: A) {
        let Some(core) = self.store.upgrade() else {
            return;
        };
        let store = Store { core };
        store.write(self.id, Box::new(args));
    }
}

/// RAII guard for a cell subscription.
///
/// Dropping the guard removes the listener; if it was the cell's last
/// observer, the cell (and any dependencies left without mounted
/// dependents) unmounts, running mount cleanups.
#[must_use = "dropping a Subscription unsubscribes"]
pub struct Subscription {
    store: Weak<StoreCore>,
    id: CellId,
    key: u64,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(core) = self.store.upgrade() else {
            return;
        };
        let store = Store { core };
        let root = store.begin_op();
        store.remove_listener(self.id, self.key);
        store.maybe_unmount(self.id);
        store.end_op(root);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::cell::{Cell as Flag, RefCell};
    use std::rc::Rc;

    use super::*;

    #[test]
    fn get_set_value_cell() {
        let store = Store::new();
        let cell = Cell::new(41);
        assert_eq!(store.get(&cell), 41);
        store.set(&cell, 42);
        assert_eq!(store.get(&cell), 42);
    }

    #[test]
    fn derived_tracks_dependency() {
        let store = Store::new();
        let base = Cell::new(2);
        let doubled = {
            let base = base.clone();
            Cell::derived(move |ctx| ctx.get(&base) * 2)
        };
        assert_eq!(store.get(&doubled), 4);
        store.set(&base, 10);
        assert_eq!(store.get(&doubled), 20);
    }

    #[test]
    fn unmounted_derived_recomputes_lazily() {
        let store = Store::new();
        let base = Cell::new(1);
        let runs = Rc::new(Flag::new(0u32));
        let derived = {
            let base = base.clone();
            let runs = Rc::clone(&runs);
            Cell::derived(move |ctx| {
                runs.set(runs.get() + 1);
                ctx.get(&base) + 1
            })
        };
        assert_eq!(store.get(&derived), 2);
        assert_eq!(runs.get(), 1);

        // No write in between: cached.
        assert_eq!(store.get(&derived), 2);
        assert_eq!(runs.get(), 1);

        // Write makes it stale; next read recomputes once.
        store.set(&base, 5);
        assert_eq!(runs.get(), 1);
        assert_eq!(store.get(&derived), 6);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn diamond_recomputes_exactly_once_per_wave() {
        let store = Store::new();
        let base = Cell::new(1);
        let left = {
            let base = base.clone();
            Cell::derived(move |ctx| ctx.get(&base) * 2)
        };
        let right = {
            let base = base.clone();
            Cell::derived(move |ctx| ctx.get(&base) + 10)
        };
        let joins = Rc::new(Flag::new(0u32));
        let join = {
            let left = left.clone();
            let right = right.clone();
            let joins = Rc::clone(&joins);
            Cell::derived(move |ctx| {
                joins.set(joins.get() + 1);
                ctx.get(&left) + ctx.get(&right)
            })
        };
        let _sub = store.subscribe(&join, || {});
        assert_eq!(store.get(&join), 13);
        assert_eq!(joins.get(), 1);

        store.set(&base, 2);
        assert_eq!(joins.get(), 2);
        assert_eq!(store.get(&join), 16);
        assert_eq!(joins.get(), 2);
    }

    #[test]
    fn listener_fires_once_per_wave() {
        let store = Store::new();
        let base = Cell::new(0);
        let plus_one = {
            let base = base.clone();
            Cell::derived(move |ctx| ctx.get(&base) + 1)
        };
        let hits = Rc::new(Flag::new(0u32));
        let hits_listener = Rc::clone(&hits);
        let _sub = store.subscribe(&plus_one, move || hits_listener.set(hits_listener.get() + 1));

        store.set(&base, 1);
        assert_eq!(hits.get(), 1);

        store.batch(|store| {
            store.set(&base, 2);
            store.set(&base, 3);
        });
        assert_eq!(hits.get(), 2);
        assert_eq!(store.get(&plus_one), 4);
    }

    #[test]
    fn no_partial_upstream_snapshot() {
        let store = Store::new();
        let base = Cell::new(1);
        let left = {
            let base = base.clone();
            Cell::derived(move |ctx| ctx.get(&base) * 2)
        };
        let seen = Rc::new(RefCell::new(Vec::new()));
        let join = {
            let base = base.clone();
            let left = left.clone();
            let seen = Rc::clone(&seen);
            Cell::derived(move |ctx| {
                let b = ctx.get(&base);
                let l = ctx.get(&left);
                seen.borrow_mut().push((b, l));
                l - b
            })
        };
        let _sub = store.subscribe(&join, || {});
        store.set(&base, 7);
        // Every observation pairs a base value with its own doubling.
        assert!(seen.borrow().iter().all(|(b, l)| *l == b * 2));
    }

    #[test]
    fn subscription_drop_unmounts() {
        let store = Store::new();
        let cell = Cell::new(0);
        let sub = store.subscribe(&cell, || {});
        assert!(store.is_mounted(cell.id()));
        drop(sub);
        assert!(!store.is_mounted(cell.id()));
    }

    #[test]
    fn second_subscriber_keeps_cell_mounted() {
        let store = Store::new();
        let cell = Cell::new(0);
        let first = store.subscribe(&cell, || {});
        let second = store.subscribe(&cell, || {});
        drop(first);
        assert!(store.is_mounted(cell.id()));
        drop(second);
        assert!(!store.is_mounted(cell.id()));
    }

    #[test]
    fn dependencies_mount_and_unmount_with_dependent() {
        let store = Store::new();
        let base = Cell::new(0);
        let derived = {
            let base = base.clone();
            Cell::derived(move |ctx| ctx.get(&base) + 1)
        };
        let sub = store.subscribe(&derived, || {});
        assert!(store.is_mounted(base.id()));
        assert!(store.is_mounted(derived.id()));
        drop(sub);
        assert!(!store.is_mounted(base.id()));
        assert!(!store.is_mounted(derived.id()));
    }

    #[test]
    fn mount_callback_runs_with_cleanup() {
        let store = Store::new();
        let mounted = Rc::new(Flag::new(0u32));
        let cleaned = Rc::new(Flag::new(0u32));
        let mounted_cb = Rc::clone(&mounted);
        let cleaned_cb = Rc::clone(&cleaned);
        let cell = Cell::new(0).on_mount(move |_ctx| {
            mounted_cb.set(mounted_cb.get() + 1);
            let cleaned = Rc::clone(&cleaned_cb);
            Some(Box::new(move || cleaned.set(cleaned.get() + 1)))
        });

        let sub = store.subscribe(&cell, || {});
        assert_eq!(mounted.get(), 1);
        assert_eq!(cleaned.get(), 0);

        drop(sub);
        assert_eq!(cleaned.get(), 1);

        // Remount runs the callback again.
        let sub = store.subscribe(&cell, || {});
        assert_eq!(mounted.get(), 2);
        drop(sub);
        assert_eq!(cleaned.get(), 2);
    }

    #[test]
    fn seeded_state_is_per_store() {
        let counter = Cell::seeded(|| Rc::new(RefCell::new(Vec::<i32>::new())));
        let first = Store::new();
        let second = Store::new();
        first.get(&counter).borrow_mut().push(1);
        assert!(second.get(&counter).borrow().is_empty());
        assert_eq!(first.get(&counter).borrow().len(), 1);
    }

    #[test]
    fn value_cell_state_is_per_store() {
        let cell = Cell::new(0);
        let first = Store::new();
        let second = Store::new();
        first.set(&cell, 7);
        assert_eq!(first.get(&cell), 7);
        assert_eq!(second.get(&cell), 0);
    }

    #[test]
    fn nested_writes_share_one_wave() {
        let store = Store::new();
        let base = Cell::new(0);
        let shadow = Cell::new(0);
        let relay = {
            let base_read = base.clone();
            let base_write = base.clone();
            let shadow = shadow.clone();
            Cell::derived_rw(
                move |ctx| ctx.get(&base_read),
                move |ctx, value: i32| {
                    ctx.set(&base_write, value);
                    ctx.set(&shadow, value * 10);
                },
            )
        };
        let hits = Rc::new(Flag::new(0u32));
        let hits_listener = Rc::clone(&hits);
        let _sub = store.subscribe(&relay, move || hits_listener.set(hits_listener.get() + 1));

        store.set(&relay, 3);
        assert_eq!(store.get(&base), 3);
        assert_eq!(store.get(&shadow), 30);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn self_setter_reaches_own_channel() {
        let store = Store::new();
        let base = Cell::new(0);
        let echo = {
            let base_read = base.clone();
            let base_write = base.clone();
            Cell::derived_rw(
                move |ctx| {
                    let value = ctx.get(&base_read);
                    (value, ctx.self_setter::<i32>())
                },
                move |ctx, value: i32| ctx.set(&base_write, value),
            )
        };
        let _sub = store.subscribe(&echo, || {});
        let (_, setter) = store.get(&echo);
        setter.send(9);
        let (value, _) = store.get(&echo);
        assert_eq!(value, 9);
    }

    #[test]
    fn setter_after_store_drop_is_noop() {
        let cell = Cell::new(0);
        let setter = {
            let store = Store::new();
            let _ = store.get(&cell);
            let probe = {
                let cell = cell.clone();
                Cell::derived(move |ctx| {
                    ctx.get(&cell);
                    ctx.self_setter::<i32>()
                })
            };
            store.get(&probe)
        };
        // Store is gone; sending must not panic.
        setter.send(1);
    }

    #[test]
    fn mutating_write_channel_on_seeded_cell() {
        let store = Store::new();
        let bucket: Cell<Rc<RefCell<Vec<i32>>>, i32> = Cell::seeded_rw(
            || Rc::new(RefCell::new(Vec::new())),
            |ctx, item: i32| {
                let shared: Rc<RefCell<Vec<i32>>> = ctx.self_value();
                shared.borrow_mut().push(item);
            },
        );
        store.set(&bucket, 1);
        store.set(&bucket, 2);
        assert_eq!(&*store.get(&bucket).borrow(), &[1, 2]);
    }

    #[test]
    fn listener_on_value_cell() {
        let store = Store::new();
        let cell = Cell::new(String::new());
        let last = Rc::new(RefCell::new(String::new()));
        let last_listener = Rc::clone(&last);
        let store_handle = store.clone();
        let cell_handle = cell.clone();
        let _sub = store.subscribe(&cell, move || {
            *last_listener.borrow_mut() = store_handle.get(&cell_handle);
        });

        store.set(&cell, "hello".to_string());
        assert_eq!(&*last.borrow(), "hello");
    }

    #[test]
    fn epoch_counts_commits_not_reads() {
        let store = Store::new();
        let base = Cell::new(0);
        let derived = {
            let base = base.clone();
            Cell::derived(move |ctx| ctx.get(&base) + 1)
        };
        let _sub = store.subscribe(&derived, || {});
        let after_mount = store.epoch_of(derived.id());

        let _ = store.get(&derived);
        let _ = store.get(&derived);
        assert_eq!(store.epoch_of(derived.id()), after_mount);

        store.set(&base, 1);
        store.set(&base, 2);
        assert_eq!(store.epoch_of(derived.id()), after_mount + 2);
        assert_eq!(store.epoch_of(base.id()), 2);
    }

    #[test]
    fn debug_formats() {
        let store = Store::new();
        let cell = Cell::new(0);
        let _sub = store.subscribe(&cell, || {});
        let dbg = format!("{store:?}");
        assert!(dbg.contains("Store"));
        assert!(dbg.contains("mounted"));
        let sub_dbg = format!("{:?}", store.subscribe(&cell, || {}));
        assert!(sub_dbg.contains("Subscription"));
    }
}
