//! Incremental tri-color mark-sweep heap (spec.md §4.6).
//!
//! Grounded on the shape of the teacher's object header
//! (`crates/luars/src/gc/gc_object.rs`) and generation-checked handle
//! (`crates/luars/src/gc/gc_id.rs`), collapsed into a single coherent
//! arena rather than the teacher's three overlapping experimental pool
//! implementations (see DESIGN.md).

mod object;
mod string_interner;

pub use object::Object;
pub use string_interner::StringInterner;

use crate::value::{Closure, Table, Thread, UserData};
use std::cell::{Ref, RefCell, RefMut};
use std::marker::PhantomData;

/// Tri-color marking state used by the incremental collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    White,
    Gray,
    Black,
}

/// A generation-checked handle into the heap. `Copy`, so `Value` stays
/// cheap to clone the way spec.md §3 implies ("tables/functions/... compare
/// by identity").
pub struct GcRef<T> {
    idx: u32,
    gen: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for GcRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for GcRef<T> {}

impl<T> PartialEq for GcRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.idx == other.idx && self.gen == other.gen
    }
}
impl<T> Eq for GcRef<T> {}

impl<T> std::hash::Hash for GcRef<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.idx.hash(state);
        self.gen.hash(state);
    }
}

impl<T> std::fmt::Debug for GcRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GcRef({}#{})", self.idx, self.gen)
    }
}

impl<T> GcRef<T> {
    pub fn id(&self) -> u64 {
        ((self.idx as u64) << 32) | self.gen as u64
    }
}

struct Slot {
    gen: u32,
    live: bool,
    color: Color,
    /// Set the moment a finalizable table becomes unreachable; cleared
    /// after `__gc` has run once (spec.md §3 lifecycle, §4.6 finalize phase).
    queued_for_finalize: bool,
    finalized: bool,
    data: Option<Object>,
}

pub struct Heap {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    pub interner: StringInterner,
    /// Roots outside the call stack: globals table, package.loaded, the
    /// running thread chain. The evaluator pushes/pops call-stack roots
    /// separately via `Heap::mark_from`.
    extra_roots: Vec<u64>,
    gray_queue: Vec<u32>,
    bytes_allocated: usize,
    gc_pause_pct: u32,
    gc_stepmul: u32,
    collections_run: u64,
    finalize_queue: Vec<u32>,
    stopped: bool,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            slots: Vec::new(),
            free_list: Vec::new(),
            interner: StringInterner::new(),
            extra_roots: Vec::new(),
            gray_queue: Vec::new(),
            bytes_allocated: 0,
            gc_pause_pct: 200,
            gc_stepmul: 100,
            collections_run: 0,
            finalize_queue: Vec::new(),
            stopped: false,
        }
    }

    fn alloc_slot(&mut self, data: Object, size_hint: usize) -> (u32, u32) {
        self.bytes_allocated += size_hint;
        if let Some(idx) = self.free_list.pop() {
            let slot = &mut self.slots[idx as usize];
            slot.gen += 1;
            slot.live = true;
            slot.color = Color::White;
            slot.queued_for_finalize = false;
            slot.finalized = false;
            slot.data = Some(data);
            (idx, slot.gen)
        } else {
            let idx = self.slots.len() as u32;
            self.slots.push(Slot {
                gen: 0,
                live: true,
                color: Color::White,
                queued_for_finalize: false,
                finalized: false,
                data: Some(data),
            });
            (idx, 0)
        }
    }

    pub fn alloc_table(&mut self, t: Table) -> GcRef<Table> {
        let (idx, gen) = self.alloc_slot(Object::Table(RefCell::new(t)), 64);
        GcRef {
            idx,
            gen,
            _marker: PhantomData,
        }
    }

    pub fn alloc_closure(&mut self, c: Closure) -> GcRef<Closure> {
        let (idx, gen) = self.alloc_slot(Object::Closure(RefCell::new(c)), 48);
        GcRef {
            idx,
            gen,
            _marker: PhantomData,
        }
    }

    pub fn alloc_userdata(&mut self, u: UserData) -> GcRef<UserData> {
        let (idx, gen) = self.alloc_slot(Object::UserData(RefCell::new(u)), 32);
        GcRef {
            idx,
            gen,
            _marker: PhantomData,
        }
    }

    pub fn alloc_thread(&mut self, t: Thread) -> GcRef<Thread> {
        let (idx, gen) = self.alloc_slot(Object::Thread(RefCell::new(t)), 256);
        GcRef {
            idx,
            gen,
            _marker: PhantomData,
        }
    }

    fn slot(&self, idx: u32, gen: u32) -> &Slot {
        let s = &self.slots[idx as usize];
        assert!(s.live && s.gen == gen, "use of freed GcRef");
        s
    }

    pub fn table(&self, r: GcRef<Table>) -> Ref<'_, Table> {
        match self.slot(r.idx, r.gen).data.as_ref().unwrap() {
            Object::Table(c) => c.borrow(),
            _ => unreachable!(),
        }
    }

    pub fn table_mut(&self, r: GcRef<Table>) -> RefMut<'_, Table> {
        match self.slot(r.idx, r.gen).data.as_ref().unwrap() {
            Object::Table(c) => c.borrow_mut(),
            _ => unreachable!(),
        }
    }

    pub fn closure(&self, r: GcRef<Closure>) -> Ref<'_, Closure> {
        match self.slot(r.idx, r.gen).data.as_ref().unwrap() {
            Object::Closure(c) => c.borrow(),
            _ => unreachable!(),
        }
    }

    pub fn closure_mut(&self, r: GcRef<Closure>) -> RefMut<'_, Closure> {
        match self.slot(r.idx, r.gen).data.as_ref().unwrap() {
            Object::Closure(c) => c.borrow_mut(),
            _ => unreachable!(),
        }
    }

    pub fn userdata(&self, r: GcRef<UserData>) -> Ref<'_, UserData> {
        match self.slot(r.idx, r.gen).data.as_ref().unwrap() {
            Object::UserData(c) => c.borrow(),
            _ => unreachable!(),
        }
    }

    pub fn userdata_mut(&self, r: GcRef<UserData>) -> RefMut<'_, UserData> {
        match self.slot(r.idx, r.gen).data.as_ref().unwrap() {
            Object::UserData(c) => c.borrow_mut(),
            _ => unreachable!(),
        }
    }

    pub fn thread(&self, r: GcRef<Thread>) -> Ref<'_, Thread> {
        match self.slot(r.idx, r.gen).data.as_ref().unwrap() {
            Object::Thread(c) => c.borrow(),
            _ => unreachable!(),
        }
    }

    pub fn thread_mut(&self, r: GcRef<Thread>) -> RefMut<'_, Thread> {
        match self.slot(r.idx, r.gen).data.as_ref().unwrap() {
            Object::Thread(c) => c.borrow_mut(),
            _ => unreachable!(),
        }
    }

    /// Forward write barrier (spec.md §4.6): call whenever a black object
    /// gains a reference to `target`. Repaints `target` gray so it is
    /// re-scanned before the next sweep.
    pub fn write_barrier(&mut self, target_id: u64) {
        let idx = (target_id >> 32) as u32;
        if let Some(s) = self.slots.get_mut(idx as usize) {
            if s.live && s.color == Color::Black {
                s.color = Color::Gray;
                self.gray_queue.push(idx);
            }
        }
    }

    pub fn add_root(&mut self, id: u64) {
        self.extra_roots.push(id);
    }

    pub fn clear_roots(&mut self) {
        self.extra_roots.clear();
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn set_incremental_params(&mut self, pause_pct: u32, stepmul: u32) {
        self.gc_pause_pct = pause_pct;
        self.gc_stepmul = stepmul;
    }

    pub fn stop(&mut self) {
        self.stopped = true;
    }
    pub fn restart(&mut self) {
        self.stopped = false;
    }
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn mark_idx(&mut self, idx: u32) {
        if let Some(s) = self.slots.get_mut(idx as usize) {
            if s.live && s.color == Color::White {
                s.color = Color::Gray;
                self.gray_queue.push(idx);
            }
        }
    }

    fn children_of(&self, idx: u32) -> Vec<u64> {
        match self.slots[idx as usize].data.as_ref() {
            Some(Object::Table(c)) => {
                let t = c.borrow();
                let mut out = Vec::new();
                for v in t.array_values() {
                    if let Some(id) = v.gc_id() {
                        out.push(id);
                    }
                }
                for (k, v) in t.hash_iter() {
                    if let Some(id) = k.to_value().gc_id() {
                        out.push(id);
                    }
                    if let Some(id) = v.gc_id() {
                        out.push(id);
                    }
                }
                if let Some(mt) = t.metatable {
                    out.push(mt.id());
                }
                out
            }
            Some(Object::Closure(c)) => {
                let cl = c.borrow();
                cl.upvalue_ids()
            }
            Some(Object::UserData(c)) => {
                let u = c.borrow();
                u.metatable.map(|m| vec![m.id()]).unwrap_or_default()
            }
            Some(Object::Thread(c)) => {
                let t = c.borrow();
                t.gc_roots()
            }
            None => Vec::new(),
        }
    }

    /// Full stop-the-world cycle: mark from roots, clear weak entries,
    /// queue finalizers, sweep, run one pending finalizer.
    ///
    /// `extra_roots` are call-stack-resident values the evaluator is
    /// holding right now (locals, the operand being evaluated, ...).
    pub fn collect_cycle(&mut self, extra_roots: &[u64]) {
        for s in self.slots.iter_mut() {
            if s.live {
                s.color = Color::White;
            }
        }
        self.gray_queue.clear();
        let roots: Vec<u64> = self
            .extra_roots
            .iter()
            .copied()
            .chain(extra_roots.iter().copied())
            .collect();
        for id in roots {
            self.mark_idx((id >> 32) as u32);
        }
        while let Some(idx) = self.gray_queue.pop() {
            let children = self.children_of(idx);
            for id in children {
                self.mark_idx((id >> 32) as u32);
            }
            if let Some(s) = self.slots.get_mut(idx as usize) {
                s.color = Color::Black;
            }
        }
        // Atomic phase: ephemeron fixed point for weak-key tables, then
        // clear remaining unreachable weak entries, per spec.md §4.6.
        self.resolve_ephemerons();
        self.clear_weak_entries();
        // Queue finalizers for unreachable, finalizable tables before sweep.
        for idx in 0..self.slots.len() {
            let white_and_finalizable = {
                let s = &self.slots[idx];
                s.live
                    && s.color == Color::White
                    && !s.finalized
                    && !s.queued_for_finalize
                    && matches!(
                        s.data.as_ref(),
                        Some(Object::Table(c)) if c.borrow().has_gc_metamethod
                    )
            };
            if white_and_finalizable {
                self.slots[idx].queued_for_finalize = true;
                self.finalize_queue.push(idx as u32);
            }
        }
        // Finalizable-but-unreachable objects are resurrected for this
        // cycle (their table is still alive until `finalize_one` runs);
        // they are freed on the *next* cycle that finds them still white
        // and already finalized.
        for idx in 0..self.slots.len() {
            if self.slots[idx].queued_for_finalize && !self.slots[idx].finalized {
                self.slots[idx].color = Color::Gray;
            }
        }
        self.sweep();
        self.collections_run += 1;
    }

    fn sweep(&mut self) {
        for idx in 0..self.slots.len() {
            let should_free = {
                let s = &self.slots[idx];
                s.live && s.color == Color::White
            };
            if should_free {
                self.slots[idx].live = false;
                self.slots[idx].data = None;
                self.free_list.push(idx as u32);
            }
        }
    }

    fn resolve_ephemerons(&mut self) {
        // Fixed point: repeat while a weak-key table's value became
        // reachable this round because its key got marked elsewhere.
        let mut changed = true;
        let mut guard = 0;
        while changed && guard < 64 {
            changed = false;
            guard += 1;
            for idx in 0..self.slots.len() {
                let (is_weak_key, entries) = {
                    let s = &self.slots[idx];
                    if !s.live || s.color != Color::Black {
                        (false, Vec::new())
                    } else if let Some(Object::Table(c)) = s.data.as_ref() {
                        let t = c.borrow();
                        if t.weak_keys && !t.weak_values {
                            let e: Vec<(u64, u64)> = t
                                .hash_iter()
                                .filter_map(|(k, v)| {
                                    let kid = k.to_value().gc_id()?;
                                    let vid = v.gc_id()?;
                                    Some((kid, vid))
                                })
                                .collect();
                            (true, e)
                        } else {
                            (false, Vec::new())
                        }
                    } else {
                        (false, Vec::new())
                    }
                };
                if !is_weak_key {
                    continue;
                }
                for (kid, vid) in entries {
                    let kidx = (kid >> 32) as u32;
                    let key_reachable = self
                        .slots
                        .get(kidx as usize)
                        .map(|s| s.color != Color::White)
                        .unwrap_or(false);
                    if key_reachable {
                        let vidx = (vid >> 32) as u32;
                        if let Some(s) = self.slots.get_mut(vidx as usize) {
                            if s.live && s.color == Color::White {
                                s.color = Color::Gray;
                                self.gray_queue.push(vidx);
                                changed = true;
                            }
                        }
                    }
                }
            }
            while let Some(idx) = self.gray_queue.pop() {
                let children = self.children_of(idx);
                for id in children {
                    self.mark_idx((id >> 32) as u32);
                }
                if let Some(s) = self.slots.get_mut(idx as usize) {
                    s.color = Color::Black;
                }
            }
        }
    }

    fn clear_weak_entries(&mut self) {
        for idx in 0..self.slots.len() {
            let is_weak = {
                let s = &self.slots[idx];
                s.live
                    && matches!(s.data.as_ref(), Some(Object::Table(c)) if c.borrow().weak_keys || c.borrow().weak_values)
            };
            if !is_weak {
                continue;
            }
            if let Some(Object::Table(c)) = self.slots[idx].data.as_ref() {
                let (weak_keys, weak_values) = {
                    let t = c.borrow();
                    (t.weak_keys, t.weak_values)
                };
                let mut t = c.borrow_mut();
                let dead_keys: Vec<_> = t
                    .hash_iter()
                    .filter(|(k, v)| {
                        let key_dead = weak_keys
                            && k.to_value()
                                .gc_id()
                                .map(|id| self.is_white(id))
                                .unwrap_or(false);
                        let val_dead = weak_values
                            && v.gc_id().map(|id| self.is_white(id)).unwrap_or(false);
                        key_dead || val_dead
                    })
                    .map(|(k, _)| k.clone())
                    .collect();
                for k in dead_keys {
                    t.hash_remove(&k);
                }
            }
        }
    }

    fn is_white(&self, id: u64) -> bool {
        let idx = (id >> 32) as u32;
        self.slots
            .get(idx as usize)
            .map(|s| s.color == Color::White)
            .unwrap_or(true)
    }

    /// Runs at most one queued finalizer, per spec.md §4.6 ("one per
    /// step"). Returns the table value to hand to `__gc` if one ran.
    pub fn take_one_finalizer(&mut self) -> Option<(GcRef<Table>, u64)> {
        while let Some(idx) = self.finalize_queue.pop() {
            let s = &self.slots[idx as usize];
            if s.live && !s.finalized {
                let gen = s.gen;
                self.slots[idx as usize].finalized = true;
                return Some((
                    GcRef {
                        idx,
                        gen,
                        _marker: PhantomData,
                    },
                    ((idx as u64) << 32) | gen as u64,
                ));
            }
        }
        None
    }

    pub fn pending_finalizers(&self) -> usize {
        self.finalize_queue.len()
    }

    pub fn object_count(&self) -> usize {
        self.slots.iter().filter(|s| s.live).count()
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
