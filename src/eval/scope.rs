//! Lexical environment chain (spec.md §3/§4.3).
//!
//! A tree walker has no fixed register file, so locals live in
//! `Rc<RefCell<Value>>` cells keyed by name, one map per block. Closures
//! capture the `Rc<Scope>` in effect at the point of definition; looking
//! up a free variable later just walks the same parent chain a second
//! time. This is the standard "environment" shape for a tree-walking
//! interpreter (as opposed to the teacher's compiled upvalue slots,
//! which only make sense once there is a fixed instruction stream).

use crate::value::Value;
use ahash::AHashMap;
use std::cell::RefCell;
use std::rc::Rc;

pub struct Scope {
    vars: RefCell<AHashMap<String, Rc<RefCell<Value>>>>,
    /// Names declared `<const>` or `<close>` in this block, checked by
    /// assignment and by block-exit `<close>` handling respectively.
    consts: RefCell<AHashMap<String, bool>>,
    to_close: RefCell<Vec<(String, Rc<RefCell<Value>>)>>,
    parent: Option<Rc<Scope>>,
    /// Set on the scope created for a function call's parameters (and
    /// for the main chunk). `...` resolution stops here regardless of
    /// whether this particular function is vararg, so a non-vararg
    /// function never sees an enclosing function's varargs.
    is_function_root: bool,
    varargs: RefCell<Vec<Value>>,
}

impl Scope {
    pub fn root() -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(AHashMap::new()),
            consts: RefCell::new(AHashMap::new()),
            to_close: RefCell::new(Vec::new()),
            parent: None,
            is_function_root: true,
            varargs: RefCell::new(Vec::new()),
        })
    }

    pub fn child(parent: &Rc<Scope>) -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(AHashMap::new()),
            consts: RefCell::new(AHashMap::new()),
            to_close: RefCell::new(Vec::new()),
            parent: Some(parent.clone()),
            is_function_root: false,
            varargs: RefCell::new(Vec::new()),
        })
    }

    /// A fresh function-call scope rooted at `env` (the closure's
    /// captured defining environment, not the dynamic caller scope).
    pub fn function_root(env: &Rc<Scope>, varargs: Vec<Value>) -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(AHashMap::new()),
            consts: RefCell::new(AHashMap::new()),
            to_close: RefCell::new(Vec::new()),
            parent: Some(env.clone()),
            is_function_root: true,
            varargs: RefCell::new(varargs),
        })
    }

    pub fn varargs(&self) -> Vec<Value> {
        if self.is_function_root {
            return self.varargs.borrow().clone();
        }
        match &self.parent {
            Some(p) => p.varargs(),
            None => Vec::new(),
        }
    }

    pub fn declare(&self, name: &str, value: Value) -> Rc<RefCell<Value>> {
        let cell = Rc::new(RefCell::new(value));
        self.vars
            .borrow_mut()
            .insert(name.to_string(), cell.clone());
        cell
    }

    pub fn declare_const(&self, name: &str, value: Value, is_close: bool) -> Rc<RefCell<Value>> {
        let cell = self.declare(name, value);
        self.consts.borrow_mut().insert(name.to_string(), true);
        if is_close {
            self.to_close
                .borrow_mut()
                .push((name.to_string(), cell.clone()));
        }
        cell
    }

    /// Resolves a name to its cell plus whether it was declared
    /// `<const>`/`<close>` at the scope level where it was found
    /// (assignment to such a name is a compile-time error in reference
    /// Lua; here it surfaces as a runtime error at the assignment site).
    pub fn resolve(&self, name: &str) -> Option<(Rc<RefCell<Value>>, bool)> {
        if let Some(cell) = self.vars.borrow().get(name) {
            return Some((cell.clone(), self.consts.borrow().contains_key(name)));
        }
        self.parent.as_ref().and_then(|p| p.resolve(name))
    }

    /// `<close>` variables declared in this block, innermost-declared
    /// first, to run `__close` in reverse declaration order on block
    /// exit (spec.md §4.3 `<close>` rule).
    pub fn take_to_close(&self) -> Vec<(String, Rc<RefCell<Value>>)> {
        let mut v = self.to_close.borrow_mut();
        let mut out = std::mem::take(&mut *v);
        out.reverse();
        out
    }

    pub fn reachable_ids(&self) -> Vec<u64> {
        let mut out: Vec<u64> = self
            .vars
            .borrow()
            .values()
            .filter_map(|c| c.borrow().gc_id())
            .collect();
        if let Some(p) = &self.parent {
            out.extend(p.reachable_ids());
        }
        out
    }

    fn named_cells_inner(&self, out: &mut Vec<(String, Rc<RefCell<Value>>)>) {
        for (name, cell) in self.vars.borrow().iter() {
            if !out.iter().any(|(n, _)| n == name) {
                out.push((name.clone(), cell.clone()));
            }
        }
        if let Some(p) = &self.parent {
            p.named_cells_inner(out);
        }
    }

    /// Every name visible from this scope outward, closest declaration
    /// winning over a shadowed outer one, in alphabetical order. `debug`'s
    /// upvalue functions use this in place of the fixed upvalue index
    /// list a register VM compiles — there's no such static list once a
    /// closure just holds an `Rc<Scope>`, so this gives `getupvalue`/
    /// `setupvalue` a stable (if not reference-Lua-identical) indexing.
    pub fn named_cells(&self) -> Vec<(String, Rc<RefCell<Value>>)> {
        let mut out = Vec::new();
        self.named_cells_inner(&mut out);
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Replaces whichever scope in this chain declares `name` so its map
    /// entry points at `cell` instead, making every later resolution of
    /// `name` alias the given cell (`debug.upvaluejoin`).
    pub fn rebind(&self, name: &str, cell: Rc<RefCell<Value>>) -> bool {
        if self.vars.borrow().contains_key(name) {
            self.vars.borrow_mut().insert(name.to_string(), cell);
            return true;
        }
        match &self.parent {
            Some(p) => p.rebind(name, cell),
            None => false,
        }
    }
}
