//! Library registration idiom, adapted from the teacher's
//! `lib_registry.rs` `LibraryModule`/`lib_module!` pattern to this crate's
//! native calling convention (`value::NativeFn`, a plain value-slice-in
//! value-vec-out closure, instead of the teacher's stack-push protocol).

use crate::eval::Interp;
use crate::value::{Closure, NativeFn, Table, Value};
use std::rc::Rc;

pub struct LibraryModule {
    pub name: &'static str,
    pub entries: Vec<(&'static str, NativeFn)>,
}

impl LibraryModule {
    pub fn new(name: &'static str) -> Self {
        LibraryModule { name, entries: Vec::new() }
    }

    pub fn with_fn(mut self, name: &'static str, f: NativeFn) -> Self {
        self.entries.push((name, f));
        self
    }
}

/// Builds a [`LibraryModule`] from `name => fn` pairs, mirroring the
/// teacher's `lib_module!` macro shape.
#[macro_export]
macro_rules! lib_module {
    ($name:expr, { $($item:expr => $f:expr),* $(,)? }) => {{
        let mut m = $crate::stdlib::registry::LibraryModule::new($name);
        $( m = m.with_fn($item, std::rc::Rc::new($f)); )*
        m
    }};
}

/// Installs every entry of `module` into a fresh table (or directly into
/// `_G` for the `"_G"` pseudo-module used by `basic`), and mirrors it into
/// `package.loaded` the way reference Lua's `require` expects to find
/// already-loaded standard libraries.
pub fn install(interp: &mut Interp, module: LibraryModule) {
    if module.name == "_G" {
        for (name, f) in module.entries {
            let closure = interp.heap.alloc_closure(Closure::native(name, f));
            interp.heap.table_mut(interp.globals).set_str(name, Value::Function(closure));
        }
        return;
    }
    let mut t = Table::new();
    for (name, f) in module.entries {
        let closure = interp.heap.alloc_closure(Closure::native(format!("{}.{name}", module.name), f));
        t.set_str(name, Value::Function(closure));
    }
    let tref = interp.heap.alloc_table(t);
    interp.heap.table_mut(interp.globals).set_str(module.name, Value::Table(tref));

    let package = interp.heap.table(interp.globals).get_str("package");
    if let Value::Table(pt) = package {
        let loaded = interp.heap.table(pt).get_str("loaded");
        if let Value::Table(lt) = loaded {
            interp.heap.table_mut(lt).set_str(module.name, Value::Table(tref));
        }
    }
}

pub fn bad_argument(n: usize, fname: &str, expected: &str, got: &Value) -> crate::error::Control {
    let msg = format!("bad argument #{n} to '{fname}' ({expected} expected, got {})", got.type_name());
    crate::error::Control::Error(crate::error::LuaFullError::new(
        crate::error::LuaError::Runtime,
        msg.clone(),
        Value::str(msg.into_bytes()),
    ))
}

pub fn runtime_error(msg: impl Into<String>) -> crate::error::Control {
    let m = msg.into();
    crate::error::Control::Error(crate::error::LuaFullError::new(crate::error::LuaError::Runtime, m.clone(), Value::str(m.into_bytes())))
}

/// `luaL_checkstring`: strings pass through; numbers coerce via their
/// canonical textual form (spec.md §4.3 string/number coercion rule).
pub fn check_str(args: &[Value], n: usize, fname: &str) -> Result<Vec<u8>, crate::error::Control> {
    match args.get(n - 1) {
        Some(Value::Str(s)) => Ok(s.to_vec()),
        Some(v @ (Value::Int(_) | Value::Float(_))) => Ok(crate::eval::number_to_string(v).into_bytes()),
        Some(other) => Err(bad_argument(n, fname, "string", other)),
        None => Err(bad_argument(n, fname, "string", &Value::Nil)),
    }
}

pub fn check_number(args: &[Value], n: usize, fname: &str) -> Result<f64, crate::error::Control> {
    match args.get(n - 1).and_then(crate::eval::to_number) {
        Some(v) => Ok(v.as_float().unwrap()),
        None => Err(bad_argument(n, fname, "number", args.get(n - 1).unwrap_or(&Value::Nil))),
    }
}

pub fn check_int(args: &[Value], n: usize, fname: &str) -> Result<i64, crate::error::Control> {
    match args.get(n - 1).and_then(Value::as_int) {
        Some(i) => Ok(i),
        None => Err(bad_argument(n, fname, "number", args.get(n - 1).unwrap_or(&Value::Nil))),
    }
}

pub fn opt_int(args: &[Value], n: usize, default: i64) -> i64 {
    match args.get(n - 1) {
        None | Some(Value::Nil) => default,
        Some(v) => v.as_int().unwrap_or(default),
    }
}

pub fn check_table(args: &[Value], n: usize, fname: &str) -> Result<crate::gc::GcRef<Table>, crate::error::Control> {
    match args.get(n - 1) {
        Some(Value::Table(t)) => Ok(*t),
        Some(other) => Err(bad_argument(n, fname, "table", other)),
        None => Err(bad_argument(n, fname, "table", &Value::Nil)),
    }
}
