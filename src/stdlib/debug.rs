//! `debug` library (spec.md §4.7), grounded on the teacher's
//! `stdlib/debug.rs` traceback walker, adapted from its bytecode-frame
//! stack (`chunk.line_info[pc]`) to this crate's Rust call stack — there
//! is no persistent frame array to walk here, so `getinfo`/`traceback`
//! report only what `Control::Error`'s own traceback already accumulated
//! on the way up through `Interp::call_value`.

use crate::error::EvalResult;
use crate::eval::Interp;
use crate::lib_module;
use crate::stdlib::registry::{bad_argument, check_int, check_table, install, opt_int, runtime_error, LibraryModule};
use crate::value::{FunctionKind, Table, Value};

pub fn create() -> LibraryModule {
    lib_module!("debug", {
        "traceback" => debug_traceback,
        "getinfo" => debug_getinfo,
        "getmetatable" => debug_getmetatable,
        "setmetatable" => debug_setmetatable,
        "getlocal" => debug_getlocal,
        "setlocal" => debug_setlocal,
        "getupvalue" => debug_getupvalue,
        "setupvalue" => debug_setupvalue,
        "upvaluejoin" => debug_upvaluejoin,
        "sethook" => debug_sethook,
        "gethook" => debug_gethook,
    })
}

pub fn install_debug(interp: &mut Interp) {
    install(interp, create());
}

/// This runtime doesn't keep a persistent frame array the way the
/// teacher's bytecode VM does (`vm.frames[i]`) — a tree-walking
/// evaluator's "stack" is the native Rust call stack, which is gone by
/// the time a native function like this one runs. `Control::Error`'s own
/// `traceback` field is built incrementally as an error unwinds through
/// `Interp::call_value`; outside of that unwind, the best this can do is
/// report how many Lua call frames are currently nested.
fn debug_traceback(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let message = match args.first() {
        Some(Value::Str(s)) => Some(String::from_utf8_lossy(s).into_owned()),
        Some(Value::Nil) | None => None,
        Some(other) => return Ok(vec![other.clone()]),
    };
    let mut trace = String::new();
    if let Some(m) = message {
        trace.push_str(&m);
        trace.push('\n');
    }
    trace.push_str("stack traceback:");
    trace.push_str(&format!("\n\t{}: in ? ({} levels)", interp.source_name, interp.call_depth));
    Ok(vec![Value::str(trace.into_bytes())])
}

/// Reference Lua's `debug.getinfo` inspects live bytecode frames; this
/// runtime has no persistent frame table to reflect on mid-call, so only
/// the `what`/`source`/`currentline` fields of the *current* evaluator
/// position are reported. Good enough for error reporting and logging,
/// not for a full debugger.
fn debug_getinfo(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let _level = opt_int(args, 1, 1);
    let mut t = Table::new();
    t.set_str("source", Value::str(format!("@{}", interp.source_name).into_bytes()));
    t.set_str("short_src", Value::str(interp.source_name.clone().into_bytes()));
    t.set_str("currentline", Value::Int(-1));
    t.set_str("what", Value::str(b"Lua".as_slice()));
    let tref = interp.heap.alloc_table(t);
    Ok(vec![Value::Table(tref)])
}

fn debug_getmetatable(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    match args.first() {
        Some(Value::Table(t)) => match interp.heap.table(*t).metatable {
            Some(mt) => Ok(vec![Value::Table(mt)]),
            None => Ok(vec![Value::Nil]),
        },
        Some(Value::Str(_)) => match interp.string_metatable {
            Some(mt) => Ok(vec![Value::Table(mt)]),
            None => Ok(vec![Value::Nil]),
        },
        _ => Ok(vec![Value::Nil]),
    }
}

/// Unlike `setmetatable`, this bypasses the `__metatable` protection
/// field — matching reference Lua's rationale that `debug.*` functions
/// are allowed to break the usual rules.
fn debug_setmetatable(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let t = check_table(args, 1, "setmetatable")?;
    match args.get(1) {
        Some(Value::Table(mt)) => interp.heap.table_mut(t).metatable = Some(*mt),
        _ => interp.heap.table_mut(t).metatable = None,
    }
    Ok(vec![args[0].clone()])
}

/// Local-variable introspection needs named-slot bookkeeping the
/// evaluator's environment-chain scopes don't retain once control
/// leaves a block, so this is a documented no-op rather than a fake.
fn debug_getlocal(_interp: &mut Interp, _args: &[Value]) -> EvalResult<Vec<Value>> {
    Ok(vec![Value::Nil])
}

fn debug_setlocal(_interp: &mut Interp, _args: &[Value]) -> EvalResult<Vec<Value>> {
    Ok(vec![Value::Nil])
}

/// Resolves a `function` argument to the defining environment its
/// upvalues live in, per `value::closure::FunctionKind::Lua`'s doc
/// comment: name lookup against `env`'s parent chain stands in for the
/// teacher's static upvalue index list.
fn upvalue_env(interp: &Interp, args: &[Value], fname: &str) -> EvalResult<std::rc::Rc<crate::eval::Scope>> {
    match args.first() {
        Some(Value::Function(c)) => match &interp.heap.closure(*c).kind {
            FunctionKind::Lua { env, .. } => Ok(env.clone()),
            FunctionKind::Native { .. } => Err(runtime_error(format!("'{fname}' cannot inspect a native function's upvalues"))),
        },
        other => Err(bad_argument(1, fname, "function", other.unwrap_or(&Value::Nil))),
    }
}

fn debug_getupvalue(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let env = upvalue_env(interp, args, "getupvalue")?;
    let idx = check_int(args, 2, "getupvalue")?;
    let cells = env.named_cells();
    match usize::try_from(idx - 1).ok().and_then(|i| cells.get(i)) {
        Some((name, cell)) => Ok(vec![Value::str(name.clone().into_bytes()), cell.borrow().clone()]),
        None => Ok(vec![Value::Nil]),
    }
}

fn debug_setupvalue(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let env = upvalue_env(interp, args, "setupvalue")?;
    let idx = check_int(args, 2, "setupvalue")?;
    let value = args.get(2).cloned().unwrap_or(Value::Nil);
    let cells = env.named_cells();
    match usize::try_from(idx - 1).ok().and_then(|i| cells.get(i)) {
        Some((name, cell)) => {
            *cell.borrow_mut() = value;
            Ok(vec![Value::str(name.clone().into_bytes())])
        }
        None => Ok(vec![Value::Nil]),
    }
}

/// Reference Lua's `upvaluejoin` makes two closures' upvalue slots at
/// given indices alias the same cell, so an assignment through one is
/// visible through the other. Here an "upvalue" is just a named cell in
/// an `Rc<Scope>`'s var map, so joining them means pointing `f2`'s name
/// at the same `Rc<RefCell<Value>>` cell `f1`'s name already resolves
/// to — only possible when both indices land in a scope this crate can
/// still mutate, i.e. the innermost frame of each environment.
fn debug_upvaluejoin(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let env1 = upvalue_env(interp, args, "upvaluejoin")?;
    let idx1 = check_int(args, 2, "upvaluejoin")?;
    let f2 = match args.get(2) {
        Some(Value::Function(c)) => *c,
        other => return Err(bad_argument(3, "upvaluejoin", "function", other.unwrap_or(&Value::Nil))),
    };
    let env2 = match &interp.heap.closure(f2).kind {
        FunctionKind::Lua { env, .. } => env.clone(),
        FunctionKind::Native { .. } => return Err(runtime_error("'upvaluejoin' cannot join a native function's upvalues")),
    };
    let idx2 = check_int(args, 4, "upvaluejoin")?;

    let cells1 = env1.named_cells();
    let cells2 = env2.named_cells();
    let cell1 = usize::try_from(idx1 - 1).ok().and_then(|i| cells1.get(i)).ok_or_else(|| runtime_error("invalid upvalue index"))?;
    let (name2, _) = cells2
        .get(usize::try_from(idx2 - 1).ok().unwrap_or(usize::MAX))
        .ok_or_else(|| runtime_error("invalid upvalue index"))?;

    env2.rebind(name2, cell1.1.clone());
    Ok(Vec::new())
}

fn debug_sethook(_interp: &mut Interp, _args: &[Value]) -> EvalResult<Vec<Value>> {
    Ok(Vec::new())
}

fn debug_gethook(_interp: &mut Interp, _args: &[Value]) -> EvalResult<Vec<Value>> {
    Ok(vec![Value::Nil])
}
