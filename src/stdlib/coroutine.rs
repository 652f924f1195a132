//! `coroutine` library (spec.md §4.4), grounded on the teacher's
//! `stdlib/coroutine.rs` function list (`create`/`resume`/`yield`/
//! `status`/`running`/`wrap`/`isyieldable`/`close`). The actual suspend/
//! resume mechanics live in `eval::coroutine`; this module is the thin
//! Lua-facing surface over it — unlike the teacher, which has to smuggle
//! the wrapped thread through a C-closure upvalue slot, `wrap` here just
//! captures the `GcRef<Thread>` directly since it is `Copy`.

use crate::error::{Control, EvalResult, LuaError, LuaFullError};
use crate::eval::{coroutine, Interp};
use crate::lib_module;
use crate::stdlib::registry::{bad_argument, install, LibraryModule};
use crate::value::{Closure, Thread, ThreadStatus, Value};

pub fn create() -> LibraryModule {
    lib_module!("coroutine", {
        "create" => coroutine_create,
        "resume" => coroutine_resume,
        "yield" => coroutine_yield,
        "status" => coroutine_status,
        "running" => coroutine_running,
        "wrap" => coroutine_wrap,
        "isyieldable" => coroutine_isyieldable,
        "close" => coroutine_close,
    })
}

pub fn install_coroutine(interp: &mut Interp) {
    install(interp, create());
}

fn check_function(args: &[Value], fname: &str) -> EvalResult<Value> {
    match args.first() {
        Some(v @ Value::Function(_)) => Ok(v.clone()),
        Some(other) => Err(bad_argument(1, fname, "function", other)),
        None => Err(bad_argument(1, fname, "function", &Value::Nil)),
    }
}

fn check_thread(args: &[Value], n: usize, fname: &str) -> EvalResult<crate::gc::GcRef<Thread>> {
    match args.get(n - 1) {
        Some(Value::Thread(t)) => Ok(*t),
        Some(other) => Err(bad_argument(n, fname, "coroutine", other)),
        None => Err(bad_argument(n, fname, "coroutine", &Value::Nil)),
    }
}

fn coroutine_create(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let func = check_function(args, "create")?;
    let co = interp.heap.alloc_thread(Thread::new(func));
    Ok(vec![Value::Thread(co)])
}

fn coroutine_resume(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let co = check_thread(args, 1, "resume")?;
    let rest = args.get(1..).map(|s| s.to_vec()).unwrap_or_default();
    Ok(coroutine::resume(interp, co, rest))
}

fn coroutine_yield(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    coroutine::do_yield(interp, args)
}

fn coroutine_status(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let co = check_thread(args, 1, "status")?;
    let name = if co == interp.current_thread {
        "running"
    } else {
        interp.heap.thread(co).status_name()
    };
    Ok(vec![Value::str(name.as_bytes())])
}

fn coroutine_running(interp: &mut Interp, _args: &[Value]) -> EvalResult<Vec<Value>> {
    let co = interp.current_thread;
    let is_main = interp.heap.thread(co).is_main;
    Ok(vec![Value::Thread(co), Value::Bool(is_main)])
}

fn coroutine_wrap(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let func = check_function(args, "wrap")?;
    let co = interp.heap.alloc_thread(Thread::new(func));
    let wrapper = Closure::native("wrapped coroutine", std::rc::Rc::new(move |interp: &mut Interp, args: &[Value]| {
        let results = coroutine::resume(interp, co, args.to_vec());
        let mut iter = results.into_iter();
        match iter.next() {
            Some(Value::Bool(true)) => Ok(iter.collect()),
            Some(Value::Bool(false)) => {
                let err = iter.next().unwrap_or(Value::Nil);
                Err(Control::Error(LuaFullError::new(LuaError::Runtime, "coroutine error", err)))
            }
            _ => Ok(Vec::new()),
        }
    }));
    let closure_ref = interp.heap.alloc_closure(wrapper);
    Ok(vec![Value::Function(closure_ref)])
}

fn coroutine_isyieldable(interp: &mut Interp, _args: &[Value]) -> EvalResult<Vec<Value>> {
    let co = interp.current_thread;
    Ok(vec![Value::Bool(!interp.heap.thread(co).is_main)])
}

fn coroutine_close(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let co = check_thread(args, 1, "close")?;
    if interp.heap.thread(co).is_main {
        return Err(crate::stdlib::registry::runtime_error("cannot close the main thread"));
    }
    if co == interp.current_thread && interp.heap.thread(co).status == ThreadStatus::Running {
        return Err(crate::stdlib::registry::runtime_error("cannot close a running coroutine"));
    }
    let result = coroutine::close(interp, co);
    match result {
        Value::Bool(true) => Ok(vec![Value::Bool(true)]),
        other => Ok(vec![Value::Bool(false), other]),
    }
}
