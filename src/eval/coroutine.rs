//! Coroutine resume/yield driver (spec.md §4.4).
//!
//! See `value::thread` for the `ForceSend`/rendezvous soundness argument
//! and `SPEC_FULL.md` §4.4 / `DESIGN.md` for why this crate represents a
//! suspended coroutine as a parked native OS thread rather than a
//! CPS-transformed continuation.

use crate::error::{Control, EvalResult, LuaError, LuaFullError};
use crate::eval::Interp;
use crate::gc::GcRef;
use crate::value::{CoroutineChannel, ForceSend, FromCoroutine, Thread, ThreadStatus, ToCoroutine, Value};
use std::cell::RefCell;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

/// Marks a `Control::Error` raised by `coroutine.yield` when it observed
/// a close request rather than a resume, so the spawning closure below
/// can tell a deliberate `coroutine.close` apart from a real Lua error
/// once it has unwound through any `<close>` variables on the way out.
const CLOSE_SENTINEL: &str = "\u{0}coroutine-close";

thread_local! {
    static CO_CHANNEL: RefCell<Option<(Sender<ForceSend<FromCoroutine>>, Receiver<ForceSend<ToCoroutine>>)>> =
        RefCell::new(None);
}

pub fn resume(interp: &mut Interp, co: GcRef<Thread>, args: Vec<Value>) -> Vec<Value> {
    let status = interp.heap.thread(co).status;
    match status {
        ThreadStatus::Dead => {
            return vec![Value::Bool(false), Value::str(b"cannot resume dead coroutine".as_slice())]
        }
        ThreadStatus::Running | ThreadStatus::Normal => {
            return vec![
                Value::Bool(false),
                Value::str(b"cannot resume non-suspended coroutine".as_slice()),
            ]
        }
        ThreadStatus::Suspended => {}
    }

    let prev_thread = interp.current_thread;
    interp.heap.thread_mut(prev_thread).status = ThreadStatus::Normal;
    interp.heap.thread_mut(co).resumer = Some(prev_thread);
    interp.heap.thread_mut(co).status = ThreadStatus::Running;
    interp.current_thread = co;

    let had_channel = interp.heap.thread(co).channel.is_some();
    let msg = if !had_channel {
        spawn_coroutine(interp, co, args)
    } else {
        let mut channel = interp.heap.thread_mut(co).channel.take().expect("channel exists");
        let _ = channel.to_co.send(ForceSend(ToCoroutine::Resume(args)));
        let msg = channel.from_co.recv();
        interp.heap.thread_mut(co).channel = Some(channel);
        msg
    };

    interp.current_thread = prev_thread;
    interp.heap.thread_mut(prev_thread).status = ThreadStatus::Running;

    match msg {
        Ok(ForceSend(FromCoroutine::Yielded(values))) => {
            interp.heap.thread_mut(co).status = ThreadStatus::Suspended;
            let mut out = vec![Value::Bool(true)];
            out.extend(values);
            out
        }
        Ok(ForceSend(FromCoroutine::Returned(values))) => {
            interp.heap.thread_mut(co).status = ThreadStatus::Dead;
            join_dead(interp, co);
            let mut out = vec![Value::Bool(true)];
            out.extend(values);
            out
        }
        Ok(ForceSend(FromCoroutine::Errored(e))) => {
            interp.heap.thread_mut(co).status = ThreadStatus::Dead;
            join_dead(interp, co);
            vec![Value::Bool(false), e.value]
        }
        Ok(ForceSend(FromCoroutine::Closed(err))) => {
            interp.heap.thread_mut(co).status = ThreadStatus::Dead;
            join_dead(interp, co);
            match err {
                Some(e) => vec![Value::Bool(false), e.value],
                None => vec![Value::Bool(true)],
            }
        }
        Err(_) => {
            interp.heap.thread_mut(co).status = ThreadStatus::Dead;
            vec![Value::Bool(false), Value::str(b"coroutine thread vanished".as_slice())]
        }
    }
}

fn spawn_coroutine(
    interp: &mut Interp,
    co: GcRef<Thread>,
    args: Vec<Value>,
) -> Result<ForceSend<FromCoroutine>, mpsc::RecvError> {
    let func = interp.heap.thread(co).func.clone();
    let (to_co_tx, to_co_rx) = mpsc::channel::<ForceSend<ToCoroutine>>();
    let (from_co_tx, from_co_rx) = mpsc::channel::<ForceSend<FromCoroutine>>();
    let interp_ptr = ForceSend(interp as *mut Interp);
    let payload = ForceSend((func, args));
    let reply_tx = from_co_tx.clone();
    let join = thread::spawn(move || {
        CO_CHANNEL.with(|c| *c.borrow_mut() = Some((reply_tx.clone(), to_co_rx)));
        let (func, args) = payload.0;
        // SOUND: see value::thread::ForceSend — the rendezvous protocol
        // guarantees the resuming thread is blocked in `recv` for the
        // entire duration this thread touches `*interp_ptr.0`.
        let interp: &mut Interp = unsafe { &mut *interp_ptr.0 };
        let result = interp.call_value(func, args, 0);
        let msg = match result {
            Ok(values) => FromCoroutine::Returned(values),
            Err(Control::Error(e)) if e.message == CLOSE_SENTINEL => FromCoroutine::Closed(None),
            Err(Control::Error(e)) => FromCoroutine::Errored(e),
            Err(_) => FromCoroutine::Returned(Vec::new()),
        };
        let _ = reply_tx.send(ForceSend(msg));
    });
    let msg = from_co_rx.recv();
    interp.heap.thread_mut(co).channel = Some(CoroutineChannel {
        to_co: to_co_tx,
        from_co: from_co_rx,
        join: Some(join),
    });
    msg
}

fn join_dead(interp: &mut Interp, co: GcRef<Thread>) {
    if let Some(join) = interp.heap.thread_mut(co).channel.as_mut().and_then(|c| c.join.take()) {
        let _ = join.join();
    }
}

/// Body of the `coroutine.yield` native function. Blocks the current OS
/// thread until the resumer hands control back (or asks this coroutine
/// to close).
pub fn do_yield(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let sent = CO_CHANNEL.with(|c| {
        let borrow = c.borrow();
        match borrow.as_ref() {
            Some((tx, _)) => {
                tx.send(ForceSend(FromCoroutine::Yielded(args.to_vec()))).is_ok()
            }
            None => false,
        }
    });
    if !sent {
        return Err(Control::Error(LuaFullError::new(
            LuaError::Runtime,
            "attempt to yield from outside a coroutine",
            Value::str(b"attempt to yield from outside a coroutine".as_slice()),
        )));
    }
    let received = CO_CHANNEL.with(|c| {
        let borrow = c.borrow();
        borrow.as_ref().unwrap().1.recv()
    });
    match received {
        Ok(ForceSend(ToCoroutine::Resume(values))) => Ok(values),
        Ok(ForceSend(ToCoroutine::Close)) | Err(_) => Err(Control::Error(LuaFullError::new(
            LuaError::Runtime,
            CLOSE_SENTINEL,
            Value::Nil,
        ))),
    }
}

/// `coroutine.close`: asks a suspended coroutine to unwind (running any
/// `<close>` variables still on its stack) without resuming it normally.
pub fn close(interp: &mut Interp, co: GcRef<Thread>) -> Value {
    let status = interp.heap.thread(co).status;
    match status {
        ThreadStatus::Dead => return Value::Bool(true),
        ThreadStatus::Running | ThreadStatus::Normal => {
            return Value::str(b"cannot close a running coroutine".as_slice())
        }
        ThreadStatus::Suspended => {}
    }
    if interp.heap.thread(co).channel.is_none() {
        interp.heap.thread_mut(co).status = ThreadStatus::Dead;
        return Value::Bool(true);
    }
    let mut channel = interp.heap.thread_mut(co).channel.take().unwrap();
    let _ = channel.to_co.send(ForceSend(ToCoroutine::Close));
    let msg = channel.from_co.recv();
    if let Some(j) = channel.join.take() {
        let _ = j.join();
    }
    interp.heap.thread_mut(co).status = ThreadStatus::Dead;
    match msg {
        Ok(ForceSend(FromCoroutine::Closed(None))) | Ok(ForceSend(FromCoroutine::Returned(_))) => Value::Bool(true),
        Ok(ForceSend(FromCoroutine::Closed(Some(e)))) | Ok(ForceSend(FromCoroutine::Errored(e))) => e.value,
        _ => Value::Bool(true),
    }
}
