//! Coroutines (spec.md §3/§4.4/§5).
//!
//! A coroutine's suspended call stack is, concretely, a parked native OS
//! thread blocked on a channel receive. Resume/yield are a strict
//! rendezvous: the resuming side blocks the instant it hands off, and the
//! target blocks the instant it yields, so at most one side is ever
//! unblocked — observably identical to the non-preemptive, single-logical-
//! thread contract spec.md §5 requires (see `SPEC_FULL.md` §4.4 for why
//! this was chosen over a CPS state machine, and DESIGN.md for the
//! grounding).
//!
//! `Value` holds `Rc`/`RefCell` internals and so is not `Send`. The
//! `ForceSend` wrapper below asserts, by construction of the rendezvous
//! protocol, that no two threads ever touch the same `Rc` concurrently —
//! mirroring the teacher's own use of raw-pointer `unsafe impl Send` for
//! single-owner-at-a-time aliasing (`gc/gc_object.rs`'s `CachedUpvalue`,
//! `lua_vm/async_thread.rs`'s `unsafe { &mut *vm }`).

use crate::error::LuaFullError;
use crate::gc::GcRef;
use crate::value::Value;
use std::sync::mpsc::{Receiver, Sender};
use std::thread::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    Suspended,
    Running,
    Normal,
    Dead,
}

/// Wrapper asserting `Send` for payloads that cross the resume/yield
/// channel. Sound only because the rendezvous protocol in
/// `eval::coroutine` guarantees mutually exclusive access: the sender
/// blocks immediately after sending until the receiver replies, so the
/// `Rc` graph inside `T` is never touched from two threads at once.
pub struct ForceSend<T>(pub T);
unsafe impl<T> Send for ForceSend<T> {}

pub enum ToCoroutine {
    Resume(Vec<Value>),
    /// Forces the parked coroutine to unwind, running any `<close>`
    /// variables still on its stack (spec.md §4.4 `coroutine.close`).
    Close,
}

pub enum FromCoroutine {
    Yielded(Vec<Value>),
    Returned(Vec<Value>),
    Errored(LuaFullError),
    /// Acknowledges a `Close` request once unwinding finished.
    Closed(Option<LuaFullError>),
}

pub struct CoroutineChannel {
    pub to_co: Sender<ForceSend<ToCoroutine>>,
    pub from_co: Receiver<ForceSend<FromCoroutine>>,
    pub join: Option<JoinHandle<()>>,
}

pub struct Thread {
    pub status: ThreadStatus,
    pub func: Value,
    pub channel: Option<CoroutineChannel>,
    /// The thread that resumed this one; used for `coroutine.running`
    /// and to mark an intermediate resumer `normal` while this one runs.
    pub resumer: Option<GcRef<Thread>>,
    pub is_main: bool,
}

impl Thread {
    pub fn new(func: Value) -> Thread {
        Thread {
            status: ThreadStatus::Suspended,
            func,
            channel: None,
            resumer: None,
            is_main: false,
        }
    }

    pub fn main() -> Thread {
        Thread {
            status: ThreadStatus::Running,
            func: Value::Nil,
            channel: None,
            resumer: None,
            is_main: true,
        }
    }

    pub fn status_name(&self) -> &'static str {
        match self.status {
            ThreadStatus::Suspended => "suspended",
            ThreadStatus::Running => "running",
            ThreadStatus::Normal => "normal",
            ThreadStatus::Dead => "dead",
        }
    }

    /// GC roots reachable from a thread: its start function and (once
    /// parked) nothing else directly — values on its native stack are
    /// kept alive by the parked frames themselves for the duration of
    /// the process, since the collector never runs *while* this thread
    /// is live (only the main thread drives `collectgarbage`).
    pub fn gc_roots(&self) -> Vec<u64> {
        self.func.gc_id().into_iter().collect()
    }
}
