//! Error taxonomy for the runtime (spec.md §7).
//!
//! Mirrors the teacher's split between a small `Copy` tag used on the hot
//! path and a richer, allocation-carrying type attached only when an error
//! actually crosses a `pcall`/top-level boundary.

use crate::value::Value;
use std::fmt;

/// Cheap, `Copy` error tag. Most of the evaluator only needs to know
/// *that* something failed and propagate; the payload lives in `Control`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuaError {
    Runtime,
    Syntax,
    Yield,
    StackOverflow,
    OutOfMemory,
}

impl fmt::Display for LuaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LuaError::Runtime => "runtime error",
            LuaError::Syntax => "syntax error",
            LuaError::Yield => "coroutine yield",
            LuaError::StackOverflow => "stack overflow",
            LuaError::OutOfMemory => "out of memory",
        };
        write!(f, "{s}")
    }
}

impl std::error::Error for LuaError {}

/// Rich error: the raised Lua value plus a traceback, produced at a
/// `pcall`/top-level boundary. Implements `Error` via `thiserror` so it
/// composes with `?` the same way the teacher's hand-written impl did.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct LuaFullError {
    pub kind: LuaError,
    pub message: String,
    pub value: Value,
    pub traceback: Vec<String>,
}

impl LuaFullError {
    pub fn new(kind: LuaError, message: impl Into<String>, value: Value) -> Self {
        LuaFullError {
            kind,
            message: message.into(),
            value,
            traceback: Vec::new(),
        }
    }

    pub fn with_traceback(mut self, frames: Vec<String>) -> Self {
        self.traceback = frames;
        self
    }
}

/// Non-local control transfer inside the evaluator: every statement/expr
/// evaluation returns `Result<T, Control>` so that `return`, `break`,
/// `goto`, and raised errors all unwind through the same `?` plumbing
/// spec.md §4.3 describes ("return raises an internal value-list signal
/// that the caller catches").
///
/// There is no `Yield` variant: `coroutine.yield` is an ordinary native
/// function that blocks on a channel rendezvous (`value::thread`,
/// `eval::coroutine`) rather than unwinding the Rust call stack, since
/// each coroutine is a real parked OS thread. That also means yielding
/// across a `pcall` boundary needs no special case here, unlike a
/// CPS-transformed evaluator.
#[derive(Debug, Clone)]
pub enum Control {
    /// A Lua-level error in flight, not yet caught by a `pcall`.
    Error(LuaFullError),
    /// `return expr, expr, ...`
    Return(Vec<Value>),
    /// `break`
    Break,
    /// `goto label`
    Goto(String),
}

impl From<LuaFullError> for Control {
    fn from(e: LuaFullError) -> Self {
        Control::Error(e)
    }
}

pub type EvalResult<T> = Result<T, Control>;
