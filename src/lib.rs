//! A tree-walking Lua 5.4-compatible runtime core (spec.md §1).
//!
//! Layered the way the teacher's own crate is: a byte-accurate lexer and
//! recursive-descent parser feed an AST, which this crate's evaluator
//! walks directly rather than compiling to the teacher's register
//! bytecode. Values, the incremental GC heap and the standard library
//! are otherwise grounded module-for-module on the teacher's own layout.

pub mod error;
pub mod eval;
pub mod gc;
pub mod lexer;
pub mod parser;
pub mod stdlib;
pub mod value;

use error::{Control, LuaFullError};
use eval::{Interp, Scope};
use std::rc::Rc;
use value::{Closure, Proto, Value};

/// Parses and runs `source` as a top-level chunk in a fresh interpreter
/// with the full standard library installed, returning the chunk's
/// results or the error it raised.
pub fn run_script(source: &[u8], chunk_name: &str) -> Result<Vec<Value>, LuaFullError> {
    let mut interp = Interp::new(chunk_name);
    stdlib::install_all(&mut interp);
    run_chunk(&mut interp, source, chunk_name)
}

/// Parses and runs `source` as a top-level chunk against an
/// already-configured `Interp`, e.g. one a CLI has installed `arg` into.
pub fn run_chunk(interp: &mut Interp, source: &[u8], chunk_name: &str) -> Result<Vec<Value>, LuaFullError> {
    let closure = load_chunk(interp, source, chunk_name).map_err(to_full_error)?;
    interp.call_value(Value::Function(interp.heap.alloc_closure(closure)), Vec::new(), 0).map_err(to_full_error)
}

/// Parses `source` into a callable vararg closure rooted at the global
/// scope, without running it — used by `load`/`require` as well as the
/// top-level entry points above.
pub fn load_chunk(interp: &Interp, source: &[u8], chunk_name: &str) -> Result<Closure, parser::ParseError> {
    let block = parser::parse(source, chunk_name)?;
    let proto = Proto {
        params: Vec::new(),
        is_vararg: true,
        body: Rc::new(parser::ast::FunctionBody {
            params: Vec::new(),
            is_vararg: true,
            body: block,
            line: 0,
            name: chunk_name.to_string(),
        }),
        name: chunk_name.to_string(),
        source: chunk_name.to_string(),
        line: 0,
        source_text: Some(Rc::from(source.to_vec().into_boxed_slice())),
    };
    Ok(Closure::lua(Rc::new(proto), Scope::root()))
}

fn to_full_error(c: Control) -> LuaFullError {
    match c {
        Control::Error(e) => e,
        Control::Return(_) | Control::Break | Control::Goto(_) => {
            LuaFullError::new(error::LuaError::Runtime, "unexpected control flow escaped chunk", Value::Nil)
        }
    }
}
