//! Functions: Lua closures and native (host) callables (spec.md §3).

use crate::error::Control;
use crate::eval::{Interp, Scope};
use crate::parser::ast::FunctionBody;
use crate::value::Value;
use std::rc::Rc;

/// Compiled function prototype: body + parameter list + varargs flag,
/// shared across every closure instantiated from the same `function`
/// expression (spec.md §3 "Function").
pub struct Proto {
    pub params: Vec<String>,
    pub is_vararg: bool,
    pub body: Rc<FunctionBody>,
    pub name: String,
    pub source: String,
    pub line: u32,
    /// The chunk's original source text, carried only on protos built
    /// directly from a parsed chunk (`load`/`require`/the CLI's own
    /// entry points) — nested function literals inherit no source of
    /// their own since their spans within the chunk aren't tracked.
    /// `string.dump` needs this to produce anything `load` can read
    /// back; a `None` here is what makes `dump` refuse a function the
    /// way reference Lua refuses to dump a C function.
    pub source_text: Option<Rc<[u8]>>,
}

pub type NativeFn = Rc<dyn Fn(&mut Interp, &[Value]) -> Result<Vec<Value>, Control>>;

pub enum FunctionKind {
    Lua {
        proto: Rc<Proto>,
        /// The lexical scope chain in effect where the function literal
        /// was evaluated. A tree walker has no fixed instruction stream
        /// to resolve explicit upvalue indices against, so rather than
        /// precomputing a flat upvalue list (as the teacher's register
        /// VM does) a closure simply holds a reference to its defining
        /// environment; name lookup walks `env`'s parent chain the same
        /// way it would at the point of definition. `debug.getupvalue`
        /// enumerates this chain by name instead of by static index.
        env: Rc<Scope>,
    },
    Native {
        name: String,
        func: NativeFn,
    },
}

pub struct Closure {
    pub kind: FunctionKind,
}

impl Closure {
    pub fn lua(proto: Rc<Proto>, env: Rc<Scope>) -> Closure {
        Closure {
            kind: FunctionKind::Lua { proto, env },
        }
    }

    pub fn native(name: impl Into<String>, func: NativeFn) -> Closure {
        Closure {
            kind: FunctionKind::Native {
                name: name.into(),
                func,
            },
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self.kind, FunctionKind::Native { .. })
    }

    pub fn name(&self) -> &str {
        match &self.kind {
            FunctionKind::Lua { proto, .. } => &proto.name,
            FunctionKind::Native { name, .. } => name,
        }
    }

    /// GC children: the heap ids reachable through this closure's
    /// captured environment, consulted by `gc::Heap::children_of`.
    pub fn upvalue_ids(&self) -> Vec<u64> {
        match &self.kind {
            FunctionKind::Lua { env, .. } => env.reachable_ids(),
            FunctionKind::Native { .. } => Vec::new(),
        }
    }
}
