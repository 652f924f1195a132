//! Tree-walking evaluator: scopes, statement/expression dispatch,
//! metamethod resolution, and the coroutine driver (spec.md §4.3/§4.4).

pub mod coroutine;
mod interp;
mod metamethod;
mod scope;

pub use interp::Interp;
pub use metamethod::{format_lua_float, get_metamethod, get_metatable, number_to_string, str_to_number, to_number};
pub use scope::Scope;
