//! The runtime value model (spec.md §3).

mod closure;
mod table;
mod thread;
mod userdata;
mod value;

pub use closure::{Closure, FunctionKind, NativeFn, Proto};
pub use table::{HashKey, Table};
pub use thread::{CoroutineChannel, ForceSend, FromCoroutine, Thread, ThreadStatus, ToCoroutine};
pub use userdata::UserData;
pub use value::{LuaStr, Value};
