//! Host-exposed opaque values (spec.md §3 "userdata"). Used internally
//! for file handles (`stdlib::io`) so they can carry a `<close>`
//! metamethod and a finalizer like any other Lua value.

use crate::gc::GcRef;
use crate::value::Table;
use std::any::Any;
use std::cell::RefCell;

pub struct UserData {
    pub metatable: Option<GcRef<Table>>,
    pub data: RefCell<Box<dyn Any>>,
    pub type_name: &'static str,
}

impl UserData {
    pub fn new<T: Any>(type_name: &'static str, value: T) -> UserData {
        UserData {
            metatable: None,
            data: RefCell::new(Box::new(value)),
            type_name,
        }
    }
}
