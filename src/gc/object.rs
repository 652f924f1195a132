//! Heap object payloads. Shape grounded on the teacher's
//! `crates/luars/src/gc/gc_object.rs` tri-color header, minus the
//! duplicated pool generations (see DESIGN.md).

use crate::value::{Closure, Table, Thread, UserData};
use std::cell::RefCell;

pub enum Object {
    Table(RefCell<Table>),
    Closure(RefCell<Closure>),
    UserData(RefCell<UserData>),
    Thread(RefCell<Thread>),
}
