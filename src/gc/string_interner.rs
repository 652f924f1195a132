//! Short-string interning (spec.md §3: "Short strings (≤40 bytes) are
//! interned per interpreter; long strings are not.").
//!
//! Grounded on `crates/luars/src/gc/string_interner.rs`; uses `ahash` for
//! the lookup table, matching the teacher's dependency choice.

use ahash::AHashMap;
use std::rc::Rc;

pub const SHORT_STRING_LIMIT: usize = 40;

#[derive(Default)]
pub struct StringInterner {
    table: AHashMap<Box<[u8]>, Rc<[u8]>>,
}

impl StringInterner {
    pub fn new() -> Self {
        StringInterner {
            table: AHashMap::new(),
        }
    }

    /// Interns `bytes` if short enough, otherwise allocates a fresh,
    /// non-interned `Rc<[u8]>`.
    pub fn intern(&mut self, bytes: &[u8]) -> Rc<[u8]> {
        if bytes.len() > SHORT_STRING_LIMIT {
            return Rc::from(bytes);
        }
        if let Some(existing) = self.table.get(bytes) {
            return existing.clone();
        }
        let rc: Rc<[u8]> = Rc::from(bytes);
        self.table.insert(Box::from(bytes), rc.clone());
        rc
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
