//! `Table`: array part + hash part + metatable (spec.md §3/§4.5).
//!
//! Grounded on `crates/luars/src/lua_value/lua_table/{mod.rs,
//! value_array.rs,hash_table.rs}`'s array/hash split.

use crate::gc::GcRef;
use crate::value::Value;
use ahash::AHashMap;

/// Table keys must be hashable/comparable and may never be `nil`/`NaN`
/// (spec.md §3 invariant). Integral floats normalize to `Int` so that
/// `t[3]` and `t[3.0]` address the same slot, matching reference Lua.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Bool(bool),
    Int(i64),
    /// Non-integral float, compared/hashed by bit pattern.
    FloatBits(u64),
    Str(std::rc::Rc<[u8]>),
    Obj(u64),
}

impl HashKey {
    pub fn from_value(v: &Value) -> Option<HashKey> {
        match v {
            Value::Nil => None,
            Value::Bool(b) => Some(HashKey::Bool(*b)),
            Value::Int(i) => Some(HashKey::Int(*i)),
            Value::Float(f) => {
                if f.is_nan() {
                    None
                } else if f.fract() == 0.0 && f.is_finite() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Some(HashKey::Int(*f as i64))
                } else {
                    Some(HashKey::FloatBits(f.to_bits()))
                }
            }
            Value::Str(s) => Some(HashKey::Str(s.clone())),
            _ => v.gc_id().map(HashKey::Obj),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            HashKey::Bool(b) => Value::Bool(*b),
            HashKey::Int(i) => Value::Int(*i),
            HashKey::FloatBits(bits) => Value::Float(f64::from_bits(*bits)),
            HashKey::Str(s) => Value::Str(s.clone()),
            HashKey::Obj(_) => Value::Nil, // identity-only keys are reconstructed by the caller from the original Value
        }
    }
}

pub struct Table {
    /// 1-based array part; `array[0]` is Lua index 1.
    array: Vec<Value>,
    hash: AHashMap<HashKey, Value>,
    /// Insertion order for the hash part, so `next`/`pairs` iteration is
    /// deterministic across a single table's lifetime (reference Lua
    /// does not guarantee an order either, but a stable one is easier to
    /// test against).
    hash_order: Vec<HashKey>,
    /// Original `Value` for object-identity keys (tables/closures/...),
    /// since a `HashKey::Obj` only carries the identity id and `next`
    /// needs to hand back the real value.
    obj_key_values: AHashMap<u64, Value>,
    pub metatable: Option<GcRef<Table>>,
    pub weak_keys: bool,
    pub weak_values: bool,
    /// Latched the moment `setmetatable` installs a metatable carrying
    /// `__gc` (spec.md §3 lifecycle rule).
    pub has_gc_metamethod: bool,
}

impl Table {
    pub fn new() -> Self {
        Table {
            array: Vec::new(),
            hash: AHashMap::new(),
            hash_order: Vec::new(),
            obj_key_values: AHashMap::new(),
            metatable: None,
            weak_keys: false,
            weak_values: false,
            has_gc_metamethod: false,
        }
    }

    pub fn with_capacity(array_hint: usize, hash_hint: usize) -> Self {
        Table {
            array: Vec::with_capacity(array_hint),
            hash: AHashMap::with_capacity(hash_hint),
            hash_order: Vec::with_capacity(hash_hint),
            obj_key_values: AHashMap::new(),
            metatable: None,
            weak_keys: false,
            weak_values: false,
            has_gc_metamethod: false,
        }
    }

    /// Raw get by Lua value key (no metamethods): spec.md §4.5 `rawget`.
    pub fn get(&self, key: &Value) -> Value {
        if let Value::Int(i) = key {
            if *i >= 1 && (*i as usize) <= self.array.len() {
                return self.array[*i as usize - 1].clone();
            }
        }
        if let Value::Float(f) = key {
            if f.fract() == 0.0 && *f >= 1.0 {
                let i = *f as i64;
                if (i as usize) <= self.array.len() {
                    return self.array[i as usize - 1].clone();
                }
            }
        }
        match HashKey::from_value(key) {
            Some(hk) => self.hash.get(&hk).cloned().unwrap_or(Value::Nil),
            None => Value::Nil,
        }
    }

    pub fn get_str(&self, name: &str) -> Value {
        self.hash
            .get(&HashKey::Str(std::rc::Rc::from(name.as_bytes())))
            .cloned()
            .unwrap_or(Value::Nil)
    }

    pub fn get_int(&self, i: i64) -> Value {
        if i >= 1 && (i as usize) <= self.array.len() {
            self.array[i as usize - 1].clone()
        } else {
            self.hash.get(&HashKey::Int(i)).cloned().unwrap_or(Value::Nil)
        }
    }

    /// Raw set by Lua value key: spec.md §4.5 `rawset`. Setting `nil`
    /// removes the entry (spec.md §3 invariant).
    pub fn set(&mut self, key: Value, value: Value) -> Result<(), &'static str> {
        if key.is_nil() {
            return Err("table index is nil");
        }
        if let Value::Float(f) = &key {
            if f.is_nan() {
                return Err("table index is NaN");
            }
        }
        let int_key = match &key {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        };
        if let Some(i) = int_key {
            if i >= 1 && (i as usize) <= self.array.len() {
                if value.is_nil() && i as usize == self.array.len() {
                    self.array.pop();
                    // shrink further while the new tail is nil
                    while matches!(self.array.last(), Some(Value::Nil)) {
                        self.array.pop();
                    }
                } else {
                    self.array[i as usize - 1] = value;
                }
                return Ok(());
            }
            if i as usize == self.array.len() + 1 && !value.is_nil() {
                self.array.push(value);
                // absorb any contiguous successors already sitting in the hash part
                let mut next = self.array.len() as i64 + 1;
                while let Some(v) = self.hash.remove(&HashKey::Int(next)) {
                    self.array.push(v);
                    next += 1;
                }
                return Ok(());
            }
        }
        let hk = HashKey::from_value(&key).expect("validated above");
        if let HashKey::Obj(id) = &hk {
            if value.is_nil() {
                self.obj_key_values.remove(id);
            } else {
                self.obj_key_values.insert(*id, key.clone());
            }
        }
        if value.is_nil() {
            self.hash.remove(&hk);
        } else {
            if !self.hash.contains_key(&hk) {
                self.hash_order.push(hk.clone());
            }
            self.hash.insert(hk, value);
        }
        Ok(())
    }

    pub fn set_str(&mut self, name: &str, value: Value) {
        let _ = self.set(Value::str(name.as_bytes()), value);
    }

    pub fn hash_remove(&mut self, key: &HashKey) {
        if let HashKey::Obj(id) = key {
            self.obj_key_values.remove(id);
        }
        self.hash.remove(key);
    }

    /// A border per spec.md §3/§GLOSSARY: `t[n]` non-nil, `t[n+1]` nil.
    /// The array part gives an O(1)/O(log n) border when it has no
    /// internal holes; otherwise binary search within the array part,
    /// matching reference Lua's `#t` non-determinism-with-holes clause.
    pub fn length(&self) -> i64 {
        if let Some(Value::Nil) = self.array.last() {
            // binary search for a border inside the array part
            let (mut lo, mut hi) = (0usize, self.array.len());
            while hi - lo > 1 {
                let mid = (lo + hi) / 2;
                if matches!(self.array[mid - 1], Value::Nil) {
                    hi = mid;
                } else {
                    lo = mid;
                }
            }
            return lo as i64;
        }
        let base = self.array.len() as i64;
        if base > 0 && self.hash.is_empty() {
            return base;
        }
        // array part is full (or empty); check whether the hash part
        // continues the sequence, as reference Lua's unbound search does.
        if !self.hash.contains_key(&HashKey::Int(base + 1)) {
            return base;
        }
        let mut i = base + 1;
        let mut j = i;
        while self.hash.contains_key(&HashKey::Int(j + 1)) {
            i = j + 1;
            j = if j > i64::MAX / 2 { i64::MAX } else { j * 2 };
            if j == i64::MAX {
                break;
            }
        }
        while j - i > 1 {
            let mid = i + (j - i) / 2;
            if self.hash.contains_key(&HashKey::Int(mid)) {
                i = mid;
            } else {
                j = mid;
            }
        }
        i
    }

    pub fn array_values(&self) -> impl Iterator<Item = &Value> {
        self.array.iter()
    }

    pub fn array_len(&self) -> usize {
        self.array.len()
    }

    pub fn hash_iter(&self) -> impl Iterator<Item = (&HashKey, &Value)> {
        self.hash.iter()
    }

    /// `next(table, key)` support: iterates the array part in order, then
    /// the hash part in insertion order, per spec.md §4.7.
    pub fn next_key(&self, key: &Value) -> Option<(Value, Value)> {
        let start_hash_from = match key {
            Value::Nil => {
                for (i, v) in self.array.iter().enumerate() {
                    if !v.is_nil() {
                        return Some((Value::Int(i as i64 + 1), v.clone()));
                    }
                }
                0
            }
            _ => {
                if let Some(i) = key.as_int() {
                    if i >= 1 && (i as usize) <= self.array.len() {
                        for j in (i as usize)..self.array.len() {
                            if !self.array[j].is_nil() {
                                return Some((Value::Int(j as i64 + 1), self.array[j].clone()));
                            }
                        }
                        0
                    } else {
                        self.hash_position_after(key)?
                    }
                } else {
                    self.hash_position_after(key)?
                }
            }
        };
        for hk in self.hash_order.iter().skip(start_hash_from) {
            if let Some(v) = self.hash.get(hk) {
                return Some((hk.to_value_full(self), v.clone()));
            }
        }
        None
    }

    fn hash_position_after(&self, key: &Value) -> Option<usize> {
        let hk = HashKey::from_value(key)?;
        let pos = self.hash_order.iter().position(|k| *k == hk)?;
        Some(pos + 1)
    }
}

impl HashKey {
    /// Like `to_value` but recovers identity keys (tables/functions/...)
    /// by scanning is not possible from the key alone; those are stored
    /// with full fidelity because `Value::gc_id` round-trips through a
    /// side table is unnecessary here — object keys are rare enough that
    /// we keep the original `Value` alongside in `obj_key_values`.
    fn to_value_full(&self, owner: &Table) -> Value {
        match self {
            HashKey::Obj(id) => owner
                .obj_key_values
                .get(id)
                .cloned()
                .unwrap_or(Value::Nil),
            other => other.to_value(),
        }
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}
