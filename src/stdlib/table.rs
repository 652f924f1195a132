//! `table` library (spec.md §4.7): insert, remove, concat, sort, pack,
//! unpack, move.

use crate::error::EvalResult;
use crate::eval::Interp;
use crate::lib_module;
use crate::stdlib::registry::{bad_argument, check_int, check_table, install, opt_int, runtime_error, LibraryModule};
use crate::value::{Table, Value};

pub fn create() -> LibraryModule {
    lib_module!("table", {
        "insert" => table_insert,
        "remove" => table_remove,
        "concat" => table_concat,
        "sort" => table_sort,
        "pack" => table_pack,
        "unpack" => table_unpack,
        "move" => table_move,
    })
}

pub fn install_table(interp: &mut Interp) {
    install(interp, create());
}

fn table_insert(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let t = check_table(args, 1, "insert")?;
    let len = interp.heap.table(t).length();
    match args.len() {
        2 => {
            let v = args[1].clone();
            interp.heap.table_mut(t).set(Value::Int(len + 1), v).map_err(runtime_error)?;
        }
        3 => {
            let pos = check_int(args, 2, "insert")?;
            if pos < 1 || pos > len + 1 {
                return Err(runtime_error("bad argument #2 to 'insert' (position out of bounds)"));
            }
            let v = args[2].clone();
            let mut i = len;
            while i >= pos {
                let moved = interp.heap.table(t).get_int(i);
                interp.heap.table_mut(t).set(Value::Int(i + 1), moved).map_err(runtime_error)?;
                i -= 1;
            }
            interp.heap.table_mut(t).set(Value::Int(pos), v).map_err(runtime_error)?;
        }
        _ => return Err(runtime_error("wrong number of arguments to 'insert'")),
    }
    Ok(Vec::new())
}

fn table_remove(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let t = check_table(args, 1, "remove")?;
    let len = interp.heap.table(t).length();
    let pos = opt_int(args, 2, len);
    if len == 0 {
        return Ok(vec![Value::Nil]);
    }
    if pos < 1 || pos > len + 1 {
        return Err(runtime_error("bad argument #2 to 'remove' (position out of bounds)"));
    }
    let removed = interp.heap.table(t).get_int(pos);
    let mut i = pos;
    while i < len {
        let next = interp.heap.table(t).get_int(i + 1);
        interp.heap.table_mut(t).set(Value::Int(i), next).map_err(runtime_error)?;
        i += 1;
    }
    interp.heap.table_mut(t).set(Value::Int(len), Value::Nil).map_err(runtime_error)?;
    Ok(vec![removed])
}

fn table_concat(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let t = check_table(args, 1, "concat")?;
    let sep = match args.get(1) {
        Some(Value::Str(s)) => s.to_vec(),
        Some(Value::Int(_) | Value::Float(_)) => crate::eval::number_to_string(&args[1]).into_bytes(),
        _ => Vec::new(),
    };
    let len = interp.heap.table(t).length();
    let i = opt_int(args, 3, 1);
    let j = opt_int(args, 4, len);
    let mut out = Vec::new();
    let mut k = i;
    while k <= j {
        let v = interp.heap.table(t).get_int(k);
        match &v {
            Value::Str(s) => out.extend_from_slice(s),
            Value::Int(_) | Value::Float(_) => out.extend(crate::eval::number_to_string(&v).into_bytes()),
            other => {
                return Err(runtime_error(format!(
                    "invalid value (a {}) at index {} in table for 'concat'",
                    other.type_name(),
                    k
                )))
            }
        }
        if k < j {
            out.extend_from_slice(&sep);
        }
        k += 1;
    }
    Ok(vec![Value::str(out)])
}

/// `table.sort`: stable sort via `slice::sort_by`, reference Lua's
/// quicksort is explicitly unstable but nothing in spec.md depends on
/// that instability, and a stable sort is easier to reason about.
fn table_sort(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let t = check_table(args, 1, "sort")?;
    let len = interp.heap.table(t).length();
    let mut items: Vec<Value> = (1..=len).map(|i| interp.heap.table(t).get_int(i)).collect();
    let cmp_fn = args.get(1).cloned();

    let mut err = None;
    match cmp_fn {
        Some(f) if !f.is_nil() => {
            items.sort_by(|a, b| {
                if err.is_some() {
                    return std::cmp::Ordering::Equal;
                }
                match interp.call_value(f.clone(), vec![a.clone(), b.clone()], 0) {
                    Ok(r) => {
                        if r.first().map(Value::is_truthy).unwrap_or(false) {
                            std::cmp::Ordering::Less
                        } else {
                            std::cmp::Ordering::Greater
                        }
                    }
                    Err(e) => {
                        err = Some(e);
                        std::cmp::Ordering::Equal
                    }
                }
            });
        }
        _ => {
            items.sort_by(|a, b| default_less(a, b));
        }
    }
    if let Some(e) = err {
        return Err(e);
    }
    for (i, v) in items.into_iter().enumerate() {
        interp.heap.table_mut(t).set(Value::Int(i as i64 + 1), v).map_err(runtime_error)?;
    }
    Ok(Vec::new())
}

fn default_less(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a.as_float(), b.as_float()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => match (a, b) {
            (Value::Str(x), Value::Str(y)) => x.cmp(y),
            _ => std::cmp::Ordering::Equal,
        },
    }
}

fn table_pack(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let mut t = Table::new();
    for (i, v) in args.iter().enumerate() {
        t.set(Value::Int(i as i64 + 1), v.clone()).ok();
    }
    t.set_str("n", Value::Int(args.len() as i64));
    Ok(vec![Value::Table(interp.heap.alloc_table(t))])
}

pub fn table_unpack(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let t = check_table(args, 1, "unpack")?;
    let i = opt_int(args, 2, 1);
    let j = opt_int(args, 3, interp.heap.table(t).length());
    if i > j {
        return Ok(Vec::new());
    }
    Ok((i..=j).map(|k| interp.heap.table(t).get_int(k)).collect())
}

fn table_move(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let a1 = check_table(args, 1, "move")?;
    let f = check_int(args, 2, "move")?;
    let e = check_int(args, 3, "move")?;
    let tpos = check_int(args, 4, "move")?;
    let a2 = match args.get(4) {
        Some(Value::Table(t)) => *t,
        Some(other) => return Err(bad_argument(5, "move", "table", other)),
        None => a1,
    };
    if e >= f {
        if tpos > f || tpos > e || a1 != a2 {
            let mut i = f;
            while i <= e {
                let v = interp.heap.table(a1).get_int(i);
                interp.heap.table_mut(a2).set(Value::Int(tpos + (i - f)), v).map_err(runtime_error)?;
                i += 1;
            }
        } else {
            let mut i = e;
            while i >= f {
                let v = interp.heap.table(a1).get_int(i);
                interp.heap.table_mut(a2).set(Value::Int(tpos + (i - f)), v).map_err(runtime_error)?;
                i -= 1;
            }
        }
    }
    Ok(vec![Value::Table(a2)])
}
