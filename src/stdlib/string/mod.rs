//! `string` library (spec.md §4.7).

mod format;
mod pack;
mod pattern;

use crate::error::{Control, EvalResult};
use crate::eval::Interp;
use crate::lib_module;
use crate::stdlib::registry::{bad_argument, check_int, check_str, install, opt_int, runtime_error, LibraryModule};
use crate::value::{FunctionKind, Table, Value};

/// Prefix `string.dump` prepends to a chunk's saved source text so `load`
/// can tell a dumped chunk apart from plain source (spec.md §6). This
/// core has no bytecode format of its own to dump, so `dump`/`load`
/// round-trip through the original source text rather than compiled
/// instructions — unlike reference Lua's `\x1bLua` binary signature,
/// this only round-trips with this core's own `load`.
pub const DUMP_MAGIC: &[u8] = b"\x1bLuna";

pub fn create() -> LibraryModule {
    lib_module!("string", {
        "len" => string_len,
        "sub" => string_sub,
        "upper" => string_upper,
        "lower" => string_lower,
        "rep" => string_rep,
        "reverse" => string_reverse,
        "byte" => string_byte,
        "char" => string_char,
        "find" => string_find,
        "match" => string_match,
        "gmatch" => string_gmatch,
        "gsub" => string_gsub,
        "format" => string_format,
        "pack" => string_pack,
        "unpack" => string_unpack,
        "packsize" => string_packsize,
        "dump" => string_dump,
    })
}

/// `string.dump(f)`: serializes a Lua function's source text, prefixed
/// with `DUMP_MAGIC`, refusing native functions and functions with no
/// recorded source the same way reference Lua refuses to dump a C
/// function or a stripped proto.
fn string_dump(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let f = match args.first() {
        Some(Value::Function(f)) => *f,
        other => return Err(bad_argument(1, "dump", "function", other.unwrap_or(&Value::Nil))),
    };
    match &interp.heap.closure(f).kind {
        FunctionKind::Lua { proto, .. } => match &proto.source_text {
            Some(text) => {
                let mut out = Vec::with_capacity(DUMP_MAGIC.len() + text.len());
                out.extend_from_slice(DUMP_MAGIC);
                out.extend_from_slice(text);
                Ok(vec![Value::str(out)])
            }
            None => Err(runtime_error("unable to dump given function")),
        },
        FunctionKind::Native { .. } => Err(runtime_error("unable to dump given function")),
    }
}

pub fn install_string(interp: &mut Interp) {
    install(interp, create());
    // Attach a string metatable so `("x"):upper()` works (spec.md §4.5).
    let string_table = interp.heap.table(interp.globals).get_str("string");
    let mut mt = Table::new();
    mt.set_str("__index", string_table);
    let mt_ref = interp.heap.alloc_table(mt);
    interp.string_metatable = Some(mt_ref);
}

/// Resolves a 1-based, possibly-negative Lua string index to a 0-based byte
/// offset clamped into `[0, len]`, per spec.md §4.7 "negative indices count
/// from end".
fn resolve_index(i: i64, len: usize) -> usize {
    if i >= 0 {
        i as usize
    } else {
        let from_end = len as i64 + i + 1;
        from_end.max(0) as usize
    }
}

fn string_len(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let s = check_str(args, 1, "len")?;
    Ok(vec![Value::Int(s.len() as i64)])
}

fn string_sub(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let s = check_str(args, 1, "sub")?;
    let len = s.len();
    let i = opt_int(args, 2, 1);
    let j = opt_int(args, 3, -1);
    let mut start = resolve_index(i, len).max(1);
    let end = resolve_index(j, len).min(len);
    if start == 0 {
        start = 1;
    }
    if start > end || start > len {
        return Ok(vec![Value::str(Vec::new())]);
    }
    Ok(vec![Value::str(s[start - 1..end].to_vec())])
}

fn string_upper(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let s = check_str(args, 1, "upper")?;
    Ok(vec![Value::str(s.iter().map(|b| b.to_ascii_uppercase()).collect::<Vec<u8>>())])
}

fn string_lower(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let s = check_str(args, 1, "lower")?;
    Ok(vec![Value::str(s.iter().map(|b| b.to_ascii_lowercase()).collect::<Vec<u8>>())])
}

fn string_rep(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let s = check_str(args, 1, "rep")?;
    let n = check_int(args, 2, "rep")?;
    let sep = match args.get(2) {
        Some(Value::Str(sep)) => sep.to_vec(),
        _ => Vec::new(),
    };
    if n <= 0 {
        return Ok(vec![Value::str(Vec::new())]);
    }
    let mut out = Vec::with_capacity(s.len() * n as usize);
    for i in 0..n {
        if i > 0 {
            out.extend_from_slice(&sep);
        }
        out.extend_from_slice(&s);
    }
    Ok(vec![Value::str(out)])
}

fn string_reverse(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let mut s = check_str(args, 1, "reverse")?;
    s.reverse();
    Ok(vec![Value::str(s)])
}

fn string_byte(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let s = check_str(args, 1, "byte")?;
    let len = s.len();
    let i = opt_int(args, 2, 1);
    let j = opt_int(args, 3, i);
    let start = resolve_index(i, len).max(1);
    let end = resolve_index(j, len).min(len);
    if start > end || start > len {
        return Ok(Vec::new());
    }
    Ok(s[start - 1..end].iter().map(|b| Value::Int(*b as i64)).collect())
}

fn string_char(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let mut out = Vec::with_capacity(args.len());
    for (i, v) in args.iter().enumerate() {
        let n = v.as_int().ok_or_else(|| bad_argument(i + 1, "char", "number", v))?;
        if !(0..=255).contains(&n) {
            return Err(runtime_error(format!("bad argument #{} to 'char' (value out of range)", i + 1)));
        }
        out.push(n as u8);
    }
    Ok(vec![Value::str(out)])
}

fn capture_values(text: &[u8], start: usize, end: usize, caps: &[pattern::CapValue]) -> Vec<Value> {
    if caps.is_empty() {
        return vec![Value::str(text[start..end].to_vec())];
    }
    caps.iter()
        .map(|c| match c {
            pattern::CapValue::Str(s) => Value::str(s.clone()),
            pattern::CapValue::Position(p) => Value::Int(*p as i64),
        })
        .collect()
}

fn string_find(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let s = check_str(args, 1, "find")?;
    let pat = check_str(args, 2, "find")?;
    let init_arg = opt_int(args, 3, 1);
    let init = resolve_index(init_arg, s.len()).max(1) - 1;
    let plain = args.get(3).map(Value::is_truthy).unwrap_or(false);
    if init > s.len() {
        return Ok(vec![Value::Nil]);
    }
    if plain || !pat.iter().any(|b| b"^$*+?.([%-".contains(b)) {
        if let Some(pos) = find_plain(&s[init..], &pat) {
            let start = init + pos;
            return Ok(vec![Value::Int(start as i64 + 1), Value::Int((start + pat.len()) as i64)]);
        }
        return Ok(vec![Value::Nil]);
    }
    match pattern::find(&s, &pat, init) {
        Ok(Some(m)) => {
            let mut out = vec![Value::Int(m.start as i64 + 1), Value::Int(m.end as i64)];
            out.extend(m.captures.iter().map(|c| match c {
                pattern::CapValue::Str(s) => Value::str(s.clone()),
                pattern::CapValue::Position(p) => Value::Int(*p as i64),
            }));
            Ok(out)
        }
        Ok(None) => Ok(vec![Value::Nil]),
        Err(e) => Err(runtime_error(e)),
    }
}

fn find_plain(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn string_match(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let s = check_str(args, 1, "match")?;
    let pat = check_str(args, 2, "match")?;
    let init_arg = opt_int(args, 3, 1);
    let init = resolve_index(init_arg, s.len()).max(1) - 1;
    match pattern::find(&s, &pat, init.min(s.len())) {
        Ok(Some(m)) => Ok(capture_values(&s, m.start, m.end, &m.captures)),
        Ok(None) => Ok(vec![Value::Nil]),
        Err(e) => Err(runtime_error(e)),
    }
}

/// `string.gmatch`: returns a stateful iterator closure, grounded on the
/// same `find_all`-by-restart approach the pattern engine exposes, walked
/// one match per call via a captured cursor cell.
fn string_gmatch(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let s = check_str(args, 1, "gmatch")?;
    let pat = check_str(args, 2, "gmatch")?;
    let pos = std::rc::Rc::new(std::cell::Cell::new(0usize));
    let f = move |_interp: &mut Interp, _args: &[Value]| -> EvalResult<Vec<Value>> {
        let start = pos.get();
        if start > s.len() {
            return Ok(vec![Value::Nil]);
        }
        match pattern::find(&s, &pat, start) {
            Ok(Some(m)) => {
                pos.set(if m.end > m.start { m.end } else { m.end + 1 });
                Ok(capture_values(&s, m.start, m.end, &m.captures))
            }
            Ok(None) => {
                pos.set(s.len() + 1);
                Ok(vec![Value::Nil])
            }
            Err(e) => Err(runtime_error(e)),
        }
    };
    let closure = interp.heap.alloc_closure(crate::value::Closure::native("gmatch-iterator", std::rc::Rc::new(f)));
    Ok(vec![Value::Function(closure)])
}

fn string_gsub(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let s = check_str(args, 1, "gsub")?;
    let pat = check_str(args, 2, "gsub")?;
    let repl = args.get(2).cloned().unwrap_or(Value::Nil);
    let max = args.get(3).and_then(Value::as_int).map(|n| n.max(0) as usize);

    let matches = pattern::find_all(&s, &pat, max).map_err(runtime_error)?;
    let mut out = Vec::with_capacity(s.len());
    let mut last = 0usize;
    for m in &matches {
        out.extend_from_slice(&s[last..m.start]);
        let whole = &s[m.start..m.end];
        let replacement = match &repl {
            Value::Str(r) => substitute(r, whole, &m.captures),
            Value::Table(t) => {
                let key = first_capture_or_whole(whole, &m.captures);
                let v = interp.heap.table(*t).get(&key);
                value_to_gsub_piece(v, whole)?
            }
            Value::Function(_) => {
                let call_args = capture_values(&s, m.start, m.end, &m.captures);
                let rv = interp.call_value(repl.clone(), call_args, 0)?.into_iter().next().unwrap_or(Value::Nil);
                value_to_gsub_piece(rv, whole)?
            }
            other => return Err(bad_argument(3, "gsub", "string/function/table", other)),
        };
        out.extend(replacement);
        last = m.end;
    }
    out.extend_from_slice(&s[last..]);
    Ok(vec![Value::str(out), Value::Int(matches.len() as i64)])
}

fn first_capture_or_whole(whole: &[u8], caps: &[pattern::CapValue]) -> Value {
    match caps.first() {
        Some(pattern::CapValue::Str(s)) => Value::str(s.clone()),
        Some(pattern::CapValue::Position(p)) => Value::Int(*p as i64),
        None => Value::str(whole.to_vec()),
    }
}

fn value_to_gsub_piece(v: Value, whole: &[u8]) -> EvalResult<Vec<u8>> {
    match v {
        Value::Nil | Value::Bool(false) => Ok(whole.to_vec()),
        Value::Str(s) => Ok(s.to_vec()),
        Value::Int(_) | Value::Float(_) => Ok(crate::eval::number_to_string(&v).into_bytes()),
        other => Err(runtime_error(format!("invalid replacement value (a {})", other.type_name()))),
    }
}

fn substitute(repl: &[u8], whole: &[u8], caps: &[pattern::CapValue]) -> Vec<u8> {
    let mut out = Vec::with_capacity(repl.len());
    let mut i = 0;
    while i < repl.len() {
        if repl[i] == b'%' && i + 1 < repl.len() {
            let n = repl[i + 1];
            if n == b'%' {
                out.push(b'%');
                i += 2;
                continue;
            }
            if n.is_ascii_digit() {
                let idx = (n - b'0') as usize;
                if idx == 0 {
                    out.extend_from_slice(whole);
                } else if caps.is_empty() && idx == 1 {
                    out.extend_from_slice(whole);
                } else if idx <= caps.len() {
                    match &caps[idx - 1] {
                        pattern::CapValue::Str(s) => out.extend_from_slice(s),
                        pattern::CapValue::Position(p) => out.extend(p.to_string().into_bytes()),
                    }
                }
                i += 2;
                continue;
            }
        }
        out.push(repl[i]);
        i += 1;
    }
    out
}

fn string_format(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let fmt = check_str(args, 1, "format")?;
    let rest = if args.len() > 1 { &args[1..] } else { &[] };
    let out = format::format(interp, &fmt, rest, 0)?;
    Ok(vec![Value::str(out)])
}

fn pack_values(args: &[Value], from: usize) -> Result<Vec<pack::PackValue>, Control> {
    args[from..]
        .iter()
        .enumerate()
        .map(|(i, v)| match v {
            Value::Int(n) => Ok(pack::PackValue::Int(*n)),
            Value::Float(f) => Ok(pack::PackValue::Float(*f)),
            Value::Str(s) => Ok(pack::PackValue::Str(s.to_vec())),
            other => Err(bad_argument(from + i + 1, "pack", "number or string", other)),
        })
        .collect()
}

fn string_pack(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let fmt_bytes = check_str(args, 1, "pack")?;
    let fmt = pack::parse(&fmt_bytes).map_err(runtime_error)?;
    let values = pack_values(args, 1)?;
    let bytes = pack::pack(&fmt, &values).map_err(runtime_error)?;
    Ok(vec![Value::str(bytes)])
}

fn string_unpack(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let fmt_bytes = check_str(args, 1, "unpack")?;
    let data = check_str(args, 2, "unpack")?;
    let fmt = pack::parse(&fmt_bytes).map_err(runtime_error)?;
    let start = (opt_int(args, 3, 1).max(1) - 1) as usize;
    let (values, pos) = pack::unpack(&fmt, &data, start).map_err(runtime_error)?;
    let mut out: Vec<Value> = values
        .into_iter()
        .map(|v| match v {
            pack::UnpackValue::Int(i) => Value::Int(i),
            pack::UnpackValue::Float(f) => Value::Float(f),
            pack::UnpackValue::Str(s) => Value::str(s),
        })
        .collect();
    out.push(Value::Int(pos as i64 + 1));
    Ok(out)
}

fn string_packsize(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let fmt_bytes = check_str(args, 1, "packsize")?;
    let fmt = pack::parse(&fmt_bytes).map_err(runtime_error)?;
    let n = pack::packsize(&fmt).map_err(runtime_error)?;
    Ok(vec![Value::Int(n as i64)])
}
