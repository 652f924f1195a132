//! `utf8` library (spec.md §4.7), grounded on the teacher's
//! `stdlib/utf8.rs` (`len`/`char`/`codes`/`codepoint`/`offset`), adapted
//! from `LuaState`'s string-id lookups to this crate's `LuaStr` byte
//! slices directly.

use crate::error::EvalResult;
use crate::eval::Interp;
use crate::lib_module;
use crate::stdlib::registry::{bad_argument, check_str, install, runtime_error, LibraryModule};
use crate::value::{Closure, Value};
use std::rc::Rc;

pub fn create() -> LibraryModule {
    lib_module!("utf8", {
        "len" => utf8_len,
        "char" => utf8_char,
        "codes" => utf8_codes,
        "codepoint" => utf8_codepoint,
        "offset" => utf8_offset,
    })
}

pub fn install_utf8(interp: &mut Interp) {
    install(interp, create());
    let ut = interp.heap.table(interp.globals).get_str("utf8");
    if let Value::Table(t) = ut {
        interp.heap.table_mut(t).set_str("charpattern", Value::str(b"[\x00-\x7F\xC2-\xFD][\x80-\xBF]*".as_slice()));
    }
}

fn utf8_len(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let s = check_str(args, 1, "len")?;
    let len = s.len() as i64;
    let i = args.get(1).and_then(Value::as_int).unwrap_or(1);
    let j = args.get(2).and_then(Value::as_int).unwrap_or(-1);
    let start = if i >= 0 { (i - 1).max(0) as usize } else { (len + i).max(0) as usize };
    let end = if j >= 0 { (j as usize).min(s.len()) } else { ((len + j + 1).max(0) as usize).min(s.len()) };
    if start > end || start > s.len() {
        return Ok(vec![Value::Nil, Value::Int(start as i64 + 1)]);
    }
    match std::str::from_utf8(&s[start..end]) {
        Ok(valid) => Ok(vec![Value::Int(valid.chars().count() as i64)]),
        Err(e) => Ok(vec![Value::Nil, Value::Int((start + e.valid_up_to() + 1) as i64)]),
    }
}

fn utf8_char(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let mut out = String::new();
    for (i, v) in args.iter().enumerate() {
        let code = v.as_int().ok_or_else(|| bad_argument(i + 1, "char", "number", v))?;
        if !(0..=0x10FFFF).contains(&code) {
            return Err(runtime_error(format!("bad argument #{} to 'char' (value out of range)", i + 1)));
        }
        match char::from_u32(code as u32) {
            Some(ch) => out.push(ch),
            None => return Err(runtime_error(format!("bad argument #{} to 'char' (invalid code point)", i + 1))),
        }
    }
    Ok(vec![Value::str(out.into_bytes())])
}

fn utf8_codes(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    check_str(args, 1, "codes")?;
    let iter = Closure::native("utf8.codes iterator", Rc::new(utf8_codes_iterator));
    let iref = interp.heap.alloc_closure(iter);
    Ok(vec![Value::Function(iref), args[0].clone(), Value::Int(0)])
}

fn utf8_codes_iterator(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let s = check_str(args, 1, "codes")?;
    let pos = args.get(1).and_then(Value::as_int).unwrap_or(0).max(0) as usize;
    if pos >= s.len() {
        return Ok(vec![Value::Nil]);
    }
    match std::str::from_utf8(&s[pos..]) {
        Ok(rest) => match rest.chars().next() {
            Some(ch) => Ok(vec![Value::Int(pos as i64 + 1), Value::Int(ch as i64), Value::Int((pos + ch.len_utf8()) as i64)]),
            None => Ok(vec![Value::Nil]),
        },
        Err(_) => Err(runtime_error("invalid UTF-8 code")),
    }
}

fn utf8_codepoint(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let s = check_str(args, 1, "codepoint")?;
    let i = args.get(1).and_then(Value::as_int).unwrap_or(1);
    let j = args.get(2).and_then(Value::as_int).unwrap_or(i);
    let len = s.len() as i64;
    let start = if i >= 0 { (i - 1).max(0) as usize } else { (len + i).max(0) as usize };
    let end = if j >= 0 { (j as usize).min(s.len()) } else { ((len + j + 1).max(0) as usize).min(s.len()) };
    if start >= s.len() {
        return Err(runtime_error("bad argument #2 to 'codepoint' (out of bounds)"));
    }
    let text = std::str::from_utf8(&s[start..]).map_err(|_| runtime_error("invalid UTF-8 code"))?;
    let mut out = Vec::new();
    let mut pos = start;
    for ch in text.chars() {
        if pos >= end {
            break;
        }
        out.push(Value::Int(ch as i64));
        pos += ch.len_utf8();
    }
    Ok(out)
}

fn utf8_offset(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let s = check_str(args, 1, "offset")?;
    let n = args.get(1).and_then(Value::as_int).ok_or_else(|| bad_argument(2, "offset", "number", args.get(1).unwrap_or(&Value::Nil)))?;
    let default_i = if n >= 0 { 1 } else { s.len() as i64 + 1 };
    let i = args.get(2).and_then(Value::as_int).unwrap_or(default_i);
    let start = if i > 0 { (i - 1) as usize } else { 0 };
    if start > s.len() {
        return Ok(vec![Value::Nil]);
    }
    let mut pos = start;
    let mut count = n;
    if n >= 0 {
        count -= 1;
        while count > 0 && pos < s.len() {
            match std::str::from_utf8(&s[pos..]).ok().and_then(|t| t.chars().next()) {
                Some(ch) => {
                    pos += ch.len_utf8();
                    count -= 1;
                }
                None => return Ok(vec![Value::Nil]),
            }
        }
        if count == 0 {
            Ok(vec![Value::Int(pos as i64 + 1)])
        } else {
            Ok(vec![Value::Nil])
        }
    } else {
        while count < 0 && pos > 0 {
            pos -= 1;
            while pos > 0 && (s[pos] & 0xC0) == 0x80 {
                pos -= 1;
            }
            count += 1;
        }
        if count == 0 {
            Ok(vec![Value::Int(pos as i64 + 1)])
        } else {
            Ok(vec![Value::Nil])
        }
    }
}
