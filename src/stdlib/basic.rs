//! Base library (spec.md §4.7): the functions installed directly into
//! `_G` rather than behind a named table.

use crate::error::{Control, EvalResult, LuaError, LuaFullError};
use crate::eval::Interp;
use crate::lib_module;
use crate::stdlib::registry::{bad_argument, check_int, check_table, install, runtime_error, LibraryModule};
use crate::value::{Closure, Value};
use std::rc::Rc;

pub fn create() -> LibraryModule {
    lib_module!("_G", {
        "print" => base_print,
        "tostring" => base_tostring,
        "tonumber" => base_tonumber,
        "pairs" => base_pairs,
        "ipairs" => base_ipairs,
        "next" => base_next,
        "setmetatable" => base_setmetatable,
        "getmetatable" => base_getmetatable,
        "rawget" => base_rawget,
        "rawset" => base_rawset,
        "rawequal" => base_rawequal,
        "rawlen" => base_rawlen,
        "pcall" => base_pcall,
        "xpcall" => base_xpcall,
        "error" => base_error,
        "assert" => base_assert,
        "select" => base_select,
        "type" => base_type,
        "load" => base_load,
        "loadstring" => base_load,
        "collectgarbage" => base_collectgarbage,
        "unpack" => base_unpack,
    })
}

pub fn install_basic(interp: &mut Interp) {
    install(interp, create());
    interp.heap.table_mut(interp.globals).set_str("_VERSION", Value::str(b"Lua 5.4".as_slice()));
    let g = Value::Table(interp.globals);
    interp.heap.table_mut(interp.globals).set_str("_G", g);
}

fn base_print(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let mut stdout = std::io::Write::by_ref(&mut std::io::stdout());
    for (i, v) in args.iter().enumerate() {
        if i > 0 {
            let _ = std::io::Write::write_all(&mut stdout, b"\t");
        }
        let s = interp.tostring(v, 0)?;
        let _ = std::io::Write::write_all(&mut stdout, &s);
    }
    let _ = std::io::Write::write_all(&mut stdout, b"\n");
    Ok(Vec::new())
}

fn base_tostring(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let v = args.first().cloned().unwrap_or(Value::Nil);
    Ok(vec![Value::str(interp.tostring(&v, 0)?)])
}

fn base_tonumber(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let v = args.first().cloned().unwrap_or(Value::Nil);
    if let Some(base_v) = args.get(1) {
        let base = base_v.as_int().unwrap_or(10);
        let s = match &v {
            Value::Str(s) => s.clone(),
            _ => return Err(bad_argument(1, "tonumber", "string", &v)),
        };
        let text = std::str::from_utf8(&s).unwrap_or("").trim();
        let (neg, text) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text.strip_prefix('+').unwrap_or(text)),
        };
        return Ok(vec![match i64::from_str_radix(text, base as u32) {
            Ok(n) => Value::Int(if neg { -n } else { n }),
            Err(_) => Value::Nil,
        }]);
    }
    match &v {
        Value::Int(_) | Value::Float(_) => Ok(vec![v]),
        Value::Str(s) => Ok(vec![crate::eval::str_to_number(s).unwrap_or(Value::Nil)]),
        _ => Ok(vec![Value::Nil]),
    }
}

fn base_pairs(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let t = args.first().cloned().unwrap_or(Value::Nil);
    if let Value::Table(tr) = &t {
        let mt = interp.heap.table(*tr).metatable;
        if let Some(mt) = mt {
            let pairs_mm = interp.heap.table(mt).get_str("__pairs");
            if !pairs_mm.is_nil() {
                return interp.call_value(pairs_mm, vec![t], 0);
            }
        }
    }
    Ok(vec![
        Value::Function(interp.heap.alloc_closure(Closure::native("next", Rc::new(base_next)))),
        t,
        Value::Nil,
    ])
}

fn base_ipairs(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let t = args.first().cloned().unwrap_or(Value::Nil);
    Ok(vec![
        Value::Function(interp.heap.alloc_closure(Closure::native("inext", Rc::new(inext)))),
        t,
        Value::Int(0),
    ])
}

fn inext(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let t = check_table(args, 1, "inext")?;
    let i = check_int(args, 2, "inext")? + 1;
    let v = interp.heap.table(t).get_int(i);
    if v.is_nil() {
        Ok(vec![Value::Nil])
    } else {
        Ok(vec![Value::Int(i), v])
    }
}

fn base_next(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let t = check_table(args, 1, "next")?;
    let key = args.get(1).cloned().unwrap_or(Value::Nil);
    match interp.heap.table(t).next_key(&key) {
        Some((k, v)) => Ok(vec![k, v]),
        None => Ok(vec![Value::Nil]),
    }
}

fn base_setmetatable(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let t = check_table(args, 1, "setmetatable")?;
    let existing_mt = interp.heap.table(t).metatable;
    if let Some(mt) = existing_mt {
        if !interp.heap.table(mt).get_str("__metatable").is_nil() {
            return Err(runtime_error("cannot change a protected metatable"));
        }
    }
    match args.get(1) {
        None | Some(Value::Nil) => {
            interp.heap.table_mut(t).metatable = None;
        }
        Some(Value::Table(mt)) => {
            let has_gc = !interp.heap.table(*mt).get_str("__gc").is_nil();
            interp.heap.table_mut(t).metatable = Some(*mt);
            interp.heap.table_mut(t).has_gc_metamethod = has_gc;
        }
        Some(other) => return Err(bad_argument(2, "setmetatable", "nil or table", other)),
    }
    Ok(vec![Value::Table(t)])
}

fn base_getmetatable(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let v = args.first().cloned().unwrap_or(Value::Nil);
    let mt = match &v {
        Value::Table(t) => interp.heap.table(*t).metatable,
        Value::Str(_) => interp.string_metatable,
        _ => None,
    };
    match mt {
        None => Ok(vec![Value::Nil]),
        Some(mt) => {
            let protected = interp.heap.table(mt).get_str("__metatable");
            if !protected.is_nil() {
                Ok(vec![protected])
            } else {
                Ok(vec![Value::Table(mt)])
            }
        }
    }
}

fn base_rawget(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let t = check_table(args, 1, "rawget")?;
    let key = args.get(1).cloned().unwrap_or(Value::Nil);
    Ok(vec![interp.heap.table(t).get(&key)])
}

fn base_rawset(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let t = check_table(args, 1, "rawset")?;
    let key = args.get(1).cloned().unwrap_or(Value::Nil);
    let value = args.get(2).cloned().unwrap_or(Value::Nil);
    interp.heap.table_mut(t).set(key, value).map_err(runtime_error)?;
    Ok(vec![Value::Table(t)])
}

fn base_rawequal(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let a = args.first().cloned().unwrap_or(Value::Nil);
    let b = args.get(1).cloned().unwrap_or(Value::Nil);
    Ok(vec![Value::Bool(a.raw_eq(&b))])
}

fn base_rawlen(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    match args.first() {
        Some(Value::Table(t)) => Ok(vec![Value::Int(interp.heap.table(*t).length())]),
        Some(Value::Str(s)) => Ok(vec![Value::Int(s.len() as i64)]),
        Some(other) => Err(bad_argument(1, "rawlen", "table or string", other)),
        None => Err(bad_argument(1, "rawlen", "table or string", &Value::Nil)),
    }
}

fn base_pcall(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let f = args.first().cloned().unwrap_or(Value::Nil);
    let rest = args.get(1..).unwrap_or(&[]).to_vec();
    match interp.call_value(f, rest, 0) {
        Ok(mut vs) => {
            let mut out = vec![Value::Bool(true)];
            out.append(&mut vs);
            Ok(out)
        }
        Err(Control::Error(e)) => Ok(vec![Value::Bool(false), e.value]),
        Err(other) => Err(other),
    }
}

fn base_xpcall(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let f = args.first().cloned().unwrap_or(Value::Nil);
    let handler = args.get(1).cloned().unwrap_or(Value::Nil);
    let rest = args.get(2..).unwrap_or(&[]).to_vec();
    match interp.call_value(f, rest, 0) {
        Ok(mut vs) => {
            let mut out = vec![Value::Bool(true)];
            out.append(&mut vs);
            Ok(out)
        }
        Err(Control::Error(e)) => {
            let handled = interp.call_value(handler, vec![e.value], 0)?;
            let mut out = vec![Value::Bool(false)];
            out.extend(handled);
            Ok(out)
        }
        Err(other) => Err(other),
    }
}

fn base_error(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let v = args.first().cloned().unwrap_or(Value::Nil);
    let level = args.get(1).and_then(Value::as_int).unwrap_or(1);
    let value = match &v {
        Value::Str(s) if level != 0 => {
            // Position info would need the caller's source line, which
            // native functions are not handed; errors raised from Lua
            // code itself go through `Interp::rt_error` instead, which
            // does have it.
            Value::str(s.clone())
        }
        _ => v,
    };
    let msg = match &value {
        Value::Str(s) => String::from_utf8_lossy(s).into_owned(),
        other => format!("(error object is a {} value)", other.type_name()),
    };
    Err(Control::Error(LuaFullError::new(LuaError::Runtime, msg, value)))
}

fn base_assert(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let v = args.first().cloned().unwrap_or(Value::Nil);
    if v.is_truthy() {
        return Ok(args.to_vec());
    }
    let value = args.get(1).cloned().unwrap_or_else(|| Value::str(b"assertion failed!".as_slice()));
    let msg = match &value {
        Value::Str(s) => String::from_utf8_lossy(s).into_owned(),
        other => format!("(error object is a {} value)", other.type_name()),
    };
    Err(Control::Error(LuaFullError::new(LuaError::Runtime, msg, value)))
}

fn base_select(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    match args.first() {
        Some(Value::Str(s)) if &**s == b"#" => Ok(vec![Value::Int(args.len() as i64 - 1)]),
        Some(v) => {
            let n = v.as_int().ok_or_else(|| bad_argument(1, "select", "number", v))?;
            let rest = &args[1..];
            if n < 0 {
                let idx = rest.len() as i64 + n;
                if idx < 0 {
                    return Err(runtime_error("bad argument #1 to 'select' (index out of range)"));
                }
                Ok(rest[idx as usize..].to_vec())
            } else if n == 0 {
                Err(runtime_error("bad argument #1 to 'select' (index out of range)"))
            } else {
                Ok(rest.get(n as usize - 1..).unwrap_or(&[]).to_vec())
            }
        }
        None => Err(bad_argument(1, "select", "number", &Value::Nil)),
    }
}

fn base_type(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let v = args.first().ok_or_else(|| bad_argument(1, "type", "value", &Value::Nil))?;
    Ok(vec![Value::str(v.type_name().as_bytes())])
}

fn base_load(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let chunk = match args.first() {
        Some(Value::Str(s)) => s.to_vec(),
        Some(Value::Function(_)) => {
            let mut buf = Vec::new();
            loop {
                let piece = interp.call_value(args[0].clone(), Vec::new(), 0)?;
                match piece.into_iter().next() {
                    Some(Value::Str(s)) if !s.is_empty() => buf.extend_from_slice(&s),
                    _ => break,
                }
            }
            buf
        }
        _ => return Err(bad_argument(1, "load", "string or function", args.first().unwrap_or(&Value::Nil))),
    };
    // A chunk produced by `string.dump` carries a short magic prefix
    // ahead of the source text it wraps; strip it back off so the
    // parser sees plain Lua source either way (spec.md §6 round trip).
    let chunk = match chunk.strip_prefix(crate::stdlib::string::DUMP_MAGIC) {
        Some(rest) => rest.to_vec(),
        None => chunk,
    };
    let chunk_name = match args.get(1) {
        Some(Value::Str(s)) => String::from_utf8_lossy(s).into_owned(),
        _ => String::from_utf8_lossy(&chunk).into_owned(),
    };
    match crate::parser::parse(&chunk, &chunk_name) {
        Ok(block) => {
            let body = Rc::new(crate::parser::ast::FunctionBody {
                params: Vec::new(),
                is_vararg: true,
                body: block,
                line: 0,
                name: chunk_name,
            });
            let proto = Rc::new(crate::value::Proto {
                params: Vec::new(),
                is_vararg: true,
                body,
                name: "chunk".to_string(),
                source: interp.source_name.clone(),
                line: 0,
                source_text: Some(std::rc::Rc::from(chunk.into_boxed_slice())),
            });
            // The optional 4th `env` argument (a custom `_ENV` table) is
            // not supported; loaded chunks always see the real globals.
            let closure = crate::value::Closure::lua(proto, crate::eval::Scope::root());
            Ok(vec![Value::Function(interp.heap.alloc_closure(closure))])
        }
        Err(e) => Ok(vec![Value::Nil, Value::str(e.to_string().into_bytes())]),
    }
}

fn base_collectgarbage(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let opt = match args.first() {
        Some(Value::Str(s)) => String::from_utf8_lossy(s).into_owned(),
        _ => "collect".to_string(),
    };
    match opt.as_str() {
        "collect" | "step" => {
            interp.run_gc_step(&[]);
            Ok(vec![Value::Int(0)])
        }
        "count" => {
            let kb = interp.heap.bytes_allocated() as f64 / 1024.0;
            Ok(vec![Value::Float(kb), Value::Int((interp.heap.bytes_allocated() % 1024) as i64)])
        }
        "stop" => {
            interp.heap.stop();
            Ok(vec![Value::Int(0)])
        }
        "restart" => {
            interp.heap.restart();
            Ok(vec![Value::Int(0)])
        }
        "isrunning" => Ok(vec![Value::Bool(!interp.heap.is_stopped())]),
        _ => Ok(vec![Value::Int(0)]),
    }
}

fn base_unpack(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    crate::stdlib::table::table_unpack(interp, args)
}
