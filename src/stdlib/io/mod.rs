//! `io` library (spec.md §4.7). The teacher's `stdlib/io.rs` only wires
//! `write`/`read`/`flush`; this builds out the rest of reference Lua's
//! surface (file handles as userdata with a shared method metatable,
//! default input/output redirection, `io.lines`) on top of it, using the
//! same `lib_module!`/`LibraryModule` registration idiom as every other
//! library here.

mod file;

use crate::error::{Control, EvalResult};
use crate::eval::Interp;
use crate::gc::GcRef;
use crate::lib_module;
use crate::stdlib::registry::{bad_argument, check_str, install, runtime_error, LibraryModule};
use crate::value::{Closure, Table, UserData, Value};
use file::{LuaFile, ReadSpec};
use std::rc::Rc;

pub fn create() -> LibraryModule {
    lib_module!("io", {
        "open" => io_open,
        "close" => io_close,
        "read" => io_read,
        "write" => io_write,
        "lines" => io_lines,
        "input" => io_input,
        "output" => io_output,
        "flush" => io_flush,
        "type" => io_type,
    })
}

pub fn install_io(interp: &mut Interp) {
    install(interp, create());
    let methods = build_file_methods(interp);

    let io_table = match interp.heap.table(interp.globals).get_str("io") {
        Value::Table(t) => t,
        _ => return,
    };

    let stdin = make_file(interp, LuaFile::Stdin, methods);
    let stdout = make_file(interp, LuaFile::Stdout, methods);
    let stderr = make_file(interp, LuaFile::Stderr, methods);

    let mut t = interp.heap.table_mut(io_table);
    t.set_str("stdin", Value::UserData(stdin));
    t.set_str("stdout", Value::UserData(stdout));
    t.set_str("stderr", Value::UserData(stderr));
    t.set_str("__filemeta", Value::Table(methods));
    t.set_str("__default_input", Value::UserData(stdin));
    t.set_str("__default_output", Value::UserData(stdout));
}

fn make_file(interp: &mut Interp, f: LuaFile, methods: GcRef<Table>) -> GcRef<UserData> {
    let mut ud = UserData::new("file", f);
    ud.metatable = Some(methods);
    interp.heap.alloc_userdata(ud)
}

fn build_file_methods(interp: &mut Interp) -> GcRef<Table> {
    let mut methods = Table::new();
    let close = Closure::native("file:close", Rc::new(file_close));
    let flush = Closure::native("file:flush", Rc::new(file_flush));
    let read = Closure::native("file:read", Rc::new(file_read));
    let write = Closure::native("file:write", Rc::new(file_write));
    let seek = Closure::native("file:seek", Rc::new(file_seek));
    let lines = Closure::native("file:lines", Rc::new(file_lines));
    methods.set_str("close", Value::Function(interp.heap.alloc_closure(close)));
    methods.set_str("flush", Value::Function(interp.heap.alloc_closure(flush)));
    methods.set_str("read", Value::Function(interp.heap.alloc_closure(read)));
    methods.set_str("write", Value::Function(interp.heap.alloc_closure(write)));
    methods.set_str("seek", Value::Function(interp.heap.alloc_closure(seek)));
    methods.set_str("lines", Value::Function(interp.heap.alloc_closure(lines)));
    let methods_ref = interp.heap.alloc_table(methods);
    interp.heap.table_mut(methods_ref).set_str("__index", Value::Table(methods_ref));
    interp.heap.table_mut(methods_ref).set_str("__gc", {
        let gc = Closure::native("file:__gc", Rc::new(file_close));
        Value::Function(interp.heap.alloc_closure(gc))
    });
    interp.heap.table_mut(methods_ref).set_str("__close", {
        let c = Closure::native("file:__close", Rc::new(file_close));
        Value::Function(interp.heap.alloc_closure(c))
    });
    interp.heap.table_mut(methods_ref).has_gc_metamethod = true;
    methods_ref
}

fn check_file(args: &[Value], n: usize, fname: &str) -> Result<GcRef<UserData>, Control> {
    match args.get(n - 1) {
        Some(Value::UserData(u)) => Ok(*u),
        Some(other) => Err(bad_argument(n, fname, "file", other)),
        None => Err(bad_argument(n, fname, "file", &Value::Nil)),
    }
}

fn io_table(interp: &Interp) -> Option<GcRef<Table>> {
    match interp.heap.table(interp.globals).get_str("io") {
        Value::Table(t) => Some(t),
        _ => None,
    }
}

fn default_input(interp: &Interp) -> Value {
    io_table(interp).map(|t| interp.heap.table(t).get_str("__default_input")).unwrap_or(Value::Nil)
}

fn default_output(interp: &Interp) -> Value {
    io_table(interp).map(|t| interp.heap.table(t).get_str("__default_output")).unwrap_or(Value::Nil)
}

fn parse_mode(mode: &str) -> (bool, bool, bool, bool) {
    // (read, write, append, truncate)
    let base = mode.trim_end_matches('b');
    match base {
        "r" => (true, false, false, false),
        "w" => (false, true, false, true),
        "a" => (false, true, true, false),
        "r+" => (true, true, false, false),
        "w+" => (true, true, false, true),
        "a+" => (true, true, true, false),
        _ => (true, false, false, false),
    }
}

fn io_open(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let name = check_str(args, 1, "open")?;
    let name = String::from_utf8_lossy(&name).into_owned();
    let mode = match args.get(1) {
        Some(Value::Str(s)) => String::from_utf8_lossy(s).into_owned(),
        _ => "r".to_string(),
    };
    let (read, write, append, truncate) = parse_mode(&mode);
    let mut opts = std::fs::OpenOptions::new();
    opts.read(read).write(write).append(append).truncate(truncate).create(write);
    match opts.open(&name) {
        Ok(f) => {
            let methods = io_table(interp).map(|t| interp.heap.table(t).get_str("__filemeta"));
            let mt = match methods {
                Some(Value::Table(t)) => t,
                _ => return Err(runtime_error("io library not installed")),
            };
            let handle = make_file(interp, LuaFile::File(f), mt);
            Ok(vec![Value::UserData(handle)])
        }
        Err(e) => Ok(vec![Value::Nil, Value::str(format!("{name}: {e}").into_bytes()), Value::Int(e.raw_os_error().unwrap_or(-1) as i64)]),
    }
}

fn io_close(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let target = match args.first() {
        Some(v) if !v.is_nil() => v.clone(),
        _ => default_output(interp),
    };
    file_close(interp, &[target])
}

fn io_flush(interp: &mut Interp, _args: &[Value]) -> EvalResult<Vec<Value>> {
    let out = default_output(interp);
    file_flush(interp, &[out])
}

fn io_read(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let input = default_input(interp);
    let mut full_args = vec![input];
    full_args.extend_from_slice(args);
    file_read(interp, &full_args)
}

fn io_write(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let output = default_output(interp);
    let mut full_args = vec![output];
    full_args.extend_from_slice(args);
    file_write(interp, &full_args)
}

fn io_input(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    io_redirect(interp, args, "__default_input", "r")
}

fn io_output(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    io_redirect(interp, args, "__default_output", "w")
}

fn io_redirect(interp: &mut Interp, args: &[Value], field: &str, mode: &str) -> EvalResult<Vec<Value>> {
    let t = match io_table(interp) {
        Some(t) => t,
        None => return Err(runtime_error("io library not installed")),
    };
    match args.first() {
        None | Some(Value::Nil) => Ok(vec![interp.heap.table(t).get_str(field)]),
        Some(Value::UserData(_)) => {
            interp.heap.table_mut(t).set_str(field, args[0].clone());
            Ok(vec![args[0].clone()])
        }
        Some(Value::Str(_)) => {
            let opened = io_open(interp, &[args[0].clone(), Value::str(mode.as_bytes())])?;
            if let Some(handle @ Value::UserData(_)) = opened.into_iter().next() {
                interp.heap.table_mut(t).set_str(field, handle.clone());
                Ok(vec![handle])
            } else {
                Err(runtime_error(format!("cannot open file for {field}")))
            }
        }
        Some(other) => Err(bad_argument(1, "input/output", "string or file", other)),
    }
}

fn io_type(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    match args.first() {
        Some(Value::UserData(u)) if interp.heap.userdata(*u).type_name == "file" => {
            let closed = interp.heap.userdata(*u).data.borrow().downcast_ref::<LuaFile>().map(LuaFile::is_closed).unwrap_or(true);
            Ok(vec![Value::str(if closed { b"closed file".as_slice() } else { b"file".as_slice() })])
        }
        _ => Ok(vec![Value::Nil]),
    }
}

fn io_lines(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let file = match args.first() {
        Some(Value::Str(_)) => {
            let opened = io_open(interp, &[args[0].clone()])?;
            match opened.into_iter().next() {
                Some(v @ Value::UserData(_)) => v,
                _ => return Err(runtime_error("cannot open file for lines")),
            }
        }
        None | Some(Value::Nil) => default_input(interp),
        Some(other) => return Err(bad_argument(1, "lines", "string", other)),
    };
    let iter = Closure::native("lines iterator", Rc::new(move |interp: &mut Interp, _args: &[Value]| {
        let result = file_read(interp, &[file.clone(), Value::str(b"l".as_slice())])?;
        Ok(result)
    }));
    let iref = interp.heap.alloc_closure(iter);
    Ok(vec![Value::Function(iref)])
}

fn file_close(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let u = check_file(args, 1, "close")?;
    let mut ud = interp.heap.userdata_mut(u);
    let mut data = ud.data.borrow_mut();
    let f = data.downcast_mut::<LuaFile>().ok_or_else(|| runtime_error("not a file"))?;
    let _ = f.close();
    drop(data);
    drop(ud);
    Ok(vec![Value::Bool(true)])
}

fn file_flush(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let u = check_file(args, 1, "flush")?;
    let ud = interp.heap.userdata(u);
    let mut data = ud.data.borrow_mut();
    let f = data.downcast_mut::<LuaFile>().ok_or_else(|| runtime_error("not a file"))?;
    f.flush().map_err(|e| runtime_error(e.to_string()))?;
    Ok(vec![args[0].clone()])
}

fn file_write(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let u = check_file(args, 1, "write")?;
    for (i, v) in args.iter().enumerate().skip(1) {
        let bytes = match v {
            Value::Str(s) => s.to_vec(),
            Value::Int(_) | Value::Float(_) => crate::eval::number_to_string(v).into_bytes(),
            other => return Err(bad_argument(i + 1, "write", "string", other)),
        };
        let ud = interp.heap.userdata(u);
        let mut data = ud.data.borrow_mut();
        let f = data.downcast_mut::<LuaFile>().ok_or_else(|| runtime_error("not a file"))?;
        f.write_bytes(&bytes).map_err(|e| runtime_error(e.to_string()))?;
    }
    Ok(vec![args[0].clone()])
}

fn file_read(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let u = check_file(args, 1, "read")?;
    let formats: Vec<Value> = if args.len() > 1 { args[1..].to_vec() } else { vec![Value::str(b"l".as_slice())] };
    let mut out = Vec::new();
    for fmt in formats {
        let mut is_number = false;
        let spec = match &fmt {
            Value::Str(s) => match s.as_ref() {
                b"l" | b"*l" => ReadSpec::Line { keep_newline: false },
                b"L" | b"*L" => ReadSpec::Line { keep_newline: true },
                b"a" | b"*a" => ReadSpec::All,
                b"n" | b"*n" => {
                    is_number = true;
                    ReadSpec::Number
                }
                other => return Err(runtime_error(format!("invalid format '{}'", String::from_utf8_lossy(other)))),
            },
            v @ (Value::Int(_) | Value::Float(_)) => ReadSpec::Bytes(v.as_int().unwrap_or(0).max(0) as usize),
            other => return Err(bad_argument(2, "read", "string or number", other)),
        };
        let ud = interp.heap.userdata(u);
        let mut data = ud.data.borrow_mut();
        let f = data.downcast_mut::<LuaFile>().ok_or_else(|| runtime_error("not a file"))?;
        let result = f.read(spec).map_err(|e| runtime_error(e.to_string()))?;
        drop(data);
        drop(ud);
        match result {
            None => out.push(Value::Nil),
            Some(bytes) => {
                if is_number {
                    match crate::eval::str_to_number(&bytes) {
                        Some(v) => out.push(v),
                        None => out.push(Value::Nil),
                    }
                } else {
                    out.push(Value::str(bytes));
                }
            },
        }
    }
    Ok(out)
}

fn file_seek(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let u = check_file(args, 1, "seek")?;
    let whence = match args.get(1) {
        Some(Value::Str(s)) => String::from_utf8_lossy(s).into_owned(),
        _ => "cur".to_string(),
    };
    let offset = args.get(2).and_then(Value::as_int).unwrap_or(0);
    let ud = interp.heap.userdata(u);
    let mut data = ud.data.borrow_mut();
    let f = data.downcast_mut::<LuaFile>().ok_or_else(|| runtime_error("not a file"))?;
    match f.seek(&whence, offset) {
        Ok(pos) => Ok(vec![Value::Int(pos as i64)]),
        Err(e) => Ok(vec![Value::Nil, Value::str(e.to_string().into_bytes())]),
    }
}

fn file_lines(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let file = args.first().cloned().unwrap_or(Value::Nil);
    let iter = Closure::native("file:lines iterator", Rc::new(move |interp: &mut Interp, _args: &[Value]| {
        file_read(interp, &[file.clone(), Value::str(b"l".as_slice())])
    }));
    let iref = interp.heap.alloc_closure(iter);
    Ok(vec![Value::Function(iref)])
}
