//! `package` library and `require` (spec.md §4.7), grounded on the
//! teacher's `stdlib/package.rs` `search_path`/two-searcher design
//! (preload table, then `package.path` on disk), adapted to this crate's
//! `parser::parse` + `Closure::lua` chunk-loading path instead of the
//! teacher's bytecode compiler.

use crate::error::EvalResult;
use crate::eval::{Interp, Scope};
use crate::lib_module;
use crate::stdlib::registry::{check_str, install, runtime_error, LibraryModule};
use crate::value::{Closure, Proto, Table, Value};
use std::rc::Rc;

pub fn create() -> LibraryModule {
    lib_module!("package", {
        "loadlib" => package_loadlib,
        "searchpath" => package_searchpath,
    })
}

pub fn install_package(interp: &mut Interp) {
    install(interp, create());
    let package = interp.heap.table(interp.globals).get_str("package");
    let pt = match package {
        Value::Table(t) => t,
        _ => return,
    };
    let loaded = interp.heap.alloc_table(Table::new());
    let preload = interp.heap.alloc_table(Table::new());
    let mut t = interp.heap.table_mut(pt);
    t.set_str("loaded", Value::Table(loaded));
    t.set_str("preload", Value::Table(preload));
    t.set_str("path", Value::str(b"./?.lua;./?/init.lua".as_slice()));
    t.set_str("cpath", Value::str(b"./?.so;./?.dylib".as_slice()));
    #[cfg(windows)]
    t.set_str("config", Value::str(b"\\\n;\n?\n!\n-".as_slice()));
    #[cfg(not(windows))]
    t.set_str("config", Value::str(b"/\n;\n?\n!\n-".as_slice()));

    let require = Closure::native("require", Rc::new(require_fn));
    drop(t);
    let rref = interp.heap.alloc_closure(require);
    interp.heap.table_mut(interp.globals).set_str("require", Value::Function(rref));
}

fn search_path(name: &str, path: &str, sep: &str, rep: &str) -> Option<String> {
    let searchname = name.replace(sep, rep);
    path.split(';').map(|tmpl| tmpl.replace('?', &searchname)).find(|p| std::path::Path::new(p).exists())
}

/// `require(modname)`: checks `package.loaded` first, then
/// `package.preload`, then searches `package.path` on disk and runs the
/// chunk once, caching the result in `package.loaded`.
fn require_fn(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let name = check_str(args, 1, "require")?;
    let name = String::from_utf8_lossy(&name).into_owned();

    let package = interp.heap.table(interp.globals).get_str("package");
    let pt = match package {
        Value::Table(t) => t,
        _ => return Err(runtime_error("package table not found")),
    };
    let loaded = match interp.heap.table(pt).get_str("loaded") {
        Value::Table(t) => t,
        _ => return Err(runtime_error("package.loaded is not a table")),
    };
    let existing = interp.heap.table(loaded).get_str(&name);
    if !existing.is_nil() {
        return Ok(vec![existing]);
    }

    if let Value::Table(preload) = interp.heap.table(pt).get_str("preload") {
        let loader = interp.heap.table(preload).get_str(&name);
        if !loader.is_nil() {
            let result = interp.call_value(loader, vec![Value::str(name.clone().into_bytes())], 0)?;
            let value = result.into_iter().next().unwrap_or(Value::Bool(true));
            interp.heap.table_mut(loaded).set_str(&name, value.clone());
            return Ok(vec![value]);
        }
    }

    let path_str = match interp.heap.table(pt).get_str("path") {
        Value::Str(s) => String::from_utf8_lossy(&s).into_owned(),
        _ => "./?.lua".to_string(),
    };
    let filepath = search_path(&name, &path_str, ".", "/").ok_or_else(|| {
        runtime_error(format!(
            "module '{name}' not found:{}",
            path_str.split(';').map(|t| t.replace('?', &name.replace('.', "/"))).map(|p| format!("\n\tno file '{p}'")).collect::<String>()
        ))
    })?;

    let source = std::fs::read(&filepath).map_err(|e| runtime_error(format!("cannot open '{filepath}': {e}")))?;
    let chunk_name = format!("@{filepath}");
    let block = crate::parser::parse(&source, &chunk_name).map_err(|e| runtime_error(format!("{e}")))?;
    let proto = Proto {
        params: Vec::new(),
        is_vararg: true,
        body: Rc::new(crate::parser::ast::FunctionBody {
            params: Vec::new(),
            is_vararg: true,
            body: block,
            line: 0,
            name: name.clone(),
        }),
        name: name.clone(),
        source: chunk_name,
        line: 0,
        source_text: Some(Rc::from(source.into_boxed_slice())),
    };
    let closure = Closure::lua(Rc::new(proto), Scope::root());
    let func = Value::Function(interp.heap.alloc_closure(closure));
    let result = interp.call_value(func, vec![Value::str(name.clone().into_bytes())], 0)?;
    let value = result.into_iter().next().unwrap_or(Value::Bool(true));
    interp.heap.table_mut(loaded).set_str(&name, value.clone());
    Ok(vec![value])
}

fn package_loadlib(_interp: &mut Interp, _args: &[Value]) -> EvalResult<Vec<Value>> {
    Ok(vec![Value::Nil, Value::str(b"loadlib not supported".as_slice())])
}

fn package_searchpath(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let name = check_str(args, 1, "searchpath")?;
    let name = String::from_utf8_lossy(&name).into_owned();
    let path = check_str(args, 2, "searchpath")?;
    let path = String::from_utf8_lossy(&path).into_owned();
    let sep = match args.get(2) {
        Some(Value::Str(s)) => String::from_utf8_lossy(s).into_owned(),
        _ => ".".to_string(),
    };
    let rep = match args.get(3) {
        Some(Value::Str(s)) => String::from_utf8_lossy(s).into_owned(),
        _ => "/".to_string(),
    };
    match search_path(&name, &path, &sep, &rep) {
        Some(p) => Ok(vec![Value::str(p.into_bytes())]),
        None => {
            let searchname = name.replace(&sep, &rep);
            let err = path.split(';').map(|t| t.replace('?', &searchname)).map(|p| format!("\n\tno file '{p}'")).collect::<String>();
            Ok(vec![Value::Nil, Value::str(err.into_bytes())])
        }
    }
}
