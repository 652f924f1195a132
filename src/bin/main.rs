//! `luna` command-line driver (spec.md §6), grounded on the teacher's
//! `crates/luars_interpreter/src/bin/main.rs`: same option set
//! (`-e`/`-i`/`-l`/`-v`/`-E`/`-W`/`--`/`-`), the same `arg` table layout,
//! and the same `LUA_INIT`/`LUA_PATH`/`LUA_CPATH` env handling, adapted
//! from the teacher's `LuaVM::compile`/`execute_chunk` calling convention
//! to this crate's `luna_core::load_chunk`/`Interp::call_value`.

use luna_core::error::LuaFullError;
use luna_core::eval::Interp;
use luna_core::value::{Table, Value};
use luna_core::{load_chunk, stdlib};
use std::env;
use std::fs;
use std::io::{self, BufRead, Read, Write};

const VERSION: &str = "Luna 5.4 (compatible)";

fn print_usage() {
    eprintln!("usage: luna [options] [script [args]]");
    eprintln!("Available options are:");
    eprintln!("  -e stat   execute string 'stat'");
    eprintln!("  -i        enter interactive mode after executing 'script'");
    eprintln!("  -l mod    require library 'mod' into global 'mod'");
    eprintln!("  -v        show version information");
    eprintln!("  -E        ignore environment variables");
    eprintln!("  -W        turn warnings on");
    eprintln!("  --        stop handling options");
    eprintln!("  -         stop handling options and execute stdin");
}

fn print_version() {
    println!("{VERSION}");
}

#[derive(Default)]
struct Options {
    execute_strings: Vec<String>,
    interactive: bool,
    script_file: Option<String>,
    script_args: Vec<String>,
    require_modules: Vec<String>,
    show_version: bool,
    read_stdin: bool,
    ignore_env: bool,
    warnings_on: bool,
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();
    let mut opts = Options::default();
    let mut i = 1;
    let mut stop_options = false;

    while i < args.len() {
        let arg = &args[i];

        if !stop_options && arg.starts_with('-') {
            match arg.as_str() {
                "-e" => {
                    i += 1;
                    if i >= args.len() {
                        return Err("'-e' needs argument".to_string());
                    }
                    opts.execute_strings.push(args[i].clone());
                }
                "-i" => opts.interactive = true,
                "-l" => {
                    i += 1;
                    if i >= args.len() {
                        return Err("'-l' needs argument".to_string());
                    }
                    opts.require_modules.push(args[i].clone());
                }
                "-v" => opts.show_version = true,
                "-E" => opts.ignore_env = true,
                "-W" => opts.warnings_on = true,
                "--" => stop_options = true,
                "-" => {
                    opts.read_stdin = true;
                    stop_options = true;
                }
                _ => return Err(format!("unrecognized option '{arg}'")),
            }
        } else {
            opts.script_file = Some(arg.clone());
            i += 1;
            while i < args.len() {
                opts.script_args.push(args[i].clone());
                i += 1;
            }
            break;
        }
        i += 1;
    }

    Ok(opts)
}

fn setup_arg_table(interp: &mut Interp, exe_path: &str, script_name: Option<&str>, args: &[String]) {
    let mut t = Table::new();
    if let Some(name) = script_name {
        let _ = t.set(Value::Int(0), Value::str(name.as_bytes().to_vec()));
    }
    let _ = t.set(Value::Int(-1), Value::str(exe_path.as_bytes().to_vec()));
    for (i, a) in args.iter().enumerate() {
        let _ = t.set(Value::Int((i + 1) as i64), Value::str(a.as_bytes().to_vec()));
    }
    let tref = interp.heap.alloc_table(t);
    interp.heap.table_mut(interp.globals).set_str("arg", Value::Table(tref));
}

fn report_error(context: &str, err: &LuaFullError) {
    eprintln!("luna: {context}{}", err.message);
    for frame in &err.traceback {
        eprintln!("\t{frame}");
    }
}

fn require_module(interp: &mut Interp, module: &str) -> Result<(), String> {
    let code = format!("{module} = require('{module}')");
    match load_chunk(interp, code.as_bytes(), "=(require)") {
        Ok(closure) => {
            let func = Value::Function(interp.heap.alloc_closure(closure));
            interp.call_value(func, Vec::new(), 0).map(|_| ()).map_err(|c| format!("{c:?}"))
        }
        Err(e) => Err(format!("failed to load module '{module}': {e}")),
    }
}

fn execute_source(interp: &mut Interp, source: &[u8], chunk_name: &str) -> Result<(), LuaFullError> {
    let closure = load_chunk(interp, source, chunk_name).map_err(|e| LuaFullError::new(luna_core::error::LuaError::Syntax, e.to_string(), Value::str(e.to_string().into_bytes())))?;
    let func = Value::Function(interp.heap.alloc_closure(closure));
    interp
        .call_value(func, Vec::new(), 0)
        .map(|_| ())
        .map_err(|c| match c {
            luna_core::error::Control::Error(e) => e,
            _ => LuaFullError::new(luna_core::error::LuaError::Runtime, "unexpected control flow escaped chunk", Value::Nil),
        })
}

fn execute_file(interp: &mut Interp, filename: &str) -> Result<(), String> {
    let source = fs::read(filename).map_err(|e| format!("cannot open {filename}: {e}"))?;
    let chunk_name = format!("@{filename}");
    execute_source(interp, &source, &chunk_name).map_err(|e| {
        let mut msg = e.message.clone();
        for frame in &e.traceback {
            msg.push_str("\n\t");
            msg.push_str(frame);
        }
        msg
    })
}

fn execute_stdin(interp: &mut Interp) -> Result<(), String> {
    let mut source = Vec::new();
    io::stdin().read_to_end(&mut source).map_err(|e| format!("error reading stdin: {e}"))?;
    execute_source(interp, &source, "=stdin").map_err(|e| e.message)
}

fn run_repl(interp: &mut Interp) {
    println!("{VERSION}");
    println!("Type Ctrl+C or Ctrl+D to exit\n");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut incomplete = String::new();

    loop {
        print!("{}", if incomplete.is_empty() { "> " } else { ">> " });
        io::stdout().flush().unwrap();

        let line = match lines.next() {
            Some(Ok(line)) => line,
            _ => break,
        };

        let trimmed = line.trim();
        if incomplete.is_empty() && (trimmed == "exit" || trimmed == "quit") {
            break;
        }

        if !incomplete.is_empty() {
            incomplete.push('\n');
        }
        incomplete.push_str(&line);

        let expr_code = format!("return {incomplete}");
        let (code_to_run, chunk_name) = match load_chunk(interp, expr_code.as_bytes(), "=stdin") {
            Ok(_) => (expr_code, "=stdin"),
            Err(_) => (incomplete.clone(), "=stdin"),
        };

        match load_chunk(interp, code_to_run.as_bytes(), chunk_name) {
            Ok(closure) => {
                let func = Value::Function(interp.heap.alloc_closure(closure));
                match interp.call_value(func, Vec::new(), 0) {
                    Ok(results) => {
                        if let Some(first) = results.into_iter().next() {
                            if !first.is_nil() {
                                match interp.tostring(&first, 0) {
                                    Ok(bytes) => println!("{}", String::from_utf8_lossy(&bytes)),
                                    Err(_) => println!("<error converting result>"),
                                }
                            }
                        }
                        incomplete.clear();
                    }
                    Err(luna_core::error::Control::Error(e)) => {
                        eprintln!("{}", e.message);
                        incomplete.clear();
                    }
                    Err(_) => incomplete.clear(),
                }
            }
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("<eof>") || msg.contains("expected") {
                    continue;
                }
                eprintln!("{msg}");
                incomplete.clear();
            }
        }
    }
}

fn resolve_env_path(env_value: &str, default: &str) -> String {
    if let Some(pos) = env_value.find(";;") {
        let prefix = &env_value[..pos];
        let suffix = &env_value[pos + 2..];
        let mut result = String::new();
        if !prefix.is_empty() {
            result.push_str(prefix);
            result.push(';');
        }
        result.push_str(default);
        if !suffix.is_empty() {
            result.push(';');
            result.push_str(suffix);
        }
        result
    } else {
        env_value.to_string()
    }
}

fn main() {
    let opts = match parse_args() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("luna: {e}");
            print_usage();
            std::process::exit(1);
        }
    };

    if opts.show_version {
        print_version();
        if opts.execute_strings.is_empty() && opts.script_file.is_none() && !opts.read_stdin {
            std::process::exit(0);
        }
    }

    let chunk_name = opts.script_file.clone().unwrap_or_else(|| "luna".to_string());
    let mut interp = Interp::new(chunk_name);
    stdlib::install_all(&mut interp);

    if !opts.ignore_env {
        if let Some(env_path) = env::var("LUA_PATH_5_4").ok().or_else(|| env::var("LUA_PATH").ok()) {
            let resolved = resolve_env_path(&env_path, "./?.lua;./?/init.lua");
            if let Value::Table(pt) = interp.heap.table(interp.globals).get_str("package") {
                interp.heap.table_mut(pt).set_str("path", Value::str(resolved.into_bytes()));
            }
        }
        if let Some(env_cpath) = env::var("LUA_CPATH_5_4").ok().or_else(|| env::var("LUA_CPATH").ok()) {
            let resolved = resolve_env_path(&env_cpath, "./?.so;./?.dylib");
            if let Value::Table(pt) = interp.heap.table(interp.globals).get_str("package") {
                interp.heap.table_mut(pt).set_str("cpath", Value::str(resolved.into_bytes()));
            }
        }
    }

    if !opts.ignore_env {
        if let Some(init) = env::var("LUA_INIT_5_4").ok().or_else(|| env::var("LUA_INIT").ok()) {
            let result = if let Some(filename) = init.strip_prefix('@') {
                execute_file(&mut interp, filename)
            } else {
                execute_source(&mut interp, init.as_bytes(), "=LUA_INIT").map_err(|e| e.message)
            };
            if let Err(e) = result {
                eprintln!("luna: {e}");
                std::process::exit(1);
            }
        }
    }

    if opts.warnings_on {
        let _ = execute_source(&mut interp, b"warn('@on')", "=(-W)");
    }

    let exe_path = env::args().next().unwrap_or_else(|| "luna".to_string());
    setup_arg_table(&mut interp, &exe_path, opts.script_file.as_deref(), &opts.script_args);

    for module in &opts.require_modules {
        if let Err(e) = require_module(&mut interp, module) {
            eprintln!("luna: {e}");
            std::process::exit(1);
        }
    }

    for code in &opts.execute_strings {
        if let Err(e) = execute_source(&mut interp, code.as_bytes(), "=(command line)") {
            report_error("", &e);
            std::process::exit(1);
        }
    }

    if let Some(filename) = &opts.script_file {
        if let Err(e) = execute_file(&mut interp, filename) {
            eprintln!("luna: {e}");
            std::process::exit(1);
        }
    } else if opts.read_stdin {
        if let Err(e) = execute_stdin(&mut interp) {
            eprintln!("luna: {e}");
            std::process::exit(1);
        }
    }

    if opts.interactive || (opts.execute_strings.is_empty() && opts.script_file.is_none() && !opts.read_stdin) {
        run_repl(&mut interp);
    }
}
