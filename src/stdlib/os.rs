//! `os` library (spec.md §4.7), grounded on the teacher's `stdlib/os.rs`
//! function list (`clock`/`time`/`date`/`difftime`/`execute`/`exit`/
//! `getenv`/`remove`/`rename`/`setlocale`/`tmpname`), but implemented for
//! real instead of the teacher's stub bodies — `os.date`'s strftime-style
//! formatting and `os.time`'s table form use `chrono`, the teacher's own
//! pinned dependency that its stub never actually reached for.

use crate::error::EvalResult;
use crate::eval::Interp;
use crate::lib_module;
use crate::stdlib::registry::{bad_argument, check_str, install, runtime_error, LibraryModule};
use crate::value::Value;
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use std::time::Instant;

pub fn create() -> LibraryModule {
    lib_module!("os", {
        "clock" => os_clock,
        "time" => os_time,
        "date" => os_date,
        "difftime" => os_difftime,
        "execute" => os_execute,
        "exit" => os_exit,
        "getenv" => os_getenv,
        "remove" => os_remove,
        "rename" => os_rename,
        "setlocale" => os_setlocale,
        "tmpname" => os_tmpname,
    })
}

pub fn install_os(interp: &mut Interp) {
    install(interp, create());
}

thread_local! {
    static START: Instant = Instant::now();
}

fn os_clock(_interp: &mut Interp, _args: &[Value]) -> EvalResult<Vec<Value>> {
    let elapsed = START.with(|s| s.elapsed().as_secs_f64());
    Ok(vec![Value::Float(elapsed)])
}

fn os_time(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let t = match args.first() {
        Some(Value::Table(t)) => *t,
        _ => return Ok(vec![Value::Int(Utc::now().timestamp())]),
    };
    let get = |field: &str, default: Option<i64>| -> EvalResult<i64> {
        match interp.heap.table(t).get_str(field).as_int() {
            Some(i) => Ok(i),
            None => default.ok_or_else(|| runtime_error(format!("field '{field}' missing in date table"))),
        }
    };
    let year = get("year", None)?;
    let month = get("month", None)?;
    let day = get("day", None)?;
    let hour = get("hour", Some(12))?;
    let min = get("min", Some(0))?;
    let sec = get("sec", Some(0))?;
    let date = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .ok_or_else(|| runtime_error("field 'day' is out of range"))?;
    let time = chrono::NaiveTime::from_hms_opt(hour.rem_euclid(24) as u32, min.rem_euclid(60) as u32, sec.rem_euclid(60) as u32)
        .ok_or_else(|| runtime_error("invalid time fields"))?;
    let naive = NaiveDateTime::new(date, time);
    match Local.from_local_datetime(&naive).earliest() {
        Some(local) => Ok(vec![Value::Int(local.timestamp())]),
        None => Ok(vec![Value::Nil]),
    }
}

fn os_difftime(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let t2 = args.first().and_then(Value::as_float).ok_or_else(|| bad_argument(1, "difftime", "number", args.first().unwrap_or(&Value::Nil)))?;
    let t1 = args.get(1).and_then(Value::as_float).ok_or_else(|| bad_argument(2, "difftime", "number", args.get(1).unwrap_or(&Value::Nil)))?;
    Ok(vec![Value::Float(t2 - t1)])
}

/// `os.date([format [, time]])`. A leading `!` selects UTC instead of
/// local time; `"*t"`/`"!*t"` return a table of broken-down fields
/// instead of formatting a string.
fn os_date(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let fmt = match args.first() {
        Some(Value::Str(_)) | None | Some(Value::Nil) => {
            if args.first().map(|v| !v.is_nil()).unwrap_or(false) {
                check_str(args, 1, "date")?
            } else {
                b"%c".to_vec()
            }
        }
        Some(other) => return Err(bad_argument(1, "date", "string", other)),
    };
    let time = match args.get(1) {
        Some(v) if !v.is_nil() => v.as_int().ok_or_else(|| bad_argument(2, "date", "number", v))?,
        _ => Utc::now().timestamp(),
    };
    let utc = fmt.first() == Some(&b'!');
    let body = if utc { &fmt[1..] } else { &fmt[..] };
    let naive = chrono::DateTime::from_timestamp(time, 0)
        .ok_or_else(|| runtime_error("time result cannot be represented in this installation"))?
        .naive_utc();
    let local;
    let dt: &NaiveDateTime = if utc {
        &naive
    } else {
        local = Local.from_utc_datetime(&naive).naive_local();
        &local
    };

    if body == b"*t" {
        let mut t = crate::value::Table::new();
        t.set_str("year", Value::Int(dt.year() as i64));
        t.set_str("month", Value::Int(dt.month() as i64));
        t.set_str("day", Value::Int(dt.day() as i64));
        t.set_str("hour", Value::Int(dt.hour() as i64));
        t.set_str("min", Value::Int(dt.minute() as i64));
        t.set_str("sec", Value::Int(dt.second() as i64));
        t.set_str("wday", Value::Int(dt.weekday().num_days_from_sunday() as i64 + 1));
        t.set_str("yday", Value::Int(dt.ordinal() as i64));
        t.set_str("isdst", Value::Bool(false));
        let tref = interp.heap.alloc_table(t);
        return Ok(vec![Value::Table(tref)]);
    }

    Ok(vec![Value::str(strftime(dt, body).into_bytes())])
}

/// Translates the subset of C `strftime` directives reference Lua exposes
/// through `os.date` into `chrono`'s own (mostly compatible) directive
/// set, falling back to passing an unrecognized `%x` through unchanged.
fn strftime(dt: &NaiveDateTime, fmt: &[u8]) -> String {
    let fmt_str = String::from_utf8_lossy(fmt);
    let mut out = String::new();
    let mut chars = fmt_str.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('c') => out.push_str(&dt.format("%a %b %e %T %Y").to_string()),
            Some('x') => out.push_str(&dt.format("%m/%d/%y").to_string()),
            Some('X') => out.push_str(&dt.format("%T").to_string()),
            Some(spec) => out.push_str(&dt.format(&format!("%{spec}")).to_string()),
            None => out.push('%'),
        }
    }
    out
}

fn os_execute(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    match args.first() {
        None | Some(Value::Nil) => Ok(vec![Value::Bool(true)]),
        Some(_) => {
            let cmd = check_str(args, 1, "execute")?;
            let cmd = String::from_utf8_lossy(&cmd).into_owned();
            match std::process::Command::new("sh").arg("-c").arg(&cmd).status() {
                Ok(status) => Ok(vec![
                    Value::Bool(status.success()),
                    Value::str(b"exit".as_slice()),
                    Value::Int(status.code().unwrap_or(-1) as i64),
                ]),
                Err(_) => Ok(vec![Value::Nil]),
            }
        }
    }
}

fn os_exit(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let code = match args.first() {
        None | Some(Value::Nil) | Some(Value::Bool(true)) => 0,
        Some(Value::Bool(false)) => 1,
        Some(v) => v.as_int().unwrap_or(0) as i32,
    };
    std::process::exit(code);
}

fn os_getenv(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let name = check_str(args, 1, "getenv")?;
    let name = String::from_utf8_lossy(&name).into_owned();
    match std::env::var(&name) {
        Ok(v) => Ok(vec![Value::str(v.into_bytes())]),
        Err(_) => Ok(vec![Value::Nil]),
    }
}

fn os_remove(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let name = check_str(args, 1, "remove")?;
    let name = String::from_utf8_lossy(&name).into_owned();
    match std::fs::remove_file(&name) {
        Ok(()) => Ok(vec![Value::Bool(true)]),
        Err(e) => Ok(vec![Value::Nil, Value::str(e.to_string().into_bytes())]),
    }
}

fn os_rename(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let from = check_str(args, 1, "rename")?;
    let to = check_str(args, 2, "rename")?;
    let from = String::from_utf8_lossy(&from).into_owned();
    let to = String::from_utf8_lossy(&to).into_owned();
    match std::fs::rename(&from, &to) {
        Ok(()) => Ok(vec![Value::Bool(true)]),
        Err(e) => Ok(vec![Value::Nil, Value::str(e.to_string().into_bytes())]),
    }
}

fn os_setlocale(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    // Only the "C"/"POSIX" locale is meaningfully supported; anything
    // else is rejected the way reference Lua does when a locale change
    // fails on the host platform.
    match args.first() {
        None | Some(Value::Nil) => return Ok(vec![Value::str(b"C".as_slice())]),
        _ => {}
    }
    match check_str(args, 1, "setlocale")?.as_slice() {
        b"C" | b"POSIX" | b"" => Ok(vec![Value::str(b"C".as_slice())]),
        _ => Ok(vec![Value::Nil]),
    }
}

fn os_tmpname(_interp: &mut Interp, _args: &[Value]) -> EvalResult<Vec<Value>> {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    Ok(vec![Value::str(format!("/tmp/lua_{nanos}").into_bytes())])
}
