//! `math` library (spec.md §4.7).
//!
//! Grounded on the teacher's `crates/luars/src/stdlib/math.rs`
//! `checknumber`-style per-argument validation; `random`'s seeded-stream
//! semantics reuse this crate's `Interp.rng` (`rand::StdRng`) instead of
//! the teacher's hand-rolled `LuaRng`.

use crate::error::EvalResult;
use crate::eval::Interp;
use crate::lib_module;
use crate::stdlib::registry::{bad_argument, check_number, install, runtime_error, LibraryModule};
use crate::value::Value;
use rand::Rng;

pub fn create() -> LibraryModule {
    lib_module!("math", {
        "abs" => math_abs,
        "acos" => math_acos,
        "asin" => math_asin,
        "atan" => math_atan,
        "ceil" => math_ceil,
        "cos" => math_cos,
        "deg" => math_deg,
        "exp" => math_exp,
        "floor" => math_floor,
        "fmod" => math_fmod,
        "log" => math_log,
        "max" => math_max,
        "min" => math_min,
        "modf" => math_modf,
        "rad" => math_rad,
        "random" => math_random,
        "randomseed" => math_randomseed,
        "sin" => math_sin,
        "sqrt" => math_sqrt,
        "tan" => math_tan,
        "tointeger" => math_tointeger,
        "type" => math_type,
        "ult" => math_ult,
    })
}

pub fn install_math(interp: &mut Interp) {
    install(interp, create());
    let math = interp.heap.table(interp.globals).get_str("math");
    if let Value::Table(mt) = math {
        let mut t = interp.heap.table_mut(mt);
        t.set_str("pi", Value::Float(std::f64::consts::PI));
        t.set_str("huge", Value::Float(f64::INFINITY));
        t.set_str("maxinteger", Value::Int(i64::MAX));
        t.set_str("mininteger", Value::Int(i64::MIN));
    }
}

fn float_to_integer(f: f64) -> Value {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < 9223372036854775808.0 {
        Value::Int(f as i64)
    } else {
        Value::Nil
    }
}

fn math_abs(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    match args.first() {
        Some(Value::Int(i)) => Ok(vec![Value::Int(i.wrapping_abs())]),
        Some(v @ Value::Float(_)) => Ok(vec![Value::Float(v.as_float().unwrap().abs())]),
        Some(other) => Err(bad_argument(1, "abs", "number", other)),
        None => Err(bad_argument(1, "abs", "number", &Value::Nil)),
    }
}

fn math_acos(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    Ok(vec![Value::Float(check_number(args, 1, "acos")?.acos())])
}

fn math_asin(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    Ok(vec![Value::Float(check_number(args, 1, "asin")?.asin())])
}

fn math_atan(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let y = check_number(args, 1, "atan")?;
    let x = args.get(1).and_then(|v| v.as_float()).unwrap_or(1.0);
    Ok(vec![Value::Float(y.atan2(x))])
}

fn math_ceil(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    match args.first() {
        Some(Value::Int(i)) => Ok(vec![Value::Int(*i)]),
        Some(v @ Value::Float(_)) => {
            let f = v.as_float().unwrap().ceil();
            Ok(vec![if let Value::Int(i) = float_to_integer(f) { Value::Int(i) } else { Value::Float(f) }])
        }
        Some(other) => Err(bad_argument(1, "ceil", "number", other)),
        None => Err(bad_argument(1, "ceil", "number", &Value::Nil)),
    }
}

fn math_cos(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    Ok(vec![Value::Float(check_number(args, 1, "cos")?.cos())])
}

fn math_deg(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    Ok(vec![Value::Float(check_number(args, 1, "deg")?.to_degrees())])
}

fn math_exp(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    Ok(vec![Value::Float(check_number(args, 1, "exp")?.exp())])
}

fn math_floor(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    match args.first() {
        Some(Value::Int(i)) => Ok(vec![Value::Int(*i)]),
        Some(v @ Value::Float(_)) => {
            let f = v.as_float().unwrap().floor();
            Ok(vec![if let Value::Int(i) = float_to_integer(f) { Value::Int(i) } else { Value::Float(f) }])
        }
        Some(other) => Err(bad_argument(1, "floor", "number", other)),
        None => Err(bad_argument(1, "floor", "number", &Value::Nil)),
    }
}

fn math_fmod(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    if let (Some(Value::Int(a)), Some(Value::Int(b))) = (args.first(), args.get(1)) {
        if *b == 0 {
            return Err(runtime_error("bad argument #2 to 'fmod' (zero)"));
        }
        let r = if *b == -1 { 0 } else { a % b };
        return Ok(vec![Value::Int(r)]);
    }
    let x = check_number(args, 1, "fmod")?;
    let y = check_number(args, 2, "fmod")?;
    Ok(vec![Value::Float(x % y)])
}

fn math_log(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let x = check_number(args, 1, "log")?;
    let r = match args.get(1).and_then(|v| v.as_float()) {
        Some(base) => x.log(base),
        None => x.ln(),
    };
    Ok(vec![Value::Float(r)])
}

fn num_lt(a: &Value, b: &Value) -> bool {
    a.as_float().unwrap_or(f64::NAN) < b.as_float().unwrap_or(f64::NAN)
}

fn math_max(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    if args.is_empty() {
        return Err(runtime_error("bad argument #1 to 'max' (value expected)"));
    }
    let mut best = args[0].clone();
    for (i, v) in args.iter().enumerate().skip(1) {
        if !v.is_number() {
            return Err(bad_argument(i + 1, "max", "number", v));
        }
        if num_lt(&best, v) {
            best = v.clone();
        }
    }
    Ok(vec![best])
}

fn math_min(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    if args.is_empty() {
        return Err(runtime_error("bad argument #1 to 'min' (value expected)"));
    }
    let mut best = args[0].clone();
    for (i, v) in args.iter().enumerate().skip(1) {
        if !v.is_number() {
            return Err(bad_argument(i + 1, "min", "number", v));
        }
        if num_lt(v, &best) {
            best = v.clone();
        }
    }
    Ok(vec![best])
}

fn math_modf(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let x = check_number(args, 1, "modf")?;
    let int_part = x.trunc();
    let frac = if x.is_infinite() { 0.0 } else { x - int_part };
    let ip = if let Value::Int(i) = float_to_integer(int_part) { Value::Int(i) } else { Value::Float(int_part) };
    Ok(vec![ip, Value::Float(frac)])
}

fn math_rad(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    Ok(vec![Value::Float(check_number(args, 1, "rad")?.to_radians())])
}

fn math_sin(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    Ok(vec![Value::Float(check_number(args, 1, "sin")?.sin())])
}

fn math_sqrt(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    Ok(vec![Value::Float(check_number(args, 1, "sqrt")?.sqrt())])
}

fn math_tan(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    Ok(vec![Value::Float(check_number(args, 1, "tan")?.tan())])
}

fn math_tointeger(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    match args.first() {
        Some(v @ Value::Int(_)) => Ok(vec![v.clone()]),
        Some(Value::Float(f)) => Ok(vec![float_to_integer(*f)]),
        _ => Ok(vec![Value::Nil]),
    }
}

fn math_type(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    match args.first().and_then(Value::math_type) {
        Some(t) => Ok(vec![Value::str(t.as_bytes())]),
        None => Ok(vec![Value::Nil]),
    }
}

fn math_ult(_interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    let m = args.first().and_then(Value::as_int).ok_or_else(|| bad_argument(1, "ult", "integer", args.first().unwrap_or(&Value::Nil)))?;
    let n = args.get(1).and_then(Value::as_int).ok_or_else(|| bad_argument(2, "ult", "integer", args.get(1).unwrap_or(&Value::Nil)))?;
    Ok(vec![Value::Bool((m as u64) < (n as u64))])
}

/// `math.random()`/`(n)`/`(lo,hi)`, using `Interp.rng` so `randomseed`
/// produces a reproducible stream for a given seed.
fn math_random(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    match args.len() {
        0 => Ok(vec![Value::Float(interp.rng.gen_range(0.0..1.0))]),
        1 => {
            let up = args[0].as_int().ok_or_else(|| bad_argument(1, "random", "number", &args[0]))?;
            if up == 0 {
                return Ok(vec![Value::Int(interp.rng.gen())]);
            }
            if up < 1 {
                return Err(runtime_error("bad argument #1 to 'random' (interval is empty)"));
            }
            Ok(vec![Value::Int(interp.rng.gen_range(1..=up))])
        }
        _ => {
            let lo = args[0].as_int().ok_or_else(|| bad_argument(1, "random", "number", &args[0]))?;
            let up = args[1].as_int().ok_or_else(|| bad_argument(2, "random", "number", &args[1]))?;
            if lo > up {
                return Err(runtime_error("bad argument #2 to 'random' (interval is empty)"));
            }
            Ok(vec![Value::Int(interp.rng.gen_range(lo..=up))])
        }
    }
}

fn math_randomseed(interp: &mut Interp, args: &[Value]) -> EvalResult<Vec<Value>> {
    use rand::SeedableRng;
    let seed = match args.first().and_then(Value::as_int) {
        Some(s) => s as u64,
        None => std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0),
    };
    interp.rng = rand::rngs::StdRng::seed_from_u64(seed);
    Ok(Vec::new())
}
