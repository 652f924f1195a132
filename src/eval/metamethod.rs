//! Metamethod lookup and the arithmetic/comparison/string coercion rules
//! that drive it (spec.md §4.5).

use crate::eval::Interp;
use crate::value::Value;

pub fn get_metatable(interp: &Interp, v: &Value) -> Option<crate::gc::GcRef<crate::value::Table>> {
    match v {
        Value::Table(t) => interp.heap.table(*t).metatable,
        Value::Str(_) => interp.string_metatable,
        Value::UserData(u) => interp.heap.userdata(*u).metatable,
        _ => None,
    }
}

pub fn get_metamethod(interp: &Interp, v: &Value, name: &str) -> Option<Value> {
    let mt = get_metatable(interp, v)?;
    let mm = interp.heap.table(mt).get_str(name);
    if mm.is_nil() {
        None
    } else {
        Some(mm)
    }
}

/// Coerces a value to a number the way arithmetic operands do: numbers
/// pass through, strings are parsed per spec.md §4.5 numeric-string rule.
pub fn to_number(v: &Value) -> Option<Value> {
    match v {
        Value::Int(_) | Value::Float(_) => Some(v.clone()),
        Value::Str(s) => str_to_number(s),
        _ => None,
    }
}

pub fn str_to_number(bytes: &[u8]) -> Option<Value> {
    let s = std::str::from_utf8(bytes).ok()?.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(hex) = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .or_else(|| s.strip_prefix("-0x").map(|_| &s[3..]))
        .or_else(|| s.strip_prefix("-0X").map(|_| &s[3..]))
    {
        let neg = s.starts_with('-');
        if hex.contains('.') || hex.contains('p') || hex.contains('P') {
            return None; // hex floats in source text aren't required by the stdlib surface
        }
        let mut v: i64 = 0;
        for c in hex.chars() {
            v = v.wrapping_mul(16).wrapping_add(c.to_digit(16)? as i64);
        }
        return Some(Value::Int(if neg { -v } else { v }));
    }
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::Int(i));
    }
    s.parse::<f64>().ok().map(Value::Float)
}

/// `tostring`'s default formatting for numbers, shared between the
/// `print`/`tostring` builtins and implicit concat coercion (spec.md §4.5).
pub fn number_to_string(v: &Value) -> String {
    match v {
        Value::Int(i) => {
            let mut buf = itoa::Buffer::new();
            buf.format(*i).to_string()
        }
        Value::Float(f) => format_lua_float(*f),
        _ => unreachable!(),
    }
}

pub fn format_lua_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f < 0.0 { "-inf".to_string() } else { "inf".to_string() };
    }
    let s = format!("{:.14e}", f);
    // Reformat via %.14g-equivalent rounding, then ensure a float always
    // shows a decimal point or exponent so it reads back as a float.
    let formatted = format_g(f, 14);
    if !formatted.contains('.') && !formatted.contains('e') && !formatted.contains("inf") && !formatted.contains("nan") {
        format!("{formatted}.0")
    } else {
        let _ = s;
        formatted
    }
}

fn format_g(f: f64, precision: usize) -> String {
    if f == 0.0 {
        return if f.is_sign_negative() { "-0".to_string() } else { "0".to_string() };
    }
    let exp = f.abs().log10().floor() as i32;
    if exp < -4 || exp >= precision as i32 {
        let s = format!("{:.*e}", precision.saturating_sub(1), f);
        normalize_exp(&s)
    } else {
        let decimals = (precision as i32 - 1 - exp).max(0) as usize;
        let s = format!("{:.*}", decimals, f);
        trim_trailing_zeros(&s)
    }
}

fn trim_trailing_zeros(s: &str) -> String {
    if !s.contains('.') {
        return s.to_string();
    }
    let trimmed = s.trim_end_matches('0');
    let trimmed = trimmed.trim_end_matches('.');
    trimmed.to_string()
}

fn normalize_exp(s: &str) -> String {
    let (mantissa, exp) = s.split_once('e').unwrap();
    let mantissa = trim_trailing_zeros(mantissa);
    let exp_val: i32 = exp.parse().unwrap();
    format!("{mantissa}e{}{:02}", if exp_val < 0 { "-" } else { "+" }, exp_val.abs())
}
