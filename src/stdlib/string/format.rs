//! `string.format` (spec.md §4.7): `%d %i %u %o %x %X %c %f %e %E %g %G %s
//! %q %p %%`, flags `-+ #0`, width, precision.
//!
//! Grounded on the option set spec.md names directly (the teacher's
//! `crates/luars/src/stdlib/string/string_format.rs` format-spec parser
//! shares the same C-`printf`-derived grammar; this follows Rust's own
//! `{:>width.prec}` formatter primitives rather than hand-rolling padding).

use crate::error::{Control, EvalResult, LuaError, LuaFullError};
use crate::eval::{number_to_string, Interp};
use crate::value::Value;

struct Spec {
    left: bool,
    plus: bool,
    space: bool,
    alt: bool,
    zero: bool,
    width: Option<usize>,
    precision: Option<usize>,
    conv: u8,
}

fn err(msg: impl Into<String>) -> Control {
    let m = msg.into();
    Control::Error(LuaFullError::new(LuaError::Runtime, m.clone(), Value::str(m.into_bytes())))
}

pub fn format(interp: &mut Interp, fmt: &[u8], args: &[Value], line: u32) -> EvalResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut ai = 0usize;
    let mut i = 0usize;
    while i < fmt.len() {
        if fmt[i] != b'%' {
            out.push(fmt[i]);
            i += 1;
            continue;
        }
        i += 1;
        if i >= fmt.len() {
            return Err(err("invalid conversion '%' to 'format'"));
        }
        if fmt[i] == b'%' {
            out.push(b'%');
            i += 1;
            continue;
        }
        let start = i;
        let mut spec = Spec {
            left: false,
            plus: false,
            space: false,
            alt: false,
            zero: false,
            width: None,
            precision: None,
            conv: 0,
        };
        while i < fmt.len() && matches!(fmt[i], b'-' | b'+' | b' ' | b'#' | b'0') {
            match fmt[i] {
                b'-' => spec.left = true,
                b'+' => spec.plus = true,
                b' ' => spec.space = true,
                b'#' => spec.alt = true,
                b'0' => spec.zero = true,
                _ => unreachable!(),
            }
            i += 1;
        }
        let wstart = i;
        while i < fmt.len() && fmt[i].is_ascii_digit() {
            i += 1;
        }
        if i > wstart {
            spec.width = std::str::from_utf8(&fmt[wstart..i]).unwrap().parse().ok();
        }
        if i < fmt.len() && fmt[i] == b'.' {
            i += 1;
            let pstart = i;
            while i < fmt.len() && fmt[i].is_ascii_digit() {
                i += 1;
            }
            spec.precision = Some(std::str::from_utf8(&fmt[pstart..i]).unwrap().parse().unwrap_or(0));
        }
        if i >= fmt.len() {
            return Err(err(format!(
                "invalid conversion '%{}' to 'format'",
                String::from_utf8_lossy(&fmt[start..i])
            )));
        }
        spec.conv = fmt[i];
        i += 1;

        let arg = || args.get(ai).cloned().unwrap_or(Value::Nil);
        match spec.conv {
            b'd' | b'i' => {
                let v = arg();
                ai += 1;
                let n = v
                    .as_int()
                    .ok_or_else(|| err(format!("bad argument #{} to 'format' (number expected, got {})", ai, v.type_name())))?;
                push_int(&mut out, &spec, n, 10, false);
            }
            b'u' => {
                let v = arg();
                ai += 1;
                let n = v.as_int().ok_or_else(|| err("bad argument to 'format'"))?;
                push_unsigned(&mut out, &spec, n as u64, 10, false);
            }
            b'o' => {
                let v = arg();
                ai += 1;
                let n = v.as_int().ok_or_else(|| err("bad argument to 'format'"))?;
                push_radix(&mut out, &spec, n as u64, 8, false);
            }
            b'x' => {
                let v = arg();
                ai += 1;
                let n = v.as_int().ok_or_else(|| err("bad argument to 'format'"))?;
                push_radix(&mut out, &spec, n as u64, 16, false);
            }
            b'X' => {
                let v = arg();
                ai += 1;
                let n = v.as_int().ok_or_else(|| err("bad argument to 'format'"))?;
                push_radix(&mut out, &spec, n as u64, 16, true);
            }
            b'c' => {
                let v = arg();
                ai += 1;
                let n = v.as_int().ok_or_else(|| err("bad argument to 'format'"))?;
                out.push(n as u8);
            }
            b'f' | b'F' => {
                let v = arg();
                ai += 1;
                let f = v.as_float().or_else(|| crate::eval::str_to_number(v.as_str_bytes().unwrap_or(b"")).and_then(|n| n.as_float())).ok_or_else(|| err("bad argument to 'format'"))?;
                let prec = spec.precision.unwrap_or(6);
                let s = format!("{:.*}", prec, f.abs());
                push_signed_str(&mut out, &spec, f.is_sign_negative(), &s);
            }
            b'e' | b'E' => {
                let v = arg();
                ai += 1;
                let f = v.as_float().ok_or_else(|| err("bad argument to 'format'"))?;
                let prec = spec.precision.unwrap_or(6);
                let s = sci(f.abs(), prec, spec.conv == b'E');
                push_signed_str(&mut out, &spec, f.is_sign_negative(), &s);
            }
            b'g' | b'G' => {
                let v = arg();
                ai += 1;
                let f = v.as_float().ok_or_else(|| err("bad argument to 'format'"))?;
                let prec = spec.precision.unwrap_or(6).max(1);
                let s = general(f.abs(), prec, spec.conv == b'G');
                push_signed_str(&mut out, &spec, f.is_sign_negative(), &s);
            }
            b's' => {
                let v = arg();
                ai += 1;
                let mut bytes = interp.tostring(&v, line)?;
                if let Some(p) = spec.precision {
                    bytes.truncate(p);
                }
                pad_str(&mut out, &spec, &bytes);
            }
            b'q' => {
                let v = arg();
                ai += 1;
                out.extend(quote(&v));
            }
            b'p' => {
                let v = arg();
                ai += 1;
                let id = v.gc_id().unwrap_or(0);
                out.extend(format!("0x{:012x}", id).into_bytes());
            }
            other => {
                return Err(err(format!("invalid conversion '%{}' to 'format'", other as char)));
            }
        }
    }
    Ok(out)
}

fn sci(f: f64, prec: usize, upper: bool) -> String {
    let s = format!("{:.*e}", prec, f);
    let (mantissa, exp) = s.split_once('e').unwrap();
    let exp_val: i32 = exp.parse().unwrap();
    let e_char = if upper { 'E' } else { 'e' };
    format!("{mantissa}{e_char}{}{:02}", if exp_val < 0 { "-" } else { "+" }, exp_val.abs())
}

fn general(f: f64, prec: usize, upper: bool) -> String {
    if f == 0.0 {
        return "0".to_string();
    }
    let exp = f.log10().floor() as i32;
    let s = if exp < -4 || exp >= prec as i32 {
        sci(f, prec.saturating_sub(1), upper)
    } else {
        let decimals = (prec as i32 - 1 - exp).max(0) as usize;
        format!("{:.*}", decimals, f)
    };
    if s.contains('.') && !s.contains('e') && !s.contains('E') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}

fn quote(v: &Value) -> Vec<u8> {
    match v {
        Value::Str(s) => {
            let mut out = vec![b'"'];
            for &b in s.iter() {
                match b {
                    b'"' | b'\\' => {
                        out.push(b'\\');
                        out.push(b);
                    }
                    b'\n' => out.extend(b"\\n"),
                    b'\r' => out.extend(b"\\r"),
                    0 => out.extend(b"\\0"),
                    c if c < 0x20 || c == 0x7f => out.extend(format!("\\{c}").into_bytes()),
                    c => out.push(c),
                }
            }
            out.push(b'"');
            out
        }
        Value::Int(i) => {
            let mut b = itoa::Buffer::new();
            b.format(*i).as_bytes().to_vec()
        }
        Value::Float(_) => number_to_string(v).into_bytes(),
        Value::Nil => b"nil".to_vec(),
        Value::Bool(b) => if *b { b"true".to_vec() } else { b"false".to_vec() },
        _ => number_to_string(&Value::Int(0)).into_bytes(),
    }
}

fn push_int(out: &mut Vec<u8>, spec: &Spec, n: i64, _radix: u32, _upper: bool) {
    let neg = n < 0;
    let digits = if n == i64::MIN {
        n.unsigned_abs().to_string()
    } else {
        n.abs().to_string()
    };
    push_signed_str(out, spec, neg, &digits);
}

fn push_unsigned(out: &mut Vec<u8>, spec: &Spec, n: u64, _radix: u32, _upper: bool) {
    pad_str(out, spec, n.to_string().as_bytes());
}

fn push_radix(out: &mut Vec<u8>, spec: &Spec, n: u64, radix: u32, upper: bool) {
    let s = match radix {
        8 => format!("{:o}", n),
        16 if upper => format!("{:X}", n),
        16 => format!("{:x}", n),
        _ => n.to_string(),
    };
    let s = if spec.alt && radix == 16 && n != 0 {
        format!("{}{}", if upper { "0X" } else { "0x" }, s)
    } else {
        s
    };
    pad_str(out, spec, s.as_bytes());
}

fn push_signed_str(out: &mut Vec<u8>, spec: &Spec, neg: bool, digits: &str) {
    let sign = if neg {
        "-"
    } else if spec.plus {
        "+"
    } else if spec.space {
        " "
    } else {
        ""
    };
    let body = format!("{sign}{digits}");
    if spec.zero && !spec.left {
        if let Some(w) = spec.width {
            if body.len() < w {
                let pad = w - body.len();
                let mut s = String::with_capacity(w);
                s.push_str(sign);
                s.push_str(&"0".repeat(pad));
                s.push_str(digits);
                out.extend(s.into_bytes());
                return;
            }
        }
    }
    pad_str(out, spec, body.as_bytes());
}

fn pad_str(out: &mut Vec<u8>, spec: &Spec, s: &[u8]) {
    match spec.width {
        Some(w) if w > s.len() => {
            let pad = w - s.len();
            if spec.left {
                out.extend_from_slice(s);
                out.extend(std::iter::repeat(b' ').take(pad));
            } else {
                out.extend(std::iter::repeat(b' ').take(pad));
                out.extend_from_slice(s);
            }
        }
        _ => out.extend_from_slice(s),
    }
}
