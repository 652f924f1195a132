//! `string.pack`/`unpack`/`packsize` (spec.md §4.7).
//!
//! Grounded on the option set named in spec.md directly; the teacher's
//! `crates/luars/src/stdlib/string/pack.rs` supplied the same option
//! vocabulary (`b B h H i[n] I[n] l L j J T f d n s[n] z x < > =`) which this
//! reimplements against this crate's byte-oriented `Value`. `!n` alignment
//! directives parse but do not insert padding — a documented simplification
//! (DESIGN.md) since nothing in this crate's stdlib surface depends on
//! natively-aligned structs.

#[derive(Clone, Copy, PartialEq)]
enum Endian {
    Little,
    Big,
}

impl Endian {
    fn native() -> Endian {
        if cfg!(target_endian = "big") {
            Endian::Big
        } else {
            Endian::Little
        }
    }
}

pub enum Opt {
    Int { size: usize, signed: bool },
    Float,
    Double,
    FixedStr(usize),
    ZeroStr,
    LenStr(usize),
    Padding,
}

pub struct Format {
    pub endian: Endian,
    pub opts: Vec<Opt>,
}

pub fn parse(fmt: &[u8]) -> Result<Format, String> {
    let mut endian = Endian::native();
    let mut opts = Vec::new();
    let mut i = 0;
    while i < fmt.len() {
        let c = fmt[i];
        i += 1;
        match c {
            b'<' => endian = Endian::Little,
            b'>' => endian = Endian::Big,
            b'=' => endian = Endian::native(),
            b'!' => {
                i = skip_number(fmt, i);
            }
            b' ' => {}
            b'b' => opts.push(Opt::Int { size: 1, signed: true }),
            b'B' => opts.push(Opt::Int { size: 1, signed: false }),
            b'h' => opts.push(Opt::Int { size: 2, signed: true }),
            b'H' => opts.push(Opt::Int { size: 2, signed: false }),
            b'i' | b'I' => {
                let (n, next) = read_number(fmt, i, 4);
                i = next;
                opts.push(Opt::Int { size: n, signed: c == b'i' });
            }
            b'l' | b'j' => opts.push(Opt::Int { size: 8, signed: true }),
            b'L' | b'J' | b'T' => opts.push(Opt::Int { size: 8, signed: false }),
            b'f' => opts.push(Opt::Float),
            b'd' | b'n' => opts.push(Opt::Double),
            b's' => {
                let (n, next) = read_number(fmt, i, 8);
                i = next;
                opts.push(Opt::LenStr(n));
            }
            b'c' => {
                let start = i;
                let (n, next) = read_number(fmt, i, 0);
                if next == start {
                    return Err("missing size for format option 'c'".to_string());
                }
                i = next;
                opts.push(Opt::FixedStr(n));
            }
            b'z' => opts.push(Opt::ZeroStr),
            b'x' => opts.push(Opt::Padding),
            other => return Err(format!("invalid format option '{}'", other as char)),
        }
    }
    Ok(Format { endian, opts })
}

fn skip_number(fmt: &[u8], mut i: usize) -> usize {
    while i < fmt.len() && fmt[i].is_ascii_digit() {
        i += 1;
    }
    i
}

fn read_number(fmt: &[u8], i: usize, default: usize) -> (usize, usize) {
    let start = i;
    let mut j = i;
    while j < fmt.len() && fmt[j].is_ascii_digit() {
        j += 1;
    }
    if j == start {
        (default, j)
    } else {
        let n: usize = std::str::from_utf8(&fmt[start..j]).unwrap().parse().unwrap_or(default);
        (n, j)
    }
}

pub enum PackValue {
    Int(i64),
    Float(f64),
    Str(Vec<u8>),
}

pub fn pack(format: &Format, values: &[PackValue]) -> Result<Vec<u8>, String> {
    let mut out = Vec::new();
    let mut vi = 0;
    for opt in &format.opts {
        match opt {
            Opt::Padding => out.push(0),
            Opt::Int { size, .. } => {
                let v = next_int(values, &mut vi)?;
                push_int(&mut out, v, *size, format.endian);
            }
            Opt::Float => {
                let v = next_float(values, &mut vi)?;
                let bytes = (v as f32).to_le_bytes();
                push_bytes(&mut out, &bytes, format.endian);
            }
            Opt::Double => {
                let v = next_float(values, &mut vi)?;
                let bytes = v.to_le_bytes();
                push_bytes(&mut out, &bytes, format.endian);
            }
            Opt::FixedStr(n) => {
                let s = next_str(values, &mut vi)?;
                if s.len() > *n {
                    return Err("string longer than given size".to_string());
                }
                out.extend_from_slice(s);
                out.extend(std::iter::repeat(0u8).take(n - s.len()));
            }
            Opt::ZeroStr => {
                let s = next_str(values, &mut vi)?;
                if s.contains(&0) {
                    return Err("string contains zeros".to_string());
                }
                out.extend_from_slice(s);
                out.push(0);
            }
            Opt::LenStr(n) => {
                let s = next_str(values, &mut vi)?;
                push_int(&mut out, s.len() as i64, *n, format.endian);
                out.extend_from_slice(s);
            }
        }
    }
    Ok(out)
}

fn next_int<'a>(values: &'a [PackValue], vi: &mut usize) -> Result<i64, String> {
    let v = values.get(*vi).ok_or("bad argument to 'pack' (too few values)")?;
    *vi += 1;
    match v {
        PackValue::Int(i) => Ok(*i),
        PackValue::Float(f) => Ok(*f as i64),
        _ => Err("bad argument to 'pack' (number expected)".to_string()),
    }
}

fn next_float<'a>(values: &'a [PackValue], vi: &mut usize) -> Result<f64, String> {
    let v = values.get(*vi).ok_or("bad argument to 'pack' (too few values)")?;
    *vi += 1;
    match v {
        PackValue::Int(i) => Ok(*i as f64),
        PackValue::Float(f) => Ok(*f),
        _ => Err("bad argument to 'pack' (number expected)".to_string()),
    }
}

fn next_str<'a>(values: &'a [PackValue], vi: &mut usize) -> Result<&'a [u8], String> {
    let v = values.get(*vi).ok_or("bad argument to 'pack' (too few values)")?;
    *vi += 1;
    match v {
        PackValue::Str(s) => Ok(s),
        _ => Err("bad argument to 'pack' (string expected)".to_string()),
    }
}

fn push_int(out: &mut Vec<u8>, v: i64, size: usize, endian: Endian) {
    let bytes = v.to_le_bytes();
    push_bytes(out, &bytes[..size.min(8)], endian);
    for _ in 8..size {
        out.push(if v < 0 { 0xff } else { 0 });
    }
}

fn push_bytes(out: &mut Vec<u8>, le: &[u8], endian: Endian) {
    if endian == Endian::Little {
        out.extend_from_slice(le);
    } else {
        out.extend(le.iter().rev());
    }
}

pub enum UnpackValue {
    Int(i64),
    Float(f64),
    Str(Vec<u8>),
}

pub fn unpack(format: &Format, data: &[u8], mut pos: usize) -> Result<(Vec<UnpackValue>, usize), String> {
    let mut out = Vec::new();
    for opt in &format.opts {
        match opt {
            Opt::Padding => pos += 1,
            Opt::Int { size, signed } => {
                let bytes = read_bytes(data, pos, *size)?;
                pos += size;
                out.push(UnpackValue::Int(decode_int(&bytes, *signed, format.endian)));
            }
            Opt::Float => {
                let bytes = read_bytes(data, pos, 4)?;
                pos += 4;
                let ordered = order(&bytes, format.endian);
                out.push(UnpackValue::Float(f32::from_le_bytes(ordered.try_into().unwrap()) as f64));
            }
            Opt::Double => {
                let bytes = read_bytes(data, pos, 8)?;
                pos += 8;
                let ordered = order(&bytes, format.endian);
                out.push(UnpackValue::Float(f64::from_le_bytes(ordered.try_into().unwrap())));
            }
            Opt::FixedStr(n) => {
                let bytes = read_bytes(data, pos, *n)?;
                pos += n;
                out.push(UnpackValue::Str(bytes));
            }
            Opt::ZeroStr => {
                let end = data[pos..].iter().position(|&b| b == 0).ok_or("unfinished string for format 'z'")?;
                out.push(UnpackValue::Str(data[pos..pos + end].to_vec()));
                pos += end + 1;
            }
            Opt::LenStr(n) => {
                let lb = read_bytes(data, pos, *n)?;
                pos += n;
                let len = decode_int(&lb, false, format.endian) as usize;
                let bytes = read_bytes(data, pos, len)?;
                pos += len;
                out.push(UnpackValue::Str(bytes));
            }
        }
    }
    Ok((out, pos))
}

fn read_bytes(data: &[u8], pos: usize, n: usize) -> Result<Vec<u8>, String> {
    if pos + n > data.len() {
        return Err("data string too short".to_string());
    }
    Ok(data[pos..pos + n].to_vec())
}

fn order(bytes: &[u8], endian: Endian) -> Vec<u8> {
    if endian == Endian::Little {
        bytes.to_vec()
    } else {
        bytes.iter().rev().cloned().collect()
    }
}

fn decode_int(bytes: &[u8], signed: bool, endian: Endian) -> i64 {
    let le = order(bytes, endian);
    let mut v: i64 = 0;
    for (i, b) in le.iter().enumerate().take(8) {
        v |= (*b as i64) << (8 * i);
    }
    if signed && le.len() < 8 {
        let sign_bit = 1i64 << (le.len() * 8 - 1);
        if v & sign_bit != 0 {
            v -= sign_bit << 1;
        }
    }
    v
}

pub fn packsize(format: &Format) -> Result<usize, String> {
    let mut total = 0;
    for opt in &format.opts {
        total += match opt {
            Opt::Padding => 1,
            Opt::Int { size, .. } => *size,
            Opt::Float => 4,
            Opt::Double => 8,
            Opt::FixedStr(n) => *n,
            Opt::ZeroStr | Opt::LenStr(_) => {
                return Err("variable-size format in packsize".to_string())
            }
        };
    }
    Ok(total)
}
