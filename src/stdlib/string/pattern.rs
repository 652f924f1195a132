//! Lua pattern matching (spec.md §4.7), byte-oriented direct interpretation
//! with no intermediate AST — Lua strings are byte sequences, not code-point
//! sequences, so matching walks `&[u8]` directly rather than `Vec<char>`.
//!
//! Grounded on
//! `examples/CppCXY-lua-rs/crates/luars/src/stdlib/string/pattern/engine.rs`
//! (itself modeled on reference Lua's `lstrlib.c`): a `MatchState` holding
//! text/pattern slices and a fixed capture array, walked by a recursive
//! `do_match` with tail-call-style looping for sequential elements. Reworked
//! from chars to raw bytes since this crate's strings are already bytes.

pub const MAXCAPTURES: usize = 32;
const MAXCCALLS: usize = 200;

#[derive(Debug, Clone, Copy)]
pub enum CapLen {
    Unfinished,
    Position,
    Len(usize),
}

#[derive(Debug, Clone, Copy)]
pub struct Capture {
    pub start: usize,
    pub len: CapLen,
}

pub struct MatchState<'a> {
    pub text: &'a [u8],
    pub pat: &'a [u8],
    pub captures: Vec<Capture>,
    pub depth: usize,
    pub error: Option<String>,
}

impl<'a> MatchState<'a> {
    pub fn new(text: &'a [u8], pat: &'a [u8]) -> Self {
        MatchState {
            text,
            pat,
            captures: Vec::with_capacity(8),
            depth: 0,
            error: None,
        }
    }

    pub fn reset(&mut self) {
        self.captures.clear();
        self.depth = 0;
        self.error = None;
    }
}

fn class_end(pat: &[u8], pp: usize) -> Result<usize, String> {
    let mut pp = pp;
    let c = pat[pp];
    pp += 1;
    if c == b'%' {
        if pp >= pat.len() {
            return Err("malformed pattern (ends with '%')".to_string());
        }
        return Ok(pp + 1);
    }
    if c == b'[' {
        if pp < pat.len() && pat[pp] == b'^' {
            pp += 1;
        }
        // a ']' right after '[' or '[^' is a literal member of the set,
        // not the closing bracket.
        let mut first = true;
        loop {
            if pp >= pat.len() {
                return Err("malformed pattern (missing ']')".to_string());
            }
            let cc = pat[pp];
            pp += 1;
            if cc == b'%' {
                if pp >= pat.len() {
                    return Err("malformed pattern (ends with '%')".to_string());
                }
                pp += 1;
            } else if cc == b']' && !first {
                return Ok(pp);
            }
            first = false;
        }
    }
    Ok(pp)
}

fn match_class(c: u8, cl: u8) -> bool {
    let res = match cl.to_ascii_lowercase() {
        b'a' => c.is_ascii_alphabetic(),
        b'd' => c.is_ascii_digit(),
        b'l' => c.is_ascii_lowercase(),
        b's' => c.is_ascii_whitespace(),
        b'u' => c.is_ascii_uppercase(),
        b'w' => c.is_ascii_alphanumeric(),
        b'x' => c.is_ascii_hexdigit(),
        b'p' => c.is_ascii_punctuation(),
        b'c' => c.is_ascii_control(),
        b'g' => c.is_ascii_graphic(),
        _ => return cl == c,
    };
    if cl.is_ascii_uppercase() {
        !res
    } else {
        res
    }
}

fn match_set(c: u8, pat: &[u8], mut pp: usize, ep: usize) -> bool {
    let mut negate = false;
    pp += 1; // skip '['
    if pat[pp] == b'^' {
        negate = true;
        pp += 1;
    }
    let mut found = false;
    while pp < ep - 1 {
        if pat[pp] == b'%' {
            pp += 1;
            if match_class(c, pat[pp]) {
                found = true;
            }
            pp += 1;
        } else if pp + 2 < ep - 1 && pat[pp + 1] == b'-' {
            if pat[pp] <= c && c <= pat[pp + 2] {
                found = true;
            }
            pp += 3;
        } else {
            if pat[pp] == c {
                found = true;
            }
            pp += 1;
        }
    }
    found != negate
}

fn single_match(ms: &MatchState, si: usize, pp: usize, ep: usize) -> bool {
    if si >= ms.text.len() {
        return false;
    }
    let c = ms.text[si];
    match ms.pat[pp] {
        b'.' => true,
        b'%' => match_class(c, ms.pat[pp + 1]),
        b'[' => match_set(c, ms.pat, pp, ep),
        pc => pc == c,
    }
}

pub fn do_match(ms: &mut MatchState, si: usize, pp: usize) -> Result<Option<usize>, ()> {
    if ms.error.is_some() {
        return Err(());
    }
    ms.depth += 1;
    if ms.depth > MAXCCALLS {
        ms.error = Some("pattern too complex".to_string());
        ms.depth -= 1;
        return Err(());
    }
    let r = match_inner(ms, si, pp);
    ms.depth -= 1;
    r
}

fn match_inner(ms: &mut MatchState, mut si: usize, mut pp: usize) -> Result<Option<usize>, ()> {
    loop {
        if pp >= ms.pat.len() {
            return Ok(Some(si));
        }
        match ms.pat[pp] {
            b'(' => {
                return if pp + 1 < ms.pat.len() && ms.pat[pp + 1] == b')' {
                    open_capture(ms, si, pp + 2, true)
                } else {
                    open_capture(ms, si, pp + 1, false)
                };
            }
            b')' => return close_capture(ms, si, pp + 1),
            b'$' if pp + 1 == ms.pat.len() => {
                return Ok(if si == ms.text.len() { Some(si) } else { None });
            }
            b'%' if pp + 1 < ms.pat.len() => match ms.pat[pp + 1] {
                b'b' => return match_balance(ms, si, pp),
                b'f' => return match_frontier(ms, si, pp),
                c if c.is_ascii_digit() => return match_backref(ms, si, pp, (c - b'0') as usize),
                _ => {}
            },
            _ => {}
        }
        let ep = class_end(ms.pat, pp).map_err(|e| {
            ms.error = Some(e);
        })?;
        let suffix = ms.pat.get(ep).copied();
        match suffix {
            Some(b'*') => return max_expand(ms, si, pp, ep, 0),
            Some(b'+') => return max_expand(ms, si, pp, ep, 1),
            Some(b'-') => return min_expand(ms, si, pp, ep),
            Some(b'?') => {
                if single_match(ms, si, pp, ep) {
                    if let Some(r) = do_match(ms, si + 1, ep + 1)? {
                        return Ok(Some(r));
                    }
                }
                pp = ep + 1;
                continue;
            }
            _ => {
                if single_match(ms, si, pp, ep) {
                    si += 1;
                    pp = ep;
                    continue;
                }
                return Ok(None);
            }
        }
    }
}

fn max_expand(ms: &mut MatchState, si: usize, pp: usize, ep: usize, min: usize) -> Result<Option<usize>, ()> {
    let mut count = 0usize;
    while single_match(ms, si + count, pp, ep) {
        count += 1;
    }
    while count + 1 > min {
        if let Some(r) = do_match(ms, si + count, ep + 1)? {
            return Ok(Some(r));
        }
        if count == 0 {
            break;
        }
        count -= 1;
    }
    if min == 0 {
        return do_match(ms, si, ep + 1);
    }
    Ok(None)
}

fn min_expand(ms: &mut MatchState, mut si: usize, pp: usize, ep: usize) -> Result<Option<usize>, ()> {
    loop {
        if let Some(r) = do_match(ms, si, ep + 1)? {
            return Ok(Some(r));
        }
        if single_match(ms, si, pp, ep) {
            si += 1;
        } else {
            return Ok(None);
        }
    }
}

fn open_capture(ms: &mut MatchState, si: usize, pp: usize, position: bool) -> Result<Option<usize>, ()> {
    if ms.captures.len() >= MAXCAPTURES {
        ms.error = Some("too many captures".to_string());
        return Err(());
    }
    ms.captures.push(Capture {
        start: si,
        len: if position { CapLen::Position } else { CapLen::Unfinished },
    });
    let n = ms.captures.len() - 1;
    let r = do_match(ms, si, pp)?;
    if r.is_none() {
        ms.captures.truncate(n);
    }
    Ok(r)
}

fn close_capture(ms: &mut MatchState, si: usize, pp: usize) -> Result<Option<usize>, ()> {
    let n = ms
        .captures
        .iter()
        .rposition(|c| matches!(c.len, CapLen::Unfinished))
        .ok_or_else(|| {
            ms.error = Some("invalid pattern capture".to_string());
        })?;
    let start = ms.captures[n].start;
    ms.captures[n].len = CapLen::Len(si - start);
    let r = do_match(ms, si, pp)?;
    if r.is_none() {
        ms.captures[n].len = CapLen::Unfinished;
    }
    Ok(r)
}

fn match_balance(ms: &mut MatchState, si: usize, pp: usize) -> Result<Option<usize>, ()> {
    if pp + 3 >= ms.pat.len() {
        ms.error = Some("missing arguments to '%b'".to_string());
        return Err(());
    }
    let (open, close) = (ms.pat[pp + 2], ms.pat[pp + 3]);
    if si >= ms.text.len() || ms.text[si] != open {
        return Ok(None);
    }
    let mut depth = 1i32;
    let mut i = si + 1;
    while i < ms.text.len() {
        if ms.text[i] == close {
            depth -= 1;
            if depth == 0 {
                return do_match(ms, i + 1, pp + 4);
            }
        } else if ms.text[i] == open {
            depth += 1;
        }
        i += 1;
    }
    Ok(None)
}

fn match_frontier(ms: &mut MatchState, si: usize, pp: usize) -> Result<Option<usize>, ()> {
    if pp + 2 >= ms.pat.len() || ms.pat[pp + 2] != b'[' {
        ms.error = Some("missing '[' after '%f' in pattern".to_string());
        return Err(());
    }
    let set_start = pp + 2;
    let set_end = class_end(ms.pat, set_start).map_err(|e| {
        ms.error = Some(e);
    })?;
    let prev = if si > 0 { ms.text[si - 1] } else { 0 };
    let cur = if si < ms.text.len() { ms.text[si] } else { 0 };
    let prev_in = match_set(prev, ms.pat, set_start, set_end);
    let cur_in = match_set(cur, ms.pat, set_start, set_end);
    if !prev_in && cur_in {
        do_match(ms, si, set_end)
    } else {
        Ok(None)
    }
}

fn match_backref(ms: &mut MatchState, si: usize, pp: usize, n: usize) -> Result<Option<usize>, ()> {
    if n == 0 || n > ms.captures.len() {
        ms.error = Some(format!("invalid capture index %%{n}"));
        return Err(());
    }
    let cap = ms.captures[n - 1];
    let len = match cap.len {
        CapLen::Len(l) => l,
        _ => {
            ms.error = Some(format!("invalid capture index %%{n}"));
            return Err(());
        }
    };
    if si + len > ms.text.len() || ms.text[si..si + len] != ms.text[cap.start..cap.start + len] {
        return Ok(None);
    }
    do_match(ms, si + len, pp + 2)
}

#[derive(Debug, Clone)]
pub enum CapValue {
    Str(Vec<u8>),
    Position(usize),
}

pub struct MatchResult {
    pub start: usize,
    pub end: usize,
    pub captures: Vec<CapValue>,
}

fn extract(ms: &MatchState) -> Vec<CapValue> {
    ms.captures
        .iter()
        .map(|c| match c.len {
            CapLen::Position => CapValue::Position(c.start + 1),
            CapLen::Len(l) => CapValue::Str(ms.text[c.start..c.start + l].to_vec()),
            CapLen::Unfinished => CapValue::Str(Vec::new()),
        })
        .collect()
}

/// `string.find`/`string.match`: first match at or after byte offset `init`.
pub fn find(text: &[u8], pat: &[u8], init: usize) -> Result<Option<MatchResult>, String> {
    let anchored = pat.first() == Some(&b'^');
    let pp0 = if anchored { 1 } else { 0 };
    let mut ms = MatchState::new(text, pat);
    let mut si = init.min(text.len());
    loop {
        ms.reset();
        match do_match(&mut ms, si, pp0) {
            Ok(Some(end)) => {
                return Ok(Some(MatchResult {
                    start: si,
                    end,
                    captures: extract(&ms),
                }))
            }
            Ok(None) => {}
            Err(()) => return Err(ms.error.unwrap_or_default()),
        }
        if anchored || si >= text.len() {
            return Ok(None);
        }
        si += 1;
    }
}

/// All non-overlapping matches, for `gmatch`/`gsub`.
pub fn find_all(text: &[u8], pat: &[u8], max: Option<usize>) -> Result<Vec<MatchResult>, String> {
    let anchored = pat.first() == Some(&b'^');
    let pp0 = if anchored { 1 } else { 0 };
    let mut out = Vec::new();
    let mut ms = MatchState::new(text, pat);
    let mut si = 0usize;
    while si <= text.len() {
        if let Some(m) = max {
            if out.len() >= m {
                break;
            }
        }
        ms.reset();
        match do_match(&mut ms, si, pp0) {
            Ok(Some(end)) => {
                out.push(MatchResult {
                    start: si,
                    end,
                    captures: extract(&ms),
                });
                si = if end > si { end } else { si + 1 };
            }
            Ok(None) => {
                if anchored {
                    break;
                }
                si += 1;
            }
            Err(()) => return Err(ms.error.unwrap_or_default()),
        }
    }
    Ok(out)
}
