//! File handle backing store for `io` (spec.md §4.7). The teacher's own
//! `stdlib/io.rs` is a three-function stub; this mirrors reference Lua's
//! file-as-userdata-with-method-table design instead, stored as a
//! `UserData` so it can ride the same `<close>`/`__gc` machinery as any
//! other value (`value::userdata`).

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

pub enum LuaFile {
    File(File),
    Stdin,
    Stdout,
    Stderr,
    Closed,
}

pub enum ReadSpec {
    Line { keep_newline: bool },
    Number,
    All,
    Bytes(usize),
}

impl LuaFile {
    pub fn is_closed(&self) -> bool {
        matches!(self, LuaFile::Closed)
    }

    pub fn close(&mut self) -> io::Result<()> {
        *self = LuaFile::Closed;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self {
            LuaFile::File(f) => f.flush(),
            LuaFile::Stdout => io::stdout().flush(),
            LuaFile::Stderr => io::stderr().flush(),
            LuaFile::Stdin => Ok(()),
            LuaFile::Closed => Err(io::Error::new(io::ErrorKind::Other, "attempt to use a closed file")),
        }
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            LuaFile::File(f) => f.write_all(data),
            LuaFile::Stdout => io::stdout().write_all(data),
            LuaFile::Stderr => io::stderr().write_all(data),
            LuaFile::Stdin => Err(io::Error::new(io::ErrorKind::Other, "file not open for writing")),
            LuaFile::Closed => Err(io::Error::new(io::ErrorKind::Other, "attempt to use a closed file")),
        }
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut buf = [0u8; 1];
        let n = match self {
            LuaFile::File(f) => f.read(&mut buf)?,
            LuaFile::Stdin => io::stdin().read(&mut buf)?,
            LuaFile::Stdout | LuaFile::Stderr => return Err(io::Error::new(io::ErrorKind::Other, "file not open for reading")),
            LuaFile::Closed => return Err(io::Error::new(io::ErrorKind::Other, "attempt to use a closed file")),
        };
        Ok(if n == 0 { None } else { Some(buf[0]) })
    }

    pub fn read(&mut self, spec: ReadSpec) -> io::Result<Option<Vec<u8>>> {
        match spec {
            ReadSpec::Line { keep_newline } => {
                let mut out = Vec::new();
                loop {
                    match self.read_byte()? {
                        None if out.is_empty() => return Ok(None),
                        None => return Ok(Some(out)),
                        Some(b'\n') => {
                            if keep_newline {
                                out.push(b'\n');
                            }
                            return Ok(Some(out));
                        }
                        Some(b) => out.push(b),
                    }
                }
            }
            ReadSpec::All => {
                let mut out = Vec::new();
                while let Some(b) = self.read_byte()? {
                    out.push(b);
                }
                Ok(Some(out))
            }
            ReadSpec::Bytes(n) => {
                if n == 0 {
                    return match self.read_byte_peek()? {
                        true => Ok(Some(Vec::new())),
                        false => Ok(None),
                    };
                }
                let mut out = Vec::with_capacity(n);
                for _ in 0..n {
                    match self.read_byte()? {
                        Some(b) => out.push(b),
                        None => break,
                    }
                }
                if out.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(out))
                }
            }
            ReadSpec::Number => {
                let mut out = Vec::new();
                // Skip leading whitespace, then collect a numeric token.
                loop {
                    match self.read_byte()? {
                        Some(b) if b.is_ascii_whitespace() => continue,
                        Some(b) => {
                            out.push(b);
                            break;
                        }
                        None => return Ok(None),
                    }
                }
                loop {
                    match self.read_byte()? {
                        Some(b) if b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-' | b'x' | b'X') => out.push(b),
                        _ => break,
                    }
                }
                Ok(Some(out))
            }
        }
    }

    fn read_byte_peek(&mut self) -> io::Result<bool> {
        // `read(0)` is defined to probe for EOF without consuming a byte;
        // cheap enough here to just attempt a zero-length read semantics
        // via a one-byte buffered check is not available on plain
        // `File`, so approximate with `stream_position`/`seek` for files.
        match self {
            LuaFile::File(f) => {
                let pos = f.stream_position()?;
                let len = f.metadata()?.len();
                Ok(pos < len)
            }
            _ => Ok(true),
        }
    }

    pub fn seek(&mut self, whence: &str, offset: i64) -> io::Result<u64> {
        let pos = match whence {
            "set" => SeekFrom::Start(offset as u64),
            "cur" => SeekFrom::Current(offset),
            "end" => SeekFrom::End(offset),
            other => return Err(io::Error::new(io::ErrorKind::InvalidInput, format!("invalid option '{other}'"))),
        };
        match self {
            LuaFile::File(f) => f.seek(pos),
            _ => Err(io::Error::new(io::ErrorKind::Other, "cannot seek on this file")),
        }
    }
}
