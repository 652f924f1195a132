//! Lexical errors, carrying exact source position (spec.md §4.1/§7.1):
//! golden-string tests depend on exact wording like `'\xAG'`, `'\u{11'`,
//! `<eof>`.

use std::fmt;

#[derive(Debug, Clone)]
pub struct LexError {
    pub message: String,
    pub line: u32,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.line, self.message)
    }
}

impl std::error::Error for LexError {}
