//! Valve Data Format parsing, both flavors Steam ships.
//!
//! # Text VDF
//!
//! `libraryfolders.vdf`, `appmanifest_*.acf`, and `loginusers.vdf` are
//! whitespace-separated documents of quoted key/value pairs and `{}` blocks,
//! with `//` line comments. Every leaf value is a string.
//!
//! # Binary VDF
//!
//! `shortcuts.vdf` and the per-app payloads inside `appinfo.vdf` are typed
//! trees. Each field starts with a one-byte type tag followed by a
//! NUL-terminated key:
//!
//! - `0x00` nested table, terminated by `0x08` (or `0x0B`)
//! - `0x01` NUL-terminated UTF-8 string
//! - `0x02` int32 LE (also `0x04` pointer, `0x06` color)
//! - `0x07` uint64 LE
//! - `0x03` float32 and `0x0A` int64 are skipped by their fixed width
//!
//! Tags with no known width fail only the table being parsed, so callers can
//! skip the enclosing record and keep going.

use std::collections::BTreeMap;
use thiserror::Error;

/// Parsed VDF tree. Keys keep their on-disk spelling; lookups that must
/// survive Steam's inconsistent casing go through [`get_ci`].
pub type VdfTable = BTreeMap<String, VdfValue>;

#[derive(Debug, Clone, PartialEq)]
pub enum VdfValue {
    Table(VdfTable),
    Text(String),
    Int(u32),
    Long(u64),
}

impl VdfValue {
    pub fn as_table(&self) -> Option<&VdfTable> {
        match self {
            VdfValue::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            VdfValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the value. Text leaves parse leniently so text-VDF
    /// documents, where every scalar is a string, still read as numbers.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            VdfValue::Int(v) => Some(u64::from(*v)),
            VdfValue::Long(v) => Some(*v),
            VdfValue::Text(s) => s.trim().parse().ok(),
            VdfValue::Table(_) => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            VdfValue::Int(v) => Some(*v),
            _ => self.as_u64().and_then(|v| u32::try_from(v).ok()),
        }
    }
}

/// Case-insensitive field lookup. Exact match wins when both spellings are
/// present.
pub fn get_ci<'a>(table: &'a VdfTable, key: &str) -> Option<&'a VdfValue> {
    table.get(key).or_else(|| {
        table
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

/// Walks nested tables case-insensitively; `None` if any step is missing or
/// not a table.
pub fn get_nested<'a>(table: &'a VdfTable, path: &[&str]) -> Option<&'a VdfValue> {
    let (first, rest) = path.split_first()?;
    let mut value = get_ci(table, first)?;
    for key in rest {
        value = get_ci(value.as_table()?, key)?;
    }
    Some(value)
}

#[derive(Debug, Error)]
pub enum VdfError {
    #[error("unexpected end of data at byte {0}")]
    UnexpectedEof(usize),

    #[error("unknown field type 0x{tag:02x} at byte {offset}")]
    UnknownType { tag: u8, offset: usize },

    #[error("line {line}: {reason}")]
    Syntax { line: usize, reason: String },
}

// Binary type tags.
const BIN_TABLE: u8 = 0x00;
const BIN_STRING: u8 = 0x01;
const BIN_INT32: u8 = 0x02;
const BIN_FLOAT32: u8 = 0x03;
const BIN_POINTER: u8 = 0x04;
const BIN_COLOR: u8 = 0x06;
const BIN_UINT64: u8 = 0x07;
const BIN_END: u8 = 0x08;
const BIN_INT64: u8 = 0x0A;
const BIN_END_ALT: u8 = 0x0B;

/// Parses a complete binary-VDF table from `buf`. Trailing bytes after the
/// closing end tag are ignored.
pub fn parse_binary(buf: &[u8]) -> Result<VdfTable, VdfError> {
    let mut cur = Cursor { buf, pos: 0 };
    read_table(&mut cur)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn read_u8(&mut self) -> Result<u8, VdfError> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or(VdfError::UnexpectedEof(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], VdfError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or(VdfError::UnexpectedEof(self.buf.len()))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, VdfError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u64(&mut self) -> Result<u64, VdfError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    /// NUL-terminated string. Decoded lossily: Steam writes whatever the
    /// user typed, and a bad byte must not sink the surrounding table.
    fn read_cstr(&mut self) -> Result<String, VdfError> {
        let start = self.pos;
        let nul = self.buf[start..]
            .iter()
            .position(|b| *b == 0)
            .ok_or(VdfError::UnexpectedEof(self.buf.len()))?;
        let raw = &self.buf[start..start + nul];
        self.pos = start + nul + 1;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }
}

fn read_table(cur: &mut Cursor) -> Result<VdfTable, VdfError> {
    let mut table = VdfTable::new();
    loop {
        let tag = cur.read_u8()?;
        if tag == BIN_END || tag == BIN_END_ALT {
            return Ok(table);
        }
        let tag_offset = cur.pos - 1;
        let key = cur.read_cstr()?;
        let value = match tag {
            BIN_TABLE => VdfValue::Table(read_table(cur)?),
            BIN_STRING => VdfValue::Text(cur.read_cstr()?),
            BIN_INT32 | BIN_POINTER | BIN_COLOR => VdfValue::Int(cur.read_u32()?),
            BIN_UINT64 => VdfValue::Long(cur.read_u64()?),
            BIN_FLOAT32 => {
                cur.take(4)?;
                continue;
            }
            BIN_INT64 => {
                cur.take(8)?;
                continue;
            }
            other => {
                return Err(VdfError::UnknownType {
                    tag: other,
                    offset: tag_offset,
                })
            }
        };
        table.insert(key, value);
    }
}

/// Parses a text-VDF document into its root table.
pub fn parse_text(input: &str) -> Result<VdfTable, VdfError> {
    let mut parser = TextParser {
        chars: input.chars().peekable(),
        line: 1,
    };
    let table = parser.parse_table(false)?;
    Ok(table)
}

enum Token {
    Open,
    Close,
    Str(String),
}

struct TextParser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
}

impl<'a> TextParser<'a> {
    fn syntax(&self, reason: impl Into<String>) -> VdfError {
        VdfError::Syntax {
            line: self.line,
            reason: reason.into(),
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c == Some('\n') {
            self.line += 1;
        }
        c
    }

    fn skip_ws_and_comments(&mut self) {
        loop {
            match self.chars.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') => {
                    // Only a // pair opens a comment; a lone slash belongs
                    // to an unquoted token.
                    let mut ahead = self.chars.clone();
                    ahead.next();
                    if ahead.peek() == Some(&'/') {
                        while let Some(c) = self.bump() {
                            if c == '\n' {
                                break;
                            }
                        }
                    } else {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, VdfError> {
        loop {
            self.skip_ws_and_comments();
            let first = match self.chars.peek() {
                Some(c) => *c,
                None => return Ok(None),
            };
            match first {
                '{' => {
                    self.bump();
                    return Ok(Some(Token::Open));
                }
                '}' => {
                    self.bump();
                    return Ok(Some(Token::Close));
                }
                '"' => {
                    self.bump();
                    return Ok(Some(Token::Str(self.read_quoted()?)));
                }
                // Platform conditionals like [$WIN32] gate lines we never
                // act on; drop the token and read the next one.
                '[' => {
                    while let Some(c) = self.bump() {
                        if c == ']' {
                            break;
                        }
                    }
                }
                _ => return Ok(Some(Token::Str(self.read_bare()))),
            }
        }
    }

    fn read_quoted(&mut self) -> Result<String, VdfError> {
        let mut out = String::new();
        loop {
            let c = self
                .bump()
                .ok_or_else(|| self.syntax("unterminated string"))?;
            match c {
                '"' => return Ok(out),
                '\\' => {
                    let esc = self
                        .bump()
                        .ok_or_else(|| self.syntax("unterminated escape"))?;
                    match esc {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '\\' => out.push('\\'),
                        '"' => out.push('"'),
                        other => out.push(other),
                    }
                }
                other => out.push(other),
            }
        }
    }

    fn read_bare(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.chars.peek() {
            if c.is_whitespace() || matches!(c, '{' | '}' | '"') {
                break;
            }
            out.push(*c);
            self.bump();
        }
        out
    }

    fn parse_table(&mut self, nested: bool) -> Result<VdfTable, VdfError> {
        let mut table = VdfTable::new();
        loop {
            let key = match self.next_token()? {
                None if nested => return Err(self.syntax("unexpected end of document")),
                None => return Ok(table),
                Some(Token::Close) if nested => return Ok(table),
                Some(Token::Close) => return Err(self.syntax("unbalanced '}'")),
                Some(Token::Open) => return Err(self.syntax("expected key before '{'")),
                Some(Token::Str(key)) => key,
            };
            match self.next_token()? {
                Some(Token::Open) => {
                    table.insert(key, VdfValue::Table(self.parse_table(true)?));
                }
                Some(Token::Str(value)) => {
                    table.insert(key, VdfValue::Text(value));
                }
                Some(Token::Close) | None => {
                    return Err(self.syntax(format!("key {:?} has no value", key)))
                }
            }
        }
    }
}

/// Test-only binary-VDF writers, shared by the reader fixtures.
#[cfg(test)]
pub(crate) mod testenc {
    pub fn open_table(buf: &mut Vec<u8>, key: &str) {
        buf.push(super::BIN_TABLE);
        push_cstr(buf, key);
    }

    pub fn close_table(buf: &mut Vec<u8>) {
        buf.push(super::BIN_END);
    }

    pub fn string_field(buf: &mut Vec<u8>, key: &str, value: &str) {
        buf.push(super::BIN_STRING);
        push_cstr(buf, key);
        push_cstr(buf, value);
    }

    pub fn int_field(buf: &mut Vec<u8>, key: &str, value: u32) {
        buf.push(super::BIN_INT32);
        push_cstr(buf, key);
        buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn long_field(buf: &mut Vec<u8>, key: &str, value: u64) {
        buf.push(super::BIN_UINT64);
        push_cstr(buf, key);
        buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn float_field(buf: &mut Vec<u8>, key: &str, value: f32) {
        buf.push(super::BIN_FLOAT32);
        push_cstr(buf, key);
        buf.extend_from_slice(&value.to_le_bytes());
    }

    fn push_cstr(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(s.as_bytes());
        buf.push(0);
    }
}
