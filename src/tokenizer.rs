use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorKind, Result};

/// Lexer mode: collecting a directive name, or collecting its value.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum Mode {
    Key,
    Value,
}

/// A byte stream being parsed, with the name used in error messages.
pub(crate) struct Source {
    pub name: String,
    reader: Box<dyn BufRead>,
}

impl Source {
    pub fn open(path: &Path) -> Result<Source> {
        let name = path.to_string_lossy().to_string();
        let file = File::open(path).map_err(|e| Error::io(&name, e))?;
        Ok(Source {
            name,
            reader: Box::new(BufReader::new(file)),
        })
    }

    pub fn from_text(name: impl Into<String>, text: impl Into<String>) -> Source {
        Source {
            name: name.into(),
            reader: Box::new(Cursor::new(text.into().into_bytes())),
        }
    }

    /// Directory that relative includes are resolved against.
    pub fn dir(&self) -> PathBuf {
        Path::new(&self.name)
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_default()
    }

    pub fn next_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.reader.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::io(&self.name, e)),
            }
        }
    }

    /// Discard the rest of the line. Returns true if a newline was consumed.
    pub fn skip_line(&mut self) -> Result<bool> {
        let mut rest = Vec::new();
        self.reader
            .read_until(b'\n', &mut rest)
            .map_err(|e| Error::io(&self.name, e))?;
        Ok(rest.last() == Some(&b'\n'))
    }
}

pub(crate) fn is_space(b: u8) -> bool {
    b.is_ascii_whitespace() || b == 0x0b
}

// Bytes that may appear in a bare `$name`.
pub(crate) fn is_var_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Upper-case the first character.
pub(crate) fn title(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `max_size` -> `MaxSize`.
pub(crate) fn camelize(s: &str) -> String {
    s.split('_').map(title).collect()
}

/// Map a directive key to a canonical field name.
pub(crate) fn field_name(key: &str, camel: bool) -> String {
    if camel {
        camelize(key)
    } else {
        title(key)
    }
}

/// Strip one pair of matching surrounding quotes and resolve backslash
/// escapes, quoted or not, so `a\;b` reads as `a;b`.
pub(crate) fn clear_quoted(s: &str) -> Cow<'_, str> {
    let s = s.trim();
    let b = s.as_bytes();
    if b.len() >= 2 && (b[0] == b'"' || b[0] == b'\'') && b[b.len() - 1] == b[0] {
        return Cow::Owned(unescape(&s[1..s.len() - 1]));
    }
    if s.contains('\\') {
        return Cow::Owned(unescape(s));
    }
    Cow::Borrowed(s)
}

fn unescape(s: &str) -> String {
    let mut r = String::with_capacity(s.len());
    let mut escaped = false;
    for c in s.chars() {
        if !escaped && c == '\\' {
            escaped = true;
            continue;
        }
        escaped = false;
        r.push(c);
    }
    r
}

/// Split a value into whitespace separated fields. `"..."` and `'...'`
/// group text including whitespace, and a backslash always takes the
/// next character literally.
pub(crate) fn split_quoted(s: &str) -> Result<Vec<String>> {
    let mut fields = Vec::new();
    let mut cur = String::new();
    let mut in_field = false;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in s.trim().chars() {
        if escaped {
            escaped = false;
            cur.push(c);
            continue;
        }
        if c == '\\' {
            escaped = true;
            in_field = true;
            continue;
        }
        if let Some(q) = quote {
            if c == q {
                quote = None;
            } else {
                cur.push(c);
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                quote = Some(c);
                in_field = true;
            }
            c if c.is_whitespace() => {
                if in_field {
                    fields.push(std::mem::take(&mut cur));
                    in_field = false;
                }
            }
            c => {
                cur.push(c);
                in_field = true;
            }
        }
    }

    if escaped || quote.is_some() {
        return Err(Error::new(ErrorKind::Syntax, format!("invalid value: {}", s.trim())));
    }
    if in_field {
        fields.push(cur);
    }
    Ok(fields)
}
