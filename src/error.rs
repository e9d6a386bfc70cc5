use std::fmt;
use std::io;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// What went wrong.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A file could not be opened or read.
    Io,
    /// Malformed input: unbalanced blocks, unknown directives, bad quoting, ...
    Syntax,
    /// A map entry did not consist of exactly a key and a value.
    Arity,
    /// The target slot cannot hold this kind of value.
    Type,
    /// A number does not fit in the target type.
    Range,
    /// A scalar literal could not be parsed.
    Value,
    /// A `format` converter rejected the value.
    Conversion,
    /// A `hook` rejected the value.
    Validation,
    /// An initializer failed.
    Init,
    /// Entry or directive registration failed.
    Registration,
    /// Includes nested too deeply.
    RecursionLimit,
    /// The `unique` hook found the same value twice.
    Duplicate,
}

#[derive(Clone, Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub msg: String,
    pub file_name: String,
    pub line: u32,
}

impl Error {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Error {
        Error {
            kind,
            msg: msg.into(),
            file_name: String::new(),
            line: 0,
        }
    }

    pub(crate) fn io(name: &str, err: io::Error) -> Error {
        Error::new(ErrorKind::Io, format!("{}: {}", name, err))
    }

    // Attach a location, unless the error already carries one
    // (errors from inside an included file keep that file's position).
    pub(crate) fn located(mut self, file_name: &str, line: u32) -> Error {
        if self.line == 0 {
            self.file_name = file_name.to_string();
            self.line = line;
        }
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "{}", self.msg)
        } else {
            write!(f, "{} in {}:{}", self.msg, self.file_name, self.line)
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_with_location() {
        let e = Error::new(ErrorKind::Syntax, "unknown directive `foo`").located("app.conf", 7);
        assert_eq!(e.to_string(), "unknown directive `foo` in app.conf:7");
    }

    #[test]
    fn inner_location_wins() {
        let e = Error::new(ErrorKind::Range, "value overflow")
            .located("inc/a.conf", 2)
            .located("main.conf", 10);
        assert_eq!(e.file_name, "inc/a.conf");
        assert_eq!(e.line, 2);
    }

    #[test]
    fn display_without_location() {
        let e = Error::new(ErrorKind::Registration, "directive `x` already registered");
        assert_eq!(e.to_string(), "directive `x` already registered");
    }
}
