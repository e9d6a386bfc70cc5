//! Builtin `format` converters.
//!
//! A field annotated `#[conf(format = "bytesize")]` is filled by the
//! converter of that name, unless the enclosing struct provides its own
//! through [`Callbacks::format`](crate::Callbacks::format).
use std::any::Any;
use std::collections::HashMap;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::target::Converted;

type Converter = fn(&str) -> Converted;

fn boxed<T: Any>(r: Result<T, String>) -> Converted {
    r.map(|v| Box::new(v) as Box<dyn Any>)
}

// Keyed by CamelCase name, see `tokenizer::camelize`.
static BUILTIN: Lazy<HashMap<&'static str, Converter>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, Converter> = HashMap::new();
    m.insert("Bytesize", |s| boxed(bytesize(s)));
    m.insert("Time", |s| boxed(time(s)));
    m.insert("Duration", |s| boxed(time(s)));
    m.insert("FileMode", |s| boxed(file_mode(s)));
    m
});

pub(crate) fn builtin(name: &str) -> Option<Converter> {
    BUILTIN.get(name).copied()
}

/// Size with an optional `K`, `M`, `G` or `T` suffix (powers of 1024),
/// optionally followed by `B`.
///
/// ```
/// assert_eq!(confbind::format::bytesize("4k"), Ok(4096));
/// assert_eq!(confbind::format::bytesize("2MB"), Ok(2 * 1024 * 1024));
/// ```
pub fn bytesize(s: &str) -> Result<u64, String> {
    static RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^(?i)(\d+)\s*([kmgt])?b?$").expect("could not compile bytesize regexp")
    });
    let caps = RE
        .captures(s.trim())
        .ok_or_else(|| format!("invalid size `{}`", s))?;
    let v: u64 = caps[1].parse().map_err(|_| format!("size `{}` out of range", s))?;
    let shift = match caps.get(2).map(|m| m.as_str().to_ascii_uppercase()) {
        None => 0,
        Some(u) => match u.as_str() {
            "K" => 10,
            "M" => 20,
            "G" => 30,
            _ => 40,
        },
    };
    v.checked_mul(1u64 << shift)
        .ok_or_else(|| format!("size `{}` out of range", s))
}

/// Integer followed by a unit. No unit means seconds.
///
/// Units: `ns`, `us`/`µs`, `ms`, `s`, `min`, `h`, `d`/`day`, `w`/`week`,
/// `m`/`month` (31 days) and `y`/`year` (365 days).
pub fn time(s: &str) -> Result<Duration, String> {
    static RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^(\d+)(\D*)$").expect("could not compile time regexp"));
    let s = s.trim();
    let caps = RE.captures(s).ok_or_else(|| format!("invalid time `{}`", s))?;
    let v: u64 = caps[1].parse().map_err(|_| format!("time `{}` out of range", s))?;

    let secs = |mult: u64| {
        v.checked_mul(mult)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("time `{}` out of range", s))
    };
    match &caps[2] {
        "ns" => Ok(Duration::from_nanos(v)),
        "us" | "µs" => Ok(Duration::from_micros(v)),
        "ms" => Ok(Duration::from_millis(v)),
        "" | "s" | "S" => secs(1),
        "min" => secs(60),
        "h" | "H" => secs(3600),
        "d" | "D" | "day" => secs(86400),
        "w" | "W" | "week" => secs(604800),
        "m" | "M" | "month" => secs(2678400),
        "y" | "Y" | "year" => secs(31536000),
        unit => Err(format!("invalid time unit `{}`", unit)),
    }
}

/// Four octal digits, like `0644`. Returns the permission bits.
pub fn file_mode(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if s.len() != 4 || !s.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        return Err(format!("invalid file mode `{}`", s));
    }
    u32::from_str_radix(&s[1..], 8).map_err(|e| e.to_string())
}
