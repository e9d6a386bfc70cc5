use std::num::IntErrorKind;

use log::trace;

use crate::error::{Error, ErrorKind, Result};
use crate::target::{Kind, Section, Slot, Target};
use crate::tokenizer::{clear_quoted, split_quoted};

/// Assign `text` to `target`, dispatching on its kind.
///
/// Pointers are followed (and allocated if empty) first. Slices get one
/// element per field of `text`; maps need exactly a key and a value.
pub(crate) fn bind(target: &mut dyn Target, text: &str) -> Result<()> {
    let target = deref(target)?;
    let text = text.trim();
    let type_name = (*target).value_type_name();
    trace!("bind {} <- {:?}", target.kind(), text);

    match target.slot() {
        Slot::String(s) => *s = clear_quoted(text).into_owned(),
        Slot::Signed(v) => {
            let n = text.parse::<i64>().map_err(|e| match e.kind() {
                IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => overflow(text),
                _ => invalid(text, "integer"),
            })?;
            if !v.set(n) {
                return Err(overflow(text));
            }
        }
        Slot::Unsigned(v) => {
            let n = text.parse::<u64>().map_err(|e| match e.kind() {
                IntErrorKind::PosOverflow => overflow(text),
                _ => invalid(text, "unsigned integer"),
            })?;
            if !v.set(n) {
                return Err(overflow(text));
            }
        }
        Slot::Float(v) => {
            let n = text.parse::<f64>().map_err(|_| invalid(text, "float"))?;
            if n.is_infinite() && !is_inf_literal(text) {
                return Err(overflow(text));
            }
            if !v.set(n) {
                return Err(overflow(text));
            }
        }
        Slot::Bool(v) => *v = parse_bool(text)?,
        Slot::Slice(list) => {
            for field in split_quoted(text)? {
                let elem = list.push_fresh();
                init(&mut *elem)?;
                bind(elem, &field)?;
            }
        }
        Slot::Map(map) => {
            let fields = split_quoted(text)?;
            if fields.len() != 2 {
                return Err(Error::new(
                    ErrorKind::Arity,
                    format!("invalid map entry `{}`: expected a key and a value", text),
                ));
            }
            let mut key = map.new_key();
            bind(key.as_mut(), &fields[0])?;
            let mut value = map.new_value();
            bind(value.as_mut(), &fields[1])?;
            map.insert(key, value)
                .map_err(|e| Error::new(ErrorKind::Type, e))?;
        }
        Slot::Custom(v) => {
            v.set_text(&clear_quoted(text))
                .map_err(|e| Error::new(ErrorKind::Value, format!("invalid value `{}`: {}", text, e)))?;
        }
        Slot::Struct(_) => {
            return Err(Error::new(ErrorKind::Type, "invalid block, start a block with '{'"));
        }
        Slot::Pointer(_) | Slot::Opaque => {
            return Err(Error::new(
                ErrorKind::Type,
                format!("unsupported type {}", type_name),
            ));
        }
    }
    Ok(())
}

fn overflow(text: &str) -> Error {
    Error::new(ErrorKind::Range, format!("value overflow: {}", text))
}

fn invalid(text: &str, what: &str) -> Error {
    Error::new(ErrorKind::Value, format!("invalid {} `{}`", what, text))
}

fn is_inf_literal(text: &str) -> bool {
    let t = text.trim_start_matches(|c| c == '+' || c == '-');
    t.eq_ignore_ascii_case("inf") || t.eq_ignore_ascii_case("infinity")
}

fn parse_bool(text: &str) -> Result<bool> {
    match text {
        "yes" | "on" => Ok(true),
        "no" | "off" => Ok(false),
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        _ => Err(invalid(text, "boolean")),
    }
}

/// Follow pointers down to the value, allocating empty ones.
/// Freshly allocated values are initialized.
pub(crate) fn deref(target: &mut dyn Target) -> Result<&mut dyn Target> {
    if target.kind() != Kind::Pointer {
        return Ok(target);
    }
    match target.slot() {
        Slot::Pointer(ptr) => {
            let (inner, fresh) = ptr.get_or_alloc();
            if fresh {
                init(&mut *inner)?;
            }
            deref(inner)
        }
        _ => Err(Error::new(ErrorKind::Type, "pointer target without a pointer slot")),
    }
}

/// Like `deref`, but never allocates.
pub(crate) fn peek(target: &mut dyn Target) -> Option<&mut dyn Target> {
    if target.kind() != Kind::Pointer {
        return Some(target);
    }
    match target.slot() {
        Slot::Pointer(ptr) => ptr.get_mut().and_then(peek),
        _ => None,
    }
}

/// Textual form of a scalar value, for comparisons.
pub(crate) fn display(target: &mut dyn Target) -> Option<String> {
    let target = peek(target)?;
    match target.slot() {
        Slot::String(s) => Some(s.clone()),
        Slot::Signed(v) => Some(v.get().to_string()),
        Slot::Unsigned(v) => Some(v.get().to_string()),
        Slot::Float(v) => Some(v.get().to_string()),
        Slot::Bool(v) => Some(v.to_string()),
        Slot::Custom(v) => v.text(),
        _ => None,
    }
}

/// Run initializers on a newly created value.
///
/// A struct with its own initializer gets only that. Otherwise nested
/// struct fields are initialized recursively and `init` annotated fields
/// are filled from their factories.
pub(crate) fn init(target: &mut dyn Target) -> Result<()> {
    match target.slot() {
        Slot::Struct(section) => init_section(section),
        Slot::Pointer(ptr) => match ptr.get_mut() {
            Some(inner) => init(inner),
            None => Ok(()),
        },
        Slot::Slice(list) => {
            for idx in 0..list.len() {
                if let Some(elem) = list.get_mut(idx) {
                    init(elem)?;
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn init_section(section: &mut dyn Section) -> Result<()> {
    if let Some(res) = section.init() {
        return res.map_err(|e| {
            Error::new(ErrorKind::Init, format!("init in {}: {}", section.type_name(), e))
        });
    }
    for field in section.fields() {
        if matches!(field.target.kind(), Kind::Struct | Kind::Pointer) {
            init(field.target)?;
        }
    }
    section.init_fields();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};
    use std::time::Duration;

    fn bound<T: Target>(text: &str) -> Result<T> {
        let mut v = T::fresh();
        bind(&mut v, text)?;
        Ok(v)
    }

    #[test]
    fn strings() {
        assert_eq!(bound::<String>("\"hello world\"").unwrap(), "hello world");
        assert_eq!(bound::<String>(r"'a\'b'").unwrap(), "a'b");
        assert_eq!(bound::<String>("  bare  ").unwrap(), "bare");
    }

    #[test]
    fn integer_width() {
        assert_eq!(bound::<u8>("255").unwrap(), 255);
        assert_eq!(bound::<u8>("300").unwrap_err().kind, ErrorKind::Range);
        assert_eq!(bound::<i8>("-129").unwrap_err().kind, ErrorKind::Range);
        assert_eq!(bound::<i64>("-9223372036854775808").unwrap(), i64::MIN);
        assert_eq!(bound::<u64>("18446744073709551616").unwrap_err().kind, ErrorKind::Range);
        assert_eq!(bound::<u32>("-1").unwrap_err().kind, ErrorKind::Value);
        assert_eq!(bound::<i32>("12x").unwrap_err().kind, ErrorKind::Value);
    }

    #[test]
    fn floats() {
        assert_eq!(bound::<f64>("2.5").unwrap(), 2.5);
        assert_eq!(bound::<f32>("1e39").unwrap_err().kind, ErrorKind::Range);
        assert_eq!(bound::<f64>("1e400").unwrap_err().kind, ErrorKind::Range);
        assert!(bound::<f64>("inf").unwrap().is_infinite());
    }

    #[test]
    fn bools() {
        for t in &["yes", "on", "true", "1", "T"] {
            assert!(bound::<bool>(t).unwrap(), "{}", t);
        }
        for f in &["no", "off", "false", "0", "F"] {
            assert!(!bound::<bool>(f).unwrap(), "{}", f);
        }
        assert_eq!(bound::<bool>("maybe").unwrap_err().kind, ErrorKind::Value);
    }

    #[test]
    fn slices_keep_order() {
        let v = bound::<Vec<String>>("a b c").unwrap();
        assert_eq!(v, vec!["a", "b", "c"]);
        let v = bound::<Vec<u16>>("80 443").unwrap();
        assert_eq!(v, vec![80, 443]);
        let v = bound::<Vec<String>>("'x y' z").unwrap();
        assert_eq!(v, vec!["x y", "z"]);
    }

    #[test]
    fn maps() {
        let m = bound::<HashMap<u32, u32>>("8 64").unwrap();
        assert_eq!(m.get(&8), Some(&64));
        let m = bound::<BTreeMap<String, String>>("'a b' c").unwrap();
        assert_eq!(m.get("a b").map(|s| s.as_str()), Some("c"));
        assert_eq!(bound::<HashMap<u32, u32>>("8 64 9").unwrap_err().kind, ErrorKind::Arity);
        assert_eq!(bound::<HashMap<u32, u32>>("8").unwrap_err().kind, ErrorKind::Arity);
    }

    #[test]
    fn pointers_allocate() {
        let v = bound::<Option<u32>>("7").unwrap();
        assert_eq!(v, Some(7));
        let v = bound::<Option<Box<String>>>("x").unwrap();
        assert_eq!(v.as_deref().map(|s| s.as_str()), Some("x"));
    }

    #[test]
    fn custom_values() {
        let d = bound::<Duration>("90s").unwrap();
        assert_eq!(d, Duration::from_secs(90));
        let a = bound::<std::net::IpAddr>("10.0.0.1").unwrap();
        assert_eq!(a.to_string(), "10.0.0.1");
        assert_eq!(bound::<std::net::IpAddr>("10.0.0").unwrap_err().kind, ErrorKind::Value);
    }

    #[test]
    fn containers_of_address_types() {
        let v = bound::<Vec<std::net::IpAddr>>("10.0.0.1 ::1").unwrap();
        assert_eq!(v.len(), 2);
        assert_eq!(v[1].to_string(), "::1");
        let a = bound::<Option<std::net::SocketAddr>>("127.0.0.1:8080").unwrap();
        assert_eq!(a.map(|a| a.port()), Some(8080));
        let m = bound::<BTreeMap<String, std::net::Ipv4Addr>>("gw 192.168.1.1").unwrap();
        assert_eq!(m["gw"].octets(), [192, 168, 1, 1]);
    }

    #[test]
    fn display_scalars() {
        let mut s = String::from("abc");
        assert_eq!(display(&mut s).as_deref(), Some("abc"));
        let mut n: Option<u8> = None;
        assert_eq!(display(&mut n), None);
        let mut n: Option<u8> = Some(3);
        assert_eq!(display(&mut n).as_deref(), Some("3"));
    }
}
