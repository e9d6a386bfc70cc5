//! The typed view the parser uses to write into a caller's configuration.
//!
//! Every bindable type implements [`Target`]. A target reports its
//! [`Kind`] and hands out a [`Slot`], a mutable view the binder
//! dispatches on. Structs get their implementation from
//! `#[derive(Section)]`.
use std::any::{self, Any};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::de::{value, DeserializeOwned, IntoDeserializer};

/// The shape of a target.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Kind {
    String,
    Signed,
    Unsigned,
    Float,
    Bool,
    Struct,
    Pointer,
    Slice,
    Map,
    Custom,
    Opaque,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::String => "string",
            Kind::Signed => "signed integer",
            Kind::Unsigned => "unsigned integer",
            Kind::Float => "float",
            Kind::Bool => "bool",
            Kind::Struct => "struct",
            Kind::Pointer => "pointer",
            Kind::Slice => "slice",
            Kind::Map => "map",
            Kind::Custom => "custom",
            Kind::Opaque => "opaque",
        };
        f.write_str(s)
    }
}

/// Mutable view of a target, by kind.
pub enum Slot<'a> {
    String(&'a mut String),
    Signed(&'a mut dyn SignedSlot),
    Unsigned(&'a mut dyn UnsignedSlot),
    Float(&'a mut dyn FloatSlot),
    Bool(&'a mut bool),
    Struct(&'a mut dyn Section),
    Pointer(&'a mut dyn PointerSlot),
    Slice(&'a mut dyn SliceSlot),
    Map(&'a mut dyn MapSlot),
    Custom(&'a mut dyn TextSlot),
    /// Can only be assigned through a `format` converter.
    Opaque,
}

/// Type-erased helpers every target gets for free.
pub trait AsAny: Any {
    /// Name of the concrete type, for error messages.
    fn value_type_name(&self) -> &'static str;
    /// Overwrite `self` with `value` if it holds the same type.
    fn set_any(&mut self, value: Box<dyn Any>) -> Result<(), Box<dyn Any>>;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Any> AsAny for T {
    fn value_type_name(&self) -> &'static str {
        any::type_name::<T>()
    }

    fn set_any(&mut self, value: Box<dyn Any>) -> Result<(), Box<dyn Any>> {
        *self = *value.downcast::<T>()?;
        Ok(())
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Something the parser can bind configuration text into.
pub trait Target: AsAny {
    /// The empty value new list elements, map entries and allocated
    /// pointers start from.
    fn fresh() -> Self
    where
        Self: Sized;
    fn kind(&self) -> Kind;
    fn slot(&mut self) -> Slot<'_>;
}

pub trait SignedSlot {
    fn get(&self) -> i64;
    /// Returns false if `v` does not fit.
    fn set(&mut self, v: i64) -> bool;
}

pub trait UnsignedSlot {
    fn get(&self) -> u64;
    /// Returns false if `v` does not fit.
    fn set(&mut self, v: u64) -> bool;
}

pub trait FloatSlot {
    fn get(&self) -> f64;
    /// Returns false if `v` does not fit.
    fn set(&mut self, v: f64) -> bool;
}

/// Option-like indirection that is allocated on first write.
pub trait PointerSlot {
    fn get_mut(&mut self) -> Option<&mut dyn Target>;
    /// Returns the pointee, and whether it was just allocated.
    fn get_or_alloc(&mut self) -> (&mut dyn Target, bool);
}

pub trait SliceSlot {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn get_mut(&mut self, idx: usize) -> Option<&mut dyn Target>;
    /// Append a fresh element and return it.
    fn push_fresh(&mut self) -> &mut dyn Target;
}

pub trait MapSlot {
    fn new_key(&self) -> Box<dyn Target>;
    fn new_value(&self) -> Box<dyn Target>;
    /// Insert a key and value created by `new_key` and `new_value`.
    fn insert(&mut self, key: Box<dyn Target>, value: Box<dyn Target>) -> Result<(), String>;
}

/// A leaf value that parses itself from a single token.
pub trait TextSlot {
    fn set_text(&mut self, text: &str) -> Result<(), String>;
    /// Textual form, used to compare values (see the `unique` hook).
    fn text(&self) -> Option<String> {
        None
    }
}

/// Static per-field information, generated by `#[derive(Section)]`.
#[derive(Debug)]
pub struct FieldMeta {
    /// Canonical (CamelCase) field name.
    pub name: &'static str,
    pub format: Option<&'static str>,
    pub hook: Option<&'static str>,
    pub init: Option<&'static str>,
}

/// A struct field handed out by [`Section::field`].
pub struct Field<'a> {
    pub target: &'a mut dyn Target,
    pub meta: &'static FieldMeta,
}

/// Result of a `format` converter: the converted value, boxed.
pub type Converted = Result<Box<dyn Any>, String>;

/// A struct with named fields. Implemented by `#[derive(Section)]`.
pub trait Section {
    fn type_name(&self) -> &'static str;

    /// Look up a field by its canonical name.
    fn field(&mut self, name: &str) -> Option<Field<'_>>;

    /// All fields, in declaration order.
    fn fields(&mut self) -> Vec<Field<'_>>;

    /// Assign the fields that carry an `init` annotation from their factories.
    fn init_fields(&mut self) {}

    /// Initializer. `None` means the type has none.
    fn init(&mut self) -> Option<Result<(), String>> {
        None
    }

    /// Named `format` converter. `None` means not found here.
    fn format(&self, _name: &str, _text: &str) -> Option<Converted> {
        None
    }

    /// Named `hook` validator. `None` means not found here.
    fn hook(&self, _name: &str, _text: &str) -> Option<Result<(), String>> {
        None
    }
}

/// Per-type initializer, converters and hooks.
///
/// Enable with `#[conf(callbacks)]` on a struct deriving `Section`,
/// then implement the methods you need. Names arrive as written
/// in the field annotation.
///
/// ```
/// use confbind::{Callbacks, Converted, Section};
///
/// #[derive(Default, Section)]
/// #[conf(callbacks)]
/// struct Worker {
///     #[conf(format = "percent")]
///     load: f64,
/// }
///
/// impl Callbacks for Worker {
///     fn format(&self, name: &str, text: &str) -> Option<Converted> {
///         match name {
///             "percent" => Some(match text.trim_end_matches('%').parse::<f64>() {
///                 Ok(v) => Ok(Box::new(v / 100.0) as Box<dyn std::any::Any>),
///                 Err(e) => Err(e.to_string()),
///             }),
///             _ => None,
///         }
///     }
/// }
/// ```
pub trait Callbacks {
    fn init(&mut self) -> Option<Result<(), String>> {
        None
    }

    fn format(&self, _name: &str, _text: &str) -> Option<Converted> {
        None
    }

    fn hook(&self, _name: &str, _text: &str) -> Option<Result<(), String>> {
        None
    }
}

macro_rules! signed {
    ( $($t:ty),* ) => {
        $(
            impl Target for $t {
                fn fresh() -> $t {
                    0
                }
                fn kind(&self) -> Kind {
                    Kind::Signed
                }
                fn slot(&mut self) -> Slot<'_> {
                    Slot::Signed(self)
                }
            }

            impl SignedSlot for $t {
                fn get(&self) -> i64 {
                    *self as i64
                }
                fn set(&mut self, v: i64) -> bool {
                    match <$t>::try_from(v) {
                        Ok(v) => {
                            *self = v;
                            true
                        }
                        Err(_) => false,
                    }
                }
            }
        )*
    };
}

macro_rules! unsigned {
    ( $($t:ty),* ) => {
        $(
            impl Target for $t {
                fn fresh() -> $t {
                    0
                }
                fn kind(&self) -> Kind {
                    Kind::Unsigned
                }
                fn slot(&mut self) -> Slot<'_> {
                    Slot::Unsigned(self)
                }
            }

            impl UnsignedSlot for $t {
                fn get(&self) -> u64 {
                    *self as u64
                }
                fn set(&mut self, v: u64) -> bool {
                    match <$t>::try_from(v) {
                        Ok(v) => {
                            *self = v;
                            true
                        }
                        Err(_) => false,
                    }
                }
            }
        )*
    };
}

signed!(i8, i16, i32, i64, isize);
unsigned!(u8, u16, u32, u64, usize);

impl Target for f64 {
    fn fresh() -> f64 {
        0.0
    }
    fn kind(&self) -> Kind {
        Kind::Float
    }
    fn slot(&mut self) -> Slot<'_> {
        Slot::Float(self)
    }
}

impl FloatSlot for f64 {
    fn get(&self) -> f64 {
        *self
    }
    fn set(&mut self, v: f64) -> bool {
        *self = v;
        true
    }
}

impl Target for f32 {
    fn fresh() -> f32 {
        0.0
    }
    fn kind(&self) -> Kind {
        Kind::Float
    }
    fn slot(&mut self) -> Slot<'_> {
        Slot::Float(self)
    }
}

impl FloatSlot for f32 {
    fn get(&self) -> f64 {
        *self as f64
    }
    fn set(&mut self, v: f64) -> bool {
        if v.is_finite() && v.abs() > f32::MAX as f64 {
            return false;
        }
        *self = v as f32;
        true
    }
}

impl Target for bool {
    fn fresh() -> bool {
        false
    }
    fn kind(&self) -> Kind {
        Kind::Bool
    }
    fn slot(&mut self) -> Slot<'_> {
        Slot::Bool(self)
    }
}

impl Target for String {
    fn fresh() -> String {
        String::new()
    }
    fn kind(&self) -> Kind {
        Kind::String
    }
    fn slot(&mut self) -> Slot<'_> {
        Slot::String(self)
    }
}

impl<T: Target> Target for Option<T> {
    fn fresh() -> Option<T> {
        None
    }
    fn kind(&self) -> Kind {
        Kind::Pointer
    }
    fn slot(&mut self) -> Slot<'_> {
        Slot::Pointer(self)
    }
}

impl<T: Target> PointerSlot for Option<T> {
    fn get_mut(&mut self) -> Option<&mut dyn Target> {
        self.as_mut().map(|v| v as &mut dyn Target)
    }

    fn get_or_alloc(&mut self) -> (&mut dyn Target, bool) {
        let fresh = self.is_none();
        let value: &mut dyn Target = self.get_or_insert_with(T::fresh);
        (value, fresh)
    }
}

impl<T: Target> Target for Box<T> {
    fn fresh() -> Box<T> {
        Box::new(T::fresh())
    }
    fn kind(&self) -> Kind {
        Kind::Pointer
    }
    fn slot(&mut self) -> Slot<'_> {
        Slot::Pointer(self)
    }
}

impl<T: Target> PointerSlot for Box<T> {
    fn get_mut(&mut self) -> Option<&mut dyn Target> {
        Some(&mut **self)
    }

    fn get_or_alloc(&mut self) -> (&mut dyn Target, bool) {
        let value: &mut dyn Target = &mut **self;
        (value, false)
    }
}

impl<T: Target> Target for Vec<T> {
    fn fresh() -> Vec<T> {
        Vec::new()
    }
    fn kind(&self) -> Kind {
        Kind::Slice
    }
    fn slot(&mut self) -> Slot<'_> {
        Slot::Slice(self)
    }
}

impl<T: Target> SliceSlot for Vec<T> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn get_mut(&mut self, idx: usize) -> Option<&mut dyn Target> {
        self.as_mut_slice().get_mut(idx).map(|v| v as &mut dyn Target)
    }

    fn push_fresh(&mut self) -> &mut dyn Target {
        self.push(T::fresh());
        let idx = Vec::len(self) - 1;
        &mut self[idx]
    }
}

// Unbox a key or value that was created by `new_key` / `new_value`.
fn unbox<T: Any>(target: Box<dyn Target>, what: &str) -> Result<T, String> {
    let name = (*target).value_type_name();
    target
        .into_any()
        .downcast::<T>()
        .map(|v| *v)
        .map_err(|_| format!("map {} has type {}, expected {}", what, name, any::type_name::<T>()))
}

impl<K, V, S> Target for HashMap<K, V, S>
where
    K: Target + Eq + Hash,
    V: Target,
    S: BuildHasher + Default + 'static,
{
    fn fresh() -> Self {
        HashMap::with_hasher(S::default())
    }
    fn kind(&self) -> Kind {
        Kind::Map
    }
    fn slot(&mut self) -> Slot<'_> {
        Slot::Map(self)
    }
}

impl<K, V, S> MapSlot for HashMap<K, V, S>
where
    K: Target + Eq + Hash,
    V: Target,
    S: BuildHasher + Default + 'static,
{
    fn new_key(&self) -> Box<dyn Target> {
        Box::new(K::fresh())
    }

    fn new_value(&self) -> Box<dyn Target> {
        Box::new(V::fresh())
    }

    fn insert(&mut self, key: Box<dyn Target>, value: Box<dyn Target>) -> Result<(), String> {
        let key = unbox::<K>(key, "key")?;
        let value = unbox::<V>(value, "value")?;
        HashMap::insert(self, key, value);
        Ok(())
    }
}

impl<K, V> Target for BTreeMap<K, V>
where
    K: Target + Ord,
    V: Target,
{
    fn fresh() -> Self {
        BTreeMap::new()
    }
    fn kind(&self) -> Kind {
        Kind::Map
    }
    fn slot(&mut self) -> Slot<'_> {
        Slot::Map(self)
    }
}

impl<K, V> MapSlot for BTreeMap<K, V>
where
    K: Target + Ord,
    V: Target,
{
    fn new_key(&self) -> Box<dyn Target> {
        Box::new(K::fresh())
    }

    fn new_value(&self) -> Box<dyn Target> {
        Box::new(V::fresh())
    }

    fn insert(&mut self, key: Box<dyn Target>, value: Box<dyn Target>) -> Result<(), String> {
        let key = unbox::<K>(key, "key")?;
        let value = unbox::<V>(value, "value")?;
        BTreeMap::insert(self, key, value);
        Ok(())
    }
}

macro_rules! from_str_target {
    ( $($t:ty => $fresh:expr),* ) => {
        $(
            impl Target for $t {
                fn fresh() -> $t {
                    $fresh
                }
                fn kind(&self) -> Kind {
                    Kind::Custom
                }
                fn slot(&mut self) -> Slot<'_> {
                    Slot::Custom(self)
                }
            }

            impl TextSlot for $t {
                fn set_text(&mut self, text: &str) -> Result<(), String> {
                    *self = <$t>::from_str(text).map_err(|e| e.to_string())?;
                    Ok(())
                }
                fn text(&self) -> Option<String> {
                    Some(self.to_string())
                }
            }
        )*
    };
}
from_str_target!(
    IpAddr => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
    Ipv4Addr => Ipv4Addr::UNSPECIFIED,
    Ipv6Addr => Ipv6Addr::UNSPECIFIED,
    SocketAddr => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
);

impl Target for PathBuf {
    fn fresh() -> PathBuf {
        PathBuf::new()
    }
    fn kind(&self) -> Kind {
        Kind::Custom
    }
    fn slot(&mut self) -> Slot<'_> {
        Slot::Custom(self)
    }
}

impl TextSlot for PathBuf {
    fn set_text(&mut self, text: &str) -> Result<(), String> {
        *self = PathBuf::from(text);
        Ok(())
    }
    fn text(&self) -> Option<String> {
        Some(self.to_string_lossy().into_owned())
    }
}

impl Target for Duration {
    fn fresh() -> Duration {
        Duration::ZERO
    }
    fn kind(&self) -> Kind {
        Kind::Custom
    }
    fn slot(&mut self) -> Slot<'_> {
        Slot::Custom(self)
    }
}

impl TextSlot for Duration {
    fn set_text(&mut self, text: &str) -> Result<(), String> {
        *self = crate::format::time(text)?;
        Ok(())
    }
    fn text(&self) -> Option<String> {
        Some(format!("{}ns", self.as_nanos()))
    }
}

/// Deserialize a value from a single configuration token through serde.
///
/// Used by [`deserialize_target!`](crate::deserialize_target).
pub fn from_token<T: DeserializeOwned>(text: &str) -> Result<T, String> {
    let de: value::StrDeserializer<'_, value::Error> = text.into_deserializer();
    T::deserialize(de).map_err(|e| e.to_string())
}

/// Make serde `Deserialize` types bindable from a single token.
///
/// A type without a `Default` impl names its fresh value: `T => expr`.
///
/// ```
/// use serde::Deserialize;
///
/// #[derive(Debug, Default, PartialEq, Deserialize)]
/// #[serde(rename_all = "lowercase")]
/// enum Level {
///     #[default]
///     Info,
///     Debug,
/// }
/// confbind::deserialize_target!(Level);
/// ```
#[macro_export]
macro_rules! deserialize_target {
    ( $($t:ty => $fresh:expr),* $(,)? ) => {
        $(
            impl $crate::Target for $t {
                fn fresh() -> $t {
                    $fresh
                }
                fn kind(&self) -> $crate::Kind {
                    $crate::Kind::Custom
                }
                fn slot(&mut self) -> $crate::Slot<'_> {
                    $crate::Slot::Custom(self)
                }
            }

            impl $crate::TextSlot for $t {
                fn set_text(&mut self, text: &str) -> ::std::result::Result<(), ::std::string::String> {
                    *self = $crate::from_token::<$t>(text)?;
                    Ok(())
                }
            }
        )*
    };
    ( $($t:ty),* $(,)? ) => {
        $crate::deserialize_target!($($t => ::std::default::Default::default()),*);
    };
}

/// Declare types that can only be assigned through a `format` converter.
#[macro_export]
macro_rules! opaque_target {
    ( $($t:ty => $fresh:expr),* $(,)? ) => {
        $(
            impl $crate::Target for $t {
                fn fresh() -> $t {
                    $fresh
                }
                fn kind(&self) -> $crate::Kind {
                    $crate::Kind::Opaque
                }
                fn slot(&mut self) -> $crate::Slot<'_> {
                    $crate::Slot::Opaque
                }
            }
        )*
    };
    ( $($t:ty),* $(,)? ) => {
        $crate::opaque_target!($($t => ::std::default::Default::default()),*);
    };
}
