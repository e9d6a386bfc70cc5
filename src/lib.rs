//! Parser for nginx-style configuration files that binds directly into
//! your own types.
//!
//! ```text
//! user www;
//! set root /srv/www;
//!
//! server {
//!     listen 80 443;
//!     root $root/site;     # variables are expanded in values
//!     timeout 30s;
//! }
//!
//! include conf.d/*.conf;
//! ```
//!
//! Types derive [`Section`](derive@Section) and are filled in place, without
//! an intermediate document tree:
//!
//! ```
//! use std::time::Duration;
//! use confbind::Section;
//!
//! #[derive(Debug, Default, Section)]
//! struct Main {
//!     user: String,
//!     server: Vec<Server>,
//! }
//!
//! #[derive(Debug, Default, Section)]
//! struct Server {
//!     listen: Vec<u16>,
//!     root: String,
//!     #[conf(format = "duration")]
//!     timeout: Duration,
//! }
//!
//! let text = "
//!     user www;
//!     set root /srv/www;
//!     server {
//!         listen 80 443;
//!         root $root/site;
//!         timeout 30s;
//!     }
//! ";
//! let main: Main = confbind::from_str(text).unwrap();
//! assert_eq!(main.server[0].listen, vec![80, 443]);
//! assert_eq!(main.server[0].root, "/srv/www/site");
//! assert_eq!(main.server[0].timeout, Duration::from_secs(30));
//! ```
extern crate self as confbind;

mod binder;
mod cfg;
mod error;
pub mod format;
mod hook;
mod nav;
mod parser;
mod scope;
mod stash;
mod target;
mod tokenizer;

pub use cfg::{from_file, from_str, Builder, Config};
pub use error::{Error, ErrorKind, Result};
pub use target::{
    from_token, AsAny, Callbacks, Converted, Field, FieldMeta, FloatSlot, Kind, MapSlot,
    PointerSlot, Section, SignedSlot, SliceSlot, Slot, Target, TextSlot, UnsignedSlot,
};

/// Derive [`Target`] and [`Section`](trait@Section) for a struct with named fields.
///
/// Field attributes:
///
/// - `#[conf(format = "name")]`: convert the value with a named converter,
///   see [`format`].
/// - `#[conf(hook = "name")]`: validate the value after it was assigned.
///   The builtin hook `unique` rejects a value that an earlier element
///   of the enclosing list already has.
/// - `#[conf(init = "method")]`: fill the field from `self.method()`
///   when the struct is created.
/// - `#[conf(skip)]`: not configurable. A fresh value takes `Default` for it.
///
/// On the struct, `#[conf(callbacks)]` uses the type's [`Callbacks`]
/// implementation for initialization and named converters and hooks.
/// `#[conf(default)]` makes [`Target::fresh`] return the type's `Default`
/// value instead of building it field by field.
pub use confbind_impl::Section;
