use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::binder::{deref, init};
use crate::error::{Error, ErrorKind, Result};
use crate::nav::Frame;
use crate::parser::Parser;
use crate::target::{FieldMeta, Slot, Target};
use crate::tokenizer::Source;

/// Read configuration from a string into a fresh `T`.
///
/// Errors are reported against the file name `config`.
pub fn from_str<T>(text: &str) -> Result<T>
where
    T: Target + Send,
{
    let mut value = T::fresh();
    Config::from_text("config", text).unmarshal(&mut value)?;
    Ok(value)
}

/// Read configuration from a file into a fresh `T`.
pub fn from_file<T>(path: impl AsRef<Path>) -> Result<T>
where
    T: Target + Send,
{
    let mut value = T::fresh();
    Config::new(path).unmarshal(&mut value)?;
    Ok(value)
}

enum Origin {
    File(PathBuf),
    Text { name: String, text: String },
}

impl Origin {
    fn open(&self) -> Result<Source> {
        match self {
            Origin::File(path) => Source::open(path),
            Origin::Text { name, text } => Ok(Source::from_text(name.as_str(), text.as_str())),
        }
    }
}

pub(crate) struct DirectiveEntry<'a> {
    target: &'a mut (dyn Target + Send),
    used: bool,
}

/// The roots a parse writes into.
#[derive(Default)]
pub(crate) struct Registry<'a> {
    entry: Option<&'a mut (dyn Target + Send)>,
    directives: HashMap<String, DirectiveEntry<'a>>,
}

impl<'a> Registry<'a> {
    /// Where a path starts: a directive's target if the path starts with
    /// one, else the entry.
    pub fn root(&mut self, first: Option<&Frame>) -> Result<&mut dyn Target> {
        if let Some(Frame::Directive(name)) = first {
            return match self.directives.get_mut(name) {
                Some(d) => {
                    let target: &mut dyn Target = &mut *d.target;
                    Ok(target)
                }
                None => Err(Error::new(
                    ErrorKind::Syntax,
                    format!("unknown directive `{}`", name),
                )),
            };
        }
        match self.entry {
            Some(ref mut entry) => {
                let target: &mut dyn Target = &mut **entry;
                Ok(target)
            }
            None => Err(Error::new(ErrorKind::Registration, "no entry registered")),
        }
    }

    /// Field `name` of the entry, if the entry is a struct that has it.
    pub fn entry_field(&mut self, name: &str) -> Result<Option<&'static FieldMeta>> {
        let entry = match self.entry {
            Some(ref mut entry) => &mut **entry,
            None => return Ok(None),
        };
        let target = deref(entry)?;
        Ok(match target.slot() {
            Slot::Struct(section) => section.field(name).map(|f| f.meta),
            _ => None,
        })
    }

    /// Mark directive `name` as used. False if there is no such directive.
    pub fn use_directive(&mut self, name: &str) -> bool {
        match self.directives.get_mut(name) {
            Some(d) => {
                d.used = true;
                true
            }
            None => false,
        }
    }
}

/// Configuration parser.
///
/// Register an entry (the root of the configuration) and optionally
/// named directives, then call [`parse`](Config::parse). The targets
/// stay borrowed for the lifetime of the `Config`.
///
/// ```
/// use confbind::{Config, Section};
///
/// #[derive(Default, Section)]
/// struct Main {
///     worker_processes: u32,
///     user: String,
/// }
///
/// #[derive(Default, Section)]
/// struct Log {
///     level: String,
/// }
///
/// let mut main = Main::default();
/// let mut log = Log::default();
/// let cfg = Config::from_text("example.conf", "
///     worker_processes 4;
///     user nobody;
///     log { level debug; }
/// ");
/// cfg.entry(&mut main).unwrap();
/// cfg.directive("log", &mut log).unwrap();
/// cfg.parse().unwrap();
/// assert!(cfg.directive_used("log"));
/// drop(cfg);
///
/// assert_eq!(main.worker_processes, 4);
/// assert_eq!(log.level, "debug");
/// ```
pub struct Config<'a> {
    origin: Origin,
    camel: bool,
    max_include_depth: usize,
    registry: Mutex<Registry<'a>>,
}

impl<'a> Config<'a> {
    /// Parser for the file at `path`. The file is opened by `parse`.
    pub fn new(path: impl AsRef<Path>) -> Config<'a> {
        Builder::new().from_file(path)
    }

    /// Parser for in-memory text. `name` is used in error messages.
    pub fn from_text(name: impl Into<String>, text: impl Into<String>) -> Config<'a> {
        Builder::new().from_text(name, text)
    }

    /// Map `max_size` to field `MaxSize` (the default), instead of `Max_size`.
    pub fn auto_camel(&mut self, enable: bool) -> &mut Self {
        self.camel = enable;
        self
    }

    fn registry(&self) -> MutexGuard<'_, Registry<'a>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the root target. Can only be done once.
    pub fn entry<T>(&self, target: &'a mut T) -> Result<()>
    where
        T: Target + Send,
    {
        let mut reg = self.registry();
        if reg.entry.is_some() {
            return Err(Error::new(ErrorKind::Registration, "entry already set"));
        }
        init(&mut *target)?;
        reg.entry = Some(target);
        Ok(())
    }

    /// Register an independent root for top-level directive `name`.
    pub fn directive<T>(&self, name: impl Into<String>, target: &'a mut T) -> Result<()>
    where
        T: Target + Send,
    {
        let name = name.into();
        let mut reg = self.registry();
        if reg.directives.contains_key(&name) {
            return Err(Error::new(
                ErrorKind::Registration,
                format!("directive `{}` already registered", name),
            ));
        }
        debug!("register directive {}", name);
        reg.directives.insert(name, DirectiveEntry { target, used: false });
        Ok(())
    }

    /// Whether the last parse saw directive `name`.
    pub fn directive_used(&self, name: &str) -> bool {
        self.registry()
            .directives
            .get(name)
            .map_or(false, |d| d.used)
    }

    /// Set `target` as the entry and parse.
    pub fn unmarshal<T>(&self, target: &'a mut T) -> Result<()>
    where
        T: Target + Send,
    {
        self.entry(target)?;
        self.parse()
    }

    /// Parse the configuration into the registered targets.
    pub fn parse(&self) -> Result<()> {
        let mut reg = self.registry();
        for d in reg.directives.values_mut() {
            d.used = false;
        }
        let source = self.origin.open()?;
        let mut parser = Parser::new(&mut reg, source);
        parser.camel = self.camel;
        parser.max_include_depth = self.max_include_depth;
        parser.run()
    }

    /// Parse again, into the same targets. Values that the configuration
    /// no longer sets keep what they had.
    pub fn reload(&self) -> Result<()> {
        debug!("reload");
        self.parse()
    }
}

/// Builder for [`Config`].
#[derive(Debug, Clone)]
pub struct Builder {
    camel: bool,
    max_include_depth: usize,
}

impl Default for Builder {
    fn default() -> Builder {
        Builder {
            camel: true,
            max_include_depth: 100,
        }
    }
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    pub fn auto_camel(mut self, enable: bool) -> Builder {
        self.camel = enable;
        self
    }

    /// Maximum nesting of `include`.
    pub fn max_include_depth(mut self, depth: usize) -> Builder {
        self.max_include_depth = depth;
        self
    }

    pub fn from_file<'a>(self, path: impl AsRef<Path>) -> Config<'a> {
        self.build(Origin::File(path.as_ref().to_path_buf()))
    }

    pub fn from_text<'a>(self, name: impl Into<String>, text: impl Into<String>) -> Config<'a> {
        self.build(Origin::Text {
            name: name.into(),
            text: text.into(),
        })
    }

    fn build<'a>(self, origin: Origin) -> Config<'a> {
        Config {
            origin,
            camel: self.camel,
            max_include_depth: self.max_include_depth,
            registry: Mutex::new(Registry::default()),
        }
    }
}
