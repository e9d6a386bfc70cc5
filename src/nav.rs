//! Navigation through the target tree.
//!
//! The parser never holds a reference into the caller's tree across
//! bytes. Instead it keeps a path of [`Frame`]s and walks it from the
//! root each time it needs the current slot.
use log::debug;

use crate::binder::{bind, deref, init};
use crate::cfg::Registry;
use crate::error::{Error, ErrorKind, Result};
use crate::parser::Parser;
use crate::target::{FieldMeta, Slot, Target};
use crate::tokenizer::{field_name, Mode};

/// One step of the path from the root to the current slot.
pub(crate) enum Frame {
    /// A struct field.
    Field {
        name: String,
        meta: &'static FieldMeta,
    },
    /// A top-level key that resolved to a registered directive.
    Directive(String),
    /// A slice element opened by a block.
    Element(usize),
    /// A map value under construction. It is not in the map until the
    /// block closes, so it is owned by the frame.
    MapValue(Box<dyn Target>),
}

/// What closing a block has to undo.
pub(crate) enum Block {
    Plain,
    Slice,
    /// Holds the already bound key of the pending map entry.
    Map(Box<dyn Target>),
}

fn lost() -> Error {
    Error::new(ErrorKind::Type, "configuration tree changed shape during parsing")
}

/// Resolve `nav` to a target, starting at the innermost map value under
/// construction, or else at the root.
pub(crate) fn walk<'t>(reg: &'t mut Registry<'_>, nav: &'t mut [Frame]) -> Result<&'t mut dyn Target> {
    let anchor = nav
        .iter()
        .rposition(|f| matches!(f, Frame::MapValue(_)))
        .map_or(0, |i| i + 1);
    let (head, rest) = nav.split_at_mut(anchor);

    let mut cur: &mut dyn Target = match head.last_mut() {
        Some(Frame::MapValue(value)) => &mut **value,
        _ => reg.root(rest.first())?,
    };
    for frame in rest.iter() {
        cur = deref(cur)?;
        cur = match frame {
            Frame::Field { name, .. } => match cur.slot() {
                Slot::Struct(section) => section.field(name).map(|f| f.target),
                _ => None,
            },
            Frame::Element(idx) => match cur.slot() {
                Slot::Slice(list) => list.get_mut(*idx),
                _ => None,
            },
            Frame::Directive(_) | Frame::MapValue(_) => Some(cur),
        }
        .ok_or_else(lost)?;
    }
    Ok(cur)
}

impl<'r, 'a> Parser<'r, 'a> {
    /// The target the path currently points at, pointers followed.
    pub(crate) fn current(&mut self) -> Result<&mut dyn Target> {
        deref(walk(&mut *self.reg, &mut self.nav)?)
    }

    /// Resolve a directive key against the current struct, or at the top
    /// level against the entry and then the registered directives.
    pub(crate) fn enter(&mut self, key: &str) -> Result<()> {
        let name = field_name(key, self.camel);

        if self.nav.is_empty() {
            if let Some(meta) = self.reg.entry_field(&name)? {
                self.nav.push(Frame::Field { name, meta });
                return Ok(());
            }
            if self.reg.use_directive(key) {
                debug!("directive {}", key);
                self.nav.push(Frame::Directive(key.to_string()));
                return Ok(());
            }
            return Err(Error::new(
                ErrorKind::Syntax,
                format!("unknown directive `{}`", key),
            ));
        }

        let cur = self.current()?;
        let kind = cur.kind();
        let meta = match cur.slot() {
            Slot::Struct(section) => section.field(&name).map(|f| f.meta),
            _ => {
                return Err(Error::new(
                    ErrorKind::Syntax,
                    format!("unknown directive `{}`, current kind is {}, but struct required", key, kind),
                ))
            }
        };
        match meta {
            Some(meta) => {
                self.nav.push(Frame::Field { name, meta });
                Ok(())
            }
            None => Err(Error::new(
                ErrorKind::Syntax,
                format!("unknown directive `{}`", key),
            )),
        }
    }

    pub(crate) fn open_block(&mut self) -> Result<()> {
        if self.file.mode == Mode::Key {
            if self.file.buf.is_empty() {
                return Err(Error::new(ErrorKind::Syntax, "unexpected '{'"));
            }
            self.end_key()?;
        }
        if self.file.setting || self.file.including {
            return Err(Error::new(
                ErrorKind::Syntax,
                "`set` and `include` cannot open a block",
            ));
        }
        let label = self.take_buf()?;
        let label = label.trim();

        let cur = self.current()?;
        let kind = cur.kind();
        let (block, frame) = match cur.slot() {
            Slot::Map(map) if !label.is_empty() => {
                let mut key = map.new_key();
                bind(key.as_mut(), label)?;
                (Block::Map(key), Some(Frame::MapValue(map.new_value())))
            }
            Slot::Map(_) => {
                return Err(Error::new(ErrorKind::Syntax, "map block needs a key before '{'"));
            }
            Slot::Slice(list) if label.is_empty() => {
                let idx = list.len();
                let elem = list.push_fresh();
                init(&mut *elem)?;
                // A pointer element is allocated now, so `{ }` leaves it set.
                deref(elem)?;
                (Block::Slice, Some(Frame::Element(idx)))
            }
            Slot::Struct(_) if label.is_empty() => (Block::Plain, None),
            Slot::Slice(_) | Slot::Struct(_) => {
                return Err(Error::new(
                    ErrorKind::Syntax,
                    format!("unexpected `{}` before '{{', a {} block takes no label", label, kind),
                ));
            }
            _ => {
                return Err(Error::new(
                    ErrorKind::Type,
                    format!("cannot open a block on a {}", kind),
                ));
            }
        };

        self.file.scopes.push();
        self.file.depth += 1;
        self.file.blocks.push(block);
        if let Some(frame) = frame {
            self.nav.push(frame);
        }
        self.file.mode = Mode::Key;
        debug!("open {} block, depth {}", kind, self.file.depth);
        Ok(())
    }

    pub(crate) fn close_block(&mut self) -> Result<()> {
        if !self.file.buf.is_empty() {
            let token = self.take_buf()?;
            return Err(Error::new(
                ErrorKind::Syntax,
                format!("unexpected '}}' after `{}`", token),
            ));
        }
        if self.file.depth == 0 {
            return Err(Error::new(ErrorKind::Syntax, "unexpected '}', no block is open"));
        }

        match self.file.blocks.pop() {
            Some(Block::Map(key)) => {
                let value = match self.nav.pop() {
                    Some(Frame::MapValue(value)) => value,
                    _ => return Err(lost()),
                };
                match self.current()?.slot() {
                    Slot::Map(map) => map
                        .insert(key, value)
                        .map_err(|e| Error::new(ErrorKind::Type, e))?,
                    _ => return Err(lost()),
                }
            }
            Some(Block::Slice) => {
                self.nav.pop();
            }
            Some(Block::Plain) | None => {}
        }

        self.file.scopes.pop();
        self.file.depth -= 1;
        self.nav.pop();
        self.file.mode = Mode::Key;
        debug!("close block, depth {}", self.file.depth);
        Ok(())
    }
}
