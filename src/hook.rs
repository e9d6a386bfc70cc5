//! Validation hooks, run after a value has been assigned.
use crate::binder::{deref, display, peek};
use crate::error::{Error, ErrorKind, Result};
use crate::nav::{walk, Frame};
use crate::parser::Parser;
use crate::target::{FieldMeta, Slot};
use crate::tokenizer::camelize;

impl<'r, 'a> Parser<'r, 'a> {
    /// Run the hook named `name` on the field just committed. The struct's
    /// own hooks are tried before the builtin ones.
    pub(crate) fn run_hook(&mut self, meta: &FieldMeta, name: &str, text: &str) -> Result<()> {
        let own = self.with_parent(|parent| parent.and_then(|p| p.hook(name, text)))?;
        if let Some(res) = own {
            return res.map_err(|e| Error::new(ErrorKind::Validation, e));
        }
        match camelize(name).as_str() {
            "Unique" => self.unique(meta, text),
            _ => Err(Error::new(
                ErrorKind::Validation,
                format!("hook \"{}\" on {}: no such hook", name, meta.name),
            )),
        }
    }

    // The field must belong to a struct that is a slice element. Every
    // earlier element must hold a different value in the same field.
    fn unique(&mut self, meta: &FieldMeta, text: &str) -> Result<()> {
        let n = self.nav.len();
        let idx = match n.checked_sub(2).map(|i| &self.nav[i]) {
            Some(Frame::Element(idx)) => *idx,
            _ => {
                return Err(Error::new(
                    ErrorKind::Validation,
                    format!("hook \"unique\" on {}: not inside a list of blocks", meta.name),
                ))
            }
        };

        let current = display(walk(&mut *self.reg, &mut self.nav)?).ok_or_else(|| {
            Error::new(
                ErrorKind::Validation,
                format!("hook \"unique\" on {}: value cannot be compared", meta.name),
            )
        })?;

        let list = deref(walk(&mut *self.reg, &mut self.nav[..n - 2])?)?;
        let list = match list.slot() {
            Slot::Slice(list) => list,
            _ => return Ok(()),
        };
        for i in 0..idx {
            let other = list.get_mut(i).and_then(peek).and_then(|elem| match elem.slot() {
                Slot::Struct(section) => section.field(meta.name).and_then(|f| display(f.target)),
                _ => None,
            });
            if other.as_deref() == Some(current.as_str()) {
                return Err(Error::new(
                    ErrorKind::Duplicate,
                    format!("duplicate value `{}` for {}", text, meta.name),
                ));
            }
        }
        Ok(())
    }
}
