use std::collections::HashMap;

/// Nested `set` bindings: one frame for the file plus one per open block.
#[derive(Debug)]
pub(crate) struct Scopes {
    frames: Vec<HashMap<String, String>>,
}

impl Default for Scopes {
    fn default() -> Scopes {
        Scopes {
            frames: vec![HashMap::new()],
        }
    }
}

impl Scopes {
    pub fn push(&mut self) {
        self.frames.push(HashMap::new());
    }

    // The file-level frame is never popped.
    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// Bind `name` in the innermost frame.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.into(), value.into());
        }
    }

    /// Innermost binding of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name))
            .map(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadowing() {
        let mut scopes = Scopes::default();
        scopes.set("root", "/srv");
        scopes.set("port", "80");
        scopes.push();
        scopes.set("port", "8080");
        assert_eq!(scopes.get("port"), Some("8080"));
        assert_eq!(scopes.get("root"), Some("/srv"));
        scopes.pop();
        assert_eq!(scopes.get("port"), Some("80"));
    }

    #[test]
    fn block_local() {
        let mut scopes = Scopes::default();
        scopes.push();
        scopes.set("tmp", "x");
        scopes.pop();
        assert_eq!(scopes.get("tmp"), None);
        scopes.pop();
        scopes.set("kept", "y");
        assert_eq!(scopes.get("kept"), Some("y"));
    }
}
