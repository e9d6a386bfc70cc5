//! `include` handling.
//!
//! Each included file gets a fresh lexical state; the state of the file
//! that included it waits on the stash until the included file is done.
//! The navigation path is shared, so included directives land in the
//! block that was open at the `include` line.
use std::mem;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Error, ErrorKind, Result};
use crate::parser::{FileState, Parser};
use crate::tokenizer::{clear_quoted, Source};

impl<'r, 'a> Parser<'r, 'a> {
    pub(crate) fn include(&mut self, pattern: &str) -> Result<()> {
        let pattern = clear_quoted(pattern);
        let magic = has_magic(&pattern);
        let mut path = PathBuf::from(pattern.as_ref());
        let mut glob_path = path.clone();
        if path.is_relative() {
            // Glob metacharacters in the directory name are literal.
            let dir = self.file.source.dir();
            let escaped = glob::Pattern::escape(&dir.to_string_lossy());
            glob_path = Path::new(&escaped).join(&path);
            path = dir.join(path);
        }
        let files = expand(&glob_path, &path, magic)?;
        debug!("include {}: {:?}", path.display(), files);

        for file in &files {
            self.push_stash(file)?;
            // On error the stash is left as is; it is dropped with the parser.
            self.run()?;
            self.pop_stash();
        }
        Ok(())
    }

    fn push_stash(&mut self, path: &Path) -> Result<()> {
        if self.stash.len() >= self.max_include_depth {
            return Err(Error::new(
                ErrorKind::RecursionLimit,
                format!("too many nested includes, exceeds {} limit", self.max_include_depth),
            ));
        }
        let source = Source::open(path)?;
        let outer = mem::replace(&mut self.file, FileState::new(source));
        self.stash.push(outer);
        Ok(())
    }

    fn pop_stash(&mut self) {
        if let Some(outer) = self.stash.pop() {
            self.file = outer;
        }
    }
}

fn has_magic(s: &str) -> bool {
    s.chars().any(|c| matches!(c, '*' | '?' | '['))
}

// Glob matches in lexicographic order. A plain name must exist.
fn expand(pattern: &Path, path: &Path, magic: bool) -> Result<Vec<PathBuf>> {
    let name = pattern.to_string_lossy();
    let paths = glob::glob(&name)
        .map_err(|e| Error::new(ErrorKind::Syntax, format!("{}: {}", path.display(), e.msg)))?;
    let mut files = paths
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::new(ErrorKind::Io, format!("{}: {}", e.path().display(), e.error())))?;
    if files.is_empty() && !magic {
        return Err(Error::new(ErrorKind::Io, format!("{}: file not found", path.display())));
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::error::ErrorKind;
    use crate::{from_file, Config, Section};

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[derive(Debug, Default, Section)]
    struct Site {
        root: String,
        index: Vec<String>,
    }

    #[derive(Debug, Default, Section)]
    struct Main {
        user: String,
        site: Vec<Site>,
        order: Vec<String>,
    }

    #[test]
    fn include_into_open_block() {
        init();
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.conf"), "order b;\n").unwrap();
        fs::write(dir.path().join("sub/a.conf"), "order a;\n").unwrap();
        fs::write(dir.path().join("sub/c.txt"), "order c;\n").unwrap();
        fs::write(dir.path().join("site.conf"), "set r /srv;\nroot $r;\n").unwrap();
        fs::write(
            dir.path().join("main.conf"),
            "user www;\n\
             include sub/*.conf;\n\
             site {\n  include \"site.conf\";\n  index i.html;\n}\n\
             order z;\n",
        )
        .unwrap();

        let m: Main = from_file(dir.path().join("main.conf")).unwrap();
        assert_eq!(m.user, "www");
        assert_eq!(m.order, vec!["a", "b", "z"]);
        assert_eq!(m.site.len(), 1);
        assert_eq!(m.site[0].root, "/srv");
        assert_eq!(m.site[0].index, vec!["i.html"]);
    }

    #[test]
    fn glob_characters_in_directory() {
        init();
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("conf[1]");
        fs::create_dir_all(conf.join("d?")).unwrap();
        fs::write(conf.join("d?/a.conf"), "order a;\n").unwrap();
        fs::write(conf.join("user.conf"), "user www;\n").unwrap();
        fs::write(conf.join("main.conf"), "include user.conf;\ninclude d?/*.conf;\n").unwrap();

        let m: Main = from_file(conf.join("main.conf")).unwrap();
        assert_eq!(m.user, "www");
        assert_eq!(m.order, vec!["a"]);

        fs::write(conf.join("main.conf"), "include gone.conf;\n").unwrap();
        let e = from_file::<Main>(conf.join("main.conf")).unwrap_err();
        assert_eq!(e.kind, ErrorKind::Io);
        assert!(e.msg.contains("conf[1]"));
    }

    #[test]
    fn included_scope_is_fresh() {
        init();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("inc.conf"), "user $u;\n").unwrap();
        fs::write(dir.path().join("main.conf"), "set u root;\ninclude inc.conf;\n").unwrap();

        let m: Main = from_file(dir.path().join("main.conf")).unwrap();
        assert_eq!(m.user, "$u");
    }

    #[test]
    fn error_location_in_included_file() {
        init();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.conf"), "\n\nbogus 1;\n").unwrap();
        let main = dir.path().join("main.conf");
        fs::write(&main, "user x;\ninclude bad.conf;\n").unwrap();

        let e = from_file::<Main>(&main).unwrap_err();
        assert_eq!(e.line, 3);
        assert!(e.file_name.ends_with("bad.conf"));
    }

    #[test]
    fn missing_include() {
        init();
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("main.conf");
        fs::write(&main, "include nothere.conf;\n").unwrap();
        let e = from_file::<Main>(&main).unwrap_err();
        assert_eq!(e.kind, ErrorKind::Io);
        assert_eq!(e.line, 1);

        fs::write(&main, "include none/*.conf;\nuser x;\n").unwrap();
        assert_eq!(from_file::<Main>(&main).unwrap().user, "x");
    }

    #[test]
    fn unclosed_block_in_included_file() {
        init();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("open.conf"), "site {\n").unwrap();
        let main = dir.path().join("main.conf");
        fs::write(&main, "include open.conf;\n}\n").unwrap();
        let e = from_file::<Main>(&main).unwrap_err();
        assert_eq!(e.kind, ErrorKind::Syntax);
        assert!(e.file_name.ends_with("open.conf"));
    }

    #[test]
    fn recursive_include() {
        init();
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("main.conf");
        fs::write(&main, "include main.conf;\n").unwrap();
        let e = from_file::<Main>(&main).unwrap_err();
        assert_eq!(e.kind, ErrorKind::RecursionLimit);
        assert_eq!(e.msg, "too many nested includes, exceeds 100 limit");

        let mut m = Main::default();
        let cfg = crate::Builder::new().max_include_depth(3).from_file(&main);
        let e = cfg.unmarshal(&mut m).unwrap_err();
        assert_eq!(e.msg, "too many nested includes, exceeds 3 limit");
    }

    #[test]
    fn reload_rereads_file() {
        init();
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("main.conf");
        fs::write(&main, "user a;\n").unwrap();

        let mut m = Main::default();
        let cfg = Config::new(&main);
        cfg.unmarshal(&mut m).unwrap();
        fs::write(&main, "user b;\norder x;\n").unwrap();
        cfg.reload().unwrap();
        drop(cfg);
        assert_eq!(m.user, "b");
        assert_eq!(m.order, vec!["x"]);
    }
}
