use std::any::Any;
use std::mem;

use log::{debug, trace};

use crate::binder::{bind, deref};
use crate::cfg::Registry;
use crate::error::{Error, ErrorKind, Result};
use crate::format;
use crate::nav::{walk, Block, Frame};
use crate::scope::Scopes;
use crate::target::{FieldMeta, Section, Slot};
use crate::tokenizer::{camelize, clear_quoted, is_space, is_var_byte, Mode, Source};

/// A `$name` or `${name}` reference being collected.
#[derive(Default)]
pub(crate) struct Var {
    pub active: bool,
    pub braced: bool,
    pub name: Vec<u8>,
    // Everything read since the `$`, written back if the name is unknown.
    pub raw: Vec<u8>,
}

impl Var {
    fn start() -> Var {
        Var {
            active: true,
            raw: vec![b'$'],
            ..Var::default()
        }
    }
}

/// Lexical state of one file. Saved on the include stash while an
/// included file is parsed; the navigation path is not part of it.
pub(crate) struct FileState {
    pub source: Source,
    pub line: u32,
    pub mode: Mode,
    pub depth: usize,
    // Saw a '/' in key position that may start a `//` comment.
    pub slash: bool,
    pub blocks: Vec<Block>,
    pub setting: bool,
    pub including: bool,
    pub var: Var,
    pub quote: Option<u8>,
    pub escaped: bool,
    pub scopes: Scopes,
    pub buf: Vec<u8>,
}

impl FileState {
    pub fn new(source: Source) -> FileState {
        FileState {
            source,
            line: 1,
            mode: Mode::Key,
            depth: 0,
            slash: false,
            blocks: Vec::new(),
            setting: false,
            including: false,
            var: Var::default(),
            quote: None,
            escaped: false,
            scopes: Scopes::default(),
            buf: Vec::new(),
        }
    }
}

/// One run over a configuration file and the files it includes.
pub(crate) struct Parser<'r, 'a> {
    pub reg: &'r mut Registry<'a>,
    pub camel: bool,
    pub max_include_depth: usize,
    pub nav: Vec<Frame>,
    pub file: FileState,
    pub stash: Vec<FileState>,
}

impl<'r, 'a> Parser<'r, 'a> {
    pub fn new(reg: &'r mut Registry<'a>, source: Source) -> Parser<'r, 'a> {
        Parser {
            reg,
            camel: true,
            max_include_depth: 100,
            nav: Vec::new(),
            file: FileState::new(source),
            stash: Vec::new(),
        }
    }

    /// Parse the current file to the end.
    pub fn run(&mut self) -> Result<()> {
        debug!("parsing {}", self.file.source.name);
        while let Some(b) = self.file.source.next_byte().map_err(|e| self.locate(e))? {
            self.step(b).map_err(|e| self.locate(e))?;
            if b == b'\n' {
                self.file.line += 1;
            }
        }
        self.finish().map_err(|e| self.locate(e))
    }

    fn locate(&self, e: Error) -> Error {
        e.located(&self.file.source.name, self.file.line)
    }

    fn finish(&mut self) -> Result<()> {
        if mem::take(&mut self.file.slash) {
            self.file.buf.push(b'/');
        }
        if self.file.mode != Mode::Key {
            return Err(Error::new(
                ErrorKind::Syntax,
                "unexpected end of file, directive not terminated by ';'",
            ));
        }
        if !self.file.buf.is_empty() {
            let token = self.take_buf()?;
            return Err(Error::new(
                ErrorKind::Syntax,
                format!("unexpected end of file after `{}`", token),
            ));
        }
        if self.file.depth > 0 {
            return Err(Error::new(
                ErrorKind::Syntax,
                "invalid config file, block not closed by '}'",
            ));
        }
        Ok(())
    }

    fn step(&mut self, b: u8) -> Result<()> {
        match self.file.mode {
            Mode::Key => self.step_key(b),
            Mode::Value => self.step_value(b),
        }
    }

    fn step_key(&mut self, b: u8) -> Result<()> {
        if mem::take(&mut self.file.slash) {
            if b == b'/' {
                return self.skip_comment();
            }
            self.file.buf.push(b'/');
        }
        match b {
            b'#' => self.skip_comment(),
            b'/' => {
                self.file.slash = true;
                Ok(())
            }
            b'{' => self.open_block(),
            b'}' => self.close_block(),
            b';' => {
                let token = self.take_buf()?;
                Err(Error::new(
                    ErrorKind::Syntax,
                    if token.is_empty() {
                        "unexpected ';'".to_string()
                    } else {
                        format!("directive `{}` has no value", token)
                    },
                ))
            }
            b if is_space(b) => self.end_key(),
            _ => {
                self.file.buf.push(b);
                Ok(())
            }
        }
    }

    // A comment also ends a key that is still being collected.
    fn skip_comment(&mut self) -> Result<()> {
        self.end_key()?;
        if self.file.source.skip_line()? {
            self.file.line += 1;
        }
        Ok(())
    }

    pub(crate) fn end_key(&mut self) -> Result<()> {
        if self.file.buf.is_empty() {
            return Ok(());
        }
        let key = self.take_buf()?;
        match key.as_str() {
            "include" => self.file.including = true,
            "set" => self.file.setting = true,
            _ => self.enter(&key)?,
        }
        self.file.mode = Mode::Value;
        Ok(())
    }

    pub(crate) fn take_buf(&mut self) -> Result<String> {
        String::from_utf8(mem::take(&mut self.file.buf))
            .map_err(|_| Error::new(ErrorKind::Syntax, "invalid UTF-8 in configuration"))
    }

    fn step_value(&mut self, b: u8) -> Result<()> {
        if self.file.var.active {
            let var = &mut self.file.var;
            if var.braced {
                match b {
                    b'}' => {
                        var.raw.push(b);
                        self.end_var();
                    }
                    b';' => {
                        return Err(Error::new(
                            ErrorKind::Syntax,
                            format!(
                                "variable `{}` not terminated by '}}'",
                                String::from_utf8_lossy(&var.raw)
                            ),
                        ));
                    }
                    _ => {
                        var.name.push(b);
                        var.raw.push(b);
                    }
                }
                return Ok(());
            }
            if b == b'{' && var.name.is_empty() {
                var.braced = true;
                var.raw.push(b);
                return Ok(());
            }
            if is_var_byte(b) {
                var.name.push(b);
                var.raw.push(b);
                return Ok(());
            }
            self.end_var();
        }

        let f = &mut self.file;
        if f.escaped {
            f.escaped = false;
            f.buf.push(b);
            return Ok(());
        }
        match b {
            b'\\' => {
                f.escaped = true;
                f.buf.push(b);
                Ok(())
            }
            b'$' => {
                f.var = Var::start();
                Ok(())
            }
            _ if f.quote.is_some() => {
                if f.quote == Some(b) {
                    f.quote = None;
                }
                f.buf.push(b);
                Ok(())
            }
            b'"' | b'\'' => {
                f.quote = Some(b);
                f.buf.push(b);
                Ok(())
            }
            b';' => self.end_value(),
            b'{' => self.open_block(),
            _ => {
                f.buf.push(b);
                Ok(())
            }
        }
    }

    // Splice the value of the variable into the buffer, or the
    // reference itself if no scope defines it.
    fn end_var(&mut self) {
        let var = mem::take(&mut self.file.var);
        let name = String::from_utf8_lossy(&var.name);
        match self.file.scopes.get(&name) {
            Some(value) => self.file.buf.extend_from_slice(value.as_bytes()),
            None => {
                trace!("unresolved variable {}", String::from_utf8_lossy(&var.raw));
                self.file.buf.extend_from_slice(&var.raw);
            }
        }
    }

    fn end_value(&mut self) -> Result<()> {
        let text = self.take_buf()?;
        let text = text.trim();
        self.file.mode = Mode::Key;
        if text.is_empty() {
            return Err(Error::new(ErrorKind::Syntax, "empty value before ';'"));
        }
        if mem::take(&mut self.file.setting) {
            return self.set_var(text);
        }
        if mem::take(&mut self.file.including) {
            return self.include(text);
        }
        self.commit(text)?;
        self.nav.pop();
        Ok(())
    }

    fn set_var(&mut self, text: &str) -> Result<()> {
        let mut parts = text.splitn(2, |c: char| c.is_whitespace());
        let name = parts.next().unwrap_or_default();
        let value = parts.next().map(str::trim).unwrap_or_default();
        if value.is_empty() {
            return Err(Error::new(
                ErrorKind::Syntax,
                format!("invalid `set {}`, expected a name and a value", text),
            ));
        }
        trace!("set {} = {}", name, value);
        self.file.scopes.set(name, value);
        Ok(())
    }

    fn field_meta(&self) -> Option<&'static FieldMeta> {
        match self.nav.last() {
            Some(Frame::Field { meta, .. }) => Some(*meta),
            _ => None,
        }
    }

    /// Assign a complete value to the current slot, then run its hook.
    fn commit(&mut self, text: &str) -> Result<()> {
        let meta = self.field_meta();
        trace!("commit {} <- {:?}", meta.map_or("-", |m| m.name), text);

        match meta.and_then(|m| m.format.map(|f| (m, f))) {
            Some((meta, format)) => {
                let value = self.convert(meta, format, text)?;
                let slot = self.current()?;
                let expected = (*slot).value_type_name();
                (*slot).set_any(value).map_err(|_| {
                    Error::new(
                        ErrorKind::Type,
                        format!("format \"{}\" on {} did not return a {}", format, meta.name, expected),
                    )
                })?;
            }
            None => bind(walk(&mut *self.reg, &mut self.nav)?, text)?,
        }

        if let Some(meta) = meta {
            if let Some(hook) = meta.hook {
                self.run_hook(meta, hook, text)?;
            }
        }
        Ok(())
    }

    // The struct that holds the field being committed.
    pub(crate) fn with_parent<R>(&mut self, f: impl FnOnce(Option<&mut dyn Section>) -> R) -> Result<R> {
        let n = self.nav.len().saturating_sub(1);
        let parent = deref(walk(&mut *self.reg, &mut self.nav[..n])?)?;
        Ok(match parent.slot() {
            Slot::Struct(section) => f(Some(section)),
            _ => f(None),
        })
    }

    /// Run a `format` converter: the struct's own first, then the builtin.
    fn convert(&mut self, meta: &FieldMeta, name: &str, text: &str) -> Result<Box<dyn Any>> {
        let text = clear_quoted(text);
        let own = self.with_parent(|parent| parent.and_then(|p| p.format(name, &text)))?;
        let res = match own {
            Some(res) => res,
            None => match format::builtin(&camelize(name)) {
                Some(conv) => conv(&text),
                None => {
                    return Err(Error::new(
                        ErrorKind::Conversion,
                        format!("format \"{}\" on {}: no such converter", name, meta.name),
                    ))
                }
            },
        };
        res.map_err(|e| {
            Error::new(
                ErrorKind::Conversion,
                format!("format \"{}\" on {}: {}", name, meta.name, e),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};
    use std::time::Duration;

    use crate::error::ErrorKind;
    use crate::{from_str, Callbacks, Config, Section};

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[derive(Debug, Default, Section)]
    struct Listen {
        addr: String,
        port: u16,
    }

    #[derive(Debug, Default, Section)]
    struct Server {
        name: String,
        tags: Vec<String>,
        limit: HashMap<u32, u32>,
        max_size: u8,
        listen: Vec<Listen>,
        upstream: Option<Listen>,
        sites: BTreeMap<String, Listen>,
        #[conf(format = "duration")]
        timeout: Duration,
        debug: bool,
    }

    fn parse(text: &str) -> crate::Result<Server> {
        init();
        from_str::<Server>(text)
    }

    #[test]
    fn scalars_and_quotes() {
        let s = parse("name \"hello world\";\ndebug on;\nmax_size 255;").unwrap();
        assert_eq!(s.name, "hello world");
        assert!(s.debug);
        assert_eq!(s.max_size, 255);

        let s = parse(r"name 'a\'b';").unwrap();
        assert_eq!(s.name, "a'b");
    }

    #[test]
    fn comments_are_invisible() {
        let s = parse(
            "# name { $x ;\n\
             name real; // tags a { b\n\
             // }}}\n\
             tags a; # trailing\n",
        )
        .unwrap();
        assert_eq!(s.name, "real");
        assert_eq!(s.tags, vec!["a"]);
    }

    #[test]
    fn slash_inside_value() {
        let s = parse("name /usr/local//bin;").unwrap();
        assert_eq!(s.name, "/usr/local//bin");
    }

    #[test]
    fn slices_and_maps() {
        let s = parse("tags a b c;\nlimit 8 64;").unwrap();
        assert_eq!(s.tags, vec!["a", "b", "c"]);
        assert_eq!(s.limit.get(&8), Some(&64));

        let e = parse("limit 8 64 9;").unwrap_err();
        assert_eq!(e.kind, ErrorKind::Arity);
        assert_eq!(e.line, 1);
    }

    #[test]
    fn integer_overflow() {
        let e = parse("name x;\nmax_size 300;").unwrap_err();
        assert_eq!(e.kind, ErrorKind::Range);
        assert_eq!(e.to_string(), "value overflow: 300 in config:2");
    }

    #[test]
    fn duration_format() {
        assert_eq!(parse("timeout \"30s\";").unwrap().timeout, Duration::from_secs(30));
        assert_eq!(parse("timeout 2h;").unwrap().timeout, Duration::from_secs(7200));
        let e = parse("timeout soon;").unwrap_err();
        assert_eq!(e.kind, ErrorKind::Conversion);
    }

    #[test]
    fn blocks() {
        let s = parse(
            "listen { addr 10.0.0.1; port 80; }\n\
             listen {\n  addr 10.0.0.2;\n  port 443;\n}\n\
             upstream { port 8080; }\n\
             sites www { port 81; }\n\
             sites api { addr localhost; }\n",
        )
        .unwrap();
        assert_eq!(s.listen.len(), 2);
        assert_eq!(s.listen[1].addr, "10.0.0.2");
        assert_eq!(s.listen[1].port, 443);
        assert_eq!(s.upstream.as_ref().map(|u| u.port), Some(8080));
        assert_eq!(s.sites["www"].port, 81);
        assert_eq!(s.sites["api"].addr, "localhost");
    }

    #[test]
    fn block_balance() {
        let e = parse("listen { port 80;").unwrap_err();
        assert_eq!(e.kind, ErrorKind::Syntax);
        assert!(e.msg.contains("not closed"));

        let e = parse("listen { port 80; } }").unwrap_err();
        assert_eq!(e.kind, ErrorKind::Syntax);

        assert!(parse("name x").is_err());
        assert!(parse("name").is_err());
        assert!(parse("{ }").is_err());
    }

    #[test]
    fn struct_without_block() {
        let e = parse("upstream 10;").unwrap_err();
        assert_eq!(e.kind, ErrorKind::Type);
    }

    #[test]
    fn empty_value() {
        let e = parse("name ;").unwrap_err();
        assert_eq!(e.kind, ErrorKind::Syntax);
        assert!(e.msg.contains("empty value"));
    }

    #[test]
    fn unknown_directive() {
        let e = parse("name x;\n\nbogus 1;").unwrap_err();
        assert_eq!(e.to_string(), "unknown directive `bogus` in config:3");
        let e = parse("listen { bogus 1; }").unwrap_err();
        assert_eq!(e.msg, "unknown directive `bogus`");
    }

    #[test]
    fn variables() {
        let s = parse("set host example.org;\nname www.$host;").unwrap();
        assert_eq!(s.name, "www.example.org");

        let s = parse("set host example.org;\nname ${host}:80;").unwrap();
        assert_eq!(s.name, "example.org:80");

        let s = parse("set v 'a b';\ntags $v c;").unwrap();
        assert_eq!(s.tags, vec!["a b", "c"]);
    }

    #[test]
    fn unresolved_variable_is_literal() {
        assert_eq!(parse("name $foo;").unwrap().name, "$foo");
        assert_eq!(parse("name x${foo}y;").unwrap().name, "x${foo}y");
        assert_eq!(parse("tags $foo $;").unwrap().tags, vec!["$foo", "$"]);
    }

    #[test]
    fn unterminated_braced_variable() {
        let e = parse("set x 1;\nname ${x;").unwrap_err();
        assert_eq!(e.kind, ErrorKind::Syntax);
        assert_eq!(e.line, 2);
    }

    #[test]
    fn variable_shadowing() {
        let s = parse(
            "set p 1;\n\
             listen { set p 2; port $p; }\n\
             listen { port $p; }\n",
        )
        .unwrap();
        assert_eq!(s.listen[0].port, 2);
        assert_eq!(s.listen[1].port, 1);

        let s = parse("listen { set a x; addr $a; }\nname $a;").unwrap();
        assert_eq!(s.listen[0].addr, "x");
        assert_eq!(s.name, "$a");
    }

    #[test]
    fn substitution_is_not_recursive() {
        let s = parse("set a $b;\nset b x;\nname $a;").unwrap();
        assert_eq!(s.name, "$b");
    }

    #[test]
    fn quoted_delimiters() {
        let s = parse("name \"a;b{c}\";").unwrap();
        assert_eq!(s.name, "a;b{c}");
        let s = parse(r"name a\;b;").unwrap();
        assert_eq!(s.name, "a;b");
        let s = parse(r"name 'it\'s' ;").unwrap();
        assert_eq!(s.name, "it's");
    }

    #[test]
    fn errors_carry_line() {
        let e = parse("name a;\ntags b;\n# comment\nmax_size x;").unwrap_err();
        assert_eq!(e.kind, ErrorKind::Value);
        assert_eq!(e.line, 4);
    }

    #[derive(Debug, Default, Section)]
    #[conf(callbacks)]
    struct Pool {
        #[conf(format = "percent")]
        load: f64,
        #[conf(hook = "even")]
        size: u32,
        #[conf(format = "file_mode")]
        mode: u32,
        #[conf(format = "nosuch")]
        other: u32,
    }

    impl Callbacks for Pool {
        fn format(&self, name: &str, text: &str) -> Option<crate::Converted> {
            match name {
                "percent" => Some(
                    text.trim_end_matches('%')
                        .parse::<f64>()
                        .map(|v| Box::new(v / 100.0) as Box<dyn std::any::Any>)
                        .map_err(|e| e.to_string()),
                ),
                _ => None,
            }
        }

        fn hook(&self, name: &str, _text: &str) -> Option<Result<(), String>> {
            match name {
                "even" if self.size % 2 == 1 => Some(Err(format!("size {} is odd", self.size))),
                "even" => Some(Ok(())),
                _ => None,
            }
        }
    }

    #[test]
    fn own_format_and_hook() {
        init();
        let p = from_str::<Pool>("load 25%;\nsize 4;\nmode 0640;").unwrap();
        assert_eq!(p.load, 0.25);
        assert_eq!(p.size, 4);
        assert_eq!(p.mode, 0o640);

        let e = from_str::<Pool>("size 3;").unwrap_err();
        assert_eq!(e.kind, ErrorKind::Validation);
        assert_eq!(e.to_string(), "size 3 is odd in config:1");

        let e = from_str::<Pool>("other 1;").unwrap_err();
        assert_eq!(e.kind, ErrorKind::Conversion);
    }

    #[derive(Debug, Default, PartialEq)]
    struct Verbosity(usize);
    crate::opaque_target!(Verbosity);

    #[derive(Debug, Default, Section)]
    #[conf(callbacks)]
    struct Logger {
        #[conf(format = "count")]
        level: Verbosity,
        plain: Verbosity,
    }

    impl Callbacks for Logger {
        fn format(&self, name: &str, text: &str) -> Option<crate::Converted> {
            (name == "count").then(|| Ok(Box::new(Verbosity(text.len())) as Box<dyn std::any::Any>))
        }
    }

    #[test]
    fn opaque_needs_format() {
        init();
        assert_eq!(from_str::<Logger>("level vvv;").unwrap().level, Verbosity(3));
        let e = from_str::<Logger>("plain vvv;").unwrap_err();
        assert_eq!(e.kind, ErrorKind::Type);
    }

    #[test]
    fn camel_mapping() {
        init();
        let mut s = Server::default();
        let mut cfg = Config::from_text("config", "maxsize 7;\nmax_size 9;");
        cfg.auto_camel(false);
        assert!(cfg.unmarshal(&mut s).is_err());

        let mut s = Server::default();
        let cfg = Config::from_text("config", "max_size 9;");
        cfg.unmarshal(&mut s).unwrap();
        assert_eq!(s.max_size, 9);
    }
}
