//! Import specifier rewriting over generated JavaScript.
//!
//! The rewriter is a hand-written scanner rather than a pattern match: it
//! walks the code left to right through explicit modes, copies string
//! literals, template literals, comments and regular expressions verbatim,
//! and only hands the string literal that *follows* an `import`, `from` or
//! `import(` token to the specifier mapper. Text that merely looks like an
//! import inside a literal is never touched.
//!
//! Split points in the output are always at ASCII bytes, so slicing the
//! source by byte offset never cuts a UTF-8 sequence.

use thiserror::Error;

use crate::resolve::normalize_lexically;
use crate::resolve::specifier::{self, SpecifierKind};
use crate::resolve::vendor::{LocatedModule, VendorResolver};

/// Extension appended to extensionless relative imports.
pub const DEFAULT_SCRIPT_EXTENSION: &str = ".js";

/// Keywords after which a `/` starts a regular expression, not a division.
const REGEX_PRECEDING_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

/// Keywords whose parenthesized head is followed by a statement, so a `/`
/// after the closing `)` starts a regular expression.
const STATEMENT_HEAD_KEYWORDS: &[&str] = &["if", "while", "for", "with"];

/// Failure to classify the input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RewriteError {
    /// A literal or comment runs off the end of its line or of the input.
    #[error("unterminated {construct} starting at byte {offset}")]
    Unterminated {
        construct: &'static str,
        offset: usize,
    },
}

/// Where the code being rewritten is served from, which decides how its
/// relative imports are treated.
#[derive(Debug, Clone, Copy)]
pub enum RewriteContext<'a> {
    /// A module compiled from the source root.
    Local { vendor: &'a VendorResolver },
    /// A file of an installed package. Relative imports become absolute
    /// vendor paths, since the module's public URL does not mirror its
    /// location on disk.
    Vendor {
        vendor: &'a VendorResolver,
        module: &'a LocatedModule,
    },
}

impl RewriteContext<'_> {
    /// The replacement for `spec`, or `None` to leave it unchanged.
    pub fn map_specifier(&self, spec: &str) -> Option<String> {
        let vendor = match self {
            RewriteContext::Local { vendor } | RewriteContext::Vendor { vendor, .. } => *vendor,
        };

        match specifier::classify(spec) {
            SpecifierKind::Url | SpecifierKind::RootAbsolute => None,
            SpecifierKind::Bare => Some(vendor.render(spec)),
            SpecifierKind::Relative => match self {
                RewriteContext::Local { .. } => with_default_extension(spec),
                RewriteContext::Vendor { module, .. } => {
                    let dir = module.path.parent()?;
                    let target = normalize_lexically(&dir.join(spec))?;
                    if !target.starts_with(&module.package_dir) {
                        return None;
                    }
                    let inner = module.specifier_for(&target)?;
                    Some(vendor.proxy_path(&inner))
                }
            },
        }
    }
}

/// Rewrite every import specifier in `source` according to `context`.
pub fn rewrite(source: &str, context: &RewriteContext<'_>) -> Result<String, RewriteError> {
    rewrite_specifiers(source, |spec| context.map_specifier(spec))
}

/// Rewrite every import specifier in `source` with `map`. `map` returns
/// `None` to keep a specifier.
pub fn rewrite_specifiers<F>(source: &str, mut map: F) -> Result<String, RewriteError>
where
    F: FnMut(&str) -> Option<String>,
{
    Scanner::new(source).run(&mut map)
}

fn with_default_extension(spec: &str) -> Option<String> {
    let last = spec.rsplit('/').next().unwrap_or(spec);
    if spec.ends_with('/') || last == "." || last == ".." || last.contains('.') {
        return None;
    }
    Some(format!("{}{}", spec, DEFAULT_SCRIPT_EXTENSION))
}

/// Scanner modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Code,
    /// Inside a `'…'` or `"…"` literal.
    Quoted,
    Template,
    LineComment,
    BlockComment,
    Regex,
    /// Positioned on the opening quote of a module specifier.
    ImportTarget,
}

impl Mode {
    fn construct(self) -> &'static str {
        match self {
            Mode::Quoted | Mode::ImportTarget => "string literal",
            Mode::Template => "template literal",
            Mode::BlockComment => "block comment",
            Mode::Regex => "regular expression",
            Mode::Code | Mode::LineComment => "code",
        }
    }
}

/// What the last significant token was, for telling `/re/` from `a / b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prev {
    Start,
    Operator,
    Operand,
}

struct Scanner<'s> {
    src: &'s str,
    bytes: &'s [u8],
    pos: usize,
    /// Start of the span that opened the current mode (for error offsets).
    start: usize,
    out: String,
    /// Source bytes before this offset are already in `out`.
    copied: usize,
    prev: Prev,
    braces: usize,
    /// Brace depth at each open `${` substitution.
    template_braces: Vec<usize>,
    /// One entry per open `(`: whether it opened a statement head.
    parens: Vec<bool>,
    /// The last word was a statement keyword directly followed by `(`.
    statement_head: bool,
    /// Inside `import … ` or `export {…}`/`export *` awaiting `from`.
    awaiting_from: bool,
}

impl<'s> Scanner<'s> {
    fn new(src: &'s str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            start: 0,
            out: String::with_capacity(src.len() + 64),
            copied: 0,
            prev: Prev::Start,
            braces: 0,
            template_braces: Vec::new(),
            parens: Vec::new(),
            statement_head: false,
            awaiting_from: false,
        }
    }

    fn run<F>(mut self, map: &mut F) -> Result<String, RewriteError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut mode = Mode::Code;
        while self.pos < self.bytes.len() {
            mode = match mode {
                Mode::Code => self.code(),
                Mode::Quoted => self.quoted()?,
                Mode::Template => self.template()?,
                Mode::LineComment => self.line_comment(),
                Mode::BlockComment => self.block_comment()?,
                Mode::Regex => self.regex()?,
                Mode::ImportTarget => self.import_target(map)?,
            };
        }

        if !matches!(mode, Mode::Code | Mode::LineComment) {
            return Err(RewriteError::Unterminated {
                construct: mode.construct(),
                offset: self.start,
            });
        }
        if !self.template_braces.is_empty() {
            return Err(RewriteError::Unterminated {
                construct: "template literal",
                offset: self.start,
            });
        }

        self.out.push_str(&self.src[self.copied..]);
        Ok(self.out)
    }

    fn peek(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    /// Index of the first non-whitespace byte at or after `from`.
    fn skip_ws(&self, mut from: usize) -> Option<usize> {
        while from < self.bytes.len() {
            if !self.bytes[from].is_ascii_whitespace() {
                return Some(from);
            }
            from += 1;
        }
        None
    }

    fn unterminated(&self, mode: Mode) -> RewriteError {
        RewriteError::Unterminated {
            construct: mode.construct(),
            offset: self.start,
        }
    }

    /// One token of ordinary code.
    fn code(&mut self) -> Mode {
        let b = self.bytes[self.pos];
        match b {
            b'\'' | b'"' => {
                self.start = self.pos;
                self.pos += 1;
                Mode::Quoted
            }
            b'`' => {
                self.start = self.pos;
                self.pos += 1;
                Mode::Template
            }
            b'/' => match self.peek(1) {
                Some(b'/') => {
                    self.pos += 2;
                    Mode::LineComment
                }
                Some(b'*') => {
                    self.start = self.pos;
                    self.pos += 2;
                    Mode::BlockComment
                }
                _ if self.prev != Prev::Operand => {
                    self.start = self.pos;
                    self.pos += 1;
                    Mode::Regex
                }
                _ => {
                    self.pos += 1;
                    self.prev = Prev::Operator;
                    Mode::Code
                }
            },
            b'{' => {
                self.braces += 1;
                self.pos += 1;
                self.prev = Prev::Operator;
                Mode::Code
            }
            b'}' => {
                self.pos += 1;
                if self.template_braces.last() == Some(&self.braces) {
                    self.template_braces.pop();
                    return Mode::Template;
                }
                self.braces = self.braces.saturating_sub(1);
                self.prev = Prev::Operator;
                Mode::Code
            }
            b';' => {
                self.awaiting_from = false;
                self.pos += 1;
                self.prev = Prev::Operator;
                Mode::Code
            }
            b'(' => {
                self.parens.push(std::mem::take(&mut self.statement_head));
                self.pos += 1;
                self.prev = Prev::Operator;
                Mode::Code
            }
            b')' => {
                self.pos += 1;
                self.prev = if self.parens.pop() == Some(true) {
                    Prev::Operator
                } else {
                    Prev::Operand
                };
                Mode::Code
            }
            b']' => {
                self.pos += 1;
                self.prev = Prev::Operand;
                Mode::Code
            }
            // `a++ / b` divides; `++/re/` cannot occur.
            b'+' | b'-' if self.peek(1) == Some(b) => {
                self.pos += 2;
                if self.prev != Prev::Operand {
                    self.prev = Prev::Operator;
                }
                Mode::Code
            }
            _ if b.is_ascii_digit() => {
                while self.pos < self.bytes.len()
                    && (is_ident_part(self.bytes[self.pos]) || self.bytes[self.pos] == b'.')
                {
                    self.pos += 1;
                }
                self.prev = Prev::Operand;
                Mode::Code
            }
            _ if is_ident_start(b) => self.word(),
            _ if b.is_ascii_whitespace() => {
                self.pos += 1;
                Mode::Code
            }
            _ => {
                self.pos += 1;
                self.prev = Prev::Operator;
                Mode::Code
            }
        }
    }

    /// An identifier or keyword; detects the tokens that introduce a module
    /// specifier.
    fn word(&mut self) -> Mode {
        let start = self.pos;
        while self.pos < self.bytes.len() && is_ident_part(self.bytes[self.pos]) {
            self.pos += 1;
        }
        let word = &self.src[start..self.pos];

        let is_member = start > 0
            && self.bytes[start - 1] == b'.'
            && !(start >= 3 && &self.bytes[start - 3..start] == b"...");
        if is_member {
            self.prev = Prev::Operand;
            return Mode::Code;
        }

        let next = self.skip_ws(self.pos);
        let next_byte = next.map(|i| self.bytes[i]);

        match word {
            "import" => {
                self.prev = Prev::Operator;
                match next_byte {
                    // import("x")
                    Some(b'(') => {
                        if let Some(arg) = next.and_then(|i| self.skip_ws(i + 1))
                            && is_quote(self.bytes[arg])
                        {
                            self.pos = arg;
                            return Mode::ImportTarget;
                        }
                    }
                    // import "x"
                    Some(q) if is_quote(q) => {
                        self.pos = next.unwrap_or(self.pos);
                        return Mode::ImportTarget;
                    }
                    // import x from, import {x} from, import * as x from
                    Some(b'{') | Some(b'*') => self.awaiting_from = true,
                    Some(c) if is_ident_start(c) => self.awaiting_from = true,
                    _ => {}
                }
                Mode::Code
            }
            "export" => {
                self.prev = Prev::Operator;
                if matches!(next_byte, Some(b'{') | Some(b'*')) {
                    self.awaiting_from = true;
                }
                Mode::Code
            }
            "from" if self.awaiting_from => {
                if let (Some(i), Some(q)) = (next, next_byte)
                    && is_quote(q)
                {
                    self.pos = i;
                    return Mode::ImportTarget;
                }
                self.prev = Prev::Operand;
                Mode::Code
            }
            _ if STATEMENT_HEAD_KEYWORDS.contains(&word) => {
                self.statement_head = next_byte == Some(b'(');
                self.prev = Prev::Operator;
                Mode::Code
            }
            _ => {
                self.prev = if REGEX_PRECEDING_KEYWORDS.contains(&word) {
                    Prev::Operator
                } else {
                    Prev::Operand
                };
                Mode::Code
            }
        }
    }

    /// Index of the closing quote of the literal opened at `open`.
    fn string_end(&self, open: usize) -> Result<usize, RewriteError> {
        let quote = self.bytes[open];
        let mut i = open + 1;
        while i < self.bytes.len() {
            match self.bytes[i] {
                b'\\' => i += 2,
                b'\n' | b'\r' => break,
                b if b == quote => return Ok(i),
                _ => i += 1,
            }
        }
        Err(RewriteError::Unterminated {
            construct: "string literal",
            offset: open,
        })
    }

    fn quoted(&mut self) -> Result<Mode, RewriteError> {
        let close = self.string_end(self.start)?;
        self.pos = close + 1;
        self.prev = Prev::Operand;
        Ok(Mode::Code)
    }

    fn import_target<F>(&mut self, map: &mut F) -> Result<Mode, RewriteError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let open = self.pos;
        self.start = open;
        let quote = self.bytes[open];
        let close = self.string_end(open)?;
        let raw = &self.src[open + 1..close];

        // Escaped specifiers are left alone rather than decoded.
        if !raw.contains('\\')
            && let Some(replacement) = map(raw)
            && replacement != raw
        {
            self.out.push_str(&self.src[self.copied..=open]);
            for c in replacement.chars() {
                if c == quote as char || c == '\\' {
                    self.out.push('\\');
                }
                self.out.push(c);
            }
            self.copied = close;
        }

        self.awaiting_from = false;
        self.pos = close + 1;
        self.prev = Prev::Operand;
        Ok(Mode::Code)
    }

    fn template(&mut self) -> Result<Mode, RewriteError> {
        while self.pos < self.bytes.len() {
            match self.bytes[self.pos] {
                b'\\' => self.pos += 2,
                b'`' => {
                    self.pos += 1;
                    self.prev = Prev::Operand;
                    return Ok(Mode::Code);
                }
                b'$' if self.peek(1) == Some(b'{') => {
                    self.pos += 2;
                    self.template_braces.push(self.braces);
                    self.prev = Prev::Start;
                    return Ok(Mode::Code);
                }
                _ => self.pos += 1,
            }
        }
        Err(self.unterminated(Mode::Template))
    }

    fn line_comment(&mut self) -> Mode {
        while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
            self.pos += 1;
        }
        Mode::Code
    }

    fn block_comment(&mut self) -> Result<Mode, RewriteError> {
        match self.src[self.pos..].find("*/") {
            Some(offset) => {
                self.pos += offset + 2;
                Ok(Mode::Code)
            }
            None => Err(self.unterminated(Mode::BlockComment)),
        }
    }

    fn regex(&mut self) -> Result<Mode, RewriteError> {
        let mut in_class = false;
        while self.pos < self.bytes.len() {
            match self.bytes[self.pos] {
                b'\\' => self.pos += 2,
                b'\n' | b'\r' => break,
                b'[' => {
                    in_class = true;
                    self.pos += 1;
                }
                b']' => {
                    in_class = false;
                    self.pos += 1;
                }
                b'/' if !in_class => {
                    self.pos += 1;
                    // flags
                    while self.pos < self.bytes.len() && is_ident_part(self.bytes[self.pos]) {
                        self.pos += 1;
                    }
                    self.prev = Prev::Operand;
                    return Ok(Mode::Code);
                }
                _ => self.pos += 1,
            }
        }
        Err(self.unterminated(Mode::Regex))
    }
}

fn is_quote(b: u8) -> bool {
    b == b'\'' || b == b'"'
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$' || b >= 0x80
}

fn is_ident_part(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit()
}
