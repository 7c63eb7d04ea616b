//! The `dependencies = [...]` section of a migration source file.
//!
//! The section is located by its header, delimited with a bracket and quote
//! aware scan, parsed into a [`DependencyDeclaration`] and written back in a
//! canonical single-line form. Everything outside the section is preserved
//! byte for byte.

use std::fmt;
use std::ops::Range;
use std::path::Path;
use std::sync::LazyLock;

use migralign_common::{Error, MigrationName, Result};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

static HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bdependencies\s*=\s*\[").unwrap());

/// A two-element tuple of string literals, either quote style.
static TUPLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^\(\s*(?:'([^'\\]*)'|"([^"\\]*)")\s*,\s*(?:'([^'\\]*)'|"([^"\\]*)")\s*,?\s*\)$"#,
    )
    .unwrap()
});

/// One entry of a dependency list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Dependency {
    /// `(app_label, migration_name)`
    Migration { app: String, name: String },
    /// Anything else, kept verbatim (e.g. a swappable model dependency).
    Raw(String),
}

impl Dependency {
    pub fn migration(app: impl Into<String>, name: impl Into<String>) -> Self {
        Dependency::Migration {
            app: app.into(),
            name: name.into(),
        }
    }

    fn parse(entry: &str) -> Self {
        match TUPLE_RE.captures(entry) {
            Some(caps) => {
                let app = caps.get(1).or_else(|| caps.get(2));
                let name = caps.get(3).or_else(|| caps.get(4));
                match (app, name) {
                    (Some(app), Some(name)) => Dependency::migration(app.as_str(), name.as_str()),
                    _ => Dependency::Raw(entry.to_string()),
                }
            }
            None => Dependency::Raw(entry.to_string()),
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::Migration { app, name } => {
                write!(f, "({}, {})", quote(app), quote(name))
            }
            Dependency::Raw(text) => f.write_str(text),
        }
    }
}

/// The parsed contents of a `dependencies = [...]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencyDeclaration {
    pub entries: Vec<Dependency>,
}

impl DependencyDeclaration {
    /// A declaration depending on exactly one migration.
    pub fn single(app: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            entries: vec![Dependency::migration(app, name)],
        }
    }

    pub fn render(&self) -> String {
        let entries: Vec<String> = self.entries.iter().map(ToString::to_string).collect();
        format!("dependencies = [{}]", entries.join(", "))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BlockError {
    #[error("no `dependencies = [...]` block found")]
    Missing,

    #[error("found {0} `dependencies = [...]` blocks, expected exactly one")]
    Ambiguous(usize),

    #[error("`dependencies = [` at byte {0} is never closed")]
    Unterminated(usize),
}

/// A located dependency section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyBlock {
    /// Byte range from the `dependencies` keyword through the closing `]`.
    pub span: Range<usize>,
    pub declaration: DependencyDeclaration,
}

/// Find the single dependency section in `source`.
pub fn locate(source: &str) -> std::result::Result<DependencyBlock, BlockError> {
    let mut blocks = Vec::new();
    let mut consumed = 0;
    let mut cursor = CodeCursor::default();
    for header in HEADER_RE.find_iter(source) {
        if header.start() < consumed {
            continue;
        }
        if !cursor.in_code_at(source, header.start()) {
            debug!("ignoring `dependencies` at byte {} inside a comment or string", header.start());
            continue;
        }
        let (close, entries) =
            scan_list(&source[header.end()..]).ok_or(BlockError::Unterminated(header.start()))?;
        consumed = header.end() + close + 1;
        blocks.push(DependencyBlock {
            span: header.start()..consumed,
            declaration: DependencyDeclaration {
                entries: entries.iter().map(|e| Dependency::parse(e)).collect(),
            },
        });
    }

    match blocks.len() {
        0 => Err(BlockError::Missing),
        1 => Ok(blocks.remove(0)),
        n => Err(BlockError::Ambiguous(n)),
    }
}

/// Replace the dependency section of `source` with `declaration`.
pub fn replace(
    source: &str,
    declaration: &DependencyDeclaration,
) -> std::result::Result<String, BlockError> {
    let block = locate(source)?;
    let mut updated = String::with_capacity(source.len());
    updated.push_str(&source[..block.span.start]);
    updated.push_str(&declaration.render());
    updated.push_str(&source[block.span.end..]);
    Ok(updated)
}

/// Parse the dependency section of the migration file `dir/<migration>.py`.
pub fn read_declaration(dir: &Path, migration: &MigrationName) -> Result<DependencyDeclaration> {
    let path = dir.join(migration.file_name());
    let source = std::fs::read_to_string(&path)?;
    locate(&source)
        .map(|block| block.declaration)
        .map_err(|e| Error::MigrationFile(format!("{}: {e}", path.display())))
}

/// Rewrite the dependency section of `dir/<migration>.py` to `declaration`.
///
/// Returns whether the file content changed; rewriting with the declaration
/// already present leaves the file untouched.
pub fn rewrite(
    dir: &Path,
    migration: &MigrationName,
    declaration: &DependencyDeclaration,
) -> Result<bool> {
    let path = dir.join(migration.file_name());
    let source = std::fs::read_to_string(&path)?;
    let updated = replace(&source, declaration)
        .map_err(|e| Error::MigrationFile(format!("{}: {e}", path.display())))?;

    if updated == source {
        debug!("{} already declares {}", migration, declaration.render());
        return Ok(false);
    }
    std::fs::write(&path, updated)?;
    debug!("{} now declares {}", migration, declaration.render());
    Ok(true)
}

/// Walk a list body (the text right after its opening `[`), tracking string
/// literals, comments and nesting. Returns the offset of the closing `]` and
/// the top-level entries with comments removed, or `None` if the list is
/// not closed.
fn scan_list(text: &str) -> Option<(usize, Vec<String>)> {
    let mut entries = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut open_quote: Option<char> = None;
    let mut escaped = false;
    let mut in_comment = false;

    for (i, c) in text.char_indices() {
        if in_comment {
            if c == '\n' {
                in_comment = false;
                current.push(c);
            }
            continue;
        }
        if let Some(q) = open_quote {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                open_quote = None;
            }
            continue;
        }
        match c {
            '#' => in_comment = true,
            '\'' | '"' => {
                open_quote = Some(c);
                current.push(c);
            }
            '(' | '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' if depth > 0 => {
                depth -= 1;
                current.push(c);
            }
            ']' => {
                push_entry(&mut entries, &current);
                return Some((i, entries));
            }
            ')' | '}' => return None,
            ',' if depth == 0 => {
                push_entry(&mut entries, &current);
                current.clear();
            }
            _ => current.push(c),
        }
    }
    None
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Lexeme {
    #[default]
    Code,
    Comment,
    Str { quote: u8, triple: bool, escaped: bool },
}

/// Forward-only lexer over Python source that answers whether a byte offset
/// lies in code rather than in a comment or string literal. Offsets passed to
/// [`CodeCursor::in_code_at`] must not decrease.
#[derive(Debug, Default)]
struct CodeCursor {
    pos: usize,
    state: Lexeme,
}

impl CodeCursor {
    fn in_code_at(&mut self, source: &str, offset: usize) -> bool {
        let bytes = source.as_bytes();
        while self.pos < offset {
            let b = bytes[self.pos];
            let opens_triple = bytes[self.pos..].starts_with(&[b, b, b]);
            self.state = match self.state {
                Lexeme::Code => match b {
                    b'#' => Lexeme::Comment,
                    b'\'' | b'"' => {
                        if opens_triple {
                            self.pos += 2;
                        }
                        Lexeme::Str {
                            quote: b,
                            triple: opens_triple,
                            escaped: false,
                        }
                    }
                    _ => Lexeme::Code,
                },
                Lexeme::Comment if b == b'\n' => Lexeme::Code,
                Lexeme::Comment => Lexeme::Comment,
                Lexeme::Str { quote, triple, escaped } => {
                    if escaped {
                        Lexeme::Str { quote, triple, escaped: false }
                    } else if b == b'\\' {
                        Lexeme::Str { quote, triple, escaped: true }
                    } else if b == quote && !triple {
                        Lexeme::Code
                    } else if b == quote && opens_triple {
                        self.pos += 2;
                        Lexeme::Code
                    } else if b == b'\n' && !triple {
                        // unterminated single-line literal
                        Lexeme::Code
                    } else {
                        Lexeme::Str { quote, triple, escaped }
                    }
                }
            };
            self.pos += 1;
        }
        self.state == Lexeme::Code
    }
}

fn push_entry(entries: &mut Vec<String>, raw: &str) {
    let entry = raw.trim();
    if !entry.is_empty() {
        entries.push(entry.to_string());
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}
