//! Line-oriented parser for ABI documentation files
//!
//! Each documentation file is a sequence of tagged blocks:
//!
//! ```text
//! Name:         /sys/class/hwmon/hwmonX/name
//! Date:         April 2010
//! Contact:      linux-hwmon@vger.kernel.org
//! Description:  The chip name.
//!               Reading this file may return garbage on error.
//! ```
//!
//! Consecutive name tags accumulate into one symbol's alias list. Content
//! before any tag belongs to the file's own descriptive block. Malformed
//! input produces [`ParseWarning`]s on the repository, never a hard error;
//! only key-namespace exhaustion aborts a pass.

use crate::debug;
use crate::symbols::{AbiSymbol, FileRecord, FileRef, SymbolRepository};
use eyre::Result;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// File suffixes never parsed (editor and patch leftovers)
const IGNORE_SUFFIXES: &[&str] = &[".rej", ".org", ".orig", ".bak", "~"];

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+)(:\s*)(.*)$").expect("valid tag regex"));
static START_SPC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)(\S.*)$").expect("valid indent regex"));

/// Recognized tag keywords
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Name,
    Date,
    Version,
    Contact,
    Description,
    Users,
}

impl Tag {
    /// Exact case-insensitive keyword match. The second element flags the
    /// deprecated `Location` spelling, accepted as `Name` with a warning.
    fn parse(word: &str) -> Option<(Tag, bool)> {
        match word.to_lowercase().as_str() {
            "name" => Some((Tag::Name, false)),
            "location" => Some((Tag::Name, true)),
            "date" => Some((Tag::Date, false)),
            "version" => Some((Tag::Version, false)),
            "contact" => Some((Tag::Contact, false)),
            "description" => Some((Tag::Description, false)),
            "users" => Some((Tag::Users, false)),
            _ => None,
        }
    }
}

/// Per-file parsing state, constructed fresh for every file
struct FileContext {
    /// Doc-relative path used in warnings and file references
    fname: String,
    /// Current line number (1-indexed)
    line: usize,
    /// Line of the first name tag of the open block
    name_line: usize,
    /// Open tag, if a block is being accumulated
    tag: Option<Tag>,
    /// Key of the symbol currently being filled
    key: Option<String>,
    /// Captured indentation prefix for description continuation lines
    space: Option<String>,
    /// Cross-reference id of this file's record
    file_xref: String,
    file_ref: FileRef,
    path_class: String,
}

/// Parser for a documentation tree
pub struct AbiParser {
    root: PathBuf,
    debug: u32,
}

impl AbiParser {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            debug: 0,
        }
    }

    /// Enable debug bits (see [`crate::debug`])
    pub fn with_debug(mut self, debug: u32) -> Self {
        self.debug = debug;
        self
    }

    /// Parse the whole documentation tree into a fresh repository.
    ///
    /// Files are visited in sorted path order so that key disambiguation
    /// is reproducible across runs and machines.
    #[cfg(feature = "walk")]
    pub fn parse(&self) -> Result<SymbolRepository> {
        use eyre::WrapErr;
        use ignore::WalkBuilder;

        let mut repo = SymbolRepository::new();

        let walker = WalkBuilder::new(&self.root)
            .standard_filters(false)
            .follow_links(true)
            .sort_by_file_path(|a, b| a.cmp(b))
            .build();

        for entry in walker {
            let entry = entry.wrap_err("failed to enumerate documentation tree")?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let basename = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if basename.starts_with('.') {
                continue;
            }
            if IGNORE_SUFFIXES.iter().any(|s| basename.ends_with(s)) {
                continue;
            }

            let rel = path.strip_prefix(&self.root).unwrap_or(path);
            let content = read_lossy(path)?;
            self.parse_content(&mut repo, rel, &content)?;
        }

        Ok(repo)
    }

    /// Parse one file's content into the repository. `rel_path` is the
    /// path relative to the documentation root.
    pub fn parse_content(
        &self,
        repo: &mut SymbolRepository,
        rel_path: &Path,
        content: &str,
    ) -> Result<()> {
        let fname = rel_path.to_string_lossy().replace('\\', "/");
        let basename = rel_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let path_class = rel_path
            .parent()
            .and_then(|p| p.components().next())
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .unwrap_or_default();

        if self.debug & debug::FILE_OPEN != 0 {
            tracing::debug!("opening file {fname}");
        }

        let xref = file_xref(&path_class, &basename);
        repo.file_refs.insert(fname.clone(), xref.clone());

        if basename == "README" {
            parse_readme(repo, &fname, &xref, content);
            return Ok(());
        }

        repo.files.insert(
            xref.clone(),
            FileRecord {
                name: format!("ABI file {fname}"),
                path: fname.clone(),
                path_class: path_class.clone(),
                xref: xref.clone(),
                symbols: Vec::new(),
                description: String::new(),
            },
        );

        let mut ctx = FileContext {
            fname: fname.clone(),
            line: 0,
            name_line: 0,
            tag: None,
            key: None,
            space: None,
            file_xref: xref.clone(),
            file_ref: FileRef {
                path: fname.clone(),
                xref,
            },
            path_class,
        };

        for line in content.lines() {
            ctx.line += 1;
            self.parse_line(repo, &mut ctx, line)?;
        }

        // End of file: close the open block and tidy the file record
        self.finalize_block(repo, &mut ctx, None);
        if let Some(record) = repo.files.get_mut(&ctx.file_xref) {
            let trimmed = record.description.trim_start_matches('\n').to_string();
            record.description = trimmed;
        }

        Ok(())
    }

    fn parse_line(
        &self,
        repo: &mut SymbolRepository,
        ctx: &mut FileContext,
        line: &str,
    ) -> Result<()> {
        let mut new_tag = None;

        if let Some(caps) = TAG_RE.captures(line) {
            let word = caps.get(1).map_or("", |m| m.as_str());
            let sep = caps.get(2).map_or("", |m| m.as_str());
            let content = caps.get(3).map_or("", |m| m.as_str());

            match Tag::parse(word) {
                Some((tag, legacy)) => {
                    if legacy {
                        repo.warn(
                            &ctx.fname,
                            ctx.line,
                            "tag 'Location' is deprecated. Should be 'Name:' instead",
                        );
                    }
                    new_tag = Some((tag, word.to_string(), sep.to_string(), content.to_string()));
                }
                None => {
                    // A tag-looking line inside a description is ordinary
                    // text; anywhere else inside a block it is a violation
                    // (and still accumulates as continuation text below).
                    if ctx.tag.is_some() && ctx.tag != Some(Tag::Description) {
                        repo.warn_with_context(
                            &ctx.fname,
                            ctx.line,
                            format!("tag '{word}' is invalid"),
                            line,
                        );
                    }
                }
            }
        }

        if let Some((tag, word, sep, content)) = new_tag {
            if tag == Tag::Name {
                self.handle_name_tag(repo, ctx, &content)?;
                return Ok(());
            }

            if ctx.tag.is_none() {
                // Tag content before any name block: warn, keep the text
                // on the file's own block
                repo.warn_with_context(&ctx.fname, ctx.line, "'Name:' should come first", line);
                if let Some(record) = repo.files.get_mut(&ctx.file_xref) {
                    record.description.push_str(line);
                    record.description.push('\n');
                }
                return Ok(());
            }

            ctx.tag = Some(tag);
            let key = match &ctx.key {
                Some(key) => key.clone(),
                None => return Ok(()),
            };

            if tag == Tag::Description {
                ctx.space = None;
                let mut text = String::new();
                if !content.is_empty() {
                    // Reconstruct the visual indent of the first line so
                    // continuation lines can be matched against it
                    let padded = format!(
                        "{}{}{}",
                        " ".repeat(word.len()),
                        sep.replace(':', " "),
                        content
                    );
                    let padded = expand_tabs(&padded);
                    if let Some(m) = START_SPC_RE.captures(&padded) {
                        ctx.space = Some(m[1].to_string());
                        text = format!("{}\n", &m[2]);
                    }
                }
                if let Some(symbol) = repo.symbols.get_mut(&key) {
                    symbol.description = Some(text);
                }
            } else if let Some(symbol) = repo.symbols.get_mut(&key) {
                *field_mut(symbol, tag) = content;
            }
            return Ok(());
        }

        // No tag opened yet: the text belongs to the file's own block
        if ctx.tag.is_none() {
            if let Some(record) = repo.files.get_mut(&ctx.file_xref) {
                record.description.push_str(line);
                record.description.push('\n');
            }
            return Ok(());
        }

        if ctx.tag == Some(Tag::Description) {
            let key = match &ctx.key {
                Some(key) => key.clone(),
                None => return Ok(()),
            };
            let content = expand_tabs(line);
            let Some(symbol) = repo.symbols.get_mut(&key) else {
                return Ok(());
            };
            let desc = symbol.description.get_or_insert_with(String::new);

            if content.trim().is_empty() {
                desc.push('\n');
                return Ok(());
            }

            match &ctx.space {
                None => {
                    // First continuation line fixes the indent prefix
                    if let Some(m) = START_SPC_RE.captures(&content) {
                        ctx.space = Some(m[1].to_string());
                        desc.push_str(&m[2]);
                        desc.push('\n');
                    }
                }
                Some(space) => {
                    if let Some(stripped) = content.strip_prefix(space.as_str()) {
                        desc.push_str(stripped);
                    } else {
                        // Indentation lost: stop stripping from here on
                        ctx.space = Some(String::new());
                        desc.push_str(&content);
                    }
                    desc.push('\n');
                }
            }
            return Ok(());
        }

        // Continuation of a non-description tag
        let content = line.trim();
        match ctx.tag {
            Some(Tag::Name) => {
                // A wrapped name line contributes another alias
                if !content.is_empty() {
                    if let Some(key) = &ctx.key {
                        if let Some(symbol) = repo.symbols.get_mut(key) {
                            symbol.names.push(content.to_string());
                        }
                    }
                }
            }
            Some(tag) => {
                if let Some(key) = &ctx.key {
                    if let Some(symbol) = repo.symbols.get_mut(key) {
                        let field = field_mut(symbol, tag);
                        field.push('\n');
                        field.push_str(content);
                    }
                }
            }
            None => {}
        }
        Ok(())
    }

    fn handle_name_tag(
        &self,
        repo: &mut SymbolRepository,
        ctx: &mut FileContext,
        content: &str,
    ) -> Result<()> {
        ctx.space = None;
        repo.record_occurrence(content, &ctx.fname, Some(ctx.line));

        if ctx.tag == Some(Tag::Name) {
            // Consecutive name tags alias the open symbol
            if let Some(key) = ctx.key.clone() {
                if let Some(symbol) = repo.symbols.get_mut(&key) {
                    symbol.names.push(content.to_string());
                }
                repo.name_to_key.insert(content.to_string(), key.clone());
                if let Some(record) = repo.files.get_mut(&ctx.file_xref) {
                    let entry = (content.to_string(), key);
                    if !record.symbols.contains(&entry) {
                        record.symbols.push(entry);
                    }
                }
            }
        } else {
            self.finalize_block(repo, ctx, Some(ctx.name_line));

            let base = SymbolRepository::mint_key(content);
            let key = repo.unique_key(&base)?;

            if self.debug & debug::PARSING != 0 {
                tracing::debug!("new symbol {key} for {content}");
            }

            repo.symbols.insert(
                key.clone(),
                AbiSymbol {
                    names: vec![content.to_string()],
                    files: vec![ctx.file_ref.clone()],
                    path_class: ctx.path_class.clone(),
                    line: ctx.line,
                    ..Default::default()
                },
            );
            repo.name_to_key.insert(content.to_string(), key.clone());
            if let Some(record) = repo.files.get_mut(&ctx.file_xref) {
                record.symbols.push((content.to_string(), key.clone()));
            }
            ctx.key = Some(key);
            ctx.name_line = ctx.line;
        }

        ctx.tag = Some(Tag::Name);
        Ok(())
    }

    /// Close the open symbol block: warn when it never got a description
    /// and register every accumulated name in the reverse map and the
    /// occurrence index.
    fn finalize_block(
        &self,
        repo: &mut SymbolRepository,
        ctx: &mut FileContext,
        line: Option<usize>,
    ) {
        let Some(key) = ctx.key.take() else {
            return;
        };
        let Some(symbol) = repo.symbols.get(&key) else {
            return;
        };

        if symbol.description.is_none() {
            repo.warn(
                &ctx.fname,
                ctx.line,
                format!("{key} doesn't have a description"),
            );
        }

        let names = repo.symbols[&key].names.clone();
        let fname = ctx.fname.clone();
        for name in names {
            repo.record_occurrence(&name, &fname, line);
            repo.name_to_key.insert(name, key.clone());
        }
    }
}

/// README is prose, not structure: the whole file becomes one descriptive
/// record and tag-looking lines stay literal text.
fn parse_readme(repo: &mut SymbolRepository, fname: &str, xref: &str, content: &str) {
    let mut description = String::new();
    for line in content.lines() {
        description.push_str(line);
        description.push('\n');
    }

    repo.files.insert(
        xref.to_string(),
        FileRecord {
            name: "ABI file contents".to_string(),
            path: fname.to_string(),
            path_class: "README".to_string(),
            xref: xref.to_string(),
            symbols: Vec::new(),
            description,
        },
    );
}

/// Free-text field a tag accumulates into. Name and description have
/// dedicated handling in the line parser.
fn field_mut(symbol: &mut AbiSymbol, tag: Tag) -> &mut String {
    match tag {
        Tag::Date => &mut symbol.date,
        Tag::Version => &mut symbol.version,
        Tag::Contact => &mut symbol.contact,
        Tag::Users => &mut symbol.users,
        Tag::Name | Tag::Description => unreachable!("handled by the line parser"),
    }
}

/// Cross-reference anchor for a documentation file
fn file_xref(path_class: &str, basename: &str) -> String {
    let raw = format!("abi_file_{path_class}_{basename}");
    let mut out = String::with_capacity(raw.len());
    let mut in_run = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    out.trim_matches('_').to_string()
}

fn expand_tabs(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut col = 0usize;
    for ch in s.chars() {
        if ch == '\t' {
            let pad = 8 - (col % 8);
            for _ in 0..pad {
                out.push(' ');
            }
            col += pad;
        } else {
            out.push(ch);
            col += 1;
        }
    }
    out
}

#[cfg(feature = "walk")]
fn read_lossy(path: &Path) -> Result<String> {
    use eyre::WrapErr;

    let bytes = std::fs::read(path)
        .wrap_err_with(|| format!("failed to read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
