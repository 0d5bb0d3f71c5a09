//! In-memory symbol database built by the documentation parser
//!
//! One [`SymbolRepository`] is built per parse pass. The parser fills it,
//! the pattern compiler decorates symbols with derived patterns, and the
//! matcher reads it. It is never updated incrementally.

use eyre::Result;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Alphabet used to disambiguate colliding symbol keys.
const SUFFIX_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Upper bound on disambiguation attempts for one base key. Exceeding it
/// means the corpus mints the same base key thousands of times over, which
/// is treated as fatal rather than wrapping into another namespace.
const MAX_SUFFIX_ATTEMPTS: usize = 10_000;

/// Reference from a symbol back to the documentation file defining it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRef {
    /// Doc-relative file path (e.g. `testing/sysfs-bus-iio`)
    pub path: String,
    /// Generated cross-reference anchor for that file
    pub xref: String,
}

/// A unit of documentation: one or more documented names plus metadata
#[derive(Debug, Clone, Default, Serialize)]
pub struct AbiSymbol {
    /// Documented names, primary name first; later entries are aliases
    /// accumulated from consecutive name tags
    pub names: Vec<String>,
    /// Files this symbol is declared in
    pub files: Vec<FileRef>,
    /// Path classification, the first component of the doc-relative
    /// directory (`stable`, `testing`, ...)
    pub path_class: String,
    /// Line of the first name tag
    pub line: usize,
    pub version: String,
    pub date: String,
    pub contact: String,
    pub users: String,
    /// Absent when the block never carried a description tag; the parser
    /// warns about those at end of file
    pub description: Option<String>,
    /// Regex sources derived by the pattern compiler, one per compilable name
    pub patterns: Vec<String>,
}

/// Pseudo-symbol of type "File": one record per documentation source file
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileRecord {
    /// Display name, derived from the doc-relative path
    pub name: String,
    /// Doc-relative file path
    pub path: String,
    /// Path classification of the containing directory
    pub path_class: String,
    /// Cross-reference anchor for this file
    pub xref: String,
    /// (name, key) pairs for every symbol declared in the file, in
    /// encounter order
    pub symbols: Vec<(String, String)>,
    /// Free text found outside any tag block
    pub description: String,
}

/// A recoverable parse diagnostic carrying its source location
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseWarning {
    pub file: String,
    pub line: usize,
    pub message: String,
    /// The offending line, when useful
    pub context: Option<String>,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.file, self.line, self.message)?;
        if let Some(context) = &self.context {
            write!(f, "\n\t\t{}", context.trim_end())?;
        }
        Ok(())
    }
}

/// The symbol database for one parse pass
#[derive(Debug, Default)]
pub struct SymbolRepository {
    /// Symbol key -> record. BTreeMap so iteration order is stable.
    pub symbols: BTreeMap<String, AbiSymbol>,
    /// File xref -> record
    pub files: BTreeMap<String, FileRecord>,
    /// Every documented name (aliases included) -> owning symbol key
    pub name_to_key: HashMap<String, String>,
    /// Doc-relative file path -> file xref
    pub file_refs: BTreeMap<String, String>,
    /// Documented name -> file -> line numbers where it appears. Used to
    /// detect the same name documented in more than one place.
    occurrences: HashMap<String, BTreeMap<String, Vec<usize>>>,
    /// Recoverable diagnostics accumulated during the pass
    pub warnings: Vec<ParseWarning>,
}

impl SymbolRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the base key for a documented name: lower-cased, runs of
    /// characters outside `[0-9a-z]` collapsed to `_`, outer `_` stripped.
    pub fn mint_key(name: &str) -> String {
        let lowered = format!("abi_{}", name.to_lowercase());
        let mut key = String::with_capacity(lowered.len());
        let mut in_run = false;
        for ch in lowered.chars() {
            if ch.is_ascii_alphanumeric() {
                key.push(ch);
                in_run = false;
            } else if !in_run {
                key.push('_');
                in_run = true;
            }
        }
        key.trim_matches('_').to_string()
    }

    /// Resolve `base` to a key not yet present in the repository.
    ///
    /// Collisions get a base-52 alphabetic suffix driven by a counter, so
    /// an unchanged corpus produces identical keys on every run.
    pub fn unique_key(&self, base: &str) -> Result<String> {
        if !self.symbols.contains_key(base) {
            return Ok(base.to_string());
        }
        for attempt in 1..=MAX_SUFFIX_ATTEMPTS {
            let candidate = format!("{base}{}", suffix_for(attempt));
            if !self.symbols.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        eyre::bail!(
            "key namespace exhausted for '{base}' after {MAX_SUFFIX_ATTEMPTS} attempts"
        )
    }

    /// Record that `name` is documented in `file` at `line`
    pub fn record_occurrence(&mut self, name: &str, file: &str, line: Option<usize>) {
        let files = self.occurrences.entry(name.to_string()).or_default();
        let lines = files.entry(file.to_string()).or_default();
        if let Some(line) = line {
            if !lines.contains(&line) {
                lines.push(line);
            }
        }
    }

    pub fn warn(&mut self, file: &str, line: usize, message: impl Into<String>) {
        self.warnings.push(ParseWarning {
            file: file.to_string(),
            line,
            message: message.into(),
            context: None,
        });
    }

    pub fn warn_with_context(
        &mut self,
        file: &str,
        line: usize,
        message: impl Into<String>,
        context: &str,
    ) {
        self.warnings.push(ParseWarning {
            file: file.to_string(),
            line,
            message: message.into(),
            context: Some(context.to_string()),
        });
    }

    /// Names documented in more than one place, with their locations.
    /// One entry per duplicated name.
    pub fn duplicate_name_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        let mut names: Vec<_> = self.occurrences.iter().collect();
        names.sort_by_key(|(name, _)| name.as_str());

        for (name, files) in names {
            if files.len() <= 1 {
                continue;
            }
            let locations: Vec<String> = files
                .iter()
                .map(|(file, lines)| match lines.as_slice() {
                    [] => file.clone(),
                    [line] => format!("{file}:{line}"),
                    lines => {
                        let joined: Vec<String> =
                            lines.iter().map(ToString::to_string).collect();
                        format!("{file} lines {}", joined.join(", "))
                    }
                })
                .collect();
            issues.push(format!(
                "{name} is defined {} times: {}",
                locations.len(),
                locations.join("; ")
            ));
        }
        issues
    }

    /// Symbols whose documented names match `expr`, in key order
    pub fn search<'a>(
        &'a self,
        expr: &'a regex::Regex,
    ) -> impl Iterator<Item = (&'a str, &'a AbiSymbol, &'a str)> + 'a {
        self.symbols.iter().flat_map(move |(key, symbol)| {
            symbol
                .names
                .iter()
                .filter(move |name| expr.is_match(name))
                .map(move |name| (key.as_str(), symbol, name.as_str()))
        })
    }
}

/// Bijective base-52 encoding of a positive counter
fn suffix_for(mut n: usize) -> String {
    let mut out = Vec::new();
    while n > 0 {
        n -= 1;
        out.push(SUFFIX_ALPHABET[n % SUFFIX_ALPHABET.len()]);
        n /= SUFFIX_ALPHABET.len();
    }
    out.reverse();
    out.into_iter().map(char::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_key_collapses_separators() {
        assert_eq!(
            SymbolRepository::mint_key("/sys/bus/usb/devices/.../power"),
            "abi_sys_bus_usb_devices_power"
        );
        assert_eq!(SymbolRepository::mint_key("Foo Bar"), "abi_foo_bar");
    }

    #[test]
    fn mint_key_strips_outer_separators() {
        assert_eq!(SymbolRepository::mint_key("///"), "abi");
    }

    #[test]
    fn unique_key_is_deterministic() {
        let mut repo = SymbolRepository::new();
        let first = repo.unique_key("abi_x").unwrap();
        repo.symbols.insert(first.clone(), AbiSymbol::default());
        let second = repo.unique_key("abi_x").unwrap();
        repo.symbols.insert(second.clone(), AbiSymbol::default());
        let third = repo.unique_key("abi_x").unwrap();

        assert_eq!(first, "abi_x");
        assert_eq!(second, "abi_xA");
        assert_eq!(third, "abi_xB");

        // Same sequence on a fresh repository
        let mut again = SymbolRepository::new();
        let a = again.unique_key("abi_x").unwrap();
        again.symbols.insert(a.clone(), AbiSymbol::default());
        let b = again.unique_key("abi_x").unwrap();
        assert_eq!((a, b), (first, second));
    }

    #[test]
    fn suffix_rolls_over_alphabet() {
        assert_eq!(suffix_for(1), "A");
        assert_eq!(suffix_for(52), "z");
        assert_eq!(suffix_for(53), "AA");
    }

    #[test]
    fn duplicate_names_reported_once() {
        let mut repo = SymbolRepository::new();
        repo.record_occurrence("/sys/foo", "stable/sysfs-foo", Some(3));
        repo.record_occurrence("/sys/foo", "testing/sysfs-foo", Some(10));
        repo.record_occurrence("/sys/bar", "stable/sysfs-bar", Some(1));

        let issues = repo.duplicate_name_issues();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].starts_with("/sys/foo is defined 2 times"));
        assert!(issues[0].contains("stable/sysfs-foo:3"));
        assert!(issues[0].contains("testing/sysfs-foo:10"));
    }

    #[test]
    fn duplicate_lines_in_one_file() {
        let mut repo = SymbolRepository::new();
        repo.record_occurrence("/sys/foo", "stable/sysfs-foo", Some(3));
        repo.record_occurrence("/sys/foo", "stable/sysfs-foo", Some(9));
        repo.record_occurrence("/sys/foo", "testing/sysfs-foo", None);

        let issues = repo.duplicate_name_issues();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("stable/sysfs-foo lines 3, 9"));
        assert!(issues[0].contains("; testing/sysfs-foo"));
    }
}
