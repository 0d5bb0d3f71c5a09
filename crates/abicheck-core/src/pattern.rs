//! Compiles documented names into regular expressions
//!
//! Documented names use a loose wildcard dialect: `X`/`Y`/`Z` index
//! placeholders, trailing `*`, `...` path tails, bracketed digit ranges and
//! `{a,b}`-style enumerations. Each name that looks like a path under the
//! tracked root is rewritten into one regex through an ordered pipeline of
//! text transforms. Order matters: later stages assume the escape markers
//! introduced by earlier ones.
//!
//! The markers are private-use code points reserved for the pipeline:
//! U+E000 (literal dot), U+E001 (digit run), U+E002/U+E003 (literal
//! brackets), U+E004 (plus quantifier). Documented names never contain
//! them.
//!
//! Compiled patterns are bucketed by their last literal path segment so a
//! candidate path is only tested against a small group of patterns instead
//! of the whole database; see [`PatternGroups`].

use crate::debug;
use crate::symbols::{ParseWarning, SymbolRepository};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Documented names outside this root are never compiled
pub const TRACKED_ROOT: &str = "/sys";

/// Bucket for patterns with no literal trailing segment
pub const FALLBACK_GROUP: &str = "others";

/// Segment names too common to be useful group keys
const SKIP_GROUP_NAMES: &[&str] = &["devices", "hwmon"];

const DOT: &str = "\u{e000}";
const NUM: &str = "\u{e001}";
const LBRACK: &str = "\u{e002}";
const RBRACK: &str = "\u{e003}";
const PLUS: &str = "\u{e004}";

enum Sub {
    /// Plain replacement (regex `$n` group syntax allowed)
    Text(String),
    /// `{a,b|c}` enumerations become a full alternation group
    Alternation,
}

/// The rewrite pipeline, applied strictly in order
static REWRITES: LazyLock<Vec<(Regex, Sub)>> = LazyLock::new(|| {
    let rx = |pattern: &str| Regex::new(pattern).expect("rewrite rule must compile");
    let text = |replacement: &str| Sub::Text(replacement.to_string());

    vec![
        // Drop escape characters that might exist
        (rx(r"\\"), text("")),
        // Temporarily hide literal dots
        (rx(r"\."), text(DOT)),
        // Temporarily hide [0-9]+ style digit runs
        (rx(r"\[0\-9\]\+"), text(NUM)),
        (rx(r"\[0\-\d+\]"), text(NUM)),
        (rx(r"\[0:\d+\]"), text(NUM)),
        // A literal decimal inside brackets stays a bracket expression
        (rx(r"\[(\d+)\]"), Sub::Text(format!("{LBRACK}\\d+{RBRACK}"))),
        (
            rx(r"\[(\d)\-(\d)\]"),
            Sub::Text(format!("{LBRACK}${{1}}-${{2}}{RBRACK}")),
        ),
        // Enumerations with 2+ alternatives
        (rx(r"[\{<\[]([\w_]+(?:[,|]+[\w_]+)+)[\}>\]]"), Sub::Alternation),
        // Wildcards
        (rx(r"([^/])\*"), Sub::Text(format!("${{1}}\\w{PLUS}"))),
        (rx(r"/\*/"), text("/.*/")),
        (rx(&format!("/{DOT}{DOT}{DOT}")), text("/.*")),
        (rx(r"<[^>]+>"), Sub::Text(format!("\\w{PLUS}"))),
        (rx(r"\{[^\}]+\}"), Sub::Text(format!("\\w{PLUS}"))),
        (rx(r"\[[^\]]+\]"), Sub::Text(format!("\\w{PLUS}"))),
        // Upper-case index placeholders (XX..., lone X/Y/Z, _A_/_B_)
        (rx(r"XX+"), Sub::Text(format!("\\w{PLUS}"))),
        (
            rx(r"([^A-Z])[XYZ]([^A-Z])"),
            Sub::Text(format!("${{1}}\\w{PLUS}${{2}}")),
        ),
        (rx(r"([^A-Z])[XYZ]$"), Sub::Text(format!("${{1}}\\w{PLUS}"))),
        (rx(r"_[AB]_"), Sub::Text(format!("_\\w{PLUS}_"))),
        // Recover bracket ranges
        (rx(LBRACK), text("[")),
        (rx(RBRACK), text("]")),
        // Collapse whitespace runs
        (rx(r"\s+"), text(" ")),
        // Drop a trailing `= value` comparison (seen in a few IIO entries)
        (rx(r"\s*=.*$"), text("")),
        // Escape the remaining metacharacters...
        (
            rx(r"([\x21-\x29\x2b-\x2d\x3a-\x40\x5c\x60\x7b-\x7e])"),
            text("\\${1}"),
        ),
        // ...which double-escaped the \w sequences built above
        (rx(r"\\\\"), text("\\")),
        // ...and over-escaped group delimiters and numeric ranges
        (rx(r"\\([\[\]\(\)\|])"), text("${1}")),
        (rx(r"(\d+)\\(-\d+)"), text("${1}${2}")),
        // Recover digit runs
        (rx(NUM), text("\\d+")),
        // Special case: IIO documents sqrt() as a function-like fragment
        (rx(r"sqrt(.*)"), text("sqrt(.*)")),
        // Collapse consecutive any-string wildcards
        (rx(r"(?:\.\*){2,}"), text(".*")),
        // Recover dots and plus quantifiers
        (rx(DOT), text("\\.")),
        (rx(PLUS), text("+")),
    ]
});

/// A segment usable as a group key: word characters and escaped `.`/`-`/`:`
static GROUP_SEGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w|\\[.\-:])+$").expect("valid segment regex"));

/// Rewrite one documented name into a regex source string (unanchored)
pub fn rewrite_name(name: &str) -> String {
    let mut acc = name.to_string();
    for (re, sub) in REWRITES.iter() {
        acc = match sub {
            Sub::Text(replacement) => re.replace_all(&acc, replacement.as_str()).into_owned(),
            Sub::Alternation => re
                .replace_all(&acc, |caps: &regex::Captures| {
                    let options: Vec<&str> = caps[1]
                        .split(['|', ','])
                        .filter(|s| !s.is_empty())
                        .collect();
                    format!("({})", options.join("|"))
                })
                .into_owned(),
        };
    }
    acc
}

/// One compiled documented name
#[derive(Debug)]
pub struct CompiledPattern {
    /// Full-match regex for the documented name
    pub regex: Regex,
    /// The documented name this was derived from
    pub name: String,
    /// Owning symbol key
    pub key: String,
}

/// Grouping index over compiled patterns.
///
/// Matching tens of thousands of names against each other is O(n^2) at
/// best, much worse once wildcards are involved. Bucketing each pattern
/// under its last literal path segment confines a lookup to the buckets
/// named by the candidate path's own trailing segments plus the fallback
/// bucket.
#[derive(Debug, Default)]
pub struct PatternGroups {
    groups: HashMap<String, Vec<CompiledPattern>>,
    len: usize,
}

impl PatternGroups {
    /// File `pattern` under its group. Every pattern lands in exactly one
    /// bucket: its literal-segment group or the fallback.
    pub fn insert(&mut self, pattern: CompiledPattern, compiled_source: &str) {
        let group = group_key(compiled_source);
        self.groups.entry(group).or_default().push(pattern);
        self.len += 1;
    }

    /// All patterns a real path must be tested against: the buckets of its
    /// trailing segments, right to left, then the fallback bucket.
    pub fn candidates(&self, path: &str) -> Vec<&CompiledPattern> {
        let mut out = Vec::new();
        for segment in path.rsplit('/') {
            if let Some(list) = self.groups.get(segment) {
                out.extend(list.iter());
            }
        }
        if let Some(list) = self.groups.get(FALLBACK_GROUP) {
            out.extend(list.iter());
        }
        out
    }

    /// Number of compiled patterns across all buckets
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Buckets sorted by size, largest first. Used by the group-size
    /// debug dump to spot segments worth deny-listing.
    pub fn sizes(&self) -> Vec<(&str, usize)> {
        let mut sizes: Vec<(&str, usize)> = self
            .groups
            .iter()
            .map(|(name, list)| (name.as_str(), list.len()))
            .collect();
        sizes.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        sizes
    }
}

/// The group key for a compiled pattern: its rightmost fully-literal
/// segment, unescaped so it compares equal to raw path segments. Segments
/// on the deny-list are skipped.
fn group_key(compiled: &str) -> String {
    for segment in compiled.rsplit('/') {
        if segment.is_empty() || SKIP_GROUP_NAMES.contains(&segment) {
            continue;
        }
        if GROUP_SEGMENT_RE.is_match(segment) {
            return segment.replace('\\', "");
        }
    }
    FALLBACK_GROUP.to_string()
}

/// Derives patterns for every symbol in the repository and files them
/// into a grouping index. The repository is decorated in place.
pub struct PatternCompiler {
    debug: u32,
}

impl PatternCompiler {
    pub fn new() -> Self {
        Self { debug: 0 }
    }

    pub fn with_debug(mut self, debug: u32) -> Self {
        self.debug = debug;
        self
    }

    pub fn compile_all(&self, repo: &mut SymbolRepository) -> PatternGroups {
        let mut groups = PatternGroups::default();
        let mut warnings: Vec<ParseWarning> = Vec::new();

        for (key, symbol) in repo.symbols.iter_mut() {
            for name in symbol.names.clone() {
                if !name.starts_with(TRACKED_ROOT) {
                    continue;
                }

                let source = rewrite_name(&name);
                if self.debug & debug::REGEX != 0 {
                    tracing::debug!("{source:<90} <== {name}");
                }
                symbol.patterns.push(source.clone());

                match Regex::new(&format!("^(?:{source})$")) {
                    Ok(regex) => {
                        let group = group_key(&source);
                        if self.debug & debug::GROUP_MAP != 0 {
                            tracing::debug!("{name}: mapped as {group}");
                        }
                        groups.insert(
                            CompiledPattern {
                                regex,
                                name: name.clone(),
                                key: key.clone(),
                            },
                            &source,
                        );
                    }
                    Err(_) => {
                        let (file, line) = symbol
                            .files
                            .first()
                            .map(|f| (f.path.clone(), symbol.line))
                            .unwrap_or_default();
                        warnings.push(ParseWarning {
                            file,
                            line,
                            message: format!(
                                "Ignoring '{name}' as it produced an invalid regex"
                            ),
                            context: Some(source),
                        });
                    }
                }
            }
        }

        repo.warnings.extend(warnings);

        if self.debug & debug::GROUP_SIZE != 0 {
            for (name, size) in groups.sizes().into_iter().take(10) {
                tracing::debug!("{name} has {size} elements");
            }
        }

        groups
    }
}

impl Default for PatternCompiler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full(name: &str) -> Regex {
        Regex::new(&format!("^(?:{})$", rewrite_name(name))).unwrap()
    }

    #[test]
    fn literal_name_matches_exactly() {
        let re = full("/sys/class/power_supply/battery/capacity");
        assert!(re.is_match("/sys/class/power_supply/battery/capacity"));
        assert!(!re.is_match("/sys/class/power_supply/battery/capacity_level"));
        assert!(!re.is_match("/sys/class/power_supply/battery"));
    }

    #[test]
    fn index_placeholder_becomes_word_run() {
        let re = full("/sys/class/hwmon/hwmonX/name");
        assert!(re.is_match("/sys/class/hwmon/hwmon3/name"));
        assert!(re.is_match("/sys/class/hwmon/hwmon42/name"));
        // \w+ also admits letters; a non-word separator does not match
        assert!(!re.is_match("/sys/class/hwmon/hwmon-3/name"));
        assert!(!re.is_match("/sys/class/hwmon/hwmon3/name/extra"));
    }

    #[test]
    fn enumeration_matches_each_alternative() {
        let re = full("/sys/bus/foo/{bar,baz}/state");
        assert!(re.is_match("/sys/bus/foo/bar/state"));
        assert!(re.is_match("/sys/bus/foo/baz/state"));
        assert!(!re.is_match("/sys/bus/foo/qux/state"));
    }

    #[test]
    fn enumeration_keeps_middle_alternatives() {
        let re = full("/sys/power/state/{mem,standby,freeze}");
        assert!(re.is_match("/sys/power/state/mem"));
        assert!(re.is_match("/sys/power/state/standby"));
        assert!(re.is_match("/sys/power/state/freeze"));
        assert!(!re.is_match("/sys/power/state/disk"));
    }

    #[test]
    fn digit_run_shorthand() {
        let re = full("/sys/class/net/port[0-9]+/speed");
        assert!(re.is_match("/sys/class/net/port0/speed"));
        assert!(re.is_match("/sys/class/net/port128/speed"));
        assert!(!re.is_match("/sys/class/net/portX/speed"));
    }

    #[test]
    fn dots_stay_literal() {
        let re = full("/sys/module/usbcore/parameters/autosuspend.timer");
        assert!(re.is_match("/sys/module/usbcore/parameters/autosuspend.timer"));
        assert!(!re.is_match("/sys/module/usbcore/parameters/autosuspendXtimer"));
    }

    #[test]
    fn trailing_star_matches_word_suffix() {
        let re = full("/sys/bus/pci/drivers_probe*");
        assert!(re.is_match("/sys/bus/pci/drivers_probe_count"));
        assert!(!re.is_match("/sys/bus/pci/drivers_probe/child"));
    }

    #[test]
    fn star_segment_matches_anything() {
        let re = full("/sys/devices/*/power/wakeup");
        assert!(re.is_match("/sys/devices/pci0000:00/power/wakeup"));
        assert!(re.is_match("/sys/devices/a/b/power/wakeup"));
    }

    #[test]
    fn triple_dot_tail_matches_rest() {
        let re = full("/sys/bus/usb/devices/.../power/level");
        assert!(re.is_match("/sys/bus/usb/devices/1-1/power/level"));
        assert!(re.is_match("/sys/bus/usb/devices/1-1.3/power/level"));
    }

    #[test]
    fn equality_suffix_is_dropped() {
        let re = full("/sys/kernel/fscaps = 1");
        assert!(re.is_match("/sys/kernel/fscaps"));
    }

    #[test]
    fn angle_brackets_are_wildcards() {
        let re = full("/sys/block/<disk>/stat");
        assert!(re.is_match("/sys/block/sda/stat"));
        assert!(!re.is_match("/sys/block/sda/queue/stat"));
    }

    #[test]
    fn group_key_prefers_last_literal_segment() {
        assert_eq!(group_key(&rewrite_name("/sys/class/hwmon/hwmonX/name")), "name");
        // Trailing wildcard pushes the key one segment left
        assert_eq!(group_key(&rewrite_name("/sys/class/foo/barX")), "foo");
    }

    #[test]
    fn group_key_skips_deny_listed_segments() {
        assert_eq!(group_key(&rewrite_name("/sys/bus/usb/devices/usbX")), "usb");
    }

    #[test]
    fn group_key_unescapes_punctuation() {
        let source = rewrite_name("/sys/foo/power.state");
        assert_eq!(group_key(&source), "power.state");
    }

    #[test]
    fn all_wildcard_name_falls_back() {
        assert_eq!(group_key(&rewrite_name("/...")), FALLBACK_GROUP);
    }

    #[test]
    fn candidates_use_trailing_segments_and_fallback() {
        let mut repo = SymbolRepository::new();
        let mut add = |name: &str| {
            let key = SymbolRepository::mint_key(name);
            repo.symbols.insert(
                key.clone(),
                crate::symbols::AbiSymbol {
                    names: vec![name.to_string()],
                    ..Default::default()
                },
            );
        };
        add("/sys/class/hwmon/hwmonX/name");
        add("/sys/class/net/ethX/speed");
        add("/...");

        let groups = PatternCompiler::new().compile_all(&mut repo);
        assert_eq!(groups.len(), 3);

        let names: Vec<&str> = groups
            .candidates("/sys/class/hwmon/hwmon0/name")
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert!(names.contains(&"/sys/class/hwmon/hwmonX/name"));
        // the fallback bucket always rides along
        assert!(names.contains(&"/..."));
        assert!(!names.contains(&"/sys/class/net/ethX/speed"));
    }

    #[test]
    fn invalid_compile_is_dropped_with_warning() {
        let mut repo = SymbolRepository::new();
        repo.symbols.insert(
            "abi_sys_foo".to_string(),
            crate::symbols::AbiSymbol {
                names: vec!["/sys/foo/(".to_string()],
                ..Default::default()
            },
        );

        let groups = PatternCompiler::new().compile_all(&mut repo);
        assert!(groups.is_empty());
        assert!(
            repo.warnings
                .iter()
                .any(|w| w.message.contains("invalid regex"))
        );
    }

    #[test]
    fn non_sysfs_names_are_skipped() {
        let mut repo = SymbolRepository::new();
        repo.symbols.insert(
            "abi_proc_foo".to_string(),
            crate::symbols::AbiSymbol {
                names: vec!["/proc/foo".to_string()],
                ..Default::default()
            },
        );

        let groups = PatternCompiler::new().compile_all(&mut repo);
        assert!(groups.is_empty());
        assert!(repo.symbols["abi_proc_foo"].patterns.is_empty());
    }
}
