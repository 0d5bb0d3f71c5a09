//! abicheck-core - ABI documentation parsing and sysfs verification
//!
//! This crate provides the building blocks for:
//! - Parsing the tagged ABI documentation dialect into a symbol database
//! - Compiling documented names (wildcards, digit ranges, enumerations)
//!   into grouped regular expressions
//! - Indexing a live sysfs tree, symlink aliases included
//! - Checking every indexed entry against the compiled patterns with a
//!   worker pool and reporting the undocumented ones
//!
//! # Features
//!
//! - `walk` - directory walking for [`AbiParser::parse`] and
//!   [`SysfsTree::index`] (brings in `ignore`)
//! - `parallel` - the pooled matching strategy (brings in `rayon`)
//!
//! # Parsing documentation
//!
//! ```
//! use abicheck_core::{AbiParser, SymbolRepository};
//! use std::path::Path;
//!
//! let mut repo = SymbolRepository::new();
//! AbiParser::new("Documentation/ABI")
//!     .parse_content(
//!         &mut repo,
//!         Path::new("testing/sysfs-class-net"),
//!         "Name:\t/sys/class/net/ethX/speed\nDescription:\tLink speed.\n",
//!     )
//!     .unwrap();
//!
//! assert_eq!(repo.symbols.len(), 1);
//! ```
//!
//! # Compiling and matching
//!
//! ```
//! use abicheck_core::{
//!     AbiParser, Matcher, MatcherConfig, PatternCompiler, SymbolRepository,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let mut repo = SymbolRepository::new();
//! AbiParser::new("Documentation/ABI")
//!     .parse_content(
//!         &mut repo,
//!         Path::new("testing/sysfs-class-net"),
//!         "Name:\t/sys/class/net/ethX/speed\nDescription:\tLink speed.\n",
//!     )
//!     .unwrap();
//!
//! let groups = Arc::new(PatternCompiler::new().compile_all(&mut repo));
//! let matcher = Matcher::new(groups, MatcherConfig::default());
//! let report = matcher
//!     .run(vec![vec!["/sys/class/net/eth0/speed".to_string()]])
//!     .unwrap();
//!
//! assert!(report.not_found().is_empty());
//! ```

mod matcher;
mod parser;
mod pattern;
mod symbols;
mod tree;

pub use matcher::{
    CancelToken, DEFAULT_CHUNK_SIZE, LeafResult, LeafStatus, MatchReport, Matcher, MatcherConfig,
};
pub use parser::AbiParser;
pub use pattern::{
    CompiledPattern, FALLBACK_GROUP, PatternCompiler, PatternGroups, TRACKED_ROOT, rewrite_name,
};
pub use symbols::{AbiSymbol, FileRecord, FileRef, ParseWarning, SymbolRepository};
pub use tree::{DEFAULT_IGNORE, SysfsTree, TreeNode};

/// Debug verbosity bits, combined into the bitmask the tools accept
pub mod debug {
    /// Trace the parser's symbol state machine
    pub const PARSING: u32 = 1;
    /// Log every documentation file as it is opened
    pub const FILE_OPEN: u32 = 2;
    /// Dump the parsed symbol database
    pub const DUMP: u32 = 4;
    /// Trace every pattern test while checking the hierarchy
    pub const UNDEFINED: u32 = 8;
    /// Trace the documented-name to regex conversion
    pub const REGEX: u32 = 16;
    /// Trace the group chosen for each compiled pattern
    pub const GROUP_MAP: u32 = 32;
    /// Dump the whole group index
    pub const GROUP_DICT: u32 = 64;
    /// Dump the largest pattern groups
    pub const GROUP_SIZE: u32 = 128;
    /// Print the indexed hierarchy as a tree graph
    pub const GRAPH: u32 = 256;
}
