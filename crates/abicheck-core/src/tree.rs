//! Indexes a live sysfs hierarchy into a name graph
//!
//! Every discovered entry becomes a node keyed by its canonical path. A
//! symbolic link contributes the resolved target as the canonical path and
//! the link path as an alias on the same node, so an entry reachable under
//! several names is registered once with all of them. When the tool is
//! pointed at a relocated copy of the tree, every path is normalized back
//! onto `/sys` so documentation patterns keep matching.

use crate::pattern::TRACKED_ROOT;
use eyre::Result;
use regex::RegexSet;
use std::collections::BTreeMap;
use std::fmt::Write as _;
#[cfg(feature = "walk")]
use std::path::Path;

/// Subtrees never checked: either undocumented by design (debugfs,
/// tracefs, module parameters) or documented elsewhere (firmware).
pub const DEFAULT_IGNORE: &[&str] = &[
    "^/sys/kernel/debug",
    "^/sys/kernel/tracing",
    "^/sys/fs/pstore",
    "^/sys/fs/bpf",
    "^/sys/fs/fuse",
    "^/sys/module",
    "^/sys/fs/cgroup",
    "^/sys/firmware",
    "sections|notes",
    "parameters",
];

/// Graph printing stops below this depth to keep the dump readable
const GRAPH_MAX_DEPTH: usize = 5;

/// One path segment of the indexed hierarchy
#[derive(Debug, Default)]
pub struct TreeNode {
    /// Names this entry is reachable by: canonical path first, then any
    /// alias introduced by a symbolic link
    names: Vec<String>,
    children: BTreeMap<String, TreeNode>,
}

impl TreeNode {
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// The indexed hierarchy
#[derive(Debug)]
pub struct SysfsTree {
    root: TreeNode,
    ignore: RegexSet,
}

impl SysfsTree {
    /// Empty tree with the default ignore list
    pub fn new() -> Result<Self> {
        Self::with_ignore(&[])
    }

    /// Empty tree with extra ignore patterns on top of the defaults
    pub fn with_ignore(extra: &[&str]) -> Result<Self> {
        let patterns = DEFAULT_IGNORE.iter().chain(extra.iter());
        let ignore = RegexSet::new(patterns)?;
        Ok(Self {
            root: TreeNode::default(),
            ignore,
        })
    }

    /// Walk `root` and index every file, directory and symbolic link not
    /// matching the ignore list. `root` may be the live mount point or a
    /// relocated copy; paths are normalized onto `/sys` either way.
    #[cfg(feature = "walk")]
    pub fn index(root: &Path) -> Result<Self> {
        let mut tree = Self::new()?;
        tree.walk(root)?;
        Ok(tree)
    }

    #[cfg(feature = "walk")]
    pub fn walk(&mut self, root: &Path) -> Result<()> {
        use eyre::WrapErr;
        use ignore::WalkBuilder;

        let entry_root = root
            .to_string_lossy()
            .trim_end_matches('/')
            .to_string();
        // Link targets come back canonicalized, so they are re-rooted
        // against the canonical form of the root
        let real_root = std::fs::canonicalize(root)
            .map(|p| p.to_string_lossy().trim_end_matches('/').to_string())
            .unwrap_or_else(|_| entry_root.clone());
        let remap_root = entry_root.clone();
        let ignore = self.ignore.clone();

        let walker = WalkBuilder::new(root)
            .standard_filters(false)
            .follow_links(false)
            .sort_by_file_path(|a, b| a.cmp(b))
            .filter_entry(move |entry| {
                let mapped = remap(&entry.path().to_string_lossy(), &remap_root);
                !ignore.is_match(&mapped)
            })
            .build();

        for entry in walker {
            let entry = entry.wrap_err("failed to enumerate hierarchy")?;
            if entry.depth() == 0 {
                continue;
            }

            let path = entry.path();
            let mapped = remap(&path.to_string_lossy(), &entry_root);

            if entry.path_is_symlink() {
                // Resolve the link target first so a directory link never
                // causes recursion; the link path becomes an alias of the
                // resolved node
                let real = match std::fs::canonicalize(path) {
                    Ok(real) => remap(&real.to_string_lossy(), &real_root),
                    Err(err) => {
                        tracing::debug!("skipping dangling link {}: {err}", path.display());
                        continue;
                    }
                };
                if !self.ignore.is_match(&real) {
                    self.add_path(&real, Some(&mapped));
                }
            } else if entry.file_type().is_some_and(|t| t.is_file()) {
                self.add_path(&mapped, None);
            }
            // Plain directories materialize as intermediate nodes of the
            // files below them
        }

        Ok(())
    }

    /// Register `path`, creating intermediate nodes as needed. Adding an
    /// existing path is a no-op apart from appending `alias` to the node's
    /// name set.
    pub fn add_path(&mut self, path: &str, alias: Option<&str>) {
        let mut node = &mut self.root;
        let mut prefix = String::new();

        for segment in path.split('/').filter(|s| !s.is_empty()) {
            prefix.push('/');
            prefix.push_str(segment);
            node = node
                .children
                .entry(segment.to_string())
                .or_insert_with(TreeNode::default);
            if node.names.is_empty() {
                node.names.push(prefix.clone());
            }
        }

        if let Some(alias) = alias {
            let alias = alias.trim_end_matches('/');
            if !node.names.iter().any(|n| n == alias) {
                node.names.push(alias.to_string());
            }
        }
    }

    /// Name sets of every indexed node, canonical name first
    pub fn leaves(&self) -> Vec<Vec<String>> {
        let mut out = Vec::new();
        collect(&self.root, &mut out);
        out
    }

    /// UTF-8 rendering of the tree, alias names annotated, depth-capped
    pub fn render_graph(&self) -> String {
        let mut out = String::new();
        render(&self.root, "", 0, &mut out);
        out
    }
}

fn collect(node: &TreeNode, out: &mut Vec<Vec<String>>) {
    for child in node.children.values() {
        out.push(child.names.clone());
        collect(child, out);
    }
}

fn render(node: &TreeNode, prefix: &str, depth: usize, out: &mut String) {
    if depth > GRAPH_MAX_DEPTH {
        return;
    }

    let count = node.children.len();
    for (i, (segment, child)) in node.children.iter().enumerate() {
        let last = i + 1 == count;
        let (branch, descend) = if depth == 0 {
            ("", "")
        } else if last {
            ("└──", "   ")
        } else {
            ("├──", "│   ")
        };

        let mut label = segment.clone();
        if child.names.len() > 1 {
            let _ = write!(label, " links: {}", child.names[1..].join(","));
        }
        let _ = writeln!(out, "{prefix}{branch}{label}");
        render(child, &format!("{prefix}{descend}"), depth + 1, out);
    }
}

/// Normalize a path from a relocated copy back onto the tracked root
fn remap(path: &str, actual_root: &str) -> String {
    if actual_root == TRACKED_ROOT {
        return path.to_string();
    }
    match path.strip_prefix(actual_root) {
        Some(rest) => format!("{TRACKED_ROOT}{rest}"),
        None => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_create_intermediate_nodes() {
        let mut tree = SysfsTree::new().unwrap();
        tree.add_path("/sys/class/net/eth0/speed", None);

        let leaves = tree.leaves();
        let canonical: Vec<&str> = leaves.iter().map(|n| n[0].as_str()).collect();
        assert_eq!(
            canonical,
            vec![
                "/sys",
                "/sys/class",
                "/sys/class/net",
                "/sys/class/net/eth0",
                "/sys/class/net/eth0/speed"
            ]
        );
    }

    #[test]
    fn alias_extends_existing_node() {
        let mut tree = SysfsTree::new().unwrap();
        tree.add_path("/sys/devices/platform/eth0", None);
        tree.add_path("/sys/devices/platform/eth0", Some("/sys/class/net/eth0"));
        tree.add_path("/sys/devices/platform/eth0", Some("/sys/class/net/eth0"));

        let leaves = tree.leaves();
        let node = leaves
            .iter()
            .find(|n| n[0] == "/sys/devices/platform/eth0")
            .unwrap();
        assert_eq!(
            node.as_slice(),
            ["/sys/devices/platform/eth0", "/sys/class/net/eth0"]
        );
    }

    #[test]
    fn alias_before_real_registration_keeps_canonical_first() {
        let mut tree = SysfsTree::new().unwrap();
        tree.add_path("/sys/devices/foo", Some("/sys/class/foo0"));
        tree.add_path("/sys/devices/foo", None);

        let leaves = tree.leaves();
        let node = leaves.iter().find(|n| n[0] == "/sys/devices/foo").unwrap();
        assert_eq!(node.len(), 2);
        assert_eq!(node[1], "/sys/class/foo0");
    }

    #[test]
    fn remap_normalizes_relocated_roots() {
        assert_eq!(remap("/tmp/copy/class/net", "/tmp/copy"), "/sys/class/net");
        assert_eq!(remap("/sys/class/net", "/sys"), "/sys/class/net");
        assert_eq!(remap("/elsewhere/x", "/tmp/copy"), "/elsewhere/x");
    }

    #[test]
    fn graph_shows_links() {
        let mut tree = SysfsTree::new().unwrap();
        tree.add_path("/sys/a/real", Some("/sys/b/link"));
        let graph = tree.render_graph();
        assert!(graph.contains("real links: /sys/b/link"));
        assert!(graph.contains("└──"));
    }

    #[cfg(feature = "walk")]
    #[test]
    fn walk_resolves_symlink_aliases() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        std::fs::create_dir_all(root.join("devices/platform/eth0")).unwrap();
        std::fs::write(root.join("devices/platform/eth0/speed"), "1000\n").unwrap();
        std::fs::create_dir_all(root.join("class/net")).unwrap();
        symlink(
            root.join("devices/platform/eth0"),
            root.join("class/net/eth0"),
        )
        .unwrap();

        let tree = SysfsTree::index(root).unwrap();
        let leaves = tree.leaves();

        let eth0 = leaves
            .iter()
            .find(|n| n[0] == "/sys/devices/platform/eth0")
            .unwrap();
        assert!(eth0.contains(&"/sys/class/net/eth0".to_string()));

        // The file under the target is registered exactly once
        let speeds: Vec<_> = leaves
            .iter()
            .filter(|n| n[0].ends_with("/speed"))
            .collect();
        assert_eq!(speeds.len(), 1);
    }

    #[cfg(feature = "walk")]
    #[test]
    fn walk_prunes_ignored_subtrees() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        std::fs::create_dir_all(root.join("kernel/debug/tracing")).unwrap();
        std::fs::write(root.join("kernel/debug/marker"), "").unwrap();
        std::fs::create_dir_all(root.join("class")).unwrap();
        std::fs::write(root.join("class/version"), "").unwrap();

        let tree = SysfsTree::index(root).unwrap();
        let leaves = tree.leaves();
        let canonical: Vec<&str> = leaves.iter().map(|n| n[0].as_str()).collect();

        assert!(canonical.contains(&"/sys/class/version"));
        assert!(!canonical.iter().any(|p| p.contains("debug")));
    }
}
