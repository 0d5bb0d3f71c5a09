//! Checks indexed hierarchy entries against the compiled pattern groups
//!
//! Matching is CPU-bound regex work over read-only data, so the worker
//! model is chosen once from configuration: a single requested worker runs
//! chunks inline in the caller (cheap, still interruptible between leaves),
//! more than one worker fans chunks out over a rayon pool and the
//! orchestrator polls for completed chunks on a channel so it can refresh
//! a progress line. Results are merged commutatively; each leaf is
//! processed by exactly one chunk.

use crate::pattern::PatternGroups;
use crate::{debug, tree::SysfsTree};
use eyre::Result;
use regex::Regex;
use serde::Serialize;
use std::io::IsTerminal;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Default number of leaves per unit of work
pub const DEFAULT_CHUNK_SIZE: usize = 50;

/// Cooperative cancellation flag shared between the orchestrator, the
/// workers and whatever installs the interrupt handler
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Outcome for one checked entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeafStatus {
    /// At least one name matched a candidate pattern
    Found,
    /// Candidate patterns existed but none matched
    NotFound,
    /// No candidate group at all, not even the fallback
    Unrouted,
}

/// Per-entry result
#[derive(Debug, Clone, Serialize)]
pub struct LeafResult {
    /// Canonical name of the entry
    pub name: String,
    pub status: LeafStatus,
    /// Diagnostic detail (matched pattern, or the tried patterns in hint
    /// mode)
    pub message: Option<String>,
}

/// Aggregated outcome of a matching run
#[derive(Debug, Default, Serialize)]
pub struct MatchReport {
    pub results: Vec<LeafResult>,
    /// True when the run was interrupted; results hold whatever finished
    pub cancelled: bool,
    /// Worker failures, one message per failed chunk
    pub worker_warnings: Vec<String>,
}

impl MatchReport {
    /// Canonical names with no match, sorted
    pub fn not_found(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .results
            .iter()
            .filter(|r| r.status == LeafStatus::NotFound)
            .map(|r| r.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Canonical names with no candidate group, sorted
    pub fn unrouted(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .results
            .iter()
            .filter(|r| r.status == LeafStatus::Unrouted)
            .map(|r| r.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    fn absorb(&mut self, outcome: ChunkOutcome) {
        match outcome {
            ChunkOutcome::Done(results) => self.results.extend(results),
            ChunkOutcome::Failed(message) => self.worker_warnings.push(message),
        }
    }
}

/// Tuning knobs consumed by [`Matcher`]
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Requested worker count; capped to the available parallelism
    pub max_workers: usize,
    /// Upper bound on leaves per unit of work
    pub chunk_size: usize,
    /// Record the tried patterns for entries that match nothing
    pub show_hints: bool,
    /// Record a diagnostic for matched entries too
    pub show_found: bool,
    /// Refresh a progress line on stderr while running
    pub progress: bool,
    /// Debug bits (see [`crate::debug`])
    pub debug: u32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            max_workers: 1,
            chunk_size: DEFAULT_CHUNK_SIZE,
            show_hints: false,
            show_found: false,
            progress: false,
            debug: 0,
        }
    }
}

/// Worker model, fixed once per run from the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecStrategy {
    /// Run chunks inline in the caller
    Serial,
    /// Fan chunks out over an isolated thread pool
    #[cfg_attr(not(feature = "parallel"), allow(dead_code))]
    Pooled(usize),
}

impl ExecStrategy {
    fn select(requested: usize) -> Self {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let workers = requested.min(available).max(1);

        if cfg!(feature = "parallel") && workers > 1 {
            ExecStrategy::Pooled(workers)
        } else {
            ExecStrategy::Serial
        }
    }

    fn workers(self) -> usize {
        match self {
            ExecStrategy::Serial => 1,
            ExecStrategy::Pooled(n) => n,
        }
    }
}

/// Matches hierarchy entries against the pattern groups
pub struct Matcher {
    groups: Arc<PatternGroups>,
    config: MatcherConfig,
    cancel: CancelToken,
    /// Optional pre-compiled filter applied to canonical names
    filter: Option<Regex>,
}

impl Matcher {
    pub fn new(groups: Arc<PatternGroups>, config: MatcherConfig) -> Self {
        Self {
            groups,
            config,
            cancel: CancelToken::new(),
            filter: None,
        }
    }

    /// Restrict the run to entries whose canonical name matches `filter`.
    /// The expression must be compiled by the caller before any parsing
    /// starts; an invalid one is a startup error, not a warning.
    pub fn with_filter(mut self, filter: Regex) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Token to cancel this run from an interrupt handler
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The entries a run would check, filter applied
    pub fn collect_leaves(&self, tree: &SysfsTree) -> Vec<Vec<String>> {
        tree.leaves()
            .into_iter()
            .filter(|names| match (&self.filter, names.first()) {
                (Some(filter), Some(name)) => filter.is_match(name),
                _ => true,
            })
            .collect()
    }

    /// Check every leaf and aggregate the outcome. Interruption yields a
    /// clean report carrying whatever was computed before the flag was
    /// raised.
    pub fn run(&self, leaves: Vec<Vec<String>>) -> Result<MatchReport> {
        let total = leaves.len();
        let strategy = ExecStrategy::select(self.config.max_workers);

        // Spread the leaves evenly when the requested chunking is coarser
        // than the worker count allows
        let max_chunk = total.div_ceil(strategy.workers()).max(1);
        let chunk_size = self.config.chunk_size.min(max_chunk).max(1);

        let worker = ChunkWorker {
            groups: Arc::clone(&self.groups),
            cancel: self.cancel.clone(),
            show_hints: self.config.show_hints,
            show_found: self.config.show_found,
            debug: self.config.debug,
        };

        match strategy {
            ExecStrategy::Serial => Ok(self.run_serial(&worker, &leaves, chunk_size)),
            #[cfg(feature = "parallel")]
            ExecStrategy::Pooled(workers) => self.run_pooled(worker, leaves, chunk_size, workers),
            #[cfg(not(feature = "parallel"))]
            ExecStrategy::Pooled(_) => Ok(self.run_serial(&worker, &leaves, chunk_size)),
        }
    }

    fn run_serial(
        &self,
        worker: &ChunkWorker,
        leaves: &[Vec<String>],
        chunk_size: usize,
    ) -> MatchReport {
        let mut report = MatchReport::default();
        let start = Instant::now();
        let total = leaves.len().div_ceil(chunk_size.max(1)).max(1);

        for (done, chunk) in leaves.chunks(chunk_size).enumerate() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.absorb(ChunkOutcome::Done(worker.check(chunk)));
            self.progress(start, done + 1, total);
        }

        report.cancelled |= self.cancel.is_cancelled();
        report
    }

    #[cfg(feature = "parallel")]
    fn run_pooled(
        &self,
        worker: ChunkWorker,
        mut leaves: Vec<Vec<String>>,
        chunk_size: usize,
        workers: usize,
    ) -> Result<MatchReport> {
        use eyre::WrapErr;
        use rand::seq::SliceRandom;
        use std::panic::{AssertUnwindSafe, catch_unwind};
        use std::sync::mpsc;
        use std::time::Duration;

        // Mixing cheap and expensive names across chunks evens out
        // per-chunk cost
        leaves.shuffle(&mut rand::rng());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .wrap_err("failed to build worker pool")?;

        let (tx, rx) = mpsc::channel::<ChunkOutcome>();
        let mut submitted = 0usize;

        for chunk in leaves.chunks(chunk_size) {
            if self.cancel.is_cancelled() {
                break;
            }
            let tx = tx.clone();
            let worker = worker.clone();
            let chunk = chunk.to_vec();
            pool.spawn(move || {
                let outcome = match catch_unwind(AssertUnwindSafe(|| worker.check(&chunk))) {
                    Ok(results) => ChunkOutcome::Done(results),
                    Err(_) => ChunkOutcome::Failed("worker panicked on a chunk".to_string()),
                };
                // The receiver is gone only when the run was abandoned
                let _ = tx.send(outcome);
            });
            submitted += 1;
        }
        drop(tx);

        let mut report = MatchReport::default();
        let start = Instant::now();
        let mut completed = 0usize;

        while completed < submitted {
            match rx.recv_timeout(Duration::from_secs(1)) {
                Ok(outcome) => {
                    report.absorb(outcome);
                    completed += 1;
                    self.progress(start, completed, submitted);
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    self.progress(start, completed, submitted);
                    if self.cancel.is_cancelled() {
                        // Abandon outstanding chunks; they notice the flag
                        // and wind down on their own
                        break;
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        report.cancelled = self.cancel.is_cancelled();
        Ok(report)
    }

    fn progress(&self, start: Instant, completed: usize, total: usize) {
        if !self.config.progress || !std::io::stderr().is_terminal() {
            return;
        }
        let elapsed = start.elapsed().as_secs();
        eprint!(
            "{:02}:{:02}:{:02} ({completed}/{total} jobs completed).  \r",
            elapsed / 3600,
            (elapsed / 60) % 60,
            elapsed % 60
        );
    }
}

enum ChunkOutcome {
    Done(Vec<LeafResult>),
    Failed(String),
}

/// The per-chunk matching loop, shared by both strategies
#[derive(Clone)]
struct ChunkWorker {
    groups: Arc<PatternGroups>,
    cancel: CancelToken,
    show_hints: bool,
    show_found: bool,
    debug: u32,
}

impl ChunkWorker {
    fn check(&self, chunk: &[Vec<String>]) -> Vec<LeafResult> {
        let mut results = Vec::with_capacity(chunk.len());

        for names in chunk {
            // An abandoned chunk returns what it has
            if self.cancel.is_cancelled() {
                break;
            }

            let Some(canonical) = names.first() else {
                continue;
            };
            let candidates = self.groups.candidates(canonical);

            if candidates.is_empty() {
                results.push(LeafResult {
                    name: canonical.clone(),
                    status: LeafStatus::Unrouted,
                    message: Some(format!("missing rules for {canonical}")),
                });
                continue;
            }

            let mut found = false;
            let mut message = String::new();

            // Each alias is checked on its own so a hint can name the
            // alias that matched; the first hit ends the search for that
            // name only
            for name in names {
                for pattern in &candidates {
                    if self.debug & debug::UNDEFINED != 0 {
                        tracing::debug!("check if {name} matches '{}'", pattern.regex.as_str());
                    }
                    if pattern.regex.is_match(name) {
                        found = true;
                        if self.show_found {
                            message.push_str(&format!(
                                "  {name}: matched {}\n",
                                pattern.regex.as_str()
                            ));
                        }
                        break;
                    }
                }
            }

            if !found && self.show_hints {
                message.push_str(&format!("  {canonical} not found. Tested regexes:\n"));
                for pattern in &candidates {
                    message.push_str("    ");
                    message.push_str(pattern.regex.as_str());
                    message.push('\n');
                }
            }

            results.push(LeafResult {
                name: canonical.clone(),
                status: if found {
                    LeafStatus::Found
                } else {
                    LeafStatus::NotFound
                },
                message: (!message.is_empty()).then_some(message),
            });
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::PatternCompiler;
    use crate::symbols::{AbiSymbol, SymbolRepository};

    fn groups_for(names: &[&str]) -> Arc<PatternGroups> {
        let mut repo = SymbolRepository::new();
        for name in names {
            let key = SymbolRepository::mint_key(name);
            repo.symbols.insert(
                key,
                AbiSymbol {
                    names: vec![name.to_string()],
                    ..Default::default()
                },
            );
        }
        Arc::new(PatternCompiler::new().compile_all(&mut repo))
    }

    fn tree_with(paths: &[&str]) -> SysfsTree {
        let mut tree = SysfsTree::new().unwrap();
        for path in paths {
            tree.add_path(path, None);
        }
        tree
    }

    #[test]
    fn found_not_found_and_unrouted_are_distinct() {
        let groups = groups_for(&["/sys/class/hwmon/hwmonX/name"]);
        let matcher = Matcher::new(groups, MatcherConfig::default());

        let leaves = vec![
            vec!["/sys/class/hwmon/hwmon0/name".to_string()],
            vec!["/sys/class/hwmon/hwmon0/fault".to_string()],
            vec!["/sys/kernel/profiling".to_string()],
        ];
        let report = matcher.run(leaves).unwrap();

        assert_eq!(report.results.len(), 3);
        let status_of = |name: &str| {
            report
                .results
                .iter()
                .find(|r| r.name == name)
                .unwrap()
                .status
        };
        assert_eq!(status_of("/sys/class/hwmon/hwmon0/name"), LeafStatus::Found);
        // no trailing segment of these names selects any group, and the
        // fallback bucket is empty
        assert_eq!(
            status_of("/sys/class/hwmon/hwmon0/fault"),
            LeafStatus::Unrouted
        );
        assert_eq!(status_of("/sys/kernel/profiling"), LeafStatus::Unrouted);
    }

    #[test]
    fn not_found_requires_candidates() {
        let groups = groups_for(&["/sys/class/net/ethX/speed"]);
        let matcher = Matcher::new(groups, MatcherConfig::default());

        let report = matcher
            .run(vec![vec!["/sys/class/net/eth0/speed".to_string()]])
            .unwrap();
        assert_eq!(report.results[0].status, LeafStatus::Found);

        let report = matcher
            .run(vec![vec!["/sys/class/net/lo.10/speed".to_string()]])
            .unwrap();
        assert_eq!(report.results[0].status, LeafStatus::NotFound);
        assert_eq!(report.not_found(), vec!["/sys/class/net/lo.10/speed"]);
    }

    #[test]
    fn alias_names_can_satisfy_a_leaf() {
        let groups = groups_for(&["/sys/class/net/ethX/speed"]);
        let matcher = Matcher::new(groups, MatcherConfig::default());

        let leaves = vec![vec![
            "/sys/devices/platform/xyz/net/eth0/speed".to_string(),
            "/sys/class/net/eth0/speed".to_string(),
        ]];
        let report = matcher.run(leaves).unwrap();
        assert_eq!(report.results[0].status, LeafStatus::Found);
    }

    #[test]
    fn every_leaf_is_checked_exactly_once_regardless_of_workers() {
        let groups = groups_for(&["/sys/class/net/ethX/speed"]);
        let leaves: Vec<Vec<String>> = (0..137)
            .map(|i| vec![format!("/sys/class/net/eth{i}/speed")])
            .collect();

        for workers in [1, 4] {
            let config = MatcherConfig {
                max_workers: workers,
                chunk_size: 10,
                ..Default::default()
            };
            let matcher = Matcher::new(Arc::clone(&groups), config);
            let report = matcher.run(leaves.clone()).unwrap();

            assert_eq!(report.results.len(), 137, "workers = {workers}");
            let mut names: Vec<&str> =
                report.results.iter().map(|r| r.name.as_str()).collect();
            names.sort_unstable();
            names.dedup();
            assert_eq!(names.len(), 137, "workers = {workers}");
        }
    }

    #[test]
    fn cancellation_returns_cleanly() {
        let groups = groups_for(&["/sys/class/net/ethX/speed"]);
        let matcher = Matcher::new(
            groups,
            MatcherConfig {
                max_workers: 4,
                ..Default::default()
            },
        );

        matcher.cancel_token().cancel();
        let leaves: Vec<Vec<String>> = (0..500)
            .map(|i| vec![format!("/sys/class/net/eth{i}/speed")])
            .collect();
        let report = matcher.run(leaves).unwrap();

        assert!(report.cancelled);
        assert!(report.results.is_empty());
    }

    #[test]
    fn hints_list_tried_patterns() {
        let groups = groups_for(&["/sys/class/hwmon/hwmonX/name"]);
        let matcher = Matcher::new(
            groups,
            MatcherConfig {
                show_hints: true,
                ..Default::default()
            },
        );

        let report = matcher
            .run(vec![vec!["/sys/class/foo/name".to_string()]])
            .unwrap();
        let result = &report.results[0];
        assert_eq!(result.status, LeafStatus::NotFound);
        let message = result.message.as_deref().unwrap();
        assert!(message.contains("not found. Tested regexes:"));
        assert!(message.contains("hwmon"));
    }

    #[test]
    fn filter_narrows_collected_leaves() {
        let groups = groups_for(&["/sys/class/net/ethX/speed"]);
        let tree = tree_with(&["/sys/class/net/eth0/speed", "/sys/class/tty/tty0"]);

        let matcher = Matcher::new(groups, MatcherConfig::default())
            .with_filter(Regex::new("net").unwrap());
        let leaves = matcher.collect_leaves(&tree);

        assert!(leaves.iter().all(|n| n[0].contains("net")));
        assert!(!leaves.is_empty());
    }

    #[test]
    fn chunk_size_spreads_leaves_across_workers() {
        // 7 leaves over 4 workers: ceil(7/4) = 2 per chunk at most
        assert_eq!(7usize.div_ceil(4).max(1), 2);
        // never below one
        assert_eq!(0usize.div_ceil(4).max(1), 1);
    }
}
