//! abicheck - verify a live sysfs tree against ABI documentation
//!
//! abicheck parses the tagged ABI documentation dialect into a symbol
//! database, derives a regular expression for each documented name, and
//! checks the entries of a live (or relocated) sysfs tree against them,
//! reporting the undocumented ones.

mod output;

use abicheck_core::{
    AbiParser, Matcher, MatcherConfig, PatternCompiler, SysfsTree, debug,
};
use clap::{Parser, Subcommand};
use eyre::{Result, WrapErr};
use output::OutputFormat;
use owo_colors::OwoColorize;
use regex::RegexBuilder;
use std::path::PathBuf;
use std::sync::Arc;

const DEBUG_HELP: &str = "\
Debug bits for --debug (combine by adding):
   1 - parser state machine
   2 - file opens
   4 - dump the parsed symbol database
   8 - every pattern test while checking the hierarchy
  16 - documented-name to regex conversion
  32 - group chosen for each compiled pattern
  64 - dump the whole group index
 128 - dump the largest pattern groups
 256 - print the indexed hierarchy as a tree graph";

/// Parse ABI documentation and verify a sysfs tree against it
#[derive(Debug, Parser)]
#[command(name = "abicheck", version, after_help = DEBUG_HELP)]
struct Cli {
    /// Directory holding the ABI documentation
    #[arg(
        short = 'D',
        long = "dir",
        global = true,
        default_value = "Documentation/ABI"
    )]
    dir: PathBuf,

    /// Debug verbosity bitmask
    #[arg(short = 'd', long, global = true, default_value_t = 0)]
    debug: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Parse the documentation tree and report issues
    Validate,

    /// Search documented symbols with a case-insensitive regular expression
    Search {
        /// Search pattern for the documented name
        expression: String,
    },

    /// Check a sysfs tree for entries missing documentation
    Undefined {
        /// Directory where sysfs is mounted (or a copy of it)
        #[arg(short = 'S', long, default_value = "/sys")]
        sysfs_dir: PathBuf,

        /// Only check entries whose name matches this regular expression
        #[arg(short = 's', long)]
        search_string: Option<String>,

        /// Show the tested patterns for entries that match nothing
        #[arg(short = 'H', long)]
        show_hints: bool,

        /// Worker count; more than one enables the parallel strategy
        #[arg(short = 'j', long = "jobs", default_value_t = 1)]
        jobs: usize,

        /// Maximum number of entries per unit of work
        #[arg(short = 'c', long, default_value_t = abicheck_core::DEFAULT_CHUNK_SIZE)]
        max_chunk_size: usize,

        /// Also show found entries (helpful to debug the patterns)
        #[arg(short = 'f', long)]
        found: bool,

        /// List the entries that would be checked, without matching
        #[arg(long)]
        dry_run: bool,

        /// Report format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug != 0 { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Command::Validate => run_validate(&cli),
        Command::Search { expression } => run_search(&cli, expression),
        Command::Undefined {
            sysfs_dir,
            search_string,
            show_hints,
            jobs,
            max_chunk_size,
            found,
            dry_run,
            format,
        } => run_undefined(
            &cli,
            sysfs_dir,
            search_string.as_deref(),
            *show_hints,
            *jobs,
            *max_chunk_size,
            *found,
            *dry_run,
            *format,
        ),
    }
}

fn run_validate(cli: &Cli) -> Result<()> {
    let repo = AbiParser::new(&cli.dir).with_debug(cli.debug).parse()?;

    output::print_warnings(&repo.warnings);
    output::print_issues(&repo.duplicate_name_issues());

    eprintln!(
        "{} {} symbols across {} files",
        "OK".green().bold(),
        repo.symbols.len().to_string().green(),
        repo.files.len()
    );
    Ok(())
}

fn run_search(cli: &Cli, expression: &str) -> Result<()> {
    // The expression must compile before any parsing starts
    let regex = RegexBuilder::new(expression)
        .case_insensitive(true)
        .build()
        .wrap_err_with(|| format!("{expression} is not a valid regular expression"))?;

    let repo = AbiParser::new(&cli.dir).with_debug(cli.debug).parse()?;

    let mut count = 0;
    for (_key, symbol, name) in repo.search(&regex) {
        count += 1;
        output::print_symbol(count, name, symbol);
    }

    if count == 0 {
        println!("Regular expression /{expression}/ not found.");
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_undefined(
    cli: &Cli,
    sysfs_dir: &std::path::Path,
    search_string: Option<&str>,
    show_hints: bool,
    jobs: usize,
    max_chunk_size: usize,
    found: bool,
    dry_run: bool,
    format: OutputFormat,
) -> Result<()> {
    // An invalid filter aborts before any work begins
    let filter = search_string
        .map(|expr| {
            RegexBuilder::new(expr)
                .build()
                .wrap_err_with(|| format!("{expr} is not a valid regular expression"))
        })
        .transpose()?;

    eprintln!(
        "{} Parsing documentation from {}...",
        "->".blue().bold(),
        cli.dir.display()
    );
    let mut repo = AbiParser::new(&cli.dir).with_debug(cli.debug).parse()?;
    if cli.debug & debug::DUMP != 0 {
        tracing::debug!("{repo:#?}");
    }

    eprintln!("{} Converting documented names into regexes...", "->".blue().bold());
    let groups = PatternCompiler::new()
        .with_debug(cli.debug)
        .compile_all(&mut repo);
    if cli.debug & debug::GROUP_DICT != 0 {
        tracing::debug!("{groups:#?}");
    }
    output::print_warnings(&repo.warnings);

    eprintln!(
        "{} Reading {} directory contents...",
        "->".blue().bold(),
        sysfs_dir.display()
    );
    let tree = SysfsTree::index(sysfs_dir)?;
    if cli.debug & debug::GRAPH != 0 {
        print!("{}", tree.render_graph());
    }

    let config = MatcherConfig {
        max_workers: jobs,
        chunk_size: max_chunk_size,
        show_hints,
        show_found: found,
        progress: true,
        debug: cli.debug,
    };
    let mut matcher = Matcher::new(Arc::new(groups), config);
    if let Some(filter) = filter {
        matcher = matcher.with_filter(filter);
    }

    let leaves = matcher.collect_leaves(&tree);

    if leaves.is_empty() {
        match search_string {
            Some(expr) => println!("No entry matches {expr}"),
            None => tracing::warn!("no entries found under {}", sysfs_dir.display()),
        }
        return Ok(());
    }

    if dry_run {
        eprintln!("Would check");
        for names in &leaves {
            println!("{}", names.join(", "));
        }
        return Ok(());
    }

    eprintln!("Starting to search symbols (it may take several minutes):");
    eprintln!("Number of entries to check: {}", leaves.len());

    let token = matcher.cancel_token();
    ctrlc::set_handler(move || token.cancel())
        .wrap_err("failed to install interrupt handler")?;

    let report = matcher.run(leaves)?;
    output::print_match_report(&report, format)
}
