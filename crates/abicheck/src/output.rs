//! Output formatting for parse diagnostics and match reports

use abicheck_core::{AbiSymbol, LeafStatus, MatchReport, ParseWarning};
use owo_colors::OwoColorize;

/// Output format for the match report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Print accumulated parse warnings to stderr
pub fn print_warnings(warnings: &[ParseWarning]) {
    if warnings.is_empty() {
        return;
    }
    eprintln!("{} {} parse warnings:", "!".yellow().bold(), warnings.len());
    for warning in warnings {
        eprintln!("  {} {warning}", "-".yellow());
    }
}

/// Print duplicate-name issues to stderr
pub fn print_issues(issues: &[String]) {
    for issue in issues {
        eprintln!("{} {issue}", "!".yellow().bold());
    }
}

/// Print one symbol the way the search subcommand shows results
pub fn print_symbol(index: usize, name: &str, symbol: &AbiSymbol) {
    let title = format!("{index}. {name}");
    println!("\n{title}\n{}\n", "-".repeat(title.len()));

    let version = symbol.version.trim();
    if !version.is_empty() {
        println!("Version:\t\t{version}");
    }
    let date = symbol.date.trim();
    if !date.is_empty() {
        println!("Date:\t\t\t{date}");
    }
    let contact = symbol.contact.trim();
    if !contact.is_empty() {
        println!("Contact:\t\t{contact}");
    }
    let users = symbol.users.trim();
    if !users.is_empty() {
        println!("Users:\t\t\t{users}");
    }

    let files: Vec<&str> = symbol.files.iter().map(|f| f.path.as_str()).collect();
    let plural = if files.len() == 1 { "" } else { "s" };
    println!("Defined on file{plural}:\t{}", files.join(", "));

    if let Some(desc) = &symbol.description {
        let desc = desc.trim();
        if !desc.is_empty() {
            println!("\n{desc}\n");
        }
    }
}

/// Render the match report: diagnostics and unrouted warnings on stderr,
/// the report itself on stdout
pub fn print_match_report(report: &MatchReport, format: OutputFormat) -> eyre::Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    for warning in &report.worker_warnings {
        eprintln!("{} {warning}", "!".yellow().bold());
    }
    for name in report.unrouted() {
        eprintln!("{} missing rules for {name}", "!".yellow().bold());
    }

    // Found/hint diagnostics were requested explicitly; keep them together
    // ahead of the final list. Unrouted entries already went to stderr.
    for result in &report.results {
        if result.status == LeafStatus::Unrouted {
            continue;
        }
        if let Some(message) = &result.message {
            print!("{message}");
        }
    }

    for name in report.not_found() {
        println!("{name} {}", "not found.".red());
    }

    if report.cancelled {
        eprintln!("{} interrupted, results are partial", "!".yellow().bold());
    }

    Ok(())
}
