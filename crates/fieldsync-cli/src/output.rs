//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use fieldsync_core::sync::CycleReport;
use fieldsync_core::{QueueEntry, Record};

/// Keys tried, in order, to describe a record in one line
const LABEL_KEYS: [&str; 4] = ["name", "title", "description", "status"];

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print a value as pretty JSON
    pub fn json<T: Serialize + ?Sized>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Could not render JSON output: {}", e),
        }
    }

    /// Print a single record
    pub fn print_record(&self, record: &Record) {
        match self.format {
            OutputFormat::Human => {
                let width = record.as_map().keys().map(|k| k.len()).max().unwrap_or(0);
                for (key, value) in record.as_map() {
                    println!("{:width$}  {}", key, display_value(value), width = width);
                }
            }
            OutputFormat::Json => self.json(record),
            OutputFormat::Quiet => println!("{}", record.id().unwrap_or_default()),
        }
    }

    /// Print a list of records
    pub fn print_records(&self, records: &[Record]) {
        match self.format {
            OutputFormat::Human => {
                if records.is_empty() {
                    println!("No records found.");
                    return;
                }
                for record in records {
                    println!(
                        "{} | {} | {}",
                        truncate(&record.id().unwrap_or_default(), 36),
                        truncate(&record.company_id().unwrap_or_default(), 12),
                        truncate(&label(record), 50)
                    );
                }
                println!("\n{} record(s)", records.len());
            }
            OutputFormat::Json => self.json(records),
            OutputFormat::Quiet => {
                for record in records {
                    println!("{}", record.id().unwrap_or_default());
                }
            }
        }
    }

    /// Print unsynced mutation queue entries
    pub fn print_queue(&self, entries: &[QueueEntry]) {
        match self.format {
            OutputFormat::Human => {
                if entries.is_empty() {
                    println!("Nothing waiting to sync.");
                    return;
                }
                for entry in entries {
                    let failure = match (&entry.last_error, entry.attempts) {
                        (Some(error), attempts) => {
                            format!(" ({} failed: {})", attempts, truncate_line(error, 50))
                        }
                        (None, _) => String::new(),
                    };
                    println!(
                        "#{:<5} {} {:<6} {}/{}{}",
                        entry.sequence_id,
                        entry.enqueued_at.format("%Y-%m-%d %H:%M"),
                        entry.action,
                        entry.collection,
                        entry.record_id,
                        failure
                    );
                }
                println!("\n{} pending mutation(s)", entries.len());
            }
            OutputFormat::Json => self.json(entries),
            OutputFormat::Quiet => {
                for entry in entries {
                    println!("{}", entry.sequence_id);
                }
            }
        }
    }

    /// Print the outcome of a sync cycle
    pub fn print_report(&self, report: &CycleReport) {
        match self.format {
            OutputFormat::Human => {
                println!("Pushed:  {} ({} failed)", report.pushed, report.push_failures);
                println!(
                    "Pulled:  {} collection(s) ({} failed)",
                    report.pulled_collections, report.pull_failures
                );
                println!(
                    "Records: {} written, {} removed, {} held for pending edits",
                    report.records_written, report.records_pruned, report.records_skipped
                );
                if report.record_failures > 0 {
                    println!("         {} server record(s) skipped", report.record_failures);
                }
            }
            OutputFormat::Json => self.json(report),
            OutputFormat::Quiet => {}
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a warning to stderr unless quiet
    pub fn warn(&self, msg: &str) {
        if !self.is_quiet() {
            eprintln!("⚠ {}", msg);
        }
    }
}

/// One-line description of a record
fn label(record: &Record) -> String {
    LABEL_KEYS
        .iter()
        .find_map(|key| record.get(key).map(display_value))
        .unwrap_or_else(|| {
            let mut rest = record.as_map().clone();
            rest.remove("id");
            rest.remove("companyId");
            serde_json::Value::Object(rest).to_string()
        })
}

/// Strings without quotes, everything else as JSON
fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Truncate to first line and max length
fn truncate_line(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    truncate(first_line, max_len)
}
