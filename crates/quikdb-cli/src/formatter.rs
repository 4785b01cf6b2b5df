//! Output formatters for command results.

use crate::commands::StatusView;
use clap::ValueEnum;
use comfy_table::{Cell, Table};
use quikdb_core::migration::{MigrationReport, Violation};

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format store status.
    fn format_status(&self, status: &StatusView) -> String;

    /// Format a migration report.
    fn format_report(&self, report: &MigrationReport) -> String;

    /// Format consistency violations.
    fn format_violations(&self, violations: &[Violation]) -> String;

    /// Format a simple message.
    fn format_message(&self, message: &str) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

fn version(v: Option<u64>) -> String {
    v.map_or_else(|| "unversioned".to_string(), |v| format!("v{}", v))
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_status(&self, status: &StatusView) -> String {
        let mut summary = Table::new();
        summary.add_row(vec![Cell::new("Stamped version"), Cell::new(version(status.stamped_version))]);
        summary.add_row(vec![
            Cell::new("Current version"),
            Cell::new(format!("v{}", status.current_version)),
        ]);
        summary.add_row(vec![Cell::new("Schema matches"), Cell::new(status.schema_matches)]);
        match &status.last_run {
            Some(run) => {
                summary.add_row(vec![
                    Cell::new("Last run"),
                    Cell::new(format!(
                        "{} (v{} -> v{}, {} step(s))",
                        run.status, run.from_version, run.to_version, run.completed_steps
                    )),
                ]);
                if let Some(error) = &run.error {
                    summary.add_row(vec![Cell::new("Last error"), Cell::new(error)]);
                }
            }
            None => {
                summary.add_row(vec![Cell::new("Last run"), Cell::new("none")]);
            }
        }

        let mut output = summary.to_string();
        if !status.entities.is_empty() {
            let mut entities = Table::new();
            entities.set_header(vec!["Entity", "Records"]);
            for count in &status.entities {
                entities.add_row(vec![Cell::new(&count.entity), Cell::new(count.records)]);
            }
            output.push_str("\n\n");
            output.push_str(&entities.to_string());
        }
        output
    }

    fn format_report(&self, report: &MigrationReport) -> String {
        if report.initialized {
            return format!("Initialized empty store at v{}", report.to_version);
        }
        if report.is_noop() {
            return format!("Store is current at v{}", report.to_version);
        }

        let mut table = Table::new();
        table.set_header(vec![
            "Step",
            "Description",
            "Transformed",
            "Added",
            "Written",
            "Deleted",
            "Prefs",
            "Fallbacks",
            "ms",
        ]);
        for step in &report.steps {
            table.add_row(vec![
                Cell::new(format!("v{} -> v{}", step.source_version, step.target_version)),
                Cell::new(&step.description),
                Cell::new(step.records_transformed),
                Cell::new(step.records_added),
                Cell::new(step.records_written),
                Cell::new(step.records_deleted),
                Cell::new(step.preferences_changed),
                Cell::new(step.fallbacks),
                Cell::new(step.elapsed_ms),
            ]);
        }

        format!(
            "{}\nMigrated v{} -> v{} ({} fallback(s))",
            table,
            report.from_version,
            report.to_version,
            report.total_fallbacks()
        )
    }

    fn format_violations(&self, violations: &[Violation]) -> String {
        if violations.is_empty() {
            return "Store is consistent".to_string();
        }

        let mut table = Table::new();
        table.set_header(vec!["#", "Violation"]);
        for (i, violation) in violations.iter().enumerate() {
            table.add_row(vec![Cell::new(i + 1), Cell::new(violation)]);
        }
        format!("{}\n{} violation(s)", table, violations.len())
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl JsonFormatter {
    fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|e| {
            serde_json::json!({ "error": e.to_string() }).to_string()
        })
    }
}

impl Formatter for JsonFormatter {
    fn format_status(&self, status: &StatusView) -> String {
        Self::to_json(status)
    }

    fn format_report(&self, report: &MigrationReport) -> String {
        Self::to_json(report)
    }

    fn format_violations(&self, violations: &[Violation]) -> String {
        Self::to_json(violations)
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({ "message": message }).to_string()
    }
}
