//! Output formatting utilities

use cascade_lib::Severity;
use chrono::{TimeZone, Utc};
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print rows as a table, or the serializable items as JSON
pub fn print_rows<R: Tabled, T: Serialize>(rows: Vec<R>, items: &T, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("{}", "No items found".yellow());
                return;
            }
            let table = Table::new(rows).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => print_json(items),
    }
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => print_error(&format!("Failed to encode JSON: {}", e)),
    }
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format epoch milliseconds as RFC 3339
pub fn format_timestamp(millis: i64) -> String {
    match Utc.timestamp_millis_opt(millis).single() {
        Some(ts) => ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        None => millis.to_string(),
    }
}

/// Format a statistic with a precision that suits its magnitude
pub fn format_value(value: f64) -> String {
    if value.is_infinite() {
        return "-".to_string();
    }
    if value != 0.0 && value.abs() < 0.01 {
        format!("{:.3e}", value)
    } else {
        format!("{:.2}", value)
    }
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "healthy" => status.green().to_string(),
        "degraded" => status.yellow().to_string(),
        "unhealthy" => status.red().to_string(),
        _ => status.to_string(),
    }
}

/// Color severity band
pub fn color_severity(severity: Severity) -> String {
    let label = severity.to_string();
    match severity {
        Severity::Normal => label,
        Severity::Moderate => label.yellow().to_string(),
        Severity::High => label.red().bold().to_string(),
    }
}
