//! Output formatters for command results.

use std::sync::Arc;

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use recordbase_core::{HistoryEntry, Record, ResourceDef, SchemaSummary};
use serde::Serialize;
use serde_json::{Map, Value};

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
    /// Format a single record.
    fn format_record(&self, record: &Record) -> String;

    /// Format a list of records.
    fn format_records(&self, records: &[Record]) -> String;

    /// Format a record's change history.
    fn format_history(&self, history: &[HistoryEntry]) -> String;

    /// Format aggregation output rows.
    fn format_rows(&self, rows: &[Map<String, Value>]) -> String;

    /// Format the resources of the catalog.
    fn format_resources(&self, resources: &[Arc<ResourceDef>]) -> String;

    /// Format the result of applying a schema document.
    fn format_summary(&self, summary: &SchemaSummary) -> String;

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

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_record(&self, record: &Record) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Field", "Value"]);
        table.add_row(vec!["id".to_string(), record.id.clone()]);
        table.add_row(vec!["incrementalId".to_string(), record.incremental_id.clone()]);
        if record.archived {
            table.add_row(vec!["archived".to_string(), "true".to_string()]);
        }
        for (key, value) in &record.data {
            table.add_row(vec![key.clone(), value_to_cell(value)]);
        }
        table.add_row(vec![
            "modified".to_string(),
            format!(
                "{} by {}",
                record.modified_at.to_rfc3339(),
                record.modified_by.user
            ),
        ]);
        table.to_string()
    }

    fn format_records(&self, records: &[Record]) -> String {
        if records.is_empty() {
            return "No records".to_string();
        }
        let rows: Vec<Map<String, Value>> = records
            .iter()
            .map(|record| {
                let mut row = Map::new();
                row.insert("id".into(), Value::String(record.incremental_id.clone()));
                row.extend(record.data.iter().map(|(k, v)| (k.clone(), v.clone())));
                row
            })
            .collect();
        let mut output = rows_table(&rows);
        output.push_str(&format!("\n({} record(s))", records.len()));
        output
    }

    fn format_history(&self, history: &[HistoryEntry]) -> String {
        if history.is_empty() {
            return "No changes".to_string();
        }
        let mut table = Table::new();
        table.set_header(vec!["When", "By", "Change", "Field", "Old", "New"]);
        for entry in history {
            let when = entry.created_at.to_rfc3339();
            if entry.changes.is_empty() {
                table.add_row(vec![
                    Cell::new(&when),
                    Cell::new(&entry.created_by.user),
                    Cell::new("-"),
                ]);
            }
            for change in &entry.changes {
                let kind = serde_json::to_value(change.kind)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                table.add_row(vec![
                    Cell::new(&when),
                    Cell::new(&entry.created_by.user),
                    Cell::new(kind),
                    Cell::new(&change.label),
                    Cell::new(change.old.as_ref().map(value_to_cell).unwrap_or_default()),
                    Cell::new(change.new.as_ref().map(value_to_cell).unwrap_or_default()),
                ]);
            }
        }
        table.to_string()
    }

    fn format_rows(&self, rows: &[Map<String, Value>]) -> String {
        if rows.is_empty() {
            return "No results".to_string();
        }
        rows_table(rows)
    }

    fn format_resources(&self, resources: &[Arc<ResourceDef>]) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Id", "Name", "Fields", "Id shape"]);
        for resource in resources {
            table.add_row(vec![
                resource.id.clone(),
                resource.name.clone(),
                resource.fields.len().to_string(),
                resource.id_shape.shape.clone(),
            ]);
        }
        table.to_string()
    }

    fn format_summary(&self, summary: &SchemaSummary) -> String {
        format!(
            "Applied {} permission(s), {} role(s), {} resource(s), {} form(s)",
            summary.permissions, summary.roles, summary.resources, summary.forms
        )
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl JsonFormatter {
    fn pretty<T: Serialize + ?Sized>(value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|e| {
            serde_json::json!({ "error": e.to_string() }).to_string()
        })
    }
}

impl Formatter for JsonFormatter {
    fn format_record(&self, record: &Record) -> String {
        Self::pretty(record)
    }

    fn format_records(&self, records: &[Record]) -> String {
        Self::pretty(records)
    }

    fn format_history(&self, history: &[HistoryEntry]) -> String {
        Self::pretty(history)
    }

    fn format_rows(&self, rows: &[Map<String, Value>]) -> String {
        Self::pretty(rows)
    }

    fn format_resources(&self, resources: &[Arc<ResourceDef>]) -> String {
        let resources: Vec<&ResourceDef> = resources.iter().map(Arc::as_ref).collect();
        Self::pretty(&resources)
    }

    fn format_summary(&self, summary: &SchemaSummary) -> String {
        Self::pretty(summary)
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({ "message": message }).to_string()
    }
}

/// Render rows as a table whose columns are the union of their keys.
fn rows_table(rows: &[Map<String, Value>]) -> String {
    let mut columns: Vec<&String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !columns.contains(&key) {
                columns.push(key);
            }
        }
    }

    let mut table = Table::new();
    table.set_header(columns.iter().map(|c| Cell::new(c)));
    for row in rows {
        table.add_row(
            columns
                .iter()
                .map(|c| Cell::new(row.get(*c).map(value_to_cell).unwrap_or_default())),
        );
    }
    table.to_string()
}

fn value_to_cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(value_to_cell)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}
