//! Output formatting for CLI commands.
//!
//! This module renders results for the user, either as colored text with
//! tables or as JSON for scripting.

use colored::Colorize;
use serde_json::Value;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::api::ResourceKind;
use crate::build::BuildResult;
use crate::reconciler::ApplyResult;
use crate::watch::EnclaveEvent;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the result of a batch apply/remove.
    #[must_use]
    pub fn format_apply(&self, result: &ApplyResult) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&apply_json(result)).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_apply_text(result),
        }
    }

    /// Formats an apply result as text.
    fn format_apply_text(result: &ApplyResult) -> String {
        let mut output = String::new();

        let _ = writeln!(
            output,
            "Created: {}  Changed: {}  Removed: {}",
            result.created.len().to_string().green(),
            result.changed.len().to_string().yellow(),
            result.removed.len().to_string().red(),
        );

        for change in &result.created {
            let _ = writeln!(output, "  {} {change}", "+".green());
        }
        for change in &result.changed {
            let _ = writeln!(output, "  {} {change}", "~".yellow());
        }
        for change in &result.removed {
            let _ = writeln!(output, "  {} {change}", "-".red());
        }

        if !result.errors.is_empty() {
            let _ = writeln!(output, "\n{} Errors:", "✗".red());
            for error in &result.errors {
                let _ = writeln!(output, "  - {error}");
            }
        }

        output
    }

    /// Formats a collection listing.
    #[must_use]
    pub fn format_resources(&self, kind: ResourceKind, documents: &[Value]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(documents).unwrap_or_default(),
            OutputFormat::Text => {
                if documents.is_empty() {
                    return format!("No {kind} resources found.\n");
                }

                let rows: Vec<ResourceRow> = documents
                    .iter()
                    .map(|doc| ResourceRow {
                        name: document_name(doc),
                        state: doc
                            .pointer("/status/state")
                            .and_then(Value::as_str)
                            .unwrap_or("-")
                            .to_string(),
                    })
                    .collect();

                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats a single resource document.
    #[must_use]
    pub fn format_resource(&self, document: &Value) -> String {
        serde_json::to_string_pretty(document).unwrap_or_default()
    }

    /// Formats one enclave topology event.
    #[must_use]
    pub fn format_enclave_event(&self, event: &EnclaveEvent) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string(&enclave_event_json(event)).unwrap_or_default()
            }
            OutputFormat::Text => {
                let tag = match event.event_type {
                    crate::watch::WatchEventType::Added => "ADDED".green(),
                    crate::watch::WatchEventType::Modified => "MODIFIED".yellow(),
                    crate::watch::WatchEventType::Deleted => "DELETED".red(),
                };
                format!("{tag:>8}  {}", event.enclave)
            }
        }
    }

    /// Formats a finished build.
    #[must_use]
    pub fn format_build(&self, result: &BuildResult) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_default(),
            OutputFormat::Text => result.image_name.as_ref().map_or_else(
                || format!("{} Build finished without an image name.", "✗".red()),
                |image| format!("{} Built image: {image}", "✓".green()),
            ),
        }
    }
}

/// JSON shape of an apply result.
fn apply_json(result: &ApplyResult) -> Value {
    let identities = |changes: &[crate::api::ResourceChange]| -> Vec<Value> {
        changes
            .iter()
            .map(|c| serde_json::json!({"kind": c.kind().as_str(), "name": c.name()}))
            .collect()
    };

    serde_json::json!({
        "created": identities(&result.created),
        "changed": identities(&result.changed),
        "removed": identities(&result.removed),
        "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
    })
}

/// JSON shape of an enclave event.
fn enclave_event_json(event: &EnclaveEvent) -> Value {
    serde_json::json!({
        "type": event.event_type.to_string(),
        "enclave": {
            "name": event.enclave.name,
            "controlPlaneEndpoints": event.enclave.control_plane_endpoints,
            "modelEndpoints": event.enclave.model_endpoints,
        },
    })
}

/// Best-effort name of a resource document.
fn document_name(document: &Value) -> String {
    document
        .get("name")
        .and_then(Value::as_str)
        .or_else(|| document.pointer("/metadata/name").and_then(Value::as_str))
        .unwrap_or("-")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ResourceChange;
    use crate::error::ApplyError;

    #[test]
    fn test_apply_json_shape() {
        let result = ApplyResult {
            created: vec![ResourceChange::new(
                ResourceKind::Connection,
                "db",
                Value::Null,
            )],
            changed: vec![],
            removed: vec![],
            errors: vec![ApplyError::ClientUnavailable {
                kind: ResourceKind::ModelRoute,
                name: String::from("r1"),
            }],
        };

        let json = apply_json(&result);
        assert_eq!(json["created"][0]["name"], "db");
        assert_eq!(json["changed"].as_array().unwrap().len(), 0);
        assert!(json["errors"][0].as_str().unwrap().contains("r1"));
    }

    #[test]
    fn test_resource_table_lists_names_and_states() {
        let formatter = OutputFormatter::new(OutputFormat::Text);
        let docs = vec![
            serde_json::json!({"name": "a", "status": {"state": "Ready"}}),
            serde_json::json!({"metadata": {"name": "b"}}),
        ];

        let output = formatter.format_resources(ResourceKind::ModelRoute, &docs);
        assert!(output.contains('a'));
        assert!(output.contains("Ready"));
        assert!(output.contains('b'));
    }
}
