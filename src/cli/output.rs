//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{Scope, ValidationResult};
use crate::coordinator::{OperationReport, Phase, StateView};
use crate::error::TerrascopeError;
use crate::lock::LockRecord;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Lock holder row for table display.
#[derive(Tabled)]
struct LockRow {
    #[tabled(rename = "Scope")]
    scope: String,
    #[tabled(rename = "Holder")]
    holder: String,
    #[tabled(rename = "Operation")]
    operation: String,
    #[tabled(rename = "Since")]
    since: String,
    #[tabled(rename = "Token")]
    token: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns the output format.
    #[must_use]
    pub const fn format(&self) -> OutputFormat {
        self.format
    }

    /// Formats an operation report.
    #[must_use]
    pub fn format_report(&self, report: &OperationReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => {
                let mut output = format!(
                    "{} {} completed for {}\n",
                    "✓".green(),
                    report.operation.bold(),
                    report.scope.as_str().cyan()
                );

                let phases: Vec<String> = report.phases.iter().map(Phase::to_string).collect();
                let _ = writeln!(output, "   Phases: {}", phases.join(" -> "));
                if let Some(digest) = &report.state_digest {
                    let _ = writeln!(output, "   State: {}", &digest[..8.min(digest.len())]);
                }
                let _ = writeln!(output, "   State pushed: {}", yes_no(report.pushed));
                let _ = writeln!(output, "   Lock: {} (released)", report.lock_kind);
                let _ = writeln!(output, "   Took: {:.1}s", Duration(report.duration_ms));
                output
            }
        }
    }

    /// Formats the lock holder of `scope`.
    #[must_use]
    pub fn format_lock_status(&self, scope: &Scope, record: Option<&LockRecord>) -> String {
        match self.format {
            OutputFormat::Json => to_json(&LockStatusJson {
                scope: scope.as_str(),
                locked: record.is_some(),
                record,
            }),
            OutputFormat::Text => record.map_or_else(
                || format!("{} {} is not locked\n", "✓".green(), scope.as_str().cyan()),
                |record| {
                    let row = LockRow {
                        scope: record.scope.to_string(),
                        holder: record.holder.clone(),
                        operation: record.operation.clone(),
                        since: format!(
                            "{} ({} min ago)",
                            record.acquired_at.format("%Y-%m-%d %H:%M:%S UTC"),
                            record.held_for().num_minutes()
                        ),
                        token: record.token.to_string(),
                    };
                    format!("{} {} is locked\n\n{}\n", "🔒".yellow(), scope.as_str().cyan(), Table::new([row]))
                },
            ),
        }
    }

    /// Formats the metadata of a state document. The document itself is
    /// written separately so it can be piped.
    #[must_use]
    pub fn format_state_view(&self, scope: &Scope, view: &StateView) -> String {
        match self.format {
            OutputFormat::Json => to_json(&StateJson {
                scope: scope.as_str(),
                source: &view.source,
                present: view.document.is_some(),
                size: view.document.as_ref().map(crate::state::StateDocument::len),
                digest: view.document.as_ref().map(crate::state::StateDocument::digest),
                document: view
                    .document
                    .as_ref()
                    .map(|d| String::from_utf8_lossy(d.as_bytes()).to_string()),
            }),
            OutputFormat::Text => view.document.as_ref().map_or_else(
                || format!("{} No state for {} in {}\n", "⚠".yellow(), scope.as_str().cyan(), view.source),
                |doc| {
                    format!(
                        "State for {} from {} ({} bytes, {})\n",
                        scope.as_str().cyan(),
                        view.source,
                        doc.len(),
                        doc.short_digest()
                    )
                },
            ),
        }
    }

    /// Formats a settings validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&ValidationJson {
                valid: result.is_valid(),
                errors: result.errors.iter().map(ToString::to_string).collect(),
                warnings: result.warnings.clone(),
            }),
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Settings are valid\n", "✓".green())
                } else {
                    format!("{} Settings are invalid\n", "✗".red())
                };

                for error in &result.errors {
                    let _ = writeln!(output, "   - {error}");
                }

                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats an error, with a recovery hint when the lock was kept.
    #[must_use]
    pub fn format_error(&self, error: &TerrascopeError, scope: Option<&Scope>) -> String {
        let hint = recovery_hint(error, scope);

        match self.format {
            OutputFormat::Json => to_json(&ErrorJson {
                status: "error",
                message: error.to_string(),
                exit_code: error.exit_code(),
                lock_retained: error.lock_retained(),
                consistency_warning: error.is_consistency_warning(),
                hint,
            }),
            OutputFormat::Text => {
                let mut output = format!("{} {error}\n", "✗".red());
                if error.is_consistency_warning() {
                    let _ = writeln!(
                        output,
                        "{} The tool already ran; local and remote state now differ.",
                        "⚠".yellow().bold()
                    );
                }
                if let Some(hint) = hint {
                    let _ = writeln!(output, "\n{hint}");
                }
                output
            }
        }
    }
}

/// Explains how to recover from an error, if there is something to do.
#[must_use]
pub fn recovery_hint(error: &TerrascopeError, scope: Option<&Scope>) -> Option<String> {
    let scope = scope.map_or("this scope", Scope::as_str);

    if error.lock_retained() {
        return Some(format!(
            "The lock on {scope} was kept so nobody builds on a partial change. \
             Bring the infrastructure and state back in line, then rerun with --force \
             or clear it with `terrascope lock clear`."
        ));
    }

    if error.is_contention() {
        return Some(format!(
            "Another run holds {scope}. Wait for it, raise --lock-timeout, \
             or use --force if that run is known to be dead."
        ));
    }

    None
}

fn yes_no(value: bool) -> String {
    if value {
        "yes".green().to_string()
    } else {
        "no".dimmed().to_string()
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

/// Milliseconds displayed as seconds.
struct Duration(u64);

impl std::fmt::Display for Duration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        #[allow(clippy::cast_precision_loss)]
        let secs = self.0 as f64 / 1000.0;
        std::fmt::Display::fmt(&secs, f)
    }
}

// JSON serialization helpers

#[derive(Serialize)]
struct LockStatusJson<'a> {
    scope: &'a str,
    locked: bool,
    record: Option<&'a LockRecord>,
}

#[derive(Serialize)]
struct StateJson<'a> {
    scope: &'a str,
    source: &'a str,
    present: bool,
    size: Option<usize>,
    digest: Option<String>,
    document: Option<String>,
}

#[derive(Serialize)]
struct ValidationJson {
    valid: bool,
    errors: Vec<String>,
    warnings: Vec<String>,
}

#[derive(Serialize)]
struct ErrorJson {
    status: &'static str,
    message: String,
    exit_code: u8,
    lock_retained: bool,
    consistency_warning: bool,
    hint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LockError, ToolError};
    use crate::state::StateDocument;

    fn scope() -> Scope {
        Scope::new("infra/network").expect("valid scope")
    }

    fn report() -> OperationReport {
        OperationReport {
            operation: "apply".into(),
            scope: scope(),
            phases: vec![
                Phase::Idle,
                Phase::Locking,
                Phase::SyncingIn,
                Phase::Running,
                Phase::SyncingOut,
                Phase::Released,
            ],
            state_digest: Some("0123456789abcdef".into()),
            pushed: true,
            lock_released: true,
            lock_kind: "s3".into(),
            duration_ms: 1500,
        }
    }

    #[test]
    fn test_report_json() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let json: serde_json::Value = serde_json::from_str(&formatter.format_report(&report())).expect("json");

        assert_eq!(json["operation"], "apply");
        assert_eq!(json["scope"], "infra/network");
        assert_eq!(json["phases"][4], "syncing_out");
        assert_eq!(json["pushed"], true);
    }

    #[test]
    fn test_report_text() {
        colored::control::set_override(false);
        let text = OutputFormatter::new(OutputFormat::Text).format_report(&report());
        assert!(text.contains("apply completed for infra/network"));
        assert!(text.contains("syncing-in -> running -> syncing-out"));
        assert!(text.contains("State: 01234567"));
        assert!(text.contains("Took: 1.5s"));
    }

    #[test]
    fn test_lock_status_text() {
        colored::control::set_override(false);
        let formatter = OutputFormatter::new(OutputFormat::Text);
        assert!(formatter.format_lock_status(&scope(), None).contains("is not locked"));

        let record = LockRecord::new(&scope(), "alice@host:1", "apply");
        let text = formatter.format_lock_status(&scope(), Some(&record));
        assert!(text.contains("alice@host:1"));
        assert!(text.contains(record.token.as_str()));
    }

    #[test]
    fn test_state_view_json_includes_document() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let view = StateView {
            source: "s3".into(),
            document: Some(StateDocument::from("{\"serial\": 3}")),
        };
        let json: serde_json::Value =
            serde_json::from_str(&formatter.format_state_view(&scope(), &view)).expect("json");
        assert_eq!(json["present"], true);
        assert_eq!(json["document"], "{\"serial\": 3}");
    }

    #[test]
    fn test_recovery_hints() {
        let failed = TerrascopeError::Tool(ToolError::Failed {
            command: "terraform apply".into(),
            code: Some(1),
        });
        let hint = recovery_hint(&failed, Some(&scope())).expect("hint");
        assert!(hint.contains("--force"));
        assert!(hint.contains("infra/network"));

        let contention = TerrascopeError::Lock(LockError::Contention {
            scope: "infra/network".into(),
            holder: "bob@host:2".into(),
            since: "now".into(),
            operation: "plan".into(),
        });
        assert!(recovery_hint(&contention, None).expect("hint").contains("--lock-timeout"));

        assert!(recovery_hint(&TerrascopeError::internal("boom"), None).is_none());
    }

    #[test]
    fn test_error_json() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let err = TerrascopeError::Tool(ToolError::Interrupted {
            command: "terraform apply".into(),
        });
        let json: serde_json::Value = serde_json::from_str(&formatter.format_error(&err, None)).expect("json");
        assert_eq!(json["exit_code"], 130);
        assert_eq!(json["lock_retained"], true);
    }
}
