//! Output formatting for CLI commands.
//!
//! This module renders diff and seed reports as colored tables or JSON.

use colored::Colorize;
use std::fmt::Write;
use std::path::Path;
use tabled::{Table, Tabled};

use crate::planner::{DiffReport, DiffType, SeedReport};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Diff row for table display.
#[derive(Tabled)]
struct DiffRow {
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Fields")]
    fields: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a dry-run diff.
    #[must_use]
    pub fn format_diff(&self, report: &DiffReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => Self::format_diff_text(report),
        }
    }

    fn format_diff_text(report: &DiffReport) -> String {
        if !report.has_changes() && report.conflicts().is_empty() {
            return format!("{} Vault matches the manifest.\n", "✓".green());
        }

        let rows: Vec<DiffRow> = report
            .actionable()
            .into_iter()
            .map(|e| DiffRow {
                action: Self::format_diff_type(e.diff),
                kind: e.kind.clone(),
                path: e.path.clone(),
                fields: Self::truncate(&e.fields.join(", "), 40),
            })
            .collect();

        let mut output = String::from("\nPending changes\n");
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let _ = write!(
            output,
            "\nDiff: {} to add, {} to change, {} to remove, {} unchanged\n",
            report.count(DiffType::Add).to_string().green(),
            (report.count(DiffType::Change) + report.count(DiffType::Overwrite))
                .to_string()
                .yellow(),
            report.count(DiffType::Delete).to_string().red(),
            report.count(DiffType::Noop)
        );

        let conflicts = report.conflicts();
        if !conflicts.is_empty() {
            let _ = write!(output, "\n{} Conflicts:\n", "⚠".yellow());
            for entry in conflicts {
                let _ = writeln!(output, "   - {} {}", entry.kind, entry.path);
            }
        }

        output
    }

    /// Formats the result of an applied seed.
    #[must_use]
    pub fn format_seed(&self, report: &SeedReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                let status = if report.total_changes() == 0 {
                    format!("{} Nothing to change", "✓".green())
                } else {
                    format!("{} Seed complete", "✓".green())
                };
                format!("{status}\n\n{report}")
            }
        }
    }

    /// Formats the location of a written ice file.
    #[must_use]
    pub fn format_freeze(&self, icefile: &Path, count: usize) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                "icefile": icefile.display().to_string(),
                "secrets": count,
            }))
            .unwrap_or_default(),
            OutputFormat::Text => format!(
                "{} Froze {count} secrets into {}\n",
                "✓".green(),
                icefile.display()
            ),
        }
    }

    /// Formats the secret files restored by a thaw.
    #[must_use]
    pub fn format_thaw(&self, thawed: &[String]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                "thawed": thawed,
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = format!("{} Thawed {} secrets\n", "✓".green(), thawed.len());
                for secret in thawed {
                    let _ = writeln!(output, "   {secret}");
                }
                output
            }
        }
    }

    fn format_diff_type(diff: DiffType) -> String {
        match diff {
            DiffType::Add => "+add".green().to_string(),
            DiffType::Change => "~change".yellow().to_string(),
            DiffType::Overwrite => "~overwrite".yellow().to_string(),
            DiffType::Delete => "-delete".red().to_string(),
            DiffType::Conflict => "!conflict".red().bold().to_string(),
            DiffType::Noop => "noop".dimmed().to_string(),
        }
    }

    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}
