//! Reports produced by a dry run and by an applied sync.

use serde::Serialize;
use std::fmt;

use super::diff::DiffType;

/// One line of a dry-run diff.
#[derive(Debug, Clone, Serialize)]
pub struct DiffEntry {
    /// Human name of the resource kind.
    pub kind: String,
    /// Resource or mount path.
    pub path: String,
    /// Classification.
    pub diff: DiffType,
    /// Fields that differ, when known.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
}

/// Result of a dry run: what a sync would do.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffReport {
    /// Backend rows first, then resource rows, in sync order.
    pub entries: Vec<DiffEntry>,
}

impl DiffReport {
    /// Creates an empty report.
    #[must_use]
    pub const fn new() -> Self {
        Self { entries: vec![] }
    }

    /// Appends a row.
    pub fn push(
        &mut self,
        kind: impl Into<String>,
        path: impl Into<String>,
        diff: DiffType,
        fields: Vec<String>,
    ) {
        self.entries.push(DiffEntry {
            kind: kind.into(),
            path: path.into(),
            diff,
            fields,
        });
    }

    /// Number of rows with the given classification.
    #[must_use]
    pub fn count(&self, diff: DiffType) -> usize {
        self.entries.iter().filter(|e| e.diff == diff).count()
    }

    /// Returns true if a sync would touch Vault.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.entries.iter().any(|e| e.diff.is_change())
    }

    /// Rows that a sync would refuse to apply.
    #[must_use]
    pub fn conflicts(&self) -> Vec<&DiffEntry> {
        self.entries
            .iter()
            .filter(|e| e.diff == DiffType::Conflict)
            .collect()
    }

    /// Rows that need action.
    #[must_use]
    pub fn actionable(&self) -> Vec<&DiffEntry> {
        self.entries
            .iter()
            .filter(|e| e.diff != DiffType::Noop)
            .collect()
    }
}

impl fmt::Display for DiffReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Diff: {} to add, {} to change, {} to delete, {} to overwrite, {} conflicts",
            self.count(DiffType::Add),
            self.count(DiffType::Change),
            self.count(DiffType::Delete),
            self.count(DiffType::Overwrite),
            self.count(DiffType::Conflict),
        )?;
        for entry in self.actionable() {
            writeln!(f, "  {} {} {}", entry.diff, entry.kind, entry.path)?;
        }
        Ok(())
    }
}

/// Result of an applied sync.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SeedReport {
    /// Resources written for the first time.
    pub added: usize,
    /// Resources rewritten because they drifted.
    pub changed: usize,
    /// Resources removed.
    pub deleted: usize,
    /// Write-only resources rewritten.
    pub overwritten: usize,
    /// Resources already converged.
    pub unchanged: usize,
    /// Mount points enabled.
    pub mounted: Vec<String>,
    /// Mount points disabled.
    pub unmounted: Vec<String>,
    /// Mount points retuned.
    pub tuned: Vec<String>,
    /// Unknown mount points removed.
    pub pruned: Vec<String>,
    /// Whether the run stopped after mounts.
    pub mount_only: bool,
}

impl SeedReport {
    /// Records the outcome of one resource sync.
    pub const fn record(&mut self, diff: DiffType) {
        match diff {
            DiffType::Add => self.added += 1,
            DiffType::Change => self.changed += 1,
            DiffType::Delete => self.deleted += 1,
            DiffType::Overwrite => self.overwritten += 1,
            DiffType::Noop | DiffType::Conflict => self.unchanged += 1,
        }
    }

    /// Records the outcome of one backend sync.
    pub fn record_mount(&mut self, path: &str, diff: DiffType) {
        match diff {
            DiffType::Add => self.mounted.push(path.to_string()),
            DiffType::Delete => self.unmounted.push(path.to_string()),
            DiffType::Change | DiffType::Overwrite => self.tuned.push(path.to_string()),
            DiffType::Noop | DiffType::Conflict => {}
        }
    }

    /// Total resource and mount changes applied.
    #[must_use]
    pub fn total_changes(&self) -> usize {
        self.added
            + self.changed
            + self.deleted
            + self.overwritten
            + self.mounted.len()
            + self.unmounted.len()
            + self.tuned.len()
            + self.pruned.len()
    }
}

impl fmt::Display for SeedReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Seed Result:")?;
        writeln!(f, "  Added: {}", self.added)?;
        writeln!(f, "  Changed: {}", self.changed)?;
        writeln!(f, "  Deleted: {}", self.deleted)?;
        writeln!(f, "  Overwritten: {}", self.overwritten)?;
        writeln!(f, "  Unchanged: {}", self.unchanged)?;
        for (label, paths) in [
            ("Mounted", &self.mounted),
            ("Unmounted", &self.unmounted),
            ("Tuned", &self.tuned),
            ("Pruned", &self.pruned),
        ] {
            if !paths.is_empty() {
                writeln!(f, "  {label}: {}", paths.join(", "))?;
            }
        }
        if self.mount_only {
            writeln!(f, "  (stopped after mount points)")?;
        }
        Ok(())
    }
}
