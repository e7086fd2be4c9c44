//! Diff classification for desired vs existing state.
//!
//! Vault echoes values back in its own shapes: numbers arrive as strings
//! or integers, lists come back where a comma-joined string was written,
//! and absent fields are simply missing. Both sides are normalized before
//! comparing so those quirks do not read as drift.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

/// Fields Vault adds to responses that were never written.
const RESPONSE_ONLY_FIELDS: &[&str] = &["refresh_interval"];

/// Reconciliation decision for a single resource or backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffType {
    /// Nothing to do.
    Noop,
    /// Needs to be created.
    Add,
    /// Exists with different contents.
    Change,
    /// Exists and should not.
    Delete,
    /// Exists but cannot be compared, so it is always rewritten.
    Overwrite,
    /// Cannot be converged in place.
    Conflict,
}

impl DiffType {
    /// Whether applying this decision touches Vault.
    #[must_use]
    pub const fn is_change(self) -> bool {
        !matches!(self, Self::Noop | Self::Conflict)
    }
}

impl fmt::Display for DiffType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Noop => "no-op",
            Self::Add => "add",
            Self::Change => "change",
            Self::Delete => "delete",
            Self::Overwrite => "overwrite",
            Self::Conflict => "conflict",
        };
        write!(f, "{s}")
    }
}

/// Which keys take part in a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareScope {
    /// Every key on either side.
    Exact,
    /// Only keys present in the desired payload. Used for endpoints whose
    /// reads echo server-side defaults.
    DeclaredKeys,
}

/// Classifies a comparable resource.
#[must_use]
pub const fn classify(present: bool, exists: bool, differs: bool) -> DiffType {
    match (exists, present) {
        (false, true) => DiffType::Add,
        (false, false) => DiffType::Noop,
        (true, false) => DiffType::Delete,
        (true, true) if differs => DiffType::Change,
        (true, true) => DiffType::Noop,
    }
}

/// Classifies a resource whose remote state cannot be read back.
#[must_use]
pub const fn classify_write_only(present: bool, exists: bool) -> DiffType {
    match (exists, present) {
        (false, true) => DiffType::Add,
        (true, false) => DiffType::Delete,
        (true, true) => DiffType::Overwrite,
        (false, false) => DiffType::Noop,
    }
}

/// Normalizes a value into the shape used for comparisons.
///
/// - `null` becomes the empty string
/// - integer-looking strings become integers
/// - lists become a sorted, comma-joined string
/// - maps are normalized recursively
#[must_use]
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Null => Value::String(String::new()),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_or_else(|_| value.clone(), |n| Value::Number(n.into())),
        Value::Array(items) => {
            let mut flat: Vec<String> = items.iter().map(|v| flatten(&normalize(v))).collect();
            flat.sort();
            normalize(&Value::String(flat.join(",")))
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), normalize(v)))
                .collect(),
        ),
        Value::Bool(_) | Value::Number(_) => value.clone(),
    }
}

fn flatten(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Drops response-only fields from a fetched map.
#[must_use]
pub fn strip_response_fields(existing: &Map<String, Value>) -> Map<String, Value> {
    existing
        .iter()
        .filter(|(k, _)| !RESPONSE_ONLY_FIELDS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Keys whose normalized values differ between existing and desired.
#[must_use]
pub fn changed_fields(existing: &Value, desired: &Value, scope: CompareScope) -> Vec<String> {
    match (existing, desired) {
        (Value::Object(existing), Value::Object(desired)) => {
            let existing = strip_response_fields(existing);
            let keys: BTreeSet<&String> = match scope {
                CompareScope::Exact => existing.keys().chain(desired.keys()).collect(),
                CompareScope::DeclaredKeys => desired.keys().collect(),
            };

            keys.into_iter()
                .filter(|k| {
                    let old = existing.get(*k).unwrap_or(&Value::Null);
                    let new = desired.get(*k).unwrap_or(&Value::Null);
                    normalize(old) != normalize(new)
                })
                .cloned()
                .collect()
        }
        (existing, desired) if normalize(existing) == normalize(desired) => vec![],
        _ => vec![String::new()],
    }
}

/// Whether a desired payload differs from what was fetched.
#[must_use]
pub fn payload_differs(existing: &Value, desired: &Value, scope: CompareScope) -> bool {
    !changed_fields(existing, desired, scope).is_empty()
}
