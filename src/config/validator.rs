//! Validation helpers for manifest entries.
//!
//! These are the checks every declared entry goes through while the
//! manifest is loaded, plus the selection predicates (tags, include and
//! exclude paths) and the path/time normalisation shared by the model.

use serde_json::{Map, Value};
use std::path::Path;

use crate::error::{ManifestError, Result};

/// A required manifest field, or a group where any one member suffices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// This exact field must be present.
    One(&'static str),
    /// At least one of these fields must be present.
    AnyOf(&'static [&'static str]),
}

impl Field {
    fn satisfied_by(&self, obj: &Map<String, Value>) -> bool {
        match self {
            Self::One(key) => obj.contains_key(*key),
            Self::AnyOf(keys) => keys.iter().any(|k| obj.contains_key(*k)),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::One(key) => (*key).to_string(),
            Self::AnyOf(keys) => keys.join("|"),
        }
    }
}

/// Ensures every required field (or field group) is present.
///
/// # Errors
///
/// Returns a data error naming all missing fields.
pub fn check_obj(required: &[Field], name: &str, obj: &Map<String, Value>) -> Result<()> {
    let missing: Vec<String> = required
        .iter()
        .filter(|f| !f.satisfied_by(obj))
        .map(Field::describe)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ManifestError::data(format!(
            "{name} is missing required fields: {}",
            missing.join(", ")
        ))
        .into())
    }
}

/// Like [`check_obj`], but `payload` fields are only required of entries
/// that are meant to be present. Removing something only needs the fields
/// that locate it.
///
/// # Errors
///
/// Returns a data error naming all missing fields, or a validation error
/// for a malformed `state`.
pub fn check_entry(
    identity: &[Field],
    payload: &[Field],
    name: &str,
    obj: &Map<String, Value>,
) -> Result<()> {
    if grok_state(obj)? {
        let required: Vec<Field> = identity.iter().chain(payload).copied().collect();
        check_obj(&required, name, obj)
    } else {
        check_obj(identity, name, obj)
    }
}

/// Reads the desired state of an entry. Defaults to present.
///
/// # Errors
///
/// Returns a validation error if `state` is neither `present` nor `absent`.
pub fn grok_state(obj: &Map<String, Value>) -> Result<bool> {
    match obj.get("state") {
        None => Ok(true),
        Some(Value::String(s)) => match s.to_lowercase().as_str() {
            "present" => Ok(true),
            "absent" => Ok(false),
            _ => Err(ManifestError::validation("state must be either \"absent\" or \"present\"").into()),
        },
        Some(_) => Err(ManifestError::validation("state must be a string").into()),
    }
}

/// Reads the tag list of an entry.
///
/// # Errors
///
/// Returns a validation error if `tags` is not a list of strings.
pub fn grok_tags(obj: &Map<String, Value>) -> Result<Vec<String>> {
    match obj.get("tags") {
        None | Some(Value::Null) => Ok(vec![]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|t| {
                t.as_str()
                    .map(String::from)
                    .ok_or_else(|| ManifestError::validation("tags must be strings").into())
            })
            .collect(),
        Some(_) => Err(ManifestError::validation("tags must be a list").into()),
    }
}

/// Checks if an entry's tags satisfy the requested tags.
///
/// With nothing requested only untagged entries match. Otherwise every
/// requested tag must be owned.
#[must_use]
pub fn is_tagged(required: &[String], owned: &[String]) -> bool {
    if required.is_empty() {
        return owned.is_empty();
    }

    required.iter().all(|tag| owned.contains(tag))
}

/// Checks a path against explicit include and exclude lists.
///
/// Exclusion always wins over inclusion.
#[must_use]
pub fn specific_path_check(path: &str, include: &[String], exclude: &[String]) -> bool {
    if exclude.iter().any(|p| p == path) {
        return false;
    }

    include.is_empty() || include.iter().any(|p| p == path)
}

/// Normalizes a mount point: no leading, trailing or doubled slashes.
#[must_use]
pub fn sanitize_mount(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Ensures a local secret file exists and is not world accessible.
///
/// # Errors
///
/// Returns a file error if the file is missing or insecurely permissioned.
pub fn secret_file(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(ManifestError::file(path, "secret file does not exist").into());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mode = std::fs::metadata(path)?.permissions().mode();
        if mode & 0o007 != 0 {
            return Err(ManifestError::file(
                path,
                format!("secret file is accessible by others (mode {:o})", mode & 0o777),
            )
            .into());
        }
    }

    Ok(())
}

/// Returns true for Vault duration strings such as `30`, `15m` or `1h`.
#[must_use]
pub fn is_vault_time(value: &str) -> bool {
    vault_time_to_s(value).is_some()
}

/// Converts a Vault duration string into seconds.
#[must_use]
pub fn vault_time_to_s(value: &str) -> Option<u64> {
    let value = value.trim();
    let (digits, multiplier) = match value.chars().last()? {
        's' => (&value[..value.len() - 1], 1),
        'm' => (&value[..value.len() - 1], 60),
        'h' => (&value[..value.len() - 1], 3600),
        'd' => (&value[..value.len() - 1], 86_400),
        c if c.is_ascii_digit() => (value, 1),
        _ => return None,
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    digits.parse::<u64>().ok()?.checked_mul(multiplier)
}
