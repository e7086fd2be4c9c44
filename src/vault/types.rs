//! Vault API types.
//!
//! These types represent mount metadata as listed by Vault and the
//! requests used to enable mounts.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Which family of mount points a backend belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendRole {
    /// Secret engines (`sys/mounts`).
    Secret,
    /// Auth methods (`sys/auth`).
    Auth,
    /// Audit devices (`sys/audit`).
    Audit,
}

impl BackendRole {
    /// All roles, in the order backends are fetched.
    pub const ALL: [Self; 3] = [Self::Secret, Self::Auth, Self::Audit];

    /// The `sys/` listing endpoint for this role.
    #[must_use]
    pub const fn sys_path(self) -> &'static str {
        match self {
            Self::Secret => "sys/mounts",
            Self::Auth => "sys/auth",
            Self::Audit => "sys/audit",
        }
    }

    /// The tuning endpoint for a mount of this role, if it has one.
    #[must_use]
    pub fn tune_path(self, mount: &str) -> Option<String> {
        match self {
            Self::Secret => Some(format!("sys/mounts/{mount}/tune")),
            Self::Auth => Some(format!("sys/mounts/auth/{mount}/tune")),
            Self::Audit => None,
        }
    }
}

impl fmt::Display for BackendRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secret => write!(f, "secret"),
            Self::Auth => write!(f, "auth"),
            Self::Audit => write!(f, "audit"),
        }
    }
}

/// A mount point as reported by a Vault listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MountInfo {
    /// Engine or method type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Mount description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Engine options (e.g. KV `version`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Map<String, Value>>,
    /// Mount configuration (lease TTLs and so on).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Map<String, Value>>,
}

impl MountInfo {
    /// Creates mount metadata of the given type.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    /// The KV engine version, 1 unless the options say otherwise.
    #[must_use]
    pub fn kv_version(&self) -> u8 {
        self.options
            .as_ref()
            .and_then(|o| o.get("version"))
            .and_then(|v| match v {
                Value::String(s) => s.parse().ok(),
                Value::Number(n) => n.as_u64().and_then(|n| u8::try_from(n).ok()),
                _ => None,
            })
            .unwrap_or(1)
    }

    /// Whether this mount is of the given engine type.
    #[must_use]
    pub fn is_kind(&self, kind: &str) -> bool {
        same_kind(&self.kind, kind)
    }
}

/// Compares engine types, treating `generic` as the old name of `kv`.
#[must_use]
pub fn same_kind(a: &str, b: &str) -> bool {
    fn canonical(kind: &str) -> &str {
        if kind == "generic" { "kv" } else { kind }
    }
    canonical(a) == canonical(b)
}

/// Request to enable a mount point.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MountRequest {
    /// Mount path.
    #[serde(skip)]
    pub path: String,
    /// Engine or method type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Mount description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Mount configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Map<String, Value>>,
    /// Engine options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Map<String, Value>>,
}
