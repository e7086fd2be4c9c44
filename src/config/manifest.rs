//! Manifest (Secretfile) loading.
//!
//! The manifest is rendered as a template, parsed from YAML and kept as a
//! loosely typed document. Individual entries are validated by the
//! resource model as they are turned into resources.

use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{ManifestError, Result};

use super::env::SeedEnv;

/// Top-level keys the model knows how to turn into resources.
pub const RESOURCE_KEYS: &[&str] = &[
    "mounts",
    "audit_logs",
    "userpass",
    "ldap_auth",
    "policies",
    "secrets",
    "apps",
    "approles",
    "tokenroles",
    "users",
    "ldap_groups",
    "ldap_users",
    "duo",
];

/// Key consumed by the archive encryption rather than the model.
pub const PGP_KEYS: &str = "pgp_keys";

/// A parsed manifest document.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    document: Map<String, Value>,
}

impl Manifest {
    /// Wraps an already parsed document.
    ///
    /// # Errors
    ///
    /// Returns a data error if the document is not a map.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(document) => Ok(Self { document }),
            _ => Err(ManifestError::data("manifest must be a map of resource lists").into()),
        }
    }

    /// Parses a manifest from YAML text.
    ///
    /// # Errors
    ///
    /// Returns a parse error if the YAML is invalid.
    pub fn parse_yaml(content: &str, source: Option<&Path>) -> Result<Self> {
        debug!("Parsing manifest YAML");

        let value: Value = serde_yaml::from_str(content).map_err(|e| ManifestError::Parse {
            message: format!("YAML parse error: {e}"),
            location: source.map_or_else(|| String::from("<manifest>"), |p| p.display().to_string()),
        })?;

        Self::from_value(value)
    }

    /// Reads, renders and parses a manifest file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, fails to render or parse.
    pub fn load_file(path: &Path, env: &SeedEnv) -> Result<Self> {
        info!("Loading manifest from: {}", path.display());

        if !path.is_file() {
            return Err(ManifestError::file(path, "manifest not found").into());
        }

        let content = std::fs::read_to_string(path)?;
        let rendered = env.render(&content, &Map::new())?;
        Self::parse_yaml(&rendered, Some(path))
    }

    /// Returns the entries declared under a top-level key.
    ///
    /// # Errors
    ///
    /// Returns a data error if the key is not a list of maps.
    pub fn entries(&self, key: &str) -> Result<Vec<&Map<String, Value>>> {
        match self.document.get(key) {
            None | Some(Value::Null) => Ok(vec![]),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_object().ok_or_else(|| {
                        ManifestError::data(format!("entries under {key} must be maps")).into()
                    })
                })
                .collect(),
            Some(_) => Err(ManifestError::data(format!("{key} must be a list")).into()),
        }
    }

    /// Top-level keys with no model. These are only worth a warning.
    #[must_use]
    pub fn unknown_keys(&self) -> Vec<&str> {
        self.document
            .keys()
            .map(String::as_str)
            .filter(|k| *k != PGP_KEYS && !RESOURCE_KEYS.contains(k))
            .collect()
    }

    /// Logs a warning for each unknown top-level key.
    pub fn warn_unknown_keys(&self) {
        for key in self.unknown_keys() {
            warn!("missing model for {key}");
        }
    }

    /// Recipients for archive encryption.
    #[must_use]
    pub fn pgp_keys(&self) -> Vec<String> {
        self.document
            .get(PGP_KEYS)
            .and_then(Value::as_array)
            .map(|keys| {
                keys.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r"
secrets:
  - var_file: db.yml
    mount: secret
    path: db
policies:
  - name: readonly
    file: readonly.hcl
pgp_keys:
  - keybase:someone
frobnicate: []
";

    #[test]
    fn test_parse_and_entries() {
        let manifest = Manifest::parse_yaml(MANIFEST, None).unwrap();
        assert_eq!(manifest.entries("secrets").unwrap().len(), 1);
        assert_eq!(manifest.entries("policies").unwrap().len(), 1);
        assert!(manifest.entries("approles").unwrap().is_empty());
        assert_eq!(manifest.pgp_keys(), vec![String::from("keybase:someone")]);
    }

    #[test]
    fn test_unknown_keys_exclude_pgp_keys() {
        let manifest = Manifest::parse_yaml(MANIFEST, None).unwrap();
        assert_eq!(manifest.unknown_keys(), vec!["frobnicate"]);
    }

    #[test]
    fn test_entries_must_be_maps() {
        let manifest = Manifest::parse_yaml("secrets:\n  - just a string\n", None).unwrap();
        assert!(manifest.entries("secrets").is_err());

        let manifest = Manifest::parse_yaml("secrets: nope\n", None).unwrap();
        assert!(manifest.entries("secrets").is_err());
    }

    #[test]
    fn test_load_file_renders_variables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Secretfile");
        std::fs::write(&path, "mounts:\n  - path: {{ mount }}\n").unwrap();

        let mut vars = Map::new();
        vars.insert(String::from("mount"), Value::String(String::from("team")));
        let env = SeedEnv::with_dirs(dir.path(), dir.path()).with_vars(vars);

        let manifest = Manifest::load_file(&path, &env).unwrap();
        let mounts = manifest.entries("mounts").unwrap();
        assert_eq!(mounts[0].get("path"), Some(&Value::String(String::from("team"))));
    }
}
