//! Explicit mount declarations and audit devices.

use serde_json::{Map, Value};

use crate::config::SeedEnv;
use crate::config::validator::{Field, check_obj, grok_state, sanitize_mount, vault_time_to_s};
use crate::error::{ManifestError, Result};
use crate::vault::BackendRole;

use super::resource::{BackendSpec, Phase, Resource, ResourceBase, map_val, optional_str};

/// Tuning keys a mount accepts.
const MOUNT_TUNABLES: &[&str] = &["default_lease_ttl", "max_lease_ttl"];

/// Reads the `tune` block of an entry, converting vault times to seconds.
#[must_use]
pub fn grok_tune(obj: &Map<String, Value>) -> Map<String, Value> {
    let mut tune = Map::new();
    let Some(Value::Object(declared)) = obj.get("tune") else {
        return tune;
    };

    for key in MOUNT_TUNABLES {
        map_val(&mut tune, declared, key, key, None);
        let seconds = match tune.get(*key) {
            Some(Value::String(time)) => vault_time_to_s(time),
            _ => None,
        };
        if let Some(seconds) = seconds {
            tune.insert((*key).to_string(), Value::from(seconds));
        }
    }
    tune
}

/// Applies the shared `tune` and `description` keys to a mount declaration.
#[must_use]
pub fn tunable(spec: BackendSpec, obj: &Map<String, Value>) -> BackendSpec {
    let mut spec = spec.with_tune(grok_tune(obj));
    if let Some(description) = optional_str(obj, "description") {
        spec.description = Some(description.to_string());
    }
    spec
}

/// A secret engine mount point declared under `mounts`.
#[derive(Debug)]
pub struct Mount {
    base: ResourceBase,
}

impl Mount {
    /// Builds a mount from its manifest entry.
    ///
    /// # Errors
    ///
    /// Returns a data error if `path` is missing.
    pub fn build(obj: &Map<String, Value>, _env: &SeedEnv) -> Result<Vec<Box<dyn Resource>>> {
        check_obj(&[Field::One("path")], "mount", obj)?;
        let path = sanitize_mount(optional_str(obj, "path").unwrap_or_default());
        let kind = match optional_str(obj, "type").unwrap_or("kv") {
            "generic" => "kv",
            other => other,
        };

        let mut spec = tunable(BackendSpec::secret(path.clone(), kind).governing(), obj);
        if let Some(Value::Bool(force)) = obj.get("force_no_cache") {
            spec.config
                .insert(String::from("force_no_cache"), Value::Bool(*force));
        }
        if let Some(Value::Object(options)) = obj.get("options") {
            spec.options = Some(options.clone());
        }

        let base = ResourceBase::new(path, obj)?.with_backend(spec);
        Ok(vec![Box::new(Self { base })])
    }
}

impl Resource for Mount {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "Mount"
    }

    fn desired(&self, _env: &SeedEnv) -> Result<Value> {
        Ok(Value::Null)
    }

    fn phase(&self) -> Phase {
        Phase::Mount
    }

    fn no_resource(&self) -> bool {
        true
    }
}

/// An audit device declared under `audit_logs`.
#[derive(Debug)]
pub struct AuditLog {
    base: ResourceBase,
}

impl AuditLog {
    /// Builds an audit device from its manifest entry.
    ///
    /// # Errors
    ///
    /// Returns a data error if `type`, or `file_path` for present file
    /// devices, is missing.
    pub fn build(obj: &Map<String, Value>, _env: &SeedEnv) -> Result<Vec<Box<dyn Resource>>> {
        check_obj(&[Field::One("type")], "audit log", obj)?;
        let kind = optional_str(obj, "type").unwrap_or_default();
        let path = sanitize_mount(optional_str(obj, "path").unwrap_or(kind));

        let mut options = Map::new();
        match kind {
            "file" => match optional_str(obj, "file_path") {
                Some(file_path) => {
                    options.insert(String::from("file_path"), Value::from(file_path));
                }
                None if grok_state(obj)? => {
                    return Err(ManifestError::data("file audit log requires file_path").into());
                }
                None => {}
            },
            "syslog" => {
                map_val(&mut options, obj, "tag", "tag", None);
                map_val(&mut options, obj, "facility", "facility", None);
            }
            _ => {}
        }

        let mut spec = BackendSpec::new(BackendRole::Audit, path.clone(), kind).governing();
        spec.description = optional_str(obj, "description").map(String::from);
        spec.options = Some(options);

        let base = ResourceBase::new(path, obj)?.with_backend(spec);
        Ok(vec![Box::new(Self { base })])
    }
}

impl Resource for AuditLog {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "Audit Log"
    }

    fn desired(&self, _env: &SeedEnv) -> Result<Value> {
        Ok(Value::Null)
    }

    fn phase(&self) -> Phase {
        Phase::Audit
    }

    fn no_resource(&self) -> bool {
        true
    }
}
