//! The resource abstraction.
//!
//! Every declared manifest entry becomes one or more [`Resource`]s. A
//! resource knows its Vault path, whether it should exist, how to build its
//! desired payload and how to read, write and delete itself. Shared state
//! lives in [`ResourceBase`]; behaviour shared by most kinds lives in the
//! trait's default methods and the free functions below.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use tracing::{debug, error, info};

use crate::config::SeedEnv;
use crate::config::validator::{grok_state, grok_tags};
use crate::error::{ConstraintError, ManifestError, Result, SeedError, VaultError};
use crate::planner::{CompareScope, DiffType, changed_fields, classify, classify_write_only};
use crate::vault::{BackendRole, VaultApi};

/// When, within a sync, a resource is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Audit devices.
    Audit,
    /// ACL policies.
    Policy,
    /// Auth method level configuration.
    AuthWrapper,
    /// Explicit mount declarations.
    Mount,
    /// Everything else.
    Resource,
}

/// The mount point a resource lives under, as the resource declares it.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendSpec {
    /// Mount family.
    pub role: BackendRole,
    /// Normalized mount path.
    pub path: String,
    /// Engine or method type.
    pub kind: String,
    /// Whether this resource is allowed to mount and unmount the path.
    pub governs: bool,
    /// Declared tuning (`default_lease_ttl`, `max_lease_ttl`), in seconds.
    pub tune: Map<String, Value>,
    /// Extra mount configuration sent when mounting.
    pub config: Map<String, Value>,
    /// Mount description.
    pub description: Option<String>,
    /// Engine options.
    pub options: Option<Map<String, Value>>,
}

impl BackendSpec {
    /// Declares a mount of the given role.
    #[must_use]
    pub fn new(role: BackendRole, path: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            role,
            path: path.into(),
            kind: kind.into(),
            governs: false,
            tune: Map::new(),
            config: Map::new(),
            description: None,
            options: None,
        }
    }

    /// Declares a secret engine mount.
    #[must_use]
    pub fn secret(path: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::new(BackendRole::Secret, path, kind)
    }

    /// Declares an auth method mount.
    #[must_use]
    pub fn auth(path: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::new(BackendRole::Auth, path, kind)
    }

    /// Marks the declaration as owning the mount lifecycle.
    #[must_use]
    pub const fn governing(mut self) -> Self {
        self.governs = true;
        self
    }

    /// Sets the declared tuning.
    #[must_use]
    pub fn with_tune(mut self, tune: Map<String, Value>) -> Self {
        self.tune = tune;
        self
    }
}

/// State every resource carries.
#[derive(Debug, Clone)]
pub struct ResourceBase {
    /// Vault path. Fixed at construction.
    pub path: String,
    /// Whether the resource should exist.
    pub present: bool,
    /// Selection tags.
    pub tags: Vec<String>,
    /// Remote state as last fetched.
    pub existing: Option<Value>,
    /// Whether this resource belongs to a parent entry.
    pub child: bool,
    /// Identifies the manifest entry this resource came from.
    pub group: usize,
    /// Mount point the resource lives under.
    pub backend: Option<BackendSpec>,
}

impl ResourceBase {
    /// Builds the base for a top-level manifest entry.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad `state` or `tags` field.
    pub fn new(path: impl Into<String>, obj: &Map<String, Value>) -> Result<Self> {
        Ok(Self {
            path: path.into(),
            present: grok_state(obj)?,
            tags: grok_tags(obj)?,
            existing: None,
            child: false,
            group: 0,
            backend: None,
        })
    }

    /// Builds the base for a child resource.
    #[must_use]
    pub fn child(path: impl Into<String>, present: bool) -> Self {
        Self {
            path: path.into(),
            present,
            tags: vec![],
            existing: None,
            child: true,
            group: 0,
            backend: None,
        }
    }

    /// Attaches the mount point declaration.
    #[must_use]
    pub fn with_backend(mut self, backend: BackendSpec) -> Self {
        self.backend = Some(backend);
        self
    }
}

/// A single declared item of Vault configuration.
#[async_trait]
pub trait Resource: Send + Sync + fmt::Debug {
    /// Shared state.
    fn base(&self) -> &ResourceBase;

    /// Shared state, mutably.
    fn base_mut(&mut self) -> &mut ResourceBase;

    /// Human name of the resource kind.
    fn kind(&self) -> &'static str;

    /// Builds the payload that would be written to Vault.
    ///
    /// # Errors
    ///
    /// Returns an error if a referenced local file is missing or invalid.
    fn desired(&self, env: &SeedEnv) -> Result<Value>;

    /// When this resource is applied.
    fn phase(&self) -> Phase {
        Phase::Resource
    }

    /// Resources that only exist to declare a mount or track a file.
    fn no_resource(&self) -> bool {
        false
    }

    /// Resources whose remote state cannot be compared.
    fn write_only(&self) -> bool {
        false
    }

    /// Which keys a change comparison looks at.
    fn compare_scope(&self) -> CompareScope {
        CompareScope::DeclaredKeys
    }

    /// Local secret files this resource reads, relative to the secrets dir.
    fn secrets(&self) -> Vec<String> {
        vec![]
    }

    /// Tells the resource which KV engine version its mount runs.
    fn set_kv_version(&mut self, _version: u8) {}

    /// Vault path.
    fn path(&self) -> &str {
        &self.base().path
    }

    /// Whether the resource should exist.
    fn present(&self) -> bool {
        self.base().present
    }

    /// Whether the resource belongs to a parent entry.
    fn is_child(&self) -> bool {
        self.base().child
    }

    /// Kind and path, for logs and reports.
    fn describe(&self) -> String {
        format!("{} {}", self.kind(), self.path())
    }

    /// Classifies what a sync would do.
    ///
    /// # Errors
    ///
    /// Returns an error if the desired payload cannot be built.
    fn diff(&self, env: &SeedEnv) -> Result<DiffType> {
        default_diff(self, env)
    }

    /// Fields a sync would change, for reporting.
    ///
    /// # Errors
    ///
    /// Returns an error if the desired payload cannot be built.
    fn changed_fields(&self, env: &SeedEnv) -> Result<Vec<String>> {
        match &self.base().existing {
            Some(existing) if self.present() && !self.write_only() && !self.no_resource() => {
                Ok(changed_fields(existing, &self.desired(env)?, self.compare_scope()))
            }
            _ => Ok(vec![]),
        }
    }

    /// Reads the comparable remote state.
    ///
    /// # Errors
    ///
    /// Returns an error for anything other than "not found" style answers.
    async fn read(&self, client: &dyn VaultApi, _env: &SeedEnv) -> Result<Option<Value>> {
        Ok(read_path(client, self.path()).await?.map(unwrap_data))
    }

    /// Populates `existing` from Vault.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    async fn fetch(&mut self, client: &dyn VaultApi, env: &SeedEnv) -> Result<()> {
        if self.no_resource() {
            return Ok(());
        }

        let existing = self.read(client, env).await?;
        self.base_mut().existing = existing;
        Ok(())
    }

    /// Writes the desired payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be built or the write fails.
    async fn write(&self, client: &dyn VaultApi, env: &SeedEnv) -> Result<()> {
        let payload = self.desired(env)?;
        write_path(client, self.path(), &payload).await
    }

    /// Deletes the resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    async fn delete(&self, client: &dyn VaultApi, _env: &SeedEnv) -> Result<()> {
        delete_path(client, self.path()).await
    }

    /// Converges the resource, returning what was done.
    ///
    /// # Errors
    ///
    /// Returns an error if a write or delete fails.
    async fn sync(&mut self, client: &dyn VaultApi, env: &SeedEnv) -> Result<DiffType> {
        sync_resource(&*self, client, env).await
    }
}

/// Standard classification: write-only, comparable, or nothing to compare.
///
/// # Errors
///
/// Returns an error if the desired payload cannot be built.
pub fn default_diff<R: Resource + ?Sized>(resource: &R, env: &SeedEnv) -> Result<DiffType> {
    if resource.no_resource() {
        return Ok(DiffType::Noop);
    }

    let base = resource.base();
    if resource.write_only() {
        return Ok(classify_write_only(base.present, base.existing.is_some()));
    }

    match &base.existing {
        Some(existing) if base.present => {
            let fields = changed_fields(existing, &resource.desired(env)?, resource.compare_scope());
            Ok(classify(true, true, !fields.is_empty()))
        }
        existing => Ok(classify(base.present, existing.is_some(), false)),
    }
}

/// Applies a diff decision: write for add/change/overwrite, delete for delete.
///
/// # Errors
///
/// Returns an error if the resource cannot be converged.
pub async fn sync_resource<R: Resource + ?Sized>(
    resource: &R,
    client: &dyn VaultApi,
    env: &SeedEnv,
) -> Result<DiffType> {
    let diff = resource.diff(env)?;
    let name = resource.describe();

    match diff {
        DiffType::Add => {
            info!("Writing new {name}");
            resource.write(client, env).await?;
        }
        DiffType::Change | DiffType::Overwrite => {
            info!("Updating {name}");
            resource.write(client, env).await?;
        }
        DiffType::Delete => {
            info!("Removing {name}");
            resource.delete(client, env).await?;
        }
        DiffType::Noop if resource.present() => debug!("{name} is up to date"),
        DiffType::Noop => debug!("No {name} to remove"),
        DiffType::Conflict => {
            return Err(SeedError::internal(format!("{name} cannot be converged in place")));
        }
    }

    Ok(diff)
}

/// Turns a raw permission denied answer into the user facing constraint.
#[must_use]
pub fn denied(action: &str, target: &str, err: SeedError) -> SeedError {
    if matches!(err, SeedError::Vault(VaultError::PermissionDenied { .. })) {
        error!("Permission denied {action} {target}");
        ConstraintError::PermissionDenied {
            action: action.to_string(),
            target: target.to_string(),
        }
        .into()
    } else {
        err
    }
}

/// Reads a path, treating unsupported paths as missing.
///
/// # Errors
///
/// Returns an error for failures other than "not found".
pub async fn read_path(client: &dyn VaultApi, path: &str) -> Result<Option<Value>> {
    debug!("Reading from {path}");
    match client.read(path).await {
        Ok(value) => Ok(value),
        Err(e) if e.is_unsupported_path() => Ok(None),
        Err(e) => Err(denied("reading", path, e)),
    }
}

/// Writes a payload to a path.
///
/// # Errors
///
/// Returns an error if the write fails.
pub async fn write_path(client: &dyn VaultApi, path: &str, payload: &Value) -> Result<()> {
    client
        .write(path, payload)
        .await
        .map(|_| ())
        .map_err(|e| denied("writing", path, e))
}

/// Deletes a path, treating unsupported paths as already gone.
///
/// # Errors
///
/// Returns an error for failures other than "not found".
pub async fn delete_path(client: &dyn VaultApi, path: &str) -> Result<()> {
    debug!("Deleting {path}");
    match client.delete(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_unsupported_path() => Ok(()),
        Err(e) => Err(denied("deleting", path, e)),
    }
}

/// Unwraps the `data` envelope of a Vault read.
#[must_use]
pub fn unwrap_data(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Copies `src_key` from a manifest entry into a payload as `dst_key`,
/// falling back to `default` when the entry does not set it.
pub fn map_val(
    dst: &mut Map<String, Value>,
    src: &Map<String, Value>,
    dst_key: &str,
    src_key: &str,
    default: Option<Value>,
) {
    if let Some(value) = src.get(src_key) {
        dst.insert(dst_key.to_string(), value.clone());
    } else if let Some(default) = default {
        dst.insert(dst_key.to_string(), default);
    }
}

/// Reads a list of strings from a manifest entry, sorted.
///
/// # Errors
///
/// Returns a validation error if the field is not a list of strings.
pub fn string_list(obj: &Map<String, Value>, key: &str) -> Result<Vec<String>> {
    let mut items: Vec<String> = match obj.get(key) {
        None | Some(Value::Null) => vec![],
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(String::from)
                    .ok_or_else(|| ManifestError::validation(format!("{key} must be a list of strings")))
            })
            .collect::<std::result::Result<_, _>>()?,
        Some(_) => return Err(ManifestError::validation(format!("{key} must be a list")).into()),
    };
    items.sort();
    items.dedup();
    Ok(items)
}

/// Reads a required string field.
///
/// # Errors
///
/// Returns a data error if the field is missing or not a string.
pub fn required_str<'a>(obj: &'a Map<String, Value>, key: &str, name: &str) -> Result<&'a str> {
    obj.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ManifestError::data(format!("{name} requires a string {key}")).into())
}

/// Reads an optional string field.
#[must_use]
pub fn optional_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}
