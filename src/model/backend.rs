//! Mount point lifecycle.
//!
//! A [`Backend`] is created the first time any resource declares a mount
//! path and is shared by every later resource on that path. Only resources
//! that govern a mount (explicit `mounts` entries, auth wrappers, engine root
//! configs) may mount, retune or unmount it; plain secrets merely require it.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::error::{ConstraintError, ManifestError, Result, SeedError, VaultError};
use crate::planner::{CompareScope, DiffType, payload_differs};
use crate::vault::{BackendRole, MountInfo, MountRequest, VaultApi, same_kind};

use super::resource::{BackendSpec, denied};

static EXISTING_MOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"existing mount at (?P<path>[^\s]+)")
        .unwrap_or_else(|_| unreachable!("mount conflict pattern is valid"))
});

/// Mounts that ship with Vault and are never mounted or unmounted.
const RESERVED_SECRET: &[&str] = &["cubbyhole", "sys", "identity"];
const RESERVED_AUTH: &[&str] = &["token"];

/// Whether a mount path is built in for its role.
#[must_use]
pub fn is_reserved(role: BackendRole, path: &str) -> bool {
    match role {
        BackendRole::Secret => RESERVED_SECRET.contains(&path),
        BackendRole::Auth => RESERVED_AUTH.contains(&path),
        BackendRole::Audit => false,
    }
}

/// A mount point shared by zero or more resources.
#[derive(Debug, Clone)]
pub struct Backend {
    /// Mount family.
    pub role: BackendRole,
    /// Normalized mount path.
    pub path: String,
    /// Desired engine or method type.
    pub kind: String,
    /// Whether the mount should exist.
    pub present: bool,
    /// Whether some resource owns the mount lifecycle.
    pub managed: bool,
    /// Types declared absent at this path, replaced by `kind`.
    pub retired: Vec<String>,
    /// Declared tuning.
    pub tune: Map<String, Value>,
    /// Extra configuration sent when mounting.
    pub config: Map<String, Value>,
    /// Declared description.
    pub description: Option<String>,
    /// Declared engine options.
    pub options: Option<Map<String, Value>>,
    /// Mount as listed by Vault.
    pub existing: Option<MountInfo>,
    /// Tuning as read from Vault.
    pub existing_tune: Option<Map<String, Value>>,
}

impl Backend {
    /// Creates a backend from the first declaration of its path.
    #[must_use]
    pub fn from_spec(spec: &BackendSpec, present: bool) -> Self {
        Self {
            role: spec.role,
            path: spec.path.clone(),
            kind: spec.kind.clone(),
            present,
            managed: spec.governs,
            retired: vec![],
            tune: spec.tune.clone(),
            config: spec.config.clone(),
            description: spec.description.clone(),
            options: spec.options.clone(),
            existing: None,
            existing_tune: None,
        }
    }

    /// Folds another declaration of the same path into this backend.
    ///
    /// A present and an absent declaration of different types at one path
    /// schedule a replace. Two present declarations of different types are
    /// a manifest error.
    ///
    /// # Errors
    ///
    /// Returns a data error for conflicting present declarations.
    pub fn merge(&mut self, spec: &BackendSpec, present: bool) -> Result<()> {
        if !spec.governs {
            if !self.managed {
                self.present |= present;
            }
            return Ok(());
        }

        if !self.managed {
            let wanted = self.present;
            self.adopt(spec, present || wanted);
            return Ok(());
        }

        if same_kind(&self.kind, &spec.kind) {
            self.present |= present;
            self.tune.extend(spec.tune.clone());
            self.config.extend(spec.config.clone());
            if spec.description.is_some() {
                self.description.clone_from(&spec.description);
            }
            if spec.options.is_some() {
                self.options.clone_from(&spec.options);
            }
            return Ok(());
        }

        match (self.present, present) {
            (true, true) => Err(ManifestError::data(format!(
                "mount {} declared present as both {} and {}",
                self.path, self.kind, spec.kind
            ))
            .into()),
            (true, false) | (false, false) => {
                self.retired.push(spec.kind.clone());
                Ok(())
            }
            (false, true) => {
                let previous = self.adopt(spec, true);
                self.retired.push(previous.kind);
                self.retired.extend(previous.retired);
                Ok(())
            }
        }
    }

    /// Replaces the declaration with `spec`, keeping what Vault reported.
    /// Returns the previous declaration.
    fn adopt(&mut self, spec: &BackendSpec, present: bool) -> Self {
        let mut next = Self::from_spec(spec, present);
        next.existing = self.existing.take();
        next.existing_tune = self.existing_tune.take();
        std::mem::replace(self, next)
    }

    /// Whether this mount is built in.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        is_reserved(self.role, &self.path)
    }

    /// Whether the mount currently exists.
    #[must_use]
    pub const fn exists(&self) -> bool {
        self.existing.is_some()
    }

    /// Human name, for logs and reports.
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{} mount {} ({})", self.role, self.path, self.kind)
    }

    /// Records the listing entry for this path and reads its tuning.
    ///
    /// # Errors
    ///
    /// Returns an error if the tuning read fails for a reason other than a
    /// restricted sysview.
    pub async fn fetch(
        &mut self,
        client: &dyn VaultApi,
        listing: &BTreeMap<String, MountInfo>,
    ) -> Result<()> {
        self.existing = listing.get(&self.path).cloned();
        self.existing_tune = None;

        if self.existing.is_none() || self.tune.is_empty() {
            return Ok(());
        }

        let Some(tune_path) = self.role.tune_path(&self.path) else {
            return Ok(());
        };

        match client.read(&tune_path).await {
            Ok(Some(Value::Object(map))) => {
                let tune = match map.get("data") {
                    Some(Value::Object(data)) => data.clone(),
                    _ => map,
                };
                self.existing_tune = Some(tune);
            }
            Ok(_) => {}
            Err(SeedError::Vault(VaultError::Api { message, .. }))
                if message.contains("cannot fetch sysview") =>
            {
                debug!("Tuning of {} is not readable", self.path);
            }
            Err(e) => return Err(denied("reading", &tune_path, e)),
        }
        Ok(())
    }

    /// Classifies what a sync of this mount would do.
    #[must_use]
    pub fn diff(&self) -> DiffType {
        if self.is_reserved() {
            return DiffType::Noop;
        }

        let Some(existing) = &self.existing else {
            return if self.present && self.managed {
                DiffType::Add
            } else {
                DiffType::Noop
            };
        };

        if !self.present {
            let ours = existing.is_kind(&self.kind) || self.retired.iter().any(|k| existing.is_kind(k));
            return if self.managed && ours {
                DiffType::Delete
            } else {
                DiffType::Noop
            };
        }

        if !existing.is_kind(&self.kind) {
            return if self.retired.iter().any(|k| existing.is_kind(k)) {
                DiffType::Change
            } else {
                DiffType::Conflict
            };
        }

        if let Some(desired) = &self.description
            && existing.description.as_deref().unwrap_or_default() != desired
        {
            return DiffType::Conflict;
        }

        if self.tune_differs() {
            DiffType::Change
        } else {
            DiffType::Noop
        }
    }

    /// Whether the type at the path must be swapped.
    #[must_use]
    pub fn needs_replace(&self) -> bool {
        self.existing
            .as_ref()
            .is_some_and(|existing| self.present && !existing.is_kind(&self.kind))
    }

    fn tune_differs(&self) -> bool {
        if self.tune.is_empty() || !self.managed {
            return false;
        }
        let existing = self
            .existing_tune
            .clone()
            .or_else(|| self.existing.as_ref().and_then(|e| e.config.clone()))
            .unwrap_or_default();
        payload_differs(
            &Value::Object(existing),
            &Value::Object(self.tune.clone()),
            CompareScope::DeclaredKeys,
        )
    }

    fn request(&self) -> MountRequest {
        let mut config = self.config.clone();
        config.extend(self.tune.clone());
        MountRequest {
            path: self.path.clone(),
            kind: self.kind.clone(),
            description: self.description.clone(),
            config: (!config.is_empty()).then_some(config),
            options: self.options.clone(),
        }
    }

    /// Converges the mount, returning what was done.
    ///
    /// # Errors
    ///
    /// Returns a constraint error for a conflicting mount or an immutable
    /// description, and propagates API failures.
    pub async fn sync(&self, client: &dyn VaultApi) -> Result<DiffType> {
        let diff = self.diff();
        match diff {
            DiffType::Add => {
                info!("Mounting {}", self.describe());
                self.mount(client).await?;
            }
            DiffType::Change if self.needs_replace() => {
                info!("Replacing mount at {} with {}", self.path, self.kind);
                self.unmount(client).await?;
                self.mount(client).await?;
            }
            DiffType::Change | DiffType::Overwrite => {
                if let Some(tune_path) = self.role.tune_path(&self.path) {
                    info!("Tuning {}", self.describe());
                    client
                        .write(&tune_path, &Value::Object(self.tune.clone()))
                        .await
                        .map_err(|e| denied("tuning", &self.path, e))?;
                }
            }
            DiffType::Delete => self.unmount(client).await?,
            DiffType::Noop => debug!("{} is up to date", self.describe()),
            DiffType::Conflict => return Err(self.conflict()),
        }
        Ok(diff)
    }

    fn conflict(&self) -> SeedError {
        let existing = self.existing.clone().unwrap_or_default();
        if existing.is_kind(&self.kind) {
            ConstraintError::DescriptionImmutable {
                path: self.path.clone(),
                existing: existing.description,
                desired: self.description.clone(),
            }
            .into()
        } else {
            ConstraintError::MountConflict {
                path: self.path.clone(),
                existing: existing.kind,
            }
            .into()
        }
    }

    async fn mount(&self, client: &dyn VaultApi) -> Result<()> {
        match client.enable_mount(self.role, &self.request()).await {
            Ok(()) => Ok(()),
            Err(SeedError::Vault(VaultError::Api { message, .. }))
                if EXISTING_MOUNT.is_match(&message) =>
            {
                let existing = EXISTING_MOUNT
                    .captures(&message)
                    .and_then(|c| c.name("path"))
                    .map(|m| m.as_str().trim_end_matches('/').to_string())
                    .unwrap_or_default();
                warn!("Mount {} collides with {existing}", self.path);
                Err(ConstraintError::MountConflict {
                    path: self.path.clone(),
                    existing,
                }
                .into())
            }
            Err(e) => Err(denied("mounting", &self.path, e)),
        }
    }

    /// Disables the mount.
    ///
    /// # Errors
    ///
    /// Propagates API failures.
    pub async fn unmount(&self, client: &dyn VaultApi) -> Result<()> {
        info!("Unmounting {} {}", self.role, self.path);
        client
            .disable_mount(self.role, &self.path)
            .await
            .map_err(|e| denied("unmounting", &self.path, e))
    }
}
