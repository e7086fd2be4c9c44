//! The context: every resource and backend of a run.
//!
//! Resources are owned in load order. Backends are keyed by role and path
//! and resources refer to them through their [`BackendSpec`], never by
//! pointer.

use chrono::Local;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::archive::{Encryptor, build_archive, extract_archive, ice_file_name, restrict};
use crate::config::{Manifest, SeedEnv, SeedOptions, is_tagged, specific_path_check};
use crate::error::{ArchiveError, Result};
use crate::model::{Backend, BackendSpec, Resource, ResourceBase, registry};
use crate::vault::BackendRole;

/// Key of a backend within a context.
pub type BackendKey = (BackendRole, String);

/// Aggregate of resources and the mounts they live on.
#[derive(Debug, Default)]
pub struct Context {
    resources: Vec<Box<dyn Resource>>,
    backends: BTreeMap<BackendKey, Backend>,
    next_group: usize,
}

impl Context {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds every resource a manifest declares, then applies the tag and
    /// path selection from `options`.
    ///
    /// # Errors
    ///
    /// Returns the first validation error. Nothing is sent to Vault before
    /// the whole manifest has loaded.
    pub fn load(manifest: &Manifest, options: &SeedOptions, env: &SeedEnv) -> Result<Self> {
        manifest.warn_unknown_keys();

        let mut ctx = Self::new();
        for key in registry::keys() {
            for obj in manifest.entries(key)? {
                ctx.add(registry::build(key, obj, env)?)?;
            }
        }
        debug!(
            "Loaded {} resources on {} backends",
            ctx.resources.len(),
            ctx.backends.len()
        );

        ctx.filter(&options.tags, &options.include, &options.exclude)
    }

    /// Adds the resources built from one manifest entry, parent first.
    ///
    /// # Errors
    ///
    /// Returns a data error if a mount is declared with conflicting types.
    pub fn add(&mut self, resources: Vec<Box<dyn Resource>>) -> Result<()> {
        let group = self.next_group;
        self.next_group += 1;
        for mut resource in resources {
            resource.base_mut().group = group;
            self.push(resource)?;
        }
        Ok(())
    }

    fn push(&mut self, resource: Box<dyn Resource>) -> Result<()> {
        if let Some(spec) = &resource.base().backend {
            self.ensure_backend(spec, resource.present())?;
        }
        self.resources.push(resource);
        Ok(())
    }

    fn ensure_backend(&mut self, spec: &BackendSpec, present: bool) -> Result<()> {
        match self.backends.entry((spec.role, spec.path.clone())) {
            Entry::Occupied(mut existing) => existing.get_mut().merge(spec, present),
            Entry::Vacant(slot) => {
                slot.insert(Backend::from_spec(spec, present));
                Ok(())
            }
        }
    }

    /// Keeps the entries selected by tags and include/exclude paths.
    ///
    /// With no tags requested every entry passes the tag check. Children
    /// follow their parent. Backends are rebuilt from the surviving
    /// resources, so a mount only wanted by a filtered out entry is left
    /// alone.
    ///
    /// # Errors
    ///
    /// Returns a data error if the rebuilt backends conflict.
    pub fn filter(self, tags: &[String], include: &[String], exclude: &[String]) -> Result<Self> {
        let selected = |base: &ResourceBase| {
            (tags.is_empty() || is_tagged(tags, &base.tags))
                && specific_path_check(&base.path, include, exclude)
        };
        let groups: HashSet<usize> = self
            .resources
            .iter()
            .filter(|r| !r.is_child() && selected(r.base()))
            .map(|r| r.base().group)
            .collect();

        let mut filtered = Self {
            next_group: self.next_group,
            ..Self::default()
        };
        for resource in self.resources {
            if groups.contains(&resource.base().group) {
                filtered.push(resource)?;
            } else {
                debug!("Skipping {} (not selected)", resource.describe());
            }
        }
        Ok(filtered)
    }

    /// Resources in load order.
    #[must_use]
    pub fn resources(&self) -> &[Box<dyn Resource>] {
        &self.resources
    }

    /// Backends keyed by role and path.
    #[must_use]
    pub const fn backends(&self) -> &BTreeMap<BackendKey, Backend> {
        &self.backends
    }

    /// Looks up a backend.
    #[must_use]
    pub fn backend(&self, role: BackendRole, path: &str) -> Option<&Backend> {
        self.backends.get(&(role, path.to_string()))
    }

    /// The backend a resource lives on.
    #[must_use]
    pub fn backend_of(&self, resource: &dyn Resource) -> Option<&Backend> {
        resource
            .base()
            .backend
            .as_ref()
            .and_then(|spec| self.backend(spec.role, &spec.path))
    }

    /// Mutable access to resources and backends at once.
    pub fn parts_mut(&mut self) -> (&mut [Box<dyn Resource>], &mut BTreeMap<BackendKey, Backend>) {
        (&mut self.resources, &mut self.backends)
    }

    /// Number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the context has no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Local secret files referenced by present resources, without repeats.
    #[must_use]
    pub fn secrets(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.resources
            .iter()
            .filter(|r| r.present())
            .flat_map(|r| r.secrets())
            .filter(|s| seen.insert(s.clone()))
            .collect()
    }

    /// Bundles every referenced secret file into an encrypted ice file in
    /// `dest_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if a secret file is missing or unsafe, or if
    /// encryption fails.
    pub fn freeze(
        &self,
        dest_dir: &Path,
        env: &SeedEnv,
        encryptor: &dyn Encryptor,
        keys: &[String],
        prefix: &str,
        handle: &str,
    ) -> Result<PathBuf> {
        let mut files = Vec::new();
        for secret in self.secrets() {
            debug!("Freezing {secret}");
            let data = env.read_secret(&secret)?;
            files.push((secret, data));
        }

        let archive = build_archive(&files)?;
        let sealed = encryptor.encrypt(&archive, keys)?;
        let icefile = dest_dir.join(ice_file_name(prefix, handle, &Local::now()));
        fs::write(&icefile, sealed)?;

        info!("Froze {} secrets into {}", files.len(), icefile.display());
        Ok(icefile)
    }

    /// Restores referenced secret files from an ice file into the secrets
    /// directory, returning the restored paths.
    ///
    /// # Errors
    ///
    /// Returns an ice file error for an unreadable archive, or for missing
    /// members unless `ignore_missing` is set.
    pub fn thaw(
        &self,
        icefile: &Path,
        env: &SeedEnv,
        encryptor: &dyn Encryptor,
        ignore_missing: bool,
    ) -> Result<Vec<String>> {
        let sealed = fs::read(icefile)
            .map_err(|e| ArchiveError::ice(format!("unable to read {}: {e}", icefile.display())))?;
        let archive = encryptor.decrypt(&sealed)?;

        let scratch = tempfile::tempdir()?;
        extract_archive(&archive, scratch.path())?;

        let mut thawed = Vec::new();
        for secret in self.secrets() {
            let source = scratch.path().join(&secret);
            if !source.is_file() {
                if ignore_missing {
                    warn!("{secret} missing from icefile");
                    continue;
                }
                return Err(ArchiveError::ice(format!("{secret} missing from icefile")).into());
            }

            let dest = env.secret_path(&secret);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&source, &dest)?;
            restrict(&dest)?;
            debug!("Thawed {secret}");
            thawed.push(secret);
        }

        info!("Thawed {} secrets from {}", thawed.len(), icefile.display());
        Ok(thawed)
    }
}
