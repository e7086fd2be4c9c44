//! Reconciler for converging Vault onto a manifest.
//!
//! This module implements the seed pass: it reads the current state of
//! every backend and resource in a [`Context`], then applies changes in a
//! fixed phase order so that anything a later phase depends on already
//! exists remotely.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info, warn};

use crate::config::{SeedEnv, SeedOptions, sanitize_mount};
use crate::context::{BackendKey, Context};
use crate::error::{ManifestError, Result};
use crate::model::{Backend, Phase, Resource, denied, is_reserved};
use crate::planner::{DiffReport, DiffType, SeedReport};
use crate::vault::{BackendRole, MountInfo, VaultApi};

/// Drives fetch, diff and sync of a context against one Vault server.
pub struct Reconciler<'a> {
    /// Vault client.
    client: &'a dyn VaultApi,
    /// Template variables and directories.
    env: &'a SeedEnv,
    /// Run options.
    options: &'a SeedOptions,
}

impl<'a> Reconciler<'a> {
    /// Creates a new reconciler.
    #[must_use]
    pub const fn new(client: &'a dyn VaultApi, env: &'a SeedEnv, options: &'a SeedOptions) -> Self {
        Self {
            client,
            env,
            options,
        }
    }

    /// Fetches then syncs a context.
    ///
    /// # Errors
    ///
    /// Returns the first error hit. Changes applied before it stay applied.
    pub async fn seed(&self, ctx: &mut Context) -> Result<SeedReport> {
        self.fetch(ctx).await?;
        self.sync(ctx).await
    }

    /// Populates the remote state of every backend and resource.
    ///
    /// Backends are fetched first. Resources are only read when their mount
    /// exists, except for built-in mounts which always do.
    ///
    /// # Errors
    ///
    /// Returns a data error for a present secret on a mount nobody declared
    /// and that does not exist, and propagates read failures.
    pub async fn fetch(&self, ctx: &mut Context) -> Result<()> {
        let (resources, backends) = ctx.parts_mut();

        let roles: BTreeSet<BackendRole> = backends.keys().map(|(role, _)| *role).collect();
        let mut listings: BTreeMap<BackendRole, BTreeMap<String, MountInfo>> = BTreeMap::new();
        for role in roles {
            listings.insert(role, self.list_mounts(role).await?);
        }

        for backend in backends.values_mut() {
            if let Some(listing) = listings.get(&backend.role) {
                backend.fetch(self.client, listing).await?;
            }
        }

        if let Some(adhoc) = backends.values().find(|b| is_adhoc(b)) {
            return Err(ManifestError::data(format!(
                "Ad-Hoc backend not supported for {}",
                adhoc.path
            ))
            .into());
        }

        for resource in resources.iter_mut() {
            let Some(spec) = resource.base().backend.clone() else {
                resource.fetch(self.client, self.env).await?;
                continue;
            };
            let backend = backends.get(&(spec.role, spec.path.clone()));

            if spec.role == BackendRole::Secret
                && let Some(info) = backend.and_then(|b| b.existing.as_ref())
            {
                resource.set_kv_version(info.kv_version());
            }

            if backend.is_some_and(|b| b.exists() || b.is_reserved()) {
                resource.fetch(self.client, self.env).await?;
            } else {
                debug!("Not reading {}, {} is not mounted", resource.describe(), spec.path);
            }
        }

        Ok(())
    }

    /// Applies every pending change in phase order.
    ///
    /// # Errors
    ///
    /// Returns a file error before anything is written if a present
    /// resource cannot build its payload. Otherwise stops at the first
    /// failing resource or mount.
    pub async fn sync(&self, ctx: &mut Context) -> Result<SeedReport> {
        self.preflight(ctx)?;

        let mut report = SeedReport::default();
        let (resources, backends) = ctx.parts_mut();

        info!("Syncing audit devices");
        for backend in backends_of(backends, BackendRole::Audit) {
            report.record_mount(&backend.path, backend.sync(self.client).await?);
        }

        info!("Syncing policies");
        self.sync_phase(resources, Phase::Policy, &mut report).await?;

        info!("Syncing auth methods");
        for backend in backends_of(backends, BackendRole::Auth) {
            report.record_mount(&backend.path, backend.sync(self.client).await?);
        }
        self.sync_phase(resources, Phase::AuthWrapper, &mut report).await?;

        info!("Syncing secret mounts");
        let mut mounts: Vec<&Backend> = backends_of(backends, BackendRole::Secret)
            .into_iter()
            .filter(|b| b.managed)
            .collect();
        mounts.sort_by_key(|b| b.present);

        let mut handled = HashSet::new();
        let mut remounted = HashSet::new();
        for backend in mounts {
            let fresh = backend.diff() == DiffType::Add || backend.needs_replace();
            let diff = backend.sync(self.client).await?;
            report.record_mount(&backend.path, diff);
            if fresh && diff.is_change() {
                remounted.insert(backend.path.clone());
            }
            handled.insert(backend.path.clone());
        }

        if self.options.mount_only {
            info!("Stopping after mount points");
            report.mount_only = true;
            return Ok(report);
        }

        for resource in resources.iter_mut() {
            let on_fresh_mount = resource.base().backend.as_ref().is_some_and(|spec| {
                spec.role == BackendRole::Secret && remounted.contains(&spec.path)
            });
            if on_fresh_mount {
                resource.base_mut().existing = None;
            }
        }

        info!("Syncing resources");
        let mut remaining: Vec<&mut Box<dyn Resource>> = resources
            .iter_mut()
            .filter(|r| r.phase() == Phase::Resource && !r.no_resource())
            .collect();
        remaining.sort_by_key(|r| r.is_child());
        for resource in remaining {
            report.record(resource.sync(self.client, self.env).await?);
        }

        for backend in backends_of(backends, BackendRole::Secret) {
            if is_stale(backend, &handled) {
                info!("Unmounting unused {}", backend.describe());
                backend.unmount(self.client).await?;
                report.unmounted.push(backend.path.clone());
            }
        }

        if self.options.remove_unknown {
            report.pruned = self.prune(backends).await?;
        }

        Ok(report)
    }

    /// Describes what a sync would do without writing anything.
    ///
    /// Conflicts are reported as rows, never raised.
    ///
    /// # Errors
    ///
    /// Returns an error if a resource cannot build its payload.
    pub fn diff(&self, ctx: &Context) -> Result<DiffReport> {
        let mut report = DiffReport::new();

        for backend in ctx.backends().values().filter(|b| !b.is_reserved()) {
            if !backend.managed && !backend.exists() {
                continue;
            }
            report.push(format!("{} mount", backend.role), backend.path.clone(), backend.diff(), vec![]);
        }

        let mut ordered: Vec<&dyn Resource> = ctx
            .resources()
            .iter()
            .map(AsRef::as_ref)
            .filter(|r| !r.no_resource())
            .collect();
        ordered.sort_by_key(|r| (r.phase(), r.is_child()));
        for resource in ordered {
            let diff = resource.diff(self.env)?;
            let fields = if diff == DiffType::Change {
                resource.changed_fields(self.env)?
            } else {
                vec![]
            };
            report.push(resource.kind(), resource.path(), diff, fields);
        }

        Ok(report)
    }

    /// Unmounts every secret mount Vault lists that the context does not
    /// want, returning the removed paths.
    async fn prune(&self, backends: &BTreeMap<BackendKey, Backend>) -> Result<Vec<String>> {
        let mut pruned = vec![];
        for (path, info) in self.list_mounts(BackendRole::Secret).await? {
            if path.starts_with("sys") || is_reserved(BackendRole::Secret, &path) {
                continue;
            }
            let wanted = backends
                .get(&(BackendRole::Secret, path.clone()))
                .is_some_and(|b| b.present);
            if wanted {
                continue;
            }

            info!("Removing unknown {} mount {path}", info.kind);
            self.client
                .disable_mount(BackendRole::Secret, &path)
                .await
                .map_err(|e| denied("unmounting", &path, e))?;
            pruned.push(path);
        }
        Ok(pruned)
    }

    fn preflight(&self, ctx: &Context) -> Result<()> {
        for resource in ctx.resources() {
            if resource.present() && !resource.no_resource() {
                resource.desired(self.env)?;
            }
        }
        debug!("All {} resources are ready to write", ctx.len());
        Ok(())
    }

    async fn sync_phase(
        &self,
        resources: &mut [Box<dyn Resource>],
        phase: Phase,
        report: &mut SeedReport,
    ) -> Result<()> {
        for resource in resources.iter_mut().filter(|r| r.phase() == phase) {
            if resource.no_resource() {
                continue;
            }
            report.record(resource.sync(self.client, self.env).await?);
        }
        Ok(())
    }

    async fn list_mounts(&self, role: BackendRole) -> Result<BTreeMap<String, MountInfo>> {
        let listing = self
            .client
            .list_mounts(role)
            .await
            .map_err(|e| denied("listing", role.sys_path(), e))?;
        debug!("{} {role} mounts listed", listing.len());
        Ok(listing.into_iter().map(|(k, v)| (sanitize_mount(&k), v)).collect())
    }
}

/// Backends of one role, absent ones first.
fn backends_of(backends: &BTreeMap<BackendKey, Backend>, role: BackendRole) -> Vec<&Backend> {
    let mut selected: Vec<&Backend> = backends.values().filter(|b| b.role == role).collect();
    selected.sort_by_key(|b| b.present);
    selected
}

/// A secret mount only referenced by present resources and not mounted.
fn is_adhoc(backend: &Backend) -> bool {
    backend.role == BackendRole::Secret
        && !backend.managed
        && backend.present
        && !backend.exists()
        && !backend.is_reserved()
}

/// A mounted secret backend nothing present refers to anymore.
fn is_stale(backend: &Backend, handled: &HashSet<String>) -> bool {
    if handled.contains(&backend.path) || backend.present || backend.is_reserved() {
        return false;
    }
    let stale = backend.exists();
    if stale {
        warn!("{} is only referenced by absent resources", backend.describe());
    }
    stale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BackendSpec;

    #[test]
    fn test_adhoc_detection() {
        let mut backend = Backend::from_spec(&BackendSpec::secret("adhoc", "kv"), true);
        assert!(is_adhoc(&backend));

        backend.existing = Some(MountInfo::new("kv"));
        assert!(!is_adhoc(&backend));

        let cubbyhole = Backend::from_spec(&BackendSpec::secret("cubbyhole", "cubbyhole"), true);
        assert!(!is_adhoc(&cubbyhole));

        let declared = Backend::from_spec(&BackendSpec::secret("apps", "kv").governing(), true);
        assert!(!is_adhoc(&declared));
    }

    #[test]
    fn test_stale_needs_existing_unwanted_mount() {
        let mut backend = Backend::from_spec(&BackendSpec::secret("old", "kv"), false);
        let handled = HashSet::new();
        assert!(!is_stale(&backend, &handled));

        backend.existing = Some(MountInfo::new("kv"));
        assert!(is_stale(&backend, &handled));

        let handled: HashSet<String> = [String::from("old")].into_iter().collect();
        assert!(!is_stale(&backend, &handled));
    }

    #[test]
    fn test_absent_backends_sort_first() {
        let mut backends = BTreeMap::new();
        for (path, present) in [("a", true), ("b", false)] {
            let backend = Backend::from_spec(&BackendSpec::secret(path, "kv").governing(), present);
            backends.insert((BackendRole::Secret, path.to_string()), backend);
        }
        let ordered: Vec<&str> = backends_of(&backends, BackendRole::Secret)
            .iter()
            .map(|b| b.path.as_str())
            .collect();
        assert_eq!(ordered, vec!["b", "a"]);
    }
}
