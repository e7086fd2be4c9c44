//! Run options for a seed.
//!
//! Holds the selection flags and directory locations handed over by the
//! command line, with environment variable overrides applied on top.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ManifestError, Result};

/// Default manifest file name.
pub const DEFAULT_SECRETFILE: &str = "Secretfile";

/// Default secrets directory, relative to the manifest.
const DEFAULT_SECRETS_DIR: &str = ".secrets";

/// Default policies directory, relative to the manifest.
const DEFAULT_POLICIES_DIR: &str = "vault";

/// Options controlling a seed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedOptions {
    /// Path to the manifest.
    pub secretfile: PathBuf,
    /// Directory holding local secret files.
    pub secrets: Option<PathBuf>,
    /// Directory holding policy templates.
    pub policies: Option<PathBuf>,
    /// Tags a resource must carry to be selected.
    pub tags: Vec<String>,
    /// Only these paths are selected, when non-empty.
    pub include: Vec<String>,
    /// These paths are never selected.
    pub exclude: Vec<String>,
    /// Unmount anything not declared in the manifest.
    pub remove_unknown: bool,
    /// Stop after mount points have been synced.
    pub mount_only: bool,
    /// Use the supplied token directly.
    pub reuse_token: bool,
    /// Template variables as `key=value`.
    pub extra_vars: Vec<String>,
    /// YAML files holding template variables.
    pub extra_vars_file: Vec<PathBuf>,
    /// Tolerate archive members that are missing on thaw.
    pub ignore_missing: bool,
    /// Ice file to thaw secrets from before seeding.
    pub thaw_from: Option<PathBuf>,
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self {
            secretfile: PathBuf::from(DEFAULT_SECRETFILE),
            secrets: None,
            policies: None,
            tags: vec![],
            include: vec![],
            exclude: vec![],
            remove_unknown: false,
            mount_only: false,
            reuse_token: false,
            extra_vars: vec![],
            extra_vars_file: vec![],
            ignore_missing: false,
            thaw_from: None,
        }
    }
}

impl SeedOptions {
    /// Creates options for the given manifest.
    #[must_use]
    pub fn new(secretfile: impl Into<PathBuf>) -> Self {
        Self {
            secretfile: secretfile.into(),
            ..Self::default()
        }
    }

    /// Directory containing the manifest.
    #[must_use]
    pub fn secretfile_dir(&self) -> &Path {
        self.secretfile
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }

    /// Resolved secrets directory.
    #[must_use]
    pub fn secrets_dir(&self) -> PathBuf {
        self.secrets
            .clone()
            .unwrap_or_else(|| self.secretfile_dir().join(DEFAULT_SECRETS_DIR))
    }

    /// Resolved policies directory.
    #[must_use]
    pub fn policies_dir(&self) -> PathBuf {
        self.policies
            .clone()
            .unwrap_or_else(|| self.secretfile_dir().join(DEFAULT_POLICIES_DIR))
    }

    /// Applies `VAULTSEED_*` environment overrides.
    ///
    /// Variables are checked in the format `VAULTSEED_<OPTION>`
    /// (`VAULTSEED_SECRETS`, `VAULTSEED_POLICIES`, `VAULTSEED_TAGS`).
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok());
        self
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("VAULTSEED_SECRETS") {
            debug!("Overriding secrets directory from environment");
            self.secrets = Some(PathBuf::from(dir));
        }

        if let Some(dir) = lookup("VAULTSEED_POLICIES") {
            debug!("Overriding policies directory from environment");
            self.policies = Some(PathBuf::from(dir));
        }

        if self.tags.is_empty()
            && let Some(tags) = lookup("VAULTSEED_TAGS")
        {
            debug!("Overriding tags from environment");
            self.tags = tags
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
        }
    }

    /// Loads the `.env` file beside the manifest if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self.secretfile_dir().join(".env");

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| ManifestError::Parse {
                message: format!("Failed to load .env file: {e}"),
                location: env_path.display().to_string(),
            })?;
        }

        Ok(())
    }
}
