//! Per-run environment shared by every resource.
//!
//! Template variables are computed once here and then passed by reference
//! into every payload builder.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::{ManifestError, Result};

use super::options::SeedOptions;
use super::template::{
    SimpleRenderer, TemplateRenderer, load_vars_file, parse_extra_vars, parse_yaml_map,
};
use super::validator::secret_file;

/// Directories, template variables and renderer for a run.
#[derive(Debug, Clone)]
pub struct SeedEnv {
    secrets: PathBuf,
    policies: PathBuf,
    vars: Map<String, Value>,
    renderer: Arc<dyn TemplateRenderer>,
}

impl SeedEnv {
    /// Builds the environment from run options.
    ///
    /// Var files are merged in order, then `key=value` extra vars are
    /// applied on top.
    ///
    /// # Errors
    ///
    /// Returns an error if a var file cannot be loaded or an extra var is
    /// malformed.
    pub fn new(options: &SeedOptions) -> Result<Self> {
        let mut vars = Map::new();
        for file in &options.extra_vars_file {
            vars.extend(load_vars_file(file)?);
        }
        vars.extend(parse_extra_vars(&options.extra_vars)?);
        debug!("Loaded {} template variables", vars.len());

        Ok(Self {
            secrets: options.secrets_dir(),
            policies: options.policies_dir(),
            vars,
            renderer: Arc::new(SimpleRenderer::new()),
        })
    }

    /// Builds an environment from explicit directories with no variables.
    #[must_use]
    pub fn with_dirs(secrets: impl Into<PathBuf>, policies: impl Into<PathBuf>) -> Self {
        Self {
            secrets: secrets.into(),
            policies: policies.into(),
            vars: Map::new(),
            renderer: Arc::new(SimpleRenderer::new()),
        }
    }

    /// Replaces the template variables.
    #[must_use]
    pub fn with_vars(mut self, vars: Map<String, Value>) -> Self {
        self.vars = vars;
        self
    }

    /// Replaces the template renderer.
    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Points the environment at another secrets directory.
    pub fn set_secrets_dir(&mut self, dir: impl Into<PathBuf>) {
        self.secrets = dir.into();
    }

    /// Directory holding local secret files.
    #[must_use]
    pub fn secrets_dir(&self) -> &Path {
        &self.secrets
    }

    /// Directory holding policy templates.
    #[must_use]
    pub fn policies_dir(&self) -> &Path {
        &self.policies
    }

    /// Template variables for this run.
    #[must_use]
    pub const fn vars(&self) -> &Map<String, Value> {
        &self.vars
    }

    /// Resolves a path relative to the secrets directory.
    #[must_use]
    pub fn secret_path(&self, relative: &str) -> PathBuf {
        hard_path(relative, &self.secrets)
    }

    /// Resolves a path relative to the policies directory.
    #[must_use]
    pub fn policy_path(&self, relative: &str) -> PathBuf {
        hard_path(relative, &self.policies)
    }

    /// Renders a template string with the run variables and `overrides`.
    ///
    /// # Errors
    ///
    /// Returns an error if a placeholder cannot be resolved.
    pub fn render(&self, template: &str, overrides: &Map<String, Value>) -> Result<String> {
        if overrides.is_empty() {
            return self.renderer.render(template, &self.vars);
        }

        let mut vars = self.vars.clone();
        vars.extend(overrides.clone());
        self.renderer.render(template, &vars)
    }

    /// Reads and renders a template file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or rendering fails.
    pub fn render_file(&self, path: &Path, overrides: &Map<String, Value>) -> Result<String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ManifestError::file(path, format!("unable to read: {e}")))?;
        self.render(&content, overrides)
    }

    /// Loads a secret var file from the secrets directory.
    ///
    /// The file must be safely permissioned. It is rendered before being
    /// parsed as a YAML map.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unsafe or not a YAML map.
    pub fn load_var_file(&self, relative: &str) -> Result<Map<String, Value>> {
        let path = self.secret_path(relative);
        secret_file(&path)?;
        let rendered = self.render_file(&path, &Map::new())?;
        parse_yaml_map(&rendered, &path.display().to_string())
    }

    /// Reads a raw secret file from the secrets directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or unsafe.
    pub fn read_secret(&self, relative: &str) -> Result<Vec<u8>> {
        let path = self.secret_path(relative);
        secret_file(&path)?;
        Ok(std::fs::read(&path)?)
    }
}

/// Joins a relative path onto a prefix directory, leaving absolute paths be.
#[must_use]
pub fn hard_path(path: &str, prefix: &Path) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        prefix.join(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_vars_merge_with_cli_winning() {
        let dir = tempfile::tempdir().unwrap();
        let vars_file = dir.path().join("vars.yml");
        std::fs::write(&vars_file, "region: us-east-1\nstage: dev\n").unwrap();

        let options = SeedOptions {
            secretfile: dir.path().join("Secretfile"),
            extra_vars_file: vec![vars_file],
            extra_vars: vec![String::from("stage=prod")],
            ..SeedOptions::default()
        };

        let env = SeedEnv::new(&options).unwrap();
        assert_eq!(env.vars().get("region"), Some(&json!("us-east-1")));
        assert_eq!(env.vars().get("stage"), Some(&json!("prod")));
        assert_eq!(env.secrets_dir(), dir.path().join(".secrets"));
    }

    #[test]
    fn test_hard_path() {
        assert_eq!(hard_path("a/b", Path::new("/s")), PathBuf::from("/s/a/b"));
        assert_eq!(hard_path("/abs", Path::new("/s")), PathBuf::from("/abs"));
    }

    #[cfg(unix)]
    #[test]
    fn test_load_var_file_renders_template() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("db.yml");
        std::fs::write(&file, "user: {{ user }}\npassword: hunter2\n").unwrap();
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o600)).unwrap();

        let mut vars = Map::new();
        vars.insert(String::from("user"), json!("admin"));
        let env = SeedEnv::with_dirs(dir.path(), dir.path()).with_vars(vars);

        let loaded = env.load_var_file("db.yml").unwrap();
        assert_eq!(loaded.get("user"), Some(&json!("admin")));
        assert_eq!(loaded.get("password"), Some(&json!("hunter2")));
    }
}
