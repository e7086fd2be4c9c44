//! Template rendering and template variable sources.
//!
//! Rendering is a seam: the engine only ever calls
//! [`TemplateRenderer::render`]. The default [`SimpleRenderer`] understands
//! `{{ name }}` and `{{ nested.name }}` placeholders, which is all the
//! manifests, policies and var files shipped with a project normally use.

use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

use crate::error::{ManifestError, Result};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_\-]+(?:\.[A-Za-z0-9_\-]+)*)\s*\}\}")
        .unwrap_or_else(|_| unreachable!("placeholder pattern is valid"))
});

/// Renders a template string against a set of variables.
pub trait TemplateRenderer: Send + Sync + std::fmt::Debug {
    /// Renders `template` using `vars`.
    ///
    /// # Errors
    ///
    /// Returns an error if the template references unknown variables.
    fn render(&self, template: &str, vars: &Map<String, Value>) -> Result<String>;
}

/// Placeholder substitution renderer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleRenderer;

impl SimpleRenderer {
    /// Creates a new renderer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn lookup<'v>(name: &str, vars: &'v Map<String, Value>) -> Option<&'v Value> {
        let mut parts = name.split('.');
        let mut current = vars.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }
}

impl TemplateRenderer for SimpleRenderer {
    fn render(&self, template: &str, vars: &Map<String, Value>) -> Result<String> {
        let mut missing = Vec::new();

        let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
            let name = &caps[1];
            match Self::lookup(name, vars) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) => String::new(),
                Some(other) => other.to_string(),
                None => {
                    missing.push(name.to_string());
                    String::new()
                }
            }
        });

        if missing.is_empty() {
            Ok(rendered.into_owned())
        } else {
            Err(ManifestError::data(format!(
                "missing template variables: {}",
                missing.join(", ")
            ))
            .into())
        }
    }
}

/// Parses `key=value` pairs given on the command line.
///
/// # Errors
///
/// Returns a validation error for pairs without `=`.
pub fn parse_extra_vars(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut vars = Map::new();
    for pair in pairs {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            ManifestError::validation(format!("extra var {pair} is not of the form key=value"))
        })?;
        vars.insert(key.trim().to_string(), Value::String(value.to_string()));
    }
    Ok(vars)
}

/// Loads a YAML document as a variable map.
///
/// # Errors
///
/// Returns an error if the file is unreadable or not a YAML map.
pub fn load_vars_file(path: &Path) -> Result<Map<String, Value>> {
    debug!("Loading template variables from {}", path.display());

    let content = std::fs::read_to_string(path)
        .map_err(|e| ManifestError::file(path, format!("unable to read: {e}")))?;
    parse_yaml_map(&content, &path.display().to_string())
}

/// Parses YAML text that must hold a map. An empty document is an empty map.
///
/// # Errors
///
/// Returns a parse error for invalid YAML and a data error for non-maps.
pub fn parse_yaml_map(content: &str, location: &str) -> Result<Map<String, Value>> {
    let value: Value = serde_yaml::from_str(content).map_err(|e| ManifestError::Parse {
        message: format!("YAML parse error: {e}"),
        location: location.to_string(),
    })?;

    match value {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map),
        _ => Err(ManifestError::data(format!("{location} must contain a map")).into()),
    }
}
