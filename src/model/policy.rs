//! ACL policies.

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::config::SeedEnv;
use crate::config::validator::{Field, check_entry};
use crate::error::{ManifestError, Result};
use crate::vault::VaultApi;

use super::resource::{Phase, Resource, ResourceBase, delete_path, optional_str, read_path, write_path};

/// Collapses blank lines and surrounding whitespace the way Vault stores
/// policy bodies.
fn tidy(policy: &str) -> String {
    policy.trim().replace("\n\n", "\n")
}

/// An ACL policy rendered from a template in the policies directory.
#[derive(Debug)]
pub struct Policy {
    base: ResourceBase,
    file: Option<String>,
    vars: Map<String, Value>,
}

impl Policy {
    /// Builds a policy from its manifest entry.
    ///
    /// # Errors
    ///
    /// Returns a data error if `name`, or `file` for a present policy, is
    /// missing, and a validation error if `vars` is not a map.
    pub fn build(obj: &Map<String, Value>, _env: &SeedEnv) -> Result<Vec<Box<dyn Resource>>> {
        check_entry(&[Field::One("name")], &[Field::One("file")], "policy", obj)?;
        let vars = match obj.get("vars") {
            None => Map::new(),
            Some(Value::Object(vars)) => vars.clone(),
            Some(_) => return Err(ManifestError::validation("policy vars must be dicts").into()),
        };

        let name = optional_str(obj, "name").unwrap_or_default();
        let base = ResourceBase::new(name, obj)?;
        Ok(vec![Box::new(Self {
            base,
            file: optional_str(obj, "file").map(String::from),
            vars,
        })])
    }

    fn remote_path(&self) -> String {
        format!("sys/policies/acl/{}", self.path())
    }
}

#[async_trait]
impl Resource for Policy {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "Policy"
    }

    fn phase(&self) -> Phase {
        Phase::Policy
    }

    fn desired(&self, env: &SeedEnv) -> Result<Value> {
        let Some(file) = &self.file else {
            return Ok(Value::Null);
        };
        let rendered = env.render_file(&env.policy_path(file), &self.vars)?;
        Ok(Value::String(tidy(&rendered)))
    }

    async fn read(&self, client: &dyn VaultApi, _env: &SeedEnv) -> Result<Option<Value>> {
        let existing = read_path(client, &self.remote_path()).await?;
        Ok(existing.and_then(|body| {
            body.pointer("/data/policy")
                .or_else(|| body.get("policy"))
                .or_else(|| body.get("rules"))
                .and_then(Value::as_str)
                .map(|policy| Value::String(tidy(policy)))
        }))
    }

    async fn write(&self, client: &dyn VaultApi, env: &SeedEnv) -> Result<()> {
        let policy = self.desired(env)?;
        write_path(client, &self.remote_path(), &json!({ "policy": policy })).await
    }

    async fn delete(&self, client: &dyn VaultApi, _env: &SeedEnv) -> Result<()> {
        delete_path(client, &self.remote_path()).await
    }
}
