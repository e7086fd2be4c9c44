//! AWS secret engine: root credentials, roles and the lease config.

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::config::SeedEnv;
use crate::config::validator::{Field, check_entry, check_obj, sanitize_mount};
use crate::error::{ManifestError, Result};
use crate::vault::{BackendRole, VaultApi};

use super::mount::tunable;
use super::resource::{BackendSpec, Resource, ResourceBase, optional_str};

/// Root credentials of an AWS engine.
///
/// The root config cannot be read back, so it is rewritten on every run
/// while the mount exists.
#[derive(Debug)]
pub struct AwsRoot {
    base: ResourceBase,
    mount: String,
    file: String,
    region: String,
}

impl AwsRoot {
    /// Builds the root config plus its role and lease children.
    ///
    /// # Errors
    ///
    /// Returns a data error for missing fields, including on any role.
    pub fn build(obj: &Map<String, Value>, _env: &SeedEnv) -> Result<Vec<Box<dyn Resource>>> {
        check_entry(
            &[Field::One("mount")],
            &[Field::AnyOf(&["aws_file", "aws"]), Field::One("region"), Field::One("roles")],
            "aws",
            obj,
        )?;
        let mount = sanitize_mount(optional_str(obj, "mount").unwrap_or_default());
        let file = optional_str(obj, "aws_file")
            .or_else(|| optional_str(obj, "aws"))
            .unwrap_or_default()
            .to_string();

        let spec = tunable(BackendSpec::secret(mount.clone(), "aws").governing(), obj);
        let base = ResourceBase::new(format!("{mount}/config/root"), obj)?.with_backend(spec);
        let present = base.present;

        let mut built: Vec<Box<dyn Resource>> = vec![Box::new(Self {
            base,
            mount: mount.clone(),
            file,
            region: optional_str(obj, "region").unwrap_or_default().to_string(),
        })];
        if !present {
            return Ok(built);
        }

        if let Some(lease) = AwsLease::from_entry(&mount, obj) {
            built.push(Box::new(lease));
        }

        let Some(Value::Array(roles)) = obj.get("roles") else {
            return Err(ManifestError::data("missing aws roles").into());
        };
        for role in roles {
            let role = role
                .as_object()
                .ok_or_else(|| ManifestError::validation("aws roles must be maps"))?;
            built.push(Box::new(AwsRole::new(&mount, role)?));
        }

        Ok(built)
    }
}

#[async_trait]
impl Resource for AwsRoot {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "AWS"
    }

    fn write_only(&self) -> bool {
        true
    }

    fn secrets(&self) -> Vec<String> {
        vec![self.file.clone()]
    }

    fn desired(&self, env: &SeedEnv) -> Result<Value> {
        let creds = env.load_var_file(&self.file)?;
        check_obj(
            &[Field::One("access_key_id"), Field::One("secret_access_key")],
            &self.describe(),
            &creds,
        )?;
        Ok(json!({
            "access_key": creds["access_key_id"],
            "secret_key": creds["secret_access_key"],
            "region": self.region,
        }))
    }

    async fn fetch(&mut self, client: &dyn VaultApi, _env: &SeedEnv) -> Result<()> {
        let mounts = client.list_mounts(BackendRole::Secret).await?;
        let mounted = mounts.get(&self.mount).is_some_and(|m| m.is_kind("aws"));
        self.base.existing = mounted.then(|| json!(true));
        Ok(())
    }
}

/// An AWS role, backed by an inline policy document or an ARN.
#[derive(Debug)]
pub struct AwsRole {
    base: ResourceBase,
    policy: Option<String>,
    arn: Option<String>,
    vars: Map<String, Value>,
}

impl AwsRole {
    fn new(mount: &str, obj: &Map<String, Value>) -> Result<Self> {
        check_entry(&[Field::One("name")], &[Field::AnyOf(&["policy", "arn"])], "aws role", obj)?;
        let name = optional_str(obj, "name").unwrap_or_default();
        let vars = obj
            .get("vars")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut base = ResourceBase::new(format!("{mount}/roles/{name}"), obj)?
            .with_backend(BackendSpec::secret(mount, "aws"));
        base.child = true;
        Ok(Self {
            base,
            policy: optional_str(obj, "policy").map(String::from),
            arn: optional_str(obj, "arn").map(String::from),
            vars,
        })
    }
}

impl Resource for AwsRole {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "AWS Role"
    }

    fn desired(&self, env: &SeedEnv) -> Result<Value> {
        if let Some(policy) = &self.policy {
            let rendered = env.render_file(&env.policy_path(policy), &self.vars)?;
            let compact: String = rendered.chars().filter(|c| *c != ' ' && *c != '\n').collect();
            return Ok(json!({ "policy": compact }));
        }
        Ok(json!({ "arn": self.arn }))
    }
}

/// Lease settings of an AWS engine.
#[derive(Debug)]
pub struct AwsLease {
    base: ResourceBase,
    payload: Map<String, Value>,
}

impl AwsLease {
    /// Reads `lease` and `lease_max` from the engine entry. `lease_max`
    /// defaults to `lease`.
    #[must_use]
    pub fn from_entry(mount: &str, obj: &Map<String, Value>) -> Option<Self> {
        let lease = obj.get("lease")?;
        let lease_max = obj.get("lease_max").unwrap_or(lease);

        let mut payload = Map::new();
        payload.insert(String::from("lease"), lease.clone());
        payload.insert(String::from("lease_max"), lease_max.clone());
        Some(Self {
            base: ResourceBase::child(format!("{mount}/config/lease"), true)
                .with_backend(BackendSpec::secret(mount, "aws")),
            payload,
        })
    }
}

impl Resource for AwsLease {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "AWS Lease"
    }

    fn desired(&self, _env: &SeedEnv) -> Result<Value> {
        Ok(Value::Object(self.payload.clone()))
    }
}
