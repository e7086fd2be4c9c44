//! SSH dynamic credential roles.

use serde_json::{Map, Value};

use crate::config::SeedEnv;
use crate::config::validator::{Field, check_entry, sanitize_mount};
use crate::error::Result;

use super::mount::tunable;
use super::resource::{BackendSpec, Resource, ResourceBase, map_val, optional_str};

/// A role on an SSH engine.
#[derive(Debug)]
pub struct SshRole {
    base: ResourceBase,
    payload: Map<String, Value>,
}

impl SshRole {
    /// Builds an SSH role from a `ssh_creds` secret entry.
    ///
    /// # Errors
    ///
    /// Returns a data error if a present role has no `key_type`.
    pub fn build(obj: &Map<String, Value>, _env: &SeedEnv) -> Result<Vec<Box<dyn Resource>>> {
        check_entry(&[], &[Field::One("key_type")], "ssh role", obj)?;
        let mount = sanitize_mount(optional_str(obj, "mount").unwrap_or("ssh"));
        let name = optional_str(obj, "name")
            .or_else(|| optional_str(obj, "ssh_creds"))
            .unwrap_or_default();

        let mut payload = Map::new();
        map_val(&mut payload, obj, "key_type", "key_type", None);
        map_val(&mut payload, obj, "cidr_list", "cidr_list", None);
        map_val(&mut payload, obj, "default_user", "default_user", None);

        let spec = tunable(BackendSpec::secret(mount.clone(), "ssh").governing(), obj);
        let base = ResourceBase::new(format!("{mount}/roles/{name}"), obj)?.with_backend(spec);
        Ok(vec![Box::new(Self { base, payload })])
    }
}

impl Resource for SshRole {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "SSH Role"
    }

    fn desired(&self, _env: &SeedEnv) -> Result<Value> {
        Ok(Value::Object(self.payload.clone()))
    }
}
