//! LDAP auth method config, group and user mappings.

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::config::SeedEnv;
use crate::config::validator::{Field, check_entry, sanitize_mount};
use crate::error::Result;
use crate::vault::VaultApi;

use super::mount::tunable;
use super::resource::{
    BackendSpec, Phase, Resource, ResourceBase, map_val, optional_str, string_list, write_path,
};

/// Connection settings copied verbatim when declared.
const LDAP_FIELDS: &[&str] = &[
    "discoverdn",
    "userdn",
    "userattr",
    "upndomain",
    "groupfilter",
    "groupdn",
    "groupattr",
    "binddn",
    "tls_max_version",
    "tls_min_version",
];

fn ldap_mount(obj: &Map<String, Value>) -> String {
    sanitize_mount(optional_str(obj, "mount").unwrap_or("ldap"))
}

/// The LDAP auth method configuration.
///
/// Bind credentials may live in a separate secrets file. They are merged
/// into the written payload only, so they never show up as drift.
#[derive(Debug)]
pub struct Ldap {
    base: ResourceBase,
    payload: Map<String, Value>,
    secrets: Option<String>,
}

impl Ldap {
    /// Builds the LDAP config.
    ///
    /// # Errors
    ///
    /// Returns a data error if a present config has no `url`.
    pub fn build(obj: &Map<String, Value>, _env: &SeedEnv) -> Result<Vec<Box<dyn Resource>>> {
        check_entry(&[], &[Field::One("url")], "ldap", obj)?;
        let mount = ldap_mount(obj);

        let mut payload = Map::new();
        map_val(&mut payload, obj, "url", "url", None);
        map_val(&mut payload, obj, "starttls", "starttls", Some(json!(false)));
        map_val(&mut payload, obj, "insecure_tls", "insecure_tls", Some(json!(false)));
        map_val(&mut payload, obj, "deny_null_bind", "deny_null_bind", Some(json!(true)));
        for key in LDAP_FIELDS {
            map_val(&mut payload, obj, key, key, None);
        }

        let spec = tunable(BackendSpec::auth(mount.clone(), "ldap").governing(), obj);
        let base = ResourceBase::new(format!("auth/{mount}/config"), obj)?.with_backend(spec);
        Ok(vec![Box::new(Self {
            base,
            payload,
            secrets: optional_str(obj, "secrets").map(String::from),
        })])
    }
}

#[async_trait]
impl Resource for Ldap {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "LDAP"
    }

    fn phase(&self) -> Phase {
        Phase::AuthWrapper
    }

    fn secrets(&self) -> Vec<String> {
        self.secrets.iter().cloned().collect()
    }

    fn desired(&self, _env: &SeedEnv) -> Result<Value> {
        Ok(Value::Object(self.payload.clone()))
    }

    async fn write(&self, client: &dyn VaultApi, env: &SeedEnv) -> Result<()> {
        let mut payload = self.payload.clone();
        if let Some(file) = &self.secrets {
            payload.extend(env.load_var_file(file)?);
        }
        write_path(client, self.path(), &Value::Object(payload)).await
    }
}

/// Policies granted to an LDAP group.
#[derive(Debug)]
pub struct LdapGroup {
    base: ResourceBase,
    policies: Vec<String>,
}

impl LdapGroup {
    /// Builds a group mapping.
    ///
    /// # Errors
    ///
    /// Returns a data error if `group`, or `policies` for a present group,
    /// is missing.
    pub fn build(obj: &Map<String, Value>, _env: &SeedEnv) -> Result<Vec<Box<dyn Resource>>> {
        check_entry(&[Field::One("group")], &[Field::One("policies")], "ldap group", obj)?;
        let group = optional_str(obj, "group").unwrap_or_default();
        let mount = ldap_mount(obj);
        let path = sanitize_mount(&format!("auth/{mount}/groups/{group}"));
        Ok(vec![Box::new(Self {
            base: ResourceBase::new(path, obj)?.with_backend(BackendSpec::auth(mount, "ldap")),
            policies: string_list(obj, "policies")?,
        })])
    }
}

impl Resource for LdapGroup {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "LDAP Group"
    }

    fn desired(&self, _env: &SeedEnv) -> Result<Value> {
        Ok(json!({ "policies": self.policies.join(",") }))
    }
}

/// Groups and policies of an LDAP user.
#[derive(Debug)]
pub struct LdapUser {
    base: ResourceBase,
    groups: Vec<String>,
    policies: Vec<String>,
}

impl LdapUser {
    /// Builds a user mapping.
    ///
    /// # Errors
    ///
    /// Returns a data error if `user` is missing.
    pub fn build(obj: &Map<String, Value>, _env: &SeedEnv) -> Result<Vec<Box<dyn Resource>>> {
        check_entry(&[Field::One("user")], &[], "ldap user", obj)?;
        let user = optional_str(obj, "user").unwrap_or_default();
        let mount = ldap_mount(obj);
        let path = sanitize_mount(&format!("auth/{mount}/users/{user}"));
        Ok(vec![Box::new(Self {
            base: ResourceBase::new(path, obj)?.with_backend(BackendSpec::auth(mount, "ldap")),
            groups: string_list(obj, "groups")?,
            policies: string_list(obj, "policies")?,
        })])
    }
}

impl Resource for LdapUser {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "LDAP User"
    }

    fn desired(&self, _env: &SeedEnv) -> Result<Value> {
        Ok(json!({
            "groups": self.groups.join(","),
            "policies": self.policies.join(","),
        }))
    }
}
