//! Static mapping from manifest keys to resource constructors.

use serde_json::{Map, Value};
use tracing::warn;

use crate::config::SeedEnv;
use crate::error::Result;

use super::auth::{AppId, AppRole, Duo, TokenRole, UserPass, UserPassUser};
use super::aws::AwsRoot;
use super::generic::{GenericSecret, Latent};
use super::ldap::{Ldap, LdapGroup, LdapUser};
use super::mount::{AuditLog, Mount};
use super::policy::Policy;
use super::resource::Resource;
use super::ssh::SshRole;

/// Builds the resources for one manifest entry, parent first.
pub type Constructor = fn(&Map<String, Value>, &SeedEnv) -> Result<Vec<Box<dyn Resource>>>;

/// One registered resource kind.
#[derive(Debug, Clone, Copy)]
pub struct Registration {
    /// Top-level manifest key.
    pub key: &'static str,
    /// Field that selects this kind under a shared key, if any.
    pub discriminator: Option<&'static str>,
    /// Constructor.
    pub build: Constructor,
}

const fn entry(key: &'static str, discriminator: Option<&'static str>, build: Constructor) -> Registration {
    Registration {
        key,
        discriminator,
        build,
    }
}

/// Every resource kind, in load order. `mounts` come first so explicit
/// declarations own their backends before anything else references them.
pub static REGISTRY: &[Registration] = &[
    entry("mounts", None, Mount::build),
    entry("audit_logs", None, AuditLog::build),
    entry("policies", None, Policy::build),
    entry("userpass", None, UserPass::build),
    entry("ldap_auth", None, Ldap::build),
    entry("secrets", Some("var_file"), GenericSecret::var_file),
    entry("secrets", Some("aws_file"), AwsRoot::build),
    entry("secrets", Some("aws"), AwsRoot::build),
    entry("secrets", Some("files"), GenericSecret::files),
    entry("secrets", Some("generated"), GenericSecret::generated),
    entry("secrets", Some("ssh_creds"), SshRole::build),
    entry("secrets", Some("latent_file"), Latent::build),
    entry("apps", None, AppId::build),
    entry("approles", None, AppRole::build),
    entry("tokenroles", None, TokenRole::build),
    entry("users", None, UserPassUser::build),
    entry("ldap_groups", None, LdapGroup::build),
    entry("ldap_users", None, LdapUser::build),
    entry("duo", None, Duo::build),
];

/// Finds the constructor for an entry under `key`.
#[must_use]
pub fn lookup(key: &str, obj: &Map<String, Value>) -> Option<&'static Registration> {
    REGISTRY.iter().find(|r| {
        r.key == key && r.discriminator.is_none_or(|field| obj.contains_key(field))
    })
}

/// Builds the resources for one entry, skipping entries no kind matches.
///
/// # Errors
///
/// Returns the constructor's validation error.
pub fn build(key: &str, obj: &Map<String, Value>, env: &SeedEnv) -> Result<Vec<Box<dyn Resource>>> {
    match lookup(key, obj) {
        Some(registration) => (registration.build)(obj, env),
        None => {
            warn!("Unable to determine the resource kind of a {key} entry");
            Ok(vec![])
        }
    }
}

/// Manifest keys in load order, without repeats.
#[must_use]
pub fn keys() -> Vec<&'static str> {
    let mut keys: Vec<&'static str> = vec![];
    for registration in REGISTRY {
        if !keys.contains(&registration.key) {
            keys.push(registration.key);
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RESOURCE_KEYS;
    use serde_json::json;

    #[test]
    fn test_secrets_dispatch_on_field() {
        let env = SeedEnv::with_dirs(".", ".");
        let cases = [
            (json!({"var_file": "a.yml", "mount": "secret", "path": "a"}), "Var File"),
            (json!({"files": [], "mount": "secret", "path": "a"}), "Files"),
            (json!({"ssh_creds": "ops", "key_type": "otp"}), "SSH Role"),
            (json!({"latent_file": "a.pem"}), "Latent File"),
        ];
        for (obj, kind) in cases {
            let built = build("secrets", obj.as_object().unwrap(), &env).unwrap();
            assert_eq!(built[0].kind(), kind);
        }
    }

    #[test]
    fn test_unknown_secret_is_skipped() {
        let env = SeedEnv::with_dirs(".", ".");
        let obj = json!({"mystery": true});
        assert!(build("secrets", obj.as_object().unwrap(), &env).unwrap().is_empty());
    }

    #[test]
    fn test_every_manifest_key_is_registered() {
        let registered = keys();
        for key in RESOURCE_KEYS {
            assert!(registered.contains(key), "{key} has no constructor");
        }
        assert_eq!(registered[0], "mounts");
    }
}
