//! Auth method resources: AppRole, token roles, userpass, app-id and DUO.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::path::Path;
use tracing::warn;

use crate::config::SeedEnv;
use crate::config::validator::{Field, check_entry, check_obj, sanitize_mount};
use crate::error::{ManifestError, Result, SeedError, VaultError};
use crate::planner::DiffType;
use crate::vault::VaultApi;

use super::mount::tunable;
use super::resource::{
    BackendSpec, Phase, Resource, ResourceBase, denied, map_val, optional_str, read_path,
    required_str, string_list, unwrap_data, write_path,
};

/// An AppRole role, plus any pushed secret IDs.
#[derive(Debug)]
pub struct AppRole {
    base: ResourceBase,
    payload: Map<String, Value>,
}

impl AppRole {
    /// Builds an AppRole and its preset secret IDs.
    ///
    /// # Errors
    ///
    /// Returns a data error if `name`, or `policies` for a present role, is
    /// missing, or a preset lacks `name` or `filename`.
    pub fn build(obj: &Map<String, Value>, _env: &SeedEnv) -> Result<Vec<Box<dyn Resource>>> {
        check_entry(&[Field::One("name")], &[Field::One("policies")], "approle", obj)?;
        let name = optional_str(obj, "name").unwrap_or_default().to_string();

        // Vault attaches `default` on its own; declaring it keeps reads stable.
        let mut policies = string_list(obj, "policies")?;
        if !policies.iter().any(|p| p == "default") {
            policies.push(String::from("default"));
            policies.sort();
        }

        let mut payload = Map::new();
        payload.insert(String::from("policies"), Value::String(policies.join(",")));
        map_val(&mut payload, obj, "bound_cidr_list", "cidr_list", Some(json!("")));
        map_val(&mut payload, obj, "secret_id_num_uses", "secret_uses", Some(json!(0)));
        map_val(&mut payload, obj, "secret_id_ttl", "secret_ttl", Some(json!(0)));
        for (key, default) in [
            ("period", json!(0)),
            ("token_max_ttl", json!(0)),
            ("token_ttl", json!(0)),
            ("bind_secret_id", json!(true)),
            ("token_num_uses", json!(0)),
        ] {
            map_val(&mut payload, obj, key, key, Some(default));
        }

        let spec = tunable(BackendSpec::auth("approle", "approle").governing(), obj);
        let base = ResourceBase::new(format!("auth/approle/role/{name}"), obj)?.with_backend(spec);
        let present = base.present;

        let mut built: Vec<Box<dyn Resource>> = vec![Box::new(Self { base, payload })];
        if let Some(Value::Array(presets)) = obj.get("preset") {
            for preset in presets {
                let preset = preset
                    .as_object()
                    .ok_or_else(|| ManifestError::validation("approle presets must be maps"))?;
                built.push(Box::new(AppRoleSecret::new(&name, preset, present)?));
            }
        }
        Ok(built)
    }
}

impl Resource for AppRole {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "AppRole"
    }

    fn desired(&self, _env: &SeedEnv) -> Result<Value> {
        Ok(Value::Object(self.payload.clone()))
    }
}

/// A custom secret ID pushed to an AppRole.
#[derive(Debug)]
pub struct AppRoleSecret {
    base: ResourceBase,
    role: String,
    name: String,
    filename: String,
}

impl AppRoleSecret {
    fn new(role: &str, obj: &Map<String, Value>, present: bool) -> Result<Self> {
        check_obj(&[Field::One("name"), Field::One("filename")], "approle secret", obj)?;
        let name = required_str(obj, "name", "approle secret")?.to_string();
        Ok(Self {
            base: ResourceBase::child(format!("auth/approle/role/{role}/secret-id/{name}"), present),
            role: role.to_string(),
            name,
            filename: required_str(obj, "filename", "approle secret")?.to_string(),
        })
    }

    fn role_path(&self, suffix: &str) -> String {
        format!("auth/approle/role/{}/{suffix}", self.role)
    }

    fn secret_id(&self, env: &SeedEnv) -> Result<String> {
        let data = env.read_secret(&self.filename)?;
        Ok(String::from_utf8_lossy(&data).trim().to_string())
    }
}

#[async_trait]
impl Resource for AppRoleSecret {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "AppRole Secret"
    }

    fn describe(&self) -> String {
        format!("AppRole Secret {} {}", self.role, self.name)
    }

    fn secrets(&self) -> Vec<String> {
        vec![self.filename.clone()]
    }

    fn desired(&self, env: &SeedEnv) -> Result<Value> {
        let metadata = json!({ "secret_name": self.name }).to_string();
        Ok(json!({ "secret_id": self.secret_id(env)?, "metadata": metadata }))
    }

    fn diff(&self, _env: &SeedEnv) -> Result<DiffType> {
        let accessor = self
            .base
            .existing
            .as_ref()
            .is_some_and(|e| e.get("secret_id_accessor").is_some());
        Ok(match (self.present(), self.base.existing.is_some()) {
            (true, _) if accessor => DiffType::Noop,
            (true, _) => DiffType::Add,
            (false, true) => DiffType::Delete,
            (false, false) => DiffType::Noop,
        })
    }

    async fn read(&self, client: &dyn VaultApi, env: &SeedEnv) -> Result<Option<Value>> {
        let path = self.role_path("secret-id/lookup");
        let missing_role = format!("role {} does not exist", self.role);
        let body = json!({ "secret_id": self.secret_id(env)? });
        match client.write(&path, &body).await {
            Ok(found) => Ok(found.map(unwrap_data).filter(|v| !v.is_null())),
            Err(e) if e.is_unsupported_path() => Ok(None),
            Err(SeedError::Vault(VaultError::Api { status, message, .. }))
                if status == 404 || message.contains(&missing_role) =>
            {
                Ok(None)
            }
            Err(e) => Err(denied("reading", &path, e)),
        }
    }

    async fn write(&self, client: &dyn VaultApi, env: &SeedEnv) -> Result<()> {
        let payload = self.desired(env)?;
        write_path(client, &self.role_path("custom-secret-id"), &payload).await
    }

    async fn delete(&self, client: &dyn VaultApi, env: &SeedEnv) -> Result<()> {
        let body = json!({ "secret_id": self.secret_id(env)? });
        write_path(client, &self.role_path("secret-id/destroy"), &body).await
    }
}

/// A role on the built-in token auth method.
#[derive(Debug)]
pub struct TokenRole {
    base: ResourceBase,
    payload: Map<String, Value>,
}

impl TokenRole {
    /// Builds a token role.
    ///
    /// # Errors
    ///
    /// Returns a data error if `name` is missing.
    pub fn build(obj: &Map<String, Value>, _env: &SeedEnv) -> Result<Vec<Box<dyn Resource>>> {
        check_obj(&[Field::One("name")], "token role", obj)?;
        let name = optional_str(obj, "name").unwrap_or_default();

        let mut payload = Map::new();
        for key in ["allowed_policies", "disallowed_policies"] {
            if obj.contains_key(key) {
                payload.insert(key.to_string(), Value::String(string_list(obj, key)?.join(",")));
            }
        }
        for (key, default) in [
            ("orphan", json!(true)),
            ("period", json!(0)),
            ("renewable", json!(true)),
            ("explicit_max_ttl", json!(0)),
            ("path_suffix", json!("")),
        ] {
            map_val(&mut payload, obj, key, key, Some(default));
        }

        let base = ResourceBase::new(format!("auth/token/roles/{name}"), obj)?
            .with_backend(BackendSpec::auth("token", "token"));
        Ok(vec![Box::new(Self { base, payload })])
    }
}

impl Resource for TokenRole {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "Token Role"
    }

    fn desired(&self, _env: &SeedEnv) -> Result<Value> {
        Ok(Value::Object(self.payload.clone()))
    }
}

/// The userpass auth method itself.
#[derive(Debug)]
pub struct UserPass {
    base: ResourceBase,
}

impl UserPass {
    /// Builds a userpass mount declaration.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad `state` or `tags` field.
    pub fn build(obj: &Map<String, Value>, _env: &SeedEnv) -> Result<Vec<Box<dyn Resource>>> {
        let mount = sanitize_mount(optional_str(obj, "path").unwrap_or("userpass"));
        let spec = tunable(BackendSpec::auth(mount.clone(), "userpass").governing(), obj);
        let base = ResourceBase::new(format!("auth/{mount}"), obj)?.with_backend(spec);
        Ok(vec![Box::new(Self { base })])
    }
}

impl Resource for UserPass {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "UserPass"
    }

    fn desired(&self, _env: &SeedEnv) -> Result<Value> {
        Ok(Value::Null)
    }

    fn phase(&self) -> Phase {
        Phase::AuthWrapper
    }

    fn no_resource(&self) -> bool {
        true
    }
}

/// A userpass account. Passwords cannot be read back.
#[derive(Debug)]
pub struct UserPassUser {
    base: ResourceBase,
    password_file: String,
    payload: Map<String, Value>,
}

impl UserPassUser {
    /// Builds a userpass account.
    ///
    /// # Errors
    ///
    /// Returns a data error if `username` is missing, or a present account
    /// lacks `password_file` or `policies`.
    pub fn build(obj: &Map<String, Value>, _env: &SeedEnv) -> Result<Vec<Box<dyn Resource>>> {
        check_entry(
            &[Field::One("username")],
            &[Field::One("password_file"), Field::One("policies")],
            "user",
            obj,
        )?;
        let username = optional_str(obj, "username").unwrap_or_default();

        let mut payload = Map::new();
        payload.insert(
            String::from("policies"),
            Value::String(string_list(obj, "policies")?.join(",")),
        );
        map_val(&mut payload, obj, "ttl", "ttl", None);
        map_val(&mut payload, obj, "max_ttl", "max_ttl", None);

        let base = ResourceBase::new(sanitize_mount(&format!("auth/userpass/users/{username}")), obj)?
            .with_backend(BackendSpec::auth("userpass", "userpass"));
        Ok(vec![Box::new(Self {
            base,
            password_file: optional_str(obj, "password_file").unwrap_or_default().to_string(),
            payload,
        })])
    }
}

impl Resource for UserPassUser {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "UserPass User"
    }

    fn write_only(&self) -> bool {
        true
    }

    fn secrets(&self) -> Vec<String> {
        vec![self.password_file.clone()]
    }

    fn desired(&self, env: &SeedEnv) -> Result<Value> {
        let data = env.read_secret(&self.password_file)?;
        let text = String::from_utf8_lossy(&data);
        let password = text.lines().next().unwrap_or_default().trim();

        let mut payload = self.payload.clone();
        payload.insert(String::from("password"), Value::from(password));
        Ok(Value::Object(payload))
    }
}

/// A legacy app-id application, with its users as children.
#[derive(Debug)]
pub struct AppId {
    base: ResourceBase,
    app_file: String,
    payload: Map<String, Value>,
}

impl AppId {
    /// Builds an application from its entry and app file.
    ///
    /// The app file is only read when the application is present.
    ///
    /// # Errors
    ///
    /// Returns an error if `app_file` is missing, unreadable or has no
    /// `users`.
    pub fn build(obj: &Map<String, Value>, env: &SeedEnv) -> Result<Vec<Box<dyn Resource>>> {
        check_obj(&[Field::One("app_file")], "app", obj)?;
        let app_file = optional_str(obj, "app_file").unwrap_or_default().to_string();
        let name = optional_str(obj, "name").map_or_else(
            || {
                Path::new(&app_file)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default()
            },
            String::from,
        );

        let mut base = ResourceBase::new(String::new(), obj)?
            .with_backend(BackendSpec::auth("app-id", "app-id").governing());
        let data = if base.present {
            env.load_var_file(&app_file)?
        } else {
            Map::new()
        };

        let pick = |key: &str| -> String {
            if let Some(value) = optional_str(&data, key) {
                warn!("Defining {key} within the app yaml is deprecated");
                return value.to_string();
            }
            optional_str(obj, key).map_or_else(|| name.clone(), String::from)
        };
        let app_id = pick("app_id");
        let policy_name = pick("policy_name");

        base.path = format!("auth/app-id/map/app-id/{app_id}");
        let present = base.present;

        let mut payload = Map::new();
        payload.insert(String::from("value"), Value::String(policy_name));
        payload.insert(String::from("display_name"), Value::String(name));

        let mut built: Vec<Box<dyn Resource>> = vec![Box::new(Self {
            base,
            app_file: app_file.clone(),
            payload,
        })];
        if !present {
            return Ok(built);
        }

        let Some(Value::Array(users)) = data.get("users") else {
            return Err(ManifestError::data(format!("Invalid app file {app_file}")).into());
        };
        for user in users {
            let user = user
                .as_object()
                .ok_or_else(|| ManifestError::validation("app users must be maps"))?;
            built.push(Box::new(AppUser::new(&app_id, user)?));
        }
        Ok(built)
    }
}

impl Resource for AppId {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "App ID"
    }

    fn secrets(&self) -> Vec<String> {
        vec![self.app_file.clone()]
    }

    fn desired(&self, _env: &SeedEnv) -> Result<Value> {
        Ok(Value::Object(self.payload.clone()))
    }
}

/// A user mapped to an app-id application.
#[derive(Debug)]
pub struct AppUser {
    base: ResourceBase,
    payload: Map<String, Value>,
}

impl AppUser {
    fn new(app_id: &str, obj: &Map<String, Value>) -> Result<Self> {
        check_obj(&[Field::One("id")], "app user", obj)?;
        let id = match obj.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };

        let mut payload = Map::new();
        payload.insert(String::from("value"), Value::from(app_id));
        map_val(&mut payload, obj, "cidr_block", "cidr", None);
        Ok(Self {
            base: ResourceBase::child(format!("auth/app-id/map/user-id/{id}"), true),
            payload,
        })
    }
}

impl Resource for AppUser {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "App User"
    }

    fn desired(&self, _env: &SeedEnv) -> Result<Value> {
        Ok(Value::Object(self.payload.clone()))
    }
}

/// DUO MFA on an auth method.
#[derive(Debug)]
pub struct Duo {
    base: ResourceBase,
}

impl Duo {
    /// Builds the MFA config and its access credentials child.
    ///
    /// # Errors
    ///
    /// Returns a data error if `backend` is missing, or a present config
    /// lacks `host` or `creds`.
    pub fn build(obj: &Map<String, Value>, _env: &SeedEnv) -> Result<Vec<Box<dyn Resource>>> {
        check_entry(
            &[Field::One("backend")],
            &[Field::One("host"), Field::One("creds")],
            "duo",
            obj,
        )?;
        let backend = sanitize_mount(optional_str(obj, "backend").unwrap_or_default());
        let base = ResourceBase::new(format!("auth/{backend}/mfa_config"), obj)?
            .with_backend(BackendSpec::auth(backend.clone(), backend.clone()));

        let access = DuoAccess {
            base: ResourceBase::child(format!("auth/{backend}/duo/access"), base.present),
            mfa_path: format!("auth/{backend}/mfa_config"),
            host: optional_str(obj, "host").unwrap_or_default().to_string(),
            creds: optional_str(obj, "creds").unwrap_or_default().to_string(),
        };
        Ok(vec![Box::new(Self { base }), Box::new(access)])
    }
}

impl Resource for Duo {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "DUO MFA"
    }

    fn desired(&self, _env: &SeedEnv) -> Result<Value> {
        Ok(json!({ "type": "duo" }))
    }
}

/// DUO API credentials. They cannot be read back.
#[derive(Debug)]
pub struct DuoAccess {
    base: ResourceBase,
    mfa_path: String,
    host: String,
    creds: String,
}

#[async_trait]
impl Resource for DuoAccess {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn kind(&self) -> &'static str {
        "DUO Access"
    }

    fn write_only(&self) -> bool {
        true
    }

    fn secrets(&self) -> Vec<String> {
        vec![self.creds.clone()]
    }

    fn desired(&self, env: &SeedEnv) -> Result<Value> {
        let creds = env.load_var_file(&self.creds)?;
        check_obj(&[Field::One("secret"), Field::One("key")], "duo credentials", &creds)?;
        Ok(json!({ "host": self.host, "skey": creds["secret"], "ikey": creds["key"] }))
    }

    async fn read(&self, client: &dyn VaultApi, _env: &SeedEnv) -> Result<Option<Value>> {
        let config = read_path(client, &self.mfa_path).await?.map(unwrap_data);
        let enabled = config
            .as_ref()
            .and_then(|c| c.get("type"))
            .and_then(Value::as_str)
            == Some("duo");
        Ok(enabled.then(|| json!(true)))
    }
}
