//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;

use vaultseed::config::{Manifest, SeedEnv, SeedOptions, sanitize_mount};
use vaultseed::context::Context;
use vaultseed::error::{Result, VaultError};
use vaultseed::vault::{BackendRole, MountInfo, MountRequest, VaultApi};

/// One mutating call seen by [`MemoryVault`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Write(String),
    Delete(String),
    Mount(BackendRole, String),
    Unmount(BackendRole, String),
}

/// A Vault server kept in memory. Reads echo back exactly what was written.
#[derive(Debug)]
pub struct MemoryVault {
    data: Mutex<BTreeMap<String, Value>>,
    mounts: Mutex<BTreeMap<(BackendRole, String), MountInfo>>,
    secret_ids: Mutex<BTreeSet<(String, String)>>,
    calls: Mutex<Vec<(Call, String)>>,
    failing: Mutex<BTreeSet<String>>,
    token: Mutex<String>,
    original: String,
}

impl Default for MemoryVault {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryVault {
    /// A server with the stock `secret`, `sys`, `cubbyhole` and `token` mounts.
    pub fn new() -> Self {
        let vault = Self {
            data: Mutex::new(BTreeMap::new()),
            mounts: Mutex::new(BTreeMap::new()),
            secret_ids: Mutex::new(BTreeSet::new()),
            calls: Mutex::new(vec![]),
            failing: Mutex::new(BTreeSet::new()),
            token: Mutex::new(String::from("s.working")),
            original: String::from("s.original"),
        };
        vault.add_mount(BackendRole::Secret, "secret", "kv");
        vault.add_mount(BackendRole::Secret, "sys", "system");
        vault.add_mount(BackendRole::Secret, "cubbyhole", "cubbyhole");
        vault.add_mount(BackendRole::Auth, "token", "token");
        vault
    }

    pub fn add_mount(&self, role: BackendRole, path: &str, kind: &str) {
        self.mounts
            .lock()
            .unwrap()
            .insert((role, path.to_string()), MountInfo::new(kind));
    }

    /// Adds a secret mount with engine options, e.g. a KV version 2 store.
    pub fn add_mount_with_options(&self, path: &str, kind: &str, options: Value) {
        let info = MountInfo {
            options: options.as_object().cloned(),
            ..MountInfo::new(kind)
        };
        self.mounts
            .lock()
            .unwrap()
            .insert((BackendRole::Secret, path.to_string()), info);
    }

    /// Makes every later write to `path` fail with a server error.
    pub fn fail_writes(&self, path: &str) {
        self.failing.lock().unwrap().insert(path.to_string());
    }

    pub fn mount(&self, role: BackendRole, path: &str) -> Option<MountInfo> {
        self.mounts.lock().unwrap().get(&(role, path.to_string())).cloned()
    }

    pub fn put(&self, path: &str, value: Value) {
        self.data.lock().unwrap().insert(path.to_string(), value);
    }

    pub fn get(&self, path: &str) -> Option<Value> {
        self.data.lock().unwrap().get(path).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().iter().map(|(call, _)| call.clone()).collect()
    }

    /// The token that was active for each recorded call.
    pub fn token_of(&self, call: &Call) -> Option<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(seen, _)| seen == call)
            .map(|(_, token)| token.clone())
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: Call) {
        let token = self.token();
        self.calls.lock().unwrap().push((call, token));
    }

    fn tune_target(path: &str) -> Option<(BackendRole, String)> {
        let mount = path.strip_prefix("sys/mounts/")?.strip_suffix("/tune")?;
        Some(match mount.strip_prefix("auth/") {
            Some(auth) => (BackendRole::Auth, auth.to_string()),
            None => (BackendRole::Secret, mount.to_string()),
        })
    }

    fn approle_secret(path: &str, suffix: &str) -> Option<String> {
        path.strip_suffix(suffix).map(String::from)
    }
}

#[async_trait]
impl VaultApi for MemoryVault {
    async fn read(&self, path: &str) -> Result<Option<Value>> {
        if let Some(key) = Self::tune_target(path) {
            let mounts = self.mounts.lock().unwrap();
            return Ok(mounts
                .get(&key)
                .map(|m| json!({ "data": m.config.clone().unwrap_or_default() })));
        }
        Ok(self.get(path).map(|data| json!({ "data": data })))
    }

    async fn write(&self, path: &str, payload: &Value) -> Result<Option<Value>> {
        let secret_id = payload.get("secret_id").and_then(Value::as_str).unwrap_or_default();

        if let Some(role) = Self::approle_secret(path, "/secret-id/lookup") {
            let known = self
                .secret_ids
                .lock()
                .unwrap()
                .contains(&(role, secret_id.to_string()));
            return Ok(known.then(|| json!({ "data": { "secret_id_accessor": "accessor" } })));
        }

        self.record(Call::Write(path.to_string()));
        if self.failing.lock().unwrap().contains(path) {
            return Err(VaultError::api(path, 500, "internal error").into());
        }

        if let Some(key) = Self::tune_target(path) {
            let mut mounts = self.mounts.lock().unwrap();
            if let Some(mount) = mounts.get_mut(&key) {
                let mut config = mount.config.clone().unwrap_or_default();
                config.extend(payload.as_object().cloned().unwrap_or_default());
                mount.config = Some(config);
            }
            return Ok(None);
        }
        if let Some(role) = Self::approle_secret(path, "/custom-secret-id") {
            self.secret_ids.lock().unwrap().insert((role, secret_id.to_string()));
            return Ok(Some(json!({ "data": { "secret_id_accessor": "accessor" } })));
        }
        if let Some(role) = Self::approle_secret(path, "/secret-id/destroy") {
            self.secret_ids.lock().unwrap().remove(&(role, secret_id.to_string()));
            return Ok(None);
        }

        self.put(path, payload.clone());
        Ok(None)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.record(Call::Delete(path.to_string()));
        let mut data = self.data.lock().unwrap();
        data.remove(path);
        // KV version 2 metadata deletes drop every version.
        if let Some((mount, relative)) = path.split_once("/metadata/") {
            data.remove(&format!("{mount}/data/{relative}"));
        }
        Ok(())
    }

    async fn list_mounts(&self, role: BackendRole) -> Result<BTreeMap<String, MountInfo>> {
        Ok(self
            .mounts
            .lock()
            .unwrap()
            .iter()
            .filter(|((r, _), _)| *r == role)
            .map(|((_, path), info)| (format!("{path}/"), info.clone()))
            .collect())
    }

    async fn enable_mount(&self, role: BackendRole, request: &MountRequest) -> Result<()> {
        let path = sanitize_mount(&request.path);
        let mut mounts = self.mounts.lock().unwrap();
        if mounts.contains_key(&(role, path.clone())) {
            return Err(VaultError::api(
                format!("{}/{path}", role.sys_path()),
                400,
                format!("existing mount at {path}/"),
            )
            .into());
        }
        mounts.insert(
            (role, path.clone()),
            MountInfo {
                kind: request.kind.clone(),
                description: request.description.clone(),
                options: request.options.clone(),
                config: request.config.clone(),
            },
        );
        drop(mounts);
        self.record(Call::Mount(role, path));
        Ok(())
    }

    async fn disable_mount(&self, role: BackendRole, path: &str) -> Result<()> {
        let path = sanitize_mount(path);
        self.mounts.lock().unwrap().remove(&(role, path.clone()));
        let prefix = format!("{path}/");
        self.data.lock().unwrap().retain(|k, _| !k.starts_with(&prefix));
        self.record(Call::Unmount(role, path));
        Ok(())
    }

    async fn renew_lease(&self, _lease_id: &str, increment: u64) -> Result<u64> {
        Ok(increment)
    }

    fn token(&self) -> String {
        self.token.lock().unwrap().clone()
    }

    fn set_token(&self, token: &str) {
        *self.token.lock().unwrap() = token.to_string();
    }

    fn original_token(&self) -> String {
        self.original.clone()
    }
}

/// A secrets and policies directory for one test.
pub struct Workspace {
    pub dir: tempfile::TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".secrets")).unwrap();
        std::fs::create_dir_all(dir.path().join("vault")).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Writes a secret file restricted to its owner.
    pub fn secret(&self, name: &str, content: &str) {
        let path = self.root().join(".secrets").join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        }
    }

    pub fn policy(&self, name: &str, content: &str) {
        std::fs::write(self.root().join("vault").join(name), content).unwrap();
    }

    pub fn options(&self) -> SeedOptions {
        SeedOptions::new(self.root().join("Secretfile"))
    }

    pub fn env(&self) -> SeedEnv {
        SeedEnv::new(&self.options()).unwrap()
    }
}

/// Loads a context from a JSON manifest.
pub fn context(doc: Value, options: &SeedOptions, env: &SeedEnv) -> Context {
    let manifest = Manifest::from_value(doc).unwrap();
    Context::load(&manifest, options, env).unwrap()
}

/// Converts a JSON literal into a map.
pub fn map(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}
