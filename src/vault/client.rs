//! Vault API client.
//!
//! [`VaultApi`] is the only way the engine talks to Vault. [`HttpVaultClient`]
//! implements it over the HTTP API. Calls are issued one at a time and
//! are never retried.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::sanitize_mount;
use crate::error::{Result, SeedError, VaultError};

use super::types::{BackendRole, MountInfo, MountRequest};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Header carrying the Vault token.
const TOKEN_HEADER: &str = "X-Vault-Token";

/// Operations the engine needs from a Vault server.
#[async_trait]
pub trait VaultApi: Send + Sync {
    /// Reads a path. `None` when nothing is there.
    async fn read(&self, path: &str) -> Result<Option<Value>>;

    /// Writes a payload to a path, returning the response body if any.
    async fn write(&self, path: &str, payload: &Value) -> Result<Option<Value>>;

    /// Deletes a path.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Lists mount points of a role, keyed by normalized path.
    async fn list_mounts(&self, role: BackendRole) -> Result<BTreeMap<String, MountInfo>>;

    /// Enables a mount point.
    async fn enable_mount(&self, role: BackendRole, request: &MountRequest) -> Result<()>;

    /// Disables a mount point.
    async fn disable_mount(&self, role: BackendRole, path: &str) -> Result<()>;

    /// Renews a lease, returning the granted duration in seconds.
    async fn renew_lease(&self, lease_id: &str, increment: u64) -> Result<u64>;

    /// The token currently used for requests.
    fn token(&self) -> String;

    /// Replaces the token used for requests.
    fn set_token(&self, token: &str);

    /// The token the client was first created with.
    fn original_token(&self) -> String;
}

/// Error body returned by Vault.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<String>,
}

/// HTTP implementation of [`VaultApi`].
pub struct HttpVaultClient {
    /// HTTP client.
    client: Client,
    /// Server address without trailing slash.
    addr: String,
    /// Token used for requests.
    token: Mutex<String>,
    /// Token the client was created with.
    original: String,
}

impl fmt::Debug for HttpVaultClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpVaultClient")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl HttpVaultClient {
    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(addr: &str, token: &str, skip_verify: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .danger_accept_invalid_certs(skip_verify)
            .build()
            .map_err(|e| VaultError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            addr: addr.trim_end_matches('/').to_string(),
            token: Mutex::new(token.to_string()),
            original: token.to_string(),
        })
    }

    /// The server address.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.addr, path.trim_start_matches('/'))
    }

    /// Sends a request and returns the decoded body, if any.
    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Option<Value>> {
        trace!("{method} {path}");

        let mut builder = self
            .client
            .request(method, self.url(path))
            .header(TOKEN_HEADER, self.token());
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| VaultError::network(format!("Request to {path} failed: {e}")))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| VaultError::network(format!("Failed to read response from {path}: {e}")))?;

        if status == StatusCode::FORBIDDEN {
            return Err(VaultError::PermissionDenied {
                path: path.to_string(),
            }
            .into());
        }

        if status == StatusCode::NOT_FOUND {
            let errors = serde_json::from_str::<ErrorBody>(&text).unwrap_or_default();
            if errors.errors.is_empty() {
                return Ok(None);
            }
            return Err(VaultError::api(path, status.as_u16(), errors.errors.join("; ")).into());
        }

        if !status.is_success() {
            let errors = serde_json::from_str::<ErrorBody>(&text).unwrap_or_default();
            let message = if errors.errors.is_empty() {
                text
            } else {
                errors.errors.join("; ")
            };
            return Err(VaultError::api(path, status.as_u16(), message).into());
        }

        if text.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| VaultError::invalid(format!("Failed to parse response from {path}: {e}")).into())
    }

    fn mount_path(role: BackendRole, path: &str) -> String {
        format!("{}/{}", role.sys_path(), sanitize_mount(path))
    }
}

#[async_trait]
impl VaultApi for HttpVaultClient {
    async fn read(&self, path: &str) -> Result<Option<Value>> {
        debug!("Reading {path}");
        self.request(Method::GET, path, None).await
    }

    async fn write(&self, path: &str, payload: &Value) -> Result<Option<Value>> {
        debug!("Writing {path}");
        self.request(Method::PUT, path, Some(payload)).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        debug!("Deleting {path}");
        self.request(Method::DELETE, path, None).await.map(|_| ())
    }

    async fn list_mounts(&self, role: BackendRole) -> Result<BTreeMap<String, MountInfo>> {
        let body = self
            .request(Method::GET, role.sys_path(), None)
            .await?
            .unwrap_or(Value::Null);
        parse_mount_listing(&body)
    }

    async fn enable_mount(&self, role: BackendRole, request: &MountRequest) -> Result<()> {
        let payload = serde_json::to_value(request)
            .map_err(|e| SeedError::internal(format!("Failed to encode mount request: {e}")))?;
        self.request(Method::POST, &Self::mount_path(role, &request.path), Some(&payload))
            .await
            .map(|_| ())
    }

    async fn disable_mount(&self, role: BackendRole, path: &str) -> Result<()> {
        self.request(Method::DELETE, &Self::mount_path(role, path), None)
            .await
            .map(|_| ())
    }

    async fn renew_lease(&self, lease_id: &str, increment: u64) -> Result<u64> {
        let body = self
            .request(
                Method::PUT,
                "sys/leases/renew",
                Some(&json!({"lease_id": lease_id, "increment": increment})),
            )
            .await?
            .ok_or_else(|| VaultError::invalid("empty lease renewal response"))?;

        body.get("lease_duration")
            .and_then(Value::as_u64)
            .ok_or_else(|| VaultError::invalid("lease renewal response has no lease_duration").into())
    }

    fn token(&self) -> String {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_token(&self, token: &str) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = token.to_string();
    }

    fn original_token(&self) -> String {
        self.original.clone()
    }
}

/// Parses a `sys/mounts`, `sys/auth` or `sys/audit` listing.
///
/// Newer servers nest the listing under `data` and also repeat it at the
/// top level alongside request metadata, so only entries that look like
/// mounts are kept.
///
/// # Errors
///
/// Returns an invalid response error if the body is not a map.
pub fn parse_mount_listing(body: &Value) -> Result<BTreeMap<String, MountInfo>> {
    let listing = match body.get("data") {
        Some(Value::Object(data)) => data,
        _ => body
            .as_object()
            .ok_or_else(|| VaultError::invalid("mount listing is not a map"))?,
    };

    Ok(listing
        .iter()
        .filter(|(_, v)| v.get("type").is_some_and(Value::is_string))
        .filter_map(|(k, v)| {
            serde_json::from_value::<MountInfo>(v.clone())
                .ok()
                .map(|info| (sanitize_mount(k), info))
        })
        .collect())
}
