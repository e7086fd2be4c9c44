//! Token handling.
//!
//! Covers locating credentials, the scoped swap back to the bootstrap token
//! needed for per-token storage, and bounded lease renewal.

use std::path::PathBuf;
use tracing::{debug, info};

use crate::error::{Result, SeedError, VaultError};

use super::client::{HttpVaultClient, VaultApi};

/// Allowed shortfall between a requested and a granted lease, in seconds.
pub const LEASE_TOLERANCE_SECS: u64 = 10;

/// Swaps a client to its original token for the lifetime of the scope.
///
/// The working token is restored on drop, so every exit path, including
/// `?` returns, puts it back.
pub struct TokenScope<'a> {
    client: &'a dyn VaultApi,
    previous: String,
}

impl<'a> TokenScope<'a> {
    /// Switches `client` to the token it was created with.
    #[must_use]
    pub fn original(client: &'a dyn VaultApi) -> Self {
        let previous = client.token();
        client.set_token(&client.original_token());
        Self { client, previous }
    }
}

impl Drop for TokenScope<'_> {
    fn drop(&mut self) {
        self.client.set_token(&self.previous);
    }
}

/// Renews a lease once.
///
/// # Errors
///
/// Returns [`VaultError::LeaseTooShort`] if the granted lease falls short
/// of the requested one by more than [`LEASE_TOLERANCE_SECS`].
pub async fn renew_once(client: &dyn VaultApi, lease_id: &str, requested: u64) -> Result<u64> {
    let granted = client.renew_lease(lease_id, requested).await?;
    debug!("Lease {lease_id} renewed for {granted}s");

    if granted.saturating_add(LEASE_TOLERANCE_SECS) < requested {
        return Err(VaultError::LeaseTooShort {
            lease_id: lease_id.to_string(),
            requested,
            granted,
        }
        .into());
    }

    Ok(granted)
}

/// Connection settings read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Server address.
    pub addr: String,
    /// Token to authenticate with.
    pub token: String,
    /// Skip TLS verification.
    pub skip_verify: bool,
}

impl Credentials {
    /// Reads `VAULT_ADDR`, `VAULT_TOKEN`/`VAULT_TOKEN_FILE` and
    /// `VAULT_SKIP_VERIFY`. Without either token variable `~/.vault-token`
    /// is used.
    ///
    /// # Errors
    ///
    /// Returns a credentials error if no address or token can be found.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let addr = lookup("VAULT_ADDR").ok_or_else(|| SeedError::Credentials {
            message: String::from("VAULT_ADDR is not set"),
        })?;

        let token = match lookup("VAULT_TOKEN") {
            Some(token) => token,
            None => {
                let path = lookup("VAULT_TOKEN_FILE")
                    .map(PathBuf::from)
                    .or_else(|| dirs::home_dir().map(|h| h.join(".vault-token")))
                    .ok_or_else(|| SeedError::Credentials {
                        message: String::from("no token and no home directory"),
                    })?;
                std::fs::read_to_string(&path)
                    .map_err(|e| SeedError::Credentials {
                        message: format!("unable to read token from {}: {e}", path.display()),
                    })?
                    .trim()
                    .to_string()
            }
        };

        if token.is_empty() {
            return Err(SeedError::Credentials {
                message: String::from("token is empty"),
            });
        }

        let skip_verify = lookup("VAULT_SKIP_VERIFY")
            .is_some_and(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"));

        Ok(Self {
            addr,
            token,
            skip_verify,
        })
    }
}

/// Builds an authenticated client from the environment.
///
/// Operational token creation happens upstream; with `reuse_token` the
/// supplied token is used as is, which is also the only mode supported here.
///
/// # Errors
///
/// Returns an error if credentials are missing or the client cannot be built.
pub fn authenticate(reuse_token: bool) -> Result<HttpVaultClient> {
    let credentials = Credentials::from_env()?;
    if !reuse_token {
        debug!("Operational token creation is handled upstream, using supplied token");
    }
    info!("Connecting to Vault at {}", credentials.addr);
    HttpVaultClient::new(&credentials.addr, &credentials.token, credentials.skip_verify)
}
