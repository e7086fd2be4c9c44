//! Error types for the vaultseed provisioning system.
//!
//! This module provides the error hierarchy for every stage of a seed run:
//! manifest loading, remote Vault calls, mount constraints, and the
//! freeze/thaw archive boundary.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for vaultseed.
#[derive(Debug, Error)]
pub enum SeedError {
    /// Missing or unusable Vault credentials.
    #[error("Something wrong with Vault credentials: {message}")]
    Credentials {
        /// Description of the credential problem.
        message: String,
    },

    /// The manifest or a local file it references is invalid.
    #[error("{0}")]
    Manifest(#[from] ManifestError),

    /// Transport or API level failure talking to Vault.
    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    /// Vault is imposing a constraint on us.
    #[error("A Vault constraint exists: {0}")]
    Constraint(#[from] ConstraintError),

    /// Freeze/thaw archive errors.
    #[error("{0}")]
    Archive(#[from] ArchiveError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while loading and validating the manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Structurally invalid manifest data.
    #[error("Invalid manifest data: {message}")]
    Data {
        /// Description of the data problem.
        message: String,
    },

    /// A field failed shape validation.
    #[error("Validation error: {message}")]
    Validation {
        /// Description of the validation failure.
        message: String,
    },

    /// A local secret or policy file is missing or unsafe.
    #[error("Problem with a local file {path}: {message}")]
    File {
        /// Offending file.
        path: PathBuf,
        /// What is wrong with it.
        message: String,
    },

    /// The manifest (or a var file) could not be parsed.
    #[error("Failed to parse {location}: {message}")]
    Parse {
        /// Description of the parse error.
        message: String,
        /// Source location.
        location: String,
    },
}

/// Errors coming back from the Vault API.
#[derive(Debug, Error)]
pub enum VaultError {
    /// The token is not allowed to touch this path.
    #[error("permission denied on {path}")]
    PermissionDenied {
        /// Path that was denied.
        path: String,
    },

    /// Vault rejected the request.
    #[error("request to {path} failed: {status} - {message}")]
    Api {
        /// Path of the request.
        path: String,
        /// HTTP status code.
        status: u16,
        /// Error messages returned by Vault.
        message: String,
    },

    /// Network error.
    #[error("network error communicating with Vault: {message}")]
    Network {
        /// Description of the network error.
        message: String,
    },

    /// Vault returned data we did not expect.
    #[error("Unexpected Vault data: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },

    /// A renewed lease came back shorter than requested.
    #[error("lease {lease_id} renewed for {granted}s, wanted {requested}s")]
    LeaseTooShort {
        /// Lease identifier.
        lease_id: String,
        /// Requested increment in seconds.
        requested: u64,
        /// Granted duration in seconds.
        granted: u64,
    },
}

/// Constraints Vault imposes on a sync.
#[derive(Debug, Error)]
pub enum ConstraintError {
    /// A mount point overlaps an existing one.
    #[error("{path} has a mountpoint conflict with {existing}")]
    MountConflict {
        /// Requested mount point.
        path: String,
        /// Mount point that is in the way.
        existing: String,
    },

    /// The description of a mount cannot be changed in place.
    #[error("description of {path} differs ({existing:?} != {desired:?}) and cannot be changed in place")]
    DescriptionImmutable {
        /// Mount point.
        path: String,
        /// Description currently on the server.
        existing: Option<String>,
        /// Declared description.
        desired: Option<String>,
    },

    /// User facing rendition of a permission denied response.
    #[error("Permission denied {action} {target}")]
    PermissionDenied {
        /// What we were doing ("writing", "reading", ...).
        action: String,
        /// What we were doing it to.
        target: String,
    },
}

/// Ice file errors.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The archive is corrupt or incomplete.
    #[error("Corrupt icefile: {message}")]
    IceFile {
        /// Description of the problem.
        message: String,
    },

    /// The encryption collaborator failed.
    #[error("Encryption failed: {message}")]
    Encryption {
        /// Description of the failure.
        message: String,
    },
}

/// Result type alias for vaultseed operations.
pub type Result<T> = std::result::Result<T, SeedError>;

impl SeedError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this is a raw permission denied response from Vault.
    #[must_use]
    pub const fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            Self::Vault(VaultError::PermissionDenied { .. })
                | Self::Constraint(ConstraintError::PermissionDenied { .. })
        )
    }

    /// Returns true if Vault answered that nothing handles this path.
    #[must_use]
    pub fn is_unsupported_path(&self) -> bool {
        match self {
            Self::Vault(VaultError::Api { message, .. }) => {
                message.starts_with("no handler for route")
                    || message.contains("unsupported path")
            }
            _ => false,
        }
    }
}

impl ManifestError {
    /// Creates a data error.
    #[must_use]
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data {
            message: message.into(),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a file error.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::File {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl VaultError {
    /// Creates an API error.
    #[must_use]
    pub fn api(path: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            path: path.into(),
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates an invalid response error.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }
}

impl ArchiveError {
    /// Creates an ice file error.
    #[must_use]
    pub fn ice(message: impl Into<String>) -> Self {
        Self::IceFile {
            message: message.into(),
        }
    }
}
