//! Vault API integration module.
//!
//! This module provides everything needed to talk to a Vault server:
//! - The [`VaultApi`] trait the engine is written against
//! - An HTTP implementation of it
//! - Mount metadata types
//! - Token swapping, lease renewal and credential discovery

mod client;
mod token;
mod types;

pub use client::{HttpVaultClient, VaultApi, parse_mount_listing};
pub use token::{Credentials, LEASE_TOLERANCE_SECS, TokenScope, authenticate, renew_once};
pub use types::{BackendRole, MountInfo, MountRequest, same_kind};
