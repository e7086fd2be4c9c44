// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![forbid(unsafe_code)]               // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Vaultseed
//!
//! Declarative, idempotent provisioning of a Vault server.
//!
//! ## Overview
//!
//! A `Secretfile` manifest declares secret engines, auth methods, audit
//! devices, policies, roles and secrets. Vaultseed reads what the server
//! currently holds, classifies every declared item as add, change, delete,
//! overwrite, no-op or conflict, and applies the difference:
//!
//! - Mount points are created, retuned, replaced or removed as declared
//! - Secrets come from local var files, raw files or generators
//! - Roles and policies are rendered from templates
//! - Local secret files can be frozen into, and thawed from, encrypted archives
//!
//! ## Architecture
//!
//! 1. **Manifest**: parsed from the `Secretfile` into a [`context::Context`]
//! 2. **Fetch**: the remote state of every backend and resource is read
//! 3. **Sync**: changes are applied phase by phase so that policies, auth
//!    methods and mounts exist before anything that needs them
//!
//! ## Modules
//!
//! - [`config`]: Manifest loading, run options and validation helpers
//! - [`vault`]: Vault API client, mount metadata and token handling
//! - [`model`]: Resource kinds and mount point lifecycle
//! - [`planner`]: Diff classification and reports
//! - [`context`]: Resource aggregate, selection, freeze and thaw
//! - [`reconciler`]: Fetch, diff and phased sync
//! - [`archive`]: Ice file packing and encryption
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! mounts:
//!   - path: apps
//!     tune:
//!       default_lease_ttl: 1h
//!
//! policies:
//!   - name: apps-read
//!     file: apps-read.hcl
//!
//! secrets:
//!   - var_file: db.yml
//!     mount: apps
//!     path: db
//!     tags: [db]
//!
//! approles:
//!   - name: ci
//!     policies: [apps-read]
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod archive;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod model;
pub mod planner;
pub mod reconciler;
pub mod vault;

// ============================================================================
// Re-exports
// ============================================================================

pub use archive::{Encryptor, GpgEncryptor, PassthroughEncryptor};
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{Manifest, SeedEnv, SeedOptions};
pub use context::Context;
pub use error::{Result, SeedError};
pub use model::{Backend, Resource};
pub use planner::{DiffReport, DiffType, SeedReport};
pub use reconciler::Reconciler;
pub use vault::{HttpVaultClient, VaultApi};
