//! Configuration module for vaultseed.
//!
//! This module handles everything that happens before talking to Vault:
//! - Loading and rendering the manifest (`Secretfile`)
//! - Run options and environment overrides
//! - Template variables and local secret files
//! - Validation helpers shared by the resource model

mod env;
mod manifest;
mod options;
mod template;
pub mod validator;

pub use env::{SeedEnv, hard_path};
pub use manifest::{Manifest, PGP_KEYS, RESOURCE_KEYS};
pub use options::{DEFAULT_SECRETFILE, SeedOptions};
pub use template::{
    SimpleRenderer, TemplateRenderer, load_vars_file, parse_extra_vars, parse_yaml_map,
};
pub use validator::{is_tagged, sanitize_mount, specific_path_check};
