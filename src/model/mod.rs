//! Resource model.
//!
//! Each manifest entry becomes one or more [`Resource`]s through the static
//! [`registry`]. Resources that live under a mount point reference a
//! [`Backend`] by path; the context owns both.

mod auth;
mod aws;
mod backend;
mod generic;
mod ldap;
mod mount;
mod policy;
pub mod registry;
mod resource;
mod ssh;

pub use auth::{AppId, AppRole, AppRoleSecret, AppUser, Duo, DuoAccess, TokenRole, UserPass, UserPassUser};
pub use aws::{AwsLease, AwsRole, AwsRoot};
pub use backend::{Backend, is_reserved};
pub use generic::{GeneratedKey, Generator, GenericSecret, Latent, SecretSource, random_words};
pub use ldap::{Ldap, LdapGroup, LdapUser};
pub use mount::{AuditLog, Mount, grok_tune};
pub use policy::Policy;
pub use resource::{
    BackendSpec, Phase, Resource, ResourceBase, default_diff, denied, map_val, read_path,
    sync_resource, unwrap_data,
};
pub use ssh::SshRole;
