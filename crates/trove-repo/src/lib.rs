//! Encrypted, permissioned entity repository.
//!
//! A [`DataRepository`] reads and writes [`Entity`](trove_types::Entity)
//! values on behalf of one caller, identified by its [`Rights`]. Writes
//! are staged in a [`DataTransaction`], checked against the parent policy
//! and the [`EffectivePermissions`] of the entity, then signed, encrypted
//! under a security castle and published through the partition bridge.
//! [`DataMaintenance`] merges entities left with concurrent versions.

mod castle;
mod config;
mod error;
mod maintenance;
mod permissions;
mod repository;
mod rights;
mod serializer;
mod transaction;

#[cfg(test)]
mod tests;

pub use castle::{CastleKey, SecurityCastleManager};
pub use config::RepoConfig;
pub use error::RepoError;
pub use maintenance::{DataMaintenance, MaintenanceHandle, MaintenanceReport, start as start_maintenance};
pub use permissions::{EffectivePermissions, EffectivePermissionsBuilder};
pub use repository::DataRepository;
pub use rights::Rights;
pub use serializer::{DataSerializer, SerializedData, SerializerReader};
pub use transaction::DataTransaction;
