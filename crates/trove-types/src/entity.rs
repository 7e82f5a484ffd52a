//! Decoded entity model.
//!
//! An [`Entity`] is what callers read and write: the header fields that
//! matter to them plus a JSON body. Typed records go in and out of the body
//! through the [`Record`] trait.

use std::collections::BTreeSet;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::TypesError;
use crate::{EntityId, KeyHash, PartitionKey, VersionId};

type Result<T> = std::result::Result<T, TypesError>;

/// A strongly typed payload stored in an entity body.
pub trait Record: Serialize + DeserializeOwned {
    /// Logical type name written to `payload_class`.
    const TYPE_NAME: &'static str;
}

/// Permission roles of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roles {
    pub inherit_read: bool,
    pub inherit_write: bool,
    pub allow_read: BTreeSet<KeyHash>,
    pub allow_write: BTreeSet<KeyHash>,
}

impl Default for Roles {
    fn default() -> Self {
        Self {
            inherit_read: true,
            inherit_write: true,
            allow_read: BTreeSet::new(),
            allow_write: BTreeSet::new(),
        }
    }
}

/// A decoded entity value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub partition: PartitionKey,
    pub id: EntityId,
    pub type_name: String,
    pub parent_id: Option<EntityId>,
    /// Version this value was read at (`None` until first saved).
    pub version: Option<VersionId>,
    /// Version the next write will supersede.
    pub previous_version: Option<VersionId>,
    /// Leaf versions this value reconciles (set by a merge).
    pub merges: BTreeSet<VersionId>,
    pub roles: Roles,
    pub implicit_authority: BTreeSet<String>,
    pub body: serde_json::Value,
}

impl Entity {
    /// Create a new, unsaved entity from a typed record.
    pub fn new<R: Record>(partition: PartitionKey, record: &R) -> Result<Self> {
        Ok(Self {
            partition,
            id: EntityId::random(),
            type_name: R::TYPE_NAME.to_string(),
            parent_id: None,
            version: None,
            previous_version: None,
            merges: BTreeSet::new(),
            roles: Roles::default(),
            implicit_authority: BTreeSet::new(),
            body: serde_json::to_value(record)?,
        })
    }

    /// Attach the entity under `parent` (same partition).
    pub fn with_parent(mut self, parent: &Entity) -> Self {
        self.parent_id = Some(parent.id);
        self
    }

    /// Replace the roles.
    pub fn with_roles(mut self, roles: Roles) -> Self {
        self.roles = roles;
        self
    }

    /// Decode the body as `R`, checking the stored type name.
    pub fn get<R: Record>(&self) -> Result<R> {
        if self.type_name != R::TYPE_NAME {
            return Err(TypesError::TypeMismatch {
                expected: R::TYPE_NAME.to_string(),
                found: self.type_name.clone(),
            });
        }
        Ok(serde_json::from_value(self.body.clone())?)
    }

    /// Replace the body with `record`.
    pub fn set<R: Record>(&mut self, record: &R) -> Result<()> {
        if self.type_name != R::TYPE_NAME {
            return Err(TypesError::TypeMismatch {
                expected: self.type_name.clone(),
                found: R::TYPE_NAME.to_string(),
            });
        }
        self.body = serde_json::to_value(record)?;
        Ok(())
    }

    /// Whether the entity has been written at least once.
    pub fn is_saved(&self) -> bool {
        self.version.is_some()
    }
}
