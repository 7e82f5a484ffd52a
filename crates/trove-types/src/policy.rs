//! Static parent-policy table consulted by the trust validator.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// How an entity type may attach to the chain of trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentPolicy<'a> {
    /// No policy was registered for the type.
    Undefined,
    /// The type lives at the top of the tree and must not have a parent.
    ParentFree,
    /// The type must have a parent of one of these types.
    RequiresParent(&'a BTreeSet<String>),
}

/// Read-only mapping from entity types to their allowed parents.
///
/// Built once at startup with the builder methods and shared by every
/// partition chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParentPolicyTable {
    allowed_parents: BTreeMap<String, BTreeSet<String>>,
    parent_free: BTreeSet<String>,
    claimable: BTreeSet<String>,
    implicit_authority: BTreeMap<String, String>,
    dynamic_implicit_authority: BTreeSet<String>,
}

impl ParentPolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `child` entities to attach to `parent` entities.
    pub fn allow_parent(mut self, child: impl Into<String>, parent: impl Into<String>) -> Self {
        self.allowed_parents
            .entry(child.into())
            .or_default()
            .insert(parent.into());
        self
    }

    /// Mark a type as top-level (no parent).
    pub fn parent_free(mut self, ty: impl Into<String>) -> Self {
        self.parent_free.insert(ty.into());
        self
    }

    /// Mark a top-level type as claimable by anyone holding the public-write key.
    pub fn claimable(mut self, ty: impl Into<String>) -> Self {
        let ty = ty.into();
        self.parent_free.insert(ty.clone());
        self.claimable.insert(ty);
        self
    }

    /// Root a top-level type under a fixed implicit authority domain.
    pub fn implicit_authority(mut self, ty: impl Into<String>, domain: impl Into<String>) -> Self {
        let ty = ty.into();
        self.parent_free.insert(ty.clone());
        self.implicit_authority.insert(ty, domain.into());
        self
    }

    /// Root a top-level type under the domain named in each record's header.
    pub fn dynamic_implicit_authority(mut self, ty: impl Into<String>) -> Self {
        let ty = ty.into();
        self.parent_free.insert(ty.clone());
        self.dynamic_implicit_authority.insert(ty);
        self
    }

    /// Policy registered for `ty`.
    pub fn policy(&self, ty: &str) -> ParentPolicy<'_> {
        if let Some(parents) = self.allowed_parents.get(ty) {
            ParentPolicy::RequiresParent(parents)
        } else if self.parent_free.contains(ty) {
            ParentPolicy::ParentFree
        } else {
            ParentPolicy::Undefined
        }
    }

    /// Whether `child` may attach to a parent of type `parent`.
    pub fn allows_parent(&self, child: &str, parent: &str) -> bool {
        self.allowed_parents
            .get(child)
            .is_some_and(|parents| parents.contains(parent))
    }

    pub fn is_parent_free(&self, ty: &str) -> bool {
        self.parent_free.contains(ty)
    }

    pub fn is_claimable(&self, ty: &str) -> bool {
        self.parent_free.contains(ty) && self.claimable.contains(ty)
    }

    /// Fixed implicit authority domain for `ty`, if any.
    pub fn static_authority(&self, ty: &str) -> Option<&str> {
        self.implicit_authority.get(ty).map(String::as_str)
    }

    pub fn is_dynamic_authority(&self, ty: &str) -> bool {
        self.dynamic_implicit_authority.contains(ty)
    }
}
