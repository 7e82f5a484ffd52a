//! Reconciliation of concurrent entity versions.
//!
//! When an entity has more than one unresolved leaf, the container pairs
//! every leaf with the version it was written on top of ([`MergePair`]) and
//! hands the list to a [`MergePort`]. [`ThreeWayMerger`] is the default
//! implementation: a field-by-field three-way merge over the value's JSON
//! form, so any `Serialize + DeserializeOwned` type can be reconciled.

mod error;
mod merger;


pub use error::MergeError;
pub use merger::ThreeWayMerger;

/// One leaf to reconcile and the version it was derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct MergePair<T> {
    /// Value the candidate was written on top of (`None` for a first version).
    pub base: Option<T>,
    /// The leaf value (`None` for a deleted leaf).
    pub candidate: Option<T>,
}

impl<T> MergePair<T> {
    pub fn new(base: Option<T>, candidate: Option<T>) -> Self {
        Self { base, candidate }
    }
}

/// Produces one value from a set of concurrent leaves.
pub trait MergePort<T>: Send + Sync {
    /// Fold the pairs, oldest leaf first, into one reconciled value.
    ///
    /// Returns `Ok(None)` when nothing mergeable remains (every candidate
    /// deleted).
    fn merge(&self, pairs: Vec<MergePair<T>>) -> Result<Option<T>, MergeError>;
}
