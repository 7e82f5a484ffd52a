//! Chain of trust for trove partitions.
//!
//! A partition's history is a set of per-entity version graphs
//! ([`DataContainer`] of [`DataGraphNode`]s) held by a
//! [`DataPartitionChain`]. Every data message must pass the staged
//! [`TrustValidator`] before it becomes part of a container: the parent
//! policy, the entity's lineage, the signer's write role and finally the
//! digest and signature are checked in that order.

mod authority;
mod cache;
mod chain;
mod container;
mod error;
mod node;
mod validator;

#[cfg(test)]
mod tests;

pub use authority::{ImplicitAuthority, StaticAuthorities};
pub use cache::reader_set_hash;
pub use chain::{ChainConfig, ChainContext, DataPartitionChain};
pub use container::{DataContainer, PayloadReader};
pub use error::ChainError;
pub use node::DataGraphNode;
pub use validator::{
    FailureCallback, RejectReason, TrustSource, TrustValidator, TrustValidatorBuilder,
};
