//! Partition log storage and delivery.
//!
//! Every partition is an append-only log held by a [`LogStore`] (fjall on
//! disk, or in memory). A [`LogBridge`] appends messages to that log and
//! feeds them, in offset order, to the partition's
//! [`DataPartitionChain`](trove_chain::DataPartitionChain) on a dedicated
//! delivery thread. The [`DataSubscriber`] opens one bridge and chain per
//! partition on first use.

mod error;
mod log_bridge;
mod store;
mod subscriber;
mod traits;

#[cfg(test)]
mod tests;

pub use error::BridgeError;
pub use log_bridge::LogBridge;
pub use store::{LogRecord, LogStore};
pub use subscriber::{DataPartition, DataSubscriber, StorageBackend};
pub use traits::{PartitionBridge, SyncToken};
