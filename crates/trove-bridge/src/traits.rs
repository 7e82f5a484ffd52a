//! The port through which repositories reach a partition log.

use std::time::Duration;

use trove_types::{EntityId, Message, MessageData, PartitionKey};

use crate::error::BridgeError;

/// Handle on a sync barrier written by [`PartitionBridge::start_sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncToken {
    pub ticket: u64,
    /// Offset at which the barrier was appended.
    pub offset: u64,
}

/// Ordered, durable delivery of messages for one partition.
///
/// Sent messages reach the partition's chain in offset order, at least once.
pub trait PartitionBridge: Send + Sync {
    fn partition(&self) -> &PartitionKey;

    /// Append a message to the log. Returns its offset.
    fn send(&self, msg: &Message) -> Result<u64, BridgeError>;

    /// Block until the stored log has been replayed into the chain.
    fn wait_till_loaded(&self, timeout: Duration) -> bool;

    /// The data message of `id` stored at `offset`, if that is what the log holds there.
    fn get_version(&self, id: &EntityId, offset: u64) -> Result<Option<MessageData>, BridgeError>;

    /// Append a sync barrier.
    fn start_sync(&self) -> Result<SyncToken, BridgeError>;

    /// Block until the barrier of `token` has been delivered, or `timeout` elapses.
    fn finish_sync(&self, token: SyncToken, timeout: Duration) -> bool;

    /// Write a barrier and wait for it.
    fn sync(&self, timeout: Duration) -> Result<bool, BridgeError> {
        let token = self.start_sync()?;
        Ok(self.finish_sync(token, timeout))
    }
}
