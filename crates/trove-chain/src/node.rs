//! One accepted version of an entity.

use std::collections::BTreeSet;

use trove_types::{MessageData, MessageDataHeader, MessageMeta, VersionId};

/// Immutable view of an accepted data message and its log position.
///
/// Nodes never point at each other: the version a node was written on top
/// of is resolved through the owning container's lookup table.
#[derive(Debug, Clone)]
pub struct DataGraphNode {
    data: MessageData,
    meta: MessageMeta,
}

impl DataGraphNode {
    pub fn new(data: MessageData, meta: MessageMeta) -> Self {
        Self { data, meta }
    }

    pub fn version(&self) -> VersionId {
        self.data.header.version
    }

    pub fn previous_version(&self) -> Option<VersionId> {
        self.data.header.previous_version
    }

    pub fn merges(&self) -> &BTreeSet<VersionId> {
        &self.data.header.merges
    }

    /// Compacted-log key the message was stored under.
    pub fn key(&self) -> &str {
        &self.meta.key
    }

    pub fn offset(&self) -> u64 {
        self.meta.offset
    }

    pub fn header(&self) -> &MessageDataHeader {
        &self.data.header
    }

    pub fn data(&self) -> &MessageData {
        &self.data
    }

    pub fn meta(&self) -> &MessageMeta {
        &self.meta
    }

    pub fn has_payload(&self) -> bool {
        self.data.has_payload()
    }

    /// Versions this node directly supersedes.
    pub fn supersedes(&self) -> impl Iterator<Item = VersionId> + '_ {
        self.previous_version()
            .into_iter()
            .chain(self.merges().iter().copied())
    }
}
