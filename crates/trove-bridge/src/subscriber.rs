//! Lazily opened partitions shared by every repository of a node.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info};
use trove_chain::{ChainContext, DataPartitionChain};
use trove_types::PartitionKey;

use crate::error::BridgeError;
use crate::log_bridge::LogBridge;
use crate::store::LogStore;
use crate::traits::PartitionBridge;

type Result<T> = std::result::Result<T, BridgeError>;

/// Where partition logs live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Fjall(PathBuf),
}

/// A partition's chain of trust and the bridge feeding it.
pub struct DataPartition {
    chain: Arc<DataPartitionChain>,
    bridge: Arc<dyn PartitionBridge>,
}

impl DataPartition {
    pub fn new(chain: Arc<DataPartitionChain>, bridge: Arc<dyn PartitionBridge>) -> Self {
        Self { chain, bridge }
    }

    pub fn key(&self) -> &PartitionKey {
        self.chain.partition_key()
    }

    pub fn chain(&self) -> &Arc<DataPartitionChain> {
        &self.chain
    }

    pub fn bridge(&self) -> &Arc<dyn PartitionBridge> {
        &self.bridge
    }
}

/// Opens one [`DataPartition`] per partition key on first use.
pub struct DataSubscriber {
    ctx: ChainContext,
    store: Arc<LogStore>,
    load_timeout: Duration,
    partitions: DashMap<PartitionKey, Arc<DataPartition>>,
    /// Serializes opening so a partition is replayed once.
    open_lock: Mutex<()>,
}

impl DataSubscriber {
    pub fn open(backend: &StorageBackend, ctx: ChainContext) -> Result<Self> {
        let store = match backend {
            StorageBackend::Memory => LogStore::in_memory(),
            StorageBackend::Fjall(path) => LogStore::open(path)?,
        };
        info!(backend = ?backend, "data subscriber opened");
        Ok(Self::with_store(Arc::new(store), ctx))
    }

    pub fn with_store(store: Arc<LogStore>, ctx: ChainContext) -> Self {
        Self {
            ctx,
            store,
            load_timeout: Duration::from_secs(30),
            partitions: DashMap::new(),
            open_lock: Mutex::new(()),
        }
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    pub fn context(&self) -> &ChainContext {
        &self.ctx
    }

    pub fn store(&self) -> &Arc<LogStore> {
        &self.store
    }

    /// The partition of `key`, opening and replaying it if needed.
    pub fn partition(&self, key: &PartitionKey) -> Result<Arc<DataPartition>> {
        if let Some(partition) = self.partitions.get(key) {
            return Ok(Arc::clone(partition.value()));
        }

        let _guard = self.open_lock.lock().expect("subscriber open lock poisoned");
        if let Some(partition) = self.partitions.get(key) {
            return Ok(Arc::clone(partition.value()));
        }

        let chain = Arc::new(DataPartitionChain::new(key.clone(), self.ctx.clone()));
        let bridge = LogBridge::open(key.clone(), Arc::clone(&self.store), Arc::clone(&chain))?;
        if !bridge.wait_till_loaded(self.load_timeout) {
            return Err(BridgeError::LoadTimeout {
                partition: key.clone(),
                timeout_ms: self.load_timeout.as_millis() as u64,
            });
        }
        debug!(partition = %key, delivered = ?bridge.delivered(), "partition opened");

        let partition = Arc::new(DataPartition::new(chain, Arc::new(bridge)));
        self.partitions.insert(key.clone(), Arc::clone(&partition));
        Ok(partition)
    }

    /// Serve a partition through a caller-provided bridge, replacing any
    /// partition already opened for its key.
    pub fn attach(&self, partition: DataPartition) -> Arc<DataPartition> {
        let _guard = self.open_lock.lock().expect("subscriber open lock poisoned");
        let partition = Arc::new(partition);
        debug!(partition = %partition.key(), "partition attached");
        self.partitions.insert(partition.key().clone(), Arc::clone(&partition));
        partition
    }

    /// Already opened partition of `key`.
    pub fn get(&self, key: &PartitionKey) -> Option<Arc<DataPartition>> {
        self.partitions.get(key).map(|p| Arc::clone(p.value()))
    }

    /// Every opened partition.
    pub fn partitions(&self) -> Vec<Arc<DataPartition>> {
        self.partitions.iter().map(|p| Arc::clone(p.value())).collect()
    }

    /// Every partition with a stored log, opened or not.
    pub fn known_partitions(&self) -> Result<Vec<PartitionKey>> {
        self.store.partitions()
    }
}
