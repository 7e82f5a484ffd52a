//! Partition logs (Fjall disk or pure in-memory).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use serde::{Deserialize, Serialize};
use trove_types::PartitionKey;

use crate::error::BridgeError;

type Result<T> = std::result::Result<T, BridgeError>;

/// One appended message and its position in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub offset: u64,
    /// Compacted-log key.
    pub key: String,
    pub timestamp_ms: u64,
    /// Encoded [`Message`](trove_types::Message).
    pub payload: Vec<u8>,
}

/// Inner backend: either Fjall-backed (disk) or pure in-memory.
enum Backend {
    Fjall {
        #[allow(dead_code)]
        db: Database,
        /// partition prefix ‖ offset (BE) → serialized LogRecord.
        records: Keyspace,
        /// partition string → next offset (BE).
        heads: Keyspace,
        /// Directory of a temporary store, removed after the database closes.
        #[allow(dead_code)]
        tmp: Option<tempfile::TempDir>,
    },
    Memory(RwLock<BTreeMap<PartitionKey, Vec<LogRecord>>>),
}

/// Append-only logs, one per partition. Offsets start at zero.
pub struct LogStore {
    backend: Backend,
    /// Serializes offset assignment.
    append_lock: Mutex<()>,
}

fn storage_err(e: impl std::fmt::Display) -> BridgeError {
    BridgeError::Storage(e.to_string())
}

/// Length-prefixed partition name, so that no prefix matches another partition.
fn partition_prefix(partition: &PartitionKey) -> Result<Vec<u8>> {
    partition.validate()?;
    let name = partition.to_string();
    let len = u16::try_from(name.len()).map_err(storage_err)?;
    let mut prefix = Vec::with_capacity(name.len() + 2);
    prefix.extend_from_slice(&len.to_be_bytes());
    prefix.extend_from_slice(name.as_bytes());
    Ok(prefix)
}

fn record_key(partition: &PartitionKey, offset: u64) -> Result<Vec<u8>> {
    let mut key = partition_prefix(partition)?;
    key.extend_from_slice(&offset.to_be_bytes());
    Ok(key)
}

fn decode_offset(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| BridgeError::Storage(format!("corrupt log head ({} bytes)", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

impl LogStore {
    /// Open a persistent store at the given path (Fjall backend).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::builder(path).open().map_err(storage_err)?;
        Self::init_fjall(db, None)
    }

    /// Open a temporary store backed by Fjall (cleaned up on drop).
    pub fn open_temporary() -> Result<Self> {
        let tmp = tempfile::tempdir().map_err(storage_err)?;
        let db = Database::builder(tmp.path())
            .temporary(true)
            .open()
            .map_err(storage_err)?;
        Self::init_fjall(db, Some(tmp))
    }

    /// Create a pure in-memory store.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(RwLock::new(BTreeMap::new())),
            append_lock: Mutex::new(()),
        }
    }

    fn init_fjall(db: Database, tmp: Option<tempfile::TempDir>) -> Result<Self> {
        let records = db
            .keyspace("trove_records", KeyspaceCreateOptions::default)
            .map_err(storage_err)?;
        let heads = db
            .keyspace("trove_heads", KeyspaceCreateOptions::default)
            .map_err(storage_err)?;
        Ok(Self {
            backend: Backend::Fjall {
                db,
                records,
                heads,
                tmp,
            },
            append_lock: Mutex::new(()),
        })
    }

    /// Append one record and return the offset it was given.
    pub fn append(
        &self,
        partition: &PartitionKey,
        key: &str,
        timestamp_ms: u64,
        payload: Vec<u8>,
    ) -> Result<u64> {
        partition.validate()?;
        let _guard = self.append_lock.lock().expect("append lock poisoned");

        match &self.backend {
            Backend::Fjall { records, heads, .. } => {
                let offset = self.next_offset(partition)?;
                let record = LogRecord {
                    offset,
                    key: key.to_string(),
                    timestamp_ms,
                    payload,
                };
                let bytes = postcard::to_allocvec(&record)?;
                records
                    .insert(record_key(partition, offset)?.as_slice(), bytes.as_slice())
                    .map_err(storage_err)?;
                heads
                    .insert(partition.to_string().as_bytes(), (offset + 1).to_be_bytes().as_slice())
                    .map_err(storage_err)?;
                Ok(offset)
            }
            Backend::Memory(logs) => {
                let mut logs = logs.write().expect("log store lock poisoned");
                let log = logs.entry(partition.clone()).or_default();
                let offset = log.len() as u64;
                log.push(LogRecord {
                    offset,
                    key: key.to_string(),
                    timestamp_ms,
                    payload,
                });
                Ok(offset)
            }
        }
    }

    /// Offset the next appended record will get (the log length).
    pub fn next_offset(&self, partition: &PartitionKey) -> Result<u64> {
        match &self.backend {
            Backend::Fjall { heads, .. } => match heads
                .get(partition.to_string().as_bytes())
                .map_err(storage_err)?
            {
                Some(bytes) => decode_offset(&bytes),
                None => Ok(0),
            },
            Backend::Memory(logs) => Ok(logs
                .read()
                .expect("log store lock poisoned")
                .get(partition)
                .map_or(0, |log| log.len() as u64)),
        }
    }

    /// Record at `offset`, if any.
    pub fn read(&self, partition: &PartitionKey, offset: u64) -> Result<Option<LogRecord>> {
        match &self.backend {
            Backend::Fjall { records, .. } => {
                let bytes = records
                    .get(record_key(partition, offset)?)
                    .map_err(storage_err)?;
                match bytes {
                    Some(b) => Ok(Some(postcard::from_bytes(&b)?)),
                    None => Ok(None),
                }
            }
            Backend::Memory(logs) => Ok(logs
                .read()
                .expect("log store lock poisoned")
                .get(partition)
                .and_then(|log| log.get(offset as usize))
                .cloned()),
        }
    }

    /// Every record from `from` onwards, in offset order.
    pub fn scan(&self, partition: &PartitionKey, from: u64) -> Result<Vec<LogRecord>> {
        match &self.backend {
            Backend::Fjall { records, .. } => {
                let mut result = Vec::new();

                for guard in records.prefix(partition_prefix(partition)?) {
                    let (_, value) = guard.into_inner().map_err(storage_err)?;
                    let record: LogRecord = postcard::from_bytes(&value)?;
                    if record.offset >= from {
                        result.push(record);
                    }
                }

                Ok(result)
            }
            Backend::Memory(logs) => Ok(logs
                .read()
                .expect("log store lock poisoned")
                .get(partition)
                .map(|log| log.iter().skip(from as usize).cloned().collect())
                .unwrap_or_default()),
        }
    }

    /// Partitions with at least one record.
    pub fn partitions(&self) -> Result<Vec<PartitionKey>> {
        match &self.backend {
            Backend::Fjall { heads, .. } => {
                let mut result: Vec<PartitionKey> = Vec::new();

                for guard in heads.iter() {
                    let k = guard.key().map_err(storage_err)?;
                    let name = std::str::from_utf8(&k).map_err(storage_err)?;
                    result.push(name.parse()?);
                }

                Ok(result)
            }
            Backend::Memory(logs) => Ok(logs
                .read()
                .expect("log store lock poisoned")
                .keys()
                .cloned()
                .collect()),
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, Backend::Fjall { .. })
    }
}
