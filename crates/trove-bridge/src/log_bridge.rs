//! Log-backed bridge: append to the store, deliver on a worker thread.

use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, trace, warn};
use trove_chain::DataPartitionChain;
use trove_types::{EntityId, Message, MessageData, MessageMeta, MessageSync, PartitionKey};

use crate::error::BridgeError;
use crate::store::{LogRecord, LogStore};
use crate::traits::{PartitionBridge, SyncToken};

type Result<T> = std::result::Result<T, BridgeError>;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Default)]
struct DeliveryState {
    /// The stored log has been replayed.
    loaded: bool,
    /// Highest offset handed to the chain.
    delivered: Option<u64>,
    /// Sync tickets delivered and not yet claimed by `finish_sync`.
    tickets: HashSet<u64>,
    /// Tickets whose waiter gave up before delivery; dropped when they arrive.
    abandoned: HashSet<u64>,
    /// The worker has exited.
    stopped: bool,
}

/// Progress of the delivery worker, observed by waiting callers.
struct DeliverySignal {
    state: Mutex<DeliveryState>,
    condvar: Condvar,
}

impl DeliverySignal {
    fn new() -> Self {
        Self {
            state: Mutex::new(DeliveryState::default()),
            condvar: Condvar::new(),
        }
    }

    fn update(&self, f: impl FnOnce(&mut DeliveryState)) {
        let mut guard = self.state.lock().expect("delivery signal mutex poisoned");
        f(&mut *guard);
        self.condvar.notify_all();
    }

    /// Wait until `ready` holds, the worker stops or `timeout` elapses.
    fn wait_until(&self, timeout: Duration, mut ready: impl FnMut(&mut DeliveryState) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.state.lock().expect("delivery signal mutex poisoned");

        loop {
            if ready(&mut *guard) {
                return true;
            }
            if guard.stopped {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next_guard, _) = self
                .condvar
                .wait_timeout(guard, deadline - now)
                .expect("delivery signal mutex poisoned");
            guard = next_guard;
        }
    }
}

/// [`PartitionBridge`] over a [`LogStore`].
///
/// On open, the stored log is replayed into the chain by a dedicated worker
/// thread; afterwards every [`send`](PartitionBridge::send) appends to the
/// store and queues the record for the same worker, so the chain sees the
/// log strictly in offset order.
pub struct LogBridge {
    partition: PartitionKey,
    store: Arc<LogStore>,
    /// Held across append + enqueue so the queue follows offset order.
    sender: Mutex<Option<Sender<LogRecord>>>,
    signal: Arc<DeliverySignal>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LogBridge {
    /// Open the bridge of `partition` and start replaying its log into `chain`.
    pub fn open(
        partition: PartitionKey,
        store: Arc<LogStore>,
        chain: Arc<DataPartitionChain>,
    ) -> Result<Self> {
        let backlog = store.scan(&partition, 0)?;
        let (tx, rx) = mpsc::channel();
        let signal = Arc::new(DeliverySignal::new());

        let worker = {
            let partition = partition.clone();
            let signal = Arc::clone(&signal);
            thread::Builder::new()
                .name(format!("trove-bridge-{partition}"))
                .spawn(move || run_delivery(partition, chain, backlog, rx, signal))
                .map_err(|e| BridgeError::Storage(format!("failed to spawn delivery worker: {e}")))?
        };

        Ok(Self {
            partition,
            store,
            sender: Mutex::new(Some(tx)),
            signal,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn store(&self) -> &Arc<LogStore> {
        &self.store
    }

    /// Highest offset delivered to the chain so far.
    pub fn delivered(&self) -> Option<u64> {
        self.signal
            .state
            .lock()
            .expect("delivery signal mutex poisoned")
            .delivered
    }

    /// Sync tickets delivered or awaited but not yet settled.
    pub(crate) fn pending_sync_tickets(&self) -> usize {
        let state = self.signal.state.lock().expect("delivery signal mutex poisoned");
        state.tickets.len() + state.abandoned.len()
    }

    /// Block until every record up to `offset` has been delivered.
    pub fn wait_for_offset(&self, offset: u64, timeout: Duration) -> bool {
        self.signal
            .wait_until(timeout, |state| state.delivered.is_some_and(|d| d >= offset))
    }

    /// Stop accepting messages, drain the queue and join the worker.
    pub fn close(&self) {
        let sender = self.sender.lock().expect("bridge sender lock poisoned").take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let worker = self.worker.lock().expect("bridge worker lock poisoned").take();
        if let Some(handle) = worker
            && handle.join().is_err()
        {
            warn!(partition = %self.partition, "delivery worker panicked");
        }
        debug!(partition = %self.partition, "bridge closed");
    }
}

impl Drop for LogBridge {
    fn drop(&mut self) {
        self.close();
    }
}

impl PartitionBridge for LogBridge {
    fn partition(&self) -> &PartitionKey {
        &self.partition
    }

    fn send(&self, msg: &Message) -> Result<u64> {
        let payload = msg.to_bytes()?;
        let key = msg.log_key();

        let sender = self.sender.lock().expect("bridge sender lock poisoned");
        let Some(tx) = sender.as_ref() else {
            return Err(BridgeError::Closed(self.partition.clone()));
        };

        let timestamp_ms = now_ms();
        let offset = self.store.append(&self.partition, &key, timestamp_ms, payload.clone())?;
        trace!(partition = %self.partition, offset, kind = msg.kind_name(), %key, "appended");

        tx.send(LogRecord {
            offset,
            key,
            timestamp_ms,
            payload,
        })
        .map_err(|_| BridgeError::Closed(self.partition.clone()))?;
        Ok(offset)
    }

    fn wait_till_loaded(&self, timeout: Duration) -> bool {
        self.signal.wait_until(timeout, |state| state.loaded)
    }

    fn get_version(&self, id: &EntityId, offset: u64) -> Result<Option<MessageData>> {
        let Some(record) = self.store.read(&self.partition, offset)? else {
            return Ok(None);
        };
        match Message::from_bytes(&record.payload)? {
            Message::Data(data) if data.header.id == *id => Ok(Some(data)),
            _ => Ok(None),
        }
    }

    fn start_sync(&self) -> Result<SyncToken> {
        let ticket = rand::random::<u64>();
        let offset = self.send(&Message::Sync(MessageSync { ticket }))?;
        Ok(SyncToken { ticket, offset })
    }

    fn finish_sync(&self, token: SyncToken, timeout: Duration) -> bool {
        let mut reached = self
            .signal
            .wait_until(timeout, |state| state.tickets.remove(&token.ticket));
        if !reached {
            self.signal.update(|state| {
                if state.tickets.remove(&token.ticket) {
                    reached = true;
                } else if !state.stopped && state.delivered.is_none_or(|d| d < token.offset) {
                    state.abandoned.insert(token.ticket);
                }
            });
        }
        if !reached {
            warn!(partition = %self.partition, ticket = token.ticket, offset = token.offset, "sync barrier not reached");
        }
        reached
    }
}

// -----------------------------------------------------------------------
// Delivery worker
// -----------------------------------------------------------------------

fn run_delivery(
    partition: PartitionKey,
    chain: Arc<DataPartitionChain>,
    backlog: Vec<LogRecord>,
    rx: Receiver<LogRecord>,
    signal: Arc<DeliverySignal>,
) {
    let replayed = backlog.len();
    // Barriers of earlier runs have no waiter.
    for record in backlog {
        deliver(&partition, &chain, record, &signal, false);
    }
    signal.update(|state| state.loaded = true);
    info!(%partition, replayed, "partition loaded");

    while let Ok(record) = rx.recv() {
        deliver(&partition, &chain, record, &signal, true);
    }

    signal.update(|state| state.stopped = true);
    debug!(%partition, "delivery worker stopped");
}

fn deliver(
    partition: &PartitionKey,
    chain: &DataPartitionChain,
    record: LogRecord,
    signal: &DeliverySignal,
    track_sync: bool,
) {
    let offset = record.offset;
    let meta = MessageMeta::new(offset, record.key, record.timestamp_ms);

    let ticket = match Message::from_bytes(&record.payload) {
        Ok(Message::Sync(sync)) => Some(sync.ticket).filter(|_| track_sync),
        Ok(msg) => {
            chain.rcv_message(msg, meta);
            None
        }
        Err(e) => {
            warn!(%partition, offset, error = %e, "dropping undecodable record");
            None
        }
    };

    signal.update(|state| {
        state.delivered = Some(offset);
        if let Some(ticket) = ticket
            && !state.abandoned.remove(&ticket)
        {
            state.tickets.insert(ticket);
        }
    });
}
