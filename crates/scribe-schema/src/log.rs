//! Log client capability
//!
//! The registry's authoritative state lives in a dedicated, single-partition,
//! infinite-retention topic of an external log system. [`LogClient`] is the
//! capability the store needs from that system: append a record and learn its
//! offset, and tail the partition from an offset in order, at least once.
//!
//! [`MemoryLog`] is the in-process implementation used by tests and the
//! single-node dev mode.

use crate::error::RegistryResult;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

/// One record of the schema topic
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub offset: u64,
    pub key: Bytes,
    pub value: Bytes,
}

/// Append to and tail the registry's single-partition topic.
///
/// Implementations deliver records in offset order, at least once. Transient
/// failures are retried internally; permanent failures surface as
/// [`RegistryError::Store`].
#[async_trait]
pub trait LogClient: Send + Sync + std::fmt::Debug {
    /// Append a record and return the offset it was assigned.
    async fn append(&self, key: Bytes, value: Bytes) -> RegistryResult<u64>;

    /// Tail the partition starting at `from_offset`. The receiver yields
    /// every record from that offset on, in order, indefinitely.
    async fn subscribe(&self, from_offset: u64) -> RegistryResult<mpsc::Receiver<LogRecord>>;
}

/// In-process single-partition log
#[derive(Debug, Default)]
pub struct MemoryLog {
    records: Arc<RwLock<Vec<(Bytes, Bytes)>>>,
    appended: Arc<Notify>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records appended so far.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Append a raw record without going through the client trait. Used by
    /// tests to seed the topic (including corrupt records).
    pub fn push_raw(&self, key: Bytes, value: Bytes) -> u64 {
        let offset = {
            let mut records = self.records.write();
            records.push((key, value));
            (records.len() - 1) as u64
        };
        self.appended.notify_waiters();
        offset
    }

    /// Read a contiguous snapshot of the log, for assertions in tests.
    pub fn snapshot(&self) -> Vec<(Bytes, Bytes)> {
        self.records.read().clone()
    }
}

#[async_trait]
impl LogClient for MemoryLog {
    async fn append(&self, key: Bytes, value: Bytes) -> RegistryResult<u64> {
        Ok(self.push_raw(key, value))
    }

    async fn subscribe(&self, from_offset: u64) -> RegistryResult<mpsc::Receiver<LogRecord>> {
        let (tx, rx) = mpsc::channel(64);
        let records = Arc::clone(&self.records);
        let appended = Arc::clone(&self.appended);

        tokio::spawn(async move {
            let mut next = from_offset as usize;
            loop {
                // Register for the wakeup before snapshotting, so appends
                // between the snapshot and the await are not missed.
                let notified = appended.notified();
                let batch: Vec<LogRecord> = {
                    let records = records.read();
                    records[next.min(records.len())..]
                        .iter()
                        .enumerate()
                        .map(|(i, (key, value))| LogRecord {
                            offset: (next + i) as u64,
                            key: key.clone(),
                            value: value.clone(),
                        })
                        .collect()
                };
                if batch.is_empty() {
                    notified.await;
                    continue;
                }
                next += batch.len();
                for record in batch {
                    if tx.send(record).await.is_err() {
                        // Subscriber went away.
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_append_assigns_sequential_offsets() {
        let log = MemoryLog::new();
        let o0 = log.append(Bytes::from("k0"), Bytes::from("v0")).await.unwrap();
        let o1 = log.append(Bytes::from("k1"), Bytes::from("v1")).await.unwrap();
        assert_eq!((o0, o1), (0, 1));
    }

    #[tokio::test]
    async fn test_subscribe_replays_then_tails() {
        let log = MemoryLog::new();
        log.append(Bytes::from("k0"), Bytes::from("v0")).await.unwrap();
        log.append(Bytes::from("k1"), Bytes::from("v1")).await.unwrap();

        let mut rx = log.subscribe(0).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().offset, 0);
        assert_eq!(rx.recv().await.unwrap().offset, 1);

        log.append(Bytes::from("k2"), Bytes::from("v2")).await.unwrap();
        let live = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(live.offset, 2);
        assert_eq!(live.value, Bytes::from("v2"));
    }

    #[tokio::test]
    async fn test_subscribe_from_middle() {
        let log = MemoryLog::new();
        for i in 0..5u8 {
            log.append(Bytes::from(vec![i]), Bytes::from(vec![i])).await.unwrap();
        }
        let mut rx = log.subscribe(3).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().offset, 3);
        assert_eq!(rx.recv().await.unwrap().offset, 4);
    }
}
