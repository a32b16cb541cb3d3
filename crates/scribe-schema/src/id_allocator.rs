//! Batch-reserved schema id allocation
//!
//! Ids are handed out from batches reserved against the coordinator. The
//! counter node stores the exclusive upper bound of the most recently
//! reserved batch; reservation is a version-guarded compare-and-set, so two
//! masters racing during a split-brain window can never reserve overlapping
//! batches.
//!
//! The log may contain ids that predate the counter node (or the counter may
//! have gone stale), so every reservation also reconciles against the largest
//! id observed in the log: the reserved batch starts at or above
//! `align(max_id_in_store + 1)`. A newly elected master therefore always
//! issues strictly greater ids than anything already durable.

use crate::coordinator::Coordinator;
use crate::error::{RegistryError, RegistryResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Number of ids reserved per coordinator round-trip.
pub const ID_BATCH_SIZE: i32 = 20;

const RESERVE_RETRY_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Default, Clone, Copy)]
struct Batch {
    /// Next id to hand out.
    next: i32,
    /// Exclusive upper bound of the reserved batch.
    upper: i32,
}

/// Allocator owned by a single master session
#[derive(Debug)]
pub struct IdAllocator {
    coordinator: Arc<dyn Coordinator>,
    counter_path: String,
    batch: Mutex<Batch>,
}

impl IdAllocator {
    pub fn new(coordinator: Arc<dyn Coordinator>, counter_path: String) -> Self {
        Self {
            coordinator,
            counter_path,
            batch: Mutex::new(Batch::default()),
        }
    }

    /// Reserve the first batch of this master session. Called on promotion so
    /// that coordinator trouble fails the promotion instead of the first
    /// registration.
    pub async fn prime(&self, max_id_in_store: i32) -> RegistryResult<()> {
        let lower = self.reserve_batch(max_id_in_store).await?;
        let mut batch = self.batch.lock().await;
        *batch = Batch {
            next: lower,
            upper: lower + ID_BATCH_SIZE,
        };
        Ok(())
    }

    /// Hand out the next id, reserving a fresh batch first whenever the
    /// counter has reached or passed the current batch's upper bound.
    pub async fn next(&self, max_id_in_store: i32) -> RegistryResult<i32> {
        let mut batch = self.batch.lock().await;
        if batch.next >= batch.upper {
            let lower = self.reserve_batch(max_id_in_store).await?;
            *batch = Batch {
                next: lower,
                upper: lower + ID_BATCH_SIZE,
            };
        }
        let id = batch.next;
        batch.next += 1;
        Ok(id)
    }

    /// Reserve the next disjoint batch and return its inclusive lower bound.
    async fn reserve_batch(&self, max_id_in_store: i32) -> RegistryResult<i32> {
        let store_floor = align_up(max_id_in_store + 1);

        if self.coordinator.read(&self.counter_path).await?.is_none() {
            let upper = store_floor + ID_BATCH_SIZE;
            match self
                .coordinator
                .create(&self.counter_path, &upper.to_string())
                .await
            {
                Ok(()) => {
                    info!(
                        path = %self.counter_path,
                        lower = store_floor,
                        upper,
                        "created schema id counter"
                    );
                    return Ok(store_floor);
                }
                // Lost the creation race to another master; take the
                // conditional-update path below.
                Err(_) => {}
            }
        }

        loop {
            let (data, version) = self
                .coordinator
                .read(&self.counter_path)
                .await?
                .ok_or_else(|| {
                    RegistryError::Store(format!(
                        "schema id counter {} disappeared during reservation",
                        self.counter_path
                    ))
                })?;

            let mut committed: i32 = data.trim().parse().map_err(|_| {
                RegistryError::Store(format!(
                    "schema id counter {} holds non-numeric data: {:?}",
                    self.counter_path, data
                ))
            })?;

            if committed % ID_BATCH_SIZE != 0 {
                warn!(
                    counter = committed,
                    batch_size = ID_BATCH_SIZE,
                    "schema id counter is not an integer multiple of the batch size; \
                     coordinator may hold stale counter data"
                );
                committed = align_up(committed);
            }

            let lower = committed.max(store_floor);
            let upper = lower + ID_BATCH_SIZE;

            if self
                .coordinator
                .compare_and_set(&self.counter_path, &upper.to_string(), version)
                .await?
            {
                debug!(lower, upper, "reserved schema id batch");
                return Ok(lower);
            }

            // Another master won the conditional update; re-read and retry
            // until one of us is established as the stale master.
            tokio::time::sleep(RESERVE_RETRY_BACKOFF).await;
        }
    }
}

/// Round `x` up to the next multiple of the batch size.
fn align_up(x: i32) -> i32 {
    ((x + ID_BATCH_SIZE - 1) / ID_BATCH_SIZE) * ID_BATCH_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::MemoryCoordinator;

    const PATH: &str = "/test/schema_id_counter";

    fn allocator(coordinator: &MemoryCoordinator) -> IdAllocator {
        IdAllocator::new(Arc::new(coordinator.clone()), PATH.to_string())
    }

    async fn counter_value(coordinator: &MemoryCoordinator) -> String {
        coordinator.read(PATH).await.unwrap().unwrap().0
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0), 0);
        assert_eq!(align_up(1), 20);
        assert_eq!(align_up(19), 20);
        assert_eq!(align_up(20), 20);
        assert_eq!(align_up(21), 40);
        assert_eq!(align_up(45), 60);
    }

    #[tokio::test]
    async fn test_fresh_cluster_starts_at_zero() {
        let coordinator = MemoryCoordinator::new();
        let allocator = allocator(&coordinator);
        allocator.prime(-1).await.unwrap();

        assert_eq!(allocator.next(-1).await.unwrap(), 0);
        assert_eq!(allocator.next(0).await.unwrap(), 1);
        assert_eq!(counter_value(&coordinator).await, "20");
    }

    #[tokio::test]
    async fn test_batch_exhaustion_reserves_next_batch() {
        let coordinator = MemoryCoordinator::new();
        let allocator = allocator(&coordinator);
        allocator.prime(-1).await.unwrap();

        let mut max_id = -1;
        for expected in 0..ID_BATCH_SIZE {
            let id = allocator.next(max_id).await.unwrap();
            assert_eq!(id, expected);
            max_id = id;
        }
        assert_eq!(counter_value(&coordinator).await, "20");

        // The 21st id crosses the batch boundary.
        assert_eq!(allocator.next(max_id).await.unwrap(), ID_BATCH_SIZE);
        assert_eq!(counter_value(&coordinator).await, "40");
    }

    #[tokio::test]
    async fn test_stale_unaligned_counter_is_rounded_up() {
        let coordinator = MemoryCoordinator::new();
        coordinator.create(PATH, "17").await.unwrap();

        let allocator = allocator(&coordinator);
        allocator.prime(-1).await.unwrap();

        assert_eq!(allocator.next(-1).await.unwrap(), 20);
        assert_eq!(counter_value(&coordinator).await, "40");
    }

    #[tokio::test]
    async fn test_counter_behind_store_is_reconciled() {
        let coordinator = MemoryCoordinator::new();
        coordinator.create(PATH, "20").await.unwrap();

        // The log already holds ids up to 45; the batch must clear them.
        let allocator = allocator(&coordinator);
        allocator.prime(45).await.unwrap();

        assert_eq!(allocator.next(45).await.unwrap(), 60);
        assert_eq!(counter_value(&coordinator).await, "80");
    }

    #[tokio::test]
    async fn test_two_sessions_reserve_disjoint_batches() {
        let coordinator = MemoryCoordinator::new();
        let first = allocator(&coordinator);
        let second = allocator(&coordinator);

        first.prime(-1).await.unwrap();
        second.prime(-1).await.unwrap();

        let a = first.next(-1).await.unwrap();
        let b = second.next(-1).await.unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 20);
        assert_eq!(counter_value(&coordinator).await, "40");
    }
}
