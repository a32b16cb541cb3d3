//! Coordination service capability
//!
//! The registry needs two things from its coordination service: persistent
//! nodes with version-guarded conditional writes (the schema id counter), and
//! ephemeral group membership with session semantics (master election).
//! [`Coordinator`] captures exactly that surface; [`MemoryCoordinator`] is
//! the in-process implementation used by tests and the single-node dev mode.
//!
//! Membership is sequenced: each member of a group gets a monotonically
//! increasing sequence number at join time. Election uses the sequence as the
//! deterministic total order over candidates.

use crate::error::{RegistryError, RegistryResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

/// A member of an ephemeral group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    /// Join order within the group; unique and monotonic per group.
    pub sequence: u64,
    /// Opaque payload registered by the member (the node identity).
    pub data: String,
}

/// Handle to an ephemeral group membership. Dropping the handle departs the
/// group, modelling coordinator session expiry.
pub struct Membership {
    sequence: u64,
    depart: Option<Box<dyn FnOnce() + Send>>,
}

impl Membership {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Leave the group explicitly.
    pub fn resign(mut self) {
        if let Some(depart) = self.depart.take() {
            depart();
        }
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        if let Some(depart) = self.depart.take() {
            depart();
        }
    }
}

impl std::fmt::Debug for Membership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Membership")
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Coordination service capability
#[async_trait]
pub trait Coordinator: Send + Sync + std::fmt::Debug {
    /// Create a persistent node if it does not already exist.
    async fn ensure(&self, path: &str) -> RegistryResult<()>;

    /// Create a persistent node with the given data; fails if it exists.
    async fn create(&self, path: &str, data: &str) -> RegistryResult<()>;

    /// Read a persistent node: `(data, version)`, or `None` if absent.
    async fn read(&self, path: &str) -> RegistryResult<Option<(String, i32)>>;

    /// Version-guarded write. Returns `true` on success, `false` when the
    /// node's version no longer matches `expected_version`.
    async fn compare_and_set(
        &self,
        path: &str,
        data: &str,
        expected_version: i32,
    ) -> RegistryResult<bool>;

    /// Join an ephemeral group. The membership lasts until the handle is
    /// resigned or dropped.
    async fn join(&self, group: &str, data: &str) -> RegistryResult<Membership>;

    /// Watch a group's membership. The receiver holds the current member
    /// list and changes on every join/departure.
    async fn watch_members(&self, group: &str) -> RegistryResult<watch::Receiver<Vec<GroupMember>>>;
}

#[derive(Debug, Default)]
struct CoordinatorState {
    /// Persistent nodes: path -> (data, version)
    nodes: Mutex<HashMap<String, (String, i32)>>,
    /// Ephemeral groups
    groups: Mutex<HashMap<String, GroupState>>,
}

#[derive(Debug)]
struct GroupState {
    next_sequence: u64,
    members: Vec<GroupMember>,
    tx: watch::Sender<Vec<GroupMember>>,
}

impl GroupState {
    fn new() -> Self {
        let (tx, _) = watch::channel(Vec::new());
        Self {
            next_sequence: 0,
            members: Vec::new(),
            tx,
        }
    }

    fn publish(&self) {
        // send_replace always stores the value, even without receivers;
        // watch::Sender::send is a no-op with zero receivers, which would
        // drop the update for subscribers that arrive later.
        self.tx.send_replace(self.members.clone());
    }
}

/// In-process coordinator
#[derive(Debug, Default, Clone)]
pub struct MemoryCoordinator {
    state: Arc<CoordinatorState>,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Coordinator for MemoryCoordinator {
    async fn ensure(&self, path: &str) -> RegistryResult<()> {
        let mut nodes = self.state.nodes.lock();
        nodes
            .entry(path.to_string())
            .or_insert_with(|| (String::new(), 0));
        Ok(())
    }

    async fn create(&self, path: &str, data: &str) -> RegistryResult<()> {
        let mut nodes = self.state.nodes.lock();
        if nodes.contains_key(path) {
            return Err(RegistryError::Store(format!(
                "coordinator node already exists: {}",
                path
            )));
        }
        nodes.insert(path.to_string(), (data.to_string(), 0));
        Ok(())
    }

    async fn read(&self, path: &str) -> RegistryResult<Option<(String, i32)>> {
        Ok(self.state.nodes.lock().get(path).cloned())
    }

    async fn compare_and_set(
        &self,
        path: &str,
        data: &str,
        expected_version: i32,
    ) -> RegistryResult<bool> {
        let mut nodes = self.state.nodes.lock();
        match nodes.get_mut(path) {
            Some((current, version)) if *version == expected_version => {
                *current = data.to_string();
                *version += 1;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RegistryError::Store(format!(
                "coordinator node does not exist: {}",
                path
            ))),
        }
    }

    async fn join(&self, group: &str, data: &str) -> RegistryResult<Membership> {
        let sequence = {
            let mut groups = self.state.groups.lock();
            let state = groups
                .entry(group.to_string())
                .or_insert_with(GroupState::new);
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.members.push(GroupMember {
                sequence,
                data: data.to_string(),
            });
            state.publish();
            sequence
        };

        let coordinator = Arc::clone(&self.state);
        let group = group.to_string();
        let depart = Box::new(move || {
            let mut groups = coordinator.groups.lock();
            if let Some(state) = groups.get_mut(&group) {
                state.members.retain(|m| m.sequence != sequence);
                state.publish();
            }
        });

        Ok(Membership {
            sequence,
            depart: Some(depart),
        })
    }

    async fn watch_members(
        &self,
        group: &str,
    ) -> RegistryResult<watch::Receiver<Vec<GroupMember>>> {
        let mut groups = self.state.groups.lock();
        let state = groups
            .entry(group.to_string())
            .or_insert_with(GroupState::new);
        Ok(state.tx.subscribe())
    }
}
