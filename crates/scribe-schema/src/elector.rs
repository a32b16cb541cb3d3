//! Master election
//!
//! Every node joins the cluster's election group as an ephemeral member whose
//! payload is its identity. The master is the *eligible* member with the
//! lowest join sequence, a deterministic total order, so every node watching
//! the same membership computes the same winner. The registry is notified
//! only when the winner actually changes.
//!
//! Election never decides anything by itself: it only tells the registry who
//! the master is (`None` when no eligible member exists). Coordination
//! trouble degrades to "no master" rather than terminating the process.

use crate::coordinator::{Coordinator, GroupMember, Membership};
use crate::error::{RegistryError, RegistryResult};
use crate::registry::SchemaRegistry;
use crate::types::{parse_identity, NodeIdentity};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct MasterElector {
    membership: Membership,
    watcher: JoinHandle<()>,
}

impl MasterElector {
    /// Join the election group and start watching membership. The first
    /// election runs inline, so the registry's role is settled when this
    /// returns; promotion failures (e.g. a bootstrap timeout) propagate.
    pub async fn start(
        coordinator: Arc<dyn Coordinator>,
        group: String,
        identity: NodeIdentity,
        registry: Arc<SchemaRegistry>,
    ) -> RegistryResult<Self> {
        let payload = serde_json::to_string(&identity)?;
        let membership = coordinator.join(&group, &payload).await.map_err(|e| {
            RegistryError::Initialization(format!(
                "error joining master election group {}: {}",
                group, e
            ))
        })?;
        let mut members_rx = coordinator.watch_members(&group).await.map_err(|e| {
            RegistryError::Initialization(format!(
                "error watching master election group {}: {}",
                group, e
            ))
        })?;

        let mut current = elect(&members_rx.borrow_and_update());
        registry.set_master(current.clone()).await?;

        let watcher = tokio::spawn(async move {
            while members_rx.changed().await.is_ok() {
                let winner = elect(&members_rx.borrow_and_update());
                if winner == current {
                    continue;
                }
                match registry.set_master(winner.clone()).await {
                    Ok(()) => current = winner,
                    Err(e) => {
                        warn!(error = %e, "failed to apply master change; reverting to no master");
                        let _ = registry.set_master(None).await;
                        current = None;
                    }
                }
            }
            debug!("membership watch closed, elector exiting");
        });

        Ok(Self { membership, watcher })
    }

    /// Leave the election group and stop watching.
    pub fn close(self) {
        let MasterElector {
            membership,
            watcher,
        } = self;
        watcher.abort();
        membership.resign();
    }
}

impl std::fmt::Debug for MasterElector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterElector")
            .field("membership", &self.membership)
            .finish()
    }
}

/// Deterministic winner over the current membership: the eligible member
/// with the lowest sequence, or `None` when no member is eligible.
fn elect(members: &[GroupMember]) -> Option<NodeIdentity> {
    members
        .iter()
        .filter_map(|member| {
            parse_identity(&member.data)
                .ok()
                .map(|identity| (member.sequence, identity))
        })
        .filter(|(_, identity)| identity.master_eligibility)
        .min_by_key(|(sequence, _)| *sequence)
        .map(|(_, identity)| identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(sequence: u64, host: &str, eligible: bool) -> GroupMember {
        GroupMember {
            sequence,
            data: serde_json::to_string(&NodeIdentity::new(host, 8081, eligible)).unwrap(),
        }
    }

    #[test]
    fn test_lowest_sequence_eligible_member_wins() {
        let members = vec![
            member(2, "c", true),
            member(0, "a", true),
            member(1, "b", true),
        ];
        assert_eq!(elect(&members).unwrap().host, "a");
    }

    #[test]
    fn test_ineligible_members_never_win() {
        let members = vec![member(0, "a", false), member(1, "b", true)];
        assert_eq!(elect(&members).unwrap().host, "b");
    }

    #[test]
    fn test_no_eligible_member_means_no_master() {
        let members = vec![member(0, "a", false), member(1, "b", false)];
        assert!(elect(&members).is_none());
        assert!(elect(&[]).is_none());
    }

    #[test]
    fn test_undecodable_payloads_are_ignored() {
        let members = vec![
            GroupMember {
                sequence: 0,
                data: "not an identity".to_string(),
            },
            member(1, "b", true),
        ];
        assert_eq!(elect(&members).unwrap().host, "b");
    }
}
