//! Store discovery, role filtering, and the cluster health sanity check.

use serde::{Deserialize, Serialize};
use shardline_meta::{Member, MetadataClient};
use tracing::{debug, error};

use crate::error::{ConnError, ConnResult};

/// What to do when discovery finds an auxiliary (analytics) member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBehavior {
    /// Refuse to proceed if any auxiliary member is present.
    #[default]
    ErrorOnAuxiliary,
    /// Silently drop auxiliary members.
    SkipAuxiliary,
    /// Keep only auxiliary members.
    AuxiliaryOnly,
}

/// Filter `members` according to `behavior`, preserving order.
pub fn filter_stores(mut members: Vec<Member>, behavior: StoreBehavior) -> ConnResult<Vec<Member>> {
    let mut kept = 0;
    for i in 0..members.len() {
        let auxiliary = members[i].is_auxiliary();
        let keep = match behavior {
            StoreBehavior::ErrorOnAuxiliary if auxiliary => {
                return Err(ConnError::MemberRoleRejected {
                    member_id: members[i].id,
                    address: members[i].address.clone(),
                });
            }
            StoreBehavior::ErrorOnAuxiliary => true,
            StoreBehavior::SkipAuxiliary => !auxiliary,
            StoreBehavior::AuxiliaryOnly => auxiliary,
        };
        if keep {
            members.swap(kept, i);
            kept += 1;
        }
    }
    members.truncate(kept);
    Ok(members)
}

/// Fetch all non-tombstoned members and filter them by role.
pub async fn get_all_stores(
    metadata: &dyn MetadataClient,
    behavior: StoreBehavior,
) -> ConnResult<Vec<Member>> {
    let members = metadata
        .get_all_members(true)
        .await
        .map_err(|e| ConnError::metadata("failed to list cluster members", e))?;
    let total = members.len();

    let stores = filter_stores(members, behavior)?;
    debug!(total, kept = stores.len(), ?behavior, "discovered stores");
    Ok(stores)
}

/// Liveness summary of a member list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterHealth {
    pub total: usize,
    pub live: usize,
}

impl ClusterHealth {
    pub fn of(members: &[Member]) -> Self {
        Self {
            total: members.len(),
            live: members.iter().filter(|m| m.is_up()).count(),
        }
    }

    /// Whether a healthy quorum could plausibly exist, assuming three
    /// replicas. This only catches obviously broken clusters.
    pub fn is_plausible(&self) -> bool {
        !(self.live == 0 && self.total >= 3 && self.total > self.live + 1)
    }
}

/// Fail with `ClusterUnhealthy` when no quorum can plausibly exist.
pub fn check_cluster_health(members: &[Member]) -> ConnResult<ClusterHealth> {
    let health = ClusterHealth::of(members);
    if health.is_plausible() {
        return Ok(health);
    }

    let summary: Vec<String> = members
        .iter()
        .map(|m| format!("{}@{} ({:?})", m.id, m.address, m.state))
        .collect();
    error!(total = health.total, live = health.live, stores = ?summary, "storage cluster not healthy");
    Err(ConnError::ClusterUnhealthy(format!(
        "{} of {} stores up: [{}]",
        health.live,
        health.total,
        summary.join(", ")
    )))
}
