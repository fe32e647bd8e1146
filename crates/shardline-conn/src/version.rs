//! Cluster version compatibility check.
//!
//! Every primary member must run a version satisfying the configured
//! requirement. Auxiliary members follow their own release train and are
//! not checked.

use semver::{Version, VersionReq};
use shardline_meta::Member;
use tracing::{debug, warn};

use crate::error::{ConnError, ConnResult};

/// Parse a member-reported version, tolerating a leading `v`.
pub fn parse_member_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(trimmed).ok()
}

/// Check every primary member against `requirement`.
pub fn check_cluster_version(members: &[Member], requirement: &VersionReq) -> ConnResult<()> {
    for member in members.iter().filter(|m| !m.is_auxiliary()) {
        let Some(version) = parse_member_version(&member.version) else {
            warn!(member_id = member.id, version = %member.version, "unparsable member version");
            return Err(ConnError::ClusterIncompatible(format!(
                "member {} at {} reports unparsable version {:?}",
                member.id, member.address, member.version
            )));
        };

        if !requirement.matches(&version) {
            warn!(member_id = member.id, %version, %requirement, "member version not supported");
            return Err(ConnError::ClusterIncompatible(format!(
                "member {} at {} runs {version}, required {requirement}",
                member.id, member.address
            )));
        }
    }

    debug!(members = members.len(), %requirement, "cluster version check passed");
    Ok(())
}
