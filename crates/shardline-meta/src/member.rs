//! Cluster member view.
//!
//! Members are read from the metadata service and never mutated by the
//! client. The only role distinction Shardline cares about is whether a
//! member is an auxiliary (analytics) engine rather than a primary
//! data-serving store.

use std::collections::HashMap;

use crate::proto;

/// Label key that carries a member's storage engine.
pub const ENGINE_LABEL: &str = "engine";

/// Engine label value marking an auxiliary analytics member.
pub const AUXILIARY_ENGINE: &str = "analytics";

/// Liveness state reported by the metadata service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    Up,
    Offline,
    Tombstone,
}

/// A storage cluster member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: u64,
    pub address: String,
    /// Address for member-to-member traffic; empty when not advertised.
    pub peer_address: String,
    pub labels: HashMap<String, String>,
    pub state: MemberState,
    pub version: String,
}

impl Member {
    /// Address to dial: the peer address when advertised, else the
    /// client address.
    pub fn dial_address(&self) -> &str {
        if self.peer_address.is_empty() {
            &self.address
        } else {
            &self.peer_address
        }
    }

    /// Whether this member runs the auxiliary analytics engine.
    pub fn is_auxiliary(&self) -> bool {
        self.labels
            .get(ENGINE_LABEL)
            .is_some_and(|engine| engine == AUXILIARY_ENGINE)
    }

    pub fn is_up(&self) -> bool {
        self.state == MemberState::Up
    }
}

impl From<proto::MemberState> for MemberState {
    fn from(state: proto::MemberState) -> Self {
        match state {
            proto::MemberState::Up => MemberState::Up,
            proto::MemberState::Offline => MemberState::Offline,
            proto::MemberState::Tombstone => MemberState::Tombstone,
        }
    }
}

impl From<MemberState> for proto::MemberState {
    fn from(state: MemberState) -> Self {
        match state {
            MemberState::Up => proto::MemberState::Up,
            MemberState::Offline => proto::MemberState::Offline,
            MemberState::Tombstone => proto::MemberState::Tombstone,
        }
    }
}

impl From<proto::Member> for Member {
    fn from(m: proto::Member) -> Self {
        // Unknown states are never treated as live.
        let state = proto::MemberState::try_from(m.state)
            .map(MemberState::from)
            .unwrap_or(MemberState::Offline);

        Member {
            id: m.id,
            address: m.address,
            peer_address: m.peer_address,
            labels: m.labels.into_iter().map(|l| (l.key, l.value)).collect(),
            state,
            version: m.version,
        }
    }
}

impl From<Member> for proto::Member {
    fn from(m: Member) -> Self {
        proto::Member {
            id: m.id,
            address: m.address,
            peer_address: m.peer_address,
            labels: m
                .labels
                .into_iter()
                .map(|(key, value)| proto::Label { key, value })
                .collect(),
            state: proto::MemberState::from(m.state).into(),
            version: m.version,
        }
    }
}
