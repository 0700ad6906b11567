//! Local replica of named group membership.
//!
//! Group create/join are idempotent broadcasts with no delivery guarantee
//! (spec §9): a node that misses a broadcast is silently out of sync, and
//! this registry makes no attempt to reconcile that — it only ever reflects
//! frames this node has actually observed.

use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;

use crate::types::{GroupName, PeerId};

/// Whether a group-create/join call acted on a new state or one already observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    /// This node had not seen the group/membership before now.
    New,
    /// Already known; the call was a no-op.
    AlreadyKnown,
}

#[derive(Default)]
struct GroupState {
    members: HashSet<PeerId>,
}

/// Tracks which groups this node knows about and who belongs to each.
pub struct GroupRegistry {
    groups: Mutex<HashMap<GroupName, GroupState>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self {
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a group, created by `creator`. Idempotent: creating an
    /// already-known group again is a no-op and reports `AlreadyKnown`.
    pub async fn create(&self, name: GroupName, creator: PeerId) -> Membership {
        let mut groups = self.groups.lock().await;
        if groups.contains_key(&name) {
            return Membership::AlreadyKnown;
        }
        let mut state = GroupState::default();
        state.members.insert(creator);
        groups.insert(name, state);
        Membership::New
    }

    /// Adds `peer` to `name`'s membership. The group must already be known
    /// locally (a join for an unknown group is dropped by the caller before
    /// this is reached; see the join handler).
    pub async fn join(&self, name: &GroupName, peer: PeerId) -> Option<Membership> {
        let mut groups = self.groups.lock().await;
        let state = groups.get_mut(name)?;
        if state.members.insert(peer) {
            Some(Membership::New)
        } else {
            Some(Membership::AlreadyKnown)
        }
    }

    pub async fn is_known(&self, name: &GroupName) -> bool {
        self.groups.lock().await.contains_key(name)
    }

    pub async fn is_member(&self, name: &GroupName, peer: PeerId) -> bool {
        self.groups
            .lock()
            .await
            .get(name)
            .is_some_and(|state| state.members.contains(&peer))
    }

    pub async fn members(&self, name: &GroupName) -> Vec<PeerId> {
        self.groups
            .lock()
            .await
            .get(name)
            .map(|state| state.members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn list(&self) -> Vec<GroupName> {
        self.groups.lock().await.keys().cloned().collect()
    }
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::new()
    }
}
