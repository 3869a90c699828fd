//! Attribute slot registry.
//!
//! Caches, per display name, the subtree node and the node of each of its
//! seven slots so that steady-state dispatch needs no browsing. Entries are
//! added as nodes are created or found and are never removed: a node handle
//! stays valid for the life of the process.
//!
//! The registry also records which identity first claimed a display name.
//! A second identity deriving the same name is merged into the existing
//! subtree and reported as a collision once. Identities are recorded only
//! once their subtree resolved, so an identity whose first sighting failed
//! is still judged against whoever created the subtree later.

use std::collections::{HashMap, HashSet};

use crate::domain::{DisplayName, Field, SensorIdentity, FIELD_COUNT};
use crate::publisher::NodeId;

#[derive(Debug, Clone)]
pub struct SubtreeEntry {
    pub node: NodeId,
    /// first identity observed with this display name
    pub owner: SensorIdentity,
    slots: [Option<NodeId>; FIELD_COUNT],
}

impl SubtreeEntry {
    fn new(node: NodeId, owner: SensorIdentity) -> Self {
        Self {
            node,
            owner,
            slots: [None; FIELD_COUNT],
        }
    }

    pub fn slot(&self, field: Field) -> Option<NodeId> {
        self.slots[field as usize]
    }

    /// true once every field has a known slot
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    pub fn missing_fields(&self) -> impl Iterator<Item = Field> + '_ {
        Field::ALL
            .iter()
            .copied()
            .filter(|&field| self.slot(field).is_none())
    }
}

/// outcome of recording an identity against its display name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// identity seen before
    Known,
    /// first sighting, name not claimed by anyone else
    New,
    /// first sighting, but the name already belongs to `owner`
    Collision { owner: SensorIdentity },
}

#[derive(Debug, Default)]
pub struct SlotRegistry {
    subtrees: HashMap<DisplayName, SubtreeEntry>,
    identities: HashSet<SensorIdentity>,
}

impl SlotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// classify `identity` against the current owner of `name`
    pub fn claim(&self, identity: &SensorIdentity, name: &DisplayName) -> Claim {
        if self.identities.contains(identity) {
            return Claim::Known;
        }
        match self.subtrees.get(name) {
            Some(entry) if entry.owner != *identity => Claim::Collision {
                owner: entry.owner.clone(),
            },
            _ => Claim::New,
        }
    }

    pub fn subtree(&self, name: &DisplayName) -> Option<&SubtreeEntry> {
        self.subtrees.get(name)
    }

    /// remember `identity` once its subtree is resolved
    pub fn record(&mut self, identity: &SensorIdentity) {
        if !self.identities.contains(identity) {
            self.identities.insert(identity.clone());
        }
    }

    pub fn insert_subtree(&mut self, name: DisplayName, node: NodeId, owner: SensorIdentity) {
        self.subtrees
            .entry(name)
            .or_insert_with(|| SubtreeEntry::new(node, owner));
    }

    pub fn slot(&self, name: &DisplayName, field: Field) -> Option<NodeId> {
        self.subtrees.get(name).and_then(|entry| entry.slot(field))
    }

    /// cache a slot; ignored when the subtree itself is unknown
    pub fn insert_slot(&mut self, name: &DisplayName, field: Field, node: NodeId) {
        if let Some(entry) = self.subtrees.get_mut(name) {
            entry.slots[field as usize] = Some(node);
        }
    }

    /// number of subtrees known
    pub fn len(&self) -> usize {
        self.subtrees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subtrees.is_empty()
    }

    /// number of distinct identities observed
    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }
}
