//! ==============================================================================
//! publisher.rs - the publishing-server boundary
//! ==============================================================================
//!
//! purpose:
//!     the synchronizer only ever talks to the served address space through
//!     this trait. address_space.rs implements it over the opc ua node
//!     store; tests wrap that to inject transport failures.
//!
//! contract:
//!     every call completes (or fails) before the synchronizer moves on.
//!     implementations may suspend internally; no ordering is assumed beyond
//!     per-call completion.
//!
//! ==============================================================================

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

use crate::domain::{SlotValue, ValueType};
use crate::error::Result;

/// address of a node: namespace index plus numeric identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId {
    pub namespace: u16,
    pub id: u32,
}

impl NodeId {
    pub const fn new(namespace: u16, id: u32) -> Self {
        Self { namespace, id }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns={};i={}", self.namespace, self.id)
    }
}

#[async_trait]
pub trait PublishingServer: Send + Sync {
    /// create an object node named `name` below `parent`
    async fn create_object(&self, parent: NodeId, name: &str) -> Result<NodeId>;

    /// create a typed, writable variable node below `parent`
    async fn create_attribute(
        &self,
        parent: NodeId,
        name: &str,
        initial: SlotValue,
        value_type: ValueType,
    ) -> Result<NodeId>;

    /// direct children of `parent` in creation order
    async fn list_children(&self, parent: NodeId) -> Result<Vec<(String, NodeId)>>;

    /// child of `parent` with browse name `name`
    async fn get_child(&self, parent: NodeId, name: &str) -> Result<Option<NodeId>>;

    /// write a scalar into a variable node
    async fn write_value(&self, slot: NodeId, value: SlotValue) -> Result<()>;
}
