//! ==============================================================================
//! address_space.rs - publishing server over the OPC UA node store
//! ==============================================================================
//!
//! purpose:
//!     implements the publishing-server operations on top of the opcua
//!     crate's address space: object nodes, typed variable nodes and value
//!     writes land in the same node store the opc.tcp endpoint serves.
//!     alongside it keeps optional per-variable history and a broadcast of
//!     value changes for the http endpoint.
//!
//! relationships:
//!     - implements: publisher.rs (PublishingServer)
//!     - node store from: endpoint.rs (the running server) or a standalone
//!       opcua AddressSpace
//!     - written by: sync.rs (create / look up / write)
//!     - read by: web.rs (browse, read, history, subscribe)
//!
//! sharing:
//!     AddressSpace is a Clone-able handle. the node store sits behind the
//!     opcua crate's own RwLock, which is shared with the protocol server and
//!     is never held across an await.
//!
//! ==============================================================================

use async_trait::async_trait;
use opcua::server::prelude::{self as ua, NodeBase};
use opcua::sync::RwLock;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, Mutex};

use crate::domain::{SlotValue, ValueType};
use crate::error::{BridgeError, Result};
use crate::publisher::{NodeId, PublishingServer};

/// well-known id of the Objects folder in namespace 0
pub const OBJECTS_FOLDER: NodeId = NodeId::new(0, 85);

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// numeric ids handed out in the bridge namespace start here
const FIRST_NODE_ID: u32 = 1000;

// ==============================================================================
// public views
// ==============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub server_name: String,
    pub endpoint: String,
    pub namespace_uri: String,
    pub namespace_index: u16,
    pub historizing: bool,
}

/// one historized sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub timestamp_ms: u64,
    pub value: SlotValue,
}

/// notification sent to subscribers on every successful write
#[derive(Debug, Clone, Serialize)]
pub struct DataChange {
    pub node: NodeId,
    pub browse_name: String,
    pub value: SlotValue,
    pub timestamp_ms: u64,
}

/// serializable snapshot of a node and its descendants
#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    pub node_id: NodeId,
    pub browse_name: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<SlotValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeView>,
}

#[derive(Debug, Clone, Copy)]
pub struct HistorySettings {
    pub enabled: bool,
    pub capacity: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: 1000,
        }
    }
}

// ==============================================================================
// conversions
// ==============================================================================

fn to_ua(id: NodeId) -> ua::NodeId {
    ua::NodeId::new(id.namespace, id.id)
}

/// only numeric ids are addressable through the bridge
fn from_ua(id: &ua::NodeId) -> Option<NodeId> {
    match id.identifier {
        ua::Identifier::Numeric(n) => Some(NodeId::new(id.namespace, n)),
        _ => None,
    }
}

fn to_variant(value: SlotValue) -> ua::Variant {
    match value {
        SlotValue::Double(v) => ua::Variant::Double(v),
        SlotValue::Int64(v) => ua::Variant::Int64(v),
    }
}

fn from_variant(value: &ua::Variant) -> Option<SlotValue> {
    match value {
        ua::Variant::Double(v) => Some(SlotValue::Double(*v)),
        ua::Variant::Int64(v) => Some(SlotValue::Int64(*v)),
        _ => None,
    }
}

fn data_type(value_type: ValueType) -> ua::DataTypeId {
    match value_type {
        ValueType::Double => ua::DataTypeId::Double,
        ValueType::Int64 => ua::DataTypeId::Int64,
    }
}

fn name_of(browse_name: ua::QualifiedName) -> String {
    browse_name.name.value().clone().unwrap_or_default()
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ==============================================================================
// node store queries (callers hold the lock)
// ==============================================================================

enum Kind {
    Object,
    Variable,
}

fn kind(nodes: &ua::AddressSpace, id: NodeId) -> Result<(Kind, String)> {
    match nodes.find_node(&to_ua(id)) {
        Some(ua::NodeType::Object(object)) => Ok((Kind::Object, name_of(object.browse_name()))),
        Some(ua::NodeType::Variable(variable)) => {
            Ok((Kind::Variable, name_of(variable.browse_name())))
        }
        Some(_) => Err(BridgeError::NotAnObject(id)),
        None => Err(BridgeError::NodeNotFound(id)),
    }
}

fn children(nodes: &ua::AddressSpace, parent: NodeId) -> Result<Vec<(String, NodeId)>> {
    if let (Kind::Variable, _) = kind(nodes, parent)? {
        return Err(BridgeError::NotAnObject(parent));
    }
    let references = nodes
        .find_references(&to_ua(parent), None::<(ua::ReferenceTypeId, bool)>)
        .unwrap_or_default();
    Ok(references
        .iter()
        .filter_map(|reference| {
            let id = from_ua(&reference.target_node)?;
            match kind(nodes, id) {
                Ok((_, name)) => Some((name, id)),
                Err(_) => None,
            }
        })
        .collect())
}

fn find_child(nodes: &ua::AddressSpace, parent: NodeId, name: &str) -> Result<Option<NodeId>> {
    Ok(children(nodes, parent)?
        .into_iter()
        .find(|(child, _)| child == name)
        .map(|(_, id)| id))
}

fn value(nodes: &ua::AddressSpace, id: NodeId) -> Result<SlotValue> {
    if let (Kind::Object, _) = kind(nodes, id)? {
        return Err(BridgeError::NotAVariable(id));
    }
    nodes
        .get_variable_value(to_ua(id))
        .ok()
        .and_then(|data| data.value)
        .as_ref()
        .and_then(from_variant)
        .ok_or_else(|| BridgeError::Write(format!("{id} holds no scalar value")))
}

fn view(nodes: &ua::AddressSpace, id: NodeId) -> Option<NodeView> {
    let (node_kind, browse_name) = kind(nodes, id).ok()?;
    let snapshot = match node_kind {
        Kind::Object => NodeView {
            node_id: id,
            browse_name,
            kind: "object",
            value: None,
            children: children(nodes, id)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|(_, child)| view(nodes, child))
                .collect(),
        },
        Kind::Variable => NodeView {
            node_id: id,
            browse_name,
            kind: "variable",
            value: value(nodes, id).ok(),
            children: Vec::new(),
        },
    };
    Some(snapshot)
}

// ==============================================================================
// address space handle
// ==============================================================================

#[derive(Clone)]
pub struct AddressSpace {
    nodes: Arc<RwLock<ua::AddressSpace>>,
    info: Arc<ServerInfo>,
    next_id: Arc<AtomicU32>,
    history: HistorySettings,
    samples: Arc<Mutex<HashMap<NodeId, VecDeque<Sample>>>>,
    changes: broadcast::Sender<DataChange>,
}

impl AddressSpace {
    /// wrap a node store and register `namespace_uri` as the namespace every
    /// created node belongs to
    pub fn new(
        nodes: Arc<RwLock<ua::AddressSpace>>,
        server_name: impl Into<String>,
        endpoint: impl Into<String>,
        namespace_uri: impl Into<String>,
        history: HistorySettings,
    ) -> Result<Self> {
        let namespace_uri = namespace_uri.into();
        let namespace_index = nodes
            .write()
            .register_namespace(&namespace_uri)
            .map_err(|_| BridgeError::Config(format!("cannot register namespace {namespace_uri}")))?;

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            nodes,
            info: Arc::new(ServerInfo {
                server_name: server_name.into(),
                endpoint: endpoint.into(),
                namespace_uri,
                namespace_index,
                historizing: history.enabled,
            }),
            next_id: Arc::new(AtomicU32::new(FIRST_NODE_ID)),
            history,
            samples: Arc::new(Mutex::new(HashMap::new())),
            changes,
        })
    }

    /// index of the namespace nodes are created in
    pub fn namespace_index(&self) -> u16 {
        self.info.namespace_index
    }

    pub fn info(&self) -> ServerInfo {
        self.info.as_ref().clone()
    }

    /// snapshot of `id` and everything below it
    pub fn browse(&self, id: NodeId) -> Option<NodeView> {
        view(&self.nodes.read(), id)
    }

    /// current value of a variable node
    pub fn read(&self, id: NodeId) -> Result<SlotValue> {
        value(&self.nodes.read(), id)
    }

    /// historized samples of a variable, oldest first; None when
    /// historization is disabled
    pub async fn history(&self, id: NodeId) -> Result<Option<Vec<Sample>>> {
        self.read(id)?;
        if !self.history.enabled {
            return Ok(None);
        }
        let samples = self.samples.lock().await;
        Ok(Some(
            samples
                .get(&id)
                .map(|h| h.iter().copied().collect())
                .unwrap_or_default(),
        ))
    }

    /// resolve a browse path of names starting below `start`
    pub fn resolve_path(&self, start: NodeId, path: &[&str]) -> Result<Option<NodeId>> {
        let nodes = self.nodes.read();
        let mut current = start;
        for name in path {
            match find_child(&nodes, current, name)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DataChange> {
        self.changes.subscribe()
    }

    /// next unused numeric id in the bridge namespace
    fn allocate(&self, nodes: &ua::AddressSpace) -> NodeId {
        loop {
            let id = NodeId::new(
                self.info.namespace_index,
                self.next_id.fetch_add(1, Ordering::Relaxed),
            );
            if nodes.find_node(&to_ua(id)).is_none() {
                return id;
            }
        }
    }

    /// checks shared by both create operations; returns the new node's id
    fn prepare_insert(&self, nodes: &ua::AddressSpace, parent: NodeId, name: &str) -> Result<NodeId> {
        if find_child(nodes, parent, name)?.is_some() {
            return Err(BridgeError::DuplicateName {
                parent,
                name: name.to_string(),
            });
        }
        Ok(self.allocate(nodes))
    }

    fn browse_name(&self, name: &str) -> ua::QualifiedName {
        ua::QualifiedName::new(self.info.namespace_index, name)
    }

    async fn record(&self, slot: NodeId, browse_name: String, value: SlotValue) {
        let now = now_ms();
        if self.history.enabled && self.history.capacity > 0 {
            let mut samples = self.samples.lock().await;
            let history = samples.entry(slot).or_default();
            if history.len() == self.history.capacity {
                history.pop_front();
            }
            history.push_back(Sample {
                timestamp_ms: now,
                value,
            });
        }

        // no subscribers is not an error
        let _ = self.changes.send(DataChange {
            node: slot,
            browse_name,
            value,
            timestamp_ms: now,
        });
    }
}

#[async_trait]
impl PublishingServer for AddressSpace {
    async fn create_object(&self, parent: NodeId, name: &str) -> Result<NodeId> {
        let mut nodes = self.nodes.write();
        let id = self.prepare_insert(&nodes, parent, name)?;
        let inserted = ua::ObjectBuilder::new(&to_ua(id), self.browse_name(name), name)
            .organized_by(to_ua(parent))
            .insert(&mut nodes);
        if !inserted {
            return Err(BridgeError::Write(format!("server refused object {name} below {parent}")));
        }
        Ok(id)
    }

    async fn create_attribute(
        &self,
        parent: NodeId,
        name: &str,
        initial: SlotValue,
        value_type: ValueType,
    ) -> Result<NodeId> {
        if initial.value_type() != value_type {
            return Err(BridgeError::TypeMismatch {
                node: parent,
                expected: value_type.name(),
                actual: initial.value_type().name(),
            });
        }

        let mut nodes = self.nodes.write();
        let id = self.prepare_insert(&nodes, parent, name)?;
        let inserted = ua::VariableBuilder::new(&to_ua(id), self.browse_name(name), name)
            .data_type(data_type(value_type))
            .value(to_variant(initial))
            .component_of(to_ua(parent))
            .insert(&mut nodes);
        if !inserted {
            return Err(BridgeError::Write(format!("server refused variable {name} below {parent}")));
        }
        Ok(id)
    }

    async fn list_children(&self, parent: NodeId) -> Result<Vec<(String, NodeId)>> {
        children(&self.nodes.read(), parent)
    }

    async fn get_child(&self, parent: NodeId, name: &str) -> Result<Option<NodeId>> {
        find_child(&self.nodes.read(), parent, name)
    }

    async fn write_value(&self, slot: NodeId, value: SlotValue) -> Result<()> {
        let browse_name = {
            let mut nodes = self.nodes.write();
            let current = self::value(&nodes, slot)?;
            if value.value_type() != current.value_type() {
                return Err(BridgeError::TypeMismatch {
                    node: slot,
                    expected: current.value_type().name(),
                    actual: value.value_type().name(),
                });
            }
            let now = ua::DateTime::now();
            if !nodes.set_variable_value(to_ua(slot), to_variant(value), &now, &now) {
                return Err(BridgeError::Write(format!("server refused value for {slot}")));
            }
            kind(&nodes, slot)?.1
        };

        self.record(slot, browse_name, value).await;
        Ok(())
    }
}
