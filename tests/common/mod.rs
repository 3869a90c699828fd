//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use opcua::server::prelude as ua;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sensor_ua_bridge::address_space::{AddressSpace, HistorySettings, OBJECTS_FOLDER};
use sensor_ua_bridge::{
    BridgeError, Field, NamingRule, NodeId, PublishingServer, Result, SlotValue, Synchronizer,
    ValueType,
};

/// address space over a standalone opc ua node store (no listener)
pub fn address_space() -> AddressSpace {
    AddressSpace::new(
        Arc::new(opcua::sync::RwLock::new(ua::AddressSpace::new())),
        "test server",
        "opc.tcp://localhost:4840/test/",
        "urn:sensor-bridge:test",
        HistorySettings {
            enabled: true,
            capacity: 16,
        },
    )
    .expect("namespace registration")
}

pub async fn synchronizer(server: Arc<dyn PublishingServer>, naming: NamingRule) -> Synchronizer {
    Synchronizer::start(server, OBJECTS_FOLDER, "Sensors", naming)
        .await
        .expect("root container")
}

/// current value of `field` below the subtree called `name`
pub async fn slot_value(space: &AddressSpace, name: &str, field: Field) -> Option<SlotValue> {
    let node = space
        .resolve_path(OBJECTS_FOLDER, &["Sensors", name, field.browse_name()])
        .ok()??;
    space.read(node).ok()
}

/// child names of the root container, sorted; duplicates are kept
pub async fn subtree_names(space: &AddressSpace) -> Vec<String> {
    let root = space
        .get_child(OBJECTS_FOLDER, "Sensors")
        .await
        .unwrap()
        .unwrap();
    let mut names = space
        .list_children(root)
        .await
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect::<Vec<_>>();
    names.sort();
    names
}

pub async fn slot_names(space: &AddressSpace, name: &str) -> Vec<String> {
    let node = space
        .resolve_path(OBJECTS_FOLDER, &["Sensors", name])
        .unwrap()
        .unwrap();
    let mut names = space
        .list_children(node)
        .await
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect::<Vec<_>>();
    names.sort();
    names
}

/// wraps an address space and fails selected operations on demand
pub struct FlakyServer {
    pub inner: AddressSpace,
    /// pending create_object failures
    fail_objects: AtomicUsize,
    fail_attributes: Mutex<HashSet<String>>,
    fail_writes: Mutex<HashSet<String>>,
    pub list_calls: AtomicUsize,
    pub get_child_calls: AtomicUsize,
}

impl FlakyServer {
    pub fn new(inner: AddressSpace) -> Self {
        Self {
            inner,
            fail_objects: AtomicUsize::new(0),
            fail_attributes: Mutex::new(HashSet::new()),
            fail_writes: Mutex::new(HashSet::new()),
            list_calls: AtomicUsize::new(0),
            get_child_calls: AtomicUsize::new(0),
        }
    }

    /// fail the next `count` object creations
    pub fn fail_objects(&self, count: usize) {
        self.fail_objects.store(count, Ordering::SeqCst);
    }

    /// fail creation of slots with this browse name
    pub fn fail_attribute(&self, name: &str, fail: bool) {
        let mut set = self.fail_attributes.lock().unwrap();
        if fail {
            set.insert(name.to_string());
        } else {
            set.remove(name);
        }
    }

    /// fail writes to slots with this browse name
    pub fn fail_write(&self, name: &str, fail: bool) {
        let mut set = self.fail_writes.lock().unwrap();
        if fail {
            set.insert(name.to_string());
        } else {
            set.remove(name);
        }
    }

    pub fn lookups(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst) + self.get_child_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PublishingServer for FlakyServer {
    async fn create_object(&self, parent: NodeId, name: &str) -> Result<NodeId> {
        let pending = self
            .fail_objects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending.is_ok() {
            return Err(BridgeError::Write(format!("transport dropped creating {name}")));
        }
        self.inner.create_object(parent, name).await
    }

    async fn create_attribute(
        &self,
        parent: NodeId,
        name: &str,
        initial: SlotValue,
        value_type: ValueType,
    ) -> Result<NodeId> {
        if self.fail_attributes.lock().unwrap().contains(name) {
            return Err(BridgeError::Write(format!("transport dropped creating {name}")));
        }
        self.inner
            .create_attribute(parent, name, initial, value_type)
            .await
    }

    async fn list_children(&self, parent: NodeId) -> Result<Vec<(String, NodeId)>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.list_children(parent).await
    }

    async fn get_child(&self, parent: NodeId, name: &str) -> Result<Option<NodeId>> {
        self.get_child_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_child(parent, name).await
    }

    async fn write_value(&self, slot: NodeId, value: SlotValue) -> Result<()> {
        let name = self
            .inner
            .browse(slot)
            .map(|view| view.browse_name)
            .unwrap_or_default();
        if self.fail_writes.lock().unwrap().contains(&name) {
            return Err(BridgeError::Write(format!("timeout writing {name}")));
        }
        self.inner.write_value(slot, value).await
    }
}
