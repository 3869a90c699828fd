//! ==============================================================================
//! sync.rs - node tree synchronizer
//! ==============================================================================
//!
//! purpose:
//!     turns one `(identity, reading)` pair into address-space mutations:
//!
//! ```text
//!         1. derive the display name                      (naming.rs)
//!         2. resolve-or-create the sensor subtree         (root scan)
//!         3. resolve-or-create each of the seven slots    (registry cache)
//!         4. write every present reading field            (one write per field)
//! ```
//!
//! failure model:
//!     nothing here aborts a dispatch. a failed slot creation leaves the
//!     subtree partial and the missing slots are retried individually on the
//!     next sighting. a failed field write is logged and the remaining fields
//!     are still written.
//!
//! concurrency:
//!     `dispatch` takes `&mut self`, so one synchronizer processes exactly
//!     one pair at a time. resolve-or-create is not safe to run concurrently
//!     against itself; share a synchronizer only behind a single mutex.
//!
//! ==============================================================================

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{DisplayName, Field, Reading, SensorIdentity};
use crate::error::{BridgeError, Result};
use crate::naming::NamingRule;
use crate::publisher::{NodeId, PublishingServer};
use crate::registry::{Claim, SlotRegistry};

// ==============================================================================
// counters
// ==============================================================================

/// counters shared with the web server
#[derive(Debug, Default)]
pub struct SyncStats {
    pub readings_dispatched: AtomicU64,
    pub readings_filtered: AtomicU64,
    pub subtrees_created: AtomicU64,
    pub slots_created: AtomicU64,
    pub writes_ok: AtomicU64,
    pub write_failures: AtomicU64,
    pub resolve_failures: AtomicU64,
    pub name_collisions: AtomicU64,
    pub feed_errors: AtomicU64,
    /// subtrees present in the registry
    pub subtrees_known: AtomicU64,
    pub dispatching: AtomicBool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub state: &'static str,
    pub readings_dispatched: u64,
    pub readings_filtered: u64,
    pub subtrees_created: u64,
    pub slots_created: u64,
    pub writes_ok: u64,
    pub write_failures: u64,
    pub resolve_failures: u64,
    pub name_collisions: u64,
    pub feed_errors: u64,
    pub subtrees_known: u64,
}

impl SyncStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            state: if self.dispatching.load(Ordering::Relaxed) {
                "dispatching"
            } else {
                "idle"
            },
            readings_dispatched: load(&self.readings_dispatched),
            readings_filtered: load(&self.readings_filtered),
            subtrees_created: load(&self.subtrees_created),
            slots_created: load(&self.slots_created),
            writes_ok: load(&self.writes_ok),
            write_failures: load(&self.write_failures),
            resolve_failures: load(&self.resolve_failures),
            name_collisions: load(&self.name_collisions),
            feed_errors: load(&self.feed_errors),
            subtrees_known: load(&self.subtrees_known),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// what happened while dispatching one pair
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub display_name: Option<DisplayName>,
    pub subtree: Option<NodeId>,
    pub subtree_created: bool,
    pub slots_created: usize,
    pub written: Vec<Field>,
    pub failed: Vec<(Field, String)>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

// ==============================================================================
// synchronizer
// ==============================================================================

pub struct Synchronizer {
    server: Arc<dyn PublishingServer>,
    root: NodeId,
    naming: NamingRule,
    registry: SlotRegistry,
    stats: Arc<SyncStats>,
}

impl Synchronizer {
    /// resolve-or-create the root container below `parent` and build an
    /// empty registry
    pub async fn start(
        server: Arc<dyn PublishingServer>,
        parent: NodeId,
        root_name: &str,
        naming: NamingRule,
    ) -> Result<Self> {
        let root = match server.get_child(parent, root_name).await? {
            Some(existing) => existing,
            None => server.create_object(parent, root_name).await?,
        };
        info!(%root, root_name, "root container ready");

        Ok(Self {
            server,
            root,
            naming,
            registry: SlotRegistry::new(),
            stats: Arc::new(SyncStats::default()),
        })
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn registry(&self) -> &SlotRegistry {
        &self.registry
    }

    pub fn stats(&self) -> Arc<SyncStats> {
        self.stats.clone()
    }

    /// resolve subtree and slots for `identity`, then write every present
    /// field of `reading`
    pub async fn dispatch(&mut self, identity: &SensorIdentity, reading: &Reading) -> DispatchReport {
        let mut report = DispatchReport::default();
        let name = self.naming.derive_display_name(identity);
        report.display_name = Some(name.clone());

        let claim = self.registry.claim(identity, &name);
        match &claim {
            Claim::Collision { owner } => {
                SyncStats::bump(&self.stats.name_collisions);
                warn!(
                    %identity,
                    %owner,
                    display_name = %name,
                    "display name collision, merging readings into existing subtree"
                );
            }
            Claim::New => debug!(%identity, display_name = %name, "new identity"),
            Claim::Known => {}
        }

        match self.resolve_subtree(identity, &name, &mut report).await {
            Ok(node) => {
                if claim != Claim::Known {
                    self.registry.record(identity);
                }
                report.subtree = Some(node);
            }
            Err(e) => {
                SyncStats::bump(&self.stats.resolve_failures);
                warn!(%identity, display_name = %name, error = %e, "failed to resolve subtree");
                for (field, _) in reading.present_fields() {
                    report.failed.push((field, e.to_string()));
                }
                SyncStats::bump(&self.stats.readings_dispatched);
                return report;
            }
        }

        self.write_fields(identity, &name, reading, &mut report).await;
        SyncStats::bump(&self.stats.readings_dispatched);
        report
    }

    // ==========================================================================
    // resolve-or-create
    // ==========================================================================

    /// return the subtree node for `name`, creating the object and any
    /// missing slots
    async fn resolve_subtree(
        &mut self,
        identity: &SensorIdentity,
        name: &DisplayName,
        report: &mut DispatchReport,
    ) -> Result<NodeId> {
        if let Some(entry) = self.registry.subtree(name) {
            if entry.is_complete() {
                return Ok(entry.node);
            }
        }

        let node = match self.registry.subtree(name) {
            Some(entry) => entry.node,
            None => {
                let node = match self.find_in_root(name).await? {
                    Some(existing) => {
                        debug!(display_name = %name, node = %existing, "found existing subtree");
                        existing
                    }
                    None => {
                        let created = self.server.create_object(self.root, name.as_str()).await?;
                        SyncStats::bump(&self.stats.subtrees_created);
                        report.subtree_created = true;
                        info!(%identity, display_name = %name, node = %created, "created sensor subtree");
                        created
                    }
                };
                self.registry
                    .insert_subtree(name.clone(), node, identity.clone());
                node
            }
        };

        self.stats
            .subtrees_known
            .store(self.registry.len() as u64, Ordering::Relaxed);
        self.ensure_slots(name, node, report).await;
        Ok(node)
    }

    /// linear scan of the root container's children
    async fn find_in_root(&self, name: &DisplayName) -> Result<Option<NodeId>> {
        let children = self.server.list_children(self.root).await?;
        Ok(children
            .into_iter()
            .find(|(child, _)| child == name.as_str())
            .map(|(_, id)| id))
    }

    /// check every uncached slot individually: look it up first, create it
    /// only when it is really absent
    async fn ensure_slots(&mut self, name: &DisplayName, node: NodeId, report: &mut DispatchReport) {
        let missing: Vec<Field> = match self.registry.subtree(name) {
            Some(entry) => entry.missing_fields().collect(),
            None => return,
        };

        for field in missing {
            match self.resolve_slot(node, field).await {
                Ok((slot, created)) => {
                    self.registry.insert_slot(name, field, slot);
                    if created {
                        report.slots_created += 1;
                        SyncStats::bump(&self.stats.slots_created);
                    }
                }
                Err(e) => {
                    // left uncached; retried on the next sighting
                    warn!(display_name = %name, %field, error = %e, "failed to create slot");
                }
            }
        }
    }

    async fn resolve_slot(&self, node: NodeId, field: Field) -> Result<(NodeId, bool)> {
        if let Some(existing) = self.server.get_child(node, field.browse_name()).await? {
            return Ok((existing, false));
        }
        let slot = self
            .server
            .create_attribute(node, field.browse_name(), field.initial_value(), field.value_type())
            .await?;
        Ok((slot, true))
    }

    // ==========================================================================
    // value dispatch
    // ==========================================================================

    async fn write_fields(
        &self,
        identity: &SensorIdentity,
        name: &DisplayName,
        reading: &Reading,
        report: &mut DispatchReport,
    ) {
        for (field, raw) in reading.present_fields() {
            match self.write_field(name, field, raw).await {
                Ok(()) => {
                    SyncStats::bump(&self.stats.writes_ok);
                    report.written.push(field);
                }
                Err(e) => {
                    SyncStats::bump(&self.stats.write_failures);
                    warn!(%identity, display_name = %name, %field, error = %e, "write failed");
                    report.failed.push((field, e.to_string()));
                }
            }
        }
    }

    async fn write_field(&self, name: &DisplayName, field: Field, raw: f64) -> Result<()> {
        let value = field.convert(raw)?;
        let slot = self
            .registry
            .slot(name, field)
            .ok_or_else(|| BridgeError::Write(format!("slot {field} of {name} does not exist")))?;
        self.server.write_value(slot, value).await
    }
}
