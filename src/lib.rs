//! Bridges environmental sensor readings into a browsable address space.
//!
//! Every sensor identity seen on the discovery feed gets one object node
//! below the root container, holding seven typed attribute slots that are
//! rewritten with each new reading.

pub mod address_space;
pub mod bridge;
pub mod config;
pub mod domain;
pub mod endpoint;
pub mod error;
pub mod feed;
pub mod naming;
pub mod publisher;
pub mod registry;
pub mod sync;
pub mod web;

pub use address_space::AddressSpace;
pub use bridge::{Bridge, BridgeSettings, LoopExit};
pub use domain::{DisplayName, Field, Reading, SensorIdentity, SlotValue, ValueType};
pub use error::{BridgeError, Result};
pub use feed::{DiscoveryFeed, FeedItem, IdentityFilter};
pub use naming::{derive_display_name, NameStyle, NamingRule};
pub use publisher::{NodeId, PublishingServer};
pub use sync::{DispatchReport, Synchronizer};
