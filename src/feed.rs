//! ==============================================================================
//! feed.rs - discovery feed boundary
//! ==============================================================================
//!
//! purpose:
//!     the radio/decoding layer is external. the bridge only needs a lazy,
//!     possibly infinite sequence of `(identity, reading)` pairs. this module
//!     defines that boundary and three sources for it:
//!
//! ```text
//!     - SimulatedFeed: synthetic sensors for demos and bench setups
//!     - JsonLinesFeed: one pair per line from any async reader (stdin)
//!     - ChannelFeed:   pairs pushed from another task
//! ```
//!
//! line format (JsonLinesFeed):
//!     {"identity": "AA:BB:CC:DD:EE:FF", "reading": {"temperature": 21.5}}
//!     {"mac": "AA:BB:CC:DD:EE:FF", "data": {"humidity": 40.0}}
//!     ["AA:BB:CC:DD:EE:FF", {"pressure": 1013.2, "battery": 2950}]
//!
//! ==============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;

use crate::domain::{Reading, SensorIdentity};
use crate::error::{BridgeError, Result};
use crate::naming::normalize;

/// one pair emitted by a feed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedItem {
    pub identity: SensorIdentity,
    pub reading: Reading,
}

impl FeedItem {
    pub fn new(identity: impl Into<SensorIdentity>, reading: Reading) -> Self {
        Self {
            identity: identity.into(),
            reading,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireItem {
    Pair(SensorIdentity, Reading),
    Record {
        #[serde(alias = "mac")]
        identity: SensorIdentity,
        #[serde(alias = "data")]
        reading: Reading,
    },
}

impl<'de> Deserialize<'de> for FeedItem {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(match WireItem::deserialize(deserializer)? {
            WireItem::Pair(identity, reading) | WireItem::Record { identity, reading } => {
                FeedItem { identity, reading }
            }
        })
    }
}

/// source of `(identity, reading)` pairs
///
/// `Ok(None)` ends the feed. An `Err` is a feed failure; the caller decides
/// whether it is fatal and may call `next` again to continue.
#[async_trait]
pub trait DiscoveryFeed: Send {
    async fn next(&mut self) -> Result<Option<FeedItem>>;
}

// ==============================================================================
// identity allow-list
// ==============================================================================

/// restricts the bridge to configured identities; empty means allow all
#[derive(Debug, Clone, Default)]
pub struct IdentityFilter {
    allowed: Option<HashSet<String>>,
}

impl IdentityFilter {
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// union of the single-identity filter and the allow-list
    pub fn new<'a>(single: Option<&'a str>, allow_list: impl IntoIterator<Item = &'a str>) -> Self {
        let allowed: HashSet<String> = single.into_iter().chain(allow_list).map(normalize).collect();
        Self {
            allowed: (!allowed.is_empty()).then_some(allowed),
        }
    }

    /// separator notation and letter case are ignored
    pub fn allows(&self, identity: &SensorIdentity) -> bool {
        match &self.allowed {
            None => true,
            Some(allowed) => allowed.contains(&normalize(identity.as_str())),
        }
    }

    pub fn is_restricted(&self) -> bool {
        self.allowed.is_some()
    }
}

// ==============================================================================
// json lines
// ==============================================================================

pub struct JsonLinesFeed<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesFeed<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

impl JsonLinesFeed<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> DiscoveryFeed for JsonLinesFeed<R> {
    async fn next(&mut self) -> Result<Option<FeedItem>> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            return serde_json::from_str(line)
                .map(Some)
                .map_err(|e| BridgeError::Feed(format!("malformed feed line: {e}")));
        }
    }
}

// ==============================================================================
// channel
// ==============================================================================

pub struct ChannelFeed {
    rx: mpsc::Receiver<Result<FeedItem>>,
}

impl ChannelFeed {
    pub fn new(capacity: usize) -> (mpsc::Sender<Result<FeedItem>>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl DiscoveryFeed for ChannelFeed {
    async fn next(&mut self) -> Result<Option<FeedItem>> {
        match self.rx.recv().await {
            Some(item) => item.map(Some),
            None => Ok(None),
        }
    }
}

// ==============================================================================
// simulated sensors
// ==============================================================================

/// synthetic sensors emitting one reading each per interval
///
/// every fourth sweep is a partial frame (temperature and humidity only),
/// and acceleration carries a fractional part, so both the skip-absent and
/// the integer rounding paths are exercised.
pub struct SimulatedFeed {
    identities: Vec<SensorIdentity>,
    interval: Duration,
    sweep: u64,
    cursor: usize,
}

impl SimulatedFeed {
    pub fn new(identities: Vec<SensorIdentity>, interval: Duration) -> Self {
        Self {
            identities,
            interval,
            sweep: 0,
            cursor: 0,
        }
    }

    fn reading(sweep: u64, index: usize) -> Reading {
        let t = sweep as f64 / 10.0 + index as f64;
        let partial = sweep % 4 == 3;
        Reading {
            temperature: Some(21.0 + 2.0 * t.sin()),
            humidity: Some(40.0 + 5.0 * t.cos()),
            pressure: (!partial).then(|| 1013.0 + (t / 3.0).sin()),
            acceleration_x: (!partial).then(|| 12.5 * t.sin()),
            acceleration_y: (!partial).then(|| -8.25 * t.cos()),
            acceleration_z: (!partial).then_some(1000.4),
            battery_voltage: (!partial).then(|| 3000.0 - (sweep % 500) as f64),
        }
    }
}

#[async_trait]
impl DiscoveryFeed for SimulatedFeed {
    async fn next(&mut self) -> Result<Option<FeedItem>> {
        if self.identities.is_empty() {
            return Ok(None);
        }
        if self.cursor == self.identities.len() {
            self.cursor = 0;
            self.sweep += 1;
            tokio::time::sleep(self.interval).await;
        }

        let index = self.cursor;
        self.cursor += 1;
        Ok(Some(FeedItem {
            identity: self.identities[index].clone(),
            reading: Self::reading(self.sweep, index),
        }))
    }
}
