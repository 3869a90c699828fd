//! ==============================================================================
//! domain.rs - sensor identities, readings and slot values
//! ==============================================================================
//!
//! purpose:
//!     the plain data that flows from the discovery feed into the address
//!     space. a feed yields `(SensorIdentity, Reading)` pairs; every reading
//!     field maps onto exactly one typed attribute slot.
//!
//! relationships:
//!     - produced by: feed.rs
//!     - consumed by: sync.rs (dispatch), naming.rs (display names)
//!     - stored by: address_space.rs (SlotValue)
//!
//! ==============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{BridgeError, Result};

// ==============================================================================
// identity
// ==============================================================================

/// stable hardware address of one physical sensor (e.g. "AA:BB:CC:DD:EE:FF")
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorIdentity(String);

impl SensorIdentity {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SensorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SensorIdentity {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// browse name of a sensor subtree, derived from its identity
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisplayName(String);

impl DisplayName {
    pub(crate) fn new(name: String) -> Self {
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ==============================================================================
// readings
// ==============================================================================

/// one measurement cycle from a sensor
///
/// every field is optional: a sensor that did not report a quantity this
/// cycle leaves the corresponding slot untouched. integer-typed quantities
/// (acceleration, battery) arrive as raw numbers and are converted by
/// [`Field::convert`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// temperature in celsius
    #[serde(default)]
    pub temperature: Option<f64>,
    /// relative humidity (0-100%)
    #[serde(default)]
    pub humidity: Option<f64>,
    /// pressure in hPa
    #[serde(default)]
    pub pressure: Option<f64>,
    /// acceleration in mG
    #[serde(default)]
    pub acceleration_x: Option<f64>,
    #[serde(default)]
    pub acceleration_y: Option<f64>,
    #[serde(default)]
    pub acceleration_z: Option<f64>,
    /// battery voltage in mV
    #[serde(default, alias = "battery")]
    pub battery_voltage: Option<f64>,
}

impl Reading {
    /// raw value reported for `field`, if any
    pub fn get(&self, field: Field) -> Option<f64> {
        match field {
            Field::Temperature => self.temperature,
            Field::Humidity => self.humidity,
            Field::Pressure => self.pressure,
            Field::AccelerationX => self.acceleration_x,
            Field::AccelerationY => self.acceleration_y,
            Field::AccelerationZ => self.acceleration_z,
            Field::BatteryVoltage => self.battery_voltage,
        }
    }

    /// fields present in this reading, in declaration order
    pub fn present_fields(&self) -> impl Iterator<Item = (Field, f64)> + '_ {
        Field::ALL
            .iter()
            .filter_map(move |&field| self.get(field).map(|raw| (field, raw)))
    }

    pub fn is_empty(&self) -> bool {
        self.present_fields().next().is_none()
    }
}

// ==============================================================================
// fields and slot values
// ==============================================================================

/// declared type of an attribute slot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Double,
    Int64,
}

impl ValueType {
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Double => "Double",
            ValueType::Int64 => "Int64",
        }
    }
}

/// scalar value held by an attribute slot
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum SlotValue {
    Double(f64),
    Int64(i64),
}

impl SlotValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            SlotValue::Double(_) => ValueType::Double,
            SlotValue::Int64(_) => ValueType::Int64,
        }
    }
}

/// number of attribute slots in every sensor subtree
pub const FIELD_COUNT: usize = 7;

/// one of the seven quantities a sensor subtree exposes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Field {
    Temperature,
    Humidity,
    Pressure,
    AccelerationX,
    AccelerationY,
    AccelerationZ,
    BatteryVoltage,
}

impl Field {
    pub const ALL: [Field; FIELD_COUNT] = [
        Field::Temperature,
        Field::Humidity,
        Field::Pressure,
        Field::AccelerationX,
        Field::AccelerationY,
        Field::AccelerationZ,
        Field::BatteryVoltage,
    ];

    /// browse name of the slot under its subtree
    pub fn browse_name(self) -> &'static str {
        match self {
            Field::Temperature => "Temperature",
            Field::Humidity => "Humidity",
            Field::Pressure => "Pressure",
            Field::AccelerationX => "AccelerationX",
            Field::AccelerationY => "AccelerationY",
            Field::AccelerationZ => "AccelerationZ",
            Field::BatteryVoltage => "BatteryVoltage",
        }
    }

    pub fn value_type(self) -> ValueType {
        match self {
            Field::Temperature | Field::Humidity | Field::Pressure => ValueType::Double,
            Field::AccelerationX
            | Field::AccelerationY
            | Field::AccelerationZ
            | Field::BatteryVoltage => ValueType::Int64,
        }
    }

    /// value a slot holds before its first write
    pub fn initial_value(self) -> SlotValue {
        match self.value_type() {
            ValueType::Double => SlotValue::Double(0.0),
            ValueType::Int64 => SlotValue::Int64(0),
        }
    }

    /// convert a raw reading into this slot's type
    ///
    /// integer slots round half away from zero and saturate at the i64
    /// range. non-finite input has no integer meaning and is rejected.
    pub fn convert(self, raw: f64) -> Result<SlotValue> {
        match self.value_type() {
            ValueType::Double => Ok(SlotValue::Double(raw)),
            ValueType::Int64 if raw.is_finite() => Ok(SlotValue::Int64(raw.round() as i64)),
            ValueType::Int64 => Err(BridgeError::InvalidValue {
                field: self.browse_name(),
                value: raw,
            }),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.browse_name())
    }
}
