//! ==============================================================================
//! domain.rs - readings, measurements and collection periods
//! ==============================================================================
//!
//! purpose:
//!     the typed records that flow through the hub. a reading is a fixed
//!     record with one slot per sensor key instead of an open key/value map,
//!     so "never sent", "sent but garbage" and "sent as a number" stay
//!     distinct all the way to the api.
//!
//! relationships:
//!     - produced by: normalizer.rs (ingest), server.rs (/test-data)
//!     - enriched by: estimator.rs
//!     - persisted by: store.rs
//!     - exported by: export.rs
//!
//! json shape (flat, keys as the field sensor sends them):
//!
//!     {"timestamp": "2026-10-19 14:02:11", "pH": 7.2, "EC": 0.9,
//!      "TDS": 0.31, "DO": null, "Temp": 21.5, "Arsenic": 4.118,
//!      "Lat": "41.40338", "Lon": "2.17403", "period_id": 3}
//!
//! ==============================================================================

use chrono::{Local, NaiveDateTime, SubsecRound};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// wire and storage format for every timestamp in the hub
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// local wall clock truncated to whole seconds
pub fn now() -> NaiveDateTime {
    Local::now().naive_local().trunc_subsecs(0)
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT).ok()
}

// ==============================================================================
// measurement - one numeric sensor slot
// ==============================================================================

/// state of a single numeric sensor field on a reading
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Measurement {
    /// key not present in the payload
    #[default]
    Missing,
    /// key present but the value did not parse as a number
    Rejected,
    /// key present with a numeric value
    Value(f64),
}

impl Measurement {
    pub fn value(&self) -> Option<f64> {
        match self {
            Measurement::Value(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Measurement::Missing)
    }

    /// storage round trip: NULL columns come back as missing
    pub fn from_option(value: Option<f64>) -> Self {
        value.map_or(Measurement::Missing, Measurement::Value)
    }
}

// rejected values serialize as null, the same as the legacy dashboard expects
impl Serialize for Measurement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Measurement::Value(v) => serializer.serialize_f64(*v),
            _ => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for Measurement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<f64>::deserialize(deserializer).map(Measurement::from_option)
    }
}

// ==============================================================================
// field - the numeric keys recognised in a telemetry message
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Ph,
    Ec,
    Tds,
    DissolvedOxygen,
    Temp,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::Ph,
        Field::Ec,
        Field::Tds,
        Field::DissolvedOxygen,
        Field::Temp,
    ];

    /// key exactly as the sensor sends it
    pub fn key(&self) -> &'static str {
        match self {
            Field::Ph => "pH",
            Field::Ec => "EC",
            Field::Tds => "TDS",
            Field::DissolvedOxygen => "DO",
            Field::Temp => "Temp",
        }
    }

    /// case-exact lookup; "ph" or "temp" are not recognised
    pub fn from_key(key: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.key() == key)
    }
}

// ==============================================================================
// reading
// ==============================================================================

/// one normalized observation, ingested or synthesized
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// store row id, set once the reading has been persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    #[serde(
        default,
        with = "optional_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<NaiveDateTime>,

    #[serde(rename = "pH", default, skip_serializing_if = "Measurement::is_missing")]
    pub ph: Measurement,

    #[serde(rename = "EC", default, skip_serializing_if = "Measurement::is_missing")]
    pub ec: Measurement,

    #[serde(rename = "TDS", default, skip_serializing_if = "Measurement::is_missing")]
    pub tds: Measurement,

    #[serde(rename = "DO", default, skip_serializing_if = "Measurement::is_missing")]
    pub dissolved_oxygen: Measurement,

    #[serde(rename = "Temp", default, skip_serializing_if = "Measurement::is_missing")]
    pub temp: Measurement,

    #[serde(rename = "Arsenic", default, skip_serializing_if = "Option::is_none")]
    pub arsenic: Option<f64>,

    #[serde(rename = "Barium", default, skip_serializing_if = "Option::is_none")]
    pub barium: Option<f64>,

    /// raw coordinate text, never parsed
    #[serde(rename = "Lat", default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<String>,

    #[serde(rename = "Lon", default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_id: Option<i64>,
}

impl Reading {
    pub fn measurement(&self, field: Field) -> Measurement {
        match field {
            Field::Ph => self.ph,
            Field::Ec => self.ec,
            Field::Tds => self.tds,
            Field::DissolvedOxygen => self.dissolved_oxygen,
            Field::Temp => self.temp,
        }
    }

    pub fn set_measurement(&mut self, field: Field, value: Measurement) {
        let slot = match field {
            Field::Ph => &mut self.ph,
            Field::Ec => &mut self.ec,
            Field::Tds => &mut self.tds,
            Field::DissolvedOxygen => &mut self.dissolved_oxygen,
            Field::Temp => &mut self.temp,
        };
        *slot = value;
    }

    pub fn has_coordinates(&self) -> bool {
        self.lat.is_some() && self.lon.is_some()
    }

    /// true for the placeholder returned before anything was ingested
    pub fn is_empty(&self) -> bool {
        *self == Reading::default()
    }
}

// ==============================================================================
// period - a named bracket over consecutive readings
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Period {
    pub id: i64,
    pub name: String,
    #[serde(with = "timestamp")]
    pub start_time: NaiveDateTime,
    #[serde(default, with = "optional_timestamp")]
    pub end_time: Option<NaiveDateTime>,
    #[serde(default)]
    pub notes: String,
}

impl Period {
    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }
}

/// default period name when the operator does not supply one
pub fn default_period_name(start: &NaiveDateTime) -> String {
    format!("Period {}", start.format("%Y-%m-%d %H:%M"))
}

// ==============================================================================
// serde helpers for the text timestamp format
// ==============================================================================

pub mod timestamp {
    use super::*;

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_timestamp(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("bad timestamp '{}'", raw)))
    }
}

pub mod optional_timestamp {
    use super::*;

    pub fn serialize<S: Serializer>(
        ts: &Option<NaiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => serializer.serialize_str(&format_timestamp(ts)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(raw) => parse_timestamp(&raw)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("bad timestamp '{}'", raw))),
            None => Ok(None),
        }
    }
}
