//! ==============================================================================
//! normalizer.rs - raw telemetry envelope -> typed reading
//! ==============================================================================
//!
//! purpose:
//!     the lora gateway posts `{"message": "pH:7.2,EC:0.9,GPS:41.4,2.17"}`.
//!     this module turns that loosely structured text into a `Reading`.
//!     the only hard failure is an envelope that is not json; everything
//!     inside the message degrades field by field.
//!
//! token rules:
//!     - the message is split on ',' and each token on its FIRST ':'
//!     - tokens without a ':' are dropped, except the single fragment that
//!       directly follows a GPS token (the longitude after the comma).
//!       a GPS:NoFix token takes no fragment
//!     - keys are matched case-exactly against pH, EC, TDS, DO, Temp
//!     - numeric values that fail to parse become `Measurement::Rejected`
//!     - GPS:NoFix carries no coordinates; any other value must split into
//!       exactly two non-empty parts or it is dropped
//!
//! ==============================================================================

use chrono::NaiveDateTime;
use serde_json::Value;
use tracing::debug;

use crate::domain::{self, Field, Measurement, Reading};
use crate::error::IngestError;

const GPS_KEY: &str = "GPS";
const NO_FIX: &str = "NoFix";

/// normalize a raw request body, stamping it with the current local time
pub fn normalize(raw: &[u8]) -> Result<Reading, IngestError> {
    normalize_at(raw, domain::now())
}

/// same as `normalize` with an explicit processing timestamp
pub fn normalize_at(raw: &[u8], timestamp: NaiveDateTime) -> Result<Reading, IngestError> {
    let message = extract_message(raw)?;
    let mut reading = parse_message(&message);
    reading.timestamp = Some(timestamp);
    Ok(reading)
}

/// pull the text payload out of the json envelope
fn extract_message(raw: &[u8]) -> Result<String, IngestError> {
    let envelope: Value = serde_json::from_slice(raw)
        .map_err(|e| IngestError::InvalidEnvelope(format!("not valid json: {}", e)))?;

    let object = envelope
        .as_object()
        .ok_or_else(|| IngestError::InvalidEnvelope("envelope is not a json object".into()))?;

    match object.get("message") {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(text)) => Ok(text.clone()),
        Some(other) => Err(IngestError::InvalidEnvelope(format!(
            "message must be a string, got {}",
            other
        ))),
    }
}

/// parse the `key:value,key:value` body into a reading without a timestamp
pub fn parse_message(message: &str) -> Reading {
    let mut reading = Reading::default();

    for (key, value) in tokenize(message) {
        if key == GPS_KEY {
            apply_gps(&mut reading, &value);
            continue;
        }

        match Field::from_key(&key) {
            Some(field) => reading.set_measurement(field, coerce(field, &value)),
            None => debug!(key = %key, "ignoring unrecognised key"),
        }
    }

    reading
}

/// split into (key, value) pairs, folding the gps longitude back in
fn tokenize(message: &str) -> Vec<(String, String)> {
    let mut tokens: Vec<(String, String)> = Vec::new();
    let mut gps_open = false;

    for fragment in message.split(',') {
        match fragment.split_once(':') {
            Some((key, value)) => {
                let (key, value) = (key.trim(), value.trim());
                gps_open = key == GPS_KEY && value != NO_FIX;
                tokens.push((key.to_string(), value.to_string()));
            }
            None if gps_open => {
                if let Some((_, value)) = tokens.last_mut() {
                    value.push(',');
                    value.push_str(fragment.trim());
                }
                gps_open = false;
            }
            None => {
                if !fragment.trim().is_empty() {
                    debug!(fragment = %fragment.trim(), "dropping token without a colon");
                }
            }
        }
    }

    tokens
}

fn coerce(field: Field, value: &str) -> Measurement {
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => Measurement::Value(v),
        _ => {
            debug!(field = field.key(), value = %value, "could not coerce value to a number");
            Measurement::Rejected
        }
    }
}

fn apply_gps(reading: &mut Reading, value: &str) {
    if value == NO_FIX {
        reading.lat = None;
        reading.lon = None;
        return;
    }

    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    match parts.as_slice() {
        [lat, lon] if !lat.is_empty() && !lon.is_empty() => {
            reading.lat = Some(lat.to_string());
            reading.lon = Some(lon.to_string());
        }
        _ => debug!(gps = %value, "dropping gps value that is not a lat,lon pair"),
    }
}
