//! ==============================================================================
//! export.rs - period csv export
//! ==============================================================================
//!
//! purpose:
//!     renders a period's readings as a csv attachment and reads one back.
//!
//! format:
//!     header `id,timestamp,period_id,pH,EC,TDS,DO,Temp,Arsenic,Barium,Lat,Lon`.
//!     absent values (missing or rejected) are empty cells.
//!
//! relationships:
//!     - used by: server.rs (GET /periods/:id/export)
//!     - uses: csv (serde-driven writer and reader)
//!
//! ==============================================================================

use serde::{Deserialize, Serialize};

use crate::domain::{self, Measurement, Reading};
use crate::error::ExportError;

#[derive(Debug, Serialize, Deserialize)]
struct ExportRow {
    id: Option<i64>,
    timestamp: Option<String>,
    period_id: Option<i64>,
    #[serde(rename = "pH")]
    ph: Option<f64>,
    #[serde(rename = "EC")]
    ec: Option<f64>,
    #[serde(rename = "TDS")]
    tds: Option<f64>,
    #[serde(rename = "DO")]
    dissolved_oxygen: Option<f64>,
    #[serde(rename = "Temp")]
    temp: Option<f64>,
    #[serde(rename = "Arsenic")]
    arsenic: Option<f64>,
    #[serde(rename = "Barium")]
    barium: Option<f64>,
    #[serde(rename = "Lat")]
    lat: Option<String>,
    #[serde(rename = "Lon")]
    lon: Option<String>,
}

impl From<&Reading> for ExportRow {
    fn from(reading: &Reading) -> Self {
        ExportRow {
            id: reading.id,
            timestamp: reading.timestamp.as_ref().map(domain::format_timestamp),
            period_id: reading.period_id,
            ph: reading.ph.value(),
            ec: reading.ec.value(),
            tds: reading.tds.value(),
            dissolved_oxygen: reading.dissolved_oxygen.value(),
            temp: reading.temp.value(),
            arsenic: reading.arsenic,
            barium: reading.barium,
            lat: reading.lat.clone(),
            lon: reading.lon.clone(),
        }
    }
}

impl TryFrom<ExportRow> for Reading {
    type Error = ExportError;

    fn try_from(row: ExportRow) -> Result<Self, Self::Error> {
        let timestamp = match row.timestamp.as_deref() {
            Some(raw) => Some(
                domain::parse_timestamp(raw)
                    .ok_or_else(|| ExportError::Timestamp(raw.to_string()))?,
            ),
            None => None,
        };

        Ok(Reading {
            id: row.id,
            timestamp,
            ph: Measurement::from_option(row.ph),
            ec: Measurement::from_option(row.ec),
            tds: Measurement::from_option(row.tds),
            dissolved_oxygen: Measurement::from_option(row.dissolved_oxygen),
            temp: Measurement::from_option(row.temp),
            arsenic: row.arsenic,
            barium: row.barium,
            lat: row.lat,
            lon: row.lon,
            period_id: row.period_id,
        })
    }
}

/// render readings as a csv document with a header row
pub fn to_csv(readings: &[Reading]) -> Result<String, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if readings.is_empty() {
        // serde only emits the header alongside the first record
        writer.write_record([
            "id", "timestamp", "period_id", "pH", "EC", "TDS", "DO", "Temp", "Arsenic", "Barium",
            "Lat", "Lon",
        ])?;
    }
    for reading in readings {
        writer.serialize(ExportRow::from(reading))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Buffer(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ExportError::Buffer(e.to_string()))
}

/// parse a document produced by `to_csv`
pub fn parse_csv(data: &str) -> Result<Vec<Reading>, ExportError> {
    let mut reader = csv::Reader::from_reader(data.as_bytes());
    reader
        .deserialize::<ExportRow>()
        .map(|row| Reading::try_from(row?))
        .collect()
}

/// attachment file name for a period export
pub fn file_name(period_id: i64) -> String {
    format!("period_{}.csv", period_id)
}
