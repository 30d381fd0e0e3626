//! ==============================================================================
//! service.rs - ingestion pipeline and shared component handles
//! ==============================================================================
//!
//! purpose:
//!     ties the components together. every handle inside is an Arc, so the
//!     service is cloned freely into axum handlers and background tasks.
//!
//! ingest flow:
//!
//!     raw bytes ─> normalizer ─> estimator gateway ─> tag with current period
//!                                                       │
//!                      latest slot <────────────────────┤
//!                      history store (append) <─────────┘
//!                                │ ok
//!                                ▼
//!                      broadcast hub: update
//!
//! persistence failure:
//!     the latest slot has already been replaced, the caller gets an error and
//!     no update is broadcast. viewers are only prompted after a confirmed write.
//!
//! ==============================================================================

use std::sync::Arc;

use rand::Rng;
use serde::Serialize;
use tracing::{error, info};

use crate::broadcast::{BroadcastHub, Notification};
use crate::domain::{self, Measurement, Period, Reading};
use crate::error::{IngestError, PeriodError, StoreError};
use crate::estimator::EstimatorGateway;
use crate::normalizer;
use crate::period::PeriodTracker;
use crate::store::{HistoryStore, ReadingStore};

/// `/periods/:id` payload
#[derive(Debug, Clone, Serialize)]
pub struct PeriodDetail {
    pub period: Period,
    pub readings: Vec<Reading>,
    pub has_coordinates: bool,
}

#[derive(Clone)]
pub struct TelemetryService {
    pub readings: ReadingStore,
    pub periods: PeriodTracker,
    pub hub: BroadcastHub,
    pub estimators: EstimatorGateway,
    show_sensor_data: bool,
}

impl TelemetryService {
    pub fn new(
        readings: ReadingStore,
        periods: PeriodTracker,
        hub: BroadcastHub,
        estimators: EstimatorGateway,
    ) -> Self {
        Self { readings, periods, hub, estimators, show_sensor_data: false }
    }

    /// build every component over one history store, resuming an open period
    pub async fn open(
        history: Arc<dyn HistoryStore>,
        estimators: EstimatorGateway,
    ) -> Result<Self, StoreError> {
        let periods = PeriodTracker::restore(history.clone()).await?;
        Ok(Self::new(ReadingStore::new(history), periods, BroadcastHub::new(), estimators))
    }

    /// log each stored reading at info level
    pub fn with_sensor_logging(mut self, enabled: bool) -> Self {
        self.show_sensor_data = enabled;
        self
    }

    /// normalize a raw envelope and run it through the pipeline
    pub async fn ingest(&self, raw: &[u8]) -> Result<Reading, IngestError> {
        let reading = normalizer::normalize(raw)?;
        Ok(self.record(reading).await?)
    }

    /// enrich, store and announce an already-normalized reading
    pub async fn record(&self, reading: Reading) -> Result<Reading, StoreError> {
        let mut reading = self.estimators.estimate(reading);
        reading.period_id = self.periods.current();

        self.readings.set_latest(reading.clone());

        let stored = match self.readings.persist(reading).await {
            Ok(stored) => stored,
            Err(e) => {
                error!(error = %e, "failed to persist reading, update not broadcast");
                return Err(e);
            }
        };

        if self.show_sensor_data {
            info!(
                id = ?stored.id,
                period_id = ?stored.period_id,
                ph = ?stored.ph.value(),
                ec = ?stored.ec.value(),
                tds = ?stored.tds.value(),
                dissolved_oxygen = ?stored.dissolved_oxygen.value(),
                temp = ?stored.temp.value(),
                arsenic = ?stored.arsenic,
                barium = ?stored.barium,
                "reading stored"
            );
        }

        let delivered = self.hub.notify(Notification::Update);
        info!(subscribers = delivered, "update broadcast");
        Ok(stored)
    }

    /// latest reading with a timestamp filled in if it somehow lacks one
    pub fn latest(&self) -> Reading {
        let mut reading = self.readings.latest();
        if !reading.is_empty() && reading.timestamp.is_none() {
            reading.timestamp = Some(domain::now());
        }
        reading
    }

    pub async fn period_detail(&self, id: i64) -> Result<PeriodDetail, PeriodError> {
        let history = self.readings.history();
        let period = history.period(id).await?.ok_or(PeriodError::NotFound(id))?;
        let readings = history.period_readings(id).await?;
        let has_coordinates = readings.iter().any(Reading::has_coordinates);
        Ok(PeriodDetail { period, readings, has_coordinates })
    }
}

/// a plausible random reading for exercising dashboards without a sensor
pub fn synthesize<R: Rng>(rng: &mut R) -> Reading {
    fn round(value: f64, places: i32) -> f64 {
        let factor = 10f64.powi(places);
        (value * factor).round() / factor
    }

    let mut reading = Reading {
        timestamp: Some(domain::now()),
        ph: Measurement::Value(round(rng.gen_range(6.0..9.0), 2)),
        ec: Measurement::Value(round(rng.gen_range(0.5..1.5), 2)),
        tds: Measurement::Value(round(rng.gen_range(0.1..0.5), 2)),
        dissolved_oxygen: Measurement::Value(round(rng.gen_range(-2.0..2.0), 2)),
        temp: Measurement::Value(round(rng.gen_range(10.0..30.0), 2)),
        ..Default::default()
    };

    if rng.gen_bool(0.5) {
        reading.lat = Some(format!("{:.6}", rng.gen_range(30.0f64..45.0)));
        reading.lon = Some(format!("{:.6}", rng.gen_range(-120.0f64..-70.0)));
    }

    reading
}
