//! ==============================================================================
//! store.rs - shared reading store and the history collaborator contract
//! ==============================================================================
//!
//! purpose:
//!     `ReadingStore` owns the "latest reading" slot and fronts the durable
//!     history. the history itself sits behind `HistoryStore` so the sqlite
//!     implementation (sqlite.rs) can be swapped in tests.
//!
//! locking:
//!     the latest slot is a short parking_lot lock held only for the swap.
//!     no lock is held while the history store is awaited.
//!
//! ==============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use parking_lot::RwLock;

use crate::domain::{Period, Reading};
use crate::error::StoreError;

/// append-only durable storage for readings and periods
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// insert a reading, returning its row id
    async fn append_reading(&self, reading: &Reading) -> Result<i64, StoreError>;

    /// up to `limit` readings, newest first
    async fn recent_readings(&self, limit: u32) -> Result<Vec<Reading>, StoreError>;

    /// insert a period with a caller-assigned id
    async fn create_period(&self, period: &Period) -> Result<(), StoreError>;

    async fn close_period(&self, id: i64, end_time: NaiveDateTime) -> Result<(), StoreError>;

    /// all periods, newest first
    async fn list_periods(&self) -> Result<Vec<Period>, StoreError>;

    async fn period(&self, id: i64) -> Result<Option<Period>, StoreError>;

    /// readings tagged with `id`, oldest first
    async fn period_readings(&self, id: i64) -> Result<Vec<Reading>, StoreError>;

    /// the period without an end time, if one was left open
    async fn open_period(&self) -> Result<Option<Period>, StoreError>;

    /// highest period id ever assigned, 0 when there are none
    async fn max_period_id(&self) -> Result<i64, StoreError>;
}

/// single owner of the latest-reading slot
#[derive(Clone)]
pub struct ReadingStore {
    latest: Arc<RwLock<Option<Arc<Reading>>>>,
    history: Arc<dyn HistoryStore>,
}

impl ReadingStore {
    pub fn new(history: Arc<dyn HistoryStore>) -> Self {
        Self { latest: Arc::new(RwLock::new(None)), history }
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    pub fn set_latest(&self, reading: Reading) {
        *self.latest.write() = Some(Arc::new(reading));
    }

    /// most recent reading, or an empty one before the first ingest
    pub fn latest(&self) -> Reading {
        self.latest
            .read()
            .as_deref()
            .cloned()
            .unwrap_or_default()
    }

    /// persist a reading and return it with its row id filled in
    pub async fn persist(&self, mut reading: Reading) -> Result<Reading, StoreError> {
        let id = self.history.append_reading(&reading).await?;
        reading.id = Some(id);
        Ok(reading)
    }

    /// up to `limit` most recent readings in chronological order
    pub async fn recent(&self, limit: u32) -> Result<Vec<Reading>, StoreError> {
        let mut readings = self.history.recent_readings(limit).await?;
        readings.reverse();
        Ok(readings)
    }
}
