//! ==============================================================================
//! period.rs - collection-period state machine
//! ==============================================================================
//!
//! purpose:
//!     brackets readings into named collection periods. at most one period is
//!     active system-wide; readings persisted while it is active carry its id.
//!
//! states:
//!
//!          start()                  row written
//!     Idle ───────> Starting(p) ─────────────────> Active(p)
//!       ^               │ write failed                 │ stop()
//!       │               └──────────────> Idle          ▼
//!       └──────────────────────────────────────── Stopping(p)
//!                        row closed                    │ write failed
//!                                                      └──> Active(p)
//!
//!     start() while Starting/Active/Stopping -> Conflict { active_id }
//!     stop() while Idle/Starting/Stopping    -> NotActive
//!
//! tagging:
//!     `current()` reports an id only once its row exists (Active, Stopping).
//!     readings ingested while a start is in flight stay untagged, so they
//!     never reference a period row that is missing or rolled back.
//!
//! locking:
//!     the transition happens under the tracker lock; the store write happens
//!     after it is released. a failed write rolls the transition back.
//!
//! ==============================================================================

use std::sync::Arc;

use chrono::NaiveDateTime;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info};

use crate::domain::{self, Period};
use crate::error::{PeriodError, StoreError};
use crate::store::HistoryStore;

#[derive(Debug, Clone, PartialEq)]
pub enum PeriodState {
    Idle,
    /// row insert pending
    Starting(Period),
    Active(Period),
    /// end time write pending
    Stopping(Period),
}

impl PeriodState {
    /// the period this state refers to, whether or not it is tagging yet
    fn period(&self) -> Option<&Period> {
        match self {
            PeriodState::Idle => None,
            PeriodState::Starting(p) | PeriodState::Active(p) | PeriodState::Stopping(p) => Some(p),
        }
    }
}

struct TrackerInner {
    state: PeriodState,
    /// ids are never reused, even after a failed start
    next_id: i64,
}

/// what `/periods/status` reports
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodStatus {
    pub active: bool,
    pub id: Option<i64>,
    pub name: Option<String>,
    #[serde(with = "domain::optional_timestamp")]
    pub start_time: Option<NaiveDateTime>,
}

/// single owner of the active-period slot
#[derive(Clone)]
pub struct PeriodTracker {
    inner: Arc<Mutex<TrackerInner>>,
    history: Arc<dyn HistoryStore>,
}

impl PeriodTracker {
    /// idle tracker for an empty store
    pub fn new(history: Arc<dyn HistoryStore>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TrackerInner { state: PeriodState::Idle, next_id: 1 })),
            history,
        }
    }

    /// tracker seeded from the store, adopting a period left open before a restart
    pub async fn restore(history: Arc<dyn HistoryStore>) -> Result<Self, StoreError> {
        let next_id = history.max_period_id().await? + 1;
        let state = match history.open_period().await? {
            Some(period) => {
                info!(period_id = period.id, name = %period.name, "resuming open collection period");
                PeriodState::Active(period)
            }
            None => PeriodState::Idle,
        };

        Ok(Self {
            inner: Arc::new(Mutex::new(TrackerInner { state, next_id })),
            history,
        })
    }

    /// id new readings are tagged with; only periods whose row exists
    pub fn current(&self) -> Option<i64> {
        match &self.inner.lock().state {
            PeriodState::Active(period) | PeriodState::Stopping(period) => Some(period.id),
            PeriodState::Idle | PeriodState::Starting(_) => None,
        }
    }

    pub fn state(&self) -> PeriodState {
        self.inner.lock().state.clone()
    }

    pub fn status(&self) -> PeriodStatus {
        match &self.inner.lock().state {
            PeriodState::Active(period) | PeriodState::Stopping(period) => PeriodStatus {
                active: true,
                id: Some(period.id),
                name: Some(period.name.clone()),
                start_time: Some(period.start_time),
            },
            PeriodState::Idle | PeriodState::Starting(_) => {
                PeriodStatus { active: false, id: None, name: None, start_time: None }
            }
        }
    }

    pub async fn start(
        &self,
        name: Option<String>,
        notes: Option<String>,
    ) -> Result<Period, PeriodError> {
        let start_time = domain::now();

        let period = {
            let mut inner = self.inner.lock();
            if let Some(active) = inner.state.period() {
                return Err(PeriodError::Conflict { active_id: active.id });
            }

            let id = inner.next_id;
            inner.next_id += 1;

            let period = Period {
                id,
                name: name
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| domain::default_period_name(&start_time)),
                start_time,
                end_time: None,
                notes: notes.unwrap_or_default(),
            };
            inner.state = PeriodState::Starting(period.clone());
            period
        };

        let written = self.history.create_period(&period).await;

        let mut inner = self.inner.lock();
        if let Err(e) = written {
            error!(period_id = period.id, error = %e, "failed to persist period start");
            inner.state = PeriodState::Idle;
            return Err(e.into());
        }
        inner.state = PeriodState::Active(period.clone());
        drop(inner);

        info!(period_id = period.id, name = %period.name, "collection period started");
        Ok(period)
    }

    pub async fn stop(&self) -> Result<Period, PeriodError> {
        let end_time = domain::now();

        let active = {
            let mut inner = self.inner.lock();
            let active = match &inner.state {
                PeriodState::Active(period) => period.clone(),
                _ => return Err(PeriodError::NotActive),
            };
            inner.state = PeriodState::Stopping(active.clone());
            active
        };

        let written = self.history.close_period(active.id, end_time).await;

        let mut inner = self.inner.lock();
        if let Err(e) = written {
            error!(period_id = active.id, error = %e, "failed to persist period stop");
            inner.state = PeriodState::Active(active);
            return Err(e.into());
        }
        inner.state = PeriodState::Idle;
        drop(inner);

        let stopped = Period { end_time: Some(end_time.max(active.start_time)), ..active };
        info!(period_id = stopped.id, "collection period stopped");
        Ok(stopped)
    }
}
