//! ==============================================================================
//! lib.rs - water-quality telemetry hub
//! ==============================================================================
//!
//! purpose:
//!     ingests lora sensor messages, derives trace-metal estimates, keeps the
//!     latest reading and the stored history queryable, brackets readings
//!     into collection periods and pushes live updates to dashboards.
//!
//! modules, leaves first:
//!     - normalizer: raw envelope -> typed `domain::Reading`
//!     - estimator: arsenic / barium estimator gateway
//!     - period: collection-period state machine
//!     - store / sqlite: latest slot and durable history
//!     - broadcast: subscriber fan-out and heartbeat
//!     - export: period csv
//!     - service: the ingest pipeline over all of the above
//!     - server: axum routes
//!
//! ==============================================================================

pub mod broadcast;
pub mod config;
pub mod domain;
pub mod error;
pub mod estimator;
pub mod export;
pub mod logging;
pub mod normalizer;
pub mod period;
pub mod server;
pub mod service;
pub mod sqlite;
pub mod store;

pub use config::HubConfig;
pub use domain::{Measurement, Period, Reading};
pub use service::TelemetryService;
