//! ==============================================================================
//! sqlite.rs - sqlite-backed history store
//! ==============================================================================
//!
//! purpose:
//!     durable storage for readings and collection periods via sqlx.
//!
//! schema evolution:
//!     migrations are numbered and tracked in `PRAGMA user_version`. each runs
//!     once, inside its own transaction. column additions look at
//!     `pragma_table_info` first, so a database written by the legacy
//!     dashboard (columns already there, user_version still 0) upgrades
//!     without tripping over duplicate columns.
//!
//!     v1  sensor_data (id, timestamp, pH, EC, TDS, DO, Lat, Lon)
//!     v2  + Temp, Arsenic, Barium
//!     v3  periods table, sensor_data.period_id
//!
//! ==============================================================================

use std::str::FromStr;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::{Connection, FromRow};
use tracing::info;

use crate::domain::{self, Measurement, Period, Reading};
use crate::error::StoreError;
use crate::store::HistoryStore;

pub const SCHEMA_VERSION: i64 = 3;

const READING_COLUMNS: &str =
    "id, timestamp, pH, EC, TDS, DO, Temp, Arsenic, Barium, Lat, Lon, period_id";

const PERIOD_COLUMNS: &str = "id, name, start_time, end_time, notes";

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// open (creating if needed) the database file; ":memory:" is accepted
    pub async fn open(database: &str, max_connections: u32) -> Result<Self, StoreError> {
        if database == ":memory:" {
            return Self::in_memory().await;
        }

        let options = SqliteConnectOptions::new()
            .filename(database)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// private in-memory database; one connection that is never recycled
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// bring the schema up to `SCHEMA_VERSION`, returning the version found
    pub async fn migrate(&self) -> Result<i64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let found: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&mut *conn)
            .await?;

        for version in (found + 1)..=SCHEMA_VERSION {
            let mut tx = conn.begin().await?;
            apply_migration(&mut tx, version)
                .await
                .map_err(|e| StoreError::Migration { version, reason: e.to_string() })?;
            // pragma values cannot be bound
            sqlx::query(&format!("PRAGMA user_version = {}", version))
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            info!(version, "schema migrated");
        }

        Ok(found)
    }

    pub async fn schema_version(&self) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await?)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn apply_migration(conn: &mut SqliteConnection, version: i64) -> Result<(), sqlx::Error> {
    match version {
        1 => {
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS sensor_data (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    timestamp TEXT,
                    pH REAL,
                    EC REAL,
                    TDS REAL,
                    DO REAL,
                    Lat TEXT,
                    Lon TEXT
                )",
            )
            .execute(&mut *conn)
            .await?;
        }
        2 => {
            add_column(conn, "sensor_data", "Temp", "REAL").await?;
            add_column(conn, "sensor_data", "Arsenic", "REAL").await?;
            add_column(conn, "sensor_data", "Barium", "REAL").await?;
        }
        3 => {
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS periods (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    start_time TEXT NOT NULL,
                    end_time TEXT,
                    notes TEXT NOT NULL DEFAULT ''
                )",
            )
            .execute(&mut *conn)
            .await?;
            add_column(conn, "sensor_data", "period_id", "INTEGER REFERENCES periods(id)").await?;
            sqlx::query(
                "CREATE INDEX IF NOT EXISTS idx_sensor_data_period ON sensor_data(period_id)",
            )
            .execute(&mut *conn)
            .await?;
        }
        _ => {}
    }
    Ok(())
}

async fn add_column(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<(), sqlx::Error> {
    let present: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
            .bind(table)
            .bind(column)
            .fetch_one(&mut *conn)
            .await?;

    if present == 0 {
        sqlx::query(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, definition))
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

// ==============================================================================
// row mapping
// ==============================================================================

#[derive(FromRow)]
struct ReadingRow {
    id: i64,
    timestamp: Option<String>,
    #[sqlx(rename = "pH")]
    ph: Option<f64>,
    #[sqlx(rename = "EC")]
    ec: Option<f64>,
    #[sqlx(rename = "TDS")]
    tds: Option<f64>,
    #[sqlx(rename = "DO")]
    dissolved_oxygen: Option<f64>,
    #[sqlx(rename = "Temp")]
    temp: Option<f64>,
    #[sqlx(rename = "Arsenic")]
    arsenic: Option<f64>,
    #[sqlx(rename = "Barium")]
    barium: Option<f64>,
    #[sqlx(rename = "Lat")]
    lat: Option<String>,
    #[sqlx(rename = "Lon")]
    lon: Option<String>,
    period_id: Option<i64>,
}

impl From<ReadingRow> for Reading {
    fn from(row: ReadingRow) -> Self {
        Reading {
            id: Some(row.id),
            timestamp: row.timestamp.as_deref().and_then(domain::parse_timestamp),
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
        }
    }
}

#[derive(FromRow)]
struct PeriodRow {
    id: i64,
    name: String,
    start_time: String,
    end_time: Option<String>,
    notes: String,
}

impl TryFrom<PeriodRow> for Period {
    type Error = StoreError;

    fn try_from(row: PeriodRow) -> Result<Self, Self::Error> {
        let start_time = domain::parse_timestamp(&row.start_time).ok_or_else(|| {
            StoreError::Unavailable(format!("period {} has bad start time", row.id))
        })?;
        Ok(Period {
            id: row.id,
            name: row.name,
            start_time,
            end_time: row.end_time.as_deref().and_then(domain::parse_timestamp),
            notes: row.notes,
        })
    }
}

// ==============================================================================
// history store
// ==============================================================================

#[async_trait]
impl HistoryStore for SqliteStore {
    async fn append_reading(&self, reading: &Reading) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO sensor_data
                (timestamp, pH, EC, TDS, DO, Temp, Arsenic, Barium, Lat, Lon, period_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(reading.timestamp.as_ref().map(domain::format_timestamp))
        .bind(reading.ph.value())
        .bind(reading.ec.value())
        .bind(reading.tds.value())
        .bind(reading.dissolved_oxygen.value())
        .bind(reading.temp.value())
        .bind(reading.arsenic)
        .bind(reading.barium)
        .bind(reading.lat.as_deref())
        .bind(reading.lon.as_deref())
        .bind(reading.period_id)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn recent_readings(&self, limit: u32) -> Result<Vec<Reading>, StoreError> {
        let rows: Vec<ReadingRow> = sqlx::query_as(&format!(
            "SELECT {} FROM sensor_data ORDER BY id DESC LIMIT ?",
            READING_COLUMNS
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Reading::from).collect())
    }

    async fn create_period(&self, period: &Period) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO periods (id, name, start_time, end_time, notes) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(period.id)
        .bind(&period.name)
        .bind(domain::format_timestamp(&period.start_time))
        .bind(period.end_time.as_ref().map(domain::format_timestamp))
        .bind(&period.notes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn close_period(&self, id: i64, end_time: NaiveDateTime) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE periods SET end_time = ? WHERE id = ? AND end_time IS NULL")
            .bind(domain::format_timestamp(&end_time))
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Unavailable(format!("period {} is not open", id)));
        }
        Ok(())
    }

    async fn list_periods(&self) -> Result<Vec<Period>, StoreError> {
        let rows: Vec<PeriodRow> =
            sqlx::query_as(&format!("SELECT {} FROM periods ORDER BY id DESC", PERIOD_COLUMNS))
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(Period::try_from).collect()
    }

    async fn period(&self, id: i64) -> Result<Option<Period>, StoreError> {
        let row: Option<PeriodRow> =
            sqlx::query_as(&format!("SELECT {} FROM periods WHERE id = ?", PERIOD_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Period::try_from).transpose()
    }

    async fn period_readings(&self, id: i64) -> Result<Vec<Reading>, StoreError> {
        let rows: Vec<ReadingRow> = sqlx::query_as(&format!(
            "SELECT {} FROM sensor_data WHERE period_id = ? ORDER BY id ASC",
            READING_COLUMNS
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Reading::from).collect())
    }

    async fn open_period(&self) -> Result<Option<Period>, StoreError> {
        let row: Option<PeriodRow> = sqlx::query_as(&format!(
            "SELECT {} FROM periods WHERE end_time IS NULL ORDER BY id DESC LIMIT 1",
            PERIOD_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Period::try_from).transpose()
    }

    async fn max_period_id(&self) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar("SELECT COALESCE(MAX(id), 0) FROM periods")
            .fetch_one(&self.pool)
            .await?)
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    async fn migrated() -> SqliteStore {
        let store = SqliteStore::in_memory().await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    fn ts(raw: &str) -> NaiveDateTime {
        domain::parse_timestamp(raw).unwrap()
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert_eq!(store.migrate().await.unwrap(), 0);
        assert_eq!(store.migrate().await.unwrap(), SCHEMA_VERSION);
        assert_eq!(store.schema_version().await.unwrap(), SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_migrate_legacy_database() {
        // schema as the old dashboard left it: Temp already added by hand, no version
        let store = SqliteStore::in_memory().await.unwrap();
        sqlx::query(
            "CREATE TABLE sensor_data (id INTEGER PRIMARY KEY AUTOINCREMENT, timestamp TEXT,
             pH REAL, EC REAL, TDS REAL, DO REAL, Lat TEXT, Lon TEXT, Temp REAL)",
        )
        .execute(store.pool())
        .await
        .unwrap();
        sqlx::query("INSERT INTO sensor_data (timestamp, pH) VALUES ('2025-01-01 00:00:00', 7.5)")
            .execute(store.pool())
            .await
            .unwrap();

        store.migrate().await.unwrap();

        let readings = store.recent_readings(10).await.unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].ph, Measurement::Value(7.5));
        assert_eq!(readings[0].period_id, None);
    }

    #[tokio::test]
    async fn test_on_disk_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.db");
        let path = path.to_str().unwrap();

        let store = SqliteStore::open(path, 2).await.unwrap();
        store.migrate().await.unwrap();
        store
            .append_reading(&Reading { ph: Measurement::Value(6.9), ..Default::default() })
            .await
            .unwrap();
        store.pool().close().await;

        let reopened = SqliteStore::open(path, 2).await.unwrap();
        assert_eq!(reopened.migrate().await.unwrap(), SCHEMA_VERSION);
        assert_eq!(reopened.recent_readings(5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_recent_is_newest_first() {
        let store = migrated().await;
        for ph in [1.0, 2.0, 3.0] {
            store
                .append_reading(&Reading { ph: Measurement::Value(ph), ..Default::default() })
                .await
                .unwrap();
        }
        let values: Vec<_> = store
            .recent_readings(2)
            .await
            .unwrap()
            .iter()
            .map(|r| r.ph.value().unwrap())
            .collect();
        assert_eq!(values, vec![3.0, 2.0]);
    }

    #[tokio::test]
    async fn test_rejected_measurement_stored_as_null() {
        let store = migrated().await;
        let reading = Reading {
            timestamp: Some(ts("2026-10-19 10:00:00")),
            ph: Measurement::Rejected,
            ec: Measurement::Value(0.7),
            lat: Some("12.3".into()),
            lon: Some("45.6".into()),
            ..Default::default()
        };
        store.append_reading(&reading).await.unwrap();

        let back = store.recent_readings(1).await.unwrap().remove(0);
        assert_eq!(back.ph, Measurement::Missing);
        assert_eq!(back.ec, Measurement::Value(0.7));
        assert_eq!(back.timestamp, reading.timestamp);
        assert_eq!(back.lat.as_deref(), Some("12.3"));
    }

    #[tokio::test]
    async fn test_period_lifecycle_rows() {
        let store = migrated().await;
        assert_eq!(store.max_period_id().await.unwrap(), 0);

        let period = Period {
            id: 1,
            name: "Morning run".into(),
            start_time: ts("2026-10-19 08:00:00"),
            end_time: None,
            notes: "upstream of weir".into(),
        };
        store.create_period(&period).await.unwrap();
        assert_eq!(store.open_period().await.unwrap(), Some(period.clone()));

        store
            .append_reading(&Reading { period_id: Some(1), ..Default::default() })
            .await
            .unwrap();
        store.append_reading(&Reading::default()).await.unwrap();

        store.close_period(1, ts("2026-10-19 09:00:00")).await.unwrap();
        assert!(store.open_period().await.unwrap().is_none());
        assert!(store.close_period(1, ts("2026-10-19 09:30:00")).await.is_err());

        let stored = store.period(1).await.unwrap().unwrap();
        assert_eq!(stored.end_time, Some(ts("2026-10-19 09:00:00")));
        assert_eq!(store.period_readings(1).await.unwrap().len(), 1);
        assert_eq!(store.max_period_id().await.unwrap(), 1);
        assert!(store.period(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_periods_newest_first() {
        let store = migrated().await;
        for id in 1..=3 {
            store
                .create_period(&Period {
                    id,
                    name: format!("p{}", id),
                    start_time: ts("2026-10-19 08:00:00"),
                    end_time: Some(ts("2026-10-19 08:30:00")),
                    notes: String::new(),
                })
                .await
                .unwrap();
        }
        let ids: Vec<_> = store.list_periods().await.unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }
}
