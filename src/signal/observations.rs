//! Persisted divergence observations.
//!
//! The `obs` table is appended to by the recorder and aggregated by
//! [`StatsEstimator`](super::StatsEstimator) over a trailing window.

use super::divergence::DivergenceSource;
use crate::error::HedgeError;
use crate::utils::decimal::to_f64;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Aggregate moments of `diff` over a time range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moments {
    pub mean: f64,
    pub mean_sq: f64,
    pub count: u64,
}

/// One stored observation.
#[derive(Debug, Clone, PartialEq)]
pub struct DivergenceSample {
    pub timestamp: DateTime<Utc>,
    pub x: f64,
    pub y: f64,
    pub diff: f64,
}

/// Time-indexed observation storage.
#[cfg_attr(test, mockall::automock)]
pub trait ObservationStore: Send + Sync {
    /// Moments over `[start, end]`, both in unix seconds.
    fn window_moments(&self, start: i64, end: i64) -> Result<Moments, HedgeError>;

    fn record(&self, sample: &DivergenceSample) -> Result<(), HedgeError>;
}

/// SQLite-backed observation store.
pub struct SqliteObservationStore {
    conn: Mutex<Connection>,
}

impl SqliteObservationStore {
    /// Open (or create) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, HedgeError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path.as_ref())?;
        Self::with_connection(conn)
    }

    /// In-memory store, used by tests.
    pub fn in_memory() -> Result<Self, HedgeError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, HedgeError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS obs (
                time INTEGER NOT NULL,
                x REAL NOT NULL,
                y REAL NOT NULL,
                diff REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_obs_time ON obs(time);
            "#,
        )?;
        debug!("Observation schema initialized");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, HedgeError> {
        self.conn
            .lock()
            .map_err(|_| HedgeError::persistence("observation store lock poisoned"))
    }
}

impl ObservationStore for SqliteObservationStore {
    fn window_moments(&self, start: i64, end: i64) -> Result<Moments, HedgeError> {
        let conn = self.lock()?;
        let (mean, mean_sq, count): (Option<f64>, Option<f64>, i64) = conn.query_row(
            "SELECT avg(diff), avg(diff * diff), count(*) FROM obs WHERE time BETWEEN ?1 AND ?2",
            params![start, end],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(Moments {
            mean: mean.unwrap_or(0.0),
            mean_sq: mean_sq.unwrap_or(0.0),
            count: count.max(0) as u64,
        })
    }

    fn record(&self, sample: &DivergenceSample) -> Result<(), HedgeError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO obs (time, x, y, diff) VALUES (?1, ?2, ?3, ?4)",
            params![sample.timestamp.timestamp(), sample.x, sample.y, sample.diff],
        )?;
        Ok(())
    }
}

/// Samples the live divergence on a fixed cadence and appends it to a store.
pub struct ObservationRecorder {
    source: Arc<dyn DivergenceSource>,
    store: Arc<dyn ObservationStore>,
    interval: Duration,
}

impl ObservationRecorder {
    pub fn new(
        source: Arc<dyn DivergenceSource>,
        store: Arc<dyn ObservationStore>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            store,
            interval,
        }
    }

    /// Take and store one sample. Returns `false` when nothing was recorded.
    pub async fn record_once(&self) -> bool {
        let divergence = match self.source.live_diff().await {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "Skipping observation");
                return false;
            }
        };

        let sample = DivergenceSample {
            timestamp: Utc::now(),
            x: to_f64(divergence.x),
            y: to_f64(divergence.y),
            diff: divergence.z_value(),
        };
        match self.store.record(&sample) {
            Ok(()) => {
                debug!(diff = sample.diff, "Observation recorded");
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to store observation");
                false
            }
        }
    }

    /// Record until `shutdown` is set.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) {
        info!(interval = ?self.interval, "Observation recorder started");
        let mut recorded = 0u64;
        while !shutdown.load(Ordering::SeqCst) {
            if self.record_once().await {
                recorded += 1;
            }
            tokio::time::sleep(self.interval).await;
        }
        info!(recorded, "Observation recorder stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::VenueError;
    use crate::signal::divergence::{Divergence, MockDivergenceSource};
    use rust_decimal_macros::dec;

    fn sample(time: i64, diff: f64) -> DivergenceSample {
        DivergenceSample {
            timestamp: DateTime::from_timestamp(time, 0).unwrap(),
            x: diff,
            y: 0.0,
            diff,
        }
    }

    #[test]
    fn test_window_moments_over_closed_interval() {
        let store = SqliteObservationStore::in_memory().unwrap();
        store.record(&sample(100, 2.0)).unwrap();
        store.record(&sample(200, 4.0)).unwrap();
        store.record(&sample(300, 6.0)).unwrap();
        store.record(&sample(301, 100.0)).unwrap();

        let m = store.window_moments(100, 300).unwrap();
        assert_eq!(m.count, 3);
        assert_eq!(m.mean, 4.0);
        assert!((m.mean_sq - 56.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_window() {
        let store = SqliteObservationStore::in_memory().unwrap();
        let m = store.window_moments(0, 1000).unwrap();
        assert_eq!(
            m,
            Moments {
                mean: 0.0,
                mean_sq: 0.0,
                count: 0
            }
        );
    }

    #[test]
    fn test_open_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("obs.db");
        let store = SqliteObservationStore::open(&path).unwrap();
        store.record(&sample(1, 1.0)).unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_recorder_stores_live_reading() {
        let store = Arc::new(SqliteObservationStore::in_memory().unwrap());
        let mut source = MockDivergenceSource::new();
        source
            .expect_live_diff()
            .times(1)
            .returning(|| Ok(Divergence::new(dec!(1500), dec!(1000))));

        let recorder =
            ObservationRecorder::new(Arc::new(source), store.clone(), Duration::from_secs(5));
        assert!(recorder.record_once().await);

        let now = Utc::now().timestamp();
        let m = store.window_moments(now - 60, now + 60).unwrap();
        assert_eq!(m.count, 1);
        assert_eq!(m.mean, 500.0);
    }

    #[tokio::test]
    async fn test_recorder_skips_unavailable_market_data() {
        let mut store = MockObservationStore::new();
        store.expect_record().never();
        let mut source = MockDivergenceSource::new();
        source
            .expect_live_diff()
            .returning(|| Err(VenueError::market_data("BTCIRT", "no bids")));

        let recorder =
            ObservationRecorder::new(Arc::new(source), Arc::new(store), Duration::from_secs(5));
        assert!(!recorder.record_once().await);
    }
}
