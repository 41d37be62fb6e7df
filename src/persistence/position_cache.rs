//! JSON file cache of the last known position per symbol.
//!
//! Shared between hedger and maker processes. Every write replaces the whole
//! file through a temporary file and a rename, so readers never see a torn file.
//! Entries are decoded one at a time: an entry that cannot be read is skipped
//! and carried over untouched on the next write.

use crate::error::HedgeError;
use crate::exchange::PositionSide;
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Cached position entry, stored as `{"q": .., "side": .., "time": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedPosition {
    #[serde(rename = "q")]
    pub quantity: Decimal,
    pub side: PositionSide,
    #[serde(rename = "time")]
    pub updated_at: DateTime<Utc>,
}

impl CachedPosition {
    pub fn new(quantity: Decimal) -> Self {
        Self {
            quantity,
            side: PositionSide::from_quantity(quantity),
            updated_at: Utc::now(),
        }
    }

    /// Decode one stored entry. `side` is derived from `q`, and a missing or
    /// naive `time` is accepted.
    fn decode(value: &Value) -> Result<Self, HedgeError> {
        #[derive(Deserialize)]
        struct Stored {
            q: Decimal,
            #[serde(default)]
            time: Option<String>,
        }

        let stored = Stored::deserialize(value)?;
        Ok(Self {
            quantity: stored.q,
            side: PositionSide::from_quantity(stored.q),
            updated_at: stored.time.as_deref().map(parse_time).unwrap_or_default(),
        })
    }
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return at.with_timezone(&Utc);
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|at| at.and_utc())
        .unwrap_or_default()
}

/// Durable fallback for positions the venue cannot report.
#[cfg_attr(test, mockall::automock)]
pub trait PositionStore: Send + Sync {
    fn read(&self, symbol: &str) -> Result<Option<CachedPosition>, HedgeError>;

    /// Overwrite the entry for `symbol`; other symbols are preserved.
    fn write(&self, symbol: &str, quantity: Decimal) -> Result<CachedPosition, HedgeError>;
}

/// [`PositionStore`] backed by one JSON file.
#[derive(Debug, Clone)]
pub struct JsonPositionCache {
    path: PathBuf,
}

impl JsonPositionCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every readable entry, keyed by upper-case symbol.
    pub fn entries(&self) -> Result<BTreeMap<String, CachedPosition>, HedgeError> {
        let raw = self.raw_entries()?;
        Ok(raw
            .iter()
            .filter_map(|(symbol, value)| match CachedPosition::decode(value) {
                Ok(entry) => Some((symbol.clone(), entry)),
                Err(e) => {
                    warn!(%symbol, error = %e, "Skipping unreadable cache entry");
                    None
                }
            })
            .collect())
    }

    /// File contents as a JSON object. A missing file is empty.
    fn raw_entries(&self) -> Result<BTreeMap<String, Value>, HedgeError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{}.tmp", std::process::id()));
        PathBuf::from(name)
    }
}

impl PositionStore for JsonPositionCache {
    fn read(&self, symbol: &str) -> Result<Option<CachedPosition>, HedgeError> {
        let symbol = symbol.to_uppercase();
        match self.raw_entries()?.get(&symbol) {
            Some(value) => CachedPosition::decode(value).map(Some),
            None => Ok(None),
        }
    }

    fn write(&self, symbol: &str, quantity: Decimal) -> Result<CachedPosition, HedgeError> {
        let mut entries = match fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str::<BTreeMap<String, Value>>(&raw).unwrap_or_else(|e| {
                warn!(path = ?self.path, error = %e, "Position cache is not a JSON object, starting fresh");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        let entry = CachedPosition::new(quantity);
        entries.insert(symbol.to_uppercase(), serde_json::to_value(&entry)?);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.temp_path();
        fs::write(&tmp, serde_json::to_vec(&entries)?)?;
        fs::rename(&tmp, &self.path)?;

        debug!(%symbol, quantity = %entry.quantity, side = ?entry.side, "Position cached");
        Ok(entry)
    }
}
