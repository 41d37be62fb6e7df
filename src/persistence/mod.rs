//! Local persistence.
//!
//! - Position cache: JSON file, the fallback when a venue cannot report positions
//! - Trade journal: SQLite history of executed trades

pub mod position_cache;
pub mod trade_journal;

pub use position_cache::{CachedPosition, JsonPositionCache, PositionStore};
pub use trade_journal::{TradeJournal, TradeRecord};
