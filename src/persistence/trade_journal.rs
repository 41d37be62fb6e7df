//! SQLite journal of executed trades.
//!
//! Trades are buffered in memory and written in batches, plus once more at
//! shutdown. A failed flush keeps the buffer for the next attempt.

use crate::error::HedgeError;
use crate::exchange::{ExecutionRole, OrderSide};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// One executed (fully or partially) order.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub side: OrderSide,
    pub role: ExecutionRole,
    pub quantity: Decimal,
    pub price: Decimal,
    /// Terminal outcome of the order lifecycle (e.g. `FILLED`, `TIMEOUT`)
    pub outcome: String,
}

/// Buffered trade history writer.
pub struct TradeJournal {
    conn: Connection,
    buffer: Vec<TradeRecord>,
    batch_size: usize,
}

impl TradeJournal {
    /// Open (or create) the journal at `db_path`. `:memory:` works for tests.
    pub fn open<P: AsRef<Path>>(db_path: P, batch_size: usize) -> Result<Self, HedgeError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path.as_ref())?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                role TEXT NOT NULL,
                quantity TEXT NOT NULL,
                price TEXT NOT NULL,
                outcome TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trades(timestamp);
            CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol);
            "#,
        )?;

        info!("Trade journal initialized at {:?}", db_path.as_ref());
        Ok(Self {
            conn,
            buffer: Vec::new(),
            batch_size: batch_size.max(1),
        })
    }

    /// Buffer a trade, flushing once the batch is full.
    pub fn record(&mut self, trade: TradeRecord) {
        debug!(
            symbol = %trade.symbol,
            side = %trade.side,
            quantity = %trade.quantity,
            price = %trade.price,
            "Trade buffered"
        );
        self.buffer.push(trade);

        if self.buffer.len() >= self.batch_size {
            if let Err(e) = self.flush() {
                warn!(error = %e, pending = self.buffer.len(), "Trade journal flush failed");
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Write all buffered trades in one transaction. Returns how many were written.
    pub fn flush(&mut self) -> Result<usize, HedgeError> {
        if self.buffer.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        for trade in &self.buffer {
            tx.execute(
                r#"
                INSERT INTO trades (timestamp, symbol, side, role, quantity, price, outcome)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    trade.timestamp.to_rfc3339(),
                    trade.symbol,
                    trade.side.as_str(),
                    trade.role.as_str(),
                    trade.quantity.to_string(),
                    trade.price.to_string(),
                    trade.outcome,
                ],
            )?;
        }
        tx.commit()?;

        let written = self.buffer.len();
        self.buffer.clear();
        info!(written, "Trade journal flushed");
        Ok(written)
    }

    /// Most recent trades, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<TradeRecord>, HedgeError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT timestamp, symbol, side, role, quantity, price, outcome
            FROM trades
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let trades = stmt
            .query_map(params![limit as i64], |row| {
                let side: String = row.get(2)?;
                let role: String = row.get(3)?;
                Ok(TradeRecord {
                    timestamp: DateTime::parse_from_rfc3339(&row.get::<_, String>(0)?)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    symbol: row.get(1)?,
                    side: if side == "buy" {
                        OrderSide::Buy
                    } else {
                        OrderSide::Sell
                    },
                    role: if role == "maker" {
                        ExecutionRole::Maker
                    } else {
                        ExecutionRole::Taker
                    },
                    quantity: Decimal::from_str(&row.get::<_, String>(4)?).unwrap_or_default(),
                    price: Decimal::from_str(&row.get::<_, String>(5)?).unwrap_or_default(),
                    outcome: row.get(6)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(trades)
    }
}

impl Drop for TradeJournal {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, lost = self.buffer.len(), "Unflushed trades at shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trade(quantity: Decimal) -> TradeRecord {
        TradeRecord {
            timestamp: Utc::now(),
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Sell,
            role: ExecutionRole::Taker,
            quantity,
            price: dec!(70000.5),
            outcome: "FILLED".to_string(),
        }
    }

    #[test]
    fn test_buffer_flushes_at_batch_size() {
        let mut journal = TradeJournal::open(":memory:", 5).unwrap();
        for i in 1..=4 {
            journal.record(trade(Decimal::from(i)));
        }
        assert_eq!(journal.pending(), 4);
        assert!(journal.recent(10).unwrap().is_empty());

        journal.record(trade(dec!(5)));
        assert_eq!(journal.pending(), 0);
        assert_eq!(journal.recent(10).unwrap().len(), 5);
    }

    #[test]
    fn test_recent_newest_first() {
        let mut journal = TradeJournal::open(":memory:", 5).unwrap();
        journal.record(trade(dec!(1)));
        journal.record(TradeRecord {
            side: OrderSide::Buy,
            role: ExecutionRole::Maker,
            outcome: "TIMEOUT".to_string(),
            ..trade(dec!(0.25))
        });
        assert_eq!(journal.flush().unwrap(), 2);
        assert_eq!(journal.flush().unwrap(), 0);

        let recent = journal.recent(1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].quantity, dec!(0.25));
        assert_eq!(recent[0].side, OrderSide::Buy);
        assert_eq!(recent[0].role, ExecutionRole::Maker);
        assert_eq!(recent[0].price, dec!(70000.5));
        assert_eq!(recent[0].outcome, "TIMEOUT");
    }

    #[test]
    fn test_drop_flushes_pending_trades() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.db");
        {
            let mut journal = TradeJournal::open(&path, 5).unwrap();
            journal.record(trade(dec!(2)));
        }
        let journal = TradeJournal::open(&path, 5).unwrap();
        assert_eq!(journal.recent(10).unwrap().len(), 1);
    }
}
