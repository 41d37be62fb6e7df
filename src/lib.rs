//! # Divergence Hedger
//!
//! Keeps a spot inventory quoted in local fiat neutral against a futures
//! hedge on a second venue, trading on the divergence between the futures
//! price converted into fiat and the spot price.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Venue traits, paper venue and public order book feeds
//! - `signal`: Divergence, rolling statistics and the observation store
//! - `strategy`: Inventory targets, taker/maker execution and the control loop
//! - `ledger`: Position resolution and reconciliation
//! - `persistence`: Position cache and trade journal
//! - `utils`: Shared utilities and decimal arithmetic

pub mod config;
pub mod error;
pub mod exchange;
pub mod ledger;
pub mod persistence;
pub mod signal;
pub mod strategy;
pub mod utils;

pub use config::Config;
pub use error::HedgeError;
