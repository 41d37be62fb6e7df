//! Divergence signal between the two venues.
//!
//! `z = x - y`, where `x` is the derivatives mid converted into fiat via the
//! stable/fiat cross and `y` is the spot mid. Trading is only considered while
//! `z` sits outside the band `mean ± k·std` of its recent history.

pub mod divergence;
pub mod observations;
pub mod stats;

pub use divergence::{Divergence, DivergenceSource, PriceSignal, SignalMarkets};
pub use observations::{
    DivergenceSample, Moments, ObservationRecorder, ObservationStore, SqliteObservationStore,
};
pub use stats::{BurstConfig, SignalBand, SignalDirection, StatsEstimator, WindowStats};
