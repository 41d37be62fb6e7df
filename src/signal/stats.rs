//! Rolling statistics of the divergence and the no-trade band derived from them.

use super::divergence::DivergenceSource;
use super::observations::ObservationStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Mean, standard deviation and sample count of `z` over a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub mean: f64,
    pub std_dev: f64,
    pub samples: u64,
}

impl WindowStats {
    /// Nothing usable was observed.
    pub const EMPTY: WindowStats = WindowStats {
        mean: 0.0,
        std_dev: 0.0,
        samples: 0,
    };

    /// Unbiased estimate from aggregate moments `E[d]`, `E[d²]` over `count` rows.
    pub fn from_moments(mean: f64, mean_sq: f64, count: u64) -> Self {
        if count < 2 {
            return WindowStats {
                mean,
                std_dev: 0.0,
                samples: count,
            };
        }
        let n = count as f64;
        let variance = (mean_sq - mean * mean).max(0.0) * n / (n - 1.0);
        WindowStats {
            mean,
            std_dev: variance.sqrt(),
            samples: count,
        }
    }

    /// Statistics of a live burst.
    ///
    /// Two samples use the population deviation, three or more the sample deviation.
    pub fn from_samples(samples: &[f64]) -> Self {
        let count = samples.len();
        if count < 2 {
            return Self::EMPTY;
        }
        let n = count as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let sum_sq: f64 = samples.iter().map(|s| (s - mean).powi(2)).sum();
        let divisor = if count == 2 { n } else { n - 1.0 };
        WindowStats {
            mean,
            std_dev: (sum_sq / divisor).sqrt(),
            samples: count as u64,
        }
    }

    /// A zero deviation carries no signal.
    pub fn is_actionable(&self) -> bool {
        self.std_dev > 0.0
    }
}

/// Which edge of the band the live divergence has crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDirection {
    /// `z > upper`: spot is cheap relative to the derivatives-implied price.
    Above,
    /// `z < lower`: spot is rich.
    Below,
}

/// No-trade band `(mean - k·std, mean + k·std)`. Rebuilt on every refresh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalBand {
    pub mean: f64,
    pub std_dev: f64,
    pub k: f64,
    pub lower: f64,
    pub upper: f64,
}

impl SignalBand {
    pub fn new(stats: &WindowStats, k: f64) -> Self {
        SignalBand {
            mean: stats.mean,
            std_dev: stats.std_dev,
            k,
            lower: stats.mean - k * stats.std_dev,
            upper: stats.mean + k * stats.std_dev,
        }
    }

    /// Open interval test; the edges themselves are outside the band.
    pub fn contains(&self, z: f64) -> bool {
        self.lower < z && z < self.upper
    }

    pub fn direction(&self, z: f64) -> Option<SignalDirection> {
        if z > self.upper {
            Some(SignalDirection::Above)
        } else if z < self.lower {
            Some(SignalDirection::Below)
        } else {
            None
        }
    }
}

/// Live sampling used when the observation store cannot answer.
#[derive(Debug, Clone, Copy)]
pub struct BurstConfig {
    pub samples: usize,
    pub delay: Duration,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            samples: 10,
            delay: Duration::from_millis(200),
        }
    }
}

/// Computes [`WindowStats`] from the observation store, or from a live burst.
pub struct StatsEstimator {
    store: Option<Arc<dyn ObservationStore>>,
    burst: BurstConfig,
}

impl StatsEstimator {
    pub fn new(store: Option<Arc<dyn ObservationStore>>, burst: BurstConfig) -> Self {
        Self { store, burst }
    }

    /// Statistics of `z` over the trailing `window_minutes`.
    ///
    /// Never fails; returns [`WindowStats::EMPTY`] when fewer than two samples exist.
    pub async fn window_stats(
        &self,
        source: &dyn DivergenceSource,
        window_minutes: u32,
    ) -> WindowStats {
        if let Some(store) = &self.store {
            let end = Utc::now().timestamp();
            let start = end - i64::from(window_minutes) * 60;
            match store.window_moments(start, end) {
                Ok(m) if m.count >= 2 => {
                    let stats = WindowStats::from_moments(m.mean, m.mean_sq, m.count);
                    debug!(
                        mean = stats.mean,
                        std = stats.std_dev,
                        n = stats.samples,
                        "Window stats from observation store"
                    );
                    return stats;
                }
                Ok(m) => {
                    info!(count = m.count, "Too few stored observations, sampling live");
                }
                Err(e) => {
                    warn!(error = %e, "Observation store unavailable, sampling live");
                }
            }
        }

        self.burst_stats(source).await
    }

    async fn burst_stats(&self, source: &dyn DivergenceSource) -> WindowStats {
        let mut samples = Vec::with_capacity(self.burst.samples);
        for i in 0..self.burst.samples {
            if i > 0 {
                tokio::time::sleep(self.burst.delay).await;
            }
            match source.live_diff().await {
                Ok(d) => samples.push(d.z_value()),
                Err(e) => debug!(error = %e, "Burst sample skipped"),
            }
        }

        let stats = WindowStats::from_samples(&samples);
        info!(
            mean = stats.mean,
            std = stats.std_dev,
            n = stats.samples,
            "Window stats from live burst"
        );
        stats
    }
}
