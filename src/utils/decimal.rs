//! Decimal arithmetic utilities for prices and quantities.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Round down (towards negative infinity) to `decimals` places.
///
/// Used for both order quantities and prices sent to venues; never rounds up
/// into more size or a worse price than requested.
pub fn floor_to_precision(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp_with_strategy(decimals, RoundingStrategy::ToNegativeInfinity)
}

/// Lossy conversion for the statistics layer.
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}
