//! Inventory targets for the hedge leg and permissions for the spot leg.

use crate::exchange::OrderSide;
use rust_decimal::Decimal;

/// Hedge position that offsets `held` relative to the middle of `[lower, upper]`.
///
/// Positive means the derivatives leg should be net long.
pub fn target_derivative_position(held: Decimal, lower: Decimal, upper: Decimal) -> Decimal {
    (lower + upper) / Decimal::TWO - held
}

/// `center - tolerance < position < center + tolerance`.
pub fn within_band(position: Decimal, center: Decimal, tolerance: Decimal) -> bool {
    center - tolerance < position && position < center + tolerance
}

/// Configured spot holding range of one asset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InventoryBounds {
    pub lower: Decimal,
    pub upper: Decimal,
    pub tolerance: Decimal,
}

impl InventoryBounds {
    pub fn new(lower: Decimal, upper: Decimal, tolerance: Decimal) -> Self {
        Self {
            lower,
            upper,
            tolerance,
        }
    }

    pub fn center(&self) -> Decimal {
        (self.lower + self.upper) / Decimal::TWO
    }

    pub fn target(&self, held: Decimal) -> Decimal {
        target_derivative_position(held, self.lower, self.upper)
    }

    /// Whether the hedge leg currently offsets `held` closely enough to let the
    /// spot leg trade.
    pub fn hedge_in_band(&self, hedge_position: Decimal, held: Decimal) -> bool {
        within_band(hedge_position, self.target(held), self.tolerance)
    }

    /// A spot trade of `quantity` must keep `held` inside `[lower, upper]`.
    pub fn permits(&self, side: OrderSide, held: Decimal, quantity: Decimal) -> bool {
        match side {
            OrderSide::Buy => held + quantity <= self.upper,
            OrderSide::Sell => held - quantity >= self.lower,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_target_derivative_position() {
        assert_eq!(target_derivative_position(dec!(0), dec!(-10), dec!(10)), dec!(0));
        assert_eq!(target_derivative_position(dec!(3), dec!(-10), dec!(10)), dec!(-3));
        assert_eq!(target_derivative_position(dec!(5), dec!(-10), dec!(10)), dec!(-5));
        assert_eq!(target_derivative_position(dec!(1), dec!(0), dec!(4)), dec!(1));
    }

    #[test]
    fn test_within_band_is_exclusive() {
        assert!(within_band(dec!(5), dec!(5), dec!(2)));
        assert!(!within_band(dec!(7), dec!(5), dec!(2)));
        assert!(!within_band(dec!(3), dec!(5), dec!(2)));
        assert!(within_band(dec!(6.99), dec!(5), dec!(2)));
    }

    #[test]
    fn test_spot_permissions_keep_holding_in_range() {
        let bounds = InventoryBounds::new(dec!(-10), dec!(10), dec!(2));
        assert!(bounds.permits(OrderSide::Buy, dec!(9), dec!(1)));
        assert!(!bounds.permits(OrderSide::Buy, dec!(9.5), dec!(1)));
        assert!(bounds.permits(OrderSide::Sell, dec!(-9), dec!(1)));
        assert!(!bounds.permits(OrderSide::Sell, dec!(-9.5), dec!(1)));
    }

    #[test]
    fn test_hedge_band_tracks_spot_holding() {
        let bounds = InventoryBounds::new(dec!(-10), dec!(10), dec!(2));
        assert_eq!(bounds.center(), dec!(0));
        // Holding 3 wants a -3 hedge
        assert!(bounds.hedge_in_band(dec!(-3), dec!(3)));
        assert!(bounds.hedge_in_band(dec!(-1.5), dec!(3)));
        assert!(!bounds.hedge_in_band(dec!(-1), dec!(3)));
        assert!(!bounds.hedge_in_band(dec!(0), dec!(3)));
    }
}
