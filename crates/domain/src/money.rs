//! Fixed-point monetary amounts.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Number of fractional digits kept after rounding a derived amount.
pub const MONEY_SCALE: u32 = 2;

/// A monetary amount backed by a fixed-point decimal.
///
/// Amounts are never represented as binary floating point, so summing line
/// totals or applying a rate cannot drift by fractions of a cent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    /// Zero amount.
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Wraps a decimal amount as-is.
    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// Creates an amount from minor units (e.g. `1999` → `19.99`).
    pub fn from_cents(cents: i64) -> Self {
        Self(Decimal::new(cents, MONEY_SCALE))
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self::ZERO
    }

    /// Returns the underlying decimal.
    pub fn amount(&self) -> Decimal {
        self.0
    }

    /// Returns true if the amount is strictly greater than zero.
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Returns true if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// Returns true if the amount has no digits beyond whole cents.
    pub fn is_whole_cents(&self) -> bool {
        self.0.normalize().scale() <= MONEY_SCALE
    }

    /// Multiplies by a quantity, saturating at the representable range.
    pub fn multiply(&self, quantity: u32) -> Money {
        Money(self.0.saturating_mul(Decimal::from(quantity)))
    }

    /// Multiplies by a quantity, or `None` on overflow.
    pub fn checked_multiply(&self, quantity: u32) -> Option<Money> {
        self.0.checked_mul(Decimal::from(quantity)).map(Money)
    }

    /// Adds two amounts, or `None` on overflow.
    pub fn checked_add(&self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    /// Applies a rate (e.g. `0.08` for 8 %) and rounds to cents.
    pub fn apply_rate(&self, rate: Decimal) -> Money {
        Money(self.0.saturating_mul(rate)).round()
    }

    /// Rounds to two decimal places, half away from zero.
    pub fn round(&self) -> Money {
        Money(
            self.0
                .round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero),
        )
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim()).map(Money)
    }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self {
        Self(amount)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0.saturating_sub(rhs.0))
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::ops::SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cents() {
        assert_eq!(Money::from_cents(1999).to_string(), "19.99");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
        assert_eq!(Money::from_cents(-1234).to_string(), "-12.34");
    }

    #[test]
    fn test_parse() {
        let money: Money = "25.00".parse().unwrap();
        assert_eq!(money, Money::from_cents(2500));
        assert!("ten dollars".parse::<Money>().is_err());
    }

    #[test]
    fn test_arithmetic() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(250);

        assert_eq!(a + b, Money::from_cents(1250));
        assert_eq!(a - b, Money::from_cents(750));
        assert_eq!(a.multiply(3), Money::from_cents(3000));
    }

    #[test]
    fn test_apply_rate_rounds_half_away_from_zero() {
        let rate = Decimal::new(8, 2);
        assert_eq!(Money::from_cents(5500).apply_rate(rate), Money::from_cents(440));
        // 6.25 * 0.1 = 0.625
        assert_eq!(
            Money::from_cents(625).apply_rate(Decimal::new(1, 1)),
            Money::from_cents(63)
        );
    }

    #[test]
    fn test_repeated_addition_does_not_drift() {
        let dime = Money::from_cents(10);
        let total: Money = std::iter::repeat_n(dime, 1000).sum();
        assert_eq!(total, Money::from_cents(10_000));
    }

    #[test]
    fn test_overflow_is_reported_or_saturated() {
        let huge = Money::new(Decimal::MAX);

        assert_eq!(huge.checked_multiply(2), None);
        assert_eq!(huge.checked_add(Money::from_cents(1)), None);
        assert_eq!(
            Money::from_cents(250).checked_multiply(4),
            Some(Money::from_cents(1000))
        );

        assert_eq!(huge.multiply(2), huge);
        assert_eq!(huge + huge, huge);
        assert_eq!(huge.apply_rate(Decimal::TWO), huge.round());
    }

    #[test]
    fn test_whole_cents() {
        assert!(Money::from_cents(1999).is_whole_cents());
        assert!("10.500".parse::<Money>().unwrap().is_whole_cents());
        assert!(!"10.005".parse::<Money>().unwrap().is_whole_cents());
    }

    #[test]
    fn test_sign_predicates() {
        assert!(Money::from_cents(1).is_positive());
        assert!(Money::zero().is_zero());
        assert!(Money::from_cents(-1).is_negative());
        assert!(!Money::zero().is_positive());
    }

    #[test]
    fn test_serializes_as_string() {
        let json = serde_json::to_string(&Money::from_cents(6939)).unwrap();
        assert_eq!(json, "\"69.39\"");
    }
}
