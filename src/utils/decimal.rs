//! Decimal arithmetic utilities for financial calculations.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Tolerance for equality tests on monetary quantities.
///
/// A position whose quantity falls to or below this is considered fully
/// closed; an order whose executed quantity reaches `quantity - EPSILON` is
/// considered fully filled.
pub const EPSILON: Decimal = dec!(0.00000001);

/// Format a value as a fixed-point decimal string with 8 fractional digits,
/// the precision the exchange wire format expects.
pub fn fixed_8(value: Decimal) -> String {
    format!("{:.8}", value.round_dp(8))
}

/// Round a decimal to a specific number of decimal places.
pub fn round_to_precision(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp(decimals)
}

/// Safe division that returns zero if the divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}
