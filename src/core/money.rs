use rust_decimal::{Decimal, RoundingStrategy};

use super::error::SimulationError;

/// Significant digits kept on every intermediate multiplication and division.
pub const WORKING_PRECISION: u32 = 12;

/// Decimal places kept on stored amounts.
pub const MONEY_SCALE: u32 = 2;

/// Rounds to pennies, half away from zero, always carrying two places.
pub fn round_money(value: Decimal) -> Decimal {
    let mut rounded =
        value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MONEY_SCALE);
    rounded
}

/// Rounds an intermediate to the working precision, half away from zero.
pub(crate) fn working(value: Decimal) -> Decimal {
    value
        .round_sf_with_strategy(WORKING_PRECISION, RoundingStrategy::MidpointAwayFromZero)
        .unwrap_or(value)
}

pub(crate) fn mul(a: Decimal, b: Decimal) -> Result<Decimal, SimulationError> {
    a.checked_mul(b)
        .map(working)
        .ok_or(SimulationError::Overflow)
}

/// A zero divisor is reported as overflow; rule-set validation rejects the
/// configurations that could produce one.
pub(crate) fn div(a: Decimal, b: Decimal) -> Result<Decimal, SimulationError> {
    a.checked_div(b)
        .map(working)
        .ok_or(SimulationError::Overflow)
}

/// Exact addition that fails instead of panicking past `Decimal::MAX`.
pub(crate) fn add(a: Decimal, b: Decimal) -> Result<Decimal, SimulationError> {
    a.checked_add(b).ok_or(SimulationError::Overflow)
}

pub(crate) fn floor_zero(value: Decimal) -> Decimal {
    value.max(Decimal::ZERO)
}

/// Rounds a gross withdrawal to pennies without letting it exceed `balance`.
pub(crate) fn clamp_gross(target: Decimal, balance: Decimal) -> Decimal {
    round_money(target.min(balance)).min(balance)
}
