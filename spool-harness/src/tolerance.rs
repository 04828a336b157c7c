//! Tolerance bands for comparing observed on-chain values with expectations.

use std::fmt;

use alloy::primitives::U256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EntityKey, Violation};

const PPM: u64 = 1_000_000;

/// A relative bound in parts per million of the expected change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tolerance(u32);

impl Tolerance {
    pub const EXACT: Tolerance = Tolerance(0);

    pub const fn from_ppm(ppm: u32) -> Self {
        Self(ppm)
    }

    pub const fn from_bps(bps: u32) -> Self {
        Self(bps * 100)
    }

    pub fn ppm(&self) -> u32 {
        self.0
    }

    pub fn is_exact(&self) -> bool {
        self.0 == 0
    }

    /// `|actual - expected| <= magnitude * tolerance`
    pub fn admits(&self, expected: U256, actual: U256, magnitude: U256) -> bool {
        abs_diff(expected, actual) * U256::from(PPM) <= magnitude * U256::from(self.0)
    }
}

impl fmt::Display for Tolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_exact() {
            return write!(f, "exact");
        }
        // ppm -> percent is four decimal places
        write!(f, "{}%", Decimal::new(self.0 as i64, 4).normalize())
    }
}

/// Tolerance parameters for every reconciliation step.
///
/// The defaults absorb reward compounding and share-price rounding in the
/// external protocol. They are empirical, not derived bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerances {
    pub deposit: Tolerance,
    pub withdraw: Tolerance,
    /// Underlying drift allowed for a user with no recorded action.
    pub idle: Tolerance,
    pub vault: Tolerance,
    pub strategy: Tolerance,
    pub claim: Tolerance,
    /// Absolute bound on strategy share units when nothing is expected to
    /// back them.
    pub dust: U256,
    /// Absolute bound on user and vault amounts when no movement is expected.
    pub floor: U256,
    /// Max per-strategy underlying drift across a round-trip reallocation.
    pub reallocation_units: U256,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            deposit: Tolerance::from_bps(3),
            withdraw: Tolerance::from_bps(10),
            idle: Tolerance::from_ppm(10),
            vault: Tolerance::from_bps(50),
            strategy: Tolerance::from_bps(1),
            claim: Tolerance::from_bps(5),
            dust: U256::from(100_000_000_500u64),
            floor: U256::from(1u8),
            reallocation_units: U256::from(1u8),
        }
    }
}

/// Expected movement of a quantity, kept as two unsigned legs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedChange {
    pub increase: U256,
    pub decrease: U256,
}

impl ExpectedChange {
    pub fn up(amount: U256) -> Self {
        Self {
            increase: amount,
            decrease: U256::ZERO,
        }
    }

    pub fn down(amount: U256) -> Self {
        Self {
            increase: U256::ZERO,
            decrease: amount,
        }
    }

    pub fn apply(&self, before: U256) -> U256 {
        (before + self.increase).saturating_sub(self.decrease)
    }

    /// Gross size of the change. Offsetting legs still count, so a cycle
    /// that deposits and withdraws the same amount is not held to the
    /// absolute bound.
    pub fn magnitude(&self) -> U256 {
        self.increase + self.decrease
    }

    pub fn is_zero(&self) -> bool {
        self.increase == self.decrease
    }
}

impl std::ops::AddAssign for ExpectedChange {
    fn add_assign(&mut self, rhs: Self) {
        self.increase += rhs.increase;
        self.decrease += rhs.decrease;
    }
}

pub fn abs_diff(a: U256, b: U256) -> U256 {
    if a >= b { a - b } else { b - a }
}

/// Compare within `tolerance` of `magnitude`, falling back to the absolute
/// `bound` when nothing was expected to move.
pub fn check_relative(
    entity: EntityKey,
    quantity: &'static str,
    expected: U256,
    actual: U256,
    magnitude: U256,
    tolerance: Tolerance,
    bound: U256,
) -> Result<(), Violation> {
    let ok = if magnitude.is_zero() {
        abs_diff(expected, actual) <= bound
    } else {
        tolerance.admits(expected, actual, magnitude)
    };

    if ok {
        return Ok(());
    }

    let tolerance = if magnitude.is_zero() {
        format!("within {bound}")
    } else {
        tolerance.to_string()
    };
    Err(Violation {
        entity,
        quantity,
        expected,
        actual,
        tolerance,
    })
}

pub fn check_exact(
    entity: EntityKey,
    quantity: &'static str,
    expected: U256,
    actual: U256,
) -> Result<(), Violation> {
    if expected == actual {
        return Ok(());
    }
    Err(Violation {
        entity,
        quantity,
        expected,
        actual,
        tolerance: Tolerance::EXACT.to_string(),
    })
}

/// Absolute bound, used where relative error is meaningless.
pub fn check_within(
    entity: EntityKey,
    quantity: &'static str,
    expected: U256,
    actual: U256,
    bound: U256,
) -> Result<(), Violation> {
    if abs_diff(expected, actual) <= bound {
        return Ok(());
    }
    Err(Violation {
        entity,
        quantity,
        expected,
        actual,
        tolerance: format!("±{bound}"),
    })
}
