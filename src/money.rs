//! A cent-precision monetary amount.
//!
//! Upstream APIs disagree on units: the banking GraphQL endpoint speaks in
//! integer cents while the aggregator REST APIs return floating point dollar
//! amounts. Everything inside the engine uses [Money] so that balance deltas
//! compare exactly.

use std::fmt::{self, Display};
use std::ops::{Add, Neg, Sub};

/// An amount of money stored as a signed number of cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Money {
    cents: i64,
}

impl Money {
    /// Zero dollars and zero cents.
    pub const ZERO: Money = Money { cents: 0 };

    /// Create an amount from a whole number of cents.
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Create an amount from a dollar value, rounding to the nearest cent.
    ///
    /// Provider feeds report dollars as floats, so sub-cent noise such as
    /// `0.004` rounds away here rather than leaking into delta arithmetic.
    pub fn from_dollars(dollars: f64) -> Self {
        Self {
            cents: (dollars * 100.0).round() as i64,
        }
    }

    /// The amount as a whole number of cents.
    pub fn cents(self) -> i64 {
        self.cents
    }

    /// The amount as a dollar value.
    pub fn as_dollars(self) -> f64 {
        self.cents as f64 / 100.0
    }

    /// The magnitude of the amount.
    pub fn abs(self) -> Self {
        Self {
            cents: self.cents.abs(),
        }
    }

    /// Whether the amount is greater than zero.
    pub fn is_positive(self) -> bool {
        self.cents > 0
    }

    /// Whether the amount is exactly zero.
    pub fn is_zero(self) -> bool {
        self.cents == 0
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money {
            cents: self.cents + rhs.cents,
        }
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money {
            cents: self.cents - rhs.cents,
        }
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money { cents: -self.cents }
    }
}

impl Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let magnitude = self.cents.abs();

        write!(f, "{sign}${}.{:02}", magnitude / 100, magnitude % 100)
    }
}
