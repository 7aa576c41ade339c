//! Fixed-precision token amounts.
//!
//! The ledger renders every balance with four fractional digits
//! (`"12.3456 EIDOS"`), so amounts are carried as signed integer counts of
//! `10^-4` units.  Keeping the arithmetic integral means balance deltas,
//! thresholds and proportional shares never drift the way repeated float
//! subtraction would.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;
use thiserror::Error;

/// Number of fractional digits carried by every quantity.
pub const PRECISION: u32 = 4;

/// Units per whole token (`10^PRECISION`).
pub const SCALE: i64 = 10_000;

/// Denominator used for ratios expressed in basis points.
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Signed token amount with four fractional digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "QuantityRepr", into = "String")]
pub struct Quantity(i64);

impl Quantity {
    /// The zero amount.
    pub const ZERO: Quantity = Quantity(0);

    /// Builds a quantity from raw `10^-4` units.
    pub const fn from_units(units: i64) -> Self {
        Self(units)
    }

    /// Raw `10^-4` units.
    pub const fn units(self) -> i64 {
        self.0
    }

    /// Converts a float, rounding to the nearest representable amount.
    pub fn from_f64(value: f64) -> Result<Self, QuantityError> {
        if !value.is_finite() {
            return Err(QuantityError::Invalid(value.to_string()));
        }
        let scaled = (value * SCALE as f64).round();
        if scaled.abs() >= i64::MAX as f64 {
            return Err(QuantityError::Overflow);
        }
        Ok(Self(scaled as i64))
    }

    /// Lossy float view, for log fields only.
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / SCALE as f64
    }

    /// Returns true when the amount is strictly positive.
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Multiplies by `bps / 10_000`, rounding half away from zero.
    pub fn scale_bps(self, bps: u32) -> Quantity {
        let product = self.0 as i128 * bps as i128;
        let denom = BPS_DENOMINATOR as i128;
        let half = denom / 2;
        let rounded = if product >= 0 {
            (product + half) / denom
        } else {
            -((-product + half) / denom)
        };
        Quantity(rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }

    /// Exact comparison of `self * bps / 10_000` against `bound`, before any rounding.
    pub fn scaled_exceeds(self, bps: u32, bound: Quantity) -> bool {
        self.0 as i128 * bps as i128 > bound.0 as i128 * BPS_DENOMINATOR as i128
    }

    /// Checked subtraction.
    pub fn checked_sub(self, rhs: Quantity) -> Option<Quantity> {
        self.0.checked_sub(rhs.0).map(Quantity)
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Quantity) -> Quantity {
        Quantity(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Quantity {
    type Output = Quantity;

    fn sub(self, rhs: Quantity) -> Quantity {
        Quantity(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let scale = SCALE as u64;
        write!(
            f,
            "{sign}{}.{:0width$}",
            abs / scale,
            abs % scale,
            width = PRECISION as usize
        )
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(QuantityError::Empty);
        }
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };
        let (whole, frac) = match digits.split_once('.') {
            Some((whole, frac)) => (whole, frac),
            None => (digits, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(QuantityError::Invalid(input.to_string()));
        }
        let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(whole) || !all_digits(frac) {
            return Err(QuantityError::Invalid(input.to_string()));
        }
        if frac.len() > PRECISION as usize {
            return Err(QuantityError::TooPrecise(input.to_string()));
        }
        let whole_units: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| QuantityError::Overflow)?
        };
        let mut frac_units: i64 = 0;
        for (idx, byte) in frac.bytes().enumerate() {
            let digit = (byte - b'0') as i64;
            frac_units += digit * 10_i64.pow(PRECISION - 1 - idx as u32);
        }
        let units = whole_units
            .checked_mul(SCALE)
            .and_then(|v| v.checked_add(frac_units))
            .ok_or(QuantityError::Overflow)?;
        Ok(Quantity(if negative { -units } else { units }))
    }
}

impl From<Quantity> for String {
    fn from(value: Quantity) -> Self {
        value.to_string()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QuantityRepr {
    Text(String),
    Number(f64),
}

impl TryFrom<QuantityRepr> for Quantity {
    type Error = QuantityError;

    fn try_from(value: QuantityRepr) -> Result<Self, Self::Error> {
        match value {
            QuantityRepr::Text(text) => text.parse(),
            QuantityRepr::Number(number) => Quantity::from_f64(number),
        }
    }
}

/// Token identity on the ledger: issuing contract plus symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Asset {
    /// Account of the token contract (e.g. `eosio.token`).
    pub contract: String,
    /// Ticker symbol (e.g. `EOS`).
    pub symbol: String,
}

impl Asset {
    /// Convenience constructor.
    pub fn new(contract: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            contract: contract.into(),
            symbol: symbol.into(),
        }
    }
}

/// Balance of one asset at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// Asset symbol the amount is denominated in.
    pub symbol: String,
    /// Amount held.
    pub amount: Quantity,
}

impl BalanceSnapshot {
    /// Zero balance for `symbol`; ledgers omit rows for assets never held.
    pub fn zero(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            amount: Quantity::ZERO,
        }
    }

    /// Parses the ledger's `"<amount> <SYMBOL>"` text form.
    pub fn parse(text: &str) -> Result<Self, QuantityError> {
        let mut parts = text.split_whitespace();
        let amount = parts.next().ok_or(QuantityError::Empty)?;
        let symbol = parts
            .next()
            .ok_or_else(|| QuantityError::MissingSymbol(text.to_string()))?;
        if parts.next().is_some() {
            return Err(QuantityError::Invalid(text.to_string()));
        }
        Ok(Self {
            symbol: symbol.to_string(),
            amount: amount.parse()?,
        })
    }
}

impl fmt::Display for BalanceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.symbol)
    }
}

/// Errors raised while parsing or converting quantities.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("empty quantity")]
    /// Input contained no characters.
    Empty,
    #[error("invalid quantity: {0}")]
    /// Input was not a decimal number.
    Invalid(String),
    #[error("quantity has more than four fractional digits: {0}")]
    /// More fractional digits than the ledger precision.
    TooPrecise(String),
    #[error("quantity is missing its asset symbol: {0}")]
    /// A balance string lacked the trailing symbol.
    MissingSymbol(String),
    #[error("quantity out of range")]
    /// Value does not fit the integer representation.
    Overflow,
}
