//! TON amount handling.
//!
//! Prices are stored as fixed-point decimals with nine fractional digits.
//! The chain itself reports integer nanotons, so matching always happens in
//! minor units.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Fractional digits of one TON.
pub const TON_DECIMALS: u32 = 9;

/// Nanotons in one TON.
pub const NANOTONS_PER_TON: i64 = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("amount {0} has more than 9 fractional digits")]
    TooPrecise(Decimal),
    #[error("amount {0} is negative")]
    Negative(Decimal),
    #[error("amount {0} does not fit into nanotons")]
    Overflow(Decimal),
}

/// A non-negative TON amount with at most nine fractional digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TonAmount(Decimal);

impl TonAmount {
    pub const ZERO: TonAmount = TonAmount(Decimal::ZERO);

    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(AmountError::Negative(value));
        }
        if value.normalize().scale() > TON_DECIMALS {
            return Err(AmountError::TooPrecise(value));
        }
        Ok(Self(value))
    }

    /// Build an amount from integer nanotons.
    pub fn from_nano(nano: i64) -> Self {
        Self(Decimal::new(nano, TON_DECIMALS).normalize())
    }

    /// Convert to integer nanotons.
    pub fn to_nano(&self) -> Result<i64, AmountError> {
        let scaled = self
            .0
            .checked_mul(Decimal::from(NANOTONS_PER_TON))
            .ok_or(AmountError::Overflow(self.0))?;
        if !scaled.fract().is_zero() {
            return Err(AmountError::TooPrecise(self.0));
        }
        scaled.to_i64().ok_or(AmountError::Overflow(self.0))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl TryFrom<Decimal> for TonAmount {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TonAmount> for Decimal {
    fn from(value: TonAmount) -> Self {
        value.0
    }
}

impl std::fmt::Display for TonAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} TON", self.0.normalize())
    }
}

/// Build a `ton://transfer` deep link that wallets understand.
///
/// The comment is what the payment reconciler later matches against, so it
/// must be the invoice reference verbatim.
pub fn payment_uri(address: &str, amount: TonAmount, comment: &str) -> Result<String, AmountError> {
    Ok(format!(
        "ton://transfer/{}?amount={}&text={}",
        address,
        amount.to_nano()?,
        urlencoding::encode(comment)
    ))
}
