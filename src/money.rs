//! Money representation and the escrow fee calculator
//!
//! Amounts are held as integer kobo (minor units) end to end; decimal
//! formatting happens only in `Display`. The fee calculator is a pure
//! function of `(price, shipping, split policy, schedule)` with no side
//! effects, so both the engine and any host service share one source of
//! fee truth.

use crate::error::EscrowError;
use crate::EscrowResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Fee split policy: which party carries the escrow fee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeSplit {
    /// Buyer pays the full fee on top of the subtotal
    Buyer,
    /// Seller absorbs the full fee out of the payout
    Seller,
    /// Fee shared; the buyer carries the odd kobo
    Split,
}

/// A currency amount in kobo (minor units of the naira)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    /// Construct from kobo
    pub const fn from_kobo(kobo: i64) -> Self {
        Money(kobo)
    }

    /// Construct from whole naira
    pub const fn from_naira(naira: i64) -> Self {
        Money(naira * 100)
    }

    /// Raw kobo count
    pub const fn kobo(&self) -> i64 {
        self.0
    }

    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Integer half, rounding down; the remainder kobo stays with the caller
    pub const fn half_down(&self) -> Self {
        Money(self.0 / 2)
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl fmt::Display for Money {
    /// Naira with two decimal places, e.g. `₦1,832,075.00`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let naira = abs / 100;
        let kobo = abs % 100;

        // Group the naira part with thousands separators.
        let digits = naira.to_string();
        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, ch) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(ch);
        }

        write!(f, "{}₦{}.{:02}", sign, grouped, kobo)
    }
}

/// Fee schedule: a rate in basis points with optional clamp bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Rate in basis points (250 = 2.5%)
    pub rate_bps: u32,
    /// Floor applied after the rate, if any
    pub min_fee: Option<Money>,
    /// Cap applied after the rate, if any
    pub max_fee: Option<Money>,
}

impl FeeSchedule {
    /// Flat 3%, unbounded: seller-created payment links
    pub const fn seller_link() -> Self {
        Self {
            rate_bps: 300,
            min_fee: None,
            max_fee: None,
        }
    }

    /// 2.5% with a ₦500 floor and ₦10,000 cap: buyer-initiated intents
    pub const fn buyer_intent() -> Self {
        Self {
            rate_bps: 250,
            min_fee: Some(Money::from_naira(500)),
            max_fee: Some(Money::from_naira(10_000)),
        }
    }

    /// Escrow fee for a subtotal, clamped to the schedule bounds
    pub fn fee_for(&self, subtotal: Money) -> Money {
        let raw = (subtotal.kobo() as i128 * self.rate_bps as i128 / 10_000) as i64;
        let mut fee = Money::from_kobo(raw);
        if let Some(min) = self.min_fee {
            fee = fee.max(min);
        }
        if let Some(max) = self.max_fee {
            fee = fee.min(max);
        }
        fee
    }

    /// Full quote for a deal: subtotal, fee, per-party shares, and totals
    pub fn quote(&self, price: Money, shipping: Money, split: FeeSplit) -> EscrowResult<FeeBreakdown> {
        if price.is_negative() {
            return Err(EscrowError::validation("Price cannot be negative"));
        }
        if shipping.is_negative() {
            return Err(EscrowError::validation("Shipping cost cannot be negative"));
        }

        let subtotal = price + shipping;
        let fee = self.fee_for(subtotal);

        let (buyer_fee, seller_fee) = match split {
            FeeSplit::Buyer => (fee, Money::ZERO),
            FeeSplit::Seller => (Money::ZERO, fee),
            // Buyer carries the odd kobo so the shares always sum to the fee.
            FeeSplit::Split => (fee - fee.half_down(), fee.half_down()),
        };

        Ok(FeeBreakdown {
            subtotal,
            fee,
            buyer_fee,
            seller_fee,
            buyer_total: subtotal + buyer_fee,
            seller_receives: subtotal - seller_fee,
        })
    }
}

/// Result of a fee quote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    /// Price plus shipping, before fees
    pub subtotal: Money,
    /// Full escrow fee
    pub fee: Money,
    /// Portion of the fee charged to the buyer
    pub buyer_fee: Money,
    /// Portion of the fee deducted from the seller
    pub seller_fee: Money,
    /// What the buyer is charged
    pub buyer_total: Money,
    /// What the seller is paid out
    pub seller_receives: Money,
}
