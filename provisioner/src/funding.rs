//! Funding arithmetic.
//!
//! Three amounts derive from a node's requested capacity:
//!
//! - the renter *allowance*: funds dedicated to storage contracts,
//! - the *desired* balance: the allowance over the number of terms covered,
//! - the *requested* transfer: the desired balance inflated by a safety
//!   multiple that absorbs price slop and renewal overhead.
//!
//! All arithmetic is exact fixed-point over [`Currency`] base units.

use shared_types::Currency;

use crate::node_api::WalletInfo;

/// A fixed-point factor with four decimal places (`1.05` is `10_500`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Multiplier(u128);

impl Multiplier {
    pub const DECIMALS: u32 = 4;
    const SCALE: u128 = 10_000;

    pub const fn from_scaled(scaled: u128) -> Self {
        Self(scaled)
    }

    pub fn apply(&self, amount: Currency) -> Option<Currency> {
        amount.checked_mul_ratio(self.0, Self::SCALE)
    }
}

/// Renter allowance terms submitted once the node is funded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenterTerms {
    /// Number of storage providers to form contracts with.
    pub hosts: u32,
    /// Active contracts required before the node is declared ready.
    pub required_contracts: usize,
    /// Contract period, in blocks.
    pub period: u64,
    /// Renewal window, in blocks.
    pub renew_window: u64,
}

impl Default for RenterTerms {
    fn default() -> Self {
        Self {
            hosts: 40,
            required_contracts: 30,
            period: 4380,
            renew_window: 400,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FundingPolicy {
    /// Price of one unit (terabyte) of capacity.
    pub price_per_unit: Currency,
    pub term_multiple: Multiplier,
    pub safety_multiple: Multiplier,
    /// Balances below this are not worth sweeping back.
    pub sweep_min_fee: Currency,
    pub renter: RenterTerms,
}

impl Default for FundingPolicy {
    fn default() -> Self {
        Self {
            price_per_unit: Currency::from_base_units(21_039 * 10u128.pow(22)),
            term_multiple: Multiplier::from_scaled(12_000),
            safety_multiple: Multiplier::from_scaled(10_500),
            sweep_min_fee: Currency::from_coins(12),
            renter: RenterTerms::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum FundingError {
    #[error("capacity {0} is not a positive finite number")]
    InvalidCapacity(f64),
    #[error("funding amount for capacity {0} overflows")]
    Overflow(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingPlan {
    pub allowance: Currency,
    pub desired: Currency,
    pub requested: Currency,
}

/// Capacity is quantized to thousandths of a unit.
const CAPACITY_SCALE: u128 = 1_000;

impl FundingPolicy {
    pub fn plan(&self, capacity: f64) -> Result<FundingPlan, FundingError> {
        if !capacity.is_finite() || capacity <= 0.0 {
            return Err(FundingError::InvalidCapacity(capacity));
        }
        let scaled = (capacity * CAPACITY_SCALE as f64).round();
        if scaled >= u128::MAX as f64 {
            return Err(FundingError::Overflow(capacity));
        }
        let milli_units = scaled as u128;
        let overflow = || FundingError::Overflow(capacity);
        let allowance = self
            .price_per_unit
            .checked_mul_ratio(milli_units, CAPACITY_SCALE)
            .ok_or_else(overflow)?;
        let desired = self.term_multiple.apply(allowance).ok_or_else(overflow)?;
        let requested = self.safety_multiple.apply(desired).ok_or_else(overflow)?;
        Ok(FundingPlan {
            allowance,
            desired,
            requested,
        })
    }

    /// What a decommission sweep should move: confirmed plus incoming minus
    /// outgoing, or nothing if that would not cover the fee.
    pub fn sweepable(&self, wallet: &WalletInfo) -> Currency {
        let total = wallet
            .confirmed_balance
            .saturating_add(wallet.unconfirmed_incoming)
            .saturating_sub(wallet.unconfirmed_outgoing);
        if total < self.sweep_min_fee {
            Currency::ZERO
        } else {
            total
        }
    }
}
