//! USD valuation. Base and premium assets convert directly through their
//! oracle price; collateral is a pool-share token and needs two hops: share
//! units to underlying base units at the peer market's exchange rate, then
//! underlying to micro-USD through the underlying asset's feed.

use solana_program::program_error::ProgramError;

use crate::{
    error::LendingMarketError,
    math::{self, BPS_DENOMINATOR},
    oracle::PeerRate,
};

/// A priced asset: oracle price plus its decimals.
#[derive(Debug, Clone, Copy)]
pub struct AssetQuote {
    pub price_micro_usd: u64,
    pub decimals: u8,
}

impl AssetQuote {
    pub fn new(price_micro_usd: u64, decimals: u8) -> Result<Self, ProgramError> {
        if price_micro_usd == 0 {
            return Err(LendingMarketError::InvalidOraclePrice.into());
        }
        // Validates the decimals range as a side effect
        math::pow10(decimals)?;
        Ok(Self {
            price_micro_usd,
            decimals,
        })
    }

    /// `amount * price / 10^decimals`
    pub fn to_usd(&self, amount: u64) -> Result<u64, ProgramError> {
        math::mul_div(amount, self.price_micro_usd, math::pow10(self.decimals)?)
    }

    /// `usd * 10^decimals / price`
    pub fn from_usd(&self, usd_micro: u64) -> Result<u64, ProgramError> {
        math::mul_div(usd_micro, math::pow10(self.decimals)?, self.price_micro_usd)
    }
}

/// Everything needed to value one collateral asset.
#[derive(Debug, Clone, Copy)]
pub struct CollateralPricing {
    pub peer: PeerRate,
    pub underlying: AssetQuote,
}

impl CollateralPricing {
    /// Share units to underlying base units at the peer exchange rate.
    pub fn shares_to_underlying(&self, shares: u64) -> Result<u64, ProgramError> {
        if shares == 0 {
            return Ok(0);
        }
        if self.peer.circulating_shares == 0 {
            return Err(LendingMarketError::InvalidPeerMarket.into());
        }
        math::mul_div(shares, self.peer.total_deposits, self.peer.circulating_shares)
    }

    /// Underlying base units back to share units.
    pub fn underlying_to_shares(&self, underlying: u64) -> Result<u64, ProgramError> {
        if underlying == 0 {
            return Ok(0);
        }
        if self.peer.total_deposits == 0 {
            return Err(LendingMarketError::InvalidPeerMarket.into());
        }
        math::mul_div(underlying, self.peer.circulating_shares, self.peer.total_deposits)
    }

    /// The two-hop valuation: shares -> underlying -> micro-USD.
    pub fn shares_to_usd(&self, shares: u64) -> Result<u64, ProgramError> {
        let underlying = self.shares_to_underlying(shares)?;
        self.underlying.to_usd(underlying)
    }

    /// The inverse path: micro-USD -> underlying -> shares.
    pub fn usd_to_shares(&self, usd_micro: u64) -> Result<u64, ProgramError> {
        let underlying = self.underlying.from_usd(usd_micro)?;
        self.underlying_to_shares(underlying)
    }
}

/// Position LTV in bps: `debt_usd * 10000 / collateral_usd`. Worthless
/// collateral with live debt saturates to the maximum.
pub fn ltv_bps(debt_usd: u64, collateral_usd: u64) -> u64 {
    if collateral_usd == 0 {
        return if debt_usd == 0 { 0 } else { u64::MAX };
    }
    let wide = (debt_usd as u128) * (BPS_DENOMINATOR as u128) / (collateral_usd as u128);
    wide.min(u64::MAX as u128) as u64
}
