use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::{program_error::ProgramError, pubkey::Pubkey};

use crate::{
    error::LendingMarketError,
    math::{BPS_DENOMINATOR, MAX_DECIMALS, SCALE},
    state::{CollateralConfig, DepositRecord, LoanRecord},
};

/// Kinked two-segment interest rate curve, all values in basis points.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct RateCurve {
    /// APR floor applied at zero utilization
    pub base_bps: u64,

    /// Fraction of total deposits that may be lent out; utilization is
    /// normalized against this cap, not against raw deposits
    pub util_cap_bps: u64,

    /// Utilization at which the slope changes
    pub kink_bps: u64,

    /// APR added across 0..kink utilization
    pub slope1_bps: u64,

    /// APR added across kink..100% utilization
    pub slope2_bps: u64,

    /// Hard APR clamp; 0 disables the clamp
    pub max_apr_bps: u64,
}

impl RateCurve {
    pub fn validate(&self) -> Result<(), ProgramError> {
        if self.util_cap_bps == 0 || self.util_cap_bps > BPS_DENOMINATOR {
            return Err(LendingMarketError::InvalidBps.into());
        }
        // Both curve segments divide by their span
        if self.kink_bps == 0 || self.kink_bps >= BPS_DENOMINATOR {
            return Err(LendingMarketError::InvalidBps.into());
        }
        Ok(())
    }
}

/// Collateralization and fee parameters, all values in basis points.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct RiskParams {
    /// Maximum initial debt as a fraction of collateral value
    pub ltv_bps: u64,

    /// LTV at and above which a position is liquidatable
    pub liq_threshold_bps: u64,

    /// Ceiling for the dynamic liquidation bonus
    pub liq_bonus_max_bps: u64,

    /// Protocol share of accrued interest
    pub protocol_share_bps: u64,

    /// Nominal origination fee before tier discount
    pub origination_fee_bps: u64,
}

impl RiskParams {
    pub fn validate(&self) -> Result<(), ProgramError> {
        if self.ltv_bps == 0 || self.ltv_bps > BPS_DENOMINATOR {
            return Err(LendingMarketError::InvalidBps.into());
        }
        // The bonus formula divides by (10000 - threshold)
        if self.liq_threshold_bps < self.ltv_bps || self.liq_threshold_bps >= BPS_DENOMINATOR {
            return Err(LendingMarketError::InvalidBps.into());
        }
        if self.liq_bonus_max_bps > BPS_DENOMINATOR
            || self.protocol_share_bps > BPS_DENOMINATOR
            || self.origination_fee_bps > BPS_DENOMINATOR
        {
            return Err(LendingMarketError::InvalidBps.into());
        }
        Ok(())
    }
}

/// Per-instance market configuration and aggregate ledger counters.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone)]
pub struct Market {
    /// Base asset mint and its decimals
    pub base_mint: Pubkey,
    pub base_decimals: u8,

    /// Registered oracle feed for the base asset
    pub base_oracle: Pubkey,

    /// Pool-share token mint (authority is the market PDA)
    pub share_mint: Pubkey,

    /// Vault token account holding the base-asset reserve
    pub base_vault: Pubkey,

    /// Token accepted as buyout premium, its decimals and feed
    pub premium_mint: Pubkey,
    pub premium_decimals: u8,
    pub premium_oracle: Pubkey,

    /// Premium-token account receiving the protocol half of buyout premiums
    pub fee_premium_vault: Pubkey,

    /// Bump for the market authority PDA
    pub authority_bump: u8,

    /// Role holders
    pub param_admin: Pubkey,
    pub fee_admin: Pubkey,
    pub init_admin: Pubkey,
    pub migration_admin: Pubkey,

    /// Rate and risk configuration
    pub rate_curve: RateCurve,
    pub risk_params: RiskParams,

    /// Pool-share tokens outstanding
    pub circulating_shares: u64,

    /// Depositor claim on the reserve, base units, interest-inclusive
    pub total_deposits: u64,

    /// Aggregate live debt, compounded up to `last_accrual_ts`
    pub total_borrows: u64,

    /// Base units actually held by the vault and payable on demand
    pub available_cash: u64,

    /// Protocol claim from interest splits and origination fees
    pub fee_pool: u64,

    /// Multiplicative borrow index, fixed point at `SCALE`
    pub borrow_index: u64,

    /// Timestamp the index was last advanced to
    pub last_accrual_ts: i64,

    /// APR recorded after the previous operation; the rate in force for the
    /// slice ending now
    pub last_apr_bps: u64,

    /// Open loan records
    pub active_loan_count: u32,

    /// Master gate for user-facing operations
    pub active: bool,
}

impl Market {
    pub const LEN: usize = 32 + 1 + // base mint + decimals
        32 + // base_oracle
        32 + // share_mint
        32 + // base_vault
        32 + 1 + 32 + // premium mint + decimals + oracle
        32 + // fee_premium_vault
        1 + // authority_bump
        32 * 4 + // admins
        6 * 8 + // rate_curve
        5 * 8 + // risk_params
        8 + // circulating_shares
        8 + // total_deposits
        8 + // total_borrows
        8 + // available_cash
        8 + // fee_pool
        8 + // borrow_index
        8 + // last_accrual_ts
        8 + // last_apr_bps
        4 + // active_loan_count
        1; // active
}

/// The single serialized-access state object: everything the ledger mutates
/// lives in this one account, so the host's per-transaction serialization is
/// the only lock the engine needs.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone)]
pub struct MarketState {
    /// Account discriminator
    pub discriminator: [u8; 8],

    /// Is initialized flag
    pub is_initialized: bool,

    /// Market configuration and aggregates
    pub market: Market,

    /// Registered collateral assets
    pub collaterals: Vec<CollateralConfig>,

    /// Open loans, keyed by borrower
    pub loans: Vec<LoanRecord>,

    /// Informational depositor bookkeeping
    pub deposits: Vec<DepositRecord>,
}

impl MarketState {
    pub const DISCRIMINATOR: [u8; 8] = [76, 69, 78, 68, 95, 77, 75, 84]; // "LEND_MKT"

    pub const MAX_COLLATERAL_TYPES: usize = 8;
    pub const MAX_ACTIVE_LOANS: usize = 128;
    pub const MAX_DEPOSIT_RECORDS: usize = 128;

    pub const LEN: usize = 8 + // discriminator
        1 + // is_initialized
        Market::LEN +
        4 + (Self::MAX_COLLATERAL_TYPES * CollateralConfig::LEN) +
        4 + (Self::MAX_ACTIVE_LOANS * LoanRecord::LEN) +
        4 + (Self::MAX_DEPOSIT_RECORDS * DepositRecord::LEN) +
        256; // padding for growth

    pub fn new(market: Market) -> Self {
        Self {
            discriminator: Self::DISCRIMINATOR,
            is_initialized: true,
            market,
            collaterals: Vec::new(),
            loans: Vec::new(),
            deposits: Vec::new(),
        }
    }

    /// Checks discriminator and initialization before any use.
    pub fn validate(&self) -> Result<(), ProgramError> {
        if self.discriminator != Self::DISCRIMINATOR {
            return Err(ProgramError::InvalidAccountData);
        }
        if !self.is_initialized {
            return Err(LendingMarketError::NotInitialized.into());
        }
        Ok(())
    }

    /// Deserializes from account data, tolerating the trailing padding.
    pub fn load(data: &[u8]) -> Result<Self, ProgramError> {
        let mut slice: &[u8] = data;
        let state =
            Self::deserialize(&mut slice).map_err(|_| ProgramError::InvalidAccountData)?;
        state.validate()?;
        Ok(state)
    }
}

/// Initial field values for a freshly created market.
pub fn new_market(
    base_mint: Pubkey,
    base_decimals: u8,
    base_oracle: Pubkey,
    share_mint: Pubkey,
    base_vault: Pubkey,
    premium_mint: Pubkey,
    premium_decimals: u8,
    premium_oracle: Pubkey,
    fee_premium_vault: Pubkey,
    authority_bump: u8,
    param_admin: Pubkey,
    fee_admin: Pubkey,
    init_admin: Pubkey,
    migration_admin: Pubkey,
    rate_curve: RateCurve,
    risk_params: RiskParams,
    now: i64,
) -> Result<Market, ProgramError> {
    if base_decimals > MAX_DECIMALS || premium_decimals > MAX_DECIMALS {
        return Err(LendingMarketError::InvalidDecimals.into());
    }
    rate_curve.validate()?;
    risk_params.validate()?;
    Ok(Market {
        base_mint,
        base_decimals,
        base_oracle,
        share_mint,
        base_vault,
        premium_mint,
        premium_decimals,
        premium_oracle,
        fee_premium_vault,
        authority_bump,
        param_admin,
        fee_admin,
        init_admin,
        migration_admin,
        rate_curve,
        risk_params,
        circulating_shares: 0,
        total_deposits: 0,
        total_borrows: 0,
        available_cash: 0,
        fee_pool: 0,
        borrow_index: SCALE,
        last_accrual_ts: now,
        last_apr_bps: 0,
        active_loan_count: 0,
        active: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve() -> RateCurve {
        RateCurve {
            base_bps: 100,
            util_cap_bps: 8_000,
            kink_bps: 8_000,
            slope1_bps: 400,
            slope2_bps: 6_000,
            max_apr_bps: 3_000,
        }
    }

    fn risk() -> RiskParams {
        RiskParams {
            ltv_bps: 2_500,
            liq_threshold_bps: 9_000,
            liq_bonus_max_bps: 800,
            protocol_share_bps: 1_000,
            origination_fee_bps: 50,
        }
    }

    #[test]
    fn curve_rejects_degenerate_kink() {
        let mut c = curve();
        c.kink_bps = 0;
        assert!(c.validate().is_err());
        c.kink_bps = 10_000;
        assert!(c.validate().is_err());
    }

    #[test]
    fn risk_rejects_threshold_below_ltv() {
        let mut r = risk();
        r.liq_threshold_bps = 2_000;
        assert!(r.validate().is_err());
        r.liq_threshold_bps = 10_000;
        assert!(r.validate().is_err());
    }

    #[test]
    fn fresh_market_starts_at_unit_index() {
        let market = new_market(
            Pubkey::new_unique(),
            6,
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            6,
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            255,
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            curve(),
            risk(),
            1_700_000_000,
        )
        .unwrap();
        assert_eq!(market.borrow_index, SCALE);
        assert_eq!(market.last_apr_bps, 0);
        assert!(market.active);
    }
}
