//! Liquidation economics: eligibility, the risk-scaled bonus, the
//! close-factor caps, and the seize/repay reconciliation. All of it is a
//! pure function from the position and the offered repayment to a
//! [`LiquidationPlan`]; committing the plan to the ledger happens in the
//! operation layer.

use solana_program::program_error::ProgramError;

use crate::{
    engine::valuation::{ltv_bps, AssetQuote, CollateralPricing},
    error::LendingMarketError,
    math::{self, BPS_DENOMINATOR},
};

/// Amounts a liquidation call commits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiquidationPlan {
    /// Debt retired, base units
    pub repay_used: u64,

    /// Offered repayment returned to the liquidator
    pub refund: u64,

    /// Collateral transferred to the liquidator, collateral units
    pub seize_shares: u64,

    /// Bonus actually applied after all caps
    pub bonus_bps: u64,

    /// True when the position's debt reaches zero
    pub closes_loan: bool,
}

/// Bonus grows linearly from 0 at the threshold toward the configured max as
/// the position worsens. A positive-but-flooring slice pays the minimum
/// 1 bps so eligible liquidations are never bonus-free.
pub fn dynamic_bonus_bps(position_ltv_bps: u64, threshold_bps: u64, max_bonus_bps: u64) -> u64 {
    if position_ltv_bps <= threshold_bps || threshold_bps >= BPS_DENOMINATOR {
        return 0;
    }
    let over = (position_ltv_bps - threshold_bps) as u128;
    let numerator = over * max_bonus_bps as u128;
    let mut bonus = (numerator / (BPS_DENOMINATOR - threshold_bps) as u128) as u64;
    if bonus == 0 && numerator > 0 {
        bonus = 1;
    }
    bonus.min(max_bonus_bps)
}

/// Runs the liquidation state machine over a position.
///
/// The bonus-cap and close-factor-cap interaction is deliberately one-pass:
/// the repay cap is computed with the already-capped bonus and the bonus is
/// not recomputed for the smaller repay amount.
#[allow(clippy::too_many_arguments)]
pub fn plan_liquidation(
    offered: u64,
    live_debt: u64,
    pledged: u64,
    base: &AssetQuote,
    pricing: &CollateralPricing,
    threshold_bps: u64,
    max_bonus_bps: u64,
) -> Result<LiquidationPlan, ProgramError> {
    if offered == 0 {
        return Err(LendingMarketError::ZeroAmount.into());
    }

    let debt_usd = base.to_usd(live_debt)?;
    let collateral_usd = pricing.shares_to_usd(pledged)?;
    let position_ltv = ltv_bps(debt_usd, collateral_usd);
    if position_ltv < threshold_bps {
        return Err(LendingMarketError::NotEligibleForLiquidation.into());
    }

    let full_repay = offered >= live_debt;
    let underwater = collateral_usd <= debt_usd;
    if underwater && !full_repay {
        // Incremental seizure below the waterline would strand unsecured
        // debt; only a full close is allowed.
        return Err(LendingMarketError::FullRepayRequired.into());
    }

    let mut bonus = dynamic_bonus_bps(position_ltv, threshold_bps, max_bonus_bps);
    let mut repay = offered.min(live_debt);
    let mut repay_usd = base.to_usd(repay)?;
    if repay_usd == 0 {
        return Err(LendingMarketError::ZeroAmount.into());
    }

    if !underwater {
        // The seizure premium must fit inside the collateral/debt gap.
        let gap_usd = collateral_usd - debt_usd;
        let bonus_cap = math::mul_div(gap_usd, BPS_DENOMINATOR, repay_usd)?;
        bonus = bonus.min(bonus_cap).min(max_bonus_bps);
    }

    if !full_repay {
        // Cap the repayment itself so the resulting seizure cannot exceed
        // 100% of pledged collateral.
        let max_repay_usd =
            math::mul_div(collateral_usd, BPS_DENOMINATOR, BPS_DENOMINATOR + bonus)?;
        if repay_usd > max_repay_usd {
            repay_usd = max_repay_usd;
            repay = base.from_usd(repay_usd)?;
        }
    }

    // Seize target in USD, then collateral units, bounded by the pledge.
    let seize_usd = math::mul_div(repay_usd, BPS_DENOMINATOR + bonus, BPS_DENOMINATOR)?;
    let mut seize_shares = pricing.usd_to_shares(seize_usd)?;
    if seize_shares > pledged {
        seize_shares = pledged;
    }

    // The debt actually retired is derived from the seized collateral, not
    // the requested amount, so the two legs cannot drift apart.
    let seized_usd = pricing.shares_to_usd(seize_shares)?;
    let supported_usd = math::mul_div(seized_usd, BPS_DENOMINATOR, BPS_DENOMINATOR + bonus)?;
    let repay_supported = base.from_usd(supported_usd)?.min(live_debt);

    if seize_shares == pledged && repay_supported < live_debt && !full_repay {
        return Err(LendingMarketError::FullRepayRequired.into());
    }

    let repay_used = if full_repay {
        live_debt
    } else {
        repay_supported.min(repay)
    };
    if repay_used == 0 {
        return Err(LendingMarketError::ZeroAmount.into());
    }

    Ok(LiquidationPlan {
        repay_used,
        refund: offered.saturating_sub(repay_used),
        seize_shares,
        bonus_bps: bonus,
        closes_loan: repay_used == live_debt,
    })
}
