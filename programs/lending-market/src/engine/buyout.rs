//! Buyout economics. A buyout is the voluntary counterpart of liquidation:
//! it targets positions *below* the liquidation threshold, prices a premium
//! that grows as the position gets healthier, and always clears the whole
//! debt. The two eligibility windows partition every possible LTV.

use solana_program::program_error::ProgramError;

use crate::{
    engine::valuation::{ltv_bps, AssetQuote, CollateralPricing},
    error::LendingMarketError,
    math::{self, BPS_DENOMINATOR},
};

/// Settlement amounts for a buyout call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuyoutTerms {
    /// Premium owed, premium-token units
    pub premium: u64,

    /// Premium halves; the odd unit goes to the protocol
    pub premium_to_protocol: u64,
    pub premium_to_borrower: u64,

    /// Full live debt, base units
    pub debt_paid: u64,

    /// Overpay returned on each leg
    pub premium_refund: u64,
    pub repay_refund: u64,

    /// Entire pledge, transferred to the buyer
    pub collateral_to_buyer: u64,

    /// Premium rate that produced `premium`
    pub premium_rate_bps: u64,
}

/// `threshold * 10000 / ltv - 10000`: the healthier the position, the larger
/// the premium. Only defined on the buyout window `0 < ltv < threshold`.
pub fn premium_rate_bps(position_ltv_bps: u64, threshold_bps: u64) -> Result<u64, ProgramError> {
    if position_ltv_bps == 0 || position_ltv_bps >= threshold_bps {
        return Err(LendingMarketError::NotEligibleForBuyout.into());
    }
    let scaled = math::mul_div(threshold_bps, BPS_DENOMINATOR, position_ltv_bps)?;
    Ok(scaled - BPS_DENOMINATOR)
}

/// Prices a buyout and checks both offered legs.
#[allow(clippy::too_many_arguments)]
pub fn plan_buyout(
    premium_offered: u64,
    repay_offered: u64,
    live_debt: u64,
    pledged: u64,
    base: &AssetQuote,
    pricing: &CollateralPricing,
    premium_quote: &AssetQuote,
    threshold_bps: u64,
) -> Result<BuyoutTerms, ProgramError> {
    let debt_usd = base.to_usd(live_debt)?;
    let collateral_usd = pricing.shares_to_usd(pledged)?;
    let position_ltv = ltv_bps(debt_usd, collateral_usd);
    let rate = premium_rate_bps(position_ltv, threshold_bps)?;

    let premium_usd = math::bps_of(collateral_usd, rate)?;
    let premium = premium_quote.from_usd(premium_usd)?;

    if premium_offered < premium {
        return Err(LendingMarketError::InsufficientPremium.into());
    }
    if repay_offered < live_debt {
        return Err(LendingMarketError::InsufficientRepayment.into());
    }

    let premium_to_borrower = premium / 2;
    let premium_to_protocol = premium - premium_to_borrower;

    Ok(BuyoutTerms {
        premium,
        premium_to_protocol,
        premium_to_borrower,
        debt_paid: live_debt,
        premium_refund: premium_offered - premium,
        repay_refund: repay_offered - live_debt,
        collateral_to_buyer: pledged,
        premium_rate_bps: rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::PeerRate;

    fn base() -> AssetQuote {
        AssetQuote::new(1_000_000, 6).unwrap()
    }

    fn flat_pricing() -> CollateralPricing {
        CollateralPricing {
            peer: PeerRate {
                total_deposits: 1_000_000_000,
                circulating_shares: 1_000_000_000,
            },
            underlying: AssetQuote::new(1_000_000, 6).unwrap(),
        }
    }

    #[test]
    fn premium_rate_grows_as_health_improves() {
        assert_eq!(premium_rate_bps(6_000, 9_000).unwrap(), 5_000);
        assert_eq!(premium_rate_bps(4_500, 9_000).unwrap(), 10_000);
        assert_eq!(premium_rate_bps(8_999, 9_000).unwrap(), 1);
    }

    #[test]
    fn buyout_window_excludes_liquidatable_and_zero_debt() {
        assert_eq!(
            premium_rate_bps(9_000, 9_000).unwrap_err(),
            LendingMarketError::NotEligibleForBuyout.into()
        );
        assert_eq!(
            premium_rate_bps(9_500, 9_000).unwrap_err(),
            LendingMarketError::NotEligibleForBuyout.into()
        );
        assert_eq!(
            premium_rate_bps(0, 9_000).unwrap_err(),
            LendingMarketError::NotEligibleForBuyout.into()
        );
    }

    #[test]
    fn settlement_splits_premium_and_clears_debt() {
        // 600k debt / 1M collateral = 6000 bps -> 50% premium on collateral
        let terms = plan_buyout(
            600_000,
            700_000,
            600_000,
            1_000_000,
            &base(),
            &flat_pricing(),
            &base(),
            9_000,
        )
        .unwrap();
        assert_eq!(terms.premium_rate_bps, 5_000);
        assert_eq!(terms.premium, 500_000);
        assert_eq!(terms.premium_to_protocol, 250_000);
        assert_eq!(terms.premium_to_borrower, 250_000);
        assert_eq!(terms.debt_paid, 600_000);
        assert_eq!(terms.premium_refund, 100_000);
        assert_eq!(terms.repay_refund, 100_000);
        assert_eq!(terms.collateral_to_buyer, 1_000_000);
    }

    #[test]
    fn odd_premium_unit_goes_to_the_protocol() {
        // Collateral 999_999 at 50% premium -> 499_999, an odd amount
        let terms = plan_buyout(
            499_999,
            600_000,
            600_000,
            999_999,
            &base(),
            &flat_pricing(),
            &base(),
            9_000,
        )
        .unwrap();
        assert_eq!(terms.premium, terms.premium_to_protocol + terms.premium_to_borrower);
        assert_eq!(terms.premium_to_protocol, terms.premium_to_borrower + 1);
    }

    #[test]
    fn short_legs_are_rejected() {
        let err = plan_buyout(
            499_999,
            700_000,
            600_000,
            1_000_000,
            &base(),
            &flat_pricing(),
            &base(),
            9_000,
        )
        .unwrap_err();
        assert_eq!(err, LendingMarketError::InsufficientPremium.into());

        let err = plan_buyout(
            500_000,
            599_999,
            600_000,
            1_000_000,
            &base(),
            &flat_pricing(),
            &base(),
            9_000,
        )
        .unwrap_err();
        assert_eq!(err, LendingMarketError::InsufficientRepayment.into());
    }
}
