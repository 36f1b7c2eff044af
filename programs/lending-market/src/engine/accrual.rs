//! Utilization curve and lazy borrow-index accrual.
//!
//! The index only advances when an operation touches the market. Each slice
//! compounds at the APR recorded *after the previous operation*, so the rate
//! over an interval is the rate that was in force when the interval began,
//! not the one implied by the caller's pending mutation. Callers therefore
//! run `accrue` first, mutate, then `refresh_rate` for the next slice.

use solana_program::program_error::ProgramError;

use crate::{
    math::{self, BPS_DENOMINATOR, SCALE, SECONDS_PER_YEAR},
    state::{Market, RateCurve},
};

/// Interest realized by one accrual slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccrualOutcome {
    pub elapsed: u64,
    pub interest: u64,
    pub depositor_share: u64,
    pub protocol_share: u64,
}

/// Borrowable ceiling: `total_deposits * util_cap_bps / 10000`.
pub fn cap_borrow(market: &Market) -> Result<u64, ProgramError> {
    math::bps_of(market.total_deposits, market.rate_curve.util_cap_bps)
}

/// Utilization in bps, normalized against the cap rather than raw deposits.
pub fn utilization_bps(market: &Market) -> Result<u64, ProgramError> {
    let cap = cap_borrow(market)?;
    if cap == 0 {
        return Ok(0);
    }
    let capped = market.total_borrows.min(cap);
    math::mul_div(capped, BPS_DENOMINATOR, cap)
}

/// Kinked APR curve evaluated at a utilization point.
pub fn apr_bps(curve: &RateCurve, util_bps: u64) -> Result<u64, ProgramError> {
    let apr = if util_bps <= curve.kink_bps {
        let slope = math::mul_div(curve.slope1_bps, util_bps, curve.kink_bps)?;
        math::add(curve.base_bps, slope)?
    } else {
        let above_kink = util_bps - curve.kink_bps;
        let slope = math::mul_div(
            curve.slope2_bps,
            above_kink,
            BPS_DENOMINATOR - curve.kink_bps,
        )?;
        math::add(math::add(curve.base_bps, curve.slope1_bps)?, slope)?
    };
    if curve.max_apr_bps != 0 {
        Ok(apr.min(curve.max_apr_bps))
    } else {
        Ok(apr)
    }
}

/// Advances the borrow index and realizes slice interest. Idempotent: a
/// non-positive elapsed time is a no-op.
pub fn accrue(market: &mut Market, now: i64) -> Result<Option<AccrualOutcome>, ProgramError> {
    let elapsed = now.saturating_sub(market.last_accrual_ts);
    if elapsed <= 0 {
        return Ok(None);
    }
    let elapsed = elapsed as u64;

    // Growth for this slice at the previously recorded APR.
    let annual_wad = math::mul_div(SCALE, market.last_apr_bps, BPS_DENOMINATOR)?;
    let slice_wad = math::mul_div(annual_wad, elapsed, SECONDS_PER_YEAR)?;

    let index_delta = math::mul_div(market.borrow_index, slice_wad, SCALE)?;
    market.borrow_index = math::add(market.borrow_index, index_delta)?;

    let interest = math::mul_div(market.total_borrows, slice_wad, SCALE)?;
    let depositor_share = math::mul_div(
        interest,
        BPS_DENOMINATOR - market.risk_params.protocol_share_bps,
        BPS_DENOMINATOR,
    )?;
    let protocol_share = interest - depositor_share;

    market.total_deposits = math::add(market.total_deposits, depositor_share)?;
    market.fee_pool = math::add(market.fee_pool, protocol_share)?;
    market.total_borrows = math::add(market.total_borrows, interest)?;
    market.last_accrual_ts = now;

    Ok(Some(AccrualOutcome {
        elapsed,
        interest,
        depositor_share,
        protocol_share,
    }))
}

/// Stores the APR for the next slice. Runs after all mutations of a call.
pub fn refresh_rate(market: &mut Market) -> Result<(), ProgramError> {
    let util = utilization_bps(market)?;
    market.last_apr_bps = apr_bps(&market.rate_curve, util)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{new_market, RiskParams};
    use solana_program::pubkey::Pubkey;

    fn market() -> Market {
        new_market(
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
            RateCurve {
                base_bps: 200,
                util_cap_bps: 8_000,
                kink_bps: 8_000,
                slope1_bps: 800,
                slope2_bps: 6_000,
                max_apr_bps: 0,
            },
            RiskParams {
                ltv_bps: 5_000,
                liq_threshold_bps: 9_000,
                liq_bonus_max_bps: 800,
                protocol_share_bps: 2_000,
                origination_fee_bps: 0,
            },
            1_000,
        )
        .unwrap()
    }

    #[test]
    fn utilization_is_zero_on_empty_pool() {
        let market = market();
        assert_eq!(utilization_bps(&market).unwrap(), 0);
    }

    #[test]
    fn utilization_normalizes_against_cap() {
        let mut market = market();
        market.total_deposits = 1_000_000;
        market.total_borrows = 400_000;
        // cap = 800_000, so 400_000 borrowed is 50% utilization
        assert_eq!(utilization_bps(&market).unwrap(), 5_000);
        market.total_borrows = 2_000_000;
        assert_eq!(utilization_bps(&market).unwrap(), 10_000);
    }

    #[test]
    fn apr_follows_both_curve_segments() {
        let curve = market().rate_curve;
        assert_eq!(apr_bps(&curve, 0).unwrap(), 200);
        assert_eq!(apr_bps(&curve, 4_000).unwrap(), 200 + 400);
        assert_eq!(apr_bps(&curve, 8_000).unwrap(), 200 + 800);
        // halfway into the steep segment
        assert_eq!(apr_bps(&curve, 9_000).unwrap(), 200 + 800 + 3_000);
    }

    #[test]
    fn apr_clamps_to_max_when_set() {
        let mut curve = market().rate_curve;
        curve.max_apr_bps = 900;
        assert_eq!(apr_bps(&curve, 9_000).unwrap(), 900);
    }

    #[test]
    fn accrue_is_a_noop_without_elapsed_time() {
        let mut market = market();
        market.last_apr_bps = 1_000;
        let index = market.borrow_index;
        let last_accrual_ts = market.last_accrual_ts;
        assert!(accrue(&mut market, last_accrual_ts).unwrap().is_none());
        assert!(accrue(&mut market, last_accrual_ts - 5)
            .unwrap()
            .is_none());
        assert_eq!(market.borrow_index, index);
    }

    #[test]
    fn accrue_uses_the_previously_recorded_rate() {
        let mut market = market();
        market.total_deposits = 1_000_000;
        market.total_borrows = 500_000;
        // Recorded rate is zero, so a year passes without interest even
        // though current utilization implies a positive rate.
        let outcome = accrue(&mut market, 1_000 + SECONDS_PER_YEAR as i64)
            .unwrap()
            .unwrap();
        assert_eq!(outcome.interest, 0);
        assert_eq!(market.borrow_index, SCALE);

        refresh_rate(&mut market).unwrap();
        assert!(market.last_apr_bps > 0);
    }

    #[test]
    fn accrue_splits_interest_and_advances_index() {
        let mut market = market();
        market.total_deposits = 1_000_000;
        market.total_borrows = 800_000;
        market.last_apr_bps = 1_000; // 10% APR in force for this slice
        let deposits_before = market.total_deposits;

        let outcome = accrue(&mut market, 1_000 + SECONDS_PER_YEAR as i64)
            .unwrap()
            .unwrap();
        // 10% of 800_000 = 80_000, split 80/20
        assert_eq!(outcome.interest, 80_000);
        assert_eq!(outcome.depositor_share, 64_000);
        assert_eq!(outcome.protocol_share, 16_000);
        assert_eq!(market.total_deposits, deposits_before + 64_000);
        assert_eq!(market.fee_pool, 16_000);
        assert_eq!(market.total_borrows, 880_000);
        assert_eq!(market.borrow_index, SCALE + SCALE / 10);
    }

    #[test]
    fn index_never_decreases() {
        let mut market = market();
        market.total_deposits = 1_000_000;
        market.total_borrows = 700_000;
        market.last_apr_bps = 2_500;
        let mut previous = market.borrow_index;
        let mut now = 1_000i64;
        for step in [1i64, 60, 3_600, 86_400, 0, 31_536_000] {
            now += step;
            accrue(&mut market, now).unwrap();
            refresh_rate(&mut market).unwrap();
            assert!(market.borrow_index >= previous);
            previous = market.borrow_index;
        }
    }
}
