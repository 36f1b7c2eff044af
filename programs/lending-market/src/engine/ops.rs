//! Ledger operations. Each `apply_*` function is the complete state
//! transition for one instruction: accrue with the previously recorded
//! rate, validate, mutate, then refresh the rate for the next slice. The
//! processor only adds account plumbing and the token transfers each
//! outcome struct calls for, so every transition is exercisable in plain
//! unit tests.

use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::{program_error::ProgramError, pubkey::Pubkey};

use crate::{
    engine::{
        accrual,
        buyout::{plan_buyout, BuyoutTerms},
        liquidation::plan_liquidation,
        valuation::{AssetQuote, CollateralPricing},
    },
    error::LendingMarketError,
    math::{self, BPS_DENOMINATOR},
    oracle::{PriceSource, ShareExchange},
    state::{
        CollateralConfig, DepositRecord, LoanChangeKind, LoanRecord, MarketState,
    },
};

/// Fraction of the nominal origination fee charged per reputation tier.
const TIER_FEE_FACTORS_BPS: [u64; 5] = [10_000, 9_000, 7_500, 5_000, 2_500];

/// Tier-discounted origination fee on a requested borrow amount.
pub fn origination_fee(amount: u64, fee_bps: u64, tier: u8) -> Result<u64, ProgramError> {
    let nominal = math::bps_of(amount, fee_bps)?;
    let factor = TIER_FEE_FACTORS_BPS[(tier as usize).min(TIER_FEE_FACTORS_BPS.len() - 1)];
    math::mul_div(nominal, factor, BPS_DENOMINATOR)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepositOutcome {
    pub shares_minted: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WithdrawOutcome {
    pub payout: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BorrowOutcome {
    pub disbursement: u64,
    pub fee: u64,
    pub collateral_pledged: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepayOutcome {
    pub repay_used: u64,
    pub refund: u64,
    pub closed: bool,
    pub released_collateral: u64,
    pub collateral_mint: Pubkey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollateralWithdrawalOutcome {
    pub released: u64,
    pub collateral_mint: Pubkey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiquidationOutcome {
    pub repay_used: u64,
    pub refund: u64,
    pub seized: u64,
    pub bonus_bps: u64,
    pub closed: bool,
    pub returned_to_borrower: u64,
    pub collateral_mint: Pubkey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuyoutOutcome {
    pub terms: BuyoutTerms,
    pub collateral_mint: Pubkey,
}

fn require_active(state: &MarketState) -> Result<(), ProgramError> {
    if !state.market.active {
        return Err(LendingMarketError::MarketInactive.into());
    }
    Ok(())
}

fn base_quote(
    state: &MarketState,
    prices: &impl PriceSource,
) -> Result<AssetQuote, ProgramError> {
    let quote = prices.price(&state.market.base_mint)?;
    AssetQuote::new(quote.price_micro_usd, state.market.base_decimals)
}

fn collateral_pricing(
    config: &CollateralConfig,
    prices: &impl PriceSource,
    exchange: &impl ShareExchange,
) -> Result<CollateralPricing, ProgramError> {
    let peer = exchange.peer_rate(&config.peer_market)?;
    let quote = prices.price(&config.underlying_mint)?;
    Ok(CollateralPricing {
        peer,
        underlying: AssetQuote::new(quote.price_micro_usd, config.underlying_decimals)?,
    })
}

/// Permissionless touch: realize pending interest and restate the rate.
pub fn apply_accrue(state: &mut MarketState, now: i64) -> Result<(), ProgramError> {
    accrual::accrue(&mut state.market, now)?;
    accrual::refresh_rate(&mut state.market)
}

/// Deposit base asset, minting pool shares at the post-accrual rate.
pub fn apply_deposit(
    state: &mut MarketState,
    now: i64,
    depositor: &Pubkey,
    amount: u64,
) -> Result<DepositOutcome, ProgramError> {
    require_active(state)?;
    if amount == 0 {
        return Err(LendingMarketError::ZeroAmount.into());
    }
    accrual::accrue(&mut state.market, now)?;

    let market = &mut state.market;
    let shares = if market.total_deposits == 0 || market.circulating_shares == 0 {
        amount
    } else {
        math::mul_div(market.circulating_shares, amount, market.total_deposits)?
    };
    if shares == 0 {
        return Err(LendingMarketError::DepositTooSmall.into());
    }

    market.circulating_shares = math::add(market.circulating_shares, shares)?;
    market.total_deposits = math::add(market.total_deposits, amount)?;
    market.available_cash = math::add(market.available_cash, amount)?;
    state.note_deposit(depositor, amount, now)?;

    accrual::refresh_rate(&mut state.market)?;
    Ok(DepositOutcome {
        shares_minted: shares,
    })
}

/// Burn pool shares for the corresponding slice of the reserve.
pub fn apply_withdraw(
    state: &mut MarketState,
    now: i64,
    shares: u64,
) -> Result<WithdrawOutcome, ProgramError> {
    require_active(state)?;
    if shares == 0 {
        return Err(LendingMarketError::ZeroAmount.into());
    }
    accrual::accrue(&mut state.market, now)?;

    let market = &mut state.market;
    if shares > market.circulating_shares {
        return Err(LendingMarketError::InsufficientLiquidity.into());
    }
    let payout = math::mul_div(market.total_deposits, shares, market.circulating_shares)?;
    if payout > market.available_cash {
        return Err(LendingMarketError::InsufficientLiquidity.into());
    }

    market.circulating_shares -= shares;
    market.total_deposits = math::sub(market.total_deposits, payout)?;
    market.available_cash -= payout;

    accrual::refresh_rate(&mut state.market)?;
    Ok(WithdrawOutcome { payout })
}

/// Open a loan or top up an existing one, pledging additional collateral.
#[allow(clippy::too_many_arguments)]
pub fn apply_borrow(
    state: &mut MarketState,
    now: i64,
    borrower: &Pubkey,
    collateral_mint: &Pubkey,
    pledge: u64,
    amount: u64,
    prices: &impl PriceSource,
    exchange: &impl ShareExchange,
    tier: u8,
) -> Result<BorrowOutcome, ProgramError> {
    require_active(state)?;
    if amount == 0 {
        return Err(LendingMarketError::ZeroAmount.into());
    }
    accrual::accrue(&mut state.market, now)?;
    let index = state.market.borrow_index;

    let pricing = collateral_pricing(state.collateral(collateral_mint)?, prices, exchange)?;
    let base = base_quote(state, prices)?;

    let (live_debt, existing_collateral) = match state.loan(borrower) {
        Some(loan) => {
            if loan.collateral_mint != *collateral_mint {
                return Err(LendingMarketError::CollateralMintMismatch.into());
            }
            (loan.live_debt(index)?, loan.collateral_amount)
        }
        None => (0, 0),
    };

    let collateral_total = math::add(existing_collateral, pledge)?;
    if collateral_total == 0 {
        return Err(LendingMarketError::InsufficientCollateral.into());
    }
    let collateral_usd = pricing.shares_to_usd(collateral_total)?;
    let max_borrow_usd = math::bps_of(collateral_usd, state.market.risk_params.ltv_bps)?;

    let requested_usd = base.to_usd(amount)?;
    let live_debt_usd = base.to_usd(live_debt)?;
    if math::add(requested_usd, live_debt_usd)? > max_borrow_usd {
        return Err(LendingMarketError::LoanToValueExceeded.into());
    }

    // Pool-wide ceiling, independent of the per-loan LTV check.
    let cap = accrual::cap_borrow(&state.market)?;
    if math::add(state.market.total_borrows, amount)? > cap {
        return Err(LendingMarketError::UtilizationCapExceeded.into());
    }

    let fee = origination_fee(
        amount,
        state.market.risk_params.origination_fee_bps,
        tier,
    )?;
    let disbursement = amount - fee;
    if disbursement == 0 {
        return Err(LendingMarketError::ZeroAmount.into());
    }
    if disbursement > state.market.available_cash {
        return Err(LendingMarketError::InsufficientLiquidity.into());
    }

    state.pledge_collateral(collateral_mint, pledge)?;
    match state.loan_mut(borrower) {
        Some(loan) => {
            loan.collateral_amount = collateral_total;
            let principal = math::add(live_debt, disbursement)?;
            loan.resnapshot(principal, index, disbursement, LoanChangeKind::TopUp, now);
        }
        None => {
            state.open_loan(LoanRecord {
                borrower: *borrower,
                collateral_mint: *collateral_mint,
                collateral_amount: collateral_total,
                principal: disbursement,
                user_index: index,
                last_change_amount: disbursement,
                last_change_kind: LoanChangeKind::Open,
                last_change_ts: now,
            })?;
        }
    }

    let market = &mut state.market;
    market.total_borrows = math::add(market.total_borrows, disbursement)?;
    market.fee_pool = math::add(market.fee_pool, fee)?;
    market.available_cash -= disbursement;

    accrual::refresh_rate(&mut state.market)?;
    Ok(BorrowOutcome {
        disbursement,
        fee,
        collateral_pledged: pledge,
    })
}

/// Repay up to the live debt; closing releases all remaining collateral.
pub fn apply_repay(
    state: &mut MarketState,
    now: i64,
    borrower: &Pubkey,
    offered: u64,
) -> Result<RepayOutcome, ProgramError> {
    require_active(state)?;
    if offered == 0 {
        return Err(LendingMarketError::ZeroAmount.into());
    }
    accrual::accrue(&mut state.market, now)?;
    let index = state.market.borrow_index;

    let loan = state
        .loan(borrower)
        .ok_or(LendingMarketError::LoanNotFound)?;
    let collateral_mint = loan.collateral_mint;
    let live_debt = loan.live_debt(index)?;

    let repay_used = offered.min(live_debt);
    let refund = offered - repay_used;

    // Saturating on purpose: per-loan rounding drift must never underflow
    // the aggregate.
    let market = &mut state.market;
    market.total_borrows = market.total_borrows.saturating_sub(repay_used);
    market.available_cash = math::add(market.available_cash, repay_used)?;

    let remaining = live_debt - repay_used;
    let (closed, released_collateral) = if remaining == 0 {
        let record = state.close_loan(borrower)?;
        state.release_collateral(&collateral_mint, record.collateral_amount)?;
        (true, record.collateral_amount)
    } else {
        let loan = state
            .loan_mut(borrower)
            .ok_or(LendingMarketError::LoanNotFound)?;
        loan.resnapshot(remaining, index, repay_used, LoanChangeKind::Repay, now);
        (false, 0)
    };

    accrual::refresh_rate(&mut state.market)?;
    Ok(RepayOutcome {
        repay_used,
        refund,
        closed,
        released_collateral,
        collateral_mint,
    })
}

/// Release collateral down to the LTV-implied requirement.
pub fn apply_withdraw_collateral(
    state: &mut MarketState,
    now: i64,
    borrower: &Pubkey,
    amount: u64,
    prices: &impl PriceSource,
    exchange: &impl ShareExchange,
) -> Result<CollateralWithdrawalOutcome, ProgramError> {
    require_active(state)?;
    if amount == 0 {
        return Err(LendingMarketError::ZeroAmount.into());
    }
    accrual::accrue(&mut state.market, now)?;
    let index = state.market.borrow_index;

    let loan = state
        .loan(borrower)
        .ok_or(LendingMarketError::LoanNotFound)?;
    let collateral_mint = loan.collateral_mint;
    let pledged = loan.collateral_amount;
    let live_debt = loan.live_debt(index)?;

    let pricing = collateral_pricing(state.collateral(&collateral_mint)?, prices, exchange)?;
    let base = base_quote(state, prices)?;

    let collateral_usd = pricing.shares_to_usd(pledged)?;
    let live_debt_usd = base.to_usd(live_debt)?;
    let required_usd = math::mul_div(
        live_debt_usd,
        BPS_DENOMINATOR,
        state.market.risk_params.ltv_bps,
    )?;
    let headroom_usd = collateral_usd.saturating_sub(required_usd);
    let withdrawable = pricing.usd_to_shares(headroom_usd)?.min(pledged);
    if amount > withdrawable {
        return Err(LendingMarketError::InsufficientCollateral.into());
    }

    state.release_collateral(&collateral_mint, amount)?;
    let loan = state
        .loan_mut(borrower)
        .ok_or(LendingMarketError::LoanNotFound)?;
    loan.collateral_amount -= amount;
    loan.last_change_amount = amount;
    loan.last_change_kind = LoanChangeKind::CollateralWithdrawal;
    loan.last_change_ts = now;

    accrual::refresh_rate(&mut state.market)?;
    Ok(CollateralWithdrawalOutcome {
        released: amount,
        collateral_mint,
    })
}

/// Liquidate an undercollateralized position per the plan in
/// [`crate::engine::liquidation`].
pub fn apply_liquidation(
    state: &mut MarketState,
    now: i64,
    borrower: &Pubkey,
    offered: u64,
    prices: &impl PriceSource,
    exchange: &impl ShareExchange,
) -> Result<LiquidationOutcome, ProgramError> {
    require_active(state)?;
    accrual::accrue(&mut state.market, now)?;
    let index = state.market.borrow_index;

    let loan = state
        .loan(borrower)
        .ok_or(LendingMarketError::LoanNotFound)?;
    let collateral_mint = loan.collateral_mint;
    let pledged = loan.collateral_amount;
    let live_debt = loan.live_debt(index)?;

    let pricing = collateral_pricing(state.collateral(&collateral_mint)?, prices, exchange)?;
    let base = base_quote(state, prices)?;

    let plan = plan_liquidation(
        offered,
        live_debt,
        pledged,
        &base,
        &pricing,
        state.market.risk_params.liq_threshold_bps,
        state.market.risk_params.liq_bonus_max_bps,
    )?;

    let market = &mut state.market;
    market.total_borrows = market.total_borrows.saturating_sub(plan.repay_used);
    market.available_cash = math::add(market.available_cash, plan.repay_used)?;

    state.release_collateral(&collateral_mint, plan.seize_shares)?;
    let loan = state
        .loan_mut(borrower)
        .ok_or(LendingMarketError::LoanNotFound)?;
    loan.collateral_amount = loan
        .collateral_amount
        .checked_sub(plan.seize_shares)
        .ok_or(LendingMarketError::InsufficientCollateral)?;

    let returned_to_borrower = if plan.closes_loan {
        let record = state.close_loan(borrower)?;
        state.release_collateral(&collateral_mint, record.collateral_amount)?;
        record.collateral_amount
    } else {
        let remaining = live_debt - plan.repay_used;
        let loan = state
            .loan_mut(borrower)
            .ok_or(LendingMarketError::LoanNotFound)?;
        loan.resnapshot(
            remaining,
            index,
            plan.repay_used,
            LoanChangeKind::Liquidation,
            now,
        );
        0
    };

    accrual::refresh_rate(&mut state.market)?;
    Ok(LiquidationOutcome {
        repay_used: plan.repay_used,
        refund: plan.refund,
        seized: plan.seize_shares,
        bonus_bps: plan.bonus_bps,
        closed: plan.closes_loan,
        returned_to_borrower,
        collateral_mint,
    })
}

/// Buy out a healthy position: premium plus full repayment for the pledge.
pub fn apply_buyout(
    state: &mut MarketState,
    now: i64,
    borrower: &Pubkey,
    premium_offered: u64,
    repay_offered: u64,
    prices: &impl PriceSource,
    exchange: &impl ShareExchange,
) -> Result<BuyoutOutcome, ProgramError> {
    require_active(state)?;
    accrual::accrue(&mut state.market, now)?;
    let index = state.market.borrow_index;

    let loan = state
        .loan(borrower)
        .ok_or(LendingMarketError::LoanNotFound)?;
    let collateral_mint = loan.collateral_mint;
    let pledged = loan.collateral_amount;
    let live_debt = loan.live_debt(index)?;

    let pricing = collateral_pricing(state.collateral(&collateral_mint)?, prices, exchange)?;
    let base = base_quote(state, prices)?;
    let premium_price = prices.price(&state.market.premium_mint)?;
    let premium_quote =
        AssetQuote::new(premium_price.price_micro_usd, state.market.premium_decimals)?;

    let terms = plan_buyout(
        premium_offered,
        repay_offered,
        live_debt,
        pledged,
        &base,
        &pricing,
        &premium_quote,
        state.market.risk_params.liq_threshold_bps,
    )?;

    let market = &mut state.market;
    market.total_borrows = market.total_borrows.saturating_sub(terms.debt_paid);
    market.available_cash = math::add(market.available_cash, terms.debt_paid)?;

    let record = state.close_loan(borrower)?;
    state.release_collateral(&collateral_mint, record.collateral_amount)?;

    accrual::refresh_rate(&mut state.market)?;
    Ok(BuyoutOutcome {
        terms,
        collateral_mint,
    })
}

/// Pay accrued protocol fees out of the vault.
pub fn apply_fee_withdrawal(
    state: &mut MarketState,
    now: i64,
    amount: u64,
) -> Result<(), ProgramError> {
    if amount == 0 {
        return Err(LendingMarketError::ZeroAmount.into());
    }
    accrual::accrue(&mut state.market, now)?;

    let market = &mut state.market;
    if amount > market.fee_pool {
        return Err(LendingMarketError::InsufficientFees.into());
    }
    if amount > market.available_cash {
        return Err(LendingMarketError::InsufficientLiquidity.into());
    }
    market.fee_pool -= amount;
    market.available_cash -= amount;

    accrual::refresh_rate(&mut state.market)
}

/// Full copy of a market's mutable ledger, used by the migration path.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct MarketSnapshot {
    pub circulating_shares: u64,
    pub total_deposits: u64,
    pub total_borrows: u64,
    pub available_cash: u64,
    pub fee_pool: u64,
    pub borrow_index: u64,
    pub last_accrual_ts: i64,
    pub last_apr_bps: u64,
    pub active_loan_count: u32,
    pub collateral_totals: Vec<(Pubkey, u64)>,
    pub loans: Vec<LoanRecord>,
    pub deposits: Vec<DepositRecord>,
}

/// Pulls a snapshot; no accrual, the ledger is copied as recorded.
pub fn snapshot(state: &MarketState) -> MarketSnapshot {
    MarketSnapshot {
        circulating_shares: state.market.circulating_shares,
        total_deposits: state.market.total_deposits,
        total_borrows: state.market.total_borrows,
        available_cash: state.market.available_cash,
        fee_pool: state.market.fee_pool,
        borrow_index: state.market.borrow_index,
        last_accrual_ts: state.market.last_accrual_ts,
        last_apr_bps: state.market.last_apr_bps,
        active_loan_count: state.market.active_loan_count,
        collateral_totals: state
            .collaterals
            .iter()
            .map(|config| (config.share_mint, config.total_pledged))
            .collect(),
        loans: state.loans.clone(),
        deposits: state.deposits.clone(),
    }
}

/// Replays a snapshot into a successor instance. The successor must already
/// have every referenced collateral asset registered.
pub fn restore(target: &mut MarketState, snap: &MarketSnapshot) -> Result<(), ProgramError> {
    if snap.loans.len() > MarketState::MAX_ACTIVE_LOANS
        || snap.deposits.len() > MarketState::MAX_DEPOSIT_RECORDS
    {
        return Err(LendingMarketError::CapacityExhausted.into());
    }
    for (share_mint, total_pledged) in &snap.collateral_totals {
        let config = target.collateral_mut(share_mint)?;
        config.total_pledged = *total_pledged;
    }

    let market = &mut target.market;
    market.circulating_shares = snap.circulating_shares;
    market.total_deposits = snap.total_deposits;
    market.total_borrows = snap.total_borrows;
    market.available_cash = snap.available_cash;
    market.fee_pool = snap.fee_pool;
    market.borrow_index = snap.borrow_index;
    market.last_accrual_ts = snap.last_accrual_ts;
    market.last_apr_bps = snap.last_apr_bps;
    market.active_loan_count = snap.active_loan_count;

    target.loans = snap.loans.clone();
    target.deposits = snap.deposits.clone();
    Ok(())
}
