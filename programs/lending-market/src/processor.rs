use borsh::BorshSerialize;
use solana_program::{
    account_info::{next_account_info, AccountInfo},
    entrypoint::ProgramResult,
    msg,
    program::{invoke, invoke_signed},
    program_error::ProgramError,
    pubkey::Pubkey,
    system_instruction,
    sysvar::{clock::Clock, rent::Rent, Sysvar},
};

use crate::{
    engine,
    error::LendingMarketError,
    instruction::{InitializeMarketParams, LendingInstruction, RegisterCollateralParams},
    oracle::{ExchangeBook, PeerRate, PriceFeed, QuoteBook, TierRegistry},
    state::{new_market, CollateralConfig, MarketState},
};

/// Seed prefix for the market authority PDA that owns the vaults and the
/// share mint.
pub const AUTHORITY_SEED: &[u8] = b"authority";

pub fn process_instruction(
    program_id: &Pubkey,
    accounts: &[AccountInfo],
    instruction_data: &[u8],
) -> ProgramResult {
    let instruction = LendingInstruction::unpack(instruction_data)?;

    match instruction {
        LendingInstruction::InitializeMarket { params } => {
            msg!("Instruction: InitializeMarket");
            process_initialize_market(program_id, accounts, params)
        }
        LendingInstruction::SetMarketActive { active } => {
            msg!("Instruction: SetMarketActive");
            process_set_market_active(program_id, accounts, active)
        }
        LendingInstruction::UpdateRateCurve {
            base_bps,
            util_cap_bps,
            kink_bps,
            slope1_bps,
            slope2_bps,
            max_apr_bps,
        } => {
            msg!("Instruction: UpdateRateCurve");
            process_update_rate_curve(
                program_id,
                accounts,
                [
                    base_bps,
                    util_cap_bps,
                    kink_bps,
                    slope1_bps,
                    slope2_bps,
                    max_apr_bps,
                ],
            )
        }
        LendingInstruction::UpdateRiskParams {
            ltv_bps,
            liq_threshold_bps,
            liq_bonus_max_bps,
            protocol_share_bps,
            origination_fee_bps,
        } => {
            msg!("Instruction: UpdateRiskParams");
            process_update_risk_params(
                program_id,
                accounts,
                [
                    ltv_bps,
                    liq_threshold_bps,
                    liq_bonus_max_bps,
                    protocol_share_bps,
                    origination_fee_bps,
                ],
            )
        }
        LendingInstruction::RegisterCollateral { params } => {
            msg!("Instruction: RegisterCollateral");
            process_register_collateral(program_id, accounts, params)
        }
        LendingInstruction::DeregisterCollateral { share_mint } => {
            msg!("Instruction: DeregisterCollateral");
            process_deregister_collateral(program_id, accounts, share_mint)
        }
        LendingInstruction::Deposit { amount } => {
            msg!("Instruction: Deposit");
            process_deposit(program_id, accounts, amount)
        }
        LendingInstruction::Withdraw { shares } => {
            msg!("Instruction: Withdraw");
            process_withdraw(program_id, accounts, shares)
        }
        LendingInstruction::Borrow {
            collateral_mint,
            collateral_amount,
            amount,
        } => {
            msg!("Instruction: Borrow");
            process_borrow(program_id, accounts, collateral_mint, collateral_amount, amount)
        }
        LendingInstruction::Repay { borrower, amount } => {
            msg!("Instruction: Repay");
            process_repay(program_id, accounts, borrower, amount)
        }
        LendingInstruction::WithdrawCollateral { amount } => {
            msg!("Instruction: WithdrawCollateral");
            process_withdraw_collateral(program_id, accounts, amount)
        }
        LendingInstruction::Liquidate { borrower, amount } => {
            msg!("Instruction: Liquidate");
            process_liquidate(program_id, accounts, borrower, amount)
        }
        LendingInstruction::Buyout {
            borrower,
            premium_offered,
            repay_offered,
        } => {
            msg!("Instruction: Buyout");
            process_buyout(program_id, accounts, borrower, premium_offered, repay_offered)
        }
        LendingInstruction::WithdrawFees { amount } => {
            msg!("Instruction: WithdrawFees");
            process_withdraw_fees(program_id, accounts, amount)
        }
        LendingInstruction::AccrueInterest => {
            msg!("Instruction: AccrueInterest");
            process_accrue_interest(program_id, accounts)
        }
        LendingInstruction::MigrateState => {
            msg!("Instruction: MigrateState");
            process_migrate_state(program_id, accounts)
        }
    }
}

/// Derives the market authority PDA for a market state account.
pub fn market_authority(program_id: &Pubkey, market_key: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[AUTHORITY_SEED, market_key.as_ref()], program_id)
}

fn assert_signer(account: &AccountInfo) -> ProgramResult {
    if !account.is_signer {
        return Err(ProgramError::MissingRequiredSignature);
    }
    Ok(())
}

fn assert_key(account: &AccountInfo, expected: &Pubkey, err: LendingMarketError) -> ProgramResult {
    if account.key != expected {
        return Err(err.into());
    }
    Ok(())
}

fn assert_token_program(account: &AccountInfo) -> ProgramResult {
    if account.key != &spl_token::id() {
        return Err(ProgramError::IncorrectProgramId);
    }
    Ok(())
}

fn load_market(account: &AccountInfo, program_id: &Pubkey) -> Result<MarketState, ProgramError> {
    if account.owner != program_id {
        return Err(ProgramError::IncorrectProgramId);
    }
    MarketState::load(&account.data.borrow())
}

fn store_market(state: &MarketState, account: &AccountInfo) -> ProgramResult {
    state.serialize(&mut &mut account.data.borrow_mut()[..])?;
    Ok(())
}

fn verify_authority(
    authority_info: &AccountInfo,
    program_id: &Pubkey,
    market_key: &Pubkey,
    bump: u8,
) -> ProgramResult {
    let expected = Pubkey::create_program_address(
        &[AUTHORITY_SEED, market_key.as_ref(), &[bump]],
        program_id,
    )
    .map_err(|_| ProgramError::InvalidSeeds)?;
    if authority_info.key != &expected {
        return Err(ProgramError::InvalidSeeds);
    }
    Ok(())
}

#[allow(deprecated)]
fn token_transfer<'a>(
    token_program: &AccountInfo<'a>,
    source: &AccountInfo<'a>,
    destination: &AccountInfo<'a>,
    authority: &AccountInfo<'a>,
    amount: u64,
    signer_seeds: Option<&[&[u8]]>,
) -> ProgramResult {
    if amount == 0 {
        return Ok(());
    }
    let ix = spl_token::instruction::transfer(
        token_program.key,
        source.key,
        destination.key,
        authority.key,
        &[],
        amount,
    )?;
    let accounts = [
        source.clone(),
        destination.clone(),
        authority.clone(),
        token_program.clone(),
    ];
    match signer_seeds {
        Some(seeds) => invoke_signed(&ix, &accounts, &[seeds]),
        None => invoke(&ix, &accounts),
    }
}

fn token_mint_to<'a>(
    token_program: &AccountInfo<'a>,
    mint: &AccountInfo<'a>,
    destination: &AccountInfo<'a>,
    authority: &AccountInfo<'a>,
    amount: u64,
    signer_seeds: &[&[u8]],
) -> ProgramResult {
    let ix = spl_token::instruction::mint_to(
        token_program.key,
        mint.key,
        destination.key,
        authority.key,
        &[],
        amount,
    )?;
    invoke_signed(
        &ix,
        &[
            mint.clone(),
            destination.clone(),
            authority.clone(),
            token_program.clone(),
        ],
        &[signer_seeds],
    )
}

fn token_burn<'a>(
    token_program: &AccountInfo<'a>,
    account: &AccountInfo<'a>,
    mint: &AccountInfo<'a>,
    authority: &AccountInfo<'a>,
    amount: u64,
) -> ProgramResult {
    let ix = spl_token::instruction::burn(
        token_program.key,
        account.key,
        mint.key,
        authority.key,
        &[],
        amount,
    )?;
    invoke(
        &ix,
        &[
            account.clone(),
            mint.clone(),
            authority.clone(),
            token_program.clone(),
        ],
    )
}

/// Reads the peer market state an instruction passed in and reduces it to
/// the exchange-rate pair.
fn load_peer_rate(
    peer_info: &AccountInfo,
    expected_key: &Pubkey,
    program_id: &Pubkey,
) -> Result<PeerRate, ProgramError> {
    if peer_info.key != expected_key {
        return Err(LendingMarketError::InvalidPeerMarket.into());
    }
    if peer_info.owner != program_id {
        return Err(LendingMarketError::InvalidPeerMarket.into());
    }
    let peer = MarketState::load(&peer_info.data.borrow())?;
    Ok(PeerRate {
        total_deposits: peer.market.total_deposits,
        circulating_shares: peer.market.circulating_shares,
    })
}

/// Builds the price and exchange books for an operation on one collateral
/// asset.
fn collateral_books(
    state: &MarketState,
    config: &CollateralConfig,
    base_oracle_info: &AccountInfo,
    underlying_oracle_info: &AccountInfo,
    peer_info: &AccountInfo,
    program_id: &Pubkey,
) -> Result<(QuoteBook, ExchangeBook), ProgramError> {
    let mut quotes = QuoteBook::new();
    quotes.insert(
        state.market.base_mint,
        PriceFeed::load_quote(base_oracle_info, &state.market.base_oracle, &state.market.base_mint)?,
    );
    quotes.insert(
        config.underlying_mint,
        PriceFeed::load_quote(
            underlying_oracle_info,
            &config.underlying_oracle,
            &config.underlying_mint,
        )?,
    );

    let mut exchange = ExchangeBook::new();
    exchange.insert(
        config.peer_market,
        load_peer_rate(peer_info, &config.peer_market, program_id)?,
    );
    Ok((quotes, exchange))
}

fn process_initialize_market(
    program_id: &Pubkey,
    accounts: &[AccountInfo],
    params: InitializeMarketParams,
) -> ProgramResult {
    let account_info_iter = &mut accounts.iter();

    let payer_info = next_account_info(account_info_iter)?;
    let market_info = next_account_info(account_info_iter)?;
    let system_program = next_account_info(account_info_iter)?;
    let rent_sysvar = next_account_info(account_info_iter)?;

    assert_signer(payer_info)?;
    assert_signer(market_info)?;

    let rent = &Rent::from_account_info(rent_sysvar)?;
    let required_lamports = rent.minimum_balance(MarketState::LEN);

    invoke(
        &system_instruction::create_account(
            payer_info.key,
            market_info.key,
            required_lamports,
            MarketState::LEN as u64,
            program_id,
        ),
        &[payer_info.clone(), market_info.clone(), system_program.clone()],
    )?;

    let (_, bump) = market_authority(program_id, market_info.key);
    let now = Clock::get()?.unix_timestamp;
    let market = new_market(
        params.base_mint,
        params.base_decimals,
        params.base_oracle,
        params.share_mint,
        params.base_vault,
        params.premium_mint,
        params.premium_decimals,
        params.premium_oracle,
        params.fee_premium_vault,
        bump,
        params.param_admin,
        params.fee_admin,
        params.init_admin,
        params.migration_admin,
        params.rate_curve,
        params.risk_params,
        now,
    )?;
    let state = MarketState::new(market);
    store_market(&state, market_info)?;

    msg!("Market initialized for base mint {}", params.base_mint);
    Ok(())
}

fn process_set_market_active(
    program_id: &Pubkey,
    accounts: &[AccountInfo],
    active: bool,
) -> ProgramResult {
    let account_info_iter = &mut accounts.iter();
    let admin_info = next_account_info(account_info_iter)?;
    let market_info = next_account_info(account_info_iter)?;

    assert_signer(admin_info)?;
    let mut state = load_market(market_info, program_id)?;
    if admin_info.key != &state.market.param_admin {
        return Err(LendingMarketError::Unauthorized.into());
    }

    state.market.active = active;
    store_market(&state, market_info)?;
    msg!("Market active: {}", active);
    Ok(())
}

fn process_update_rate_curve(
    program_id: &Pubkey,
    accounts: &[AccountInfo],
    updates: [Option<u64>; 6],
) -> ProgramResult {
    let account_info_iter = &mut accounts.iter();
    let admin_info = next_account_info(account_info_iter)?;
    let market_info = next_account_info(account_info_iter)?;

    assert_signer(admin_info)?;
    let mut state = load_market(market_info, program_id)?;
    if admin_info.key != &state.market.param_admin {
        return Err(LendingMarketError::Unauthorized.into());
    }

    // Settle the running slice at the old parameters before they change.
    let now = Clock::get()?.unix_timestamp;
    engine::accrue(&mut state.market, now)?;

    let [base_bps, util_cap_bps, kink_bps, slope1_bps, slope2_bps, max_apr_bps] = updates;
    let curve = &mut state.market.rate_curve;
    if let Some(value) = base_bps {
        curve.base_bps = value;
    }
    if let Some(value) = util_cap_bps {
        curve.util_cap_bps = value;
    }
    if let Some(value) = kink_bps {
        curve.kink_bps = value;
    }
    if let Some(value) = slope1_bps {
        curve.slope1_bps = value;
    }
    if let Some(value) = slope2_bps {
        curve.slope2_bps = value;
    }
    if let Some(value) = max_apr_bps {
        curve.max_apr_bps = value;
    }
    state.market.rate_curve.validate()?;

    engine::refresh_rate(&mut state.market)?;
    store_market(&state, market_info)?;
    msg!("Rate curve updated");
    Ok(())
}

fn process_update_risk_params(
    program_id: &Pubkey,
    accounts: &[AccountInfo],
    updates: [Option<u64>; 5],
) -> ProgramResult {
    let account_info_iter = &mut accounts.iter();
    let admin_info = next_account_info(account_info_iter)?;
    let market_info = next_account_info(account_info_iter)?;

    assert_signer(admin_info)?;
    let mut state = load_market(market_info, program_id)?;
    if admin_info.key != &state.market.param_admin {
        return Err(LendingMarketError::Unauthorized.into());
    }

    let now = Clock::get()?.unix_timestamp;
    engine::accrue(&mut state.market, now)?;

    let [ltv_bps, liq_threshold_bps, liq_bonus_max_bps, protocol_share_bps, origination_fee_bps] =
        updates;
    let params = &mut state.market.risk_params;
    if let Some(value) = ltv_bps {
        params.ltv_bps = value;
    }
    if let Some(value) = liq_threshold_bps {
        params.liq_threshold_bps = value;
    }
    if let Some(value) = liq_bonus_max_bps {
        params.liq_bonus_max_bps = value;
    }
    if let Some(value) = protocol_share_bps {
        params.protocol_share_bps = value;
    }
    if let Some(value) = origination_fee_bps {
        params.origination_fee_bps = value;
    }
    state.market.risk_params.validate()?;

    engine::refresh_rate(&mut state.market)?;
    store_market(&state, market_info)?;
    msg!("Risk parameters updated");
    Ok(())
}

fn process_register_collateral(
    program_id: &Pubkey,
    accounts: &[AccountInfo],
    params: RegisterCollateralParams,
) -> ProgramResult {
    let account_info_iter = &mut accounts.iter();
    let admin_info = next_account_info(account_info_iter)?;
    let market_info = next_account_info(account_info_iter)?;

    assert_signer(admin_info)?;
    let mut state = load_market(market_info, program_id)?;
    if admin_info.key != &state.market.init_admin {
        return Err(LendingMarketError::Unauthorized.into());
    }

    state.register_collateral(CollateralConfig {
        share_mint: params.share_mint,
        peer_market: params.peer_market,
        underlying_mint: params.underlying_mint,
        underlying_decimals: params.underlying_decimals,
        underlying_oracle: params.underlying_oracle,
        vault: params.vault,
        total_pledged: 0,
    })?;

    store_market(&state, market_info)?;
    msg!("Collateral registered: {}", params.share_mint);
    Ok(())
}

fn process_deregister_collateral(
    program_id: &Pubkey,
    accounts: &[AccountInfo],
    share_mint: Pubkey,
) -> ProgramResult {
    let account_info_iter = &mut accounts.iter();
    let admin_info = next_account_info(account_info_iter)?;
    let market_info = next_account_info(account_info_iter)?;

    assert_signer(admin_info)?;
    let mut state = load_market(market_info, program_id)?;
    if admin_info.key != &state.market.init_admin {
        return Err(LendingMarketError::Unauthorized.into());
    }

    state.deregister_collateral(&share_mint)?;
    store_market(&state, market_info)?;
    msg!("Collateral deregistered: {}", share_mint);
    Ok(())
}

fn process_deposit(program_id: &Pubkey, accounts: &[AccountInfo], amount: u64) -> ProgramResult {
    let account_info_iter = &mut accounts.iter();
    let depositor_info = next_account_info(account_info_iter)?;
    let market_info = next_account_info(account_info_iter)?;
    let depositor_base_info = next_account_info(account_info_iter)?;
    let base_vault_info = next_account_info(account_info_iter)?;
    let share_mint_info = next_account_info(account_info_iter)?;
    let depositor_share_info = next_account_info(account_info_iter)?;
    let authority_info = next_account_info(account_info_iter)?;
    let token_program = next_account_info(account_info_iter)?;

    assert_signer(depositor_info)?;
    assert_token_program(token_program)?;

    let mut state = load_market(market_info, program_id)?;
    assert_key(
        base_vault_info,
        &state.market.base_vault,
        LendingMarketError::InvalidVaultAccount,
    )?;
    assert_key(
        share_mint_info,
        &state.market.share_mint,
        LendingMarketError::InvalidVaultAccount,
    )?;
    verify_authority(authority_info, program_id, market_info.key, state.market.authority_bump)?;

    let now = Clock::get()?.unix_timestamp;
    let outcome = engine::apply_deposit(&mut state, now, depositor_info.key, amount)?;

    token_transfer(
        token_program,
        depositor_base_info,
        base_vault_info,
        depositor_info,
        amount,
        None,
    )?;
    let bump = [state.market.authority_bump];
    let seeds: &[&[u8]] = &[AUTHORITY_SEED, market_info.key.as_ref(), &bump];
    token_mint_to(
        token_program,
        share_mint_info,
        depositor_share_info,
        authority_info,
        outcome.shares_minted,
        seeds,
    )?;

    store_market(&state, market_info)?;
    msg!("Deposited {} for {} shares", amount, outcome.shares_minted);
    Ok(())
}

fn process_withdraw(program_id: &Pubkey, accounts: &[AccountInfo], shares: u64) -> ProgramResult {
    let account_info_iter = &mut accounts.iter();
    let depositor_info = next_account_info(account_info_iter)?;
    let market_info = next_account_info(account_info_iter)?;
    let depositor_share_info = next_account_info(account_info_iter)?;
    let share_mint_info = next_account_info(account_info_iter)?;
    let base_vault_info = next_account_info(account_info_iter)?;
    let depositor_base_info = next_account_info(account_info_iter)?;
    let authority_info = next_account_info(account_info_iter)?;
    let token_program = next_account_info(account_info_iter)?;

    assert_signer(depositor_info)?;
    assert_token_program(token_program)?;

    let mut state = load_market(market_info, program_id)?;
    assert_key(
        base_vault_info,
        &state.market.base_vault,
        LendingMarketError::InvalidVaultAccount,
    )?;
    assert_key(
        share_mint_info,
        &state.market.share_mint,
        LendingMarketError::InvalidVaultAccount,
    )?;
    verify_authority(authority_info, program_id, market_info.key, state.market.authority_bump)?;

    let now = Clock::get()?.unix_timestamp;
    let outcome = engine::apply_withdraw(&mut state, now, shares)?;

    token_burn(
        token_program,
        depositor_share_info,
        share_mint_info,
        depositor_info,
        shares,
    )?;
    let bump = [state.market.authority_bump];
    let seeds: &[&[u8]] = &[AUTHORITY_SEED, market_info.key.as_ref(), &bump];
    token_transfer(
        token_program,
        base_vault_info,
        depositor_base_info,
        authority_info,
        outcome.payout,
        Some(seeds),
    )?;

    store_market(&state, market_info)?;
    msg!("Withdrew {} shares for {}", shares, outcome.payout);
    Ok(())
}

fn process_borrow(
    program_id: &Pubkey,
    accounts: &[AccountInfo],
    collateral_mint: Pubkey,
    collateral_amount: u64,
    amount: u64,
) -> ProgramResult {
    let account_info_iter = &mut accounts.iter();
    let borrower_info = next_account_info(account_info_iter)?;
    let market_info = next_account_info(account_info_iter)?;
    let borrower_collateral_info = next_account_info(account_info_iter)?;
    let collateral_vault_info = next_account_info(account_info_iter)?;
    let base_vault_info = next_account_info(account_info_iter)?;
    let borrower_base_info = next_account_info(account_info_iter)?;
    let authority_info = next_account_info(account_info_iter)?;
    let base_oracle_info = next_account_info(account_info_iter)?;
    let underlying_oracle_info = next_account_info(account_info_iter)?;
    let peer_info = next_account_info(account_info_iter)?;
    let token_program = next_account_info(account_info_iter)?;
    let tier_registry_info = account_info_iter.next();

    assert_signer(borrower_info)?;
    assert_token_program(token_program)?;

    let mut state = load_market(market_info, program_id)?;
    assert_key(
        base_vault_info,
        &state.market.base_vault,
        LendingMarketError::InvalidVaultAccount,
    )?;
    verify_authority(authority_info, program_id, market_info.key, state.market.authority_bump)?;

    let config = state.collateral(&collateral_mint)?.clone();
    assert_key(
        collateral_vault_info,
        &config.vault,
        LendingMarketError::InvalidVaultAccount,
    )?;
    let (quotes, exchange) = collateral_books(
        &state,
        &config,
        base_oracle_info,
        underlying_oracle_info,
        peer_info,
        program_id,
    )?;
    let tier = TierRegistry::resolve(tier_registry_info, borrower_info.key);

    let now = Clock::get()?.unix_timestamp;
    let outcome = engine::apply_borrow(
        &mut state,
        now,
        borrower_info.key,
        &collateral_mint,
        collateral_amount,
        amount,
        &quotes,
        &exchange,
        tier,
    )?;

    token_transfer(
        token_program,
        borrower_collateral_info,
        collateral_vault_info,
        borrower_info,
        outcome.collateral_pledged,
        None,
    )?;
    let bump = [state.market.authority_bump];
    let seeds: &[&[u8]] = &[AUTHORITY_SEED, market_info.key.as_ref(), &bump];
    token_transfer(
        token_program,
        base_vault_info,
        borrower_base_info,
        authority_info,
        outcome.disbursement,
        Some(seeds),
    )?;

    store_market(&state, market_info)?;
    msg!(
        "Borrowed {} (fee {}) against {} collateral",
        outcome.disbursement,
        outcome.fee,
        collateral_amount
    );
    Ok(())
}

fn process_repay(
    program_id: &Pubkey,
    accounts: &[AccountInfo],
    borrower: Pubkey,
    amount: u64,
) -> ProgramResult {
    let account_info_iter = &mut accounts.iter();
    let payer_info = next_account_info(account_info_iter)?;
    let market_info = next_account_info(account_info_iter)?;
    let payer_base_info = next_account_info(account_info_iter)?;
    let base_vault_info = next_account_info(account_info_iter)?;
    let collateral_vault_info = next_account_info(account_info_iter)?;
    let borrower_collateral_info = next_account_info(account_info_iter)?;
    let authority_info = next_account_info(account_info_iter)?;
    let token_program = next_account_info(account_info_iter)?;

    assert_signer(payer_info)?;
    assert_token_program(token_program)?;

    let mut state = load_market(market_info, program_id)?;
    assert_key(
        base_vault_info,
        &state.market.base_vault,
        LendingMarketError::InvalidVaultAccount,
    )?;
    verify_authority(authority_info, program_id, market_info.key, state.market.authority_bump)?;

    let now = Clock::get()?.unix_timestamp;
    let outcome = engine::apply_repay(&mut state, now, &borrower, amount)?;

    // Only the used portion moves; the excess never leaves the payer.
    token_transfer(
        token_program,
        payer_base_info,
        base_vault_info,
        payer_info,
        outcome.repay_used,
        None,
    )?;
    if outcome.closed && outcome.released_collateral > 0 {
        let config = state.collateral(&outcome.collateral_mint)?;
        assert_key(
            collateral_vault_info,
            &config.vault,
            LendingMarketError::InvalidVaultAccount,
        )?;
        let bump = [state.market.authority_bump];
        let seeds: &[&[u8]] = &[AUTHORITY_SEED, market_info.key.as_ref(), &bump];
        token_transfer(
            token_program,
            collateral_vault_info,
            borrower_collateral_info,
            authority_info,
            outcome.released_collateral,
            Some(seeds),
        )?;
    }

    store_market(&state, market_info)?;
    msg!(
        "Repaid {} (refund {}), loan closed: {}",
        outcome.repay_used,
        outcome.refund,
        outcome.closed
    );
    Ok(())
}

fn process_withdraw_collateral(
    program_id: &Pubkey,
    accounts: &[AccountInfo],
    amount: u64,
) -> ProgramResult {
    let account_info_iter = &mut accounts.iter();
    let borrower_info = next_account_info(account_info_iter)?;
    let market_info = next_account_info(account_info_iter)?;
    let collateral_vault_info = next_account_info(account_info_iter)?;
    let borrower_collateral_info = next_account_info(account_info_iter)?;
    let authority_info = next_account_info(account_info_iter)?;
    let base_oracle_info = next_account_info(account_info_iter)?;
    let underlying_oracle_info = next_account_info(account_info_iter)?;
    let peer_info = next_account_info(account_info_iter)?;
    let token_program = next_account_info(account_info_iter)?;

    assert_signer(borrower_info)?;
    assert_token_program(token_program)?;

    let mut state = load_market(market_info, program_id)?;
    verify_authority(authority_info, program_id, market_info.key, state.market.authority_bump)?;

    let loan = state
        .loan(borrower_info.key)
        .ok_or(LendingMarketError::LoanNotFound)?;
    let config = state.collateral(&loan.collateral_mint)?.clone();
    assert_key(
        collateral_vault_info,
        &config.vault,
        LendingMarketError::InvalidVaultAccount,
    )?;
    let (quotes, exchange) = collateral_books(
        &state,
        &config,
        base_oracle_info,
        underlying_oracle_info,
        peer_info,
        program_id,
    )?;

    let now = Clock::get()?.unix_timestamp;
    let outcome = engine::apply_withdraw_collateral(
        &mut state,
        now,
        borrower_info.key,
        amount,
        &quotes,
        &exchange,
    )?;

    let bump = [state.market.authority_bump];
    let seeds: &[&[u8]] = &[AUTHORITY_SEED, market_info.key.as_ref(), &bump];
    token_transfer(
        token_program,
        collateral_vault_info,
        borrower_collateral_info,
        authority_info,
        outcome.released,
        Some(seeds),
    )?;

    store_market(&state, market_info)?;
    msg!("Collateral withdrawn: {}", outcome.released);
    Ok(())
}

fn process_liquidate(
    program_id: &Pubkey,
    accounts: &[AccountInfo],
    borrower: Pubkey,
    amount: u64,
) -> ProgramResult {
    let account_info_iter = &mut accounts.iter();
    let liquidator_info = next_account_info(account_info_iter)?;
    let market_info = next_account_info(account_info_iter)?;
    let liquidator_base_info = next_account_info(account_info_iter)?;
    let base_vault_info = next_account_info(account_info_iter)?;
    let collateral_vault_info = next_account_info(account_info_iter)?;
    let liquidator_collateral_info = next_account_info(account_info_iter)?;
    let borrower_collateral_info = next_account_info(account_info_iter)?;
    let authority_info = next_account_info(account_info_iter)?;
    let base_oracle_info = next_account_info(account_info_iter)?;
    let underlying_oracle_info = next_account_info(account_info_iter)?;
    let peer_info = next_account_info(account_info_iter)?;
    let token_program = next_account_info(account_info_iter)?;

    assert_signer(liquidator_info)?;
    assert_token_program(token_program)?;

    let mut state = load_market(market_info, program_id)?;
    assert_key(
        base_vault_info,
        &state.market.base_vault,
        LendingMarketError::InvalidVaultAccount,
    )?;
    verify_authority(authority_info, program_id, market_info.key, state.market.authority_bump)?;

    let loan = state
        .loan(&borrower)
        .ok_or(LendingMarketError::LoanNotFound)?;
    let config = state.collateral(&loan.collateral_mint)?.clone();
    assert_key(
        collateral_vault_info,
        &config.vault,
        LendingMarketError::InvalidVaultAccount,
    )?;
    let (quotes, exchange) = collateral_books(
        &state,
        &config,
        base_oracle_info,
        underlying_oracle_info,
        peer_info,
        program_id,
    )?;

    let now = Clock::get()?.unix_timestamp;
    let outcome =
        engine::apply_liquidation(&mut state, now, &borrower, amount, &quotes, &exchange)?;

    token_transfer(
        token_program,
        liquidator_base_info,
        base_vault_info,
        liquidator_info,
        outcome.repay_used,
        None,
    )?;
    let bump = [state.market.authority_bump];
    let seeds: &[&[u8]] = &[AUTHORITY_SEED, market_info.key.as_ref(), &bump];
    token_transfer(
        token_program,
        collateral_vault_info,
        liquidator_collateral_info,
        authority_info,
        outcome.seized,
        Some(seeds),
    )?;
    if outcome.returned_to_borrower > 0 {
        token_transfer(
            token_program,
            collateral_vault_info,
            borrower_collateral_info,
            authority_info,
            outcome.returned_to_borrower,
            Some(seeds),
        )?;
    }

    store_market(&state, market_info)?;
    msg!(
        "Liquidated: repaid {}, seized {} (bonus {} bps), closed: {}",
        outcome.repay_used,
        outcome.seized,
        outcome.bonus_bps,
        outcome.closed
    );
    Ok(())
}

fn process_buyout(
    program_id: &Pubkey,
    accounts: &[AccountInfo],
    borrower: Pubkey,
    premium_offered: u64,
    repay_offered: u64,
) -> ProgramResult {
    let account_info_iter = &mut accounts.iter();
    let buyer_info = next_account_info(account_info_iter)?;
    let market_info = next_account_info(account_info_iter)?;
    let buyer_premium_info = next_account_info(account_info_iter)?;
    let fee_premium_vault_info = next_account_info(account_info_iter)?;
    let borrower_premium_info = next_account_info(account_info_iter)?;
    let buyer_base_info = next_account_info(account_info_iter)?;
    let base_vault_info = next_account_info(account_info_iter)?;
    let collateral_vault_info = next_account_info(account_info_iter)?;
    let buyer_collateral_info = next_account_info(account_info_iter)?;
    let authority_info = next_account_info(account_info_iter)?;
    let base_oracle_info = next_account_info(account_info_iter)?;
    let underlying_oracle_info = next_account_info(account_info_iter)?;
    let premium_oracle_info = next_account_info(account_info_iter)?;
    let peer_info = next_account_info(account_info_iter)?;
    let token_program = next_account_info(account_info_iter)?;

    assert_signer(buyer_info)?;
    assert_token_program(token_program)?;

    let mut state = load_market(market_info, program_id)?;
    assert_key(
        base_vault_info,
        &state.market.base_vault,
        LendingMarketError::InvalidVaultAccount,
    )?;
    assert_key(
        fee_premium_vault_info,
        &state.market.fee_premium_vault,
        LendingMarketError::InvalidVaultAccount,
    )?;
    verify_authority(authority_info, program_id, market_info.key, state.market.authority_bump)?;

    let loan = state
        .loan(&borrower)
        .ok_or(LendingMarketError::LoanNotFound)?;
    let config = state.collateral(&loan.collateral_mint)?.clone();
    assert_key(
        collateral_vault_info,
        &config.vault,
        LendingMarketError::InvalidVaultAccount,
    )?;
    let (mut quotes, exchange) = collateral_books(
        &state,
        &config,
        base_oracle_info,
        underlying_oracle_info,
        peer_info,
        program_id,
    )?;
    quotes.insert(
        state.market.premium_mint,
        PriceFeed::load_quote(
            premium_oracle_info,
            &state.market.premium_oracle,
            &state.market.premium_mint,
        )?,
    );

    let now = Clock::get()?.unix_timestamp;
    let outcome = engine::apply_buyout(
        &mut state,
        now,
        &borrower,
        premium_offered,
        repay_offered,
        &quotes,
        &exchange,
    )?;

    // Premium legs: buyer pays, split between protocol and borrower.
    token_transfer(
        token_program,
        buyer_premium_info,
        fee_premium_vault_info,
        buyer_info,
        outcome.terms.premium_to_protocol,
        None,
    )?;
    token_transfer(
        token_program,
        buyer_premium_info,
        borrower_premium_info,
        buyer_info,
        outcome.terms.premium_to_borrower,
        None,
    )?;
    // Debt leg: full live debt into the reserve.
    token_transfer(
        token_program,
        buyer_base_info,
        base_vault_info,
        buyer_info,
        outcome.terms.debt_paid,
        None,
    )?;
    // Collateral leg: the whole pledge to the buyer.
    let bump = [state.market.authority_bump];
    let seeds: &[&[u8]] = &[AUTHORITY_SEED, market_info.key.as_ref(), &bump];
    token_transfer(
        token_program,
        collateral_vault_info,
        buyer_collateral_info,
        authority_info,
        outcome.terms.collateral_to_buyer,
        Some(seeds),
    )?;

    store_market(&state, market_info)?;
    msg!(
        "Buyout settled: premium {} ({} bps), debt {} cleared",
        outcome.terms.premium,
        outcome.terms.premium_rate_bps,
        outcome.terms.debt_paid
    );
    Ok(())
}

fn process_withdraw_fees(
    program_id: &Pubkey,
    accounts: &[AccountInfo],
    amount: u64,
) -> ProgramResult {
    let account_info_iter = &mut accounts.iter();
    let admin_info = next_account_info(account_info_iter)?;
    let market_info = next_account_info(account_info_iter)?;
    let base_vault_info = next_account_info(account_info_iter)?;
    let destination_info = next_account_info(account_info_iter)?;
    let authority_info = next_account_info(account_info_iter)?;
    let token_program = next_account_info(account_info_iter)?;

    assert_signer(admin_info)?;
    assert_token_program(token_program)?;

    let mut state = load_market(market_info, program_id)?;
    if admin_info.key != &state.market.fee_admin {
        return Err(LendingMarketError::Unauthorized.into());
    }
    assert_key(
        base_vault_info,
        &state.market.base_vault,
        LendingMarketError::InvalidVaultAccount,
    )?;
    verify_authority(authority_info, program_id, market_info.key, state.market.authority_bump)?;

    let now = Clock::get()?.unix_timestamp;
    engine::apply_fee_withdrawal(&mut state, now, amount)?;

    let bump = [state.market.authority_bump];
    let seeds: &[&[u8]] = &[AUTHORITY_SEED, market_info.key.as_ref(), &bump];
    token_transfer(
        token_program,
        base_vault_info,
        destination_info,
        authority_info,
        amount,
        Some(seeds),
    )?;

    store_market(&state, market_info)?;
    msg!("Fees withdrawn: {}", amount);
    Ok(())
}

fn process_accrue_interest(program_id: &Pubkey, accounts: &[AccountInfo]) -> ProgramResult {
    let account_info_iter = &mut accounts.iter();
    let market_info = next_account_info(account_info_iter)?;

    let mut state = load_market(market_info, program_id)?;
    let now = Clock::get()?.unix_timestamp;
    engine::apply_accrue(&mut state, now)?;

    store_market(&state, market_info)?;
    msg!(
        "Accrued to {} at index {}",
        state.market.last_accrual_ts,
        state.market.borrow_index
    );
    Ok(())
}

fn process_migrate_state(program_id: &Pubkey, accounts: &[AccountInfo]) -> ProgramResult {
    let account_info_iter = &mut accounts.iter();
    let admin_info = next_account_info(account_info_iter)?;
    let source_info = next_account_info(account_info_iter)?;
    let target_info = next_account_info(account_info_iter)?;

    assert_signer(admin_info)?;
    let source = load_market(source_info, program_id)?;
    let mut target = load_market(target_info, program_id)?;
    if admin_info.key != &source.market.migration_admin
        || admin_info.key != &target.market.migration_admin
    {
        return Err(LendingMarketError::Unauthorized.into());
    }

    let snap = engine::snapshot(&source);
    engine::restore(&mut target, &snap)?;

    store_market(&target, target_info)?;
    msg!(
        "Migrated {} loans and {} deposit records",
        snap.loans.len(),
        snap.deposits.len()
    );
    Ok(())
}
