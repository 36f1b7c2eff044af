//! End-to-end processor test over the banks client: create a market,
//! reconfigure it, register collateral, and read the ledger back.

use solana_program_test::{processor, ProgramTest};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    transaction::Transaction,
};

use lending_market::{
    instruction::{self, InitializeMarketParams, RegisterCollateralParams},
    math::SCALE,
    state::{MarketState, RateCurve, RiskParams},
};

fn market_params(admin: Pubkey) -> InitializeMarketParams {
    InitializeMarketParams {
        base_mint: Pubkey::new_unique(),
        base_decimals: 6,
        base_oracle: Pubkey::new_unique(),
        share_mint: Pubkey::new_unique(),
        base_vault: Pubkey::new_unique(),
        premium_mint: Pubkey::new_unique(),
        premium_decimals: 6,
        premium_oracle: Pubkey::new_unique(),
        fee_premium_vault: Pubkey::new_unique(),
        param_admin: admin,
        fee_admin: admin,
        init_admin: admin,
        migration_admin: admin,
        rate_curve: RateCurve {
            base_bps: 200,
            util_cap_bps: 8_000,
            kink_bps: 8_000,
            slope1_bps: 800,
            slope2_bps: 6_000,
            max_apr_bps: 0,
        },
        risk_params: RiskParams {
            ltv_bps: 2_500,
            liq_threshold_bps: 9_000,
            liq_bonus_max_bps: 800,
            protocol_share_bps: 2_000,
            origination_fee_bps: 50,
        },
    }
}

#[tokio::test]
async fn initialize_and_configure_market() {
    let program_id = lending_market::id();
    let program_test = ProgramTest::new(
        "lending_market",
        program_id,
        processor!(lending_market::process_instruction),
    );

    let (mut banks_client, payer, recent_blockhash) = program_test.start().await;

    let market = Keypair::new();
    let params = market_params(payer.pubkey());
    let base_mint = params.base_mint;

    let init_ix = instruction::initialize_market(
        &program_id,
        &payer.pubkey(),
        &market.pubkey(),
        params,
    )
    .unwrap();
    let mut transaction = Transaction::new_with_payer(&[init_ix], Some(&payer.pubkey()));
    transaction.sign(&[&payer, &market], recent_blockhash);
    banks_client.process_transaction(transaction).await.unwrap();

    let account = banks_client
        .get_account(market.pubkey())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.owner, program_id);
    let state = MarketState::load(&account.data).unwrap();
    assert!(state.is_initialized);
    assert!(state.market.active);
    assert_eq!(state.market.base_mint, base_mint);
    assert_eq!(state.market.borrow_index, SCALE);
    assert_eq!(state.market.risk_params.ltv_bps, 2_500);
    assert!(state.collaterals.is_empty());

    // Reconfigure, register a collateral asset, and touch the market
    let collateral_params = RegisterCollateralParams {
        share_mint: Pubkey::new_unique(),
        peer_market: Pubkey::new_unique(),
        underlying_mint: Pubkey::new_unique(),
        underlying_decimals: 6,
        underlying_oracle: Pubkey::new_unique(),
        vault: Pubkey::new_unique(),
    };
    let update_ix = instruction::update_risk_params(
        &program_id,
        &payer.pubkey(),
        &market.pubkey(),
        Some(3_000),
        None,
        None,
        None,
        None,
    )
    .unwrap();
    let register_ix = instruction::register_collateral(
        &program_id,
        &payer.pubkey(),
        &market.pubkey(),
        collateral_params.clone(),
    )
    .unwrap();
    let accrue_ix = instruction::accrue_interest(&program_id, &market.pubkey()).unwrap();

    let mut transaction = Transaction::new_with_payer(
        &[update_ix, register_ix, accrue_ix],
        Some(&payer.pubkey()),
    );
    transaction.sign(&[&payer], recent_blockhash);
    banks_client.process_transaction(transaction).await.unwrap();

    let account = banks_client
        .get_account(market.pubkey())
        .await
        .unwrap()
        .unwrap();
    let state = MarketState::load(&account.data).unwrap();
    assert_eq!(state.market.risk_params.ltv_bps, 3_000);
    assert_eq!(state.collaterals.len(), 1);
    assert_eq!(state.collaterals[0].share_mint, collateral_params.share_mint);
    assert_eq!(state.collaterals[0].total_pledged, 0);

    // The index never moves backwards
    assert!(state.market.borrow_index >= SCALE);
}

#[tokio::test]
async fn non_admin_cannot_update_parameters() {
    let program_id = lending_market::id();
    let program_test = ProgramTest::new(
        "lending_market",
        program_id,
        processor!(lending_market::process_instruction),
    );

    let (mut banks_client, payer, recent_blockhash) = program_test.start().await;

    let market = Keypair::new();
    // Admin roles belong to a key the test does not control
    let params = market_params(Pubkey::new_unique());

    let init_ix = instruction::initialize_market(
        &program_id,
        &payer.pubkey(),
        &market.pubkey(),
        params,
    )
    .unwrap();
    let mut transaction = Transaction::new_with_payer(&[init_ix], Some(&payer.pubkey()));
    transaction.sign(&[&payer, &market], recent_blockhash);
    banks_client.process_transaction(transaction).await.unwrap();

    let update_ix = instruction::set_market_active(
        &program_id,
        &payer.pubkey(),
        &market.pubkey(),
        false,
    )
    .unwrap();
    let mut transaction = Transaction::new_with_payer(&[update_ix], Some(&payer.pubkey()));
    transaction.sign(&[&payer], recent_blockhash);
    assert!(banks_client.process_transaction(transaction).await.is_err());
}
