use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::{
    instruction::{AccountMeta, Instruction},
    program_error::ProgramError,
    pubkey::Pubkey,
};

use crate::{
    error::LendingMarketError,
    state::{RateCurve, RiskParams},
};

/// Everything a fresh market needs. Vault token accounts must already exist
/// and be owned by the market authority PDA.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone)]
pub struct InitializeMarketParams {
    pub base_mint: Pubkey,
    pub base_decimals: u8,
    pub base_oracle: Pubkey,
    pub share_mint: Pubkey,
    pub base_vault: Pubkey,
    pub premium_mint: Pubkey,
    pub premium_decimals: u8,
    pub premium_oracle: Pubkey,
    pub fee_premium_vault: Pubkey,
    pub param_admin: Pubkey,
    pub fee_admin: Pubkey,
    pub init_admin: Pubkey,
    pub migration_admin: Pubkey,
    pub rate_curve: RateCurve,
    pub risk_params: RiskParams,
}

/// Registration data for one collateral asset.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone)]
pub struct RegisterCollateralParams {
    pub share_mint: Pubkey,
    pub peer_market: Pubkey,
    pub underlying_mint: Pubkey,
    pub underlying_decimals: u8,
    pub underlying_oracle: Pubkey,
    pub vault: Pubkey,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone)]
pub enum LendingInstruction {
    /// Create and initialize the market state account.
    /// Accounts:
    /// 0. `[signer, writable]` Payer
    /// 1. `[signer, writable]` Market state account (fresh keypair)
    /// 2. `[]` System program
    /// 3. `[]` Rent sysvar
    InitializeMarket { params: InitializeMarketParams },

    /// Flip the user-facing operation gate.
    /// Accounts:
    /// 0. `[signer]` Param admin
    /// 1. `[writable]` Market state account
    SetMarketActive { active: bool },

    /// Partial update of the rate curve.
    /// Accounts:
    /// 0. `[signer]` Param admin
    /// 1. `[writable]` Market state account
    UpdateRateCurve {
        base_bps: Option<u64>,
        util_cap_bps: Option<u64>,
        kink_bps: Option<u64>,
        slope1_bps: Option<u64>,
        slope2_bps: Option<u64>,
        max_apr_bps: Option<u64>,
    },

    /// Partial update of collateralization and fee parameters.
    /// Accounts:
    /// 0. `[signer]` Param admin
    /// 1. `[writable]` Market state account
    UpdateRiskParams {
        ltv_bps: Option<u64>,
        liq_threshold_bps: Option<u64>,
        liq_bonus_max_bps: Option<u64>,
        protocol_share_bps: Option<u64>,
        origination_fee_bps: Option<u64>,
    },

    /// Register a peer market's pool-share token as collateral.
    /// Accounts:
    /// 0. `[signer]` Init admin
    /// 1. `[writable]` Market state account
    RegisterCollateral { params: RegisterCollateralParams },

    /// Remove a collateral asset once nothing is pledged.
    /// Accounts:
    /// 0. `[signer]` Init admin
    /// 1. `[writable]` Market state account
    DeregisterCollateral { share_mint: Pubkey },

    /// Deposit base asset for pool shares.
    /// Accounts:
    /// 0. `[signer]` Depositor
    /// 1. `[writable]` Market state account
    /// 2. `[writable]` Depositor base token account
    /// 3. `[writable]` Base vault
    /// 4. `[writable]` Share mint
    /// 5. `[writable]` Depositor share token account
    /// 6. `[]` Market authority PDA
    /// 7. `[]` Token program
    Deposit { amount: u64 },

    /// Burn pool shares for base asset.
    /// Accounts:
    /// 0. `[signer]` Depositor
    /// 1. `[writable]` Market state account
    /// 2. `[writable]` Depositor share token account
    /// 3. `[writable]` Share mint
    /// 4. `[writable]` Base vault
    /// 5. `[writable]` Depositor base token account
    /// 6. `[]` Market authority PDA
    /// 7. `[]` Token program
    Withdraw { shares: u64 },

    /// Open or top up a loan, pledging collateral.
    /// Accounts:
    /// 0. `[signer]` Borrower
    /// 1. `[writable]` Market state account
    /// 2. `[writable]` Borrower collateral token account
    /// 3. `[writable]` Collateral vault
    /// 4. `[writable]` Base vault
    /// 5. `[writable]` Borrower base token account
    /// 6. `[]` Market authority PDA
    /// 7. `[]` Base oracle feed
    /// 8. `[]` Underlying oracle feed
    /// 9. `[]` Peer market state account
    /// 10. `[]` Token program
    /// 11. `[]` (optional) Tier registry
    Borrow {
        collateral_mint: Pubkey,
        collateral_amount: u64,
        amount: u64,
    },

    /// Repay a borrower's debt, releasing collateral on full repayment.
    /// Accounts:
    /// 0. `[signer]` Payer
    /// 1. `[writable]` Market state account
    /// 2. `[writable]` Payer base token account
    /// 3. `[writable]` Base vault
    /// 4. `[writable]` Collateral vault
    /// 5. `[writable]` Borrower collateral token account
    /// 6. `[]` Market authority PDA
    /// 7. `[]` Token program
    Repay { borrower: Pubkey, amount: u64 },

    /// Withdraw collateral down to the LTV-implied requirement.
    /// Accounts:
    /// 0. `[signer]` Borrower
    /// 1. `[writable]` Market state account
    /// 2. `[writable]` Collateral vault
    /// 3. `[writable]` Borrower collateral token account
    /// 4. `[]` Market authority PDA
    /// 5. `[]` Base oracle feed
    /// 6. `[]` Underlying oracle feed
    /// 7. `[]` Peer market state account
    /// 8. `[]` Token program
    WithdrawCollateral { amount: u64 },

    /// Liquidate an undercollateralized position.
    /// Accounts:
    /// 0. `[signer]` Liquidator
    /// 1. `[writable]` Market state account
    /// 2. `[writable]` Liquidator base token account
    /// 3. `[writable]` Base vault
    /// 4. `[writable]` Collateral vault
    /// 5. `[writable]` Liquidator collateral token account
    /// 6. `[writable]` Borrower collateral token account
    /// 7. `[]` Market authority PDA
    /// 8. `[]` Base oracle feed
    /// 9. `[]` Underlying oracle feed
    /// 10. `[]` Peer market state account
    /// 11. `[]` Token program
    Liquidate { borrower: Pubkey, amount: u64 },

    /// Buy out a healthy position at a premium.
    /// Accounts:
    /// 0. `[signer]` Buyer
    /// 1. `[writable]` Market state account
    /// 2. `[writable]` Buyer premium token account
    /// 3. `[writable]` Fee premium vault
    /// 4. `[writable]` Borrower premium token account
    /// 5. `[writable]` Buyer base token account
    /// 6. `[writable]` Base vault
    /// 7. `[writable]` Collateral vault
    /// 8. `[writable]` Buyer collateral token account
    /// 9. `[]` Market authority PDA
    /// 10. `[]` Base oracle feed
    /// 11. `[]` Underlying oracle feed
    /// 12. `[]` Premium oracle feed
    /// 13. `[]` Peer market state account
    /// 14. `[]` Token program
    Buyout {
        borrower: Pubkey,
        premium_offered: u64,
        repay_offered: u64,
    },

    /// Pay accrued protocol fees out of the vault.
    /// Accounts:
    /// 0. `[signer]` Fee admin
    /// 1. `[writable]` Market state account
    /// 2. `[writable]` Base vault
    /// 3. `[writable]` Destination base token account
    /// 4. `[]` Market authority PDA
    /// 5. `[]` Token program
    WithdrawFees { amount: u64 },

    /// Permissionless interest accrual touch.
    /// Accounts:
    /// 0. `[writable]` Market state account
    AccrueInterest,

    /// Copy a market's ledger into a successor instance.
    /// Accounts:
    /// 0. `[signer]` Migration admin (of both instances)
    /// 1. `[]` Source market state account
    /// 2. `[writable]` Target market state account
    MigrateState,
}

impl LendingInstruction {
    pub fn unpack(input: &[u8]) -> Result<Self, ProgramError> {
        let (&variant, rest) = input
            .split_first()
            .ok_or(LendingMarketError::InvalidInstruction)?;

        Ok(match variant {
            0 => {
                let params = InitializeMarketParams::try_from_slice(rest)?;
                Self::InitializeMarket { params }
            }
            1 => {
                let payload = SetMarketActivePayload::try_from_slice(rest)?;
                Self::SetMarketActive {
                    active: payload.active,
                }
            }
            2 => {
                let payload = UpdateRateCurvePayload::try_from_slice(rest)?;
                Self::UpdateRateCurve {
                    base_bps: payload.base_bps,
                    util_cap_bps: payload.util_cap_bps,
                    kink_bps: payload.kink_bps,
                    slope1_bps: payload.slope1_bps,
                    slope2_bps: payload.slope2_bps,
                    max_apr_bps: payload.max_apr_bps,
                }
            }
            3 => {
                let payload = UpdateRiskParamsPayload::try_from_slice(rest)?;
                Self::UpdateRiskParams {
                    ltv_bps: payload.ltv_bps,
                    liq_threshold_bps: payload.liq_threshold_bps,
                    liq_bonus_max_bps: payload.liq_bonus_max_bps,
                    protocol_share_bps: payload.protocol_share_bps,
                    origination_fee_bps: payload.origination_fee_bps,
                }
            }
            4 => {
                let params = RegisterCollateralParams::try_from_slice(rest)?;
                Self::RegisterCollateral { params }
            }
            5 => {
                let payload = DeregisterCollateralPayload::try_from_slice(rest)?;
                Self::DeregisterCollateral {
                    share_mint: payload.share_mint,
                }
            }
            6 => {
                let payload = AmountPayload::try_from_slice(rest)?;
                Self::Deposit {
                    amount: payload.amount,
                }
            }
            7 => {
                let payload = AmountPayload::try_from_slice(rest)?;
                Self::Withdraw {
                    shares: payload.amount,
                }
            }
            8 => {
                let payload = BorrowPayload::try_from_slice(rest)?;
                Self::Borrow {
                    collateral_mint: payload.collateral_mint,
                    collateral_amount: payload.collateral_amount,
                    amount: payload.amount,
                }
            }
            9 => {
                let payload = BorrowerAmountPayload::try_from_slice(rest)?;
                Self::Repay {
                    borrower: payload.borrower,
                    amount: payload.amount,
                }
            }
            10 => {
                let payload = AmountPayload::try_from_slice(rest)?;
                Self::WithdrawCollateral {
                    amount: payload.amount,
                }
            }
            11 => {
                let payload = BorrowerAmountPayload::try_from_slice(rest)?;
                Self::Liquidate {
                    borrower: payload.borrower,
                    amount: payload.amount,
                }
            }
            12 => {
                let payload = BuyoutPayload::try_from_slice(rest)?;
                Self::Buyout {
                    borrower: payload.borrower,
                    premium_offered: payload.premium_offered,
                    repay_offered: payload.repay_offered,
                }
            }
            13 => {
                let payload = AmountPayload::try_from_slice(rest)?;
                Self::WithdrawFees {
                    amount: payload.amount,
                }
            }
            14 => Self::AccrueInterest,
            15 => Self::MigrateState,
            _ => return Err(LendingMarketError::InvalidInstruction.into()),
        })
    }

    pub fn pack(&self) -> Result<Vec<u8>, ProgramError> {
        let mut data = Vec::with_capacity(128);
        match self {
            Self::InitializeMarket { params } => {
                data.push(0);
                data.extend(params.try_to_vec()?);
            }
            Self::SetMarketActive { active } => {
                data.push(1);
                data.extend(SetMarketActivePayload { active: *active }.try_to_vec()?);
            }
            Self::UpdateRateCurve {
                base_bps,
                util_cap_bps,
                kink_bps,
                slope1_bps,
                slope2_bps,
                max_apr_bps,
            } => {
                data.push(2);
                data.extend(
                    UpdateRateCurvePayload {
                        base_bps: *base_bps,
                        util_cap_bps: *util_cap_bps,
                        kink_bps: *kink_bps,
                        slope1_bps: *slope1_bps,
                        slope2_bps: *slope2_bps,
                        max_apr_bps: *max_apr_bps,
                    }
                    .try_to_vec()?,
                );
            }
            Self::UpdateRiskParams {
                ltv_bps,
                liq_threshold_bps,
                liq_bonus_max_bps,
                protocol_share_bps,
                origination_fee_bps,
            } => {
                data.push(3);
                data.extend(
                    UpdateRiskParamsPayload {
                        ltv_bps: *ltv_bps,
                        liq_threshold_bps: *liq_threshold_bps,
                        liq_bonus_max_bps: *liq_bonus_max_bps,
                        protocol_share_bps: *protocol_share_bps,
                        origination_fee_bps: *origination_fee_bps,
                    }
                    .try_to_vec()?,
                );
            }
            Self::RegisterCollateral { params } => {
                data.push(4);
                data.extend(params.try_to_vec()?);
            }
            Self::DeregisterCollateral { share_mint } => {
                data.push(5);
                data.extend(
                    DeregisterCollateralPayload {
                        share_mint: *share_mint,
                    }
                    .try_to_vec()?,
                );
            }
            Self::Deposit { amount } => {
                data.push(6);
                data.extend(AmountPayload { amount: *amount }.try_to_vec()?);
            }
            Self::Withdraw { shares } => {
                data.push(7);
                data.extend(AmountPayload { amount: *shares }.try_to_vec()?);
            }
            Self::Borrow {
                collateral_mint,
                collateral_amount,
                amount,
            } => {
                data.push(8);
                data.extend(
                    BorrowPayload {
                        collateral_mint: *collateral_mint,
                        collateral_amount: *collateral_amount,
                        amount: *amount,
                    }
                    .try_to_vec()?,
                );
            }
            Self::Repay { borrower, amount } => {
                data.push(9);
                data.extend(
                    BorrowerAmountPayload {
                        borrower: *borrower,
                        amount: *amount,
                    }
                    .try_to_vec()?,
                );
            }
            Self::WithdrawCollateral { amount } => {
                data.push(10);
                data.extend(AmountPayload { amount: *amount }.try_to_vec()?);
            }
            Self::Liquidate { borrower, amount } => {
                data.push(11);
                data.extend(
                    BorrowerAmountPayload {
                        borrower: *borrower,
                        amount: *amount,
                    }
                    .try_to_vec()?,
                );
            }
            Self::Buyout {
                borrower,
                premium_offered,
                repay_offered,
            } => {
                data.push(12);
                data.extend(
                    BuyoutPayload {
                        borrower: *borrower,
                        premium_offered: *premium_offered,
                        repay_offered: *repay_offered,
                    }
                    .try_to_vec()?,
                );
            }
            Self::WithdrawFees { amount } => {
                data.push(13);
                data.extend(AmountPayload { amount: *amount }.try_to_vec()?);
            }
            Self::AccrueInterest => data.push(14),
            Self::MigrateState => data.push(15),
        }
        Ok(data)
    }
}

// Payload structs for the data-carrying variants
#[derive(BorshSerialize, BorshDeserialize)]
struct SetMarketActivePayload {
    active: bool,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct UpdateRateCurvePayload {
    base_bps: Option<u64>,
    util_cap_bps: Option<u64>,
    kink_bps: Option<u64>,
    slope1_bps: Option<u64>,
    slope2_bps: Option<u64>,
    max_apr_bps: Option<u64>,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct UpdateRiskParamsPayload {
    ltv_bps: Option<u64>,
    liq_threshold_bps: Option<u64>,
    liq_bonus_max_bps: Option<u64>,
    protocol_share_bps: Option<u64>,
    origination_fee_bps: Option<u64>,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct DeregisterCollateralPayload {
    share_mint: Pubkey,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct AmountPayload {
    amount: u64,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct BorrowPayload {
    collateral_mint: Pubkey,
    collateral_amount: u64,
    amount: u64,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct BorrowerAmountPayload {
    borrower: Pubkey,
    amount: u64,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct BuyoutPayload {
    borrower: Pubkey,
    premium_offered: u64,
    repay_offered: u64,
}

// Helper functions to create instructions
pub fn initialize_market(
    program_id: &Pubkey,
    payer: &Pubkey,
    market_account: &Pubkey,
    params: InitializeMarketParams,
) -> Result<Instruction, ProgramError> {
    let accounts = vec![
        AccountMeta::new(*payer, true),
        AccountMeta::new(*market_account, true),
        AccountMeta::new_readonly(solana_program::system_program::id(), false),
        AccountMeta::new_readonly(solana_program::sysvar::rent::id(), false),
    ];
    Ok(Instruction {
        program_id: *program_id,
        accounts,
        data: LendingInstruction::InitializeMarket { params }.pack()?,
    })
}

pub fn set_market_active(
    program_id: &Pubkey,
    param_admin: &Pubkey,
    market_account: &Pubkey,
    active: bool,
) -> Result<Instruction, ProgramError> {
    let accounts = vec![
        AccountMeta::new_readonly(*param_admin, true),
        AccountMeta::new(*market_account, false),
    ];
    Ok(Instruction {
        program_id: *program_id,
        accounts,
        data: LendingInstruction::SetMarketActive { active }.pack()?,
    })
}

pub fn update_risk_params(
    program_id: &Pubkey,
    param_admin: &Pubkey,
    market_account: &Pubkey,
    ltv_bps: Option<u64>,
    liq_threshold_bps: Option<u64>,
    liq_bonus_max_bps: Option<u64>,
    protocol_share_bps: Option<u64>,
    origination_fee_bps: Option<u64>,
) -> Result<Instruction, ProgramError> {
    let accounts = vec![
        AccountMeta::new_readonly(*param_admin, true),
        AccountMeta::new(*market_account, false),
    ];
    Ok(Instruction {
        program_id: *program_id,
        accounts,
        data: LendingInstruction::UpdateRiskParams {
            ltv_bps,
            liq_threshold_bps,
            liq_bonus_max_bps,
            protocol_share_bps,
            origination_fee_bps,
        }
        .pack()?,
    })
}

pub fn register_collateral(
    program_id: &Pubkey,
    init_admin: &Pubkey,
    market_account: &Pubkey,
    params: RegisterCollateralParams,
) -> Result<Instruction, ProgramError> {
    let accounts = vec![
        AccountMeta::new_readonly(*init_admin, true),
        AccountMeta::new(*market_account, false),
    ];
    Ok(Instruction {
        program_id: *program_id,
        accounts,
        data: LendingInstruction::RegisterCollateral { params }.pack()?,
    })
}

pub fn accrue_interest(
    program_id: &Pubkey,
    market_account: &Pubkey,
) -> Result<Instruction, ProgramError> {
    Ok(Instruction {
        program_id: *program_id,
        accounts: vec![AccountMeta::new(*market_account, false)],
        data: LendingInstruction::AccrueInterest.pack()?,
    })
}
