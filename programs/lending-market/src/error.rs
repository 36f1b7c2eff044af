use num_derive::FromPrimitive;
use solana_program::{
    decode_error::DecodeError,
    msg,
    program_error::{PrintProgramError, ProgramError},
};
use thiserror::Error;

/// Errors surfaced by the lending market program. Every failure aborts the
/// whole instruction; there is no partial commit.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, FromPrimitive)]
pub enum LendingMarketError {
    // Instruction / input validation
    #[error("Invalid instruction")]
    InvalidInstruction,

    #[error("Input amount is zero")]
    ZeroAmount,

    #[error("Oracle price is zero or feed is malformed")]
    InvalidOraclePrice,

    #[error("Oracle feed account does not match the registered feed")]
    InvalidOracleFeed,

    #[error("Asset decimals out of range")]
    InvalidDecimals,

    #[error("Basis-point parameter out of range")]
    InvalidBps,

    #[error("Token account does not match the configured vault")]
    InvalidVaultAccount,

    #[error("Peer market account is invalid")]
    InvalidPeerMarket,

    // Authorization
    #[error("Signer is not the required admin for this operation")]
    Unauthorized,

    // State
    #[error("Market account is already initialized")]
    AlreadyInitialized,

    #[error("Market account is not initialized")]
    NotInitialized,

    #[error("Market is not active")]
    MarketInactive,

    #[error("No loan record exists for this borrower")]
    LoanNotFound,

    #[error("Collateral asset is not registered")]
    CollateralNotRegistered,

    #[error("Collateral asset is already registered")]
    CollateralAlreadyRegistered,

    #[error("Collateral asset still has pledged balance")]
    CollateralStillPledged,

    #[error("Collateral asset cannot reference this market's own tokens")]
    CollateralSelfReference,

    #[error("Loan uses a different collateral asset")]
    CollateralMintMismatch,

    #[error("Ledger capacity exhausted")]
    CapacityExhausted,

    // Economic
    #[error("Borrow would exceed the loan-to-value limit")]
    LoanToValueExceeded,

    #[error("Borrow would exceed the pool utilization cap")]
    UtilizationCapExceeded,

    #[error("Position is not eligible for liquidation")]
    NotEligibleForLiquidation,

    #[error("Position is not eligible for buyout")]
    NotEligibleForBuyout,

    #[error("Only a full repayment can close this position")]
    FullRepayRequired,

    #[error("Insufficient collateral for this operation")]
    InsufficientCollateral,

    #[error("Insufficient pool liquidity for this payout")]
    InsufficientLiquidity,

    #[error("Insufficient accrued fees for this withdrawal")]
    InsufficientFees,

    #[error("Offered premium does not cover the buyout price")]
    InsufficientPremium,

    #[error("Offered repayment does not cover the live debt")]
    InsufficientRepayment,

    #[error("Deposit too small to mint any pool shares")]
    DepositTooSmall,

    // Arithmetic
    #[error("Math operation overflowed")]
    MathOverflow,

    #[error("Division by zero")]
    DivideByZero,
}

impl From<LendingMarketError> for ProgramError {
    fn from(e: LendingMarketError) -> Self {
        ProgramError::Custom(e as u32)
    }
}

impl<T> DecodeError<T> for LendingMarketError {
    fn type_of() -> &'static str {
        "LendingMarketError"
    }
}

impl PrintProgramError for LendingMarketError {
    fn print<E>(&self)
    where
        E: 'static
            + std::error::Error
            + DecodeError<E>
            + PrintProgramError
            + num_traits::FromPrimitive,
    {
        msg!(&self.to_string());
    }
}
