// Collateralized lending market with pool-share collateral
// Native Solana implementation - NO ANCHOR

use solana_program::{
    account_info::AccountInfo,
    entrypoint,
    entrypoint::ProgramResult,
    program_error::PrintProgramError,
    pubkey::Pubkey,
};

pub mod engine;
pub mod error;
pub mod instruction;
pub mod math;
pub mod oracle;
pub mod processor;
pub mod state;

use error::LendingMarketError;

// Declare program ID
solana_program::declare_id!("4Jkx9KjXdMV6L1VdQuZdFWGV1WLNoBubNEu5uFQ3WUxi");

#[cfg(not(feature = "no-entrypoint"))]
entrypoint!(process_instruction);

pub fn process_instruction(
    program_id: &Pubkey,
    accounts: &[AccountInfo],
    instruction_data: &[u8],
) -> ProgramResult {
    if let Err(error) = processor::process_instruction(program_id, accounts, instruction_data) {
        error.print::<LendingMarketError>();
        return Err(error);
    }
    Ok(())
}
