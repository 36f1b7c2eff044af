use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::{program_error::ProgramError, pubkey::Pubkey};

use crate::{error::LendingMarketError, state::MarketState};

/// Informational depositor bookkeeping. The pool-share balance, not this
/// record, is authoritative for withdrawal limits.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct DepositRecord {
    pub depositor: Pubkey,

    /// Running principal deposited, base units
    pub principal_deposited: u64,

    pub last_deposit_ts: i64,
}

impl DepositRecord {
    pub const LEN: usize = 32 + // depositor
        8 + // principal_deposited
        8; // last_deposit_ts
}

impl MarketState {
    /// Records a deposit against the depositor's running principal.
    pub fn note_deposit(
        &mut self,
        depositor: &Pubkey,
        amount: u64,
        now: i64,
    ) -> Result<(), ProgramError> {
        if let Some(record) = self
            .deposits
            .iter_mut()
            .find(|record| record.depositor == *depositor)
        {
            record.principal_deposited = record
                .principal_deposited
                .checked_add(amount)
                .ok_or(LendingMarketError::MathOverflow)?;
            record.last_deposit_ts = now;
            return Ok(());
        }
        if self.deposits.len() >= Self::MAX_DEPOSIT_RECORDS {
            return Err(LendingMarketError::CapacityExhausted.into());
        }
        self.deposits.push(DepositRecord {
            depositor: *depositor,
            principal_deposited: amount,
            last_deposit_ts: now,
        });
        Ok(())
    }
}
