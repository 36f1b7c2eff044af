use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::{program_error::ProgramError, pubkey::Pubkey};

use crate::{error::LendingMarketError, math, state::MarketState};

/// What last touched a loan, kept for operational audit.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanChangeKind {
    Open,
    TopUp,
    Repay,
    CollateralWithdrawal,
    Liquidation,
    Buyout,
}

/// One loan per borrower. Live debt is always derived from the snapshot
/// pair, never stored: `principal * borrow_index / user_index`.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct LoanRecord {
    /// Borrower identity, the record key
    pub borrower: Pubkey,

    /// Collateral asset backing this loan
    pub collateral_mint: Pubkey,

    /// Pledged collateral, collateral-asset units
    pub collateral_amount: u64,

    /// Debt snapshot, base units
    pub principal: u64,

    /// Market borrow index at the moment `principal` was last written
    pub user_index: u64,

    /// Audit tuple for the most recent mutation
    pub last_change_amount: u64,
    pub last_change_kind: LoanChangeKind,
    pub last_change_ts: i64,
}

impl LoanRecord {
    pub const LEN: usize = 32 + // borrower
        32 + // collateral_mint
        8 + // collateral_amount
        8 + // principal
        8 + // user_index
        8 + 1 + 8; // audit tuple

    /// Debt compounded to `borrow_index` via the snapshot ratio.
    pub fn live_debt(&self, borrow_index: u64) -> Result<u64, ProgramError> {
        math::mul_div(self.principal, borrow_index, self.user_index)
    }

    /// Rewrites the snapshot after a principal change.
    pub fn resnapshot(
        &mut self,
        principal: u64,
        borrow_index: u64,
        change_amount: u64,
        kind: LoanChangeKind,
        now: i64,
    ) {
        self.principal = principal;
        self.user_index = borrow_index;
        self.last_change_amount = change_amount;
        self.last_change_kind = kind;
        self.last_change_ts = now;
    }
}

impl MarketState {
    pub fn loan(&self, borrower: &Pubkey) -> Option<&LoanRecord> {
        self.loans.iter().find(|loan| loan.borrower == *borrower)
    }

    pub fn loan_mut(&mut self, borrower: &Pubkey) -> Option<&mut LoanRecord> {
        self.loans
            .iter_mut()
            .find(|loan| loan.borrower == *borrower)
    }

    /// Creates a fresh record for a first borrow.
    pub fn open_loan(&mut self, record: LoanRecord) -> Result<(), ProgramError> {
        if self.loans.len() >= Self::MAX_ACTIVE_LOANS {
            return Err(LendingMarketError::CapacityExhausted.into());
        }
        self.loans.push(record);
        self.market.active_loan_count = self
            .market
            .active_loan_count
            .checked_add(1)
            .ok_or(LendingMarketError::MathOverflow)?;
        Ok(())
    }

    /// Deletes a record once its debt reaches zero.
    pub fn close_loan(&mut self, borrower: &Pubkey) -> Result<LoanRecord, ProgramError> {
        let index = self
            .loans
            .iter()
            .position(|loan| loan.borrower == *borrower)
            .ok_or(LendingMarketError::LoanNotFound)?;
        let record = self.loans.remove(index);
        self.market.active_loan_count = self
            .market
            .active_loan_count
            .checked_sub(1)
            .ok_or(LendingMarketError::MathOverflow)?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::SCALE;

    fn record(principal: u64, user_index: u64) -> LoanRecord {
        LoanRecord {
            borrower: Pubkey::new_unique(),
            collateral_mint: Pubkey::new_unique(),
            collateral_amount: 1_000,
            principal,
            user_index,
            last_change_amount: principal,
            last_change_kind: LoanChangeKind::Open,
            last_change_ts: 0,
        }
    }

    #[test]
    fn live_debt_tracks_index_growth() {
        let loan = record(1_000_000, SCALE);
        assert_eq!(loan.live_debt(SCALE).unwrap(), 1_000_000);
        // +5% index growth since the snapshot
        assert_eq!(loan.live_debt(SCALE + SCALE / 20).unwrap(), 1_050_000);
    }

    #[test]
    fn live_debt_is_relative_to_snapshot() {
        // Snapshot taken when the index was already 2x
        let loan = record(500, 2 * SCALE);
        assert_eq!(loan.live_debt(2 * SCALE).unwrap(), 500);
        assert_eq!(loan.live_debt(3 * SCALE).unwrap(), 750);
    }
}
