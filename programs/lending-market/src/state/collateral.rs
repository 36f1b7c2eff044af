use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::{program_error::ProgramError, pubkey::Pubkey};

use crate::{error::LendingMarketError, state::MarketState};

/// A registered collateral asset: the pool-share token of a peer market
/// instance, plus everything needed to value it in USD.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone)]
pub struct CollateralConfig {
    /// The peer market's pool-share mint accepted as collateral
    pub share_mint: Pubkey,

    /// The peer market state account that mints and redeems `share_mint`
    pub peer_market: Pubkey,

    /// The peer market's base asset, priced by the oracle
    pub underlying_mint: Pubkey,
    pub underlying_decimals: u8,

    /// Registered oracle feed for the underlying asset
    pub underlying_oracle: Pubkey,

    /// This market's vault holding the pledged shares
    pub vault: Pubkey,

    /// Running total pledged across all loans, collateral units
    pub total_pledged: u64,
}

impl CollateralConfig {
    pub const LEN: usize = 32 + // share_mint
        32 + // peer_market
        32 + 1 + // underlying mint + decimals
        32 + // underlying_oracle
        32 + // vault
        8; // total_pledged
}

impl MarketState {
    pub fn collateral(&self, share_mint: &Pubkey) -> Result<&CollateralConfig, ProgramError> {
        self.collaterals
            .iter()
            .find(|config| config.share_mint == *share_mint)
            .ok_or_else(|| LendingMarketError::CollateralNotRegistered.into())
    }

    pub fn collateral_mut(
        &mut self,
        share_mint: &Pubkey,
    ) -> Result<&mut CollateralConfig, ProgramError> {
        self.collaterals
            .iter_mut()
            .find(|config| config.share_mint == *share_mint)
            .ok_or_else(|| LendingMarketError::CollateralNotRegistered.into())
    }

    /// Registers a new collateral asset. Init-admin gated at the processor.
    pub fn register_collateral(&mut self, config: CollateralConfig) -> Result<(), ProgramError> {
        if config.share_mint == self.market.share_mint
            || config.share_mint == self.market.base_mint
        {
            return Err(LendingMarketError::CollateralSelfReference.into());
        }
        if self
            .collaterals
            .iter()
            .any(|existing| existing.share_mint == config.share_mint)
        {
            return Err(LendingMarketError::CollateralAlreadyRegistered.into());
        }
        if self.collaterals.len() >= Self::MAX_COLLATERAL_TYPES {
            return Err(LendingMarketError::CapacityExhausted.into());
        }
        self.collaterals.push(config);
        Ok(())
    }

    /// Removes a collateral asset; only legal once nothing is pledged.
    pub fn deregister_collateral(&mut self, share_mint: &Pubkey) -> Result<(), ProgramError> {
        let index = self
            .collaterals
            .iter()
            .position(|config| config.share_mint == *share_mint)
            .ok_or(LendingMarketError::CollateralNotRegistered)?;
        if self.collaterals[index].total_pledged != 0 {
            return Err(LendingMarketError::CollateralStillPledged.into());
        }
        self.collaterals.remove(index);
        Ok(())
    }

    /// Adds to the pledged total alongside a pledge transfer.
    pub fn pledge_collateral(
        &mut self,
        share_mint: &Pubkey,
        amount: u64,
    ) -> Result<(), ProgramError> {
        let config = self.collateral_mut(share_mint)?;
        config.total_pledged = config
            .total_pledged
            .checked_add(amount)
            .ok_or(LendingMarketError::MathOverflow)?;
        Ok(())
    }

    /// Removes from the pledged total; fails closed on underflow.
    pub fn release_collateral(
        &mut self,
        share_mint: &Pubkey,
        amount: u64,
    ) -> Result<(), ProgramError> {
        let config = self.collateral_mut(share_mint)?;
        config.total_pledged = config
            .total_pledged
            .checked_sub(amount)
            .ok_or(LendingMarketError::InsufficientCollateral)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{new_market, RateCurve, RiskParams};

    fn state() -> MarketState {
        let market = new_market(
            Pubkey::new_unique(),
            6,
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            6,
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            254,
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            RateCurve {
                base_bps: 100,
                util_cap_bps: 8_000,
                kink_bps: 8_000,
                slope1_bps: 400,
                slope2_bps: 6_000,
                max_apr_bps: 0,
            },
            RiskParams {
                ltv_bps: 5_000,
                liq_threshold_bps: 9_000,
                liq_bonus_max_bps: 800,
                protocol_share_bps: 1_000,
                origination_fee_bps: 0,
            },
            0,
        )
        .unwrap();
        MarketState::new(market)
    }

    fn config(share_mint: Pubkey) -> CollateralConfig {
        CollateralConfig {
            share_mint,
            peer_market: Pubkey::new_unique(),
            underlying_mint: Pubkey::new_unique(),
            underlying_decimals: 6,
            underlying_oracle: Pubkey::new_unique(),
            vault: Pubkey::new_unique(),
            total_pledged: 0,
        }
    }

    #[test]
    fn rejects_own_share_mint() {
        let mut state = state();
        let own = state.market.share_mint;
        assert_eq!(
            state.register_collateral(config(own)).unwrap_err(),
            LendingMarketError::CollateralSelfReference.into()
        );
    }

    #[test]
    fn rejects_duplicate_registration() {
        let mut state = state();
        let mint = Pubkey::new_unique();
        state.register_collateral(config(mint)).unwrap();
        assert_eq!(
            state.register_collateral(config(mint)).unwrap_err(),
            LendingMarketError::CollateralAlreadyRegistered.into()
        );
    }

    #[test]
    fn deregister_requires_zero_pledged() {
        let mut state = state();
        let mint = Pubkey::new_unique();
        state.register_collateral(config(mint)).unwrap();
        state.pledge_collateral(&mint, 10).unwrap();
        assert_eq!(
            state.deregister_collateral(&mint).unwrap_err(),
            LendingMarketError::CollateralStillPledged.into()
        );
        state.release_collateral(&mint, 10).unwrap();
        state.deregister_collateral(&mint).unwrap();
        assert!(state.collaterals.is_empty());
    }

    #[test]
    fn release_fails_closed_on_underflow() {
        let mut state = state();
        let mint = Pubkey::new_unique();
        state.register_collateral(config(mint)).unwrap();
        state.pledge_collateral(&mint, 5).unwrap();
        assert_eq!(
            state.release_collateral(&mint, 6).unwrap_err(),
            LendingMarketError::InsufficientCollateral.into()
        );
    }
}
