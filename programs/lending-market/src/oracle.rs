//! Read-only collaborators: the external price oracle, the reputation tier
//! registry, and the peer-market exchange-rate view. All three are consumed
//! through small traits so the engine can be driven by account-backed data
//! on chain and by fixed fixtures in tests.

use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::{account_info::AccountInfo, program_error::ProgramError, pubkey::Pubkey};

use crate::error::LendingMarketError;

/// Account layout written by the external price publisher. This program only
/// ever reads it.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone)]
pub struct PriceFeed {
    /// Account discriminator
    pub discriminator: [u8; 8],

    /// Mint this feed prices
    pub asset: Pubkey,

    /// Price of one whole token in micro-USD
    pub price_micro_usd: u64,

    /// Publisher timestamp of the last update
    pub last_updated: i64,
}

impl PriceFeed {
    pub const DISCRIMINATOR: [u8; 8] = [80, 82, 67, 95, 70, 69, 69, 68]; // "PRC_FEED"

    pub const LEN: usize = 8 + // discriminator
        32 + // asset
        8 + // price_micro_usd
        8; // last_updated

    /// Reads a quote out of a feed account, checking that the account is the
    /// registered feed for `asset` and carries a usable price.
    pub fn load_quote(
        account: &AccountInfo,
        expected_key: &Pubkey,
        asset: &Pubkey,
    ) -> Result<PriceQuote, ProgramError> {
        if account.key != expected_key {
            return Err(LendingMarketError::InvalidOracleFeed.into());
        }
        let data = account.data.borrow();
        let mut slice: &[u8] = &data;
        let feed = PriceFeed::deserialize(&mut slice)
            .map_err(|_| LendingMarketError::InvalidOracleFeed)?;
        if feed.discriminator != Self::DISCRIMINATOR || feed.asset != *asset {
            return Err(LendingMarketError::InvalidOracleFeed.into());
        }
        if feed.price_micro_usd == 0 {
            return Err(LendingMarketError::InvalidOraclePrice.into());
        }
        Ok(PriceQuote {
            price_micro_usd: feed.price_micro_usd,
            last_updated: feed.last_updated,
        })
    }
}

/// A single resolved oracle price.
#[derive(Debug, Clone, Copy)]
pub struct PriceQuote {
    pub price_micro_usd: u64,
    pub last_updated: i64,
}

/// Price lookup keyed by asset mint.
pub trait PriceSource {
    fn price(&self, asset: &Pubkey) -> Result<PriceQuote, ProgramError>;
}

/// In-memory price book. The processor fills one from the feed accounts an
/// instruction passes in; tests fill one directly.
#[derive(Debug, Default)]
pub struct QuoteBook {
    entries: Vec<(Pubkey, PriceQuote)>,
}

impl QuoteBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, asset: Pubkey, quote: PriceQuote) {
        self.entries.retain(|(key, _)| key != &asset);
        self.entries.push((asset, quote));
    }
}

impl PriceSource for QuoteBook {
    fn price(&self, asset: &Pubkey) -> Result<PriceQuote, ProgramError> {
        self.entries
            .iter()
            .find(|(key, _)| key == asset)
            .map(|(_, quote)| *quote)
            .ok_or_else(|| LendingMarketError::InvalidOracleFeed.into())
    }
}

/// The slice of a peer market's ledger needed to price its pool-share token.
#[derive(Debug, Clone, Copy)]
pub struct PeerRate {
    pub total_deposits: u64,
    pub circulating_shares: u64,
}

/// Exchange-rate lookup keyed by peer market account.
pub trait ShareExchange {
    fn peer_rate(&self, peer_market: &Pubkey) -> Result<PeerRate, ProgramError>;
}

/// In-memory peer-rate book, filled the same two ways as [`QuoteBook`].
#[derive(Debug, Default)]
pub struct ExchangeBook {
    entries: Vec<(Pubkey, PeerRate)>,
}

impl ExchangeBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, peer_market: Pubkey, rate: PeerRate) {
        self.entries.retain(|(key, _)| key != &peer_market);
        self.entries.push((peer_market, rate));
    }
}

impl ShareExchange for ExchangeBook {
    fn peer_rate(&self, peer_market: &Pubkey) -> Result<PeerRate, ProgramError> {
        self.entries
            .iter()
            .find(|(key, _)| key == peer_market)
            .map(|(_, rate)| *rate)
            .ok_or_else(|| LendingMarketError::InvalidPeerMarket.into())
    }
}

/// Registry published by the external reputation service. Accounts absent
/// from the registry (or markets with no registry configured) are tier 0.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone)]
pub struct TierRegistry {
    /// Account discriminator
    pub discriminator: [u8; 8],

    /// Service authority that maintains the entries
    pub authority: Pubkey,

    /// Tier assignments
    pub entries: Vec<TierEntry>,
}

/// One reputation assignment.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone)]
pub struct TierEntry {
    pub account: Pubkey,
    pub tier: u8,
}

impl TierRegistry {
    pub const DISCRIMINATOR: [u8; 8] = [84, 73, 69, 82, 95, 82, 69, 71]; // "TIER_REG"

    pub const MAX_ENTRIES: usize = 256;

    pub const LEN: usize = 8 + // discriminator
        32 + // authority
        4 + (Self::MAX_ENTRIES * 33); // entries vec

    pub fn tier_of(&self, account: &Pubkey) -> u8 {
        self.entries
            .iter()
            .find(|entry| entry.account == *account)
            .map(|entry| entry.tier)
            .unwrap_or(0)
    }

    /// Resolves a tier from an optional registry account.
    pub fn resolve(account: Option<&AccountInfo>, subject: &Pubkey) -> u8 {
        let Some(info) = account else {
            return 0;
        };
        let data = info.data.borrow();
        let mut slice: &[u8] = &data;
        match TierRegistry::deserialize(&mut slice) {
            Ok(registry) if registry.discriminator == Self::DISCRIMINATOR => {
                registry.tier_of(subject)
            }
            _ => 0,
        }
    }
}
