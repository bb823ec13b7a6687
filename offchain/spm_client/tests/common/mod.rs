// offchain/spm_client/tests/common/mod.rs
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use borsh::BorshSerialize;
use solana_sdk::pubkey::Pubkey;
use spm_client::{
    accounts::{
        ARGUMENT_DISCRIMINATOR, BET_DISCRIMINATOR, MARKET_DISCRIMINATOR, USER_STATS_DISCRIMINATOR,
    },
    fetch::{AccountFilter, AccountSource, RawAccount},
    types::{Argument, Bet, Market, MarketCategory, MarketStatus, Side, UserStats},
    FetchError,
};

#[derive(BorshSerialize)]
struct MarketLayout {
    creator: [u8; 32],
    market_index: u64,
    title: String,
    description: String,
    category: u8,
    status: u8,
    side_a_label: String,
    side_b_label: String,
    side_a_pool: u64,
    side_b_pool: u64,
    total_volume: u64,
    total_bets: u32,
    total_bettors_a: u32,
    total_bettors_b: u32,
    bounty: u64,
    created_at: i64,
    closes_at: i64,
    resolved_at: i64,
    winning_side: Option<u8>,
    resolution_reason: String,
    vault_bump: u8,
    bump: u8,
}

#[derive(BorshSerialize)]
struct BetLayout {
    market: [u8; 32],
    bettor: [u8; 32],
    side: u8,
    amount: u64,
    odds_at_bet: u64,
    claimed: bool,
    refunded: bool,
    created_at: i64,
    bump: u8,
}

#[derive(BorshSerialize)]
struct ArgumentLayout {
    market: [u8; 32],
    bet: [u8; 32],
    author: [u8; 32],
    side: u8,
    content: String,
    upvotes: u32,
    downvotes: u32,
    created_at: i64,
    bump: u8,
}

#[derive(BorshSerialize)]
struct UserStatsLayout {
    wallet: [u8; 32],
    total_bets: u64,
    total_volume: u64,
    total_wins: u64,
    total_losses: u64,
    total_pnl: i64,
    markets_created: u64,
    markets_participated: u64,
    bump: u8,
}

fn with_discriminator(disc: [u8; 8], body: impl BorshSerialize) -> Vec<u8> {
    let mut out = disc.to_vec();
    body.serialize(&mut out).unwrap();
    out
}

pub fn market(title: &str, pool_a: u64, pool_b: u64) -> Market {
    Market {
        address: Pubkey::new_unique(),
        creator: Pubkey::new_unique(),
        market_index: 7,
        title: title.to_string(),
        description: "settles on the close".into(),
        category: MarketCategory::Crypto,
        status: MarketStatus::Open,
        side_a_label: "YES".into(),
        side_b_label: "NO".into(),
        side_a_pool: pool_a,
        side_b_pool: pool_b,
        total_volume: pool_a + pool_b,
        total_bets: 2,
        total_bettors_a: 1,
        total_bettors_b: 1,
        bounty: 0,
        created_at: 1_700_000_000,
        closes_at: 1_800_000_000,
        resolved_at: None,
        winning_side: None,
        resolution_reason: String::new(),
        vault_bump: 253,
        bump: 254,
    }
}

pub fn market_bytes(m: &Market) -> Vec<u8> {
    with_discriminator(
        MARKET_DISCRIMINATOR,
        MarketLayout {
            creator: m.creator.to_bytes(),
            market_index: m.market_index,
            title: m.title.clone(),
            description: m.description.clone(),
            category: m.category.ordinal(),
            status: m.status.ordinal(),
            side_a_label: m.side_a_label.clone(),
            side_b_label: m.side_b_label.clone(),
            side_a_pool: m.side_a_pool,
            side_b_pool: m.side_b_pool,
            total_volume: m.total_volume,
            total_bets: m.total_bets,
            total_bettors_a: m.total_bettors_a,
            total_bettors_b: m.total_bettors_b,
            bounty: m.bounty,
            created_at: m.created_at,
            closes_at: m.closes_at,
            resolved_at: m.resolved_at.unwrap_or(0),
            winning_side: m.winning_side.map(Side::ordinal),
            resolution_reason: m.resolution_reason.clone(),
            vault_bump: m.vault_bump,
            bump: m.bump,
        },
    )
}

pub fn bet(market: &Pubkey, bettor: &Pubkey, side: Side, amount: u64, created_at: i64) -> Bet {
    Bet {
        address: Pubkey::new_unique(),
        market: *market,
        bettor: *bettor,
        side,
        amount,
        odds_at_bet: 5_000,
        claimed: false,
        refunded: false,
        created_at,
        bump: 255,
    }
}

pub fn bet_bytes(b: &Bet) -> Vec<u8> {
    with_discriminator(
        BET_DISCRIMINATOR,
        BetLayout {
            market: b.market.to_bytes(),
            bettor: b.bettor.to_bytes(),
            side: b.side.ordinal(),
            amount: b.amount,
            odds_at_bet: b.odds_at_bet,
            claimed: b.claimed,
            refunded: b.refunded,
            created_at: b.created_at,
            bump: b.bump,
        },
    )
}

pub fn argument(market: &Pubkey, content: &str, upvotes: u32, downvotes: u32) -> Argument {
    Argument {
        address: Pubkey::new_unique(),
        market: *market,
        bet: Pubkey::new_unique(),
        author: Pubkey::new_unique(),
        side: Side::A,
        content: content.to_string(),
        upvotes,
        downvotes,
        created_at: 1_700_000_500,
        bump: 251,
    }
}

pub fn argument_bytes(a: &Argument) -> Vec<u8> {
    with_discriminator(
        ARGUMENT_DISCRIMINATOR,
        ArgumentLayout {
            market: a.market.to_bytes(),
            bet: a.bet.to_bytes(),
            author: a.author.to_bytes(),
            side: a.side.ordinal(),
            content: a.content.clone(),
            upvotes: a.upvotes,
            downvotes: a.downvotes,
            created_at: a.created_at,
            bump: a.bump,
        },
    )
}

pub fn user_stats(wallet: &Pubkey, bets: u64, wins: u64, pnl: i64) -> UserStats {
    UserStats {
        address: Pubkey::new_unique(),
        wallet: *wallet,
        total_bets: bets,
        total_volume: bets * 1_000_000_000,
        total_wins: wins,
        total_losses: bets - wins,
        total_pnl: pnl,
        markets_created: 0,
        markets_participated: bets,
        bump: 252,
    }
}

pub fn user_stats_bytes(s: &UserStats) -> Vec<u8> {
    with_discriminator(
        USER_STATS_DISCRIMINATOR,
        UserStatsLayout {
            wallet: s.wallet.to_bytes(),
            total_bets: s.total_bets,
            total_volume: s.total_volume,
            total_wins: s.total_wins,
            total_losses: s.total_losses,
            total_pnl: s.total_pnl,
            markets_created: s.markets_created,
            markets_participated: s.markets_participated,
            bump: s.bump,
        },
    )
}

/// In-memory program account set. Applies filters the way the node would.
#[derive(Default)]
pub struct MemorySource {
    pub accounts: Vec<RawAccount>,
    pub program_queries: AtomicUsize,
}

impl MemorySource {
    pub fn new(accounts: Vec<RawAccount>) -> Self {
        Self {
            accounts,
            program_queries: AtomicUsize::new(0),
        }
    }

    pub fn queries(&self) -> usize {
        self.program_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccountSource for MemorySource {
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, FetchError> {
        Ok(self
            .accounts
            .iter()
            .find(|a| a.address == *address)
            .map(|a| a.data.clone()))
    }

    async fn get_multiple_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<Vec<u8>>>, FetchError> {
        let mut out = Vec::with_capacity(addresses.len());
        for address in addresses {
            out.push(self.get_account(address).await?);
        }
        Ok(out)
    }

    async fn get_program_accounts(
        &self,
        _program_id: &Pubkey,
        filters: &[AccountFilter],
    ) -> Result<Vec<RawAccount>, FetchError> {
        self.program_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .accounts
            .iter()
            .filter(|a| filters.iter().all(|f| f.matches(&a.data)))
            .cloned()
            .collect())
    }
}
