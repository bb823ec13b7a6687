// offchain/spm_client/src/types.rs
//! Decoded on-chain records. Every value here is an immutable snapshot taken at fetch time;
//! a refresh replaces the whole record rather than patching fields.

use borsh::BorshSerialize;
use solana_sdk::pubkey::Pubkey;

// ---------- Enums + ordinal tables ----------

#[derive(BorshSerialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarketCategory {
    Crypto,
    Politics,
    Sports,
    Technology,
    Science,
    Entertainment,
    Other,
}

/// On-chain ordinal order. Must match the program's enum declaration exactly.
const CATEGORY_TABLE: [MarketCategory; 7] = [
    MarketCategory::Crypto,
    MarketCategory::Politics,
    MarketCategory::Sports,
    MarketCategory::Technology,
    MarketCategory::Science,
    MarketCategory::Entertainment,
    MarketCategory::Other,
];

impl MarketCategory {
    pub const FALLBACK: MarketCategory = MarketCategory::Other;

    pub fn from_ordinal(ordinal: u8) -> Self {
        match CATEGORY_TABLE.get(ordinal as usize) {
            Some(c) => *c,
            None => Self::FALLBACK,
        }
    }

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn all() -> &'static [MarketCategory] {
        &CATEGORY_TABLE
    }

    pub fn label(self) -> &'static str {
        match self {
            MarketCategory::Crypto => "CRYPTO",
            MarketCategory::Politics => "POLITICS",
            MarketCategory::Sports => "SPORTS",
            MarketCategory::Technology => "TECH",
            MarketCategory::Science => "SCIENCE",
            MarketCategory::Entertainment => "ENTERTAINMENT",
            MarketCategory::Other => "OTHER",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "crypto" => Some(MarketCategory::Crypto),
            "politics" => Some(MarketCategory::Politics),
            "sports" => Some(MarketCategory::Sports),
            "technology" | "tech" => Some(MarketCategory::Technology),
            "science" => Some(MarketCategory::Science),
            "entertainment" => Some(MarketCategory::Entertainment),
            "other" => Some(MarketCategory::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarketStatus {
    Open,
    Closed,
    Resolving,
    Resolved,
    Cancelled,
}

const STATUS_TABLE: [MarketStatus; 5] = [
    MarketStatus::Open,
    MarketStatus::Closed,
    MarketStatus::Resolving,
    MarketStatus::Resolved,
    MarketStatus::Cancelled,
];

impl MarketStatus {
    pub const FALLBACK: MarketStatus = MarketStatus::Open;

    pub fn from_ordinal(ordinal: u8) -> Self {
        match STATUS_TABLE.get(ordinal as usize) {
            Some(s) => *s,
            None => Self::FALLBACK,
        }
    }

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            MarketStatus::Open => "OPEN",
            MarketStatus::Closed => "CLOSED",
            MarketStatus::Resolving => "RESOLVING",
            MarketStatus::Resolved => "RESOLVED",
            MarketStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MarketStatus::Resolved | MarketStatus::Cancelled)
    }

    /// Forward-only lifecycle: open -> closed -> (resolving ->) resolved,
    /// or open/closed -> cancelled. Checked transitively since two snapshots may skip
    /// intermediate states. Staying put is always allowed.
    pub fn can_advance_to(self, next: MarketStatus) -> bool {
        use MarketStatus::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Open, Closed)
                | (Open, Resolving)
                | (Open, Resolved)
                | (Open, Cancelled)
                | (Closed, Resolving)
                | (Closed, Resolved)
                | (Closed, Cancelled)
                | (Resolving, Resolved)
        )
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "open" => Some(MarketStatus::Open),
            "closed" => Some(MarketStatus::Closed),
            "resolving" => Some(MarketStatus::Resolving),
            "resolved" => Some(MarketStatus::Resolved),
            "cancelled" => Some(MarketStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(BorshSerialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    A,
    B,
}

impl Side {
    /// 0 is A; the program only ever writes 0 or 1, any other byte reads as B.
    pub const FALLBACK: Side = Side::B;

    pub fn from_ordinal(ordinal: u8) -> Self {
        match ordinal {
            0 => Side::A,
            1 => Side::B,
            _ => Self::FALLBACK,
        }
    }

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "a" | "0" => Some(Side::A),
            "b" | "1" => Some(Side::B),
            _ => None,
        }
    }
}

// ---------- Records ----------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Market {
    pub address: Pubkey,
    pub creator: Pubkey,
    pub market_index: u64,
    pub title: String,
    pub description: String,
    pub category: MarketCategory,
    pub status: MarketStatus,
    pub side_a_label: String,
    pub side_b_label: String,
    pub side_a_pool: u64, // lamports
    pub side_b_pool: u64, // lamports
    pub total_volume: u64,
    pub total_bets: u32,
    pub total_bettors_a: u32,
    pub total_bettors_b: u32,
    pub bounty: u64,
    pub created_at: i64,
    pub closes_at: i64,
    pub resolved_at: Option<i64>, // stored as 0 on chain until resolution
    pub winning_side: Option<Side>,
    pub resolution_reason: String,
    pub vault_bump: u8,
    pub bump: u8,
}

impl Market {
    pub fn side_label(&self, side: Side) -> &str {
        match side {
            Side::A => &self.side_a_label,
            Side::B => &self.side_b_label,
        }
    }

    pub fn pool(&self, side: Side) -> u64 {
        match side {
            Side::A => self.side_a_pool,
            Side::B => self.side_b_pool,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bet {
    pub address: Pubkey,
    pub market: Pubkey,
    pub bettor: Pubkey,
    pub side: Side,
    pub amount: u64,
    pub odds_at_bet: u64, // bps of the chosen side when placed
    pub claimed: bool,
    pub refunded: bool,
    pub created_at: i64,
    pub bump: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    pub address: Pubkey,
    pub market: Pubkey,
    pub bet: Pubkey,
    pub author: Pubkey,
    pub side: Side,
    pub content: String,
    pub upvotes: u32,
    pub downvotes: u32,
    pub created_at: i64,
    pub bump: u8,
}

impl Argument {
    pub fn score(&self) -> i64 {
        i64::from(self.upvotes) - i64::from(self.downvotes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentVote {
    pub address: Pubkey,
    pub argument: Pubkey,
    pub voter: Pubkey,
    pub is_upvote: bool,
    pub bump: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserStats {
    pub address: Pubkey,
    pub wallet: Pubkey,
    pub total_bets: u64,
    pub total_volume: u64,
    pub total_wins: u64,
    pub total_losses: u64,
    pub total_pnl: i64, // may be negative
    pub markets_created: u64,
    pub markets_participated: u64,
    pub bump: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub address: Pubkey,
    pub admin: Pubkey,
    pub treasury: Pubkey,
    pub fee_bps: u16,
    pub min_bet_lamports: u64,
    pub min_market_duration: i64,
    pub total_markets: u64,
    pub total_volume: u64,
    pub total_bets: u64,
    pub bump: u8,
}
