// offchain/spm_client/src/accounts.rs
//! Per-account decoders for the spm program.
//!
//! Every decoder gates on a length floor and the 8-byte Anchor discriminator
//! (`sha256("account:<Name>")[..8]`) before interpreting a single field, then walks the
//! fields in on-chain order. A decoder never panics; it returns a [`DecodeError`] and the
//! caller decides whether that is a routine mismatch or corruption worth logging.

use solana_sdk::pubkey::Pubkey;

use crate::decoder::{discriminator, Cursor, DISCRIMINATOR_LEN};
use crate::error::DecodeError;
use crate::types::{
    Argument, ArgumentVote, Bet, Market, MarketCategory, MarketStatus, Platform, Side, UserStats,
};

pub const MARKET_DISCRIMINATOR: [u8; 8] = [0xdb, 0xbe, 0xd5, 0x37, 0x00, 0xe3, 0xc6, 0x9a];
pub const BET_DISCRIMINATOR: [u8; 8] = [0x93, 0x17, 0x23, 0x3b, 0x0f, 0x4b, 0x9b, 0x20];
pub const ARGUMENT_DISCRIMINATOR: [u8; 8] = [0x52, 0x2a, 0xa5, 0xc6, 0x4a, 0xb8, 0x00, 0x94];
pub const ARGUMENT_VOTE_DISCRIMINATOR: [u8; 8] = [0xc7, 0x63, 0x7e, 0xc2, 0x2c, 0xc7, 0x94, 0xa2];
pub const USER_STATS_DISCRIMINATOR: [u8; 8] = [0xb0, 0xdf, 0x88, 0x1b, 0x7a, 0x4f, 0x20, 0xe3];
pub const PLATFORM_DISCRIMINATOR: [u8; 8] = [0x4d, 0x5c, 0xcc, 0x3a, 0xbb, 0x62, 0x5b, 0x0c];

// Smallest possible encodings (every string empty, option tag = none).
pub const MARKET_MIN_LEN: usize = DISCRIMINATOR_LEN
    + 32 + 8            // creator, market_index
    + 4 + 4             // title, description
    + 1 + 1             // category, status
    + 4 + 4             // side labels
    + 8 + 8 + 8         // pools, total_volume
    + 4 + 4 + 4         // total_bets, bettors a/b
    + 8                 // bounty
    + 8 + 8 + 8         // created/closes/resolved
    + 1                 // winning_side tag
    + 4                 // resolution_reason
    + 1 + 1; // vault_bump, bump
pub const BET_LEN: usize = DISCRIMINATOR_LEN + 32 + 32 + 1 + 8 + 8 + 1 + 1 + 8 + 1;
pub const ARGUMENT_MIN_LEN: usize = DISCRIMINATOR_LEN + 32 * 3 + 1 + 4 + 4 + 4 + 8 + 1;
pub const ARGUMENT_VOTE_LEN: usize = DISCRIMINATOR_LEN + 32 + 32 + 1 + 1;
pub const USER_STATS_LEN: usize = DISCRIMINATOR_LEN + 32 + 8 * 4 + 8 + 8 * 2 + 1;
pub const PLATFORM_LEN: usize = DISCRIMINATOR_LEN + 32 + 32 + 2 + 8 + 8 + 8 + 8 + 8 + 1;

// Field offsets used by server-side memcmp filters.
pub const BET_MARKET_OFFSET: usize = DISCRIMINATOR_LEN;
pub const BET_BETTOR_OFFSET: usize = DISCRIMINATOR_LEN + 32;
pub const ARGUMENT_MARKET_OFFSET: usize = DISCRIMINATOR_LEN;
pub const USER_STATS_WALLET_OFFSET: usize = DISCRIMINATOR_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountKind {
    Market,
    Bet,
    Argument,
    ArgumentVote,
    UserStats,
    Platform,
}

impl AccountKind {
    pub fn discriminator(self) -> [u8; 8] {
        match self {
            AccountKind::Market => MARKET_DISCRIMINATOR,
            AccountKind::Bet => BET_DISCRIMINATOR,
            AccountKind::Argument => ARGUMENT_DISCRIMINATOR,
            AccountKind::ArgumentVote => ARGUMENT_VOTE_DISCRIMINATOR,
            AccountKind::UserStats => USER_STATS_DISCRIMINATOR,
            AccountKind::Platform => PLATFORM_DISCRIMINATOR,
        }
    }

    pub fn min_len(self) -> usize {
        match self {
            AccountKind::Market => MARKET_MIN_LEN,
            AccountKind::Bet => BET_LEN,
            AccountKind::Argument => ARGUMENT_MIN_LEN,
            AccountKind::ArgumentVote => ARGUMENT_VOTE_LEN,
            AccountKind::UserStats => USER_STATS_LEN,
            AccountKind::Platform => PLATFORM_LEN,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AccountKind::Market => "Market",
            AccountKind::Bet => "Bet",
            AccountKind::Argument => "Argument",
            AccountKind::ArgumentVote => "ArgumentVote",
            AccountKind::UserStats => "UserStats",
            AccountKind::Platform => "Platform",
        }
    }

    /// Which kind the first 8 bytes announce, if any.
    pub fn identify(data: &[u8]) -> Option<Self> {
        let disc = discriminator(data)?;
        [
            AccountKind::Market,
            AccountKind::Bet,
            AccountKind::Argument,
            AccountKind::ArgumentVote,
            AccountKind::UserStats,
            AccountKind::Platform,
        ]
        .into_iter()
        .find(|k| k.discriminator() == disc)
    }
}

/// Length floor, then discriminator. Returns a cursor positioned at the first field.
fn open(kind: AccountKind, data: &[u8]) -> Result<Cursor<'_>, DecodeError> {
    if data.len() < kind.min_len() {
        return Err(DecodeError::TooShort {
            kind: kind.name(),
            len: data.len(),
            min: kind.min_len(),
        });
    }
    if discriminator(data) != Some(kind.discriminator()) {
        return Err(DecodeError::DiscriminatorMismatch { kind: kind.name() });
    }
    Ok(Cursor::after_discriminator(data))
}

/// A record type that lives in its own program account.
pub trait ProgramRecord: Sized {
    const KIND: AccountKind;

    fn decode(address: &Pubkey, data: &[u8]) -> Result<Self, DecodeError>;
}

impl ProgramRecord for Market {
    const KIND: AccountKind = AccountKind::Market;

    fn decode(address: &Pubkey, data: &[u8]) -> Result<Self, DecodeError> {
        decode_market(address, data)
    }
}

impl ProgramRecord for Bet {
    const KIND: AccountKind = AccountKind::Bet;

    fn decode(address: &Pubkey, data: &[u8]) -> Result<Self, DecodeError> {
        decode_bet(address, data)
    }
}

impl ProgramRecord for Argument {
    const KIND: AccountKind = AccountKind::Argument;

    fn decode(address: &Pubkey, data: &[u8]) -> Result<Self, DecodeError> {
        decode_argument(address, data)
    }
}

impl ProgramRecord for ArgumentVote {
    const KIND: AccountKind = AccountKind::ArgumentVote;

    fn decode(address: &Pubkey, data: &[u8]) -> Result<Self, DecodeError> {
        decode_argument_vote(address, data)
    }
}

impl ProgramRecord for UserStats {
    const KIND: AccountKind = AccountKind::UserStats;

    fn decode(address: &Pubkey, data: &[u8]) -> Result<Self, DecodeError> {
        decode_user_stats(address, data)
    }
}

impl ProgramRecord for Platform {
    const KIND: AccountKind = AccountKind::Platform;

    fn decode(address: &Pubkey, data: &[u8]) -> Result<Self, DecodeError> {
        decode_platform(address, data)
    }
}

// ---------- Decoders ----------

pub fn decode_market(address: &Pubkey, data: &[u8]) -> Result<Market, DecodeError> {
    let mut c = open(AccountKind::Market, data)?;

    let creator = c.pubkey()?;
    let market_index = c.u64()?;
    let title = c.string()?;
    let description = c.string()?;
    let category = MarketCategory::from_ordinal(c.u8()?);
    let status = MarketStatus::from_ordinal(c.u8()?);
    let side_a_label = c.string()?;
    let side_b_label = c.string()?;
    let side_a_pool = c.u64()?;
    let side_b_pool = c.u64()?;
    let total_volume = c.u64()?;
    let total_bets = c.u32()?;
    let total_bettors_a = c.u32()?;
    let total_bettors_b = c.u32()?;
    let bounty = c.u64()?;
    let created_at = c.i64()?;
    let closes_at = c.i64()?;
    let resolved_at = c.i64()?;
    let winning_side = c.option_side()?;
    let resolution_reason = c.string()?;
    let vault_bump = c.u8()?;
    let bump = c.u8()?;

    if winning_side.is_some() && status != MarketStatus::Resolved {
        return Err(DecodeError::Invariant("winning side set on unresolved market"));
    }

    Ok(Market {
        address: *address,
        creator,
        market_index,
        title,
        description,
        category,
        status,
        side_a_label,
        side_b_label,
        side_a_pool,
        side_b_pool,
        total_volume,
        total_bets,
        total_bettors_a,
        total_bettors_b,
        bounty,
        created_at,
        closes_at,
        resolved_at: (resolved_at != 0).then_some(resolved_at),
        winning_side,
        resolution_reason,
        vault_bump,
        bump,
    })
}

pub fn decode_bet(address: &Pubkey, data: &[u8]) -> Result<Bet, DecodeError> {
    let mut c = open(AccountKind::Bet, data)?;

    let market = c.pubkey()?;
    let bettor = c.pubkey()?;
    let side = Side::from_ordinal(c.u8()?);
    let amount = c.u64()?;
    let odds_at_bet = c.u64()?;
    let claimed = c.bool()?;
    let refunded = c.bool()?;
    let created_at = c.i64()?;
    let bump = c.u8()?;

    if claimed && refunded {
        return Err(DecodeError::Invariant("bet both claimed and refunded"));
    }

    Ok(Bet {
        address: *address,
        market,
        bettor,
        side,
        amount,
        odds_at_bet,
        claimed,
        refunded,
        created_at,
        bump,
    })
}

pub fn decode_argument(address: &Pubkey, data: &[u8]) -> Result<Argument, DecodeError> {
    let mut c = open(AccountKind::Argument, data)?;

    Ok(Argument {
        address: *address,
        market: c.pubkey()?,
        bet: c.pubkey()?,
        author: c.pubkey()?,
        side: Side::from_ordinal(c.u8()?),
        content: c.string()?,
        upvotes: c.u32()?,
        downvotes: c.u32()?,
        created_at: c.i64()?,
        bump: c.u8()?,
    })
}

pub fn decode_argument_vote(address: &Pubkey, data: &[u8]) -> Result<ArgumentVote, DecodeError> {
    let mut c = open(AccountKind::ArgumentVote, data)?;

    Ok(ArgumentVote {
        address: *address,
        argument: c.pubkey()?,
        voter: c.pubkey()?,
        is_upvote: c.bool()?,
        bump: c.u8()?,
    })
}

pub fn decode_user_stats(address: &Pubkey, data: &[u8]) -> Result<UserStats, DecodeError> {
    let mut c = open(AccountKind::UserStats, data)?;

    Ok(UserStats {
        address: *address,
        wallet: c.pubkey()?,
        total_bets: c.u64()?,
        total_volume: c.u64()?,
        total_wins: c.u64()?,
        total_losses: c.u64()?,
        total_pnl: c.i64()?,
        markets_created: c.u64()?,
        markets_participated: c.u64()?,
        bump: c.u8()?,
    })
}

pub fn decode_platform(address: &Pubkey, data: &[u8]) -> Result<Platform, DecodeError> {
    let mut c = open(AccountKind::Platform, data)?;

    Ok(Platform {
        address: *address,
        admin: c.pubkey()?,
        treasury: c.pubkey()?,
        fee_bps: c.u16()?,
        min_bet_lamports: c.u64()?,
        min_market_duration: c.i64()?,
        total_markets: c.u64()?,
        total_volume: c.u64()?,
        total_bets: c.u64()?,
        bump: c.u8()?,
    })
}

/// Any account the program owns, dispatched on its discriminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramAccount {
    Market(Market),
    Bet(Bet),
    Argument(Argument),
    ArgumentVote(ArgumentVote),
    UserStats(UserStats),
    Platform(Platform),
}

pub fn decode_any(address: &Pubkey, data: &[u8]) -> Result<ProgramAccount, DecodeError> {
    let kind = AccountKind::identify(data).ok_or(DecodeError::DiscriminatorMismatch {
        kind: "any known account",
    })?;
    Ok(match kind {
        AccountKind::Market => ProgramAccount::Market(decode_market(address, data)?),
        AccountKind::Bet => ProgramAccount::Bet(decode_bet(address, data)?),
        AccountKind::Argument => ProgramAccount::Argument(decode_argument(address, data)?),
        AccountKind::ArgumentVote => {
            ProgramAccount::ArgumentVote(decode_argument_vote(address, data)?)
        }
        AccountKind::UserStats => ProgramAccount::UserStats(decode_user_stats(address, data)?),
        AccountKind::Platform => ProgramAccount::Platform(decode_platform(address, data)?),
    })
}
