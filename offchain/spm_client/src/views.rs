// offchain/spm_client/src/views.rs
//! Pure transforms over decoded records: odds, filtering, sorting, leaderboard, portfolio,
//! and display formatting. Nothing here touches the network.

use std::cmp::Reverse;
use std::time::{SystemTime, UNIX_EPOCH};

use solana_sdk::{native_token::LAMPORTS_PER_SOL, pubkey::Pubkey};

use crate::types::{Argument, Bet, Market, MarketCategory, MarketStatus, Side, UserStats};

pub const BPS_TOTAL: u64 = 10_000;

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// ---------- Odds ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Odds {
    pub side_a_bps: u64,
    pub side_b_bps: u64,
}

impl Odds {
    pub fn for_side(&self, side: Side) -> u64 {
        match side {
            Side::A => self.side_a_bps,
            Side::B => self.side_b_bps,
        }
    }
}

/// Side A is rounded half-up and side B takes the remainder, so the pair always sums to
/// exactly 10000. Integer math throughout; no float drift.
pub fn odds_from_pools(pool_a: u64, pool_b: u64) -> Odds {
    let total = pool_a as u128 + pool_b as u128;
    if total == 0 {
        return Odds {
            side_a_bps: BPS_TOTAL / 2,
            side_b_bps: BPS_TOTAL / 2,
        };
    }
    let side_a = (pool_a as u128 * BPS_TOTAL as u128 * 2 + total) / (total * 2);
    let side_a_bps = side_a as u64;
    Odds {
        side_a_bps,
        side_b_bps: BPS_TOTAL - side_a_bps,
    }
}

pub fn calculate_odds(market: &Market) -> Odds {
    odds_from_pools(market.side_a_pool, market.side_b_pool)
}

pub fn total_pool(market: &Market) -> u64 {
    market.side_a_pool.saturating_add(market.side_b_pool)
}

/// Percentage in 0..=100.
pub fn implied_probability(market: &Market, side: Side) -> f64 {
    calculate_odds(market).for_side(side) as f64 / 100.0
}

// ---------- Market filtering ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    Volume,
    Newest,
    Closing,
    #[default]
    Trending,
}

impl SortBy {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "volume" => Some(SortBy::Volume),
            "newest" => Some(SortBy::Newest),
            "closing" => Some(SortBy::Closing),
            "trending" => Some(SortBy::Trending),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MarketFilter {
    pub category: Option<MarketCategory>,
    pub status: Option<MarketStatus>,
    pub search: Option<String>,
    pub sort_by: SortBy,
}

/// Newer and busier markets rank higher; age is floored at one hour.
pub fn trending_score(market: &Market, now: i64) -> f64 {
    let age_hours = (now.saturating_sub(market.created_at) as f64 / 3600.0).max(1.0);
    market.total_volume as f64 / 1e6 + 1000.0 / age_hours + market.bounty as f64 / 1e6
}

impl MarketFilter {
    pub fn matches(&self, market: &Market) -> bool {
        if self.category.is_some_and(|c| c != market.category) {
            return false;
        }
        if self.status.is_some_and(|s| s != market.status) {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(q) if !q.is_empty() => {
                let q = q.to_lowercase();
                market.title.to_lowercase().contains(&q)
                    || market.description.to_lowercase().contains(&q)
            }
            _ => true,
        }
    }

    pub fn apply(&self, markets: &[Market], now: i64) -> Vec<Market> {
        let mut out: Vec<Market> = markets.iter().filter(|m| self.matches(m)).cloned().collect();

        match self.sort_by {
            SortBy::Volume => out.sort_by_key(|m| Reverse(m.total_volume)),
            SortBy::Newest => out.sort_by_key(|m| Reverse(m.created_at)),
            SortBy::Closing => {
                out.retain(|m| m.status == MarketStatus::Open);
                out.sort_by_key(|m| m.closes_at);
            }
            SortBy::Trending => out.sort_by(|a, b| {
                trending_score(b, now).total_cmp(&trending_score(a, now))
            }),
        }
        out
    }
}

pub fn sort_bets_newest(bets: &mut [Bet]) {
    bets.sort_by_key(|b| Reverse(b.created_at));
}

pub fn sort_arguments_by_score(args: &mut [Argument]) {
    args.sort_by_key(|a| Reverse(a.score()));
}

/// Zero-based page. Out-of-range pages are empty.
pub fn paginate<T>(items: &[T], page: usize, page_size: usize) -> &[T] {
    if page_size == 0 {
        return &[];
    }
    let start = page.saturating_mul(page_size).min(items.len());
    let end = start.saturating_add(page_size).min(items.len());
    &items[start..end]
}

pub fn page_count(len: usize, page_size: usize) -> usize {
    if page_size == 0 {
        0
    } else {
        len.div_ceil(page_size)
    }
}

// ---------- Leaderboard ----------

#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub wallet: Pubkey,
    pub total_bets: u64,
    pub total_volume: u64,
    pub total_wins: u64,
    pub total_losses: u64,
    pub total_pnl: i64,
    pub win_rate: f64, // percent
}

pub fn leaderboard(stats: Vec<UserStats>) -> Vec<LeaderboardEntry> {
    let mut active: Vec<UserStats> = stats.into_iter().filter(|s| s.total_bets > 0).collect();
    active.sort_by_key(|s| Reverse(s.total_pnl));

    active
        .into_iter()
        .enumerate()
        .map(|(i, s)| LeaderboardEntry {
            rank: i + 1,
            wallet: s.wallet,
            total_bets: s.total_bets,
            total_volume: s.total_volume,
            total_wins: s.total_wins,
            total_losses: s.total_losses,
            total_pnl: s.total_pnl,
            win_rate: s.total_wins as f64 / s.total_bets as f64 * 100.0,
        })
        .collect()
}

// ---------- Portfolio ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    Active,
    Won,
    Lost,
    Refundable,
    Claimed,
    Refunded,
}

impl PositionState {
    pub fn label(self) -> &'static str {
        match self {
            PositionState::Active => "ACTIVE",
            PositionState::Won => "WON",
            PositionState::Lost => "LOST",
            PositionState::Refundable => "REFUNDABLE",
            PositionState::Claimed => "CLAIMED",
            PositionState::Refunded => "REFUNDED",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub bet: Bet,
    pub market: Option<Market>,
    pub state: PositionState,
    /// Pro-rata share of both pools before fees. Display only; the program settles.
    pub estimated_payout: Option<u64>,
}

pub fn position_state(bet: &Bet, market: Option<&Market>) -> PositionState {
    if bet.claimed {
        return PositionState::Claimed;
    }
    if bet.refunded {
        return PositionState::Refunded;
    }
    match market {
        Some(m) if m.status == MarketStatus::Cancelled => PositionState::Refundable,
        Some(m) if m.status == MarketStatus::Resolved => match m.winning_side {
            Some(side) if side == bet.side => PositionState::Won,
            _ => PositionState::Lost,
        },
        _ => PositionState::Active,
    }
}

/// What `bet` would pay if its side won, given the market's current pools.
pub fn estimate_payout(bet: &Bet, market: &Market) -> Option<u64> {
    let side_pool = market.pool(bet.side) as u128;
    if side_pool == 0 {
        return None;
    }
    let total = market.side_a_pool as u128 + market.side_b_pool as u128;
    u64::try_from(bet.amount as u128 * total / side_pool).ok()
}

pub fn portfolio(bets: &[Bet], markets: &[Market]) -> Vec<Position> {
    let mut out: Vec<Position> = bets
        .iter()
        .map(|bet| {
            let market = markets.iter().find(|m| m.address == bet.market);
            let state = position_state(bet, market);
            let estimated_payout = match (state, market) {
                (PositionState::Won | PositionState::Active, Some(m)) => estimate_payout(bet, m),
                _ => None,
            };
            Position {
                bet: bet.clone(),
                market: market.cloned(),
                state,
                estimated_payout,
            }
        })
        .collect();
    out.sort_by_key(|p| Reverse(p.bet.created_at));
    out
}

// ---------- Formatting ----------

/// Lossy above 2^53 lamports.
pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

fn format_sol_value(sol: f64) -> String {
    if sol >= 1_000_000.0 {
        format!("{:.1}M", sol / 1_000_000.0)
    } else if sol >= 1_000.0 {
        format!("{:.1}K", sol / 1_000.0)
    } else if sol >= 1.0 {
        format!("{sol:.2}")
    } else {
        format!("{sol:.4}")
    }
}

pub fn format_sol(lamports: u64) -> String {
    format_sol_value(lamports_to_sol(lamports))
}

pub fn format_bps(bps: u64) -> String {
    format!("{:.1}%", bps as f64 / 100.0)
}

/// Signed SOL amount, always with a leading sign.
pub fn format_pnl(lamports: i64) -> String {
    let sign = if lamports >= 0 { '+' } else { '-' };
    format!("{sign}{}", format_sol(lamports.unsigned_abs()))
}

pub fn truncate_address(address: &str, chars: usize) -> String {
    let len = address.chars().count();
    if len <= chars * 2 + 2 {
        return address.to_string();
    }
    let head: String = address.chars().take(chars).collect();
    let tail: String = address.chars().skip(len - chars).collect();
    format!("{head}...{tail}")
}

pub fn format_countdown(closes_at: i64, now: i64) -> String {
    let diff = closes_at.saturating_sub(now);
    if diff <= 0 {
        "CLOSED".to_string()
    } else if diff < 3_600 {
        format!("{}M LEFT", diff / 60)
    } else if diff < 86_400 {
        format!("{}H LEFT", diff / 3_600)
    } else {
        format!("{}D LEFT", diff / 86_400)
    }
}

pub fn format_time_ago(ts: i64, now: i64) -> String {
    let diff = now.saturating_sub(ts);
    if diff < 60 {
        "JUST NOW".to_string()
    } else if diff < 3_600 {
        format!("{}M AGO", diff / 60)
    } else if diff < 86_400 {
        format!("{}H AGO", diff / 3_600)
    } else {
        format!("{}D AGO", diff / 86_400)
    }
}
