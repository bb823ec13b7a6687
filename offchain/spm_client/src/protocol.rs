// offchain/spm_client/src/protocol.rs
use borsh::BorshSerialize;
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    native_token::LAMPORTS_PER_SOL,
    pubkey::Pubkey,
    system_program,
};

use crate::config::{
    MAX_ARGUMENT_LEN, MAX_DESCRIPTION_LEN, MAX_REASON_LEN, MAX_SIDE_LABEL_LEN, MAX_TITLE_LEN,
};
use crate::error::TxFailure;
use crate::types::{Bet, Market, MarketCategory, Platform, Side};

/// Seeds must match the program's PDA constraints byte for byte.
pub const PLATFORM_SEED: &[u8] = b"platform";
pub const MARKET_SEED: &[u8] = b"market";
pub const VAULT_SEED: &[u8] = b"vault";
pub const BET_SEED: &[u8] = b"bet";
pub const USER_STATS_SEED: &[u8] = b"user_stats";
pub const ARGUMENT_SEED: &[u8] = b"argument";
pub const ARG_VOTE_SEED: &[u8] = b"arg_vote";

// ---------- PDA derivation ----------

/// Deterministic addresses of every program-derived account.
#[derive(Clone, Copy, Debug)]
pub struct ProgramAddresses {
    pub program_id: Pubkey,
}

impl ProgramAddresses {
    pub fn new(program_id: Pubkey) -> Self {
        Self { program_id }
    }

    fn derive(&self, seeds: &[&[u8]]) -> Pubkey {
        Pubkey::find_program_address(seeds, &self.program_id).0
    }

    pub fn platform(&self) -> Pubkey {
        self.derive(&[PLATFORM_SEED])
    }

    pub fn market(&self, market_index: u64) -> Pubkey {
        self.derive(&[MARKET_SEED, &market_index.to_le_bytes()])
    }

    pub fn vault(&self, market: &Pubkey) -> Pubkey {
        self.derive(&[VAULT_SEED, market.as_ref()])
    }

    /// `total_bets` is the market's bet counter *before* this bet lands.
    pub fn bet(&self, market: &Pubkey, bettor: &Pubkey, total_bets: u32) -> Pubkey {
        self.derive(&[
            BET_SEED,
            market.as_ref(),
            bettor.as_ref(),
            &total_bets.to_le_bytes(),
        ])
    }

    pub fn user_stats(&self, wallet: &Pubkey) -> Pubkey {
        self.derive(&[USER_STATS_SEED, wallet.as_ref()])
    }

    pub fn argument(&self, bet: &Pubkey) -> Pubkey {
        self.derive(&[ARGUMENT_SEED, bet.as_ref()])
    }

    pub fn arg_vote(&self, argument: &Pubkey, voter: &Pubkey) -> Pubkey {
        self.derive(&[ARG_VOTE_SEED, argument.as_ref(), voter.as_ref()])
    }
}

// ---------- Instruction payloads ----------

/// Instruction arguments: 8-byte Anchor discriminator (`sha256("global:<name>")[..8]`)
/// followed by the borsh-encoded fields.
pub trait InstructionArgs: BorshSerialize {
    const DISCRIMINATOR: [u8; 8];

    fn data(&self) -> std::io::Result<Vec<u8>> {
        let mut out = Self::DISCRIMINATOR.to_vec();
        self.serialize(&mut out)?;
        Ok(out)
    }
}

#[derive(BorshSerialize, Debug, Clone)]
pub struct PlaceBet {
    pub side: u8,
    pub amount: u64,
}

impl InstructionArgs for PlaceBet {
    const DISCRIMINATOR: [u8; 8] = [222, 62, 67, 220, 63, 166, 126, 33];
}

#[derive(BorshSerialize, Debug, Clone)]
pub struct CreateMarket {
    pub title: String,
    pub description: String,
    pub category: MarketCategory,
    pub side_a_label: String,
    pub side_b_label: String,
    pub closes_at: i64,
}

impl InstructionArgs for CreateMarket {
    const DISCRIMINATOR: [u8; 8] = [103, 226, 97, 235, 200, 188, 251, 254];
}

#[derive(BorshSerialize, Debug, Clone)]
pub struct AddArgument {
    pub content: String,
}

impl InstructionArgs for AddArgument {
    const DISCRIMINATOR: [u8; 8] = [173, 184, 10, 203, 181, 2, 211, 123];
}

#[derive(BorshSerialize, Debug, Clone)]
pub struct VoteArgument {
    pub is_upvote: bool,
}

impl InstructionArgs for VoteArgument {
    const DISCRIMINATOR: [u8; 8] = [51, 167, 50, 48, 84, 38, 251, 32];
}

#[derive(BorshSerialize, Debug, Clone)]
pub struct AddBounty {
    pub amount: u64,
}

impl InstructionArgs for AddBounty {
    const DISCRIMINATOR: [u8; 8] = [191, 252, 22, 104, 244, 188, 231, 153];
}

#[derive(BorshSerialize, Debug, Clone)]
pub struct ResolveMarket {
    pub winning_side: u8,
    pub reason: String,
}

impl InstructionArgs for ResolveMarket {
    const DISCRIMINATOR: [u8; 8] = [155, 23, 80, 173, 46, 74, 23, 239];
}

#[derive(BorshSerialize, Debug, Clone)]
pub struct ClaimWinnings;

impl InstructionArgs for ClaimWinnings {
    const DISCRIMINATOR: [u8; 8] = [161, 215, 24, 59, 14, 236, 242, 221];
}

#[derive(BorshSerialize, Debug, Clone)]
pub struct ClaimRefund;

impl InstructionArgs for ClaimRefund {
    const DISCRIMINATOR: [u8; 8] = [15, 16, 30, 161, 255, 228, 97, 60];
}

#[derive(BorshSerialize, Debug, Clone)]
pub struct CloseMarket;

impl InstructionArgs for CloseMarket {
    const DISCRIMINATOR: [u8; 8] = [88, 154, 248, 186, 48, 14, 123, 244];
}

#[derive(BorshSerialize, Debug, Clone)]
pub struct CancelMarket;

impl InstructionArgs for CancelMarket {
    const DISCRIMINATOR: [u8; 8] = [205, 121, 84, 210, 222, 71, 150, 11];
}

/// Whole SOL to lamports, rounding down. Rejects non-finite and non-positive input.
pub fn sol_to_lamports(sol: f64) -> Result<u64, TxFailure> {
    if !sol.is_finite() || sol <= 0.0 {
        return Err(TxFailure::Invalid(format!("amount must be positive, got {sol}")));
    }
    let lamports = (sol * LAMPORTS_PER_SOL as f64).floor();
    if lamports < 1.0 || lamports > u64::MAX as f64 {
        return Err(TxFailure::Invalid(format!("amount out of range: {sol} SOL")));
    }
    Ok(lamports as u64)
}

fn check_len(field: &str, value: &str, max: usize) -> Result<(), TxFailure> {
    if value.len() > max {
        return Err(TxFailure::Invalid(format!(
            "{field} too long ({} bytes, max {max})",
            value.len()
        )));
    }
    Ok(())
}

fn ix<A: InstructionArgs>(
    program_id: Pubkey,
    accounts: Vec<AccountMeta>,
    args: &A,
) -> Result<Instruction, TxFailure> {
    let data = args
        .data()
        .map_err(|e| TxFailure::Other(format!("failed to encode instruction: {e}")))?;
    Ok(Instruction {
        program_id,
        accounts,
        data,
    })
}

// ---------- Instruction builders ----------

/// Builds instructions for the spm program. Account lists follow the program's order.
#[derive(Clone, Copy, Debug)]
pub struct SpmProgram {
    pub addresses: ProgramAddresses,
}

impl SpmProgram {
    pub fn new(program_id: Pubkey) -> Self {
        Self {
            addresses: ProgramAddresses::new(program_id),
        }
    }

    pub fn program_id(&self) -> Pubkey {
        self.addresses.program_id
    }

    /// Uses `market.total_bets` to derive the new bet's address, so the market snapshot
    /// must be fresh or the program rejects the seeds.
    pub fn place_bet(
        &self,
        bettor: &Pubkey,
        market: &Market,
        side: Side,
        amount: u64,
    ) -> Result<Instruction, TxFailure> {
        if amount == 0 {
            return Err(TxFailure::Invalid("bet amount must be greater than zero".into()));
        }
        let a = &self.addresses;
        let bet = a.bet(&market.address, bettor, market.total_bets);

        ix(
            self.program_id(),
            vec![
                AccountMeta::new(*bettor, true),
                AccountMeta::new(a.platform(), false),
                AccountMeta::new(market.address, false),
                AccountMeta::new(a.vault(&market.address), false),
                AccountMeta::new(bet, false),
                AccountMeta::new(a.user_stats(bettor), false),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            &PlaceBet {
                side: side.ordinal(),
                amount,
            },
        )
    }

    /// The new market's index is the platform's current `total_markets`.
    pub fn create_market(
        &self,
        creator: &Pubkey,
        platform: &Platform,
        args: CreateMarket,
    ) -> Result<Instruction, TxFailure> {
        check_len("title", &args.title, MAX_TITLE_LEN)?;
        check_len("description", &args.description, MAX_DESCRIPTION_LEN)?;
        check_len("side A label", &args.side_a_label, MAX_SIDE_LABEL_LEN)?;
        check_len("side B label", &args.side_b_label, MAX_SIDE_LABEL_LEN)?;

        let a = &self.addresses;
        let market = a.market(platform.total_markets);

        ix(
            self.program_id(),
            vec![
                AccountMeta::new(*creator, true),
                AccountMeta::new(a.platform(), false),
                AccountMeta::new(market, false),
                AccountMeta::new_readonly(a.vault(&market), false),
                AccountMeta::new(a.user_stats(creator), false),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            &args,
        )
    }

    pub fn add_argument(
        &self,
        author: &Pubkey,
        bet: &Bet,
        content: String,
    ) -> Result<Instruction, TxFailure> {
        check_len("argument", &content, MAX_ARGUMENT_LEN)?;
        if content.trim().is_empty() {
            return Err(TxFailure::Invalid("argument must not be empty".into()));
        }

        ix(
            self.program_id(),
            vec![
                AccountMeta::new(*author, true),
                AccountMeta::new_readonly(bet.market, false),
                AccountMeta::new_readonly(bet.address, false),
                AccountMeta::new(self.addresses.argument(&bet.address), false),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            &AddArgument { content },
        )
    }

    pub fn vote_argument(
        &self,
        voter: &Pubkey,
        market: &Pubkey,
        argument: &Pubkey,
        is_upvote: bool,
    ) -> Result<Instruction, TxFailure> {
        ix(
            self.program_id(),
            vec![
                AccountMeta::new(*voter, true),
                AccountMeta::new_readonly(*market, false),
                AccountMeta::new(*argument, false),
                AccountMeta::new(self.addresses.arg_vote(argument, voter), false),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            &VoteArgument { is_upvote },
        )
    }

    pub fn add_bounty(
        &self,
        funder: &Pubkey,
        market: &Pubkey,
        amount: u64,
    ) -> Result<Instruction, TxFailure> {
        if amount == 0 {
            return Err(TxFailure::Invalid("bounty must be greater than zero".into()));
        }

        ix(
            self.program_id(),
            vec![
                AccountMeta::new(*funder, true),
                AccountMeta::new(*market, false),
                AccountMeta::new(self.addresses.vault(market), false),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            &AddBounty { amount },
        )
    }

    pub fn claim_winnings(
        &self,
        claimer: &Pubkey,
        bet: &Bet,
        platform: &Platform,
    ) -> Result<Instruction, TxFailure> {
        let a = &self.addresses;
        ix(
            self.program_id(),
            vec![
                AccountMeta::new(*claimer, true),
                AccountMeta::new_readonly(a.platform(), false),
                AccountMeta::new_readonly(bet.market, false),
                AccountMeta::new(a.vault(&bet.market), false),
                AccountMeta::new(bet.address, false),
                AccountMeta::new(a.user_stats(claimer), false),
                AccountMeta::new(platform.treasury, false),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            &ClaimWinnings,
        )
    }

    pub fn claim_refund(&self, claimer: &Pubkey, bet: &Bet) -> Result<Instruction, TxFailure> {
        ix(
            self.program_id(),
            vec![
                AccountMeta::new(*claimer, true),
                AccountMeta::new_readonly(bet.market, false),
                AccountMeta::new(self.addresses.vault(&bet.market), false),
                AccountMeta::new(bet.address, false),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            &ClaimRefund,
        )
    }

    pub fn close_market(&self, closer: &Pubkey, market: &Pubkey) -> Result<Instruction, TxFailure> {
        ix(
            self.program_id(),
            vec![
                AccountMeta::new_readonly(*closer, true),
                AccountMeta::new(*market, false),
            ],
            &CloseMarket,
        )
    }

    pub fn resolve_market(
        &self,
        resolver: &Pubkey,
        market: &Pubkey,
        winning_side: Side,
        reason: String,
    ) -> Result<Instruction, TxFailure> {
        check_len("resolution reason", &reason, MAX_REASON_LEN)?;

        ix(
            self.program_id(),
            vec![
                AccountMeta::new_readonly(*resolver, true),
                AccountMeta::new_readonly(self.addresses.platform(), false),
                AccountMeta::new(*market, false),
            ],
            &ResolveMarket {
                winning_side: winning_side.ordinal(),
                reason,
            },
        )
    }

    pub fn cancel_market(&self, admin: &Pubkey, market: &Pubkey) -> Result<Instruction, TxFailure> {
        ix(
            self.program_id(),
            vec![
                AccountMeta::new_readonly(*admin, true),
                AccountMeta::new_readonly(self.addresses.platform(), false),
                AccountMeta::new(*market, false),
            ],
            &CancelMarket,
        )
    }
}
