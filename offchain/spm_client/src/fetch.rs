// offchain/spm_client/src/fetch.rs
//! Read side: bulk retrieval of program accounts and targeted, filter-narrowed queries.
//!
//! Server-side filters only shrink the transfer. Every returned buffer is decoded in full
//! and, where a filter was used, the filter is re-checked locally before the record is kept.

use async_trait::async_trait;
use solana_account_decoder::UiAccountEncoding;
use solana_client::{
    nonblocking::rpc_client::RpcClient,
    rpc_config::{RpcAccountInfoConfig, RpcProgramAccountsConfig},
    rpc_filter::{Memcmp, RpcFilterType},
};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};
use tracing::{debug, trace, warn};

use crate::accounts::{
    decode_argument, decode_bet, decode_market, decode_platform, decode_user_stats, AccountKind,
    ProgramRecord, ARGUMENT_MARKET_OFFSET, BET_BETTOR_OFFSET, BET_LEN, BET_MARKET_OFFSET,
};
use crate::error::{DecodeError, FetchError};
use crate::protocol::ProgramAddresses;
use crate::types::{Argument, Bet, Market, Platform, UserStats};
use crate::views::{self, LeaderboardEntry};

// ---------- Read endpoint ----------

/// Narrowing filter for program account queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountFilter {
    DataSize(u64),
    Memcmp { offset: usize, bytes: Vec<u8> },
}

impl AccountFilter {
    pub fn pubkey_at(offset: usize, key: &Pubkey) -> Self {
        AccountFilter::Memcmp {
            offset,
            bytes: key.to_bytes().to_vec(),
        }
    }

    pub fn kind(kind: AccountKind) -> Self {
        AccountFilter::Memcmp {
            offset: 0,
            bytes: kind.discriminator().to_vec(),
        }
    }

    pub fn matches(&self, data: &[u8]) -> bool {
        match self {
            AccountFilter::DataSize(size) => data.len() as u64 == *size,
            AccountFilter::Memcmp { offset, bytes } => offset
                .checked_add(bytes.len())
                .and_then(|end| data.get(*offset..end))
                .map_or(false, |window| window == bytes.as_slice()),
        }
    }

    fn to_rpc(&self) -> RpcFilterType {
        match self {
            AccountFilter::DataSize(size) => RpcFilterType::DataSize(*size),
            AccountFilter::Memcmp { offset, bytes } => {
                RpcFilterType::Memcmp(Memcmp::new_base58_encoded(*offset, bytes))
            }
        }
    }
}

/// One account as returned by the read endpoint: address + raw data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAccount {
    pub address: Pubkey,
    pub data: Vec<u8>,
}

/// What the client needs from the RPC node. Each call is one network round trip.
#[async_trait]
pub trait AccountSource: Send + Sync {
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, FetchError>;

    async fn get_multiple_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<Vec<u8>>>, FetchError>;

    async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
        filters: &[AccountFilter],
    ) -> Result<Vec<RawAccount>, FetchError>;
}

pub struct RpcAccountSource {
    client: RpcClient,
    commitment: CommitmentConfig,
}

impl RpcAccountSource {
    pub fn new(rpc_url: String, commitment: CommitmentConfig) -> Self {
        Self {
            client: RpcClient::new_with_commitment(rpc_url, commitment),
            commitment,
        }
    }

    pub fn client(&self) -> &RpcClient {
        &self.client
    }
}

#[async_trait]
impl AccountSource for RpcAccountSource {
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, FetchError> {
        let resp = self
            .client
            .get_account_with_commitment(address, self.commitment)
            .await?;
        Ok(resp.value.map(|acc| acc.data))
    }

    async fn get_multiple_accounts(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<Vec<u8>>>, FetchError> {
        let resp = self
            .client
            .get_multiple_accounts_with_commitment(addresses, self.commitment)
            .await?;
        Ok(resp.value.into_iter().map(|a| a.map(|acc| acc.data)).collect())
    }

    async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
        filters: &[AccountFilter],
    ) -> Result<Vec<RawAccount>, FetchError> {
        let config = RpcProgramAccountsConfig {
            filters: (!filters.is_empty())
                .then(|| filters.iter().map(AccountFilter::to_rpc).collect()),
            account_config: RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                commitment: Some(self.commitment),
                ..Default::default()
            },
            ..Default::default()
        };

        let accounts = self
            .client
            .get_program_accounts_with_config(program_id, config)
            .await?;
        Ok(accounts
            .into_iter()
            .map(|(address, acc)| RawAccount {
                address,
                data: acc.data,
            })
            .collect())
    }
}

// ---------- Classification ----------

/// Every program account from one bulk fetch, split by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramAccounts {
    pub markets: Vec<Market>,
    pub bets: Vec<Bet>,
    pub arguments: Vec<Argument>,
    pub user_stats: Vec<UserStats>,
    pub platform: Option<Platform>,
}

fn note_failure(address: &Pubkey, err: &DecodeError) {
    if err.is_mismatch() {
        trace!(%address, %err, "skipping account");
    } else {
        warn!(%address, %err, "dropping corrupt account");
    }
}

fn keep<T>(address: &Pubkey, decoded: Result<T, DecodeError>) -> Option<T> {
    decoded.map_err(|e| note_failure(address, &e)).ok()
}

/// Dispatch each buffer on its discriminator. Unknown kinds and failed decodes are dropped.
pub fn classify(raw: Vec<RawAccount>) -> ProgramAccounts {
    let mut out = ProgramAccounts::default();

    for RawAccount { address, data } in raw {
        let Some(kind) = AccountKind::identify(&data) else {
            trace!(%address, len = data.len(), "no known discriminator");
            continue;
        };
        match kind {
            AccountKind::Market => out
                .markets
                .extend(keep(&address, decode_market(&address, &data))),
            AccountKind::Bet => out.bets.extend(keep(&address, decode_bet(&address, &data))),
            AccountKind::Argument => out
                .arguments
                .extend(keep(&address, decode_argument(&address, &data))),
            AccountKind::UserStats => out
                .user_stats
                .extend(keep(&address, decode_user_stats(&address, &data))),
            AccountKind::Platform => {
                if let Some(p) = keep(&address, decode_platform(&address, &data)) {
                    out.platform = Some(p);
                }
            }
            AccountKind::ArgumentVote => {}
        }
    }

    out
}

/// Decode one kind, re-checking the filters that narrowed the query.
fn decode_filtered<T: ProgramRecord>(raw: Vec<RawAccount>, filters: &[AccountFilter]) -> Vec<T> {
    raw.into_iter()
        .filter(|acc| {
            let ok = filters.iter().all(|f| f.matches(&acc.data));
            if !ok {
                debug!(address = %acc.address, "endpoint returned account outside filter");
            }
            ok
        })
        .filter_map(|acc| keep(&acc.address, T::decode(&acc.address, &acc.data)))
        .collect()
}

// ---------- Reader ----------

/// Typed read operations against one program deployment.
pub struct ProgramReader<S> {
    source: S,
    addresses: ProgramAddresses,
}

impl<S: AccountSource> ProgramReader<S> {
    pub fn new(source: S, program_id: Pubkey) -> Self {
        Self {
            source,
            addresses: ProgramAddresses::new(program_id),
        }
    }

    pub fn program_id(&self) -> Pubkey {
        self.addresses.program_id
    }

    pub fn addresses(&self) -> &ProgramAddresses {
        &self.addresses
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    async fn query<T: ProgramRecord>(
        &self,
        filters: Vec<AccountFilter>,
    ) -> Result<Vec<T>, FetchError> {
        let raw = self
            .source
            .get_program_accounts(&self.addresses.program_id, &filters)
            .await
            .map_err(|e| {
                warn!(kind = T::KIND.name(), %e, "program account query failed");
                e
            })?;
        Ok(decode_filtered(raw, &filters))
    }

    /// One unfiltered round trip, classified locally.
    pub async fn fetch_all(&self) -> Result<ProgramAccounts, FetchError> {
        let raw = self
            .source
            .get_program_accounts(&self.addresses.program_id, &[])
            .await
            .map_err(|e| {
                warn!(%e, "bulk fetch failed");
                e
            })?;
        let total = raw.len();
        let out = classify(raw);
        debug!(
            total,
            markets = out.markets.len(),
            bets = out.bets.len(),
            arguments = out.arguments.len(),
            user_stats = out.user_stats.len(),
            "classified program accounts"
        );
        Ok(out)
    }

    pub async fn fetch_markets(&self) -> Result<Vec<Market>, FetchError> {
        self.query(vec![AccountFilter::kind(AccountKind::Market)]).await
    }

    pub async fn fetch_market(&self, address: &Pubkey) -> Result<Option<Market>, FetchError> {
        let Some(data) = self.source.get_account(address).await? else {
            return Ok(None);
        };
        Ok(keep(address, decode_market(address, &data)))
    }

    /// Order follows `addresses`; missing or undecodable entries are skipped.
    pub async fn fetch_markets_by_address(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Market>, FetchError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let found = self.source.get_multiple_accounts(addresses).await?;
        Ok(addresses
            .iter()
            .zip(found)
            .filter_map(|(address, data)| {
                let data = data?;
                keep(address, decode_market(address, &data))
            })
            .collect())
    }

    /// Newest first.
    pub async fn fetch_market_bets(&self, market: &Pubkey) -> Result<Vec<Bet>, FetchError> {
        let mut bets: Vec<Bet> = self
            .query(vec![
                AccountFilter::DataSize(BET_LEN as u64),
                AccountFilter::pubkey_at(BET_MARKET_OFFSET, market),
            ])
            .await?;
        views::sort_bets_newest(&mut bets);
        Ok(bets)
    }

    /// Newest first.
    pub async fn fetch_user_bets(&self, wallet: &Pubkey) -> Result<Vec<Bet>, FetchError> {
        let mut bets: Vec<Bet> = self
            .query(vec![
                AccountFilter::DataSize(BET_LEN as u64),
                AccountFilter::pubkey_at(BET_BETTOR_OFFSET, wallet),
            ])
            .await?;
        views::sort_bets_newest(&mut bets);
        Ok(bets)
    }

    /// Highest net score first. Bets share the market field offset, so the
    /// discriminator check in the decoder is what separates them out.
    pub async fn fetch_market_arguments(
        &self,
        market: &Pubkey,
    ) -> Result<Vec<Argument>, FetchError> {
        let mut args: Vec<Argument> = self
            .query(vec![AccountFilter::pubkey_at(ARGUMENT_MARKET_OFFSET, market)])
            .await?;
        args.retain(|a| a.market == *market);
        views::sort_arguments_by_score(&mut args);
        Ok(args)
    }

    pub async fn fetch_user_stats(&self, wallet: &Pubkey) -> Result<Option<UserStats>, FetchError> {
        let address = self.addresses.user_stats(wallet);
        let Some(data) = self.source.get_account(&address).await? else {
            return Ok(None);
        };
        Ok(keep(&address, decode_user_stats(&address, &data)).filter(|s| s.wallet == *wallet))
    }

    pub async fn fetch_all_user_stats(&self) -> Result<Vec<UserStats>, FetchError> {
        self.query(vec![AccountFilter::kind(AccountKind::UserStats)]).await
    }

    pub async fn fetch_platform(&self) -> Result<Platform, FetchError> {
        let address = self.addresses.platform();
        let data = self
            .source
            .get_account(&address)
            .await?
            .ok_or_else(|| FetchError::NotFound(address.to_string()))?;
        decode_platform(&address, &data).map_err(|e| {
            note_failure(&address, &e);
            FetchError::NotFound(address.to_string())
        })
    }

    pub async fn fetch_leaderboard(&self) -> Result<Vec<LeaderboardEntry>, FetchError> {
        Ok(views::leaderboard(self.fetch_all_user_stats().await?))
    }
}
