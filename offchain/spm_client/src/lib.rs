// offchain/spm_client/src/lib.rs
//! Client for the spm prediction-market program: account decoding, bulk and targeted
//! reads, a reconnecting live-update channel, derived views, and the write path.

pub mod accounts;
pub mod config;
pub mod decoder;
pub mod error;
pub mod fetch;
pub mod live;
pub mod protocol;
pub mod store;
pub mod types;
pub mod views;
pub mod wallet;

pub use accounts::{decode_any, AccountKind, ProgramAccount, ProgramRecord};
pub use config::{ChannelConfig, ClientConfig};
pub use error::{ConfigError, DecodeError, FetchError, TxFailure};
pub use fetch::{AccountFilter, AccountSource, ProgramAccounts, ProgramReader, RpcAccountSource};
pub use live::{ChannelState, LiveChannel};
pub use protocol::{ProgramAddresses, SpmProgram};
pub use types::{
    Argument, ArgumentVote, Bet, Market, MarketCategory, MarketStatus, Platform, Side, UserStats,
};
