// offchain/spm_client/src/config.rs
use std::{env, path::PathBuf, str::FromStr, time::Duration};

use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};

use crate::error::ConfigError;

pub const DEFAULT_RPC_URL: &str = "https://api.devnet.solana.com";
pub const DEFAULT_WS_URL: &str = "wss://api.devnet.solana.com";
pub const DEFAULT_PROGRAM_ID: &str = "EHDmhzaaMFxC49yWZfyzD5QfUc4R8Nhx5GaUWkbf3LCo";

// Live channel timing
pub const WS_RECONNECT_INTERVAL_MS: u64 = 3_000;
pub const WS_RECONNECT_FACTOR: f64 = 1.5;
pub const WS_MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const WS_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

// Write path
pub const TX_POLL_INTERVAL_MS: u64 = 500;
pub const TX_CONFIRM_TIMEOUT_SECS: u64 = 60;

pub const MAX_MARKETS_PER_PAGE: usize = 24;
pub const LEADERBOARD_PAGE_SIZE: usize = 50;

// Caps enforced by the program; checked client-side before building instructions
pub const MAX_TITLE_LEN: usize = 128;
pub const MAX_DESCRIPTION_LEN: usize = 512;
pub const MAX_SIDE_LABEL_LEN: usize = 64;
pub const MAX_ARGUMENT_LEN: usize = 512;
pub const MAX_REASON_LEN: usize = 256;

/// Everything the client needs to talk to one cluster + program deployment.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub rpc_url: String,
    pub ws_url: String,
    pub program_id: Pubkey,
    pub keypair_path: PathBuf,
    pub commitment: CommitmentConfig,
}

impl ClientConfig {
    /// Reads `SPM_*` variables. Call `dotenvy::dotenv().ok()` first if a `.env` should apply.
    pub fn from_env() -> Result<Self, ConfigError> {
        let rpc_url = env::var("SPM_RPC_URL").unwrap_or_else(|_| DEFAULT_RPC_URL.to_string());
        let ws_url = env::var("SPM_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.to_string());

        let program_raw =
            env::var("SPM_PROGRAM_ID").unwrap_or_else(|_| DEFAULT_PROGRAM_ID.to_string());
        let program_id = Pubkey::from_str(&program_raw).map_err(|_| ConfigError::Invalid {
            key: "SPM_PROGRAM_ID",
            value: program_raw.clone(),
        })?;

        let keypair_path = match env::var("SPM_KEYPAIR") {
            Ok(p) => PathBuf::from(p),
            Err(_) => default_keypair_path()?,
        };

        let commitment = match env::var("SPM_COMMITMENT") {
            Ok(raw) => parse_commitment(&raw).ok_or(ConfigError::Invalid {
                key: "SPM_COMMITMENT",
                value: raw,
            })?,
            Err(_) => CommitmentConfig::confirmed(),
        };

        Ok(Self {
            rpc_url,
            ws_url,
            program_id,
            keypair_path,
            commitment,
        })
    }
}

/// `~/.config/solana/id.json`, same place solana-keygen writes to.
pub fn default_keypair_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
    Ok(home.join(".config/solana/id.json"))
}

fn parse_commitment(raw: &str) -> Option<CommitmentConfig> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "processed" => Some(CommitmentConfig::processed()),
        "confirmed" => Some(CommitmentConfig::confirmed()),
        "finalized" => Some(CommitmentConfig::finalized()),
        _ => None,
    }
}

/// Timing knobs for the live-update channel.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub ws_url: String,
    pub reconnect_interval: Duration,
    pub reconnect_factor: f64,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval: Duration,
}

impl ChannelConfig {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            reconnect_interval: Duration::from_millis(WS_RECONNECT_INTERVAL_MS),
            reconnect_factor: WS_RECONNECT_FACTOR,
            max_reconnect_attempts: WS_MAX_RECONNECT_ATTEMPTS,
            heartbeat_interval: Duration::from_millis(WS_HEARTBEAT_INTERVAL_MS),
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based): base * factor^(attempt-1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        self.reconnect_interval
            .mul_f64(self.reconnect_factor.powi(exp))
    }
}

impl From<&ClientConfig> for ChannelConfig {
    fn from(cfg: &ClientConfig) -> Self {
        ChannelConfig::new(cfg.ws_url.clone())
    }
}
