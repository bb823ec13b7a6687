// offchain/spm_client/src/error.rs
use thiserror::Error;

/// Why a raw account buffer did not turn into a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("{kind} account too short: {len} bytes, need at least {min}")]
    TooShort {
        kind: &'static str,
        len: usize,
        min: usize,
    },
    #[error("discriminator does not match {kind}")]
    DiscriminatorMismatch { kind: &'static str },
    #[error("unexpected end of data at offset {offset}: need {needed} bytes, have {len}")]
    UnexpectedEnd {
        offset: usize,
        needed: usize,
        len: usize,
    },
    #[error("invalid utf-8 string at offset {offset}")]
    InvalidUtf8 { offset: usize },
    #[error("invariant violated: {0}")]
    Invariant(&'static str),
}

impl DecodeError {
    /// Mismatches are expected when scanning mixed account kinds; everything else is corruption.
    pub fn is_mismatch(&self) -> bool {
        matches!(
            self,
            DecodeError::TooShort { .. } | DecodeError::DiscriminatorMismatch { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rpc request failed: {0}")]
    Rpc(String),
    #[error("account {0} not found")]
    NotFound(String),
}

impl From<solana_client::client_error::ClientError> for FetchError {
    fn from(e: solana_client::client_error::ClientError) -> Self {
        FetchError::Rpc(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
    #[error("could not resolve home directory")]
    NoHomeDir,
}

/// User-facing outcome categories for a failed write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxFailure {
    #[error("transaction cancelled by wallet")]
    Cancelled,
    #[error("insufficient SOL balance")]
    InsufficientBalance,
    #[error("insufficient SOL for rent")]
    InsufficientRent,
    #[error("program error {code}: {name}")]
    Program { code: u32, name: &'static str },
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("confirmation timed out for {0}")]
    Timeout(String),
    #[error("{0}")]
    Other(String),
}
