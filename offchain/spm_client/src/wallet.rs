// offchain/spm_client/src/wallet.rs
//! Signing capability, raw submission, confirmation polling, and failure classification.

use std::{fs, path::Path, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    hash::Hash,
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::{TX_CONFIRM_TIMEOUT_SECS, TX_POLL_INTERVAL_MS};
use crate::error::TxFailure;

// ---------- Wallet ----------

#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// `None` until connected.
    fn pubkey(&self) -> Option<Pubkey>;

    async fn connect(&self) -> Result<Pubkey, TxFailure>;

    /// Returns the transaction with the wallet's signature applied.
    async fn sign_transaction(&self, tx: Transaction) -> Result<Transaction, TxFailure>;
}

/// Local keypair file, as written by `solana-keygen`.
pub struct KeypairWallet {
    keypair: Keypair,
}

impl KeypairWallet {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let bytes: Vec<u8> = serde_json::from_str(&data)?;
        let keypair = Keypair::from_bytes(&bytes)?;
        Ok(Self { keypair })
    }
}

#[async_trait]
impl WalletSigner for KeypairWallet {
    fn pubkey(&self) -> Option<Pubkey> {
        Some(self.keypair.pubkey())
    }

    async fn connect(&self) -> Result<Pubkey, TxFailure> {
        Ok(self.keypair.pubkey())
    }

    async fn sign_transaction(&self, mut tx: Transaction) -> Result<Transaction, TxFailure> {
        let blockhash = tx.message.recent_blockhash;
        tx.try_sign(&[&self.keypair], blockhash)
            .map_err(|e| TxFailure::Other(format!("signing failed: {e}")))?;
        Ok(tx)
    }
}

// ---------- Write endpoint ----------

#[async_trait]
pub trait WriteEndpoint: Send + Sync {
    async fn latest_blockhash(&self) -> Result<Hash, TxFailure>;

    async fn send_transaction(&self, tx: &Transaction) -> Result<Signature, TxFailure>;

    /// `None` while not yet confirmed; `Some(Err(text))` if it landed and failed.
    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<Result<(), String>>, TxFailure>;
}

#[async_trait]
impl WriteEndpoint for RpcClient {
    async fn latest_blockhash(&self) -> Result<Hash, TxFailure> {
        self.get_latest_blockhash()
            .await
            .map_err(|e| classify_failure(&e.to_string()))
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<Signature, TxFailure> {
        RpcClient::send_transaction(self, tx)
            .await
            .map_err(|e| classify_failure(&e.to_string()))
    }

    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<Result<(), String>>, TxFailure> {
        let status = self
            .get_signature_status_with_commitment(signature, self.commitment())
            .await
            .map_err(|e| TxFailure::Other(e.to_string()))?;
        Ok(status.map(|r| r.map_err(|e| e.to_string())))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SubmitOptions {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(TX_POLL_INTERVAL_MS),
            timeout: Duration::from_secs(TX_CONFIRM_TIMEOUT_SECS),
        }
    }
}

/// Build, sign, send, then poll until confirmed or the timeout passes.
/// Every path ends in a signature or a classified failure.
pub async fn submit<E, W>(
    endpoint: &E,
    wallet: &W,
    instructions: &[Instruction],
    opts: SubmitOptions,
) -> Result<Signature, TxFailure>
where
    E: WriteEndpoint + ?Sized,
    W: WalletSigner + ?Sized,
{
    let payer = match wallet.pubkey() {
        Some(pk) => pk,
        None => wallet.connect().await?,
    };

    let blockhash = endpoint.latest_blockhash().await?;
    let mut tx = Transaction::new_with_payer(instructions, Some(&payer));
    tx.message.recent_blockhash = blockhash;

    let signed = wallet.sign_transaction(tx).await?;
    let signature = endpoint.send_transaction(&signed).await.map_err(|e| {
        warn!(%e, "send failed");
        e
    })?;
    info!(%signature, "transaction sent");

    let deadline = Instant::now() + opts.timeout;
    loop {
        match endpoint.signature_status(&signature).await? {
            Some(Ok(())) => {
                info!(%signature, "transaction confirmed");
                return Ok(signature);
            }
            Some(Err(text)) => {
                warn!(%signature, error = %text, "transaction failed on chain");
                return Err(classify_failure(&text));
            }
            None => debug!(%signature, "awaiting confirmation"),
        }
        if Instant::now() >= deadline {
            return Err(TxFailure::Timeout(signature.to_string()));
        }
        sleep(opts.poll_interval).await;
    }
}

// ---------- Failure classification ----------

const PROGRAM_ERRORS: [&str; 24] = [
    "TitleTooLong",
    "DescriptionTooLong",
    "SideLabelTooLong",
    "ArgumentTooLong",
    "ResolutionReasonTooLong",
    "CloseDateTooSoon",
    "MarketNotOpen",
    "MarketNotClosed",
    "MarketNotResolved",
    "MarketAlreadyResolved",
    "MarketNotExpired",
    "BetTooSmall",
    "InvalidSide",
    "NoBetsOnWinningSide",
    "AlreadyClaimed",
    "Unauthorized",
    "InvalidBountyAmount",
    "AlreadyVoted",
    "CannotVoteOwnArgument",
    "Overflow",
    "InsufficientVaultFunds",
    "MarketCancelled",
    "NoBetsToRefund",
    "AlreadyRefunded",
];

const PROGRAM_ERROR_BASE: u32 = 6000;

pub fn program_error_name(code: u32) -> Option<&'static str> {
    code.checked_sub(PROGRAM_ERROR_BASE)
        .and_then(|i| PROGRAM_ERRORS.get(i as usize).copied())
}

/// Pulls the code out of "custom program error: 0x1770" or Anchor's "Error Number: 6000".
fn program_error_code(text: &str) -> Option<u32> {
    if let Some(pos) = text.find("custom program error: 0x") {
        let hex: String = text[pos + "custom program error: 0x".len()..]
            .chars()
            .take_while(char::is_ascii_hexdigit)
            .collect();
        return u32::from_str_radix(&hex, 16).ok();
    }
    if let Some(pos) = text.find("Error Number: ") {
        let dec: String = text[pos + "Error Number: ".len()..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        return dec.parse().ok();
    }
    None
}

/// Maps wallet and RPC error text onto user-facing categories.
pub fn classify_failure(text: &str) -> TxFailure {
    if let Some(code) = program_error_code(text) {
        if let Some(name) = program_error_name(code) {
            return TxFailure::Program { code, name };
        }
    }

    let lower = text.to_ascii_lowercase();
    if lower.contains("user rejected")
        || lower.contains("rejected the request")
        || lower.contains("cancelled")
    {
        return TxFailure::Cancelled;
    }
    if lower.contains("insufficient funds for rent") || lower.contains("insufficientfundsforrent") {
        return TxFailure::InsufficientRent;
    }
    if lower.contains("insufficient lamports")
        || lower.contains("insufficient funds")
        || lower.contains("no record of a prior credit")
    {
        return TxFailure::InsufficientBalance;
    }
    TxFailure::Other(text.to_string())
}
