//! Wallet gateway: balances, token accounts, signing and submission
//!
//! Thin wrapper over the nonblocking RPC client. The keypair and RPC
//! session are shared read-mostly across every concurrent task; writes are
//! serialized at the submission layer by the RPC node itself.

use base64::Engine;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_client::rpc_request::TokenAccountsFilter;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use solana_sdk::transaction::{Transaction, VersionedTransaction};
use solana_account_decoder::UiAccountData;
use solana_transaction_status::TransactionConfirmationStatus;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::config::RpcConfig;
use crate::error::{Error, Result};

/// Wallet plus its RPC session
pub struct Wallet {
    keypair: Keypair,
    client: Arc<RpcClient>,
}

impl Wallet {
    /// Load the keypair from `KEYPAIR_PATH` (JSON byte array) and open
    /// an RPC session.
    pub fn load(config: &RpcConfig) -> Result<Self> {
        let path = std::env::var("KEYPAIR_PATH")
            .map_err(|_| Error::MissingEnvVar("KEYPAIR_PATH".to_string()))?;
        let data = std::fs::read_to_string(&path)
            .map_err(|e| Error::InvalidKeypair(format!("{path}: {e}")))?;
        let secret: Vec<u8> = serde_json::from_str(&data)
            .map_err(|e| Error::InvalidKeypair(format!("{path}: {e}")))?;
        let keypair = Keypair::from_bytes(&secret)
            .map_err(|e| Error::InvalidKeypair(e.to_string()))?;

        let client = Arc::new(RpcClient::new_with_timeout(
            config.endpoint.clone(),
            Duration::from_millis(config.timeout_ms),
        ));

        Ok(Self { keypair, client })
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn client(&self) -> Arc<RpcClient> {
        self.client.clone()
    }

    pub async fn lamports(&self) -> Result<u64> {
        Ok(self.client.get_balance(&self.keypair.pubkey()).await?)
    }

    pub async fn current_slot(&self) -> Result<u64> {
        Ok(self.client.get_slot().await?)
    }

    /// Associated token account for (self, mint)
    pub fn token_account(&self, mint: &Pubkey) -> Pubkey {
        spl_associated_token_account::get_associated_token_address(&self.keypair.pubkey(), mint)
    }

    /// Balance of `mint` in base units. `None` means the associated
    /// account does not exist yet.
    pub async fn token_balance(&self, mint: &Pubkey) -> Result<Option<u64>> {
        let ata = self.token_account(mint);
        match self.client.get_token_account_balance(&ata).await {
            Ok(balance) => Ok(Some(balance.amount.parse().unwrap_or(0))),
            // account not created yet
            Err(_) => Ok(None),
        }
    }

    /// Create the associated token account when missing
    pub async fn ensure_token_account(&self, mint: &Pubkey) -> Result<()> {
        if self.token_balance(mint).await?.is_some() {
            return Ok(());
        }

        debug!("creating token account for {mint}");
        let owner = self.keypair.pubkey();
        let ix = spl_associated_token_account::instruction::create_associated_token_account(
            &owner,
            &owner,
            mint,
            &spl_token::id(),
        );
        let blockhash = self.client.get_latest_blockhash().await?;
        let tx =
            Transaction::new_signed_with_payer(&[ix], Some(&owner), &[&self.keypair], blockhash);
        self.client
            .send_transaction_with_config(
                &tx,
                RpcSendTransactionConfig {
                    skip_preflight: true,
                    max_retries: Some(3),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Sign and submit a base64-encoded serialized transaction from the
    /// aggregator. Returns the transaction signature.
    pub async fn send_serialized_tx(&self, tx_b64: &str) -> Result<String> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(tx_b64)
            .map_err(|e| Error::TransactionBuild(format!("base64 decode: {e}")))?;
        let unsigned: VersionedTransaction = bincode::deserialize(&raw)
            .map_err(|e| Error::TransactionBuild(format!("deserialize: {e}")))?;

        let signed = VersionedTransaction::try_new(unsigned.message, &[&self.keypair])
            .map_err(|e| Error::TransactionBuild(format!("sign: {e}")))?;

        let sig = self
            .client
            .send_transaction_with_config(
                &signed,
                RpcSendTransactionConfig {
                    skip_preflight: true,
                    max_retries: Some(3),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::TransactionSend(e.to_string()))?;
        Ok(sig.to_string())
    }

    /// Best-effort confirmation poll. Returns true once the signature
    /// reaches confirmed commitment within the timeout.
    pub async fn confirm(&self, signature: &str, timeout: Duration) -> Result<bool> {
        let sig = Signature::from_str(signature)
            .map_err(|e| Error::Internal(format!("bad signature: {e}")))?;
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Ok(resp) = self.client.get_signature_statuses(&[sig]).await {
                if let Some(Some(status)) = resp.value.first() {
                    if matches!(
                        status.confirmation_status,
                        Some(
                            TransactionConfirmationStatus::Confirmed
                                | TransactionConfirmationStatus::Finalized
                        )
                    ) {
                        return Ok(true);
                    }
                }
            }
            sleep(Duration::from_millis(150)).await;
        }
        Ok(false)
    }

    /// True on-chain age of an account in seconds: walk its signature
    /// history backwards and take the earliest block time found.
    ///
    /// With `threshold_s` set, exits early once the oldest timestamp seen
    /// already exceeds it. Returns `None` when no timestamp was found.
    pub async fn account_age_seconds(
        &self,
        address: &Pubkey,
        threshold_s: Option<f64>,
        page_limit: usize,
        max_pages: usize,
    ) -> Result<Option<f64>> {
        let mut before: Option<Signature> = None;
        let mut earliest: Option<i64> = None;
        let now_ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        for _ in 0..max_pages {
            let page = self
                .client
                .get_signatures_for_address_with_config(
                    address,
                    GetConfirmedSignaturesForAddress2Config {
                        before,
                        until: None,
                        limit: Some(page_limit),
                        commitment: Some(CommitmentConfig::confirmed()),
                    },
                )
                .await
                .unwrap_or_default();

            let Some(oldest) = page.last() else { break };

            let mut block_time = oldest.block_time;
            if block_time.is_none() {
                block_time = self.client.get_block_time(oldest.slot).await.ok();
            }

            if let Some(ts) = block_time {
                earliest = Some(earliest.map_or(ts, |e: i64| e.min(ts)));
                if let Some(threshold) = threshold_s {
                    if (now_ts - ts) as f64 > threshold {
                        return Ok(Some((now_ts - ts) as f64));
                    }
                }
            }

            before = Signature::from_str(&oldest.signature).ok();
            if before.is_none() {
                break;
            }
        }

        Ok(earliest.map(|ts| (now_ts - ts) as f64))
    }

    /// All token accounts owned by this wallet as (account, mint, amount)
    pub async fn token_accounts(&self) -> Result<Vec<(String, String, u64)>> {
        let accounts = self
            .client
            .get_token_accounts_by_owner(
                &self.keypair.pubkey(),
                TokenAccountsFilter::ProgramId(spl_token::id()),
            )
            .await?;

        let mut out = Vec::with_capacity(accounts.len());
        for keyed in accounts {
            let UiAccountData::Json(parsed) = &keyed.account.data else {
                continue;
            };
            let info = &parsed.parsed["info"];
            let Some(mint) = info["mint"].as_str() else {
                continue;
            };
            let amount = info["tokenAmount"]["amount"]
                .as_str()
                .and_then(|a| a.parse().ok())
                .unwrap_or(0);
            out.push((keyed.pubkey.clone(), mint.to_string(), amount));
        }
        Ok(out)
    }

    /// Close the associated account for `mint` if it exists and is empty,
    /// reclaiming its rent. Returns true when a close was submitted.
    pub async fn try_close_token_account(&self, mint: &Pubkey) -> Result<bool> {
        match self.token_balance(mint).await? {
            Some(0) => {}
            _ => return Ok(false),
        }

        let owner = self.keypair.pubkey();
        let ata = self.token_account(mint);
        let ix = spl_token::instruction::close_account(&spl_token::id(), &ata, &owner, &owner, &[])
            .map_err(|e| Error::TransactionBuild(e.to_string()))?;
        let blockhash = self.client.get_latest_blockhash().await?;
        let tx =
            Transaction::new_signed_with_payer(&[ix], Some(&owner), &[&self.keypair], blockhash);

        match self
            .client
            .send_transaction_with_config(
                &tx,
                RpcSendTransactionConfig {
                    max_retries: Some(3),
                    ..Default::default()
                },
            )
            .await
        {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}
