use alloy::primitives::Address;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::EnforcerConfig;
use crate::db::repository::{self, EnforceableTransfer};
use crate::model::to_hex;

sol! {
    #[sol(rpc)]
    contract AddressRestriction {
        function blacklist(address[] calldata accounts) external;
    }
}

const AUTO_DETAILS: &str = "Automatically blacklisted due to suspicious behavior";

/// Submits blacklist transactions through the restriction contract.
/// Shared between the analyzer (immediate high-severity enforcement) and
/// the periodic enforcer; the `blacklisted_addresses` row is the single
/// idempotency key both consult before acting.
pub struct BlacklistClient {
    provider: DynProvider,
    contract_address: Address,
}

impl BlacklistClient {
    pub fn connect(http_url: &str, config: &EnforcerConfig) -> eyre::Result<Self> {
        let signer: PrivateKeySigner = config
            .private_key
            .parse()
            .map_err(|e| eyre::eyre!("Invalid enforcer private key: {}", e))?;

        let provider = ProviderBuilder::new()
            .wallet(signer)
            .connect_http(
                http_url
                    .parse()
                    .map_err(|e| eyre::eyre!("Invalid RPC URL: {}", e))?,
            )
            .erased();

        let contract_address: Address = config
            .restriction_contract
            .parse()
            .map_err(|e| eyre::eyre!("Invalid restriction contract address: {}", e))?;

        Ok(Self {
            provider,
            contract_address,
        })
    }

    fn contract(&self) -> AddressRestriction::AddressRestrictionInstance<DynProvider> {
        AddressRestriction::new(self.contract_address, self.provider.clone())
    }

    /// Blacklist one address right now, waiting for the transaction to
    /// mine. Returns true when the address is enforced on-chain after the
    /// call — including the case where an existing record shows it
    /// already was, in which case nothing is submitted.
    pub async fn blacklist_now(
        &self,
        pool: &PgPool,
        address: &[u8],
        reason: &str,
    ) -> eyre::Result<bool> {
        if repository::is_address_blacklisted(pool, address).await? {
            tracing::debug!(address = %to_hex(address), "Address already blacklisted, skipping");
            return Ok(true);
        }

        let account = parse_address(address)?;
        let pending = self.contract().blacklist(vec![account]).send().await?;
        let tx_hash = *pending.tx_hash();
        tracing::info!(
            address = %to_hex(address),
            tx_hash = %tx_hash,
            "Blacklist transaction sent"
        );

        let receipt = pending.get_receipt().await?;
        if !receipt.status() {
            return Err(eyre::eyre!(
                "blacklist transaction {} reverted",
                tx_hash
            ));
        }

        let block_number = receipt.block_number.unwrap_or_default() as i64;
        let inserted = repository::insert_blacklisted_address(
            pool,
            address,
            tx_hash.as_slice(),
            block_number,
            reason,
            "high",
            AUTO_DETAILS,
        )
        .await?;
        if !inserted {
            // Concurrent enforcement won the insert; benign.
            tracing::debug!(address = %to_hex(address), "Blacklist record already present");
        }

        repository::set_transfers_blacklisted(pool, address).await?;

        tracing::info!(
            address = %to_hex(address),
            block = block_number,
            "Address blacklisted on-chain"
        );
        Ok(true)
    }
}

/// Periodically scans newly flagged high-severity recipients and
/// blacklists them in fixed-size batches.
pub struct BlacklistEnforcer {
    pool: PgPool,
    client: Arc<BlacklistClient>,
    batch_size: usize,
    interval: Duration,
}

impl BlacklistEnforcer {
    pub fn new(pool: PgPool, client: Arc<BlacklistClient>, config: &EnforcerConfig) -> Self {
        Self {
            pool,
            client,
            batch_size: config.batch_size,
            interval: Duration::from_secs(config.interval_secs),
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> eyre::Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.process_tick().await {
                        tracing::error!(error = %e, "Enforcement tick failed");
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        tracing::info!("Blacklist enforcer stopped");
        Ok(())
    }

    /// One scan: collect enforceable recipients, drop the already
    /// enforced, batch the rest. A failed batch stays eligible for the
    /// next tick because its rows keep is_blacklisted = FALSE.
    async fn process_tick(&self) -> eyre::Result<()> {
        let transfers = repository::high_unblacklisted_transfers(&self.pool).await?;
        if transfers.is_empty() {
            return Ok(());
        }

        let mut candidates = Vec::new();
        for address in unique_recipients(&transfers) {
            if repository::is_address_blacklisted(&self.pool, &address).await? {
                // Enforced through another path; settle the transfer flag
                // so the row stops surfacing.
                repository::set_transfers_blacklisted(&self.pool, &address).await?;
                continue;
            }
            candidates.push(address);
        }

        if candidates.is_empty() {
            return Ok(());
        }

        tracing::info!(
            addresses = candidates.len(),
            batch_size = self.batch_size,
            "Enforcing blacklist"
        );

        for batch in candidates.chunks(self.batch_size) {
            if let Err(e) = self.enforce_batch(batch).await {
                tracing::warn!(
                    batch_len = batch.len(),
                    error = %e,
                    "Batch submission failed, will retry next tick"
                );
            }
        }

        Ok(())
    }

    async fn enforce_batch(&self, batch: &[Vec<u8>]) -> eyre::Result<()> {
        let accounts = batch
            .iter()
            .map(|b| parse_address(b))
            .collect::<eyre::Result<Vec<Address>>>()?;

        let pending = self.client.contract().blacklist(accounts).send().await?;
        let tx_hash = *pending.tx_hash();
        tracing::info!(
            tx_hash = %tx_hash,
            addresses = batch.len(),
            "Batch blacklist transaction sent"
        );

        // Record each address as enforced; block number is backfilled
        // once the transaction mines.
        for address in batch {
            let inserted = repository::insert_blacklisted_address(
                &self.pool,
                address,
                tx_hash.as_slice(),
                0,
                "Multiple suspicious transfers",
                "high",
                AUTO_DETAILS,
            )
            .await?;
            if !inserted {
                tracing::debug!(
                    address = %to_hex(address),
                    "Blacklist record already present"
                );
            }
            repository::set_transfers_blacklisted(&self.pool, address).await?;
        }

        let receipt = pending.get_receipt().await?;
        if receipt.status() {
            let block_number = receipt.block_number.unwrap_or_default() as i64;
            repository::backfill_blacklist_block(&self.pool, tx_hash.as_slice(), block_number)
                .await?;
            tracing::info!(tx_hash = %tx_hash, block = block_number, "Batch blacklist mined");
        } else {
            tracing::warn!(tx_hash = %tx_hash, "Batch blacklist transaction reverted");
        }

        Ok(())
    }
}

fn parse_address(bytes: &[u8]) -> eyre::Result<Address> {
    if bytes.len() != 20 {
        return Err(eyre::eyre!("invalid address length {}", bytes.len()));
    }
    Ok(Address::from_slice(bytes))
}

/// Recipient addresses in first-seen order, deduplicated within a tick.
/// The zero address (a finding with no decodable recipient) is never a
/// valid enforcement target.
fn unique_recipients(transfers: &[EnforceableTransfer]) -> Vec<Vec<u8>> {
    let mut seen = HashSet::new();
    transfers
        .iter()
        .filter(|t| t.to_address.iter().any(|b| *b != 0))
        .filter(|t| seen.insert(t.to_address.clone()))
        .map(|t| t.to_address.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(id: i64, addr: u8) -> EnforceableTransfer {
        EnforceableTransfer {
            id,
            to_address: vec![addr; 20],
        }
    }

    #[test]
    fn test_unique_recipients_dedupes_in_order() {
        let transfers = vec![
            transfer(1, 0x01),
            transfer(2, 0x02),
            transfer(3, 0x01),
            transfer(4, 0x03),
        ];
        let unique = unique_recipients(&transfers);
        assert_eq!(unique, vec![vec![0x01; 20], vec![0x02; 20], vec![0x03; 20]]);
    }

    #[test]
    fn test_unique_recipients_drops_zero_address() {
        let transfers = vec![transfer(1, 0x00), transfer(2, 0x05)];
        let unique = unique_recipients(&transfers);
        assert_eq!(unique, vec![vec![0x05; 20]]);
    }

    #[test]
    fn test_batching_splits_on_batch_size() {
        let addrs: Vec<Vec<u8>> = (0u8..25).map(|i| vec![i; 20]).collect();
        let batches: Vec<&[Vec<u8>]> = addrs.chunks(10).collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 10);
        assert_eq!(batches[2].len(), 5);
    }

    #[test]
    fn test_parse_address_rejects_bad_length() {
        assert!(parse_address(&[0u8; 20]).is_ok());
        assert!(parse_address(&[0u8; 19]).is_err());
        assert!(parse_address(&[]).is_err());
    }
}
