use alloy::consensus::Transaction as TransactionTrait;
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};
use bigdecimal::BigDecimal;
use chrono::Utc;
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::analyzer::Analyzer;
use crate::config::{ChainConfig, MempoolConfig, SandboxConfig};
use crate::db::repository;
use crate::model::TokenTransaction;

use super::simulate;

// transfer(address,uint256)
const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// Watches the mempool for transactions addressed to the token contract,
/// pre-executes each one in a disposable fork and queues the early risk
/// signal for inline analysis before the transaction is mined.
pub struct MempoolMonitor {
    pool: PgPool,
    analyzer: Arc<Analyzer>,
    chain: ChainConfig,
    mempool: MempoolConfig,
    sandbox: SandboxConfig,
    contract: Address,
    simulations: Arc<Semaphore>,
}

impl MempoolMonitor {
    pub fn new(
        pool: PgPool,
        analyzer: Arc<Analyzer>,
        chain: ChainConfig,
        mempool: MempoolConfig,
        sandbox: SandboxConfig,
    ) -> eyre::Result<Arc<Self>> {
        let contract: Address = chain
            .contract_address
            .parse()
            .map_err(|e| eyre::eyre!("Invalid contract address: {}", e))?;

        let simulations = Arc::new(Semaphore::new(mempool.max_concurrent_simulations.max(1)));

        Ok(Arc::new(Self {
            pool,
            analyzer,
            chain,
            mempool,
            sandbox,
            contract,
            simulations,
        }))
    }

    /// Run the pending-hash subscription and the stale-row sweep until
    /// shutdown, rebuilding the subscription with backoff when it drops.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> eyre::Result<()> {
        let base = Duration::from_millis(self.chain.reconnect_base_ms);
        let max = Duration::from_millis(self.chain.reconnect_max_ms);
        let mut backoff = base;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.subscribe_and_dispatch(&shutdown).await {
                Ok(()) => break,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = backoff.as_millis() as u64,
                        "Mempool subscription lost, reconnecting"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.cancelled() => break,
                    }
                    backoff = std::cmp::min(backoff * 2, max);
                }
            }
        }

        tracing::info!("Mempool monitor stopped");
        Ok(())
    }

    async fn subscribe_and_dispatch(
        self: &Arc<Self>,
        shutdown: &CancellationToken,
    ) -> eyre::Result<()> {
        let ws = WsConnect::new(&self.chain.ws_url);
        let provider = ProviderBuilder::new().connect_ws(ws).await?.erased();

        let subscription = provider.subscribe_pending_transactions().await?;
        let mut stream = subscription.into_stream();

        tracing::info!(contract = %self.contract, "Mempool subscription active");

        let mut cleanup = tokio::time::interval(Duration::from_secs(
            self.mempool.cleanup_interval_secs,
        ));
        cleanup.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe_hash = futures::StreamExt::next(&mut stream) => {
                    match maybe_hash {
                        Some(tx_hash) => {
                            let monitor = self.clone();
                            let provider = provider.clone();
                            tokio::spawn(async move {
                                monitor.process_pending(provider, tx_hash).await;
                            });
                        }
                        None => return Err(eyre::eyre!("pending-transaction stream ended")),
                    }
                }
                _ = cleanup.tick() => {
                    self.cleanup_stale().await;
                }
                _ = shutdown.cancelled() => return Ok(()),
            }
        }
    }

    /// Handle one pending hash: filter, recover the sender, speculatively
    /// execute, persist the record and queue it for inline analysis.
    /// Every failure is scoped to this hash.
    async fn process_pending(self: Arc<Self>, provider: DynProvider, tx_hash: B256) {
        let tx = match provider.get_transaction_by_hash(tx_hash).await {
            Ok(Some(tx)) => tx,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(tx_hash = %tx_hash, error = %e, "Failed to fetch pending transaction");
                return;
            }
        };

        // Already mined, or not addressed to the monitored contract.
        if tx.block_number.is_some() {
            return;
        }
        let Some(to) = tx.to() else {
            return;
        };
        if to != self.contract {
            return;
        }

        // Signature-based sender recovery, both envelope families.
        let sender = tx.inner.signer();

        // Best-known confirmed block, used only as a watermark.
        let current_block = match provider.get_block_number().await {
            Ok(block) => block,
            Err(e) => {
                tracing::debug!(tx_hash = %tx_hash, error = %e, "Failed to fetch block number");
                return;
            }
        };

        let (intent_to, intent_value) =
            decode_transfer_calldata(tx.input()).unwrap_or((Address::ZERO, U256::ZERO));

        let raw_tx = tx.inner.inner().encoded_2718();

        // One sandbox at a time: it binds a fixed local port.
        let _permit = match self.simulations.acquire().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let outcome = simulate::simulate_pending_transaction(
            &self.sandbox,
            &raw_tx,
            sender,
            to,
            tx.value(),
        )
        .await;

        match &outcome.error {
            Some(error) => {
                tracing::warn!(tx_hash = %tx_hash, error = %error, "Simulation failed");
            }
            None => {
                let status = outcome.status.map(|s| s.as_str()).unwrap_or("");
                tracing::info!(
                    tx_hash = %tx_hash,
                    status,
                    events = outcome.events.len(),
                    "Simulation complete"
                );
                for event in &outcome.events {
                    tracing::debug!(
                        event = event.name,
                        from = %event.from,
                        to = %event.to,
                        value = %event.value,
                        "Simulated event"
                    );
                }
            }
        }

        let amount = BigDecimal::from_str(&intent_value.to_string()).unwrap_or_default();
        let record = TokenTransaction {
            tx_hash: tx_hash.as_slice().to_vec(),
            from_address: sender.as_slice().to_vec(),
            to_address: intent_to.as_slice().to_vec(),
            amount,
            block_number: current_block as i64,
            block_timestamp: Utc::now(),
            is_analyzed: false,
            is_pending: true,
            status: outcome
                .status
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
        };

        if let Err(e) = repository::create_pending_if_absent(&self.pool, &record).await {
            tracing::error!(tx_hash = %tx_hash, error = %e, "Failed to save pending transaction");
            return;
        }

        // Inline scoring: the verdict must exist before the real
        // transaction confirms.
        self.analyzer.queue_transaction(record).await;
    }

    async fn cleanup_stale(&self) {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.mempool.stale_after_secs as i64);
        match repository::delete_stale_pending(&self.pool, cutoff).await {
            Ok(deleted) if deleted > 0 => {
                tracing::info!(deleted, "Removed stale pending transactions");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Stale pending cleanup failed"),
        }
    }
}

/// Decode the recipient and amount from `transfer(address,uint256)`
/// calldata. Returns `None` for any other method.
fn decode_transfer_calldata(input: &[u8]) -> Option<(Address, U256)> {
    if input.len() < 68 || input[..4] != TRANSFER_SELECTOR {
        return None;
    }
    let to = Address::from_slice(&input[16..36]);
    let value = U256::from_be_slice(&input[36..68]);
    Some((to, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_transfer_calldata() {
        let to = Address::repeat_byte(0x0C);
        let value = U256::from(500u64);

        let mut input = TRANSFER_SELECTOR.to_vec();
        input.extend_from_slice(&[0u8; 12]);
        input.extend_from_slice(to.as_slice());
        input.extend_from_slice(&value.to_be_bytes::<32>());

        assert_eq!(decode_transfer_calldata(&input), Some((to, value)));
    }

    #[test]
    fn test_decode_rejects_other_selectors_and_short_input() {
        // approve(address,uint256)
        let mut input = vec![0x09, 0x5e, 0xa7, 0xb3];
        input.extend_from_slice(&[0u8; 64]);
        assert!(decode_transfer_calldata(&input).is_none());

        // Right selector, truncated arguments.
        let input = TRANSFER_SELECTOR.to_vec();
        assert!(decode_transfer_calldata(&input).is_none());

        assert!(decode_transfer_calldata(&[]).is_none());
    }
}
