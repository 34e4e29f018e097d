use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, Log};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::analyzer::Analyzer;
use crate::config::ChainConfig;
use crate::db::repository;
use crate::events::{self, ContractEvent};
use crate::model::{to_hex, TokenTransaction};

/// Watches confirmed on-chain events for the token contract, reconciles
/// them against speculative mempool records and feeds the analyzer.
pub struct ConfirmedMonitor {
    pool: PgPool,
    analyzer: Arc<Analyzer>,
    config: ChainConfig,
    contract: Address,
}

impl ConfirmedMonitor {
    pub fn new(pool: PgPool, analyzer: Arc<Analyzer>, config: ChainConfig) -> eyre::Result<Self> {
        let contract: Address = config
            .contract_address
            .parse()
            .map_err(|e| eyre::eyre!("Invalid contract address: {}", e))?;

        Ok(Self {
            pool,
            analyzer,
            config,
            contract,
        })
    }

    /// Run the dispatch loop until shutdown. A dropped subscription is
    /// rebuilt with exponential backoff (capped, unbounded attempts —
    /// this is a long-lived daemon); every failure is logged so a
    /// persistently broken upstream is visible.
    pub async fn run(&self, shutdown: CancellationToken) -> eyre::Result<()> {
        let base = Duration::from_millis(self.config.reconnect_base_ms);
        let max = Duration::from_millis(self.config.reconnect_max_ms);
        let mut backoff = base;

        'outer: loop {
            if shutdown.is_cancelled() {
                break;
            }

            let (_provider, mut stream) = match self.subscribe().await {
                Ok(sub) => {
                    backoff = base;
                    sub
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = backoff.as_millis() as u64,
                        "Log subscription failed, reconnecting"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.cancelled() => break,
                    }
                    backoff = std::cmp::min(backoff * 2, max);
                    continue;
                }
            };

            tracing::info!(contract = %self.contract, "Event subscription active");

            loop {
                tokio::select! {
                    maybe_log = stream.next() => {
                        match maybe_log {
                            Some(log) => self.process_log(&log).await,
                            None => {
                                tracing::warn!("Event stream closed, reconnecting");
                                tokio::select! {
                                    _ = tokio::time::sleep(backoff) => {}
                                    _ = shutdown.cancelled() => break 'outer,
                                }
                                continue 'outer;
                            }
                        }
                    }
                    _ = shutdown.cancelled() => break 'outer,
                }
            }
        }

        tracing::info!("Confirmed-event monitor stopped");
        Ok(())
    }

    async fn subscribe(&self) -> eyre::Result<(DynProvider, BoxStream<'static, Log>)> {
        let ws = WsConnect::new(&self.config.ws_url);
        let provider = ProviderBuilder::new().connect_ws(ws).await?.erased();

        let filter = Filter::new().address(self.contract);
        let subscription = provider.subscribe_logs(&filter).await?;

        Ok((provider, subscription.into_stream().boxed()))
    }

    /// Decode one log, reconcile any speculative record, persist the
    /// confirmed transaction and queue it for analysis. Data errors skip
    /// the single log; they are never fatal to the loop.
    async fn process_log(&self, log: &Log) {
        let topics = log.inner.data.topics();
        let Some(topic0) = topics.first() else {
            return;
        };

        // Unknown signatures are dropped silently; excluded names by
        // operator choice.
        let Some(name) = events::event_name(topic0) else {
            return;
        };
        if self.config.excluded_events.iter().any(|e| e == name) {
            return;
        }

        let Some(event) = events::decode_log(log) else {
            tracing::warn!(event = name, "Malformed event payload, skipping");
            return;
        };

        let (from, to, value) = match event {
            ContractEvent::Transfer { from, to, value } => (from, to, value),
            ContractEvent::Blacklisted { account }
            | ContractEvent::RemovedFromBlacklist { account } => {
                (account, Address::ZERO, U256::ZERO)
            }
            // Recorded for the audit trail but carries no transfer
            // semantics the rules should see.
            ContractEvent::Approval { .. } => (Address::ZERO, Address::ZERO, U256::ZERO),
        };

        let tx_hash = log.transaction_hash.unwrap_or_default();
        let block_number = log.block_number.unwrap_or_default() as i64;
        let block_timestamp = log
            .block_timestamp
            .and_then(|ts| DateTime::from_timestamp(ts as i64, 0))
            .unwrap_or_else(Utc::now);

        let amount = match BigDecimal::from_str(&value.to_string()) {
            Ok(amount) => amount,
            Err(e) => {
                tracing::warn!(event = name, error = %e, "Undecodable amount, skipping");
                return;
            }
        };

        // Reconciliation: carry the speculative record's analysis flag
        // forward and retire the pending row in the same statement.
        let was_analyzed =
            match repository::take_pending_analyzed(&self.pool, tx_hash.as_slice()).await {
                Ok(prior) => prior.unwrap_or(false),
                Err(e) => {
                    tracing::error!(
                        tx_hash = %tx_hash,
                        error = %e,
                        "Pending reconciliation failed, skipping event"
                    );
                    return;
                }
            };

        let tx = TokenTransaction {
            tx_hash: tx_hash.as_slice().to_vec(),
            from_address: from.as_slice().to_vec(),
            to_address: to.as_slice().to_vec(),
            amount,
            block_number,
            block_timestamp,
            is_analyzed: was_analyzed,
            is_pending: false,
            status: "confirmed".to_string(),
        };

        if let Err(e) = repository::insert_transaction(&self.pool, &tx).await {
            tracing::error!(tx_hash = %to_hex(&tx.tx_hash), error = %e, "Failed to save transaction");
            return;
        }

        tracing::debug!(
            event = name,
            tx_hash = %to_hex(&tx.tx_hash),
            block = block_number,
            already_analyzed = was_analyzed,
            "Confirmed event recorded"
        );

        if !was_analyzed {
            self.analyzer.queue_transaction(tx).await;
        }
    }
}
