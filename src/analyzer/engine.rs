use bigdecimal::BigDecimal;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::AnalyzerConfig;
use crate::db::repository;
use crate::enforcer::BlacklistClient;
use crate::model::{to_hex, Severity, TokenTransaction};

use super::rules;
use super::types::{join_reasons, merge_details, Finding, LoadedRule, RuleParams};

/// The rule-evaluation engine. Confirmed transactions arrive through a
/// bounded queue; pending transactions are analyzed inline so their
/// verdict exists before the real transaction confirms. A periodic sweep
/// re-covers anything the live paths missed.
pub struct Analyzer {
    pool: PgPool,
    config: AnalyzerConfig,
    rules: RwLock<Vec<LoadedRule>>,
    // Net token flow per address, accumulated from analyzed transfers.
    balances: RwLock<HashMap<Vec<u8>, BigDecimal>>,
    queue_tx: mpsc::Sender<TokenTransaction>,
    queue_rx: Mutex<Option<mpsc::Receiver<TokenTransaction>>>,
    blacklist: Arc<BlacklistClient>,
}

impl Analyzer {
    /// Create the analyzer and load the active rule set from the
    /// database. Rules with undecodable parameters are skipped with a
    /// warning; they are data errors, not fatal ones.
    pub async fn new(
        pool: PgPool,
        config: AnalyzerConfig,
        blacklist: Arc<BlacklistClient>,
    ) -> eyre::Result<Arc<Self>> {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_size);

        let analyzer = Arc::new(Self {
            pool,
            config,
            rules: RwLock::new(Vec::new()),
            balances: RwLock::new(HashMap::new()),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            blacklist,
        });

        analyzer.load_rules().await?;
        Ok(analyzer)
    }

    async fn load_rules(&self) -> eyre::Result<()> {
        let rows = repository::active_rules(&self.pool).await?;
        let mut loaded = Vec::with_capacity(rows.len());

        for row in rows {
            match RuleParams::decode(&row.name, &row.parameters) {
                Ok(params) => {
                    tracing::info!(rule = %row.name, ?params, "Loaded rule");
                    loaded.push(LoadedRule {
                        id: row.id,
                        name: row.name,
                        description: row.description,
                        params,
                    });
                }
                Err(e) => {
                    tracing::warn!(rule = %row.name, error = %e, "Skipping undecodable rule");
                }
            }
        }

        *self.rules.write().await = loaded;
        Ok(())
    }

    /// Hand a transaction to the engine.
    ///
    /// Pending transactions are analyzed synchronously: the caller needs
    /// the verdict before the transaction is mined. Confirmed
    /// transactions go through the bounded queue; on backpressure the
    /// transaction is dropped with a warning and recovered later by the
    /// sweep (freshness over completeness).
    pub async fn queue_transaction(&self, tx: TokenTransaction) {
        if tx.is_pending {
            self.analyze_now(&tx).await;
            return;
        }

        if let Err(mpsc::error::TrySendError::Full(tx)) = self.queue_tx.try_send(tx) {
            tracing::warn!(
                tx_hash = %to_hex(&tx.tx_hash),
                "Analysis queue full, dropping transaction (sweep will recover it)"
            );
        }
    }

    /// Run the queue-consumer loop and the periodic sweep loop until
    /// shutdown. Unconsumed queue items at shutdown are discarded; the
    /// sweep picks them up on the next start.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> eyre::Result<()> {
        let mut queue_rx = self
            .queue_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| eyre::eyre!("analyzer already running"))?;

        let consumer = {
            let analyzer = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        maybe_tx = queue_rx.recv() => {
                            match maybe_tx {
                                Some(tx) => analyzer.analyze_now(&tx).await,
                                None => break,
                            }
                        }
                        _ = shutdown.cancelled() => break,
                    }
                }
                tracing::info!("Analyzer queue consumer stopped");
            })
        };

        let sweeper = {
            let analyzer = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval(Duration::from_secs(analyzer.config.sweep_interval_secs));
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => analyzer.sweep().await,
                        _ = shutdown.cancelled() => break,
                    }
                }
                tracing::info!("Analyzer sweep loop stopped");
            })
        };

        let _ = consumer.await;
        let _ = sweeper.await;
        Ok(())
    }

    /// Evaluate one transaction end to end: rules, persistence of
    /// findings, analyzed-flag bookkeeping, balance cache update.
    /// Never propagates: every failure here is logged and the
    /// transaction is left for the sweep.
    pub async fn analyze_now(&self, tx: &TokenTransaction) {
        let findings = match self.evaluate(tx).await {
            Ok(findings) => findings,
            Err(e) => {
                tracing::error!(
                    tx_hash = %to_hex(&tx.tx_hash),
                    error = %e,
                    "Failed to analyze transaction"
                );
                return;
            }
        };

        if findings.is_empty() {
            if let Err(e) = self.mark_analyzed(tx).await {
                tracing::error!(
                    tx_hash = %to_hex(&tx.tx_hash),
                    error = %e,
                    "Failed to mark transaction analyzed"
                );
            }
        } else if let Err(e) = self.handle_findings(tx, &findings).await {
            tracing::error!(
                tx_hash = %to_hex(&tx.tx_hash),
                error = %e,
                "Failed to record suspicious transfer"
            );
        }

        self.update_state(tx).await;
    }

    /// Run the active rules against a transaction and record a violation
    /// per triggered rule. Whitelisted endpoints short-circuit the whole
    /// evaluation: no rule runs, no violation can be recorded.
    async fn evaluate(&self, tx: &TokenTransaction) -> eyre::Result<Vec<Finding>> {
        if repository::whitelist_contains(&self.pool, &tx.from_address, &tx.to_address).await? {
            tracing::debug!(
                tx_hash = %to_hex(&tx.tx_hash),
                "Whitelisted endpoint, skipping analysis"
            );
            return Ok(Vec::new());
        }

        let mut findings = Vec::new();
        let rules_guard = self.rules.read().await;

        for rule in rules_guard.iter() {
            let finding = match &rule.params {
                RuleParams::LargeTransfer { threshold } => {
                    rules::check_large_transfer(tx, rule, threshold)
                }
                RuleParams::MultipleTransfers {
                    min_transfers,
                    block_range,
                } => {
                    rules::check_multiple_transfers(
                        &self.pool,
                        tx,
                        rule,
                        *min_transfers,
                        *block_range,
                    )
                    .await?
                }
                RuleParams::MultipleIncomingTransfers {
                    threshold,
                    block_range,
                } => {
                    rules::check_multiple_incoming_transfers(
                        &self.pool,
                        tx,
                        rule,
                        threshold,
                        *block_range,
                    )
                    .await?
                }
                RuleParams::SuspiciousAddress => {
                    rules::check_suspicious_address(&self.pool, tx, rule).await?
                }
            };

            if let Some(finding) = finding {
                tracing::warn!(
                    rule = %rule.name,
                    severity = %finding.severity,
                    tx_hash = %to_hex(&tx.tx_hash),
                    "Rule violated"
                );

                if let Err(e) = repository::record_violation(
                    &self.pool,
                    rule.id,
                    &tx.tx_hash,
                    tx.block_number,
                    &finding.details,
                )
                .await
                {
                    tracing::error!(rule = %rule.name, error = %e, "Failed to record violation");
                }

                findings.push(finding);
            }
        }

        Ok(findings)
    }

    /// Aggregate findings into one suspicious-transfer record. High
    /// severity triggers immediate on-chain enforcement of the recipient
    /// before the record is written, so the row reflects the outcome.
    /// The record, its related-transaction links and the analyzed flag
    /// are committed in one database transaction.
    async fn handle_findings(&self, tx: &TokenTransaction, findings: &[Finding]) -> eyre::Result<()> {
        let severity = findings
            .iter()
            .map(|f| f.severity)
            .max()
            .unwrap_or(Severity::Low);
        let reason = join_reasons(findings);
        let details = merge_details(findings);

        let sender_net = self.balances.read().await.get(&tx.from_address).cloned();
        tracing::warn!(
            tx_hash = %to_hex(&tx.tx_hash),
            severity = %severity,
            findings = findings.len(),
            sender_net_flow = %sender_net.unwrap_or_default(),
            reason = %reason,
            "Suspicious behavior detected"
        );

        let mut is_blacklisted = false;
        let enforceable = tx.to_address.iter().any(|b| *b != 0);
        if severity == Severity::High && enforceable {
            match self
                .blacklist
                .blacklist_now(&self.pool, &tx.to_address, &reason)
                .await
            {
                Ok(enforced) => is_blacklisted = enforced,
                Err(e) => {
                    tracing::error!(
                        address = %to_hex(&tx.to_address),
                        error = %e,
                        "Immediate blacklist enforcement failed"
                    );
                }
            }
        }

        // Related transactions across all pattern findings, without the
        // transaction under analysis itself.
        let mut related: Vec<Vec<u8>> = Vec::new();
        let mut seen = HashSet::new();
        for finding in findings {
            for hash in &finding.related_tx_hashes {
                if *hash != tx.tx_hash && seen.insert(hash.clone()) {
                    related.push(hash.clone());
                }
            }
        }

        let mut db_tx = self.pool.begin().await?;

        let inserted: Option<(i64,)> = sqlx::query_as(
            "INSERT INTO suspicious_transfers (from_address, to_address, amount, tx_hash, \
             block_number, block_timestamp, reason, severity, details, is_blacklisted)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (tx_hash) DO NOTHING
             RETURNING id",
        )
        .bind(&tx.from_address)
        .bind(&tx.to_address)
        .bind(&tx.amount)
        .bind(&tx.tx_hash)
        .bind(tx.block_number)
        .bind(tx.block_timestamp)
        .bind(&reason)
        .bind(severity.as_str())
        .bind(&details)
        .bind(is_blacklisted)
        .fetch_optional(&mut *db_tx)
        .await?;

        if let Some((transfer_id,)) = inserted {
            for hash in &related {
                sqlx::query(
                    "INSERT INTO suspicious_transfer_related_txs \
                     (suspicious_transfer_id, tx_hash, relation_type)
                     VALUES ($1, $2, 'related_transfer')",
                )
                .bind(transfer_id)
                .bind(hash)
                .execute(&mut *db_tx)
                .await?;
            }
        }

        if tx.is_pending {
            sqlx::query("UPDATE pending_transactions SET is_analyzed = TRUE WHERE tx_hash = $1")
                .bind(&tx.tx_hash)
                .execute(&mut *db_tx)
                .await?;
        } else {
            sqlx::query("UPDATE transactions SET is_analyzed = TRUE WHERE tx_hash = $1")
                .bind(&tx.tx_hash)
                .execute(&mut *db_tx)
                .await?;
        }

        db_tx.commit().await?;
        Ok(())
    }

    async fn mark_analyzed(&self, tx: &TokenTransaction) -> eyre::Result<()> {
        if tx.is_pending {
            repository::mark_pending_analyzed(&self.pool, &tx.tx_hash).await
        } else {
            repository::mark_transaction_analyzed(&self.pool, &tx.tx_hash).await
        }
    }

    /// Maintain the per-address net-flow cache from an analyzed transfer.
    async fn update_state(&self, tx: &TokenTransaction) {
        let mut balances = self.balances.write().await;

        let sender = balances.entry(tx.from_address.clone()).or_default();
        *sender -= tx.amount.clone();

        let recipient = balances.entry(tx.to_address.clone()).or_default();
        *recipient += tx.amount.clone();
    }

    /// Re-evaluate every confirmed transaction the live path missed,
    /// then apply block-age retention.
    async fn sweep(&self) {
        let missed = match repository::unanalyzed_transactions(&self.pool).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "Sweep query failed");
                return;
            }
        };

        if !missed.is_empty() {
            tracing::info!(count = missed.len(), "Sweeping unanalyzed transactions");
            for tx in &missed {
                self.analyze_now(tx).await;
            }
        }

        match repository::max_block_number(&self.pool).await {
            Ok(Some(max_block)) => {
                let retention = self.config.retention_blocks as i64;
                if max_block > retention {
                    match repository::prune_transactions_below(&self.pool, max_block - retention)
                        .await
                    {
                        Ok(pruned) if pruned > 0 => {
                            tracing::debug!(pruned, below_block = max_block - retention, "Pruned old transactions");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Retention pruning failed"),
                    }
                }
            }
            Ok(None) => {}
            Err(e) => tracing::error!(error = %e, "Failed to read max block number"),
        }
    }
}
