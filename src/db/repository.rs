use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::model::TokenTransaction;

// ============================================================
// Confirmed transactions
// ============================================================

/// Insert a confirmed transaction. Idempotent on tx_hash.
pub async fn insert_transaction(pool: &PgPool, tx: &TokenTransaction) -> eyre::Result<()> {
    sqlx::query(
        "INSERT INTO transactions (tx_hash, from_address, to_address, amount, block_number, \
         block_timestamp, is_analyzed, is_pending, status)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         ON CONFLICT (tx_hash) DO NOTHING",
    )
    .bind(&tx.tx_hash)
    .bind(&tx.from_address)
    .bind(&tx.to_address)
    .bind(&tx.amount)
    .bind(tx.block_number)
    .bind(tx.block_timestamp)
    .bind(tx.is_analyzed)
    .bind(tx.is_pending)
    .bind(&tx.status)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn mark_transaction_analyzed(pool: &PgPool, tx_hash: &[u8]) -> eyre::Result<()> {
    sqlx::query("UPDATE transactions SET is_analyzed = TRUE WHERE tx_hash = $1")
        .bind(tx_hash)
        .execute(pool)
        .await?;
    Ok(())
}

/// All confirmed transactions the live path has not analyzed yet
/// (queue drops, crash recovery, rules loaded after queueing).
pub async fn unanalyzed_transactions(pool: &PgPool) -> eyre::Result<Vec<TokenTransaction>> {
    let rows: Vec<(
        Vec<u8>,
        Vec<u8>,
        Vec<u8>,
        BigDecimal,
        i64,
        DateTime<Utc>,
        bool,
        bool,
        String,
    )> = sqlx::query_as(
        "SELECT tx_hash, from_address, to_address, amount, block_number, block_timestamp, \
         is_analyzed, is_pending, status
         FROM transactions WHERE is_analyzed = FALSE ORDER BY block_number",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(
            |(tx_hash, from_address, to_address, amount, block_number, block_timestamp, is_analyzed, is_pending, status)| {
                TokenTransaction {
                    tx_hash,
                    from_address,
                    to_address,
                    amount,
                    block_number,
                    block_timestamp,
                    is_analyzed,
                    is_pending,
                    status,
                }
            },
        )
        .collect())
}

/// A transaction inside a burst-rule window.
#[derive(Debug, Clone)]
pub struct WindowTx {
    pub tx_hash: Vec<u8>,
    pub block_number: i64,
    pub amount: BigDecimal,
}

/// Transactions sent by `from` with block_number >= lower_block,
/// newest first. Window convention: inclusive lower bound.
pub async fn outgoing_in_window(
    pool: &PgPool,
    from: &[u8],
    lower_block: i64,
) -> eyre::Result<Vec<WindowTx>> {
    let rows: Vec<(Vec<u8>, i64, BigDecimal)> = sqlx::query_as(
        "SELECT tx_hash, block_number, amount FROM transactions
         WHERE from_address = $1 AND block_number >= $2
         ORDER BY block_number DESC",
    )
    .bind(from)
    .bind(lower_block)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(tx_hash, block_number, amount)| WindowTx {
            tx_hash,
            block_number,
            amount,
        })
        .collect())
}

/// Transactions received by `to` with block_number >= lower_block,
/// newest first.
pub async fn incoming_in_window(
    pool: &PgPool,
    to: &[u8],
    lower_block: i64,
) -> eyre::Result<Vec<WindowTx>> {
    let rows: Vec<(Vec<u8>, i64, BigDecimal)> = sqlx::query_as(
        "SELECT tx_hash, block_number, amount FROM transactions
         WHERE to_address = $1 AND block_number >= $2
         ORDER BY block_number DESC",
    )
    .bind(to)
    .bind(lower_block)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(tx_hash, block_number, amount)| WindowTx {
            tx_hash,
            block_number,
            amount,
        })
        .collect())
}

pub async fn max_block_number(pool: &PgPool) -> eyre::Result<Option<i64>> {
    let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(block_number) FROM transactions")
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

/// Block-age retention: delete confirmed rows below a cutoff block.
pub async fn prune_transactions_below(pool: &PgPool, below_block: i64) -> eyre::Result<u64> {
    let result = sqlx::query("DELETE FROM transactions WHERE block_number < $1")
        .bind(below_block)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

// ============================================================
// Pending transactions
// ============================================================

/// Record a mempool transaction once. Idempotent on tx_hash.
pub async fn create_pending_if_absent(pool: &PgPool, tx: &TokenTransaction) -> eyre::Result<()> {
    sqlx::query(
        "INSERT INTO pending_transactions (tx_hash, from_address, to_address, amount, \
         block_number, block_timestamp, is_analyzed, status)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (tx_hash) DO NOTHING",
    )
    .bind(&tx.tx_hash)
    .bind(&tx.from_address)
    .bind(&tx.to_address)
    .bind(&tx.amount)
    .bind(tx.block_number)
    .bind(tx.block_timestamp)
    .bind(tx.is_analyzed)
    .bind(&tx.status)
    .execute(pool)
    .await?;

    Ok(())
}

/// Pending→confirmed reconciliation: delete the pending row for a hash and
/// return its is_analyzed flag, in one statement so the carry-forward
/// cannot race a concurrent flag update into a lost delete.
pub async fn take_pending_analyzed(pool: &PgPool, tx_hash: &[u8]) -> eyre::Result<Option<bool>> {
    let row: Option<(bool,)> = sqlx::query_as(
        "DELETE FROM pending_transactions WHERE tx_hash = $1 RETURNING is_analyzed",
    )
    .bind(tx_hash)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(analyzed,)| analyzed))
}

pub async fn mark_pending_analyzed(pool: &PgPool, tx_hash: &[u8]) -> eyre::Result<()> {
    sqlx::query("UPDATE pending_transactions SET is_analyzed = TRUE WHERE tx_hash = $1")
        .bind(tx_hash)
        .execute(pool)
        .await?;
    Ok(())
}

/// Drop rows that never confirmed and are past the staleness cutoff.
pub async fn delete_stale_pending(pool: &PgPool, cutoff: DateTime<Utc>) -> eyre::Result<u64> {
    let result = sqlx::query(
        "DELETE FROM pending_transactions WHERE status = 'pending' AND block_timestamp < $1",
    )
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

// ============================================================
// Allow / deny lists
// ============================================================

pub async fn whitelist_contains(pool: &PgPool, from: &[u8], to: &[u8]) -> eyre::Result<bool> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM whitelist_addresses WHERE address IN ($1, $2)",
    )
    .bind(from)
    .bind(to)
    .fetch_one(pool)
    .await?;
    Ok(row.0 > 0)
}

/// Return the first endpoint address present in the suspicious list.
pub async fn suspicious_address_hit(
    pool: &PgPool,
    from: &[u8],
    to: &[u8],
) -> eyre::Result<Option<Vec<u8>>> {
    let row: Option<(Vec<u8>,)> = sqlx::query_as(
        "SELECT address FROM suspicious_addresses WHERE address IN ($1, $2) LIMIT 1",
    )
    .bind(from)
    .bind(to)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(addr,)| addr))
}

pub async fn upsert_whitelist_address(
    pool: &PgPool,
    address: &[u8],
    label: &str,
) -> eyre::Result<()> {
    sqlx::query(
        "INSERT INTO whitelist_addresses (address, label) VALUES ($1, $2)
         ON CONFLICT (address) DO UPDATE SET label = $2",
    )
    .bind(address)
    .bind(label)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn upsert_suspicious_address(
    pool: &PgPool,
    address: &[u8],
    label: &str,
) -> eyre::Result<()> {
    sqlx::query(
        "INSERT INTO suspicious_addresses (address, label) VALUES ($1, $2)
         ON CONFLICT (address) DO UPDATE SET label = $2",
    )
    .bind(address)
    .bind(label)
    .execute(pool)
    .await?;
    Ok(())
}

// ============================================================
// Rules & violations
// ============================================================

/// A rule row as stored; parameters stay raw JSON until the analyzer
/// decodes them into typed variants at load time.
#[derive(Debug, Clone)]
pub struct RuleRow {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

pub async fn active_rules(pool: &PgPool) -> eyre::Result<Vec<RuleRow>> {
    let rows: Vec<(i32, String, String, serde_json::Value)> = sqlx::query_as(
        "SELECT id, name, description, parameters FROM rules WHERE status = 'active'",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, name, description, parameters)| RuleRow {
            id,
            name,
            description,
            parameters,
        })
        .collect())
}

pub async fn upsert_rule(
    pool: &PgPool,
    name: &str,
    description: &str,
    status: &str,
    severity: &str,
    parameters: &serde_json::Value,
) -> eyre::Result<()> {
    sqlx::query(
        "INSERT INTO rules (name, description, status, severity, parameters)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (name) DO UPDATE
         SET description = $2, status = $3, severity = $4, parameters = $5",
    )
    .bind(name)
    .bind(description)
    .bind(status)
    .bind(severity)
    .bind(parameters)
    .execute(pool)
    .await?;
    Ok(())
}

/// Append a violation and bump the parent rule's counter in one
/// database transaction.
pub async fn record_violation(
    pool: &PgPool,
    rule_id: i32,
    tx_hash: &[u8],
    block_number: i64,
    details: &serde_json::Value,
) -> eyre::Result<()> {
    let mut db_tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO rule_violations (rule_id, tx_hash, block_number, details)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(rule_id)
    .bind(tx_hash)
    .bind(block_number)
    .bind(details)
    .execute(&mut *db_tx)
    .await?;

    sqlx::query(
        "UPDATE rules SET violations = violations + 1, last_violation_at = NOW() WHERE id = $1",
    )
    .bind(rule_id)
    .execute(&mut *db_tx)
    .await?;

    db_tx.commit().await?;
    Ok(())
}

// ============================================================
// Suspicious transfers & blacklist
// ============================================================

/// A suspicious transfer eligible for on-chain enforcement.
#[derive(Debug, Clone)]
pub struct EnforceableTransfer {
    pub id: i64,
    pub to_address: Vec<u8>,
}

pub async fn high_unblacklisted_transfers(pool: &PgPool) -> eyre::Result<Vec<EnforceableTransfer>> {
    let rows: Vec<(i64, Vec<u8>)> = sqlx::query_as(
        "SELECT id, to_address FROM suspicious_transfers
         WHERE severity = 'high' AND is_blacklisted = FALSE
         ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, to_address)| EnforceableTransfer { id, to_address })
        .collect())
}

pub async fn is_address_blacklisted(pool: &PgPool, address: &[u8]) -> eyre::Result<bool> {
    let row: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM blacklisted_addresses WHERE address = $1")
            .bind(address)
            .fetch_one(pool)
            .await?;
    Ok(row.0 > 0)
}

/// Record an enforced address. Returns false when a concurrent writer got
/// there first (benign, the caller just logs and moves on).
pub async fn insert_blacklisted_address(
    pool: &PgPool,
    address: &[u8],
    tx_hash: &[u8],
    block_number: i64,
    reason: &str,
    severity: &str,
    details: &str,
) -> eyre::Result<bool> {
    let result = sqlx::query(
        "INSERT INTO blacklisted_addresses (address, tx_hash, block_number, reason, severity, details)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (address) DO NOTHING",
    )
    .bind(address)
    .bind(tx_hash)
    .bind(block_number)
    .bind(reason)
    .bind(severity)
    .bind(details)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn set_transfers_blacklisted(pool: &PgPool, to_address: &[u8]) -> eyre::Result<()> {
    sqlx::query(
        "UPDATE suspicious_transfers SET is_blacklisted = TRUE WHERE to_address = $1",
    )
    .bind(to_address)
    .execute(pool)
    .await?;
    Ok(())
}

/// Backfill the mined block number onto every row created for one
/// blacklist transaction.
pub async fn backfill_blacklist_block(
    pool: &PgPool,
    tx_hash: &[u8],
    block_number: i64,
) -> eyre::Result<()> {
    sqlx::query("UPDATE blacklisted_addresses SET block_number = $2 WHERE tx_hash = $1")
        .bind(tx_hash)
        .bind(block_number)
        .execute(pool)
        .await?;
    Ok(())
}
