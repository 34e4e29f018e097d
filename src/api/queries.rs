use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::model::to_hex;

use super::types::*;

pub async fn get_health(pool: &PgPool) -> eyre::Result<HealthResponse> {
    let database = sqlx::query("SELECT 1").execute(pool).await.is_ok();
    Ok(HealthResponse {
        status: "ok",
        database,
    })
}

pub async fn get_stats(pool: &PgPool) -> eyre::Result<StatsResponse> {
    let (transactions,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions")
        .fetch_one(pool)
        .await?;
    let (pending_transactions,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM pending_transactions")
            .fetch_one(pool)
            .await?;
    let (suspicious_transfers,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM suspicious_transfers")
            .fetch_one(pool)
            .await?;
    let (blacklisted_addresses,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM blacklisted_addresses")
            .fetch_one(pool)
            .await?;
    let (rule_violations,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM rule_violations")
        .fetch_one(pool)
        .await?;
    let (active_rules,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM rules WHERE status = 'active'")
            .fetch_one(pool)
            .await?;

    Ok(StatsResponse {
        transactions,
        pending_transactions,
        suspicious_transfers,
        blacklisted_addresses,
        rule_violations,
        active_rules,
    })
}

pub async fn get_suspicious(
    pool: &PgPool,
    severity: Option<&str>,
    limit: i64,
    offset: i64,
) -> eyre::Result<SuspiciousResponse> {
    type Row = (
        i64,
        Vec<u8>,
        Vec<u8>,
        BigDecimal,
        Vec<u8>,
        i64,
        DateTime<Utc>,
        String,
        String,
        serde_json::Value,
        bool,
    );

    let rows: Vec<Row> = match severity {
        Some(severity) => {
            sqlx::query_as(
                "SELECT id, from_address, to_address, amount, tx_hash, block_number, \
                 block_timestamp, reason, severity, details, is_blacklisted
                 FROM suspicious_transfers WHERE severity = $1
                 ORDER BY id DESC LIMIT $2 OFFSET $3",
            )
            .bind(severity)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as(
                "SELECT id, from_address, to_address, amount, tx_hash, block_number, \
                 block_timestamp, reason, severity, details, is_blacklisted
                 FROM suspicious_transfers
                 ORDER BY id DESC LIMIT $1 OFFSET $2",
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
    };

    let transfers = rows
        .into_iter()
        .map(
            |(id, from, to, amount, tx_hash, block_number, timestamp, reason, severity, details, is_blacklisted)| {
                SuspiciousTransferView {
                    id,
                    from: to_hex(&from),
                    to: to_hex(&to),
                    amount: amount.to_string(),
                    tx_hash: to_hex(&tx_hash),
                    block_number,
                    timestamp,
                    reason,
                    severity,
                    details,
                    is_blacklisted,
                }
            },
        )
        .collect();

    Ok(SuspiciousResponse { transfers })
}

pub async fn get_blacklist(
    pool: &PgPool,
    limit: i64,
    offset: i64,
) -> eyre::Result<BlacklistResponse> {
    let rows: Vec<(Vec<u8>, Vec<u8>, i64, String, String, DateTime<Utc>)> = sqlx::query_as(
        "SELECT address, tx_hash, block_number, reason, severity, created_at
         FROM blacklisted_addresses ORDER BY id DESC LIMIT $1 OFFSET $2",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let addresses = rows
        .into_iter()
        .map(
            |(address, tx_hash, block_number, reason, severity, created_at)| {
                BlacklistedAddressView {
                    address: to_hex(&address),
                    tx_hash: to_hex(&tx_hash),
                    block_number,
                    reason,
                    severity,
                    created_at,
                }
            },
        )
        .collect();

    Ok(BlacklistResponse { addresses })
}

pub async fn get_pending(
    pool: &PgPool,
    limit: i64,
    offset: i64,
) -> eyre::Result<PendingResponse> {
    type Row = (
        Vec<u8>,
        Vec<u8>,
        Vec<u8>,
        BigDecimal,
        i64,
        DateTime<Utc>,
        bool,
        String,
    );

    let rows: Vec<Row> = sqlx::query_as(
        "SELECT tx_hash, from_address, to_address, amount, block_number, block_timestamp, \
         is_analyzed, status
         FROM pending_transactions ORDER BY id DESC LIMIT $1 OFFSET $2",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let transactions = rows
        .into_iter()
        .map(
            |(tx_hash, from, to, amount, block_number, timestamp, is_analyzed, status)| {
                PendingTransactionView {
                    tx_hash: to_hex(&tx_hash),
                    from: to_hex(&from),
                    to: to_hex(&to),
                    amount: amount.to_string(),
                    block_number,
                    timestamp,
                    is_analyzed,
                    status,
                }
            },
        )
        .collect();

    Ok(PendingResponse { transactions })
}

pub async fn get_rules(pool: &PgPool) -> eyre::Result<RulesResponse> {
    type Row = (
        String,
        String,
        String,
        String,
        serde_json::Value,
        i64,
        Option<DateTime<Utc>>,
    );

    let rows: Vec<Row> = sqlx::query_as(
        "SELECT name, description, status, severity, parameters, violations, last_violation_at
         FROM rules ORDER BY name",
    )
    .fetch_all(pool)
    .await?;

    let rules = rows
        .into_iter()
        .map(
            |(name, description, status, severity, parameters, violations, last_violation_at)| {
                RuleView {
                    name,
                    description,
                    status,
                    severity,
                    parameters,
                    violations,
                    last_violation_at,
                }
            },
        )
        .collect();

    Ok(RulesResponse { rules })
}

pub async fn get_rule_violations(
    pool: &PgPool,
    rule_name: &str,
    limit: i64,
    offset: i64,
) -> eyre::Result<Option<RuleViolationsResponse>> {
    let rule: Option<(i32,)> = sqlx::query_as("SELECT id FROM rules WHERE name = $1")
        .bind(rule_name)
        .fetch_optional(pool)
        .await?;

    let Some((rule_id,)) = rule else {
        return Ok(None);
    };

    let rows: Vec<(Vec<u8>, i64, serde_json::Value, DateTime<Utc>)> = sqlx::query_as(
        "SELECT tx_hash, block_number, details, created_at
         FROM rule_violations WHERE rule_id = $1
         ORDER BY id DESC LIMIT $2 OFFSET $3",
    )
    .bind(rule_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let violations = rows
        .into_iter()
        .map(|(tx_hash, block_number, details, created_at)| RuleViolationView {
            tx_hash: to_hex(&tx_hash),
            block_number,
            details,
            created_at,
        })
        .collect();

    Ok(Some(RuleViolationsResponse {
        rule: rule_name.to_string(),
        violations,
    }))
}
