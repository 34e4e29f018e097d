use bigdecimal::BigDecimal;
use sqlx::PgPool;

use crate::db::repository::{self, WindowTx};
use crate::model::{to_hex, Severity, TokenTransaction};

use super::types::{Finding, LoadedRule};

/// Check if a transfer amount exceeds the rule's threshold.
pub fn check_large_transfer(
    tx: &TokenTransaction,
    rule: &LoadedRule,
    threshold: &BigDecimal,
) -> Option<Finding> {
    if tx.amount <= *threshold {
        return None;
    }

    Some(Finding {
        rule_id: rule.id,
        kind: rule.name.clone(),
        description: rule.description.clone(),
        severity: Severity::High,
        details: serde_json::json!({
            "from": to_hex(&tx.from_address),
            "to": to_hex(&tx.to_address),
            "amount": tx.amount.to_string(),
            "threshold": threshold.to_string(),
        }),
        related_tx_hashes: vec![],
    })
}

/// Check if the sender has issued too many transfers within the trailing
/// block window ending at this transaction's block.
pub async fn check_multiple_transfers(
    pool: &PgPool,
    tx: &TokenTransaction,
    rule: &LoadedRule,
    min_transfers: u32,
    block_range: u32,
) -> eyre::Result<Option<Finding>> {
    let lower_block = tx.block_number.saturating_sub(block_range as i64);
    let recent = repository::outgoing_in_window(pool, &tx.from_address, lower_block).await?;

    let stats = burst_window(&recent, tx);
    if stats.count < min_transfers as usize {
        return Ok(None);
    }

    let (severity, per_block) = burst_severity(stats.count, stats.span);

    Ok(Some(Finding {
        rule_id: rule.id,
        kind: rule.name.clone(),
        description: rule.description.clone(),
        severity,
        details: serde_json::json!({
            "address": to_hex(&tx.from_address),
            "count": stats.count,
            "block_span": stats.span,
            "transfers_per_block": per_block,
            "oldest_block": stats.oldest_block,
            "newest_block": stats.newest_block,
            "block_range": block_range,
            "min_transfers": min_transfers,
        }),
        related_tx_hashes: recent.into_iter().map(|t| t.tx_hash).collect(),
    }))
}

/// Check if the recipient's incoming total over the trailing block window
/// (this transfer included) exceeds the rule's threshold.
pub async fn check_multiple_incoming_transfers(
    pool: &PgPool,
    tx: &TokenTransaction,
    rule: &LoadedRule,
    threshold: &BigDecimal,
    block_range: u32,
) -> eyre::Result<Option<Finding>> {
    let lower_block = tx.block_number.saturating_sub(block_range as i64);
    let recent = repository::incoming_in_window(pool, &tx.to_address, lower_block).await?;

    let total = incoming_total(&recent, tx);
    if total <= *threshold {
        return Ok(None);
    }

    let stats = burst_window(&recent, tx);

    Ok(Some(Finding {
        rule_id: rule.id,
        kind: rule.name.clone(),
        description: rule.description.clone(),
        severity: Severity::High,
        details: serde_json::json!({
            "address": to_hex(&tx.to_address),
            "total_amount": total.to_string(),
            "tx_count": stats.count,
            "block_span": stats.span,
            "threshold": threshold.to_string(),
            "block_range": block_range,
        }),
        related_tx_hashes: recent.into_iter().map(|t| t.tx_hash).collect(),
    }))
}

/// Check if either endpoint is on the suspicious-address list.
pub async fn check_suspicious_address(
    pool: &PgPool,
    tx: &TokenTransaction,
    rule: &LoadedRule,
) -> eyre::Result<Option<Finding>> {
    let hit = repository::suspicious_address_hit(pool, &tx.from_address, &tx.to_address).await?;

    let Some(matched) = hit else {
        return Ok(None);
    };

    Ok(Some(Finding {
        rule_id: rule.id,
        kind: rule.name.clone(),
        description: rule.description.clone(),
        severity: Severity::High,
        details: serde_json::json!({
            "from": to_hex(&tx.from_address),
            "to": to_hex(&tx.to_address),
            "matched_address": to_hex(&matched),
        }),
        related_tx_hashes: vec![],
    }))
}

/// Aggregate shape of a burst window: stored rows plus the transaction
/// under analysis (counted once even when it is already a stored row).
struct WindowStats {
    count: usize,
    span: i64,
    oldest_block: i64,
    newest_block: i64,
}

fn burst_window(recent: &[WindowTx], tx: &TokenTransaction) -> WindowStats {
    let already_stored = recent.iter().any(|t| t.tx_hash == tx.tx_hash);
    let count = recent.len() + usize::from(!already_stored);

    let mut oldest_block = tx.block_number;
    let mut newest_block = tx.block_number;
    for row in recent {
        oldest_block = oldest_block.min(row.block_number);
        newest_block = newest_block.max(row.block_number);
    }

    WindowStats {
        count,
        span: newest_block - oldest_block,
        oldest_block,
        newest_block,
    }
}

/// Severity escalation for the outgoing-burst rule: high once the
/// per-block rate reaches 2.0. A zero span counts as a one-block window.
fn burst_severity(count: usize, span: i64) -> (Severity, f64) {
    let effective_span = span.max(1);
    let per_block = count as f64 / effective_span as f64;
    let severity = if per_block >= 2.0 {
        Severity::High
    } else {
        Severity::Medium
    };
    (severity, per_block)
}

fn incoming_total(recent: &[WindowTx], tx: &TokenTransaction) -> BigDecimal {
    let mut total = tx.amount.clone();
    for row in recent {
        if row.tx_hash == tx.tx_hash {
            continue;
        }
        total += row.amount.clone();
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn tx(hash: u8, block: i64, amount: i64) -> TokenTransaction {
        TokenTransaction {
            tx_hash: vec![hash; 32],
            from_address: vec![0xA1; 20],
            to_address: vec![0xB2; 20],
            amount: BigDecimal::from(amount),
            block_number: block,
            block_timestamp: Utc::now(),
            is_analyzed: false,
            is_pending: false,
            status: "confirmed".to_string(),
        }
    }

    fn row(hash: u8, block: i64, amount: i64) -> WindowTx {
        WindowTx {
            tx_hash: vec![hash; 32],
            block_number: block,
            amount: BigDecimal::from(amount),
        }
    }

    #[test]
    fn test_burst_severity_escalates_at_two_per_block() {
        // 6 transfers over 3 blocks: exactly 2.0 per block.
        let (severity, rate) = burst_severity(6, 3);
        assert_eq!(severity, Severity::High);
        assert!((rate - 2.0).abs() < f64::EPSILON);

        // 6 transfers over 10 blocks: below the escalation threshold.
        let (severity, _) = burst_severity(6, 10);
        assert_eq!(severity, Severity::Medium);
    }

    #[test]
    fn test_burst_severity_span_zero_counts_as_one_block() {
        // All transfers in the same block: N per block.
        let (severity, rate) = burst_severity(4, 0);
        assert_eq!(severity, Severity::High);
        assert!((rate - 4.0).abs() < f64::EPSILON);

        let (severity, _) = burst_severity(1, 0);
        assert_eq!(severity, Severity::Medium);
    }

    #[test]
    fn test_burst_window_counts_current_tx_once() {
        let current = tx(0x01, 110, 10);

        // Current tx already stored: no double count.
        let stored = vec![row(0x01, 110, 10), row(0x02, 105, 10)];
        let stats = burst_window(&stored, &current);
        assert_eq!(stats.count, 2);
        assert_eq!(stats.span, 5);

        // Current tx not stored yet (pending inline analysis).
        let stored = vec![row(0x02, 105, 10), row(0x03, 100, 10)];
        let stats = burst_window(&stored, &current);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.oldest_block, 100);
        assert_eq!(stats.newest_block, 110);
    }

    #[test]
    fn test_incoming_total_includes_current_once() {
        let current = tx(0x01, 110, 500);

        let stored = vec![row(0x02, 108, 300), row(0x03, 105, 250)];
        assert_eq!(incoming_total(&stored, &current), BigDecimal::from(1050));

        // Current already stored: counted from the tx itself, not twice.
        let stored = vec![row(0x01, 110, 500), row(0x02, 108, 300)];
        assert_eq!(incoming_total(&stored, &current), BigDecimal::from(800));
    }

    #[test]
    fn test_large_transfer_boundary() {
        let rule = LoadedRule {
            id: 1,
            name: "large_transfer".to_string(),
            description: "Large amount transfer detected".to_string(),
            params: super::super::types::RuleParams::LargeTransfer {
                threshold: BigDecimal::from(1000),
            },
        };
        let threshold = BigDecimal::from(1000);

        // Exactly at the threshold: not a violation.
        assert!(check_large_transfer(&tx(0x01, 1, 1000), &rule, &threshold).is_none());

        // Above it: high-severity finding with the amount in the details.
        let finding = check_large_transfer(&tx(0x01, 1, 1500), &rule, &threshold).unwrap();
        assert_eq!(finding.severity, Severity::High);
        assert_eq!(finding.details["amount"], "1500");
        assert_eq!(finding.details["threshold"], "1000");
    }
}
