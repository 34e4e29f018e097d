use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: bool,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub transactions: i64,
    pub pending_transactions: i64,
    pub suspicious_transfers: i64,
    pub blacklisted_addresses: i64,
    pub rule_violations: i64,
    pub active_rules: i64,
}

#[derive(Debug, Deserialize)]
pub struct PaginationParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SuspiciousParams {
    pub severity: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SuspiciousTransferView {
    pub id: i64,
    pub from: String,
    pub to: String,
    pub amount: String,
    pub tx_hash: String,
    pub block_number: i64,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub severity: String,
    pub details: serde_json::Value,
    pub is_blacklisted: bool,
}

#[derive(Debug, Serialize)]
pub struct SuspiciousResponse {
    pub transfers: Vec<SuspiciousTransferView>,
}

#[derive(Debug, Serialize)]
pub struct BlacklistedAddressView {
    pub address: String,
    pub tx_hash: String,
    pub block_number: i64,
    pub reason: String,
    pub severity: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct BlacklistResponse {
    pub addresses: Vec<BlacklistedAddressView>,
}

#[derive(Debug, Serialize)]
pub struct PendingTransactionView {
    pub tx_hash: String,
    pub from: String,
    pub to: String,
    pub amount: String,
    pub block_number: i64,
    pub timestamp: DateTime<Utc>,
    pub is_analyzed: bool,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct PendingResponse {
    pub transactions: Vec<PendingTransactionView>,
}

#[derive(Debug, Serialize)]
pub struct RuleView {
    pub name: String,
    pub description: String,
    pub status: String,
    pub severity: String,
    pub parameters: serde_json::Value,
    pub violations: i64,
    pub last_violation_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct RulesResponse {
    pub rules: Vec<RuleView>,
}

#[derive(Debug, Serialize)]
pub struct RuleViolationView {
    pub tx_hash: String,
    pub block_number: i64,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct RuleViolationsResponse {
    pub rule: String,
    pub violations: Vec<RuleViolationView>,
}
