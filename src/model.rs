use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};

/// A decoded token transaction, confirmed or still in the mempool.
/// The same shape backs both the `transactions` and `pending_transactions`
/// tables; `is_pending` says which one a given value belongs to.
#[derive(Debug, Clone)]
pub struct TokenTransaction {
    pub tx_hash: Vec<u8>,
    pub from_address: Vec<u8>,
    pub to_address: Vec<u8>,
    pub amount: BigDecimal,
    pub block_number: i64,
    pub block_timestamp: DateTime<Utc>,
    pub is_analyzed: bool,
    pub is_pending: bool,
    pub status: String,
}

/// Severity of a detected behavior. Ordered so that "worst across
/// findings" is a plain max-reduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render raw address/hash bytes as 0x-prefixed hex for logs, detail
/// payloads and API responses.
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);

        let worst = [Severity::Medium, Severity::High, Severity::Low]
            .into_iter()
            .max()
            .unwrap();
        assert_eq!(worst, Severity::High);
    }

    #[test]
    fn test_severity_round_trip() {
        for s in [Severity::Low, Severity::Medium, Severity::High] {
            assert_eq!(Severity::parse(s.as_str()), Some(s));
        }
        assert_eq!(Severity::parse("critical"), None);
    }
}
