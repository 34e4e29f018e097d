use bigdecimal::BigDecimal;
use serde_json::Value as JsonValue;
use std::str::FromStr;

use crate::model::Severity;

/// Typed parameters for the rules the engine knows how to evaluate.
/// Decoded once when the rule set is loaded; the raw JSON map only
/// exists at the persistence boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleParams {
    LargeTransfer {
        threshold: BigDecimal,
    },
    MultipleTransfers {
        min_transfers: u32,
        block_range: u32,
    },
    MultipleIncomingTransfers {
        threshold: BigDecimal,
        block_range: u32,
    },
    SuspiciousAddress,
}

impl RuleParams {
    /// Decode a rule's stored parameter payload by rule name.
    /// Unknown rule names and undecodable payloads are data errors: the
    /// caller logs and skips the rule rather than failing the load.
    pub fn decode(rule_name: &str, params: &JsonValue) -> eyre::Result<Self> {
        match rule_name {
            "large_transfer" => Ok(Self::LargeTransfer {
                threshold: decimal_param(params, "threshold")?,
            }),
            "multiple_transfers" => Ok(Self::MultipleTransfers {
                min_transfers: int_param(params, "min_transfers")?,
                block_range: int_param(params, "block_range")?,
            }),
            "multiple_incoming_transfers" => Ok(Self::MultipleIncomingTransfers {
                threshold: decimal_param(params, "threshold")?,
                block_range: int_param(params, "block_range")?,
            }),
            "suspicious_address" => Ok(Self::SuspiciousAddress),
            other => Err(eyre::eyre!("unknown rule name '{}'", other)),
        }
    }
}

fn decimal_param(params: &JsonValue, key: &str) -> eyre::Result<BigDecimal> {
    let value = params
        .get(key)
        .ok_or_else(|| eyre::eyre!("missing parameter '{}'", key))?;

    let parsed = match value {
        JsonValue::String(s) => BigDecimal::from_str(s).ok(),
        JsonValue::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        _ => None,
    };

    parsed.ok_or_else(|| eyre::eyre!("parameter '{}' is not a decimal: {}", key, value))
}

fn int_param(params: &JsonValue, key: &str) -> eyre::Result<u32> {
    let value = params
        .get(key)
        .ok_or_else(|| eyre::eyre!("missing parameter '{}'", key))?;

    let parsed = match value {
        JsonValue::String(s) => s.parse::<u32>().ok(),
        JsonValue::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        _ => None,
    };

    parsed.ok_or_else(|| eyre::eyre!("parameter '{}' is not an integer: {}", key, value))
}

/// An active rule with its parameters already decoded. Finding
/// severities are fixed per rule kind (or escalated by the burst rate),
/// so the stored severity column stays a reporting concern.
#[derive(Debug, Clone)]
pub struct LoadedRule {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub params: RuleParams,
}

/// One rule's verdict on one transaction.
#[derive(Debug, Clone)]
pub struct Finding {
    pub rule_id: i32,
    pub kind: String,
    pub description: String,
    pub severity: Severity,
    pub details: JsonValue,
    /// Sibling transactions that constituted the pattern, for
    /// pattern-based rules.
    pub related_tx_hashes: Vec<Vec<u8>>,
}

/// Join finding descriptions into the human-readable reason column.
pub fn join_reasons(findings: &[Finding]) -> String {
    findings
        .iter()
        .map(|f| f.description.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Merge per-rule detail payloads into one object keyed by rule kind.
pub fn merge_details(findings: &[Finding]) -> JsonValue {
    let mut merged = serde_json::Map::new();
    for finding in findings {
        merged.insert(finding.kind.clone(), finding.details.clone());
    }
    JsonValue::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_large_transfer() {
        let params = RuleParams::decode("large_transfer", &json!({"threshold": "1000"})).unwrap();
        assert_eq!(
            params,
            RuleParams::LargeTransfer {
                threshold: BigDecimal::from(1000)
            }
        );

        // Numeric payloads decode too.
        let params = RuleParams::decode("large_transfer", &json!({"threshold": 1000})).unwrap();
        assert_eq!(
            params,
            RuleParams::LargeTransfer {
                threshold: BigDecimal::from(1000)
            }
        );
    }

    #[test]
    fn test_decode_multiple_transfers() {
        let params = RuleParams::decode(
            "multiple_transfers",
            &json!({"min_transfers": 6, "block_range": "10"}),
        )
        .unwrap();
        assert_eq!(
            params,
            RuleParams::MultipleTransfers {
                min_transfers: 6,
                block_range: 10
            }
        );
    }

    #[test]
    fn test_decode_rejects_missing_and_malformed() {
        assert!(RuleParams::decode("large_transfer", &json!({})).is_err());
        assert!(
            RuleParams::decode("multiple_transfers", &json!({"min_transfers": "six"})).is_err()
        );
        assert!(RuleParams::decode("no_such_rule", &json!({})).is_err());
    }

    #[test]
    fn test_join_reasons() {
        let finding = |desc: &str| Finding {
            rule_id: 1,
            kind: "k".into(),
            description: desc.into(),
            severity: Severity::High,
            details: json!({}),
            related_tx_hashes: vec![],
        };

        assert_eq!(join_reasons(&[finding("a")]), "a");
        assert_eq!(join_reasons(&[finding("a"), finding("b")]), "a; b");
    }

    #[test]
    fn test_merge_details_keyed_by_kind() {
        let findings = vec![
            Finding {
                rule_id: 1,
                kind: "large_transfer".into(),
                description: "d1".into(),
                severity: Severity::High,
                details: json!({"amount": "1500"}),
                related_tx_hashes: vec![],
            },
            Finding {
                rule_id: 2,
                kind: "suspicious_address".into(),
                description: "d2".into(),
                severity: Severity::High,
                details: json!({"address": "0xabc"}),
                related_tx_hashes: vec![],
            },
        ];

        let merged = merge_details(&findings);
        assert_eq!(merged["large_transfer"]["amount"], "1500");
        assert_eq!(merged["suspicious_address"]["address"], "0xabc");
    }
}
