use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;

// The monitored token contract's event surface. Declared with sol! so
// each event carries its SIGNATURE_HASH for topic0 matching.
sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);
    event Approval(address indexed owner, address indexed spender, uint256 value);
    event Blacklisted(address indexed account);
    event RemovedFromBlacklist(address indexed account);
}

/// A decoded event from the monitored contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractEvent {
    Transfer {
        from: Address,
        to: Address,
        value: U256,
    },
    Approval {
        owner: Address,
        spender: Address,
        value: U256,
    },
    Blacklisted {
        account: Address,
    },
    RemovedFromBlacklist {
        account: Address,
    },
}

impl ContractEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Transfer { .. } => "Transfer",
            Self::Approval { .. } => "Approval",
            Self::Blacklisted { .. } => "Blacklisted",
            Self::RemovedFromBlacklist { .. } => "RemovedFromBlacklist",
        }
    }
}

/// Resolve an event name from its signature topic. Returns `None` for
/// topics the contract schema doesn't declare.
pub fn event_name(topic0: &B256) -> Option<&'static str> {
    if *topic0 == Transfer::SIGNATURE_HASH {
        Some("Transfer")
    } else if *topic0 == Approval::SIGNATURE_HASH {
        Some("Approval")
    } else if *topic0 == Blacklisted::SIGNATURE_HASH {
        Some("Blacklisted")
    } else if *topic0 == RemovedFromBlacklist::SIGNATURE_HASH {
        Some("RemovedFromBlacklist")
    } else {
        None
    }
}

/// Attempt to decode a log into a known contract event.
///
/// Returns `None` if:
/// - topic0 is missing or not a declared event signature
/// - the topic count doesn't match the event's indexed parameters
/// - the data payload is too short (malformed log)
pub fn decode_log(log: &Log) -> Option<ContractEvent> {
    let topics = log.inner.data.topics();
    let topic0 = topics.first()?;
    let data = log.inner.data.data.as_ref();

    if *topic0 == Transfer::SIGNATURE_HASH {
        if topics.len() != 3 || data.len() < 32 {
            return None;
        }
        Some(ContractEvent::Transfer {
            from: Address::from_word(topics[1]),
            to: Address::from_word(topics[2]),
            value: U256::from_be_slice(&data[..32]),
        })
    } else if *topic0 == Approval::SIGNATURE_HASH {
        if topics.len() != 3 || data.len() < 32 {
            return None;
        }
        Some(ContractEvent::Approval {
            owner: Address::from_word(topics[1]),
            spender: Address::from_word(topics[2]),
            value: U256::from_be_slice(&data[..32]),
        })
    } else if *topic0 == Blacklisted::SIGNATURE_HASH {
        if topics.len() != 2 {
            return None;
        }
        Some(ContractEvent::Blacklisted {
            account: Address::from_word(topics[1]),
        })
    } else if *topic0 == RemovedFromBlacklist::SIGNATURE_HASH {
        if topics.len() != 2 {
            return None;
        }
        Some(ContractEvent::RemovedFromBlacklist {
            account: Address::from_word(topics[1]),
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Bytes, LogData};

    fn make_log(topics: Vec<B256>, data: Vec<u8>) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: Address::repeat_byte(0xAA),
                data: LogData::new_unchecked(topics, Bytes::from(data)),
            },
            block_hash: None,
            block_number: Some(100),
            block_timestamp: None,
            transaction_hash: Some(B256::repeat_byte(0x11)),
            transaction_index: None,
            log_index: Some(0),
            removed: false,
        }
    }

    #[test]
    fn test_decode_transfer() {
        let from = Address::repeat_byte(0x01);
        let to = Address::repeat_byte(0x02);
        let value = U256::from(1500u64);

        let log = make_log(
            vec![
                Transfer::SIGNATURE_HASH,
                from.into_word(),
                to.into_word(),
            ],
            value.to_be_bytes_vec(),
        );

        let event = decode_log(&log).unwrap();
        assert_eq!(event, ContractEvent::Transfer { from, to, value });
        assert_eq!(event.name(), "Transfer");
    }

    #[test]
    fn test_decode_blacklisted() {
        let account = Address::repeat_byte(0x0B);
        let log = make_log(
            vec![Blacklisted::SIGNATURE_HASH, account.into_word()],
            vec![],
        );

        assert_eq!(
            decode_log(&log),
            Some(ContractEvent::Blacklisted { account })
        );
    }

    #[test]
    fn test_unknown_topic_is_skipped() {
        let log = make_log(vec![B256::repeat_byte(0xFF)], vec![]);
        assert!(decode_log(&log).is_none());
        assert!(event_name(&B256::repeat_byte(0xFF)).is_none());
    }

    #[test]
    fn test_malformed_transfer_is_skipped() {
        // Transfer signature but only two topics and no data.
        let log = make_log(
            vec![Transfer::SIGNATURE_HASH, Address::repeat_byte(0x01).into_word()],
            vec![],
        );
        assert!(decode_log(&log).is_none());
    }

    #[test]
    fn test_event_name_resolution() {
        assert_eq!(event_name(&Transfer::SIGNATURE_HASH), Some("Transfer"));
        assert_eq!(
            event_name(&RemovedFromBlacklist::SIGNATURE_HASH),
            Some("RemovedFromBlacklist")
        );
    }
}
