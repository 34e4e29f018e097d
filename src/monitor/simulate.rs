use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use std::time::Duration;

use crate::config::SandboxConfig;
use crate::events::{self, ContractEvent};
use crate::retry::with_retries;

use super::sandbox::SandboxSupervisor;

const SIM_ATTEMPTS: u32 = 3;
const RECEIPT_ATTEMPTS: u32 = 5;
const SIM_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimStatus {
    Success,
    Revert,
}

impl SimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Revert => "revert",
        }
    }
}

/// An event observed while pre-executing a pending transaction.
#[derive(Debug, Clone)]
pub struct SimulatedEvent {
    pub name: &'static str,
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

/// Outcome of one speculative execution. A simulation never fails the
/// outer pipeline: retry exhaustion lands in `error` and the pending
/// transaction is persisted with whatever status was determined.
#[derive(Debug, Default)]
pub struct SimulationOutcome {
    pub status: Option<SimStatus>,
    pub events: Vec<SimulatedEvent>,
    pub error: Option<String>,
}

/// Execute a pending transaction's exact raw bytes against a disposable
/// fork and observe its actual effects: status, emitted token events,
/// native-value movement. The sandbox is torn down on every exit path.
pub async fn simulate_pending_transaction(
    config: &SandboxConfig,
    raw_tx: &[u8],
    sender: Address,
    target: Address,
    native_value: U256,
) -> SimulationOutcome {
    let mut outcome = SimulationOutcome::default();

    let sandbox = match with_retries("sandbox startup", SIM_ATTEMPTS, SIM_BACKOFF, || {
        SandboxSupervisor::start(config)
    })
    .await
    {
        Ok(sandbox) => sandbox,
        Err(e) => {
            outcome.error = Some(e.to_string());
            return outcome;
        }
    };

    let result = run_protocol(&sandbox, raw_tx, sender, target, native_value).await;
    sandbox.stop().await;

    match result {
        Ok((status, events)) => {
            outcome.status = Some(status);
            outcome.events = events;
        }
        Err(e) => outcome.error = Some(e.to_string()),
    }

    outcome
}

/// The simulation protocol against a ready sandbox: probe, snapshot,
/// broadcast, mine, fetch receipt. Every network step runs under the
/// shared retry policy.
async fn run_protocol(
    sandbox: &SandboxSupervisor,
    raw_tx: &[u8],
    sender: Address,
    target: Address,
    native_value: U256,
) -> eyre::Result<(SimStatus, Vec<SimulatedEvent>)> {
    let provider = ProviderBuilder::new().connect_http(
        sandbox
            .endpoint()
            .parse()
            .map_err(|e| eyre::eyre!("Invalid sandbox endpoint: {}", e))?,
    );

    with_retries("sandbox connect", SIM_ATTEMPTS, SIM_BACKOFF, || {
        provider.get_chain_id()
    })
    .await?;

    let _snapshot_id: String = with_retries("snapshot", SIM_ATTEMPTS, SIM_BACKOFF, || {
        provider.raw_request("evm_snapshot".into(), ())
    })
    .await?;

    let raw_hex = format!("0x{}", hex::encode(raw_tx));
    let sim_tx_hash: B256 = with_retries("broadcast", SIM_ATTEMPTS, SIM_BACKOFF, || {
        provider.raw_request("eth_sendRawTransaction".into(), (raw_hex.clone(),))
    })
    .await?;

    let _: serde_json::Value = with_retries("mine", SIM_ATTEMPTS, SIM_BACKOFF, || {
        provider.raw_request("evm_mine".into(), ())
    })
    .await?;

    // Mining can be asynchronous even on the sandbox; poll for the
    // receipt rather than failing on the first miss.
    let receipt = with_retries("receipt", RECEIPT_ATTEMPTS, SIM_BACKOFF, || async {
        match provider.get_transaction_receipt(sim_tx_hash).await {
            Ok(Some(receipt)) => Ok(receipt),
            Ok(None) => Err("receipt not yet available".to_string()),
            Err(e) => Err(e.to_string()),
        }
    })
    .await?;

    let status = if receipt.status() {
        SimStatus::Success
    } else {
        SimStatus::Revert
    };

    let mut sim_events = Vec::new();

    if native_value > U256::ZERO {
        sim_events.push(SimulatedEvent {
            name: "NativeTransfer",
            from: sender,
            to: target,
            value: native_value,
        });
    }

    for log in receipt.inner.logs() {
        if log.inner.address != target {
            continue;
        }
        match events::decode_log(log) {
            Some(ContractEvent::Transfer { from, to, value }) => {
                sim_events.push(SimulatedEvent {
                    name: "Transfer",
                    from,
                    to,
                    value,
                });
            }
            Some(ContractEvent::Approval {
                owner,
                spender,
                value,
            }) => {
                sim_events.push(SimulatedEvent {
                    name: "Approval",
                    from: owner,
                    to: spender,
                    value,
                });
            }
            _ => {}
        }
    }

    Ok((status, sim_events))
}
