//! On-chain probes backing hybrid rules.
//!
//! A probe names the facts it needs up front and then judges them as a pure
//! function, so hybrid evaluation never touches the network itself.

use std::collections::BTreeMap;

use ethereum_types::Address;
use serde::{Deserialize, Serialize};

use crate::abi::{encode_call, encode_probe_call, word_to_address};
use crate::verifier::{CallKey, FactKey, FactValue, RPC_UNAVAILABLE};

/// Resolved facts keyed by identity.
pub type FactMap = BTreeMap<FactKey, FactValue>;

/// Scan-wide probe parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeContext {
    /// Address with no privileged relationship to any target.
    pub caller: Address,
    /// A successful estimate must use more than this to count as real work.
    pub min_gas: u64,
    /// Estimates at or above this are treated as failure paths.
    pub max_gas: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// Some signature yields a successful gas estimate within the callable
    /// window when sent by the stranger caller.
    StrangerCallable { signatures: Vec<String> },
    /// The storage word at `slot` is zero.
    StorageIsZero { slot: u64 },
    /// A read-only call returns a zero word.
    CallReturnsZero { signature: String },
    /// The EIP-1967 implementation slot names a contract. The admin slot is
    /// read alongside as evidence.
    Eip1967Proxy,
    /// Like `StrangerCallable`, but sent to the EIP-1967 implementation
    /// instead of the proxy.
    ImplementationCallable { signatures: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    Satisfied,
    Failed,
    Unavailable,
}

/// What a probe saw, kept on the rule hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeEvidence {
    pub probe: String,
    pub outcome: ProbeOutcome,
    pub detail: String,
}

impl Probe {
    pub fn stranger_callable(signatures: &[&str]) -> Self {
        Probe::StrangerCallable {
            signatures: signatures.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn implementation_callable(signatures: &[&str]) -> Self {
        Probe::ImplementationCallable {
            signatures: signatures.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Whether the probe's verdict rests on "function X is callable".
    pub fn is_callable_check(&self) -> bool {
        matches!(
            self,
            Probe::StrangerCallable { .. } | Probe::ImplementationCallable { .. }
        )
    }

    pub fn describe(&self) -> String {
        match self {
            Probe::StrangerCallable { signatures } => {
                format!("stranger-callable({})", signatures.join(" | "))
            }
            Probe::StorageIsZero { slot } => format!("storage-is-zero(slot {slot})"),
            Probe::CallReturnsZero { signature } => format!("call-returns-zero({signature})"),
            Probe::Eip1967Proxy => "eip1967-proxy".to_string(),
            Probe::ImplementationCallable { signatures } => {
                format!("implementation-callable({})", signatures.join(" | "))
            }
        }
    }

    pub fn required_facts(&self, ctx: &ProbeContext) -> Vec<FactKey> {
        match self {
            Probe::StrangerCallable { signatures } => signatures
                .iter()
                .map(|sig| FactKey::GasEstimate {
                    call: stranger_call(sig, ctx.caller),
                })
                .collect(),
            Probe::StorageIsZero { slot } => vec![FactKey::storage(*slot)],
            Probe::CallReturnsZero { signature } => vec![FactKey::CallResult {
                call: CallKey::new(encode_call(signature, &[]), None),
            }],
            Probe::Eip1967Proxy => vec![FactKey::eip1967_implementation(), FactKey::eip1967_admin()],
            Probe::ImplementationCallable { signatures } => signatures
                .iter()
                .map(|sig| FactKey::ImplementationGasEstimate {
                    call: stranger_call(sig, ctx.caller),
                })
                .collect(),
        }
    }

    pub fn judge(&self, facts: &FactMap, ctx: &ProbeContext) -> ProbeEvidence {
        let (outcome, detail) = match self {
            Probe::StrangerCallable { signatures } => {
                judge_callable(signatures, facts, ctx, |call| FactKey::GasEstimate { call })
            }
            Probe::ImplementationCallable { signatures } => {
                judge_callable(signatures, facts, ctx, |call| {
                    FactKey::ImplementationGasEstimate { call }
                })
            }
            Probe::Eip1967Proxy => judge_proxy(facts),
            Probe::StorageIsZero { slot } => match facts.get(&FactKey::storage(*slot)) {
                Some(FactValue::Word { value }) if value.is_zero() => {
                    (ProbeOutcome::Satisfied, "slot is zero".to_string())
                }
                Some(FactValue::Word { value }) => {
                    (ProbeOutcome::Failed, format!("slot holds {value:#x}"))
                }
                other => unavailable_or_failed(other),
            },
            Probe::CallReturnsZero { signature } => {
                let key = FactKey::CallResult {
                    call: CallKey::new(encode_call(signature, &[]), None),
                };
                match facts.get(&key) {
                    Some(FactValue::Returned { data }) => {
                        let bytes = &data.0;
                        if bytes.len() >= 32 && bytes[..32].iter().all(|b| *b == 0) {
                            (ProbeOutcome::Satisfied, format!("{signature} returned zero"))
                        } else {
                            (
                                ProbeOutcome::Failed,
                                format!("{signature} returned {:?}", data),
                            )
                        }
                    }
                    other => unavailable_or_failed(other),
                }
            }
        };
        ProbeEvidence {
            probe: self.describe(),
            outcome,
            detail,
        }
    }
}

pub(crate) fn stranger_call(signature: &str, caller: Address) -> CallKey {
    CallKey::new(encode_probe_call(signature, caller), Some(caller))
}

fn judge_callable(
    signatures: &[String],
    facts: &FactMap,
    ctx: &ProbeContext,
    key: impl Fn(CallKey) -> FactKey,
) -> (ProbeOutcome, String) {
    let mut unavailable = false;
    let mut seen = Vec::new();
    for sig in signatures {
        match facts.get(&key(stranger_call(sig, ctx.caller))) {
            Some(FactValue::Gas { used }) if *used > ctx.min_gas && *used < ctx.max_gas => {
                return (
                    ProbeOutcome::Satisfied,
                    format!("{sig} callable by stranger, gas {used}"),
                );
            }
            Some(FactValue::Gas { used }) => seen.push(format!("{sig}: gas {used} outside window")),
            Some(FactValue::Reverted { reason }) => seen.push(format!("{sig}: reverted ({reason})")),
            Some(FactValue::Absent { reason }) => seen.push(format!("{sig}: {reason}")),
            Some(FactValue::Unavailable { .. }) | None => unavailable = true,
            Some(other) => seen.push(format!("{sig}: unexpected {other:?}")),
        }
    }
    if unavailable {
        (ProbeOutcome::Unavailable, RPC_UNAVAILABLE.to_string())
    } else {
        (ProbeOutcome::Failed, seen.join("; "))
    }
}

fn judge_proxy(facts: &FactMap) -> (ProbeOutcome, String) {
    let admin = match facts.get(&FactKey::eip1967_admin()) {
        Some(FactValue::Word { value }) if !value.is_zero() => {
            format!("admin {:?}", word_to_address(*value))
        }
        Some(FactValue::Word { .. }) => "admin slot empty".to_string(),
        _ => "admin unknown".to_string(),
    };
    match facts.get(&FactKey::eip1967_implementation()) {
        Some(FactValue::Word { value }) if value.is_zero() => (
            ProbeOutcome::Failed,
            "implementation slot empty, not an EIP-1967 proxy".to_string(),
        ),
        Some(FactValue::Word { value }) => (
            ProbeOutcome::Satisfied,
            format!("implementation {:?}, {admin}", word_to_address(*value)),
        ),
        other => unavailable_or_failed(other),
    }
}

fn unavailable_or_failed(value: Option<&FactValue>) -> (ProbeOutcome, String) {
    match value {
        Some(FactValue::Unavailable { .. }) | None => {
            (ProbeOutcome::Unavailable, RPC_UNAVAILABLE.to_string())
        }
        Some(FactValue::Reverted { reason }) => (ProbeOutcome::Failed, format!("reverted ({reason})")),
        Some(other) => (ProbeOutcome::Failed, format!("unexpected {other:?}")),
    }
}
