//! On-chain verifier: lazily resolved, memoized facts about one target at one
//! block height.
//!
//! Each distinct [`FactKey`] is queried at most once per verifier. Concurrent
//! requests for the same key wait on the same in-flight query. Failed queries
//! are cached as [`FactValue::Unavailable`] so the scan stays consistent and
//! an analyst can tell "checked and clean" from "could not check".

pub mod chain;
pub mod rpc_client;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use futures::future::join_all;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::abi::word_to_address;
use crate::error::RpcError;

pub use chain::{CallRequest, ChainRpc, SimOutcome};

/// Reason recorded on facts whose query failed in transport.
pub const RPC_UNAVAILABLE: &str = "rpc_unavailable";

/// Reason recorded when a proxy-relative fact has no implementation to ask.
pub const NO_IMPLEMENTATION: &str = "no_eip1967_implementation";

/// `keccak256("eip1967.proxy.implementation") - 1`.
pub const EIP1967_IMPLEMENTATION_SLOT: H256 = H256([
    0x36, 0x08, 0x94, 0xa1, 0x3b, 0xa1, 0xa3, 0x21, 0x06, 0x67, 0xc8, 0x28, 0x49, 0x2d, 0xb9, 0x8d,
    0xca, 0x3e, 0x20, 0x76, 0xcc, 0x37, 0x35, 0xa9, 0x20, 0xa3, 0xca, 0x50, 0x5d, 0x38, 0x2b, 0xbc,
]);

/// `keccak256("eip1967.proxy.admin") - 1`.
pub const EIP1967_ADMIN_SLOT: H256 = H256([
    0xb5, 0x31, 0x27, 0x68, 0x4a, 0x56, 0x8b, 0x31, 0x73, 0xae, 0x13, 0xb9, 0xf8, 0xa6, 0x01, 0x6e,
    0x24, 0x3e, 0x63, 0xb6, 0xe8, 0xee, 0x11, 0x78, 0xd6, 0xa7, 0x17, 0x85, 0x0b, 0x5d, 0x61, 0x03,
]);

/// EIP-1167 minimal proxy runtime prefix.
const EIP1167_PREFIX: [u8; 10] = [0x36, 0x3d, 0x3d, 0x37, 0x3d, 0x3d, 0x3d, 0x36, 0x3d, 0x73];

/// Bytecode shorter than this is a forwarding stub, not real logic.
const SHORT_PROXY_MAX_LEN: usize = 100;

/// Byte string serialized as `0x`-prefixed hex.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HexBytes(pub Bytes);

impl fmt::Debug for HexBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

impl From<Bytes> for HexBytes {
    fn from(value: Bytes) -> Self {
        Self(value)
    }
}

impl Serialize for HexBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(&self.0)))
    }
}

impl<'de> Deserialize<'de> for HexBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let body = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(body)
            .map(|v| HexBytes(Bytes::from(v)))
            .map_err(serde::de::Error::custom)
    }
}

/// Message call against the target, the `to` address is implicit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallKey {
    pub data: HexBytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
}

impl CallKey {
    pub fn new(data: Bytes, from: Option<Address>) -> Self {
        Self {
            data: HexBytes(data),
            from,
            value: None,
        }
    }

    fn to_request(&self, target: Address) -> CallRequest {
        CallRequest {
            to: target,
            data: self.data.0.clone(),
            from: self.from,
            value: self.value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    Balance,
    Code,
    StorageSlot,
    CallResult,
    GasEstimate,
    ImplementationGasEstimate,
}

/// Identity of a fact within one target's scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FactKey {
    Balance,
    Code,
    StorageSlot { slot: H256 },
    CallResult { call: CallKey },
    GasEstimate { call: CallKey },
    /// Gas estimate sent straight to the implementation named by the
    /// target's EIP-1967 implementation slot, bypassing the proxy.
    ImplementationGasEstimate { call: CallKey },
}

impl FactKey {
    pub fn kind(&self) -> FactKind {
        match self {
            FactKey::Balance => FactKind::Balance,
            FactKey::Code => FactKind::Code,
            FactKey::StorageSlot { .. } => FactKind::StorageSlot,
            FactKey::CallResult { .. } => FactKind::CallResult,
            FactKey::GasEstimate { .. } => FactKind::GasEstimate,
            FactKey::ImplementationGasEstimate { .. } => FactKind::ImplementationGasEstimate,
        }
    }

    pub fn storage(slot: u64) -> Self {
        FactKey::StorageSlot {
            slot: H256::from_low_u64_be(slot),
        }
    }

    pub fn eip1967_implementation() -> Self {
        FactKey::StorageSlot {
            slot: EIP1967_IMPLEMENTATION_SLOT,
        }
    }

    pub fn eip1967_admin() -> Self {
        FactKey::StorageSlot {
            slot: EIP1967_ADMIN_SLOT,
        }
    }
}

/// Deployed bytecode shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeKind {
    /// No code: externally-owned account or self-destructed contract.
    Eoa,
    MinimalProxy,
    /// Short forwarding stub such as legacy library-delegate wallets.
    ShortProxy,
    Contract,
}

pub fn classify_code(code: &[u8]) -> CodeKind {
    if code.is_empty() {
        CodeKind::Eoa
    } else if code.starts_with(&EIP1167_PREFIX) {
        CodeKind::MinimalProxy
    } else if code.len() < SHORT_PROXY_MAX_LEN {
        CodeKind::ShortProxy
    } else {
        CodeKind::Contract
    }
}

/// Resolved state of a fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FactValue {
    Balance { wei: U256 },
    Code { length: usize, code_kind: CodeKind },
    Word { value: U256 },
    Returned { data: HexBytes },
    Gas { used: u64 },
    Reverted { reason: String },
    /// The query has nothing to run against, e.g. no proxy implementation.
    Absent { reason: String },
    Unavailable { reason: String, detail: String },
}

impl FactValue {
    fn unavailable(err: &RpcError) -> Self {
        FactValue::Unavailable {
            reason: RPC_UNAVAILABLE.to_string(),
            detail: err.to_string(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, FactValue::Unavailable { .. })
    }

    pub fn gas(&self) -> Option<u64> {
        match self {
            FactValue::Gas { used } => Some(*used),
            _ => None,
        }
    }

    pub fn word(&self) -> Option<U256> {
        match self {
            FactValue::Word { value } => Some(*value),
            FactValue::Balance { wei } => Some(*wei),
            _ => None,
        }
    }
}

/// A fact together with the block it was observed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainFact {
    pub kind: FactKind,
    pub key: FactKey,
    pub value: FactValue,
    pub block: u64,
}

type FactCell = Arc<OnceCell<FactValue>>;

/// Memoized fact resolver for one (target, block).
pub struct OnChainVerifier {
    rpc: Arc<dyn ChainRpc>,
    target: Address,
    block: u64,
    cache: Mutex<HashMap<FactKey, FactCell>>,
}

impl OnChainVerifier {
    pub fn new(rpc: Arc<dyn ChainRpc>, target: Address, block: u64) -> Self {
        Self {
            rpc,
            target,
            block,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn target(&self) -> Address {
        self.target
    }

    /// Resolve one fact, querying the chain only on first use.
    pub async fn fact(&self, key: &FactKey) -> FactValue {
        self.cell(key).get_or_init(|| self.fetch(key)).await.clone()
    }

    /// Resolve independent facts concurrently. Results follow `keys` order.
    pub async fn facts(&self, keys: &[FactKey]) -> Vec<FactValue> {
        join_all(keys.iter().map(|key| self.fact(key))).await
    }

    pub async fn balance(&self) -> Option<U256> {
        match self.fact(&FactKey::Balance).await {
            FactValue::Balance { wei } => Some(wei),
            _ => None,
        }
    }

    pub async fn estimate_gas(&self, call: CallKey) -> FactValue {
        self.fact(&FactKey::GasEstimate { call }).await
    }

    /// Implementation address behind the EIP-1967 slot. Shares the slot's
    /// memo entry with [`FactKey::eip1967_implementation`].
    async fn implementation(&self) -> Result<Option<Address>, FactValue> {
        let value = self
            .cell(&FactKey::eip1967_implementation())
            .get_or_init(|| self.fetch_storage(EIP1967_IMPLEMENTATION_SLOT))
            .await
            .clone();
        match value {
            FactValue::Word { value } if value.is_zero() => Ok(None),
            FactValue::Word { value } => Ok(Some(word_to_address(value))),
            other => Err(other),
        }
    }

    fn cell(&self, key: &FactKey) -> FactCell {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.entry(key.clone()).or_default().clone()
    }

    /// Every fact resolved so far, in key order.
    pub fn snapshot(&self) -> Vec<OnChainFact> {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let mut facts: Vec<OnChainFact> = cache
            .iter()
            .filter_map(|(key, cell)| {
                cell.get().map(|value| OnChainFact {
                    kind: key.kind(),
                    key: key.clone(),
                    value: value.clone(),
                    block: self.block,
                })
            })
            .collect();
        facts.sort_by(|a, b| a.key.cmp(&b.key));
        facts
    }

    async fn fetch(&self, key: &FactKey) -> FactValue {
        debug!(target_address = %self.target, block = self.block, fact = ?key.kind(), "querying fact");
        let result = match key {
            FactKey::Balance => self
                .rpc
                .get_balance(self.target, self.block)
                .await
                .map(|wei| FactValue::Balance { wei }),
            FactKey::Code => self
                .rpc
                .get_code(self.target, self.block)
                .await
                .map(|code| FactValue::Code {
                    length: code.len(),
                    code_kind: classify_code(&code),
                }),
            FactKey::StorageSlot { slot } => return self.fetch_storage(*slot).await,
            FactKey::CallResult { call } => self
                .rpc
                .call(&call.to_request(self.target), self.block)
                .await
                .map(|outcome| match outcome {
                    SimOutcome::Success(data) => FactValue::Returned {
                        data: HexBytes(data),
                    },
                    SimOutcome::Reverted(reason) => FactValue::Reverted { reason },
                }),
            FactKey::GasEstimate { call } => self
                .rpc
                .estimate_gas(&call.to_request(self.target), self.block)
                .await
                .map(gas_fact),
            FactKey::ImplementationGasEstimate { call } => match self.implementation().await {
                Ok(Some(implementation)) => self
                    .rpc
                    .estimate_gas(&call.to_request(implementation), self.block)
                    .await
                    .map(gas_fact),
                Ok(None) => Ok(FactValue::Absent {
                    reason: NO_IMPLEMENTATION.to_string(),
                }),
                Err(slot) => return slot,
            },
        };
        self.settle(key.kind(), result)
    }

    async fn fetch_storage(&self, slot: H256) -> FactValue {
        let result = self
            .rpc
            .get_storage_at(self.target, slot, self.block)
            .await
            .map(|value| FactValue::Word { value });
        self.settle(FactKind::StorageSlot, result)
    }

    fn settle(&self, kind: FactKind, result: Result<FactValue, RpcError>) -> FactValue {
        result.unwrap_or_else(|err| {
            warn!(target_address = %self.target, fact = ?kind, error = %err, "fact unavailable");
            FactValue::unavailable(&err)
        })
    }
}

fn gas_fact(outcome: SimOutcome<u64>) -> FactValue {
    match outcome {
        SimOutcome::Success(used) => FactValue::Gas { used },
        SimOutcome::Reverted(reason) => FactValue::Reverted { reason },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_classification() {
        assert_eq!(classify_code(&[]), CodeKind::Eoa);
        let mut clone = EIP1167_PREFIX.to_vec();
        clone.extend_from_slice(&[0u8; 35]);
        assert_eq!(classify_code(&clone), CodeKind::MinimalProxy);
        assert_eq!(classify_code(&[0x60; 49]), CodeKind::ShortProxy);
        assert_eq!(classify_code(&[0x60; 2048]), CodeKind::Contract);
    }

    #[test]
    fn eip1967_slots_are_hash_minus_one() {
        use crate::abi::keccak256;
        for (label, slot) in [
            ("eip1967.proxy.implementation", EIP1967_IMPLEMENTATION_SLOT),
            ("eip1967.proxy.admin", EIP1967_ADMIN_SLOT),
        ] {
            let hash = U256::from_big_endian(&keccak256(label.as_bytes()));
            assert_eq!(U256::from_big_endian(slot.as_bytes()), hash - 1, "{label}");
        }
        assert_eq!(
            FactKey::eip1967_implementation(),
            FactKey::StorageSlot {
                slot: EIP1967_IMPLEMENTATION_SLOT
            }
        );
    }

    #[test]
    fn hex_bytes_serde() {
        let bytes = HexBytes(Bytes::from_static(&[0xde, 0xad]));
        let json = serde_json::to_string(&bytes).unwrap();
        assert_eq!(json, "\"0xdead\"");
        let back: HexBytes = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bytes);
    }

    #[test]
    fn fact_key_kinds() {
        assert_eq!(FactKey::storage(0).kind(), FactKind::StorageSlot);
        let call = CallKey::new(Bytes::from_static(&[1, 2, 3, 4]), None);
        assert_eq!(
            FactKey::GasEstimate { call: call.clone() }.kind(),
            FactKind::GasEstimate
        );
        assert_eq!(
            FactKey::ImplementationGasEstimate { call: call.clone() }.kind(),
            FactKind::ImplementationGasEstimate
        );
        assert_eq!(FactKey::CallResult { call }.kind(), FactKind::CallResult);
    }
}
