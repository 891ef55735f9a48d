//! Core data model shared by every pipeline stage.

use std::collections::BTreeMap;

use ethereum_types::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::echo::EchoVerdict;
use crate::exploit::{Economics, TemplateOutcome};
use crate::rules::RuleHit;
use crate::verifier::OnChainFact;

/// One contract queued for scanning. Identity is the address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractTarget {
    pub address: Address,
    /// Balance supplied with the target list, in wei. Used for triage ordering.
    pub declared_balance: U256,
    pub chain_id: u64,
}

impl ContractTarget {
    pub fn new(address: Address, declared_balance: U256, chain_id: u64) -> Self {
        Self {
            address,
            declared_balance,
            chain_id,
        }
    }
}

/// How far a finding got through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// No verified source: static and hybrid rules could not run.
    SourceUnverified,
    /// Only text evidence.
    Static,
    /// At least one hybrid rule was confirmed on-chain.
    Confirmed,
    /// Every step of an exploit template passed simulation on a non-echo target.
    ExploitValidated,
}

impl Classification {
    /// Sort rank, higher is more urgent.
    pub fn rank(self) -> u8 {
        match self {
            Classification::SourceUnverified => 0,
            Classification::Static => 1,
            Classification::Confirmed => 2,
            Classification::ExploitValidated => 3,
        }
    }
}

/// Outcome of the source lookup for a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceStatus {
    Verified {
        contract_name: String,
        compiler_version: String,
        file_count: usize,
    },
    /// Registry returned a record but its corpus is empty.
    NoSource,
    Unverified,
    RegistryUnavailable { reason: String },
}

/// Kind of failure or caveat recorded against a target instead of aborting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    SourceUnverified,
    NoSource,
    ParseAmbiguous,
    RpcUnavailable,
    EchoLike,
    EchoUnclassifiable,
    /// An exploit template was not attempted.
    TemplateSkipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub kind: AnnotationKind,
    pub detail: String,
}

impl Annotation {
    pub fn new(kind: AnnotationKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// Terminal verdict for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub target: ContractTarget,
    pub block_number: u64,
    pub classification: Classification,
    pub total_score: u32,
    pub static_score: u32,
    pub source: SourceStatus,
    pub triggered_rules: BTreeMap<String, RuleHit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echo: Option<EchoVerdict>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exploits: Vec<TemplateOutcome>,
    /// Economics of the most profitable validated template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub economics: Option<Economics>,
    pub facts: Vec<OnChainFact>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

impl Finding {
    pub fn has_annotation(&self, kind: AnnotationKind) -> bool {
        self.annotations.iter().any(|a| a.kind == kind)
    }
}

/// Convert an ETH amount (as operators write it) into wei.
pub fn eth_to_wei(eth: f64) -> U256 {
    if !eth.is_finite() || eth <= 0.0 {
        return U256::zero();
    }
    let gwei = (eth * 1_000_000_000.0).round() as u128;
    U256::from(gwei) * U256::from(1_000_000_000u64)
}

/// Lossy wei to ETH conversion for display.
pub fn wei_to_eth(wei: U256) -> f64 {
    let gwei = wei / U256::from(1_000_000_000u64);
    let gwei = if gwei > U256::from(u128::MAX) {
        u128::MAX
    } else {
        gwei.as_u128()
    };
    gwei as f64 / 1_000_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_rank_order() {
        assert!(Classification::ExploitValidated.rank() > Classification::Confirmed.rank());
        assert!(Classification::Confirmed.rank() > Classification::Static.rank());
        assert!(Classification::Static.rank() > Classification::SourceUnverified.rank());
    }

    #[test]
    fn eth_conversions() {
        assert_eq!(eth_to_wei(1.0), U256::from(1_000_000_000_000_000_000u128));
        assert_eq!(eth_to_wei(0.5), U256::from(500_000_000_000_000_000u128));
        assert_eq!(eth_to_wei(-3.0), U256::zero());
        assert_eq!(eth_to_wei(f64::NAN), U256::zero());
        assert!((wei_to_eth(eth_to_wei(20.25)) - 20.25).abs() < 1e-9);
    }
}
