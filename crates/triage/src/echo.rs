//! Echo/proxy classifier.
//!
//! Library-delegate wallets with a missing or killed library accept any
//! selector and burn about the same gas for each. Before a "function X is
//! callable" signal is trusted, the target is probed with meaningful and
//! random selectors; near-identical gas across all of them means echo.

use bytes::Bytes;
use ethereum_types::Address;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::abi::{encode_selector, selector};
use crate::verifier::{CallKey, FactKey, FactValue, OnChainVerifier};

#[derive(Debug, Clone, PartialEq)]
pub struct EchoConfig {
    /// Variance strictly below this percentage is echo-like.
    pub variance_threshold_pct: f64,
    /// Function signatures with real meaning on typical targets.
    pub known_signatures: Vec<String>,
    /// Selectors that should not exist on any real contract.
    pub random_selectors: Vec<[u8; 4]>,
    pub caller: Option<Address>,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            variance_threshold_pct: 20.0,
            known_signatures: vec![
                "owner()".to_string(),
                "withdraw()".to_string(),
                "setOwner(address)".to_string(),
            ],
            random_selectors: vec![
                [0x12, 0x34, 0x56, 0x78],
                [0x87, 0x65, 0x43, 0x21],
                [0xc2, 0x98, 0x55, 0x78],
            ],
            caller: None,
        }
    }
}

impl EchoConfig {
    fn probes(&self) -> Vec<(String, bool, Bytes)> {
        let known = self.known_signatures.iter().map(|sig| {
            (sig.clone(), true, encode_selector(selector(sig)))
        });
        let random = self.random_selectors.iter().map(|sel| {
            (format!("0x{}", hex::encode(sel)), false, encode_selector(*sel))
        });
        known.chain(random).collect()
    }

    pub fn required_facts(&self) -> Vec<FactKey> {
        self.probes()
            .into_iter()
            .map(|(_, _, data)| FactKey::GasEstimate {
                call: CallKey::new(data, self.caller),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EchoClass {
    EchoLike,
    Distinct,
    /// Fewer than two probes produced a gas estimate.
    Unclassifiable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoSample {
    pub probe: String,
    pub known: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoVerdict {
    pub target: Address,
    /// True for echo-like and unclassifiable targets.
    pub is_echo_like: bool,
    pub gas_variance_pct: Option<f64>,
    pub class: EchoClass,
    pub samples: Vec<EchoSample>,
}

/// `(max - min) / mean * 100` over the estimates. `None` for fewer than two.
pub fn variance_pct(gas: &[u64]) -> Option<f64> {
    if gas.len() < 2 {
        return None;
    }
    let max = *gas.iter().max()? as f64;
    let min = *gas.iter().min()? as f64;
    let mean = gas.iter().map(|g| *g as f64).sum::<f64>() / gas.len() as f64;
    if mean == 0.0 {
        return Some(0.0);
    }
    Some((max - min) / mean * 100.0)
}

/// Classify from collected samples.
pub fn verdict(target: Address, samples: Vec<EchoSample>, threshold_pct: f64) -> EchoVerdict {
    let gas: Vec<u64> = samples.iter().filter_map(|s| s.gas).collect();
    let variance = variance_pct(&gas);
    let class = match variance {
        None => EchoClass::Unclassifiable,
        Some(v) if v < threshold_pct => EchoClass::EchoLike,
        Some(_) => EchoClass::Distinct,
    };
    EchoVerdict {
        target,
        is_echo_like: class != EchoClass::Distinct,
        gas_variance_pct: variance,
        class,
        samples,
    }
}

/// Probe the target through the verifier and classify it.
pub async fn classify(verifier: &OnChainVerifier, config: &EchoConfig) -> EchoVerdict {
    let probes = config.probes();
    let keys = config.required_facts();
    let values = verifier.facts(&keys).await;

    let samples: Vec<EchoSample> = probes
        .into_iter()
        .zip(values)
        .map(|((probe, known, _), value)| {
            let (gas, failure) = match value {
                FactValue::Gas { used } => (Some(used), None),
                FactValue::Reverted { reason } => (None, Some(format!("reverted: {reason}"))),
                FactValue::Unavailable { reason, .. } => (None, Some(reason)),
                other => (None, Some(format!("unexpected {other:?}"))),
            };
            EchoSample {
                probe,
                known,
                gas,
                failure,
            }
        })
        .collect();

    let result = verdict(verifier.target(), samples, config.variance_threshold_pct);
    debug!(
        target_address = %result.target,
        class = ?result.class,
        variance = ?result.gas_variance_pct,
        "echo classification"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(probe: &str, gas: Option<u64>) -> EchoSample {
        EchoSample {
            probe: probe.to_string(),
            known: !probe.starts_with("0x"),
            gas,
            failure: gas.is_none().then(|| "reverted".to_string()),
        }
    }

    #[test]
    fn identical_gas_is_echo_like() {
        let samples = vec![
            sample("owner()", Some(23_500)),
            sample("withdraw()", Some(23_500)),
            sample("0x12345678", Some(23_500)),
            sample("0x87654321", Some(23_500)),
        ];
        let v = verdict(Address::zero(), samples, 20.0);
        assert_eq!(v.gas_variance_pct, Some(0.0));
        assert!(v.is_echo_like);
        assert_eq!(v.class, EchoClass::EchoLike);
    }

    #[test]
    fn spread_gas_is_distinct() {
        let samples = vec![
            sample("owner()", Some(24_000)),
            sample("withdraw()", Some(60_000)),
            sample("0x12345678", Some(21_300)),
        ];
        let v = verdict(Address::zero(), samples, 20.0);
        assert_eq!(v.class, EchoClass::Distinct);
        assert!(!v.is_echo_like);
        assert!(v.gas_variance_pct.unwrap() > 100.0);
    }

    #[test]
    fn fewer_than_two_estimates_is_unclassifiable() {
        let samples = vec![
            sample("owner()", Some(24_000)),
            sample("withdraw()", None),
            sample("0x12345678", None),
        ];
        let v = verdict(Address::zero(), samples, 20.0);
        assert_eq!(v.class, EchoClass::Unclassifiable);
        assert!(v.is_echo_like);
        assert_eq!(v.gas_variance_pct, None);
    }

    #[test]
    fn variance_formula() {
        assert_eq!(variance_pct(&[]), None);
        assert_eq!(variance_pct(&[100]), None);
        // (120 - 80) / 100 * 100
        let v = variance_pct(&[80, 100, 120]).unwrap();
        assert!((v - 40.0).abs() < 1e-9);
    }

    #[test]
    fn default_probe_set_mixes_known_and_random() {
        let config = EchoConfig::default();
        let probes = config.probes();
        assert_eq!(probes.iter().filter(|p| p.1).count(), 3);
        assert_eq!(probes.iter().filter(|p| !p.1).count(), 3);
        assert_eq!(probes[0].2.as_ref(), &[0x8d, 0xa5, 0xcb, 0x5b]);
        assert_eq!(config.required_facts().len(), 6);
    }
}
