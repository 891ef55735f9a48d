//! Exploit-path validator.
//!
//! Each template is a short ordered chain of simulations at the scan's fixed
//! block. The chain advances only while every step behaves as expected: a
//! call that should succeed must produce a gas estimate, a precondition probe
//! must revert. Nothing is ever broadcast.

mod templates;

use ethereum_types::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::abi::{AbiArg, encode_call, encode_probe_call};
use crate::verifier::{CallKey, FactValue, OnChainVerifier, RPC_UNAVAILABLE};

pub use templates::builtin_templates;

/// How a step argument is filled in at simulation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSpec {
    Caller,
    CallerArray,
    TargetBalance,
    Uint(u64),
    EmptyBytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepExpectation {
    Success,
    /// Precondition probe: the call must revert at the current state.
    Revert,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateStep {
    pub label: String,
    /// Alternatives tried in order. The first one behaving as expected wins.
    pub signatures: Vec<String>,
    /// Explicit arguments. Empty means caller-oriented placeholders.
    pub args: Vec<ArgSpec>,
    pub expect: StepExpectation,
}

impl TemplateStep {
    pub fn succeed(label: &str, signatures: &[&str]) -> Self {
        Self {
            label: label.to_string(),
            signatures: signatures.iter().map(|s| s.to_string()).collect(),
            args: Vec::new(),
            expect: StepExpectation::Success,
        }
    }

    pub fn expect_revert(label: &str, signatures: &[&str]) -> Self {
        Self {
            expect: StepExpectation::Revert,
            ..Self::succeed(label, signatures)
        }
    }

    pub fn with_args(mut self, args: Vec<ArgSpec>) -> Self {
        self.args = args;
        self
    }

    fn calldata(&self, signature: &str, caller: Address, balance: U256) -> bytes::Bytes {
        if self.args.is_empty() {
            return encode_probe_call(signature, caller);
        }
        let args: Vec<AbiArg> = self
            .args
            .iter()
            .map(|spec| match spec {
                ArgSpec::Caller => AbiArg::Address(caller),
                ArgSpec::CallerArray => AbiArg::AddressArray(vec![caller]),
                ArgSpec::TargetBalance => AbiArg::Uint(balance),
                ArgSpec::Uint(v) => AbiArg::Uint(U256::from(*v)),
                ArgSpec::EmptyBytes => AbiArg::Bytes(Vec::new()),
            })
            .collect();
        encode_call(signature, &args)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExploitTemplate {
    pub id: String,
    /// Hybrid rule that must be confirmed before this template runs.
    pub trigger_rule: String,
    pub description: String,
    pub steps: Vec<TemplateStep>,
    /// Gas for calls that only become possible after the simulated steps.
    pub follow_up_gas: u64,
}

/// Template state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TemplateState {
    Candidate,
    /// Steps `0..=step` passed.
    StepSimulated { step: usize },
    Validated,
    Rejected { step: usize, reason: String },
    /// A step could not be simulated at all.
    Incomplete { step: usize, reason: String },
}

impl TemplateState {
    fn advance(self, step: usize, result: StepResult, last_step: bool) -> Self {
        match (self, result) {
            (state, _) if state.is_terminal() => state,
            (_, StepResult::Passed) if last_step => TemplateState::Validated,
            (_, StepResult::Passed) => TemplateState::StepSimulated { step },
            (_, StepResult::Failed(reason)) => TemplateState::Rejected { step, reason },
            (_, StepResult::Unavailable(reason)) => TemplateState::Incomplete { step, reason },
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TemplateState::Validated
                | TemplateState::Rejected { .. }
                | TemplateState::Incomplete { .. }
        )
    }
}

enum StepResult {
    Passed,
    Failed(String),
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub label: String,
    pub expect: StepExpectation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<u64>,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Economics {
    pub gross_value: U256,
    pub gas_used: u64,
    pub gas_price: U256,
    pub gas_cost: U256,
    /// `gross_value - gas_cost` in wei, saturating at the i128 range.
    pub net_profit: i128,
    pub uneconomical: bool,
}

impl Economics {
    pub fn compute(gross_value: U256, gas_used: u64, gas_price: U256) -> Self {
        let gas_cost = gas_price.saturating_mul(U256::from(gas_used));
        let net_profit = clamp_i128(gross_value).saturating_sub(clamp_i128(gas_cost));
        Self {
            gross_value,
            gas_used,
            gas_price,
            gas_cost,
            net_profit,
            uneconomical: net_profit <= 0,
        }
    }
}

fn clamp_i128(value: U256) -> i128 {
    if value > U256::from(i128::MAX as u128) {
        i128::MAX
    } else {
        value.as_u128() as i128
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateOutcome {
    pub template_id: String,
    pub trigger_rule: String,
    pub state: TemplateState,
    pub steps: Vec<StepRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub economics: Option<Economics>,
}

impl TemplateOutcome {
    pub fn is_validated(&self) -> bool {
        self.state == TemplateState::Validated
    }
}

/// Run one template against the verifier's target and block.
pub async fn validate(
    template: &ExploitTemplate,
    verifier: &OnChainVerifier,
    caller: Address,
    gas_price: U256,
) -> TemplateOutcome {
    let mut outcome = TemplateOutcome {
        template_id: template.id.clone(),
        trigger_rule: template.trigger_rule.clone(),
        state: TemplateState::Candidate,
        steps: Vec::new(),
        economics: None,
    };

    let Some(balance) = verifier.balance().await else {
        outcome.state = TemplateState::Incomplete {
            step: 0,
            reason: RPC_UNAVAILABLE.to_string(),
        };
        return outcome;
    };

    let mut gas_used = template.follow_up_gas;
    let last = template.steps.len().saturating_sub(1);
    for (idx, step) in template.steps.iter().enumerate() {
        let (result, record) = simulate_step(step, verifier, caller, balance).await;
        gas_used = gas_used.saturating_add(record.gas.unwrap_or(0));
        outcome.steps.push(record);
        outcome.state = outcome.state.advance(idx, result, idx == last);
        debug!(template = %template.id, step = idx, state = ?outcome.state, "template step");
        if outcome.state.is_terminal() && !outcome.is_validated() {
            return outcome;
        }
    }

    if outcome.is_validated() {
        outcome.economics = Some(Economics::compute(balance, gas_used, gas_price));
    }
    outcome
}

async fn simulate_step(
    step: &TemplateStep,
    verifier: &OnChainVerifier,
    caller: Address,
    balance: U256,
) -> (StepResult, StepRecord) {
    let mut record = StepRecord {
        label: step.label.clone(),
        expect: step.expect,
        signature: None,
        gas: None,
        detail: String::new(),
    };
    let mut failures = Vec::new();
    let mut unavailable = false;

    for sig in &step.signatures {
        let call = CallKey::new(step.calldata(sig, caller, balance), Some(caller));
        match (step.expect, verifier.estimate_gas(call).await) {
            (StepExpectation::Success, FactValue::Gas { used }) => {
                record.signature = Some(sig.clone());
                record.gas = Some(used);
                record.detail = format!("succeeded with gas {used}");
                return (StepResult::Passed, record);
            }
            (StepExpectation::Revert, FactValue::Reverted { reason }) => {
                record.signature = Some(sig.clone());
                record.detail = format!("reverted as expected: {reason}");
                return (StepResult::Passed, record);
            }
            (_, FactValue::Unavailable { .. }) => unavailable = true,
            (StepExpectation::Success, FactValue::Reverted { reason }) => {
                failures.push(format!("{sig} reverted: {reason}"));
            }
            (StepExpectation::Revert, FactValue::Gas { used }) => {
                failures.push(format!("{sig} succeeded with gas {used}, expected revert"));
            }
            (_, other) => failures.push(format!("{sig}: unexpected {other:?}")),
        }
    }

    if unavailable && failures.is_empty() {
        record.detail = RPC_UNAVAILABLE.to_string();
        return (StepResult::Unavailable(RPC_UNAVAILABLE.to_string()), record);
    }
    record.detail = failures.join("; ");
    (StepResult::Failed(record.detail.clone()), record)
}
