//! Rule registry and pattern engine.
//!
//! A rule is a named, weighted heuristic. Rules without probes are static and
//! judged on source text alone. Rules with probes are hybrid: their text match
//! only nominates them, and the verdict comes from on-chain facts gathered by
//! the verifier. Every evaluation here is a pure function of its inputs.

mod builtin;
pub mod pattern;
pub mod probe;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::echo::{EchoClass, EchoVerdict};
use crate::source::SourceCorpus;
use crate::verifier::{FactKey, RPC_UNAVAILABLE};

pub use pattern::{Pattern, TextPredicate, TextSpan};
pub use probe::{FactMap, Probe, ProbeContext, ProbeEvidence, ProbeOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    AuthenticationBypass,
    ArithmeticBoundary,
    CallbackReentrancy,
    OracleDependence,
    AccessControl,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::AuthenticationBypass => "authentication-bypass",
            Category::ArithmeticBoundary => "arithmetic-boundary",
            Category::CallbackReentrancy => "callback-reentrancy",
            Category::OracleDependence => "oracle-dependence",
            Category::AccessControl => "access-control",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub category: Category,
    pub weight: u32,
    pub description: String,
    pub predicate: TextPredicate,
    /// Empty for static rules. All probes must be satisfied to confirm.
    pub probes: Vec<Probe>,
}

impl Rule {
    pub fn new(id: &str, category: Category, weight: u32, predicate: TextPredicate) -> Self {
        Self {
            id: id.to_string(),
            category,
            weight,
            description: String::new(),
            predicate,
            probes: Vec::new(),
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn probe(mut self, probe: Probe) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn is_hybrid(&self) -> bool {
        !self.probes.is_empty()
    }

    pub fn required_facts(&self, ctx: &ProbeContext) -> Vec<FactKey> {
        self.probes
            .iter()
            .flat_map(|p| p.required_facts(ctx))
            .collect()
    }
}

/// Verdict for one triggered rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RuleStatus {
    /// Text evidence only.
    Static,
    /// Every probe was satisfied on-chain.
    Confirmed,
    /// Probes were not trusted because the target behaves like an echo proxy.
    Downgraded { reason: String },
    /// A probe checked the chain and disagreed.
    Refuted,
    /// A probe could not be checked.
    Unchecked { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleHit {
    pub rule_id: String,
    pub category: Category,
    pub weight: u32,
    pub hybrid: bool,
    pub status: RuleStatus,
    pub evidence: Vec<TextSpan>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub probe_evidence: Vec<ProbeEvidence>,
}

impl RuleHit {
    fn new(rule: &Rule, status: RuleStatus, evidence: Vec<TextSpan>) -> Self {
        Self {
            rule_id: rule.id.clone(),
            category: rule.category,
            weight: rule.weight,
            hybrid: rule.is_hybrid(),
            status,
            evidence,
            probe_evidence: Vec::new(),
        }
    }

    /// Weight counted towards the static score.
    pub fn static_weight(&self) -> u32 {
        match self.status {
            RuleStatus::Static | RuleStatus::Downgraded { .. } => self.weight,
            _ => 0,
        }
    }

    /// Weight counted towards the total score.
    pub fn total_weight(&self) -> u32 {
        match self.status {
            RuleStatus::Confirmed => self.weight,
            _ => self.static_weight(),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == RuleStatus::Confirmed
    }
}

/// A hybrid rule nominated by its text predicate, waiting for facts.
#[derive(Debug, Clone)]
pub struct HybridCandidate<'a> {
    pub rule: &'a Rule,
    pub evidence: Vec<TextSpan>,
}

impl HybridCandidate<'_> {
    /// Rules resting on a callable check are not trusted on echo-like targets.
    pub fn is_downgraded_by(&self, echo: &EchoVerdict) -> bool {
        echo.class != EchoClass::Distinct && self.rule.probes.iter().any(Probe::is_callable_check)
    }

    /// Facts the verdict depends on. Nothing for a downgraded rule.
    pub fn required_facts(&self, echo: &EchoVerdict, ctx: &ProbeContext) -> Vec<FactKey> {
        if self.is_downgraded_by(echo) {
            return Vec::new();
        }
        self.rule.required_facts(ctx)
    }

    /// Pure verdict over the echo gate and resolved facts.
    pub fn evaluate(&self, facts: &FactMap, echo: &EchoVerdict, ctx: &ProbeContext) -> RuleHit {
        let rule = self.rule;
        let evidence = self.evidence.clone();

        if self.is_downgraded_by(echo) {
            let reason = match echo.class {
                EchoClass::Unclassifiable => "echo_unclassifiable",
                _ => "echo_like",
            };
            return RuleHit::new(
                rule,
                RuleStatus::Downgraded {
                    reason: reason.to_string(),
                },
                evidence,
            );
        }

        let probe_evidence: Vec<ProbeEvidence> =
            rule.probes.iter().map(|p| p.judge(facts, ctx)).collect();
        let status = if probe_evidence
            .iter()
            .any(|e| e.outcome == ProbeOutcome::Failed)
        {
            RuleStatus::Refuted
        } else if probe_evidence
            .iter()
            .all(|e| e.outcome == ProbeOutcome::Satisfied)
        {
            RuleStatus::Confirmed
        } else {
            RuleStatus::Unchecked {
                reason: RPC_UNAVAILABLE.to_string(),
            }
        };

        let mut hit = RuleHit::new(rule, status, evidence);
        hit.probe_evidence = probe_evidence;
        hit
    }
}

/// Registered rules, evaluated independently of registration order.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    rules: Vec<Rule>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in heuristic library.
    pub fn builtin() -> Result<Self, regex::Error> {
        let mut registry = Self::new();
        for rule in builtin::rules()? {
            registry.register(rule);
        }
        Ok(registry)
    }

    /// Add a rule. A rule with an existing id replaces the old one.
    pub fn register(&mut self, rule: Rule) {
        match self.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Triggered static rules keyed by id.
    pub fn evaluate_static(&self, corpus: &SourceCorpus) -> BTreeMap<String, RuleHit> {
        self.rules
            .iter()
            .filter(|rule| !rule.is_hybrid())
            .filter_map(|rule| {
                let evidence = rule.predicate.evaluate(corpus);
                (!evidence.is_empty())
                    .then(|| (rule.id.clone(), RuleHit::new(rule, RuleStatus::Static, evidence)))
            })
            .collect()
    }

    /// Hybrid rules whose text predicate matched, sorted by id.
    pub fn hybrid_candidates(&self, corpus: &SourceCorpus) -> Vec<HybridCandidate<'_>> {
        let mut candidates: Vec<HybridCandidate<'_>> = self
            .rules
            .iter()
            .filter(|rule| rule.is_hybrid())
            .filter_map(|rule| {
                let evidence = rule.predicate.evaluate(corpus);
                (!evidence.is_empty()).then_some(HybridCandidate { rule, evidence })
            })
            .collect();
        candidates.sort_by(|a, b| a.rule.id.cmp(&b.rule.id));
        candidates
    }
}

/// Weighted sum of a hit set's static contributions.
pub fn static_score(hits: &BTreeMap<String, RuleHit>) -> u32 {
    hits.values().map(RuleHit::static_weight).sum()
}

/// Weighted sum of a hit set's total contributions.
pub fn total_score(hits: &BTreeMap<String, RuleHit>) -> u32 {
    hits.values().map(RuleHit::total_weight).sum()
}
