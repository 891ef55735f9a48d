//! Per-target triage pipeline and the bounded-concurrency batch driver.
//!
//! One target runs its stages strictly in order: source, static rules, echo
//! gate, hybrid rules, exploit templates. Only independent fact queries
//! within a stage overlap. Targets share nothing but the collaborators and
//! their rate limiter.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use ethereum_types::U256;
use futures::{StreamExt, stream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TriageConfig;
use crate::echo::{self, EchoClass, EchoConfig, EchoVerdict};
use crate::error::TriageError;
use crate::exploit::{self, ExploitTemplate, TemplateOutcome, builtin_templates};
use crate::report::TriageReport;
use crate::rules::{self, FactMap, ProbeContext, RuleHit, RuleRegistry, RuleStatus};
use crate::source::{SourceCorpus, SourceLookup, SourceRegistry, normalize};
use crate::types::{Annotation, AnnotationKind, Classification, ContractTarget, Finding, SourceStatus};
use crate::verifier::{ChainRpc, FactKey, OnChainVerifier};

/// Outcome of a batch scan.
#[derive(Debug, Clone)]
pub struct ScanRun {
    pub report: TriageReport,
    /// The run stopped early. Targets still in flight were discarded.
    pub cancelled: bool,
}

pub struct TriagePipeline {
    rpc: Arc<dyn ChainRpc>,
    registry: Arc<dyn SourceRegistry>,
    rules: RuleRegistry,
    templates: Vec<ExploitTemplate>,
    echo: EchoConfig,
    probe: ProbeContext,
    gas_price: U256,
    min_balance: U256,
    concurrency: usize,
    pinned_block: Option<u64>,
}

impl TriagePipeline {
    /// Pipeline with the built-in rules and templates.
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        registry: Arc<dyn SourceRegistry>,
        config: &TriageConfig,
    ) -> Result<Self, TriageError> {
        config.validate().map_err(TriageError::Config)?;
        let rules = RuleRegistry::builtin()
            .map_err(|e| TriageError::Config(format!("built-in rule pattern: {e}")))?;
        Ok(Self {
            rpc,
            registry,
            rules,
            templates: builtin_templates(),
            echo: config.to_echo_config(),
            probe: config.to_probe_context(),
            gas_price: config.gas_price_wei(),
            min_balance: config.min_balance_wei(),
            concurrency: config.scan.concurrency.max(1),
            pinned_block: config.scan.block,
        })
    }

    pub fn with_templates(mut self, templates: Vec<ExploitTemplate>) -> Self {
        self.templates = templates;
        self
    }

    /// Block height for the whole run: the configured one, or latest.
    pub async fn resolve_block(&self) -> Result<u64, TriageError> {
        match self.pinned_block {
            Some(block) => Ok(block),
            None => Ok(self.rpc.block_number().await?),
        }
    }

    /// Resolve the block, then scan every target at it.
    pub async fn run(
        &self,
        targets: Vec<ContractTarget>,
        cancel: &CancellationToken,
    ) -> Result<ScanRun, TriageError> {
        let block = self.resolve_block().await?;
        info!(block, targets = targets.len(), "starting scan");
        Ok(self.scan_batch(targets, block, cancel).await)
    }

    /// Scan targets with at most `concurrency` in flight.
    ///
    /// Duplicate addresses are scanned once. Targets declared below the
    /// minimum balance are skipped and only counted.
    pub async fn scan_batch(
        &self,
        targets: Vec<ContractTarget>,
        block: u64,
        cancel: &CancellationToken,
    ) -> ScanRun {
        let mut seen = HashSet::new();
        let mut eligible = Vec::new();
        let mut skipped = 0;
        for target in targets {
            if !seen.insert(target.address) {
                debug!(target_address = %target.address, "duplicate target ignored");
                continue;
            }
            if target.declared_balance < self.min_balance {
                debug!(target_address = %target.address, "below minimum balance, skipped");
                skipped += 1;
                continue;
            }
            eligible.push(target);
        }

        let mut pending = stream::iter(eligible)
            .map(move |target| async move { self.scan_target(&target, block).await })
            .buffer_unordered(self.concurrency);

        let mut findings = Vec::new();
        let mut cancelled = false;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                next = pending.next() => match next {
                    Some(finding) => findings.push(finding),
                    None => break,
                },
            }
        }
        if cancelled {
            warn!(completed = findings.len(), "scan cancelled, in-flight targets discarded");
        }

        ScanRun {
            report: TriageReport::build(block, findings, skipped),
            cancelled,
        }
    }

    /// Run every stage for one target. Never fails: collaborator faults end up
    /// as annotations and unavailable facts on the finding.
    pub async fn scan_target(&self, target: &ContractTarget, block: u64) -> Finding {
        info!(target_address = %target.address, block, "scanning target");
        let verifier = OnChainVerifier::new(self.rpc.clone(), target.address, block);
        let mut annotations = Vec::new();

        verifier.facts(&[FactKey::Balance, FactKey::Code]).await;

        let (source, corpus) = self.load_source(target, &mut annotations).await;
        let mut hits = BTreeMap::new();
        let mut echo_verdict = None;
        let mut exploits = Vec::new();

        if let Some(corpus) = &corpus {
            hits = self.rules.evaluate_static(corpus);

            let candidates = self.rules.hybrid_candidates(corpus);
            if !candidates.is_empty() {
                let verdict = echo::classify(&verifier, &self.echo).await;
                match verdict.class {
                    EchoClass::EchoLike => annotations.push(Annotation::new(
                        AnnotationKind::EchoLike,
                        format!(
                            "gas variance {:.1}% below {:.1}%",
                            verdict.gas_variance_pct.unwrap_or_default(),
                            self.echo.variance_threshold_pct
                        ),
                    )),
                    EchoClass::Unclassifiable => annotations.push(Annotation::new(
                        AnnotationKind::EchoUnclassifiable,
                        "fewer than two probes produced a gas estimate",
                    )),
                    EchoClass::Distinct => {}
                }

                let keys: Vec<FactKey> = candidates
                    .iter()
                    .flat_map(|c| c.required_facts(&verdict, &self.probe))
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                let values = verifier.facts(&keys).await;
                let facts: FactMap = keys.into_iter().zip(values).collect();

                for candidate in &candidates {
                    let hit = candidate.evaluate(&facts, &verdict, &self.probe);
                    debug!(target_address = %target.address, rule = %hit.rule_id, status = ?hit.status, "hybrid rule");
                    hits.insert(hit.rule_id.clone(), hit);
                }

                exploits = self
                    .run_templates(&verifier, &hits, &verdict, &mut annotations)
                    .await;
                echo_verdict = Some(verdict);
            }
        }

        let facts = verifier.snapshot();
        let unavailable: Vec<String> = facts
            .iter()
            .filter(|f| f.value.is_unavailable())
            .map(|f| format!("{:?}", f.kind))
            .collect();
        if !unavailable.is_empty() {
            annotations.push(Annotation::new(
                AnnotationKind::RpcUnavailable,
                format!("{} fact(s) unavailable: {}", unavailable.len(), unavailable.join(", ")),
            ));
        }

        let classification = classify(corpus.is_some(), &hits, &exploits);
        let economics = exploits
            .iter()
            .filter_map(|o| o.economics.clone())
            .max_by_key(|e| e.net_profit);

        let finding = Finding {
            target: target.clone(),
            block_number: block,
            classification,
            total_score: rules::total_score(&hits),
            static_score: rules::static_score(&hits),
            source,
            triggered_rules: hits,
            echo: echo_verdict,
            exploits,
            economics,
            facts,
            annotations,
        };
        info!(
            target_address = %target.address,
            classification = ?finding.classification,
            score = finding.total_score,
            rules = finding.triggered_rules.len(),
            "target done"
        );
        finding
    }

    async fn load_source(
        &self,
        target: &ContractTarget,
        annotations: &mut Vec<Annotation>,
    ) -> (SourceStatus, Option<SourceCorpus>) {
        let lookup = self
            .registry
            .get_verified_source(target.address, target.chain_id)
            .await;
        let verified = match lookup {
            Ok(SourceLookup::Verified(verified)) => verified,
            Ok(SourceLookup::NotVerified) => {
                annotations.push(Annotation::new(
                    AnnotationKind::SourceUnverified,
                    "registry has no verified source",
                ));
                return (SourceStatus::Unverified, None);
            }
            Err(e) => {
                warn!(target_address = %target.address, error = %e, "source registry unavailable");
                annotations.push(Annotation::new(
                    AnnotationKind::RpcUnavailable,
                    format!("source registry: {e}"),
                ));
                return (
                    SourceStatus::RegistryUnavailable {
                        reason: e.to_string(),
                    },
                    None,
                );
            }
        };

        let corpus = normalize(
            &verified.raw_payload,
            &verified.contract_name,
            &verified.compiler_version,
        );
        for warning in &corpus.parse_warnings {
            annotations.push(Annotation::new(AnnotationKind::ParseAmbiguous, warning.clone()));
        }
        if corpus.is_empty() {
            annotations.push(Annotation::new(
                AnnotationKind::NoSource,
                "verified record has an empty source corpus",
            ));
            return (SourceStatus::NoSource, None);
        }

        let status = SourceStatus::Verified {
            contract_name: corpus.contract_name.clone(),
            compiler_version: corpus.compiler_version.clone(),
            file_count: corpus.file_count(),
        };
        (status, Some(corpus))
    }

    /// Replay templates whose trigger rule was confirmed on a distinct target.
    async fn run_templates(
        &self,
        verifier: &OnChainVerifier,
        hits: &BTreeMap<String, RuleHit>,
        echo: &EchoVerdict,
        annotations: &mut Vec<Annotation>,
    ) -> Vec<TemplateOutcome> {
        let mut outcomes = Vec::new();
        for template in &self.templates {
            let Some(hit) = hits.get(&template.trigger_rule) else {
                continue;
            };
            if !hit.is_confirmed() {
                continue;
            }
            if echo.class != EchoClass::Distinct {
                annotations.push(Annotation::new(
                    AnnotationKind::TemplateSkipped,
                    format!("{}: target is not distinct from an echo proxy", template.id),
                ));
                continue;
            }
            let outcome =
                exploit::validate(template, verifier, self.probe.caller, self.gas_price).await;
            debug!(
                target_address = %verifier.target(),
                template = %template.id,
                state = ?outcome.state,
                "template finished"
            );
            outcomes.push(outcome);
        }
        outcomes
    }
}

fn classify(
    has_source: bool,
    hits: &BTreeMap<String, RuleHit>,
    exploits: &[TemplateOutcome],
) -> Classification {
    if !has_source {
        Classification::SourceUnverified
    } else if exploits.iter().any(TemplateOutcome::is_validated) {
        Classification::ExploitValidated
    } else if hits.values().any(|h| h.status == RuleStatus::Confirmed) {
        Classification::Confirmed
    } else {
        Classification::Static
    }
}
