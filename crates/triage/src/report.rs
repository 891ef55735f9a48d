//! Ranked findings report (JSON + Markdown).

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::exploit::TemplateState;
use crate::rules::RuleStatus;
use crate::types::{Classification, Finding, wei_to_eth};

/// Total order over findings: classification, score, declared balance
/// (all descending), then address ascending.
pub fn compare_findings(a: &Finding, b: &Finding) -> Ordering {
    b.classification
        .rank()
        .cmp(&a.classification.rank())
        .then_with(|| b.total_score.cmp(&a.total_score))
        .then_with(|| b.target.declared_balance.cmp(&a.target.declared_balance))
        .then_with(|| a.target.address.cmp(&b.target.address))
}

pub fn rank_findings(findings: &mut [Finding]) {
    findings.sort_by(compare_findings);
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub exploit_validated: usize,
    pub confirmed: usize,
    pub static_only: usize,
    pub source_unverified: usize,
    /// Targets dropped by the minimum-balance pre-filter.
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageReport {
    pub block_number: u64,
    pub summary: ReportSummary,
    /// Findings in rank order.
    pub findings: Vec<Finding>,
}

impl TriageReport {
    pub fn build(block_number: u64, mut findings: Vec<Finding>, skipped: usize) -> Self {
        rank_findings(&mut findings);
        let count = |c: Classification| findings.iter().filter(|f| f.classification == c).count();
        let summary = ReportSummary {
            total: findings.len(),
            exploit_validated: count(Classification::ExploitValidated),
            confirmed: count(Classification::Confirmed),
            static_only: count(Classification::Static),
            source_unverified: count(Classification::SourceUnverified),
            skipped,
        };
        Self {
            block_number,
            summary,
            findings,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str("# Contract Triage Report\n\n");
        md.push_str(&format!("**Block**: {}\n", self.block_number));
        md.push_str(&format!("**Targets reported**: {}\n", self.summary.total));
        md.push_str(&format!(
            "**Skipped below balance cutoff**: {}\n\n",
            self.summary.skipped
        ));

        md.push_str("## Summary\n\n");
        md.push_str("| Classification | Count |\n|----------------|-------|\n");
        md.push_str(&format!(
            "| Exploit validated | {} |\n",
            self.summary.exploit_validated
        ));
        md.push_str(&format!("| Confirmed | {} |\n", self.summary.confirmed));
        md.push_str(&format!("| Static | {} |\n", self.summary.static_only));
        md.push_str(&format!(
            "| Source unverified | {} |\n\n",
            self.summary.source_unverified
        ));

        md.push_str("## Ranking\n\n");
        if self.findings.is_empty() {
            md.push_str("No findings.\n\n");
            return md;
        }
        md.push_str("| # | Address | Classification | Score | Balance (ETH) | Net profit (ETH) |\n");
        md.push_str("|---|---------|----------------|-------|---------------|------------------|\n");
        for (i, f) in self.findings.iter().enumerate() {
            let profit = f
                .economics
                .as_ref()
                .map(|e| format!("{:.4}", e.net_profit as f64 / 1e18))
                .unwrap_or_else(|| "-".to_string());
            md.push_str(&format!(
                "| {} | `0x{:x}` | {:?} | {} | {:.4} | {} |\n",
                i + 1,
                f.target.address,
                f.classification,
                f.total_score,
                wei_to_eth(f.target.declared_balance),
                profit
            ));
        }
        md.push('\n');

        md.push_str("## Details\n\n");
        for f in &self.findings {
            md.push_str(&format_finding_detail(f));
        }
        md
    }
}

fn format_finding_detail(f: &Finding) -> String {
    let mut md = format!("### `0x{:x}`\n\n", f.target.address);
    md.push_str(&format!(
        "- **Classification**: {:?} (score {}, static {})\n",
        f.classification, f.total_score, f.static_score
    ));
    if let Some(echo) = &f.echo {
        let variance = echo
            .gas_variance_pct
            .map(|v| format!("{v:.1}%"))
            .unwrap_or_else(|| "n/a".to_string());
        md.push_str(&format!(
            "- **Echo check**: {:?}, gas variance {variance}\n",
            echo.class
        ));
    }
    for a in &f.annotations {
        md.push_str(&format!("- **{:?}**: {}\n", a.kind, a.detail));
    }
    md.push('\n');

    for hit in f.triggered_rules.values() {
        let status = match &hit.status {
            RuleStatus::Static => "static".to_string(),
            RuleStatus::Confirmed => "CONFIRMED".to_string(),
            RuleStatus::Downgraded { reason } => format!("downgraded ({reason})"),
            RuleStatus::Refuted => "refuted".to_string(),
            RuleStatus::Unchecked { reason } => format!("unchecked ({reason})"),
        };
        md.push_str(&format!(
            "- `{}` [{}] weight {}: {}\n",
            hit.rule_id,
            hit.category.as_str(),
            hit.weight,
            status
        ));
        for span in &hit.evidence {
            md.push_str(&format!(
                "  - {}:{} `{}`\n",
                span.file, span.line, span.snippet
            ));
        }
        for probe in &hit.probe_evidence {
            md.push_str(&format!(
                "  - probe {} -> {:?}: {}\n",
                probe.probe, probe.outcome, probe.detail
            ));
        }
    }

    for outcome in &f.exploits {
        let state = match &outcome.state {
            TemplateState::Rejected { step, reason } => format!("rejected at step {step}: {reason}"),
            TemplateState::Incomplete { step, reason } => {
                format!("incomplete at step {step}: {reason}")
            }
            other => format!("{other:?}"),
        };
        md.push_str(&format!("- template `{}`: {state}\n", outcome.template_id));
        if let Some(e) = &outcome.economics {
            md.push_str(&format!(
                "  - gross {:.4} ETH, gas {} ({:.6} ETH), net {:.4} ETH{}\n",
                wei_to_eth(e.gross_value),
                e.gas_used,
                wei_to_eth(e.gas_cost),
                e.net_profit as f64 / 1e18,
                if e.uneconomical { ", uneconomical" } else { "" }
            ));
        }
    }
    md.push('\n');
    md
}
