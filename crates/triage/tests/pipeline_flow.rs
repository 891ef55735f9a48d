//! End-to-end: batch scan, ranking, JSON and SQLite persistence.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use contract_triage::abi::selector;
use contract_triage::config::TriageConfig;
use contract_triage::report::TriageReport;
use contract_triage::rules::RuleStatus;
use contract_triage::source::{SourceLookup, SourceRegistry, VerifiedSource};
use contract_triage::storage::{FindingSink, JsonFileSink, SqliteFindingStore};
use contract_triage::verifier::{CallRequest, ChainRpc, SimOutcome};
use contract_triage::{Classification, ContractTarget, RpcError, TriagePipeline};
use ethereum_types::{Address, H256, U256};
use tokio_util::sync::CancellationToken;

const OWNABLE: &str = r#"pragma solidity ^0.6.0;
contract Ownable {
    address public owner;
    uint public total;

    function setOwner(address newOwner) public {
        owner = newOwner;
    }

    function deposit() public payable {
        total += msg.value;
    }
}
"#;

#[derive(Default)]
struct Account {
    balance: U256,
    gas: HashMap<[u8; 4], u64>,
    echo_gas: Option<u64>,
}

#[derive(Default)]
struct ScriptedChain {
    accounts: HashMap<Address, Account>,
}

#[async_trait]
impl ChainRpc for ScriptedChain {
    async fn block_number(&self) -> Result<u64, RpcError> {
        Ok(18_000_000)
    }

    async fn get_balance(&self, address: Address, _block: u64) -> Result<U256, RpcError> {
        Ok(self
            .accounts
            .get(&address)
            .map(|a| a.balance)
            .unwrap_or_default())
    }

    async fn get_code(&self, address: Address, _block: u64) -> Result<Bytes, RpcError> {
        let len = if self.accounts.contains_key(&address) { 900 } else { 0 };
        Ok(Bytes::from(vec![0x5b; len]))
    }

    async fn get_storage_at(
        &self,
        _address: Address,
        _slot: H256,
        _block: u64,
    ) -> Result<U256, RpcError> {
        Ok(U256::zero())
    }

    async fn call(&self, _request: &CallRequest, _block: u64) -> Result<SimOutcome<Bytes>, RpcError> {
        Ok(SimOutcome::Reverted("unsupported".to_string()))
    }

    async fn estimate_gas(
        &self,
        request: &CallRequest,
        _block: u64,
    ) -> Result<SimOutcome<u64>, RpcError> {
        let Some(account) = self.accounts.get(&request.to) else {
            return Ok(SimOutcome::Reverted("no code".to_string()));
        };
        if let Some(gas) = account.echo_gas {
            return Ok(SimOutcome::Success(gas));
        }
        let mut sel = [0u8; 4];
        sel.copy_from_slice(&request.data[..4]);
        Ok(match account.gas.get(&sel) {
            Some(gas) => SimOutcome::Success(*gas),
            None => SimOutcome::Reverted("function not found".to_string()),
        })
    }
}

struct StaticRegistry {
    verified: Vec<Address>,
}

#[async_trait]
impl SourceRegistry for StaticRegistry {
    async fn get_verified_source(
        &self,
        address: Address,
        _chain_id: u64,
    ) -> Result<SourceLookup, RpcError> {
        if !self.verified.contains(&address) {
            return Ok(SourceLookup::NotVerified);
        }
        Ok(SourceLookup::Verified(VerifiedSource {
            raw_payload: OWNABLE.to_string(),
            contract_name: "Ownable".to_string(),
            compiler_version: "v0.6.12+commit.27d51765".to_string(),
        }))
    }
}

fn eth(n: u64) -> U256 {
    U256::from(n) * U256::exp10(18)
}

fn setup() -> (TriagePipeline, Vec<ContractTarget>) {
    let open = Address::from_low_u64_be(0xa1);
    let echo = Address::from_low_u64_be(0xb2);
    let unverified = Address::from_low_u64_be(0xc3);

    let mut chain = ScriptedChain::default();
    chain.accounts.insert(
        open,
        Account {
            balance: eth(10),
            gas: HashMap::from([
                (selector("owner()"), 24_000),
                (selector("setOwner(address)"), 45_000),
            ]),
            echo_gas: None,
        },
    );
    chain.accounts.insert(
        echo,
        Account {
            balance: eth(500),
            echo_gas: Some(30_000),
            ..Default::default()
        },
    );
    let registry = StaticRegistry {
        verified: vec![open, echo],
    };

    let pipeline =
        TriagePipeline::new(Arc::new(chain), Arc::new(registry), &TriageConfig::default()).unwrap();
    let targets = vec![
        ContractTarget::new(unverified, eth(1_000), 1),
        ContractTarget::new(echo, eth(500), 1),
        ContractTarget::new(open, eth(10), 1),
    ];
    (pipeline, targets)
}

#[tokio::test]
async fn batch_scan_ranks_and_persists() {
    let (pipeline, targets) = setup();
    let run = pipeline
        .run(targets, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!run.cancelled);
    let report = run.report;
    assert_eq!(report.block_number, 18_000_000);

    let classes: Vec<Classification> = report.findings.iter().map(|f| f.classification).collect();
    assert_eq!(
        classes,
        vec![
            Classification::ExploitValidated,
            Classification::Static,
            Classification::SourceUnverified,
        ]
    );

    let validated = &report.findings[0];
    assert_eq!(
        validated.triggered_rules["unprotected-owner-setter"].status,
        RuleStatus::Confirmed
    );
    assert_eq!(validated.triggered_rules["unchecked-arithmetic"].status, RuleStatus::Static);
    assert_eq!(validated.total_score, 9);
    let econ = validated.economics.as_ref().unwrap();
    assert_eq!(econ.gas_used, 95_000);
    assert!(!econ.uneconomical);

    let downgraded = &report.findings[1];
    assert!(matches!(
        downgraded.triggered_rules["unprotected-owner-setter"].status,
        RuleStatus::Downgraded { .. }
    ));
    assert_eq!(downgraded.static_score, 9);
    assert!(downgraded.exploits.is_empty());

    let dir = tempfile::tempdir().unwrap();
    let json_path = dir.path().join("findings.json");
    JsonFileSink::new(&json_path).write_report(&report).await.unwrap();
    let reloaded = TriageReport::from_json(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(reloaded, report);

    let store = SqliteFindingStore::open(dir.path().join("findings.sqlite")).unwrap();
    store.write_report(&report).await.unwrap();
    let run_id = store.latest_run_id().unwrap().unwrap();
    let rows = store.list_findings(run_id).unwrap();
    let stored: Vec<&str> = rows.iter().map(|r| r.classification.as_str()).collect();
    assert_eq!(stored, vec!["exploit_validated", "static", "source_unverified"]);
    assert_eq!(store.load_report(run_id).unwrap().unwrap(), report);
}

#[tokio::test]
async fn markdown_lists_every_finding() {
    let (pipeline, targets) = setup();
    let report = pipeline
        .scan_batch(targets, 18_000_000, &CancellationToken::new())
        .await
        .report;
    let md = report.to_markdown();
    assert!(md.contains("| Exploit validated | 1 |"));
    assert!(md.contains("unprotected-owner-takeover"));
    assert!(md.contains("downgraded (echo_like)"));
    assert!(md.contains("`0x00000000000000000000000000000000000000c3`"));
}
