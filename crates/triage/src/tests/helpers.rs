//! Scripted collaborators shared by the scenario tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use ethereum_types::{Address, H256, U256};

use crate::abi::selector;
use crate::config::TriageConfig;
use crate::error::RpcError;
use crate::pipeline::TriagePipeline;
use crate::source::{SourceLookup, SourceRegistry, VerifiedSource};
use crate::types::ContractTarget;
use crate::verifier::{CallRequest, ChainRpc, EIP1967_IMPLEMENTATION_SLOT, SimOutcome};

pub const BLOCK: u64 = 4_000_000;
pub const WALLET_ADDR: u64 = 0x5a11e7;

pub fn eth(n: u64) -> U256 {
    U256::from(n) * U256::exp10(18)
}

pub fn addr(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

pub fn target(n: u64, balance_eth: u64) -> ContractTarget {
    ContractTarget::new(addr(n), eth(balance_eth), 1)
}

/// Parity-style wallet library that was never initialized.
pub const WALLET_LIBRARY: &str = r#"pragma solidity ^0.4.9;
contract WalletLibrary {
    uint public m_numOwners;
    function initWallet(address[] _owners, uint _required, uint _daylimit) {
        initDaylimit(_daylimit);
        initMultiowned(_owners, _required);
    }
    function execute(address _to, uint _value, bytes _data) external onlymanyowners(sha3(msg.data)) returns (bytes32 o_hash) {
        _to.call.value(_value)(_data);
    }
}
"#;

/// Verified source with no heuristic hits.
pub const PLAIN_TOKEN: &str = r#"pragma solidity 0.8.19;
contract Token {
    mapping(address => uint256) public balanceOf;
    function transfer(address to, uint256 amount) external returns (bool) {
        balanceOf[msg.sender] = balanceOf[msg.sender] - amount;
        balanceOf[to] = balanceOf[to] + amount;
        return true;
    }
}
"#;

/// In-memory chain keyed by (address, selector), logging every query.
#[derive(Default)]
pub struct MockChain {
    latest: u64,
    balances: HashMap<Address, U256>,
    code: HashMap<Address, Bytes>,
    storage: HashMap<(Address, H256), U256>,
    gas: HashMap<(Address, [u8; 4]), SimOutcome<u64>>,
    calls: HashMap<(Address, [u8; 4]), SimOutcome<Bytes>>,
    /// Every selector estimates to this gas, like a delegate wallet with a dead library.
    echo_gas: HashMap<Address, u64>,
    failing: HashSet<&'static str>,
    stalled: HashSet<Address>,
    queries: Mutex<Vec<String>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            latest: BLOCK,
            ..Default::default()
        }
    }

    pub fn with_balance(mut self, address: Address, wei: U256) -> Self {
        self.balances.insert(address, wei);
        self
    }

    pub fn with_code_len(mut self, address: Address, len: usize) -> Self {
        self.code.insert(address, Bytes::from(vec![0x60u8; len]));
        self
    }

    pub fn with_storage(self, address: Address, slot: u64, value: U256) -> Self {
        self.with_slot(address, H256::from_low_u64_be(slot), value)
    }

    pub fn with_slot(mut self, address: Address, slot: H256, value: U256) -> Self {
        self.storage.insert((address, slot), value);
        self
    }

    /// Point the target's EIP-1967 implementation slot at `implementation`.
    pub fn with_implementation(self, address: Address, implementation: Address) -> Self {
        let word = U256::from_big_endian(implementation.as_bytes());
        self.with_slot(address, EIP1967_IMPLEMENTATION_SLOT, word)
    }

    pub fn with_gas(mut self, address: Address, signature: &str, gas: u64) -> Self {
        self.gas
            .insert((address, selector(signature)), SimOutcome::Success(gas));
        self
    }

    pub fn with_revert(mut self, address: Address, signature: &str, reason: &str) -> Self {
        self.gas.insert(
            (address, selector(signature)),
            SimOutcome::Reverted(reason.to_string()),
        );
        self
    }

    pub fn with_call_result(mut self, address: Address, signature: &str, word: U256) -> Self {
        let data = word.to_big_endian();
        self.calls.insert(
            (address, selector(signature)),
            SimOutcome::Success(Bytes::copy_from_slice(&data)),
        );
        self
    }

    pub fn echoing(mut self, address: Address, gas: u64) -> Self {
        self.echo_gas.insert(address, gas);
        self
    }

    /// Every request for this JSON-RPC method fails at the transport level.
    pub fn failing(mut self, method: &'static str) -> Self {
        self.failing.insert(method);
        self
    }

    /// Balance queries for this address never complete.
    pub fn stalled(mut self, address: Address) -> Self {
        self.stalled.insert(address);
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.queries()
            .iter()
            .filter(|q| q.starts_with(method))
            .count()
    }

    fn record(&self, method: &'static str, entry: String) -> Result<(), RpcError> {
        self.queries.lock().unwrap().push(format!("{method}:{entry}"));
        if self.failing.contains(method) {
            return Err(RpcError::ConnectionFailed {
                url: "mock://chain".to_string(),
                cause: format!("{method} refused"),
            });
        }
        Ok(())
    }

    fn describe(request: &CallRequest) -> String {
        format!(
            "{:?}:0x{}:{:?}",
            request.to,
            hex::encode(&request.data),
            request.from
        )
    }
}

fn selector_of(data: &[u8]) -> [u8; 4] {
    let mut sel = [0u8; 4];
    if data.len() >= 4 {
        sel.copy_from_slice(&data[..4]);
    }
    sel
}

#[async_trait]
impl ChainRpc for MockChain {
    async fn block_number(&self) -> Result<u64, RpcError> {
        self.record("eth_blockNumber", String::new())?;
        Ok(self.latest)
    }

    async fn get_balance(&self, address: Address, _block: u64) -> Result<U256, RpcError> {
        self.record("eth_getBalance", format!("{address:?}"))?;
        if self.stalled.contains(&address) {
            std::future::pending::<()>().await;
        }
        Ok(self.balances.get(&address).copied().unwrap_or_default())
    }

    async fn get_code(&self, address: Address, _block: u64) -> Result<Bytes, RpcError> {
        self.record("eth_getCode", format!("{address:?}"))?;
        Ok(self.code.get(&address).cloned().unwrap_or_default())
    }

    async fn get_storage_at(
        &self,
        address: Address,
        slot: H256,
        _block: u64,
    ) -> Result<U256, RpcError> {
        self.record("eth_getStorageAt", format!("{address:?}:{slot:?}"))?;
        Ok(self
            .storage
            .get(&(address, slot))
            .copied()
            .unwrap_or_default())
    }

    async fn call(&self, request: &CallRequest, _block: u64) -> Result<SimOutcome<Bytes>, RpcError> {
        self.record("eth_call", Self::describe(request))?;
        Ok(self
            .calls
            .get(&(request.to, selector_of(&request.data)))
            .cloned()
            .unwrap_or_else(|| SimOutcome::Reverted("no such function".to_string())))
    }

    async fn estimate_gas(
        &self,
        request: &CallRequest,
        _block: u64,
    ) -> Result<SimOutcome<u64>, RpcError> {
        self.record("eth_estimateGas", Self::describe(request))?;
        if let Some(gas) = self.echo_gas.get(&request.to) {
            return Ok(SimOutcome::Success(*gas));
        }
        Ok(self
            .gas
            .get(&(request.to, selector_of(&request.data)))
            .cloned()
            .unwrap_or_else(|| SimOutcome::Reverted("no such function".to_string())))
    }
}

#[derive(Default)]
pub struct MockRegistry {
    entries: HashMap<Address, Result<SourceLookup, RpcError>>,
    lookups: AtomicUsize,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, address: Address, source: &str, compiler: &str) -> Self {
        self.entries.insert(
            address,
            Ok(SourceLookup::Verified(VerifiedSource {
                raw_payload: source.to_string(),
                contract_name: "Target".to_string(),
                compiler_version: compiler.to_string(),
            })),
        );
        self
    }

    pub fn with_error(mut self, address: Address) -> Self {
        self.entries.insert(
            address,
            Err(RpcError::HttpError {
                method: "getsourcecode".to_string(),
                status: 503,
                body: "unavailable".to_string(),
            }),
        );
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceRegistry for MockRegistry {
    async fn get_verified_source(
        &self,
        address: Address,
        _chain_id: u64,
    ) -> Result<SourceLookup, RpcError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.entries
            .get(&address)
            .cloned()
            .unwrap_or(Ok(SourceLookup::NotVerified))
    }
}

pub fn test_config() -> TriageConfig {
    let mut config = TriageConfig::default();
    config.scan.block = Some(BLOCK);
    config
}

pub fn pipeline(chain: &Arc<MockChain>, registry: &Arc<MockRegistry>) -> TriagePipeline {
    pipeline_with(chain, registry, &test_config())
}

pub fn pipeline_with(
    chain: &Arc<MockChain>,
    registry: &Arc<MockRegistry>,
    config: &TriageConfig,
) -> TriagePipeline {
    TriagePipeline::new(chain.clone(), registry.clone(), config).unwrap()
}

/// Transparent-style proxy whose upgrade entry point is behind `ifAdmin`.
pub const ADMIN_PROXY: &str = r#"pragma solidity ^0.8.2;
contract AdminProxy is ERC1967Proxy {
    function upgradeTo(address newImplementation) external ifAdmin {
        _upgradeTo(newImplementation);
    }
}
"#;

/// Proxy that lets anyone replace its implementation.
pub const OPEN_PROXY: &str = r#"pragma solidity ^0.8.2;
contract OpenProxy is ERC1967Upgrade {
    function upgradeTo(address newImplementation) external {
        _upgradeTo(newImplementation);
    }
    fallback() external payable {
        _delegate(_getImplementation());
    }
}
"#;

/// A live, non-echo proxy: known selectors cost different gas through the
/// fallback and random selectors revert.
pub fn proxy_chain(address: Address, balance: U256) -> MockChain {
    MockChain::new()
        .with_balance(address, balance)
        .with_code_len(address, 1_500)
        .with_gas(address, "owner()", 24_000)
        .with_gas(address, "setOwner(address)", 52_000)
}

/// A non-echo, uninitialized wallet library: known selectors cost different
/// gas, random selectors revert, slot 0 is empty and `initWallet` is open.
pub fn open_wallet_chain(address: Address, balance: U256) -> MockChain {
    MockChain::new()
        .with_balance(address, balance)
        .with_code_len(address, 2_000)
        .with_gas(address, "owner()", 24_000)
        .with_gas(address, "setOwner(address)", 52_000)
        .with_gas(address, "initWallet(address[],uint256,uint256)", 120_000)
        .with_revert(address, "execute(address,uint256,bytes)", "not an owner")
}
