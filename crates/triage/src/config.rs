//! TOML-compatible configuration for a triage run.
//!
//! Operator-facing primitives (floats, strings, integers) are used instead of
//! domain types so the file stays readable; the `to_*` helpers convert.
//!
//! ```toml
//! [rpc]
//! url = "http://localhost:8545"
//!
//! [scan]
//! concurrency = 8
//! min_balance_eth = 20.0
//!
//! [echo]
//! variance_threshold_pct = 15.0
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ethereum_types::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::abi::parse_selector;
use crate::echo::EchoConfig;
use crate::rate_limit::RateLimiter;
use crate::rules::ProbeContext;
use crate::types::eth_to_wei;
use crate::verifier::rpc_client::RpcConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    pub rpc: RpcSection,
    pub registry: RegistrySection,
    pub rate_limit: RateLimitSection,
    pub scan: ScanSection,
    pub echo: EchoSection,
    pub callable: CallableSection,
    pub economics: EconomicsSection,
    pub report: ReportSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcSection {
    pub url: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
}

impl Default for RpcSection {
    fn default() -> Self {
        Self {
            url: "http://localhost:8545".to_string(),
            timeout_secs: 30,
            connect_timeout_secs: 10,
            max_retries: 3,
            base_backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    pub base_url: String,
    pub api_key: String,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            base_url: "https://api.etherscan.io/v2/api".to_string(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    /// Shared across the chain RPC and registry clients.
    pub requests_per_second: f64,
    pub burst: u32,
    /// Pause after a request exhausts its retries on HTTP 429.
    pub cooldown_secs: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            requests_per_second: 5.0,
            burst: 5,
            cooldown_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSection {
    pub concurrency: usize,
    /// Pinned block height. `None` resolves the latest block once per run.
    pub block: Option<u64>,
    pub chain_id: u64,
    /// Targets declared below this balance are skipped.
    pub min_balance_eth: f64,
    /// Address with no privileged relationship to any target.
    pub probe_caller: String,
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            concurrency: 4,
            block: None,
            chain_id: 1,
            min_balance_eth: 0.0,
            probe_caller: "0x00000000000000000000000000000000deadbeef".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoSection {
    pub variance_threshold_pct: f64,
    pub known_selectors: Vec<String>,
    pub random_selectors: Vec<String>,
}

impl Default for EchoSection {
    fn default() -> Self {
        let defaults = EchoConfig::default();
        Self {
            variance_threshold_pct: defaults.variance_threshold_pct,
            known_selectors: defaults.known_signatures,
            random_selectors: defaults
                .random_selectors
                .iter()
                .map(|s| format!("0x{}", hex::encode(s)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallableSection {
    pub min_gas: u64,
    pub max_gas: u64,
}

impl Default for CallableSection {
    fn default() -> Self {
        Self {
            min_gas: 21_000,
            max_gas: 500_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomicsSection {
    pub gas_price_gwei: f64,
}

impl Default for EconomicsSection {
    fn default() -> Self {
        Self {
            gas_price_gwei: 50.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSection {
    pub json_path: Option<PathBuf>,
    pub markdown_path: Option<PathBuf>,
    pub sqlite_path: Option<PathBuf>,
}

impl TriageConfig {
    /// Validate configuration values, returning an error message on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.rpc.url.trim().is_empty() {
            return Err("rpc.url must not be empty".to_string());
        }
        if self.rpc.timeout_secs == 0 {
            return Err("rpc.timeout_secs must be > 0".to_string());
        }
        let rps = self.rate_limit.requests_per_second;
        if rps.is_nan() || rps <= 0.0 {
            return Err(format!(
                "rate_limit.requests_per_second must be > 0, got {}",
                self.rate_limit.requests_per_second
            ));
        }
        if self.rate_limit.burst == 0 {
            return Err("rate_limit.burst must be > 0".to_string());
        }
        if self.scan.concurrency == 0 {
            return Err("scan.concurrency must be > 0".to_string());
        }
        if self.scan.min_balance_eth < 0.0 {
            return Err(format!(
                "scan.min_balance_eth must be non-negative, got {}",
                self.scan.min_balance_eth
            ));
        }
        parse_address(&self.scan.probe_caller)
            .map_err(|e| format!("scan.probe_caller: {e}"))?;
        let threshold = self.echo.variance_threshold_pct;
        if threshold.is_nan() || threshold <= 0.0 || threshold > 100.0 {
            return Err(format!(
                "echo.variance_threshold_pct must be in (0, 100], got {threshold}"
            ));
        }
        for sel in &self.echo.random_selectors {
            if parse_selector(sel).is_none() {
                return Err(format!("echo.random_selectors: invalid selector {sel}"));
            }
        }
        if self.echo.known_selectors.len() + self.echo.random_selectors.len() < 2 {
            return Err("echo needs at least 2 probe selectors in total".to_string());
        }
        if self.callable.min_gas >= self.callable.max_gas {
            return Err(format!(
                "callable.min_gas ({}) must be below callable.max_gas ({})",
                self.callable.min_gas, self.callable.max_gas
            ));
        }
        if self.economics.gas_price_gwei < 0.0 {
            return Err(format!(
                "economics.gas_price_gwei must be non-negative, got {}",
                self.economics.gas_price_gwei
            ));
        }
        Ok(())
    }

    pub fn to_rpc_config(&self) -> RpcConfig {
        RpcConfig {
            timeout: Duration::from_secs(self.rpc.timeout_secs),
            connect_timeout: Duration::from_secs(self.rpc.connect_timeout_secs),
            max_retries: self.rpc.max_retries,
            base_backoff: Duration::from_millis(self.rpc.base_backoff_ms),
        }
    }

    pub fn to_rate_limiter(&self) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(
            self.rate_limit.requests_per_second,
            self.rate_limit.burst,
            Duration::from_secs(self.rate_limit.cooldown_secs),
        ))
    }

    pub fn probe_caller(&self) -> Address {
        parse_address(&self.scan.probe_caller).unwrap_or_default()
    }

    pub fn to_echo_config(&self) -> EchoConfig {
        EchoConfig {
            variance_threshold_pct: self.echo.variance_threshold_pct,
            known_signatures: self.echo.known_selectors.clone(),
            random_selectors: self
                .echo
                .random_selectors
                .iter()
                .filter_map(|s| parse_selector(s))
                .collect(),
            caller: Some(self.probe_caller()),
        }
    }

    pub fn to_probe_context(&self) -> ProbeContext {
        ProbeContext {
            caller: self.probe_caller(),
            min_gas: self.callable.min_gas,
            max_gas: self.callable.max_gas,
        }
    }

    pub fn gas_price_wei(&self) -> U256 {
        let gwei = self.economics.gas_price_gwei.max(0.0);
        U256::from((gwei * 1_000_000_000.0).round() as u128)
    }

    pub fn min_balance_wei(&self) -> U256 {
        eth_to_wei(self.scan.min_balance_eth)
    }
}

/// Parse a `0x`-prefixed 20-byte hex address.
pub fn parse_address(s: &str) -> Result<Address, String> {
    let body = s.trim();
    let body = body.strip_prefix("0x").unwrap_or(body);
    let bytes = hex::decode(body).map_err(|e| format!("invalid address {s}: {e}"))?;
    if bytes.len() != 20 {
        return Err(format!("invalid address {s}: expected 20 bytes, got {}", bytes.len()));
    }
    Ok(Address::from_slice(&bytes))
}

/// Load configuration from a TOML file.
///
/// If `path` is `None`, returns the default config.
pub fn load_config(path: Option<&Path>) -> Result<TriageConfig, String> {
    let Some(path) = path else {
        return Ok(TriageConfig::default());
    };

    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config from {}: {}", path.display(), e))?;
    let config: TriageConfig =
        toml::from_str(&contents).map_err(|e| format!("Failed to parse TOML config: {e}"))?;
    config.validate()?;
    Ok(config)
}

/// Values supplied on the command line. CLI flags take precedence over TOML.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub rpc_url: Option<String>,
    pub api_key: Option<String>,
    pub block: Option<u64>,
    pub concurrency: Option<usize>,
    pub out_dir: Option<PathBuf>,
}

pub fn merge_cli_overrides(config: &TriageConfig, cli: &CliOverrides) -> TriageConfig {
    let mut merged = config.clone();

    if let Some(url) = &cli.rpc_url {
        merged.rpc.url = url.clone();
    }
    if let Some(key) = &cli.api_key {
        merged.registry.api_key = key.clone();
    }
    if let Some(block) = cli.block {
        merged.scan.block = Some(block);
    }
    if let Some(concurrency) = cli.concurrency {
        merged.scan.concurrency = concurrency;
    }
    if let Some(dir) = &cli.out_dir {
        merged.report.json_path = Some(dir.join("findings.json"));
        merged.report.markdown_path = Some(dir.join("findings.md"));
        merged.report.sqlite_path = Some(dir.join("findings.sqlite"));
    }

    merged
}
