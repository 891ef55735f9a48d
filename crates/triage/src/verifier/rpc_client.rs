//! Thin JSON-RPC HTTP client for Ethereum archive nodes.
//!
//! Supports configurable timeouts, exponential backoff retry, and
//! rate-limit awareness (HTTP 429 + Retry-After) through the shared
//! [`RateLimiter`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::abi::decode_revert_reason;
use crate::error::RpcError;
use crate::rate_limit::RateLimiter;

use super::chain::{CallRequest, ChainRpc, SimOutcome};

/// Configuration for RPC client behavior.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Per-request timeout (default: 30s).
    pub timeout: Duration,
    /// TCP connect timeout (default: 10s).
    pub connect_timeout: Duration,
    /// Maximum retry attempts for transient errors (default: 3).
    pub max_retries: u32,
    /// Base backoff duration, doubles each retry (default: 1s).
    pub base_backoff: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_retries: 3,
            base_backoff: Duration::from_secs(1),
        }
    }
}

/// Ethereum JSON-RPC client pinned to no particular block; every query names one.
pub struct EthRpcClient {
    http: reqwest::Client,
    url: String,
    config: RpcConfig,
    limiter: Arc<RateLimiter>,
}

impl EthRpcClient {
    pub fn new(url: &str, limiter: Arc<RateLimiter>) -> Self {
        Self::with_config(url, RpcConfig::default(), limiter)
    }

    pub fn with_config(url: &str, config: RpcConfig, limiter: Arc<RateLimiter>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            url: url.to_string(),
            config,
            limiter,
        }
    }

    /// Execute a JSON-RPC call with retry and backoff.
    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });
        debug!(method, "rpc request");
        with_retry(&self.limiter, &self.config, method, || {
            self.rpc_call_once(method, &body)
        })
        .await
    }

    /// Single attempt at an RPC call (no retry).
    async fn rpc_call_once(&self, method: &str, body: &Value) -> Result<Value, RpcError> {
        let response = self
            .http
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RpcError::Timeout {
                        method: method.into(),
                        elapsed_ms: self.config.timeout.as_millis() as u64,
                    }
                } else {
                    RpcError::ConnectionFailed {
                        url: self.url.clone(),
                        cause: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            // Extract Retry-After header for 429 responses
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(|v| format!("retry-after:{v}"))
                .unwrap_or_default();

            let body_text = response.text().await.unwrap_or_default();
            let display_body = if retry_after.is_empty() {
                body_text
            } else {
                retry_after
            };

            return Err(RpcError::HttpError {
                method: method.into(),
                status: status.as_u16(),
                body: display_body,
            });
        }

        let json_response: Value = response.json().await.map_err(|e| RpcError::ParseError {
            method: method.into(),
            field: "response_body".into(),
            cause: e.to_string(),
        })?;

        parse_envelope(method, json_response)
    }

    async fn simulate(
        &self,
        method: &str,
        request: &CallRequest,
        block: u64,
    ) -> Result<SimOutcome<Value>, RpcError> {
        match self
            .rpc_call(method, json!([call_object(request), block_tag(block)]))
            .await
        {
            Ok(value) => Ok(SimOutcome::Success(value)),
            Err(err) => revert_reason(err).map(SimOutcome::Reverted),
        }
    }
}

#[async_trait]
impl ChainRpc for EthRpcClient {
    async fn block_number(&self) -> Result<u64, RpcError> {
        let result = self.rpc_call("eth_blockNumber", json!([])).await?;
        parse_u64(&result)
    }

    async fn get_balance(&self, address: Address, block: u64) -> Result<U256, RpcError> {
        let result = self
            .rpc_call(
                "eth_getBalance",
                json!([format!("0x{address:x}"), block_tag(block)]),
            )
            .await?;
        parse_u256(&result)
    }

    async fn get_code(&self, address: Address, block: u64) -> Result<Bytes, RpcError> {
        let result = self
            .rpc_call(
                "eth_getCode",
                json!([format!("0x{address:x}"), block_tag(block)]),
            )
            .await?;
        let hex_str = result
            .as_str()
            .ok_or_else(|| RpcError::parse("eth_getCode", "result", "expected string"))?;
        hex_decode(hex_str).map(Bytes::from)
    }

    async fn get_storage_at(
        &self,
        address: Address,
        slot: H256,
        block: u64,
    ) -> Result<U256, RpcError> {
        let result = self
            .rpc_call(
                "eth_getStorageAt",
                json!([
                    format!("0x{address:x}"),
                    format!("0x{slot:x}"),
                    block_tag(block)
                ]),
            )
            .await?;
        parse_u256(&result)
    }

    async fn call(&self, request: &CallRequest, block: u64) -> Result<SimOutcome<Bytes>, RpcError> {
        match self.simulate("eth_call", request, block).await? {
            SimOutcome::Success(value) => {
                let hex_str = value
                    .as_str()
                    .ok_or_else(|| RpcError::parse("eth_call", "result", "expected string"))?;
                Ok(SimOutcome::Success(Bytes::from(hex_decode(hex_str)?)))
            }
            SimOutcome::Reverted(reason) => Ok(SimOutcome::Reverted(reason)),
        }
    }

    async fn estimate_gas(
        &self,
        request: &CallRequest,
        block: u64,
    ) -> Result<SimOutcome<u64>, RpcError> {
        match self.simulate("eth_estimateGas", request, block).await? {
            SimOutcome::Success(value) => Ok(SimOutcome::Success(parse_u64(&value)?)),
            SimOutcome::Reverted(reason) => Ok(SimOutcome::Reverted(reason)),
        }
    }
}

/// Run `attempt` with the shared limiter, exponential backoff and Retry-After support.
///
/// When the last failure is a rate-limit refusal the limiter is paused for its
/// cooldown so every other worker backs off too.
pub(crate) async fn with_retry<T, F, Fut>(
    limiter: &RateLimiter,
    config: &RpcConfig,
    method: &str,
    mut attempt: F,
) -> Result<T, RpcError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RpcError>>,
{
    let max_attempts = config.max_retries + 1; // 1 initial + N retries
    let mut last_error: Option<RpcError> = None;

    for n in 0..max_attempts {
        if n > 0 {
            // Exponential backoff: base * 2^(n-1), unless the server told us how long
            let backoff = last_error
                .as_ref()
                .and_then(RpcError::retry_after_secs)
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.base_backoff * 2u32.saturating_pow(n - 1));
            tokio::time::sleep(backoff).await;
        }

        limiter.acquire().await;
        match attempt().await {
            Ok(val) => return Ok(val),
            Err(err) => {
                if !err.is_retryable() || n + 1 >= max_attempts {
                    let err = if n > 0 {
                        RpcError::RetryExhausted {
                            method: method.into(),
                            attempts: n + 1,
                            last_error: Box::new(err),
                        }
                    } else {
                        err
                    };
                    if err.is_rate_limited() {
                        limiter.pause();
                    }
                    return Err(err);
                }
                warn!(method, attempt = n + 1, error = %err, "retrying request");
                last_error = Some(err);
            }
        }
    }

    Err(last_error
        .map(|e| RpcError::RetryExhausted {
            method: method.into(),
            attempts: max_attempts,
            last_error: Box::new(e),
        })
        .unwrap_or_else(|| RpcError::parse(method, "", "no attempt made")))
}

// --- Request helpers ---

fn block_tag(block: u64) -> String {
    format!("0x{block:x}")
}

fn call_object(request: &CallRequest) -> Value {
    let mut obj = json!({
        "to": format!("0x{:x}", request.to),
        "data": format!("0x{}", hex::encode(&request.data)),
    });
    if let Some(from) = request.from {
        obj["from"] = json!(format!("0x{from:x}"));
    }
    if let Some(value) = request.value {
        obj["value"] = json!(format!("0x{value:x}"));
    }
    obj
}

// --- Parsing helpers ---

fn parse_envelope(method: &str, json_response: Value) -> Result<Value, RpcError> {
    if let Some(error) = json_response.get("error") {
        let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(-1);
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown")
            .to_string();
        let data = error
            .get("data")
            .and_then(|d| d.as_str())
            .map(str::to_string);
        return Err(RpcError::JsonRpcError {
            method: method.into(),
            code,
            message,
            data,
        });
    }

    json_response
        .get("result")
        .cloned()
        .ok_or_else(|| RpcError::parse(method, "result", "missing result field"))
}

/// Turn an execution failure into a revert reason; pass transport failures through.
fn revert_reason(err: RpcError) -> Result<String, RpcError> {
    match err {
        RpcError::JsonRpcError {
            code,
            message,
            data,
            ..
        } if is_execution_failure(code, &message) => {
            let decoded = data
                .as_deref()
                .and_then(|d| hex_decode(d).ok())
                .and_then(|bytes| decode_revert_reason(&bytes));
            Ok(decoded.unwrap_or(message))
        }
        other => Err(other),
    }
}

fn is_execution_failure(code: i64, message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    code == 3
        || lower.contains("revert")
        || lower.contains("out of gas")
        || lower.contains("gas required exceeds")
        || lower.contains("invalid opcode")
        || (code == -32000 && lower.contains("execution"))
}

fn hex_decode(hex_str: &str) -> Result<Vec<u8>, RpcError> {
    let s = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    hex::decode(s).map_err(|e| RpcError::parse("", "hex", e.to_string()))
}

fn parse_u64(val: &Value) -> Result<u64, RpcError> {
    let s = val
        .as_str()
        .ok_or_else(|| RpcError::parse("", "u64", "expected hex string"))?;
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).map_err(|e| RpcError::parse("", "u64", e.to_string()))
}

fn parse_u256(val: &Value) -> Result<U256, RpcError> {
    let s = val
        .as_str()
        .ok_or_else(|| RpcError::parse("", "U256", "expected hex string"))?;
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(s, 16).map_err(|e| RpcError::parse("", "U256", e.to_string()))
}
