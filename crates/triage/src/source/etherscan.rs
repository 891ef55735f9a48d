//! Etherscan-compatible verified-source registry client (`getsourcecode`).

use std::sync::Arc;

use async_trait::async_trait;
use ethereum_types::Address;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::RpcError;
use crate::rate_limit::RateLimiter;
use crate::verifier::rpc_client::{RpcConfig, with_retry};

use super::{SourceLookup, SourceRegistry, VerifiedSource};

const METHOD: &str = "getsourcecode";

pub struct EtherscanClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    config: RpcConfig,
    limiter: Arc<RateLimiter>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SourceRecord {
    #[serde(default)]
    source_code: String,
    #[serde(default)]
    contract_name: String,
    #[serde(default)]
    compiler_version: String,
}

impl EtherscanClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        config: RpcConfig,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            config,
            limiter,
        }
    }

    async fn fetch_once(&self, address: Address, chain_id: u64) -> Result<Value, RpcError> {
        let address = format!("0x{address:x}");
        let chain_id = chain_id.to_string();
        let response = self
            .http
            .get(&self.base_url)
            .query(&[
                ("chainid", chain_id.as_str()),
                ("module", "contract"),
                ("action", "getsourcecode"),
                ("address", address.as_str()),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RpcError::Timeout {
                        method: METHOD.into(),
                        elapsed_ms: self.config.timeout.as_millis() as u64,
                    }
                } else {
                    RpcError::ConnectionFailed {
                        url: self.base_url.clone(),
                        cause: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RpcError::HttpError {
                method: METHOD.into(),
                status: status.as_u16(),
                body,
            });
        }

        response.json().await.map_err(|e| RpcError::ParseError {
            method: METHOD.into(),
            field: "response_body".into(),
            cause: e.to_string(),
        })
    }
}

#[async_trait]
impl SourceRegistry for EtherscanClient {
    async fn get_verified_source(
        &self,
        address: Address,
        chain_id: u64,
    ) -> Result<SourceLookup, RpcError> {
        debug!(target_address = %address, chain_id, "fetching verified source");
        let body = with_retry(&self.limiter, &self.config, METHOD, || {
            async move { parse_envelope(self.fetch_once(address, chain_id).await?) }
        })
        .await?;
        parse_lookup(body)
    }
}

/// Unwrap the `{status, message, result}` envelope.
///
/// Rate-limit refusals arrive as `status: "0"` with a 200 response; they are
/// mapped to HTTP 429 so the retry loop treats them like any other throttle.
fn parse_envelope(body: Value) -> Result<Value, RpcError> {
    let envelope: Envelope =
        serde_json::from_value(body).map_err(|e| RpcError::parse(METHOD, "envelope", e.to_string()))?;
    if envelope.status == "1" {
        return Ok(envelope.result);
    }

    let detail = envelope
        .result
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| envelope.message.clone());
    if detail.to_ascii_lowercase().contains("rate limit") {
        return Err(RpcError::HttpError {
            method: METHOD.into(),
            status: 429,
            body: detail,
        });
    }
    Err(RpcError::JsonRpcError {
        method: METHOD.into(),
        code: 0,
        message: detail,
        data: None,
    })
}

fn parse_lookup(result: Value) -> Result<SourceLookup, RpcError> {
    let records: Vec<SourceRecord> =
        serde_json::from_value(result).map_err(|e| RpcError::parse(METHOD, "result", e.to_string()))?;
    let Some(record) = records.into_iter().next() else {
        return Ok(SourceLookup::NotVerified);
    };
    if record.source_code.trim().is_empty() {
        return Ok(SourceLookup::NotVerified);
    }
    Ok(SourceLookup::Verified(VerifiedSource {
        raw_payload: record.source_code,
        contract_name: record.contract_name,
        compiler_version: record.compiler_version,
    }))
}
