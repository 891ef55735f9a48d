//! Chain RPC collaborator interface.
//!
//! Everything here is read-only: calls and gas estimates are simulations
//! against a fixed block, nothing is ever broadcast.

use async_trait::async_trait;
use bytes::Bytes;
use ethereum_types::{Address, H256, U256};

use crate::error::RpcError;

/// A simulated message call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallRequest {
    pub to: Address,
    pub data: Bytes,
    pub from: Option<Address>,
    pub value: Option<U256>,
}

impl CallRequest {
    pub fn new(to: Address, data: Bytes) -> Self {
        Self {
            to,
            data,
            from: None,
            value: None,
        }
    }

    pub fn from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }
}

/// Result of a simulation that reached the EVM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimOutcome<T> {
    Success(T),
    Reverted(String),
}

#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn block_number(&self) -> Result<u64, RpcError>;

    async fn get_balance(&self, address: Address, block: u64) -> Result<U256, RpcError>;

    async fn get_code(&self, address: Address, block: u64) -> Result<Bytes, RpcError>;

    async fn get_storage_at(&self, address: Address, slot: H256, block: u64)
    -> Result<U256, RpcError>;

    async fn call(&self, request: &CallRequest, block: u64) -> Result<SimOutcome<Bytes>, RpcError>;

    async fn estimate_gas(
        &self,
        request: &CallRequest,
        block: u64,
    ) -> Result<SimOutcome<u64>, RpcError>;
}
