//! Verified-source retrieval and normalization.
//!
//! The registry collaborator hands back whatever payload shape the contract
//! was verified with; [`normalizer`] flattens it into one [`SourceCorpus`].

pub mod etherscan;
pub mod normalizer;

use async_trait::async_trait;
use ethereum_types::Address;
use serde::{Deserialize, Serialize};

use crate::error::RpcError;

pub use normalizer::{SourceCorpus, SourceFile, normalize};

/// Raw record returned by a verification registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedSource {
    pub raw_payload: String,
    pub contract_name: String,
    pub compiler_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLookup {
    Verified(VerifiedSource),
    NotVerified,
}

/// Verification registry collaborator (Etherscan-style).
#[async_trait]
pub trait SourceRegistry: Send + Sync {
    async fn get_verified_source(
        &self,
        address: Address,
        chain_id: u64,
    ) -> Result<SourceLookup, RpcError>;
}
