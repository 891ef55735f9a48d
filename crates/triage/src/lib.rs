//! Heuristic vulnerability triage for deployed smart contracts.
//!
//! A target address flows through a fixed sequence of stages: verified source
//! is normalized into a text corpus, static heuristics score the corpus, an
//! echo/proxy gate decides whether "function is callable" signals can be
//! trusted, hybrid heuristics are confirmed against simulated on-chain state,
//! known exploit templates are replayed as call simulations, and the results
//! are ranked into an evidence-carrying report.

pub mod abi;
pub mod config;
pub mod echo;
pub mod error;
pub mod exploit;
pub mod pipeline;
pub mod rate_limit;
pub mod report;
pub mod rules;
pub mod source;
pub mod storage;
pub mod types;
pub mod verifier;

pub use error::{RpcError, TriageError};
pub use pipeline::TriagePipeline;
pub use types::{Classification, ContractTarget, Finding};

#[cfg(test)]
mod tests;
