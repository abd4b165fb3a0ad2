//! Ledger Gateway - per-ledger read/execute capability consumed by the relay
//!
//! The relay never touches ledger state directly. Everything goes through two
//! calls: a side-effect-free `call` and a finalizing `execute`.

use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use thiserror::Error;

pub mod evm;

pub use evm::{EvmGateway, EvmGatewayConfig};

/// Failure of a gateway call. The rendered message is the "failure signature"
/// matched by the retrying waiter.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The contract reverted (or the node reported a revert for the call)
    #[error("reverted: {reason}")]
    Reverted { reason: String },
    /// Node unreachable, RPC error, malformed response
    #[error("transport error: {0}")]
    Transport(String),
    /// Returned data did not decode as expected
    #[error("decode error: {0}")]
    Decode(String),
    /// A read did not answer in time
    #[error("call not answered within {0:?}")]
    CallTimeout(Duration),
    /// A mutation was not submitted and finalized in time
    #[error("mutation not finalized within {0:?}")]
    FinalizeTimeout(Duration),
}

/// A log emitted by a finalized mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// Outcome of a state-changing call after it was included on its ledger
#[derive(Debug, Clone)]
pub struct Execution {
    /// Transaction identifier (hash) for diagnostics
    pub tx_id: String,
    /// True only for an explicit success status
    pub finalized: bool,
    /// Ledger-reported status, e.g. "SUCCESS" / "REVERTED"
    pub status: String,
    /// Logs carrying emitted identifiers
    pub logs: Vec<EmittedLog>,
}

impl Execution {
    /// Logs emitted by `contract` whose first topic is `topic0`
    pub fn logs_matching(&self, contract: Address, topic0: B256) -> impl Iterator<Item = &EmittedLog> {
        self.logs
            .iter()
            .filter(move |log| log.address == contract && log.topics.first() == Some(&topic0))
    }
}

/// Per-ledger client: one instance per ledger, owned by a single relay instance
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Human-readable ledger role, e.g. "source" or "destination"
    fn label(&self) -> &str;

    /// Read-only contract call returning raw ABI-encoded output
    async fn call(&self, contract: Address, calldata: Bytes) -> Result<Bytes, GatewayError>;

    /// State-changing contract call; returns once the mutation is finalized (or failed)
    async fn execute(&self, contract: Address, calldata: Bytes) -> Result<Execution, GatewayError>;
}
