//! EVM JSON-RPC gateway
//!
//! Reads go through `eth_call`, mutations through `eth_sendTransaction` signed
//! locally and awaited to a receipt. Both carry an explicit gas budget and a
//! time bound. Custom-error reverts are decoded so the error text names the
//! queue error (`MessageNotFound(5)`) rather than raw revert data.

use std::fmt;
use std::time::Duration;

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::{Revert, SolError, SolInterface};
use alloy::transports::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use tracing::{debug, info};
use url::Url;

use super::{EmittedLog, Execution, GatewayError, LedgerGateway};
use crate::contracts::ClprRelayedQueue::ClprRelayedQueueErrors as QueueError;

/// Connection settings for one EVM ledger
#[derive(Clone)]
pub struct EvmGatewayConfig {
    /// "source" or "destination"
    pub label: String,
    pub rpc_url: String,
    pub private_key: String,
    /// Gas budget for read calls
    pub query_gas: u64,
    /// Gas budget for mutations
    pub exec_gas: u64,
    /// Upper bound on one read
    pub call_timeout: Duration,
    /// Upper bound on submitting a mutation and waiting for its receipt
    pub finalize_timeout: Duration,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for EvmGatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvmGatewayConfig")
            .field("label", &self.label)
            .field("rpc_url", &self.rpc_url)
            .field("private_key", &"<redacted>")
            .field("query_gas", &self.query_gas)
            .field("exec_gas", &self.exec_gas)
            .field("call_timeout", &self.call_timeout)
            .field("finalize_timeout", &self.finalize_timeout)
            .finish()
    }
}

/// Gateway for one EVM-compatible ledger
pub struct EvmGateway {
    label: String,
    rpc_url: Url,
    signer: PrivateKeySigner,
    query_gas: u64,
    exec_gas: u64,
    call_timeout: Duration,
    finalize_timeout: Duration,
}

impl EvmGateway {
    /// Build the gateway without touching the network
    pub fn new(config: &EvmGatewayConfig) -> Result<Self> {
        let rpc_url: Url = config
            .rpc_url
            .parse()
            .wrap_err_with(|| format!("Invalid {} RPC URL: {}", config.label, config.rpc_url))?;

        let signer: PrivateKeySigner = config
            .private_key
            .parse()
            .map_err(|e| eyre!("Invalid {} private key: {}", config.label, e))?;

        Ok(Self {
            label: config.label.clone(),
            rpc_url,
            signer,
            query_gas: config.query_gas,
            exec_gas: config.exec_gas,
            call_timeout: config.call_timeout,
            finalize_timeout: config.finalize_timeout,
        })
    }

    /// Build the gateway and fail fast if the endpoint is unreachable
    pub async fn connect(config: &EvmGatewayConfig) -> Result<Self> {
        let gateway = Self::new(config)?;

        let provider = ProviderBuilder::new().on_http(gateway.rpc_url.clone());
        let block = provider
            .get_block_number()
            .await
            .map_err(|e| eyre!("{} ledger unreachable at {}: {}", gateway.label, gateway.rpc_url, e))?;

        info!(
            ledger = %gateway.label,
            rpc_url = %gateway.rpc_url,
            signer = %gateway.signer.address(),
            block,
            "Connected to ledger"
        );

        Ok(gateway)
    }

    /// Address mutations are signed with
    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }
}

/// Map an RPC failure to a gateway error.
///
/// When the node returns revert data that decodes as a queue error or an
/// `Error(string)`, the decoded reason leads the message.
fn rpc_error(err: RpcError<TransportErrorKind>) -> GatewayError {
    let message = err.to_string();
    let decoded = err
        .as_error_resp()
        .and_then(|payload| payload.as_revert_data())
        .and_then(|data| revert_reason(&data));

    match decoded {
        Some(reason) => GatewayError::Reverted {
            reason: format!("{}: {}", reason, message),
        },
        None => classify_message(message),
    }
}

fn classify_message(message: String) -> GatewayError {
    if message.to_ascii_lowercase().contains("revert") {
        GatewayError::Reverted { reason: message }
    } else {
        GatewayError::Transport(message)
    }
}

fn revert_reason(data: &[u8]) -> Option<String> {
    if let Ok(error) = QueueError::abi_decode(data, true) {
        return Some(match error {
            QueueError::MessageNotFound(e) => format!("MessageNotFound({})", e.messageId),
            QueueError::ResponseNotFound(e) => format!("ResponseNotFound({})", e.messageId),
        });
    }
    Revert::abi_decode(data, true).ok().map(|revert| revert.reason)
}

#[async_trait]
impl LedgerGateway for EvmGateway {
    fn label(&self) -> &str {
        &self.label
    }

    async fn call(&self, contract: Address, calldata: Bytes) -> Result<Bytes, GatewayError> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.clone());

        let tx = TransactionRequest::default()
            .with_from(self.signer.address())
            .with_to(contract)
            .with_input(calldata)
            .with_gas_limit(self.query_gas);

        tokio::time::timeout(self.call_timeout, async { provider.call(&tx).await })
            .await
            .map_err(|_| GatewayError::CallTimeout(self.call_timeout))?
            .map_err(rpc_error)
    }

    async fn execute(&self, contract: Address, calldata: Bytes) -> Result<Execution, GatewayError> {
        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(self.rpc_url.clone());

        let tx = TransactionRequest::default()
            .with_to(contract)
            .with_input(calldata)
            .with_gas_limit(self.exec_gas);

        // Filling, sending and the receipt wait share one bound
        let submit = async {
            let pending = provider.send_transaction(tx).await.map_err(rpc_error)?;
            let tx_hash = *pending.tx_hash();
            debug!(ledger = %self.label, tx_hash = %tx_hash, "Transaction sent, waiting for receipt");

            let receipt = pending
                .get_receipt()
                .await
                .map_err(|e| classify_message(e.to_string()))?;
            Ok::<_, GatewayError>((tx_hash, receipt))
        };
        let (tx_hash, receipt) = tokio::time::timeout(self.finalize_timeout, submit)
            .await
            .map_err(|_| GatewayError::FinalizeTimeout(self.finalize_timeout))??;

        let finalized = receipt.status();
        let logs = receipt
            .inner
            .logs()
            .iter()
            .map(|log| EmittedLog {
                address: log.inner.address,
                topics: log.inner.data.topics().to_vec(),
                data: log.inner.data.data.clone(),
            })
            .collect();

        Ok(Execution {
            tx_id: format!("0x{:x}", tx_hash),
            finalized,
            status: if finalized { "SUCCESS" } else { "REVERTED" }.to_string(),
            logs,
        })
    }
}
