//! Typed clients for the queue and application contracts
//!
//! Each client pairs a ledger gateway with a contract address and does the
//! ABI work locally, so gateways only ever see raw calldata.

use std::sync::Arc;

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::{SolCall, SolEvent};
use tracing::debug;

use crate::contracts::{ClprRelayedQueue, EchoApplication, SourceApplication};
use crate::gateway::{Execution, GatewayError, LedgerGateway};
use crate::types::MessageId;

fn decode_error(what: &str, err: impl std::fmt::Display) -> GatewayError {
    GatewayError::Decode(format!("{}: {}", what, err))
}

fn narrow_id(what: &str, value: U256) -> Result<MessageId, GatewayError> {
    MessageId::try_from_u256(value)
        .ok_or_else(|| GatewayError::Decode(format!("{}: message id {} exceeds u64", what, value)))
}

async fn read<C: SolCall>(
    gateway: &dyn LedgerGateway,
    contract: Address,
    call: C,
) -> Result<C::Return, GatewayError> {
    let output = gateway.call(contract, Bytes::from(call.abi_encode())).await?;
    C::abi_decode_returns(&output, true).map_err(|e| decode_error(C::SIGNATURE, e))
}

async fn execute<C: SolCall>(
    gateway: &dyn LedgerGateway,
    contract: Address,
    call: C,
) -> Result<Execution, GatewayError> {
    let execution = gateway.execute(contract, Bytes::from(call.abi_encode())).await?;
    debug!(
        ledger = gateway.label(),
        function = C::SIGNATURE,
        tx_id = %execution.tx_id,
        status = %execution.status,
        "Mutation finalized"
    );
    Ok(execution)
}

/// Relayed queue on the ledger where messages originate
#[derive(Clone)]
pub struct SourceQueue {
    gateway: Arc<dyn LedgerGateway>,
    address: Address,
}

impl SourceQueue {
    pub fn new(gateway: Arc<dyn LedgerGateway>, address: Address) -> Self {
        Self { gateway, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn ledger(&self) -> &str {
        self.gateway.label()
    }

    /// Last id assigned by the queue; 0 before the first send
    pub async fn next_message_id(&self) -> Result<u64, GatewayError> {
        let ret = read(
            self.gateway.as_ref(),
            self.address,
            ClprRelayedQueue::nextMessageIdCall {},
        )
        .await?;
        narrow_id("nextMessageId", ret._0).map(MessageId::as_u64)
    }

    /// Encoded outbound request for `id`; not-found until the send is finalized
    pub async fn outbound_message_bytes(&self, id: MessageId) -> Result<Bytes, GatewayError> {
        let ret = read(
            self.gateway.as_ref(),
            self.address,
            ClprRelayedQueue::getOutboundMessageBytesCall {
                messageId: id.to_u256(),
            },
        )
        .await?;
        Ok(ret._0)
    }

    pub async fn deliver_inbound_response(&self, response: Bytes) -> Result<Execution, GatewayError> {
        execute(
            self.gateway.as_ref(),
            self.address,
            ClprRelayedQueue::deliverInboundResponseCall {
                responseBytes: response,
            },
        )
        .await
    }

    pub async fn inbound_response_delivered(&self, id: MessageId) -> Result<bool, GatewayError> {
        let ret = read(
            self.gateway.as_ref(),
            self.address,
            ClprRelayedQueue::inboundResponseDeliveredCall {
                messageId: id.to_u256(),
            },
        )
        .await?;
        Ok(ret._0)
    }

    /// Ids announced by this queue's `MessageEnqueued` logs, in log order
    pub fn enqueued_ids(&self, execution: &Execution) -> Vec<MessageId> {
        execution
            .logs_matching(self.address, ClprRelayedQueue::MessageEnqueued::SIGNATURE_HASH)
            .filter_map(|log| log.topics.get(1))
            .filter_map(|topic| MessageId::try_from_u256(U256::from_be_bytes(topic.0)))
            .collect()
    }
}

/// Relayed queue on the ledger where messages are processed
#[derive(Clone)]
pub struct DestinationQueue {
    gateway: Arc<dyn LedgerGateway>,
    address: Address,
}

impl DestinationQueue {
    pub fn new(gateway: Arc<dyn LedgerGateway>, address: Address) -> Self {
        Self { gateway, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn ledger(&self) -> &str {
        self.gateway.label()
    }

    pub async fn deliver_inbound_message(
        &self,
        id: MessageId,
        request: Bytes,
    ) -> Result<Execution, GatewayError> {
        execute(
            self.gateway.as_ref(),
            self.address,
            ClprRelayedQueue::deliverInboundMessageCall {
                messageId: id.to_u256(),
                messageBytes: request,
            },
        )
        .await
    }

    /// Encoded response for `id`; not-found until the destination app has replied
    pub async fn pending_response_bytes(&self, id: MessageId) -> Result<Bytes, GatewayError> {
        let ret = read(
            self.gateway.as_ref(),
            self.address,
            ClprRelayedQueue::getPendingResponseBytesCall {
                messageId: id.to_u256(),
            },
        )
        .await?;
        Ok(ret._0)
    }
}

/// Application on the source ledger that originates requests
#[derive(Clone)]
pub struct SourceApp {
    gateway: Arc<dyn LedgerGateway>,
    address: Address,
}

impl SourceApp {
    pub fn new(gateway: Arc<dyn LedgerGateway>, address: Address) -> Self {
        Self { gateway, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub async fn send(&self, payload: Bytes) -> Result<Execution, GatewayError> {
        execute(
            self.gateway.as_ref(),
            self.address,
            SourceApplication::sendCall { payload },
        )
        .await
    }
}

/// Echo application on the destination ledger; its request counter is the
/// end-to-end observable
#[derive(Clone)]
pub struct EchoApp {
    gateway: Arc<dyn LedgerGateway>,
    address: Address,
}

impl EchoApp {
    pub fn new(gateway: Arc<dyn LedgerGateway>, address: Address) -> Self {
        Self { gateway, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub async fn request_count(&self) -> Result<u64, GatewayError> {
        let ret = read(
            self.gateway.as_ref(),
            self.address,
            EchoApplication::requestCountCall {},
        )
        .await?;
        u64::try_from(ret._0)
            .map_err(|_| GatewayError::Decode(format!("requestCount: {} exceeds u64", ret._0)))
    }
}
