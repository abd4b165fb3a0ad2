//! In-memory two-ledger simulation for integration tests
//!
//! Both ledgers live in one `World` behind a mutex. Each `MockLedger` is a
//! `LedgerGateway` that decodes calldata with the same `sol!` bindings the
//! relayer uses, so tests exercise the real encode/decode path.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::{SolCall, SolEvent, SolValue};
use async_trait::async_trait;

use clpr_relayer::contracts::{ClprRelayedQueue, EchoApplication, SourceApplication};
use clpr_relayer::metrics::Metrics;
use clpr_relayer::queue::{DestinationQueue, EchoApp, SourceApp, SourceQueue};
use clpr_relayer::relay::RelayExecutor;
use clpr_relayer::sequencer::MessageSequencer;
use clpr_relayer::verifier::CompletionVerifier;
use clpr_relayer::waiter::{NotFoundSignatures, WaitPolicy};
use clpr_relayer::{EmittedLog, Execution, GatewayError, LedgerGateway};

pub fn src_queue() -> Address {
    Address::repeat_byte(0xa1)
}

pub fn src_app() -> Address {
    Address::repeat_byte(0xa2)
}

pub fn dst_queue() -> Address {
    Address::repeat_byte(0xb1)
}

pub fn echo_app() -> Address {
    Address::repeat_byte(0xb2)
}

/// 2 s deadline, 500 ms polls
pub fn short_policy() -> WaitPolicy {
    WaitPolicy {
        timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(500),
    }
}

/// Wire form of requests and responses: `(messageId, payload)`
pub fn encode_envelope(id: u64, payload: &[u8]) -> Bytes {
    Bytes::from((U256::from(id), Bytes::copy_from_slice(payload)).abi_encode_params())
}

pub fn decode_envelope(bytes: &[u8]) -> Option<(u64, Bytes)> {
    let (id, payload) = <(U256, Bytes)>::abi_decode_params(bytes, true).ok()?;
    Some((u64::try_from(id).ok()?, payload))
}

#[derive(Debug, Default)]
pub struct SourceState {
    /// Last assigned id
    pub next_id: u64,
    pub outbound: BTreeMap<u64, Bytes>,
    /// Not-found replies to serve before an outbound request becomes readable
    pub outbound_misses: HashMap<u64, u32>,
    pub delivered: BTreeSet<u64>,
    /// Emit `MessageEnqueued` logs on send
    pub emit_logs: bool,
    /// Another sender slips this many messages in before each app send
    pub external_sends_before_each_send: u32,
    /// After this many `nextMessageId` reads, an external sender enqueues `count` messages
    pub scheduled_external: Option<(u32, u32)>,
    pub next_id_reads: u32,
    /// `inboundResponseDelivered` reads served
    pub delivered_reads: u32,
    /// Accept response deliveries without marking anything delivered
    pub swallow_responses: bool,
}

#[derive(Debug, Default)]
pub struct DestinationState {
    pub processed: BTreeSet<u64>,
    /// First-time deliveries, in arrival order
    pub arrival_order: Vec<u64>,
    pub pending: BTreeMap<u64, Bytes>,
    /// Not-found replies to serve before a pending response becomes readable
    pub response_misses: HashMap<u64, u32>,
    /// Processed but never produce a response
    pub never_respond: BTreeSet<u64>,
    /// Delivery reverts
    pub reject_delivery: BTreeSet<u64>,
    /// Processed without the echo app counting the request
    pub uncounted: BTreeSet<u64>,
    pub request_count: u64,
}

#[derive(Debug, Default)]
pub struct World {
    pub source: SourceState,
    pub destination: DestinationState,
    /// `"<ledger>:<function>"` for every mutation, in submission order
    pub executions: Vec<String>,
    tx_counter: u64,
}

impl World {
    fn next_tx(&mut self) -> String {
        self.tx_counter += 1;
        format!("0x{:064x}", self.tx_counter)
    }

    /// Enqueue an outbound request on the source queue
    pub fn enqueue(&mut self, payload: &[u8]) -> u64 {
        self.source.next_id += 1;
        let id = self.source.next_id;
        self.source.outbound.insert(id, encode_envelope(id, payload));
        id
    }

    /// A sender outside the relay's control
    pub fn external_send(&mut self, payload: &[u8]) -> u64 {
        self.enqueue(payload)
    }
}

fn not_found(error: &str, id: U256) -> GatewayError {
    GatewayError::Reverted {
        reason: format!("execution reverted: {}({})", error, id),
    }
}

fn reverted(reason: &str) -> GatewayError {
    GatewayError::Reverted {
        reason: format!("execution reverted: {}", reason),
    }
}

fn selector(calldata: &[u8]) -> Result<[u8; 4], GatewayError> {
    calldata
        .get(..4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| reverted("missing selector"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Destination,
}

pub struct MockLedger {
    side: Side,
    label: String,
    world: Arc<Mutex<World>>,
}

impl MockLedger {
    fn call_source(&self, world: &mut World, contract: Address, data: &[u8]) -> Result<Bytes, GatewayError> {
        if contract != src_queue() {
            return Err(reverted("no contract at address"));
        }
        let sel = selector(data)?;

        let out = if sel == ClprRelayedQueue::nextMessageIdCall::SELECTOR {
            world.source.next_id_reads += 1;
            if let Some((after, count)) = world.source.scheduled_external {
                if world.source.next_id_reads > after {
                    for i in 0..count {
                        world.external_send(format!("external-{}", i).as_bytes());
                    }
                    world.source.scheduled_external = None;
                }
            }
            let next = U256::from(world.source.next_id);
            ClprRelayedQueue::nextMessageIdCall::abi_encode_returns(&(next,))
        } else if sel == ClprRelayedQueue::getOutboundMessageBytesCall::SELECTOR {
            let call = ClprRelayedQueue::getOutboundMessageBytesCall::abi_decode(data, true)
                .map_err(|e| reverted(&e.to_string()))?;
            let id = u64::try_from(call.messageId).map_err(|_| reverted("id overflow"))?;
            let bytes = world
                .source
                .outbound
                .get(&id)
                .cloned()
                .ok_or_else(|| not_found("MessageNotFound", call.messageId))?;
            if let Some(misses) = world.source.outbound_misses.get_mut(&id) {
                if *misses > 0 {
                    *misses -= 1;
                    return Err(not_found("MessageNotFound", call.messageId));
                }
            }
            ClprRelayedQueue::getOutboundMessageBytesCall::abi_encode_returns(&(bytes,))
        } else if sel == ClprRelayedQueue::inboundResponseDeliveredCall::SELECTOR {
            let call = ClprRelayedQueue::inboundResponseDeliveredCall::abi_decode(data, true)
                .map_err(|e| reverted(&e.to_string()))?;
            let id = u64::try_from(call.messageId).unwrap_or(u64::MAX);
            world.source.delivered_reads += 1;
            let delivered = world.source.delivered.contains(&id);
            ClprRelayedQueue::inboundResponseDeliveredCall::abi_encode_returns(&(delivered,))
        } else {
            return Err(reverted("unknown selector"));
        };

        Ok(Bytes::from(out))
    }

    fn call_destination(&self, world: &mut World, contract: Address, data: &[u8]) -> Result<Bytes, GatewayError> {
        let sel = selector(data)?;

        let out = if contract == dst_queue()
            && sel == ClprRelayedQueue::getPendingResponseBytesCall::SELECTOR
        {
            let call = ClprRelayedQueue::getPendingResponseBytesCall::abi_decode(data, true)
                .map_err(|e| reverted(&e.to_string()))?;
            let id = u64::try_from(call.messageId).map_err(|_| reverted("id overflow"))?;
            let bytes = world
                .destination
                .pending
                .get(&id)
                .cloned()
                .ok_or_else(|| not_found("ResponseNotFound", call.messageId))?;
            if let Some(misses) = world.destination.response_misses.get_mut(&id) {
                if *misses > 0 {
                    *misses -= 1;
                    return Err(not_found("ResponseNotFound", call.messageId));
                }
            }
            ClprRelayedQueue::getPendingResponseBytesCall::abi_encode_returns(&(bytes,))
        } else if contract == echo_app() && sel == EchoApplication::requestCountCall::SELECTOR {
            let count = U256::from(world.destination.request_count);
            EchoApplication::requestCountCall::abi_encode_returns(&(count,))
        } else {
            return Err(reverted("unknown selector"));
        };

        Ok(Bytes::from(out))
    }

    fn execute_source(&self, world: &mut World, contract: Address, data: &[u8]) -> Result<Execution, GatewayError> {
        let tx_id = world.next_tx();
        let sel = selector(data)?;
        let mut logs = Vec::new();

        let finalized = if contract == src_app() && sel == SourceApplication::sendCall::SELECTOR {
            let call = SourceApplication::sendCall::abi_decode(data, true)
                .map_err(|e| reverted(&e.to_string()))?;
            for i in 0..world.source.external_sends_before_each_send {
                world.external_send(format!("interleaved-{}", i).as_bytes());
            }
            let id = world.enqueue(&call.payload);
            world.executions.push("source:send".to_string());
            if world.source.emit_logs {
                logs.push(EmittedLog {
                    address: src_queue(),
                    topics: vec![
                        ClprRelayedQueue::MessageEnqueued::SIGNATURE_HASH,
                        B256::from(U256::from(id).to_be_bytes::<32>()),
                        B256::left_padding_from(src_app().as_slice()),
                    ],
                    data: Bytes::new(),
                });
            }
            true
        } else if contract == src_queue()
            && sel == ClprRelayedQueue::deliverInboundResponseCall::SELECTOR
        {
            let call = ClprRelayedQueue::deliverInboundResponseCall::abi_decode(data, true)
                .map_err(|e| reverted(&e.to_string()))?;
            world.executions.push("source:deliverInboundResponse".to_string());
            match decode_envelope(&call.responseBytes) {
                Some((id, _)) if world.source.outbound.contains_key(&id) => {
                    // Duplicate delivery is a no-op
                    if !world.source.swallow_responses {
                        world.source.delivered.insert(id);
                    }
                    true
                }
                _ => false,
            }
        } else {
            return Err(reverted("unknown selector"));
        };

        Ok(Execution {
            tx_id,
            finalized,
            status: if finalized { "SUCCESS" } else { "REVERTED" }.to_string(),
            logs,
        })
    }

    fn execute_destination(&self, world: &mut World, contract: Address, data: &[u8]) -> Result<Execution, GatewayError> {
        let tx_id = world.next_tx();
        let sel = selector(data)?;

        let finalized = if contract == dst_queue()
            && sel == ClprRelayedQueue::deliverInboundMessageCall::SELECTOR
        {
            let call = ClprRelayedQueue::deliverInboundMessageCall::abi_decode(data, true)
                .map_err(|e| reverted(&e.to_string()))?;
            world.executions.push("destination:deliverInboundMessage".to_string());
            let id = u64::try_from(call.messageId).unwrap_or(u64::MAX);
            let dst = &mut world.destination;
            match decode_envelope(&call.messageBytes) {
                _ if dst.reject_delivery.contains(&id) => false,
                Some((inner_id, payload)) if inner_id == id => {
                    // Duplicate delivery is a no-op
                    if dst.processed.insert(id) {
                        dst.arrival_order.push(id);
                        if !dst.uncounted.contains(&id) {
                            dst.request_count += 1;
                        }
                        if !dst.never_respond.contains(&id) {
                            dst.pending.insert(id, encode_envelope(id, &payload));
                        }
                    }
                    true
                }
                _ => false,
            }
        } else {
            return Err(reverted("unknown selector"));
        };

        Ok(Execution {
            tx_id,
            finalized,
            status: if finalized { "SUCCESS" } else { "REVERTED" }.to_string(),
            logs: Vec::new(),
        })
    }
}

#[async_trait]
impl LedgerGateway for MockLedger {
    fn label(&self) -> &str {
        &self.label
    }

    async fn call(&self, contract: Address, calldata: Bytes) -> Result<Bytes, GatewayError> {
        let mut world = self.world.lock().unwrap();
        match self.side {
            Side::Source => self.call_source(&mut world, contract, &calldata),
            Side::Destination => self.call_destination(&mut world, contract, &calldata),
        }
    }

    async fn execute(&self, contract: Address, calldata: Bytes) -> Result<Execution, GatewayError> {
        let mut world = self.world.lock().unwrap();
        match self.side {
            Side::Source => self.execute_source(&mut world, contract, &calldata),
            Side::Destination => self.execute_destination(&mut world, contract, &calldata),
        }
    }
}

/// Both ledgers plus helpers wiring relayer components onto them
pub struct Simulation {
    pub world: Arc<Mutex<World>>,
    pub source: Arc<dyn LedgerGateway>,
    pub destination: Arc<dyn LedgerGateway>,
    pub metrics: Arc<Metrics>,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation {
    pub fn new() -> Self {
        let world = Arc::new(Mutex::new(World::default()));
        let source: Arc<dyn LedgerGateway> = Arc::new(MockLedger {
            side: Side::Source,
            label: "source".to_string(),
            world: world.clone(),
        });
        let destination: Arc<dyn LedgerGateway> = Arc::new(MockLedger {
            side: Side::Destination,
            label: "destination".to_string(),
            world: world.clone(),
        });
        Self {
            world,
            source,
            destination,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Mutate or inspect the world
    pub fn with<R>(&self, f: impl FnOnce(&mut World) -> R) -> R {
        f(&mut self.world.lock().unwrap())
    }

    pub fn source_queue(&self) -> SourceQueue {
        SourceQueue::new(self.source.clone(), src_queue())
    }

    pub fn destination_queue(&self) -> DestinationQueue {
        DestinationQueue::new(self.destination.clone(), dst_queue())
    }

    pub fn executor(&self, policy: WaitPolicy) -> RelayExecutor {
        RelayExecutor::new(
            self.source_queue(),
            self.destination_queue(),
            policy,
            NotFoundSignatures::default(),
            self.metrics.clone(),
        )
    }

    pub fn sequencer(&self) -> MessageSequencer {
        MessageSequencer::new(
            self.source_queue(),
            SourceApp::new(self.source.clone(), src_app()),
            self.metrics.clone(),
        )
    }

    pub fn verifier(&self) -> CompletionVerifier {
        CompletionVerifier::new(
            self.source_queue(),
            EchoApp::new(self.destination.clone(), echo_app()),
        )
    }

    /// How many times `"<ledger>:<function>"` was executed
    pub fn executions_of(&self, name: &str) -> usize {
        self.with(|w| w.executions.iter().filter(|e| e.as_str() == name).count())
    }

    pub fn request_count(&self) -> u64 {
        self.with(|w| w.destination.request_count)
    }

    pub fn delivered(&self) -> BTreeSet<u64> {
        self.with(|w| w.source.delivered.clone())
    }
}
