//! Core relay types: message ids, session states, batches and receipts.

use std::fmt;
use std::time::Duration;

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

/// Queue-assigned message identifier (positive, monotonically assigned per source queue)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl MessageId {
    /// The id following this one; `None` once the id space is exhausted
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(MessageId)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// ABI representation used by the queue contracts
    pub fn to_u256(self) -> U256 {
        U256::from(self.0)
    }

    /// Narrow an on-chain uint256 id; ids beyond u64 are rejected
    pub fn try_from_u256(value: U256) -> Option<Self> {
        u64::try_from(value).ok().map(MessageId)
    }
}

impl From<u64> for MessageId {
    fn from(value: u64) -> Self {
        MessageId(value)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of one relay session
///
/// `Sent -> RequestAvailable -> RequestDelivered -> ResponseAvailable -> ResponseDelivered`,
/// with `Failed` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Sent,
    RequestAvailable,
    RequestDelivered,
    ResponseAvailable,
    ResponseDelivered,
    Failed,
}

impl SessionState {
    /// Get the state as a snake_case string
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Sent => "sent",
            SessionState::RequestAvailable => "request_available",
            SessionState::RequestDelivered => "request_delivered",
            SessionState::ResponseAvailable => "response_available",
            SessionState::ResponseDelivered => "response_delivered",
            SessionState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::ResponseDelivered | SessionState::Failed)
    }

    /// The only successor on the success path
    fn successor(&self) -> Option<SessionState> {
        match self {
            SessionState::Sent => Some(SessionState::RequestAvailable),
            SessionState::RequestAvailable => Some(SessionState::RequestDelivered),
            SessionState::RequestDelivered => Some(SessionState::ResponseAvailable),
            SessionState::ResponseAvailable => Some(SessionState::ResponseDelivered),
            SessionState::ResponseDelivered | SessionState::Failed => None,
        }
    }

    /// Whether `next` is a legal transition from this state
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == SessionState::Failed || self.successor() == Some(next)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Hand-off step, used to label waits, failures and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Source application send (sequencer)
    Send,
    /// Waiting for request bytes on the source queue
    SourceRequest,
    /// Delivering request bytes to the destination queue
    DeliverRequest,
    /// Waiting for response bytes on the destination queue
    DestinationResponse,
    /// Delivering response bytes back to the source queue
    DeliverResponse,
    /// Re-reading the source delivery flag after hand-off
    ConfirmDelivery,
    /// Reading counters or flags outside a session
    Observe,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Send => "send",
            Phase::SourceRequest => "source request",
            Phase::DeliverRequest => "deliver request",
            Phase::DestinationResponse => "destination response",
            Phase::DeliverResponse => "deliver response",
            Phase::ConfirmDelivery => "confirm delivery",
            Phase::Observe => "observe",
        }
    }

    /// Label form for prometheus (no spaces)
    pub fn metric_label(&self) -> &'static str {
        match self {
            Phase::Send => "send",
            Phase::SourceRequest => "source_request",
            Phase::DeliverRequest => "deliver_request",
            Phase::DestinationResponse => "destination_response",
            Phase::DeliverResponse => "deliver_response",
            Phase::ConfirmDelivery => "confirm_delivery",
            Phase::Observe => "observe",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-process bookkeeping for one message; disposable and rebuildable from ledger state
#[derive(Debug, Clone)]
pub struct RelaySession {
    pub message_id: MessageId,
    pub state: SessionState,
    /// Furthest success-path state; where a failed session stopped
    pub reached: SessionState,
    /// Reason recorded on the move to `Failed`
    pub failure: Option<String>,
}

impl RelaySession {
    pub fn new(message_id: MessageId) -> Self {
        Self {
            message_id,
            state: SessionState::Sent,
            reached: SessionState::Sent,
            failure: None,
        }
    }

    /// Move to `Failed` with a reason; false if the session is already terminal
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if !self.advance(SessionState::Failed) {
            return false;
        }
        self.failure = Some(reason.into());
        true
    }

    /// Move to `next`, returning false (and leaving the state untouched) on an illegal transition
    pub fn advance(&mut self, next: SessionState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                message_id = %self.message_id,
                from = %self.state,
                to = %next,
                "Rejected out-of-order session transition"
            );
            return false;
        }
        tracing::debug!(
            message_id = %self.message_id,
            from = %self.state,
            to = %next,
            "Session transition"
        );
        self.state = next;
        if next != SessionState::Failed {
            self.reached = next;
        }
        true
    }
}

/// Successful outcome of one two-phase hand-off
#[derive(Debug, Clone)]
pub struct RelayReceipt {
    pub message_id: MessageId,
    /// Terminal session state, `ResponseDelivered` for every receipt
    pub state: SessionState,
    /// Destination-side `deliverInboundMessage` transaction
    pub request_tx: String,
    /// Source-side `deliverInboundResponse` transaction
    pub response_tx: String,
    pub request_len: usize,
    pub response_len: usize,
    pub elapsed: Duration,
}

/// How a sent message's id was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSource {
    /// Decoded from the queue's `MessageEnqueued` log
    Emitted,
    /// `firstFreeId + i`, valid only with exclusive access to the source queue
    Derived,
}

/// One finalized source-application send
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub message_id: MessageId,
    pub tx_id: String,
    pub id_source: IdSource,
    pub payload: Vec<u8>,
}

/// Ordered result of one sequencer invocation
#[derive(Debug, Clone, Default)]
pub struct RelayBatch {
    /// Source `nextMessageId()` read before any send
    pub first_free_id: u64,
    pub messages: Vec<SentMessage>,
}

impl RelayBatch {
    /// Message ids in issuance order
    pub fn ids(&self) -> Vec<MessageId> {
        self.messages.iter().map(|m| m.message_id).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last_id(&self) -> Option<MessageId> {
        self.messages.last().map(|m| m.message_id)
    }
}
