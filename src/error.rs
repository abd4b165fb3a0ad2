//! Relay error taxonomy
//!
//! Transient "not found yet" read failures never appear here: the waiter
//! absorbs them until its deadline. Everything in this enum is fatal for the
//! message (or batch) it names.

use std::time::Duration;

use thiserror::Error;

use crate::gateway::GatewayError;
use crate::types::{MessageId, Phase};
use crate::verifier::VerificationReport;

#[derive(Debug, Error)]
pub enum RelayError {
    /// A retrying wait exceeded its deadline
    #[error("message {message_id}: timed out after {elapsed:?} waiting for {label} ({attempts} attempts)")]
    Timeout {
        message_id: MessageId,
        label: String,
        elapsed: Duration,
        attempts: u32,
    },

    /// A read failed with an error outside the not-found allow-list
    #[error("{}{phase} read failed: {source}", message_prefix(.message_id))]
    Read {
        message_id: Option<MessageId>,
        phase: Phase,
        #[source]
        source: GatewayError,
    },

    /// A mutation was included but did not finalize with a success status
    #[error("{}{phase} not finalized: status={status} tx={tx_id}", message_prefix(.message_id))]
    MutationFailed {
        message_id: Option<MessageId>,
        phase: Phase,
        tx_id: String,
        status: String,
    },

    /// A mutation could not be submitted or its receipt not obtained
    #[error("{}{phase} submission failed: {source}", message_prefix(.message_id))]
    Submit {
        message_id: Option<MessageId>,
        phase: Phase,
        #[source]
        source: GatewayError,
    },

    /// End-to-end counters/flags disagree with the batch that was relayed
    #[error("verification failed: {0}")]
    Verification(VerificationReport),

    /// Missing or malformed identifiers, credentials or parameters
    #[error("configuration error: {0}")]
    Config(String),
}

fn message_prefix(message_id: &Option<MessageId>) -> String {
    match message_id {
        Some(id) => format!("message {}: ", id),
        None => String::new(),
    }
}

impl RelayError {
    /// The message this error is attributable to, if any
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            RelayError::Timeout { message_id, .. } => Some(*message_id),
            RelayError::Read { message_id, .. }
            | RelayError::MutationFailed { message_id, .. }
            | RelayError::Submit { message_id, .. } => *message_id,
            RelayError::Verification(report) => report.last_message_id,
            RelayError::Config(_) => None,
        }
    }

    /// Short kind label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Timeout { .. } => "timeout",
            RelayError::Read { .. } => "read",
            RelayError::MutationFailed { .. } => "mutation_failed",
            RelayError::Submit { .. } => "submit",
            RelayError::Verification(_) => "verification",
            RelayError::Config(_) => "config",
        }
    }
}
