//! Relay Step Executor
//!
//! Moves one message through the two-phase hand-off:
//!
//! 1. wait for the request bytes on the source queue
//! 2. deliver them to the destination queue
//! 3. wait for the response bytes on the destination queue
//! 4. deliver them back to the source queue
//!
//! Steps are strictly sequential and each delivery mutation is attempted at
//! most once per call. Re-running a delivered message relies on the queues
//! treating duplicate delivery as a no-op.

use std::sync::Arc;

use alloy::primitives::Bytes;
use tokio::time::Instant;
use tracing::{error, info};

use crate::error::RelayError;
use crate::gateway::{Execution, GatewayError};
use crate::metrics::Metrics;
use crate::queue::{DestinationQueue, SourceQueue};
use crate::types::{MessageId, Phase, RelayReceipt, RelaySession, SessionState};
use crate::waiter::{wait_for_counted, NotFoundSignatures, WaitError, WaitPolicy};

/// Terminal session of one relay plus the receipt or the error that ended it
#[derive(Debug)]
pub struct RelaySessionResult {
    pub session: RelaySession,
    pub outcome: Result<RelayReceipt, RelayError>,
}

pub struct RelayExecutor {
    source: SourceQueue,
    destination: DestinationQueue,
    policy: WaitPolicy,
    signatures: NotFoundSignatures,
    confirm_delivery: bool,
    metrics: Arc<Metrics>,
}

impl RelayExecutor {
    pub fn new(
        source: SourceQueue,
        destination: DestinationQueue,
        policy: WaitPolicy,
        signatures: NotFoundSignatures,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            source,
            destination,
            policy,
            signatures,
            confirm_delivery: false,
            metrics,
        }
    }

    /// Re-read `inboundResponseDelivered` after the response hand-off
    pub fn with_confirm_delivery(mut self, enabled: bool) -> Self {
        self.confirm_delivery = enabled;
        self
    }

    pub fn source(&self) -> &SourceQueue {
        &self.source
    }

    /// Relay one message end to end
    pub async fn relay(&self, message_id: MessageId) -> Result<RelayReceipt, RelayError> {
        self.relay_session(message_id).await.outcome
    }

    /// Relay one message and return its terminal session alongside the outcome
    pub async fn relay_session(&self, message_id: MessageId) -> RelaySessionResult {
        let started = Instant::now();
        let mut session = RelaySession::new(message_id);

        let outcome = match self.hand_off(&mut session, started).await {
            Ok(receipt) => {
                self.metrics.record_relay(true, receipt.elapsed.as_secs_f64());
                info!(
                    message_id = %message_id,
                    request_tx = %receipt.request_tx,
                    response_tx = %receipt.response_tx,
                    elapsed_ms = receipt.elapsed.as_millis() as u64,
                    "Message relayed"
                );
                Ok(receipt)
            }
            Err((phase, err)) => {
                session.fail(err.to_string());
                self.metrics.record_failure(phase, err.kind());
                self.metrics.record_relay(false, started.elapsed().as_secs_f64());
                error!(
                    message_id = %message_id,
                    phase = %phase,
                    reached = %session.reached,
                    error = %err,
                    "Relay failed"
                );
                Err(err)
            }
        };

        RelaySessionResult { session, outcome }
    }

    async fn hand_off(
        &self,
        session: &mut RelaySession,
        started: Instant,
    ) -> Result<RelayReceipt, (Phase, RelayError)> {
        let id = session.message_id;

        // Step 1: request bytes become readable once the send finalizes
        let source = &self.source;
        let request = self
            .await_bytes(id, Phase::SourceRequest, move || source.outbound_message_bytes(id))
            .await?;
        session.advance(SessionState::RequestAvailable);

        // Step 2
        let request_len = request.len();
        let delivered = self
            .destination
            .deliver_inbound_message(id, request)
            .await
            .map_err(|e| submit_error(id, Phase::DeliverRequest, e))?;
        let request_tx = require_finalized(id, Phase::DeliverRequest, delivered)?;
        session.advance(SessionState::RequestDelivered);
        info!(
            message_id = %id,
            tx_id = %request_tx,
            bytes = request_len,
            "Request delivered to {} queue",
            self.destination.ledger()
        );

        // Step 3: the destination app must process the request before a response exists
        let destination = &self.destination;
        let response = self
            .await_bytes(id, Phase::DestinationResponse, move || destination.pending_response_bytes(id))
            .await?;
        session.advance(SessionState::ResponseAvailable);

        // Step 4: the source queue associates the response with its message
        let response_len = response.len();
        let returned = self
            .source
            .deliver_inbound_response(response)
            .await
            .map_err(|e| submit_error(id, Phase::DeliverResponse, e))?;
        let response_tx = require_finalized(id, Phase::DeliverResponse, returned)?;
        info!(
            message_id = %id,
            tx_id = %response_tx,
            bytes = response_len,
            "Response delivered to {} queue",
            self.source.ledger()
        );

        if self.confirm_delivery {
            self.confirm(id, &response_tx).await?;
        }
        session.advance(SessionState::ResponseDelivered);

        Ok(RelayReceipt {
            message_id: id,
            state: session.state,
            request_tx,
            response_tx,
            request_len,
            response_len,
            elapsed: started.elapsed(),
        })
    }

    async fn await_bytes<F, Fut>(
        &self,
        id: MessageId,
        phase: Phase,
        read: F,
    ) -> Result<Bytes, (Phase, RelayError)>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<Bytes, GatewayError>>,
    {
        match wait_for_counted(&self.policy, &self.signatures, phase.as_str(), read).await {
            Ok((bytes, attempts)) => {
                self.metrics
                    .record_not_found_polls(phase, u64::from(attempts.saturating_sub(1)));
                Ok(bytes)
            }
            Err(WaitError::Timeout {
                label,
                elapsed,
                attempts,
            }) => {
                self.metrics.record_not_found_polls(phase, u64::from(attempts));
                Err((
                    phase,
                    RelayError::Timeout {
                        message_id: id,
                        label,
                        elapsed,
                        attempts,
                    },
                ))
            }
            Err(WaitError::Read { source, .. }) => Err((
                phase,
                RelayError::Read {
                    message_id: Some(id),
                    phase,
                    source,
                },
            )),
        }
    }

    async fn confirm(&self, id: MessageId, response_tx: &str) -> Result<(), (Phase, RelayError)> {
        let phase = Phase::ConfirmDelivery;
        let delivered = self
            .source
            .inbound_response_delivered(id)
            .await
            .map_err(|source| {
                (
                    phase,
                    RelayError::Read {
                        message_id: Some(id),
                        phase,
                        source,
                    },
                )
            })?;

        if !delivered {
            return Err((
                phase,
                RelayError::MutationFailed {
                    message_id: Some(id),
                    phase,
                    tx_id: response_tx.to_string(),
                    status: "RESPONSE_NOT_ASSOCIATED".to_string(),
                },
            ));
        }
        Ok(())
    }
}

fn submit_error(id: MessageId, phase: Phase, source: GatewayError) -> (Phase, RelayError) {
    (
        phase,
        RelayError::Submit {
            message_id: Some(id),
            phase,
            source,
        },
    )
}

/// Anything but an explicit success status is fatal for the step
fn require_finalized(
    id: MessageId,
    phase: Phase,
    execution: Execution,
) -> Result<String, (Phase, RelayError)> {
    if execution.finalized {
        Ok(execution.tx_id)
    } else {
        Err((
            phase,
            RelayError::MutationFailed {
                message_id: Some(id),
                phase,
                tx_id: execution.tx_id,
                status: execution.status,
            },
        ))
    }
}
