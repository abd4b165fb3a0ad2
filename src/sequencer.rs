//! Message Sequencer
//!
//! Sends a batch of payloads through the source application and records the
//! id the source queue assigned to each. Ids are taken from the queue's
//! `MessageEnqueued` log when the receipt carries one; otherwise they are
//! derived as `firstFreeId + i`, which is only correct while this batch is
//! the sole writer to the source queue.

use std::sync::Arc;

use alloy::primitives::Bytes;
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::gateway::GatewayError;
use crate::metrics::Metrics;
use crate::queue::{SourceApp, SourceQueue};
use crate::types::{IdSource, MessageId, Phase, RelayBatch, SentMessage};

/// `{prefix}1 .. {prefix}{count}`
pub fn payloads_with_prefix(prefix: &str, count: u32) -> Vec<Vec<u8>> {
    (1..=count)
        .map(|i| format!("{}{}", prefix, i).into_bytes())
        .collect()
}

pub struct MessageSequencer {
    source_queue: SourceQueue,
    source_app: SourceApp,
    metrics: Arc<Metrics>,
}

impl MessageSequencer {
    pub fn new(source_queue: SourceQueue, source_app: SourceApp, metrics: Arc<Metrics>) -> Self {
        Self {
            source_queue,
            source_app,
            metrics,
        }
    }

    /// Send every payload in order, one finalized mutation each.
    ///
    /// The first send that fails aborts the batch; earlier sends stay on the
    /// source ledger.
    pub async fn send_batch(&self, payloads: &[Vec<u8>]) -> Result<RelayBatch, RelayError> {
        let first_free_id = self
            .source_queue
            .next_message_id()
            .await
            .map_err(|source| RelayError::Read {
                message_id: None,
                phase: Phase::Send,
                source,
            })?;
        debug!(first_free_id, count = payloads.len(), "Sending batch");

        // Every derived id must fit before anything is sent
        if first_free_id.checked_add(payloads.len() as u64).is_none() {
            return Err(RelayError::Read {
                message_id: None,
                phase: Phase::Send,
                source: GatewayError::Decode(format!(
                    "nextMessageId {} leaves no room for {} more ids",
                    first_free_id,
                    payloads.len()
                )),
            });
        }

        let mut batch = RelayBatch {
            first_free_id,
            messages: Vec::with_capacity(payloads.len()),
        };

        for (i, payload) in payloads.iter().enumerate() {
            let derived = MessageId(first_free_id + i as u64 + 1);

            let execution = self
                .source_app
                .send(Bytes::from(payload.clone()))
                .await
                .map_err(|source| RelayError::Submit {
                    message_id: Some(derived),
                    phase: Phase::Send,
                    source,
                })?;
            if !execution.finalized {
                return Err(RelayError::MutationFailed {
                    message_id: Some(derived),
                    phase: Phase::Send,
                    tx_id: execution.tx_id,
                    status: execution.status,
                });
            }

            let (message_id, id_source) = match self.source_queue.enqueued_ids(&execution).first() {
                Some(&emitted) => {
                    if emitted != derived {
                        warn!(
                            emitted = %emitted,
                            derived = %derived,
                            "Emitted message id differs from derived id; another sender is using the source queue"
                        );
                    }
                    (emitted, IdSource::Emitted)
                }
                None => (derived, IdSource::Derived),
            };

            self.metrics.messages_sent_total.inc();
            info!(
                message_id = %message_id,
                tx_id = %execution.tx_id,
                id_source = ?id_source,
                bytes = payload.len(),
                "Message sent"
            );

            batch.messages.push(SentMessage {
                message_id,
                tx_id: execution.tx_id,
                id_source,
                payload: payload.clone(),
            });
        }

        Ok(batch)
    }
}
