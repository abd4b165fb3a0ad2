//! Fixed-batch run: send, relay every id in order, verify
//!
//! The first fatal error aborts the batch. A batch whose relays all succeed
//! but whose end-to-end check fails is reported as a verification error.

use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use crate::error::RelayError;
use crate::relay::RelayExecutor;
use crate::sequencer::MessageSequencer;
use crate::types::{RelayBatch, RelayReceipt};
use crate::verifier::{CompletionVerifier, VerificationReport};

/// Everything a passing batch produced
#[derive(Debug)]
pub struct BatchOutcome {
    pub batch: RelayBatch,
    pub receipts: Vec<RelayReceipt>,
    pub report: VerificationReport,
    pub elapsed: Duration,
}

pub struct BatchRunner {
    sequencer: MessageSequencer,
    executor: RelayExecutor,
    verifier: CompletionVerifier,
}

impl BatchRunner {
    pub fn new(
        sequencer: MessageSequencer,
        executor: RelayExecutor,
        verifier: CompletionVerifier,
    ) -> Self {
        Self {
            sequencer,
            executor,
            verifier,
        }
    }

    pub async fn run(&self, payloads: &[Vec<u8>]) -> Result<BatchOutcome, RelayError> {
        let started = Instant::now();

        let baseline = self.verifier.baseline().await?;
        info!(
            request_count = baseline.request_count,
            messages = payloads.len(),
            "Starting batch"
        );

        let batch = self.sequencer.send_batch(payloads).await?;
        info!(
            first_free_id = batch.first_free_id,
            ids = ?batch.ids(),
            "Batch sent"
        );

        let mut receipts = Vec::with_capacity(batch.len());
        for id in batch.ids() {
            receipts.push(self.executor.relay(id).await?);
        }

        let report = self.verifier.verify(&batch, baseline).await?;
        if !report.passed() {
            return Err(RelayError::Verification(report));
        }

        let elapsed = started.elapsed();
        info!(
            relayed = receipts.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "PASS: {}",
            report
        );

        Ok(BatchOutcome {
            batch,
            receipts,
            report,
            elapsed,
        })
    }
}
