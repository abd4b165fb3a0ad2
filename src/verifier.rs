//! Completion Verifier
//!
//! Relay-step success only proves the mutations finalized. The verifier checks
//! the end-to-end effect: the destination application's request counter moved
//! by exactly the batch size, and the source queue marked the last message's
//! response as delivered.

use std::fmt;

use tracing::{info, warn};

use crate::error::RelayError;
use crate::queue::{EchoApp, SourceQueue};
use crate::types::{MessageId, Phase, RelayBatch};

/// Destination observable captured before a batch starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Baseline {
    pub request_count: u64,
}

/// Expected vs. observed end-to-end state of one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub expected_count: u64,
    pub observed_count: u64,
    pub count_ok: bool,
    pub last_message_id: Option<MessageId>,
    pub delivered: bool,
}

impl VerificationReport {
    /// Build a report from raw observations
    pub fn evaluate(
        expected_count: u64,
        before: u64,
        after: u64,
        last_message_id: Option<MessageId>,
        delivered: bool,
    ) -> Self {
        // A counter that went backwards is a mismatch, not a panic
        let observed_count = after.saturating_sub(before);
        let count_ok = after >= before && observed_count == expected_count;
        Self {
            expected_count,
            observed_count,
            count_ok,
            last_message_id,
            delivered,
        }
    }

    pub fn passed(&self) -> bool {
        self.count_ok && self.delivered
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "delivered={}, countOk={} (expected delta {}, observed delta {}",
            self.delivered, self.count_ok, self.expected_count, self.observed_count
        )?;
        match self.last_message_id {
            Some(id) => write!(f, ", last message {})", id),
            None => write!(f, ", empty batch)"),
        }
    }
}

pub struct CompletionVerifier {
    source: SourceQueue,
    echo: EchoApp,
}

impl CompletionVerifier {
    pub fn new(source: SourceQueue, echo: EchoApp) -> Self {
        Self { source, echo }
    }

    /// Read the destination observable before the batch
    pub async fn baseline(&self) -> Result<Baseline, RelayError> {
        let request_count = self.echo.request_count().await.map_err(|e| RelayError::Read {
            message_id: None,
            phase: Phase::Observe,
            source: e,
        })?;
        Ok(Baseline { request_count })
    }

    /// Compare post-batch state against the baseline.
    ///
    /// Returns the report whether or not it passed; read failures are errors.
    pub async fn verify(
        &self,
        batch: &RelayBatch,
        baseline: Baseline,
    ) -> Result<VerificationReport, RelayError> {
        let after = self.echo.request_count().await.map_err(|e| RelayError::Read {
            message_id: batch.last_id(),
            phase: Phase::Observe,
            source: e,
        })?;

        let last = batch.last_id();
        let delivered = match last {
            Some(id) => self
                .source
                .inbound_response_delivered(id)
                .await
                .map_err(|e| RelayError::Read {
                    message_id: Some(id),
                    phase: Phase::Observe,
                    source: e,
                })?,
            // Nothing to deliver
            None => true,
        };

        let report = VerificationReport::evaluate(
            batch.len() as u64,
            baseline.request_count,
            after,
            last,
            delivered,
        );

        if report.passed() {
            info!(
                expected = report.expected_count,
                observed = report.observed_count,
                "Completion verified"
            );
        } else {
            warn!(
                expected = report.expected_count,
                observed = report.observed_count,
                delivered = report.delivered,
                count_ok = report.count_ok,
                "Completion check failed"
            );
        }
        Ok(report)
    }
}
