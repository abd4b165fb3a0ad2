//! Retrying waiter for cross-ledger reads
//!
//! The two ledgers are causally independent: nothing tells the relay that a
//! request or response has become readable. The waiter polls a read until it
//! returns data, fails for a reason outside the not-found allow-list, or the
//! deadline passes.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::gateway::GatewayError;

/// Failure signatures meaning "the data does not exist on this ledger yet"
pub const DEFAULT_NOT_FOUND_SIGNATURES: &[&str] =
    &["CONTRACT_REVERT_EXECUTED", "MessageNotFound", "ResponseNotFound"];

/// Deadline and cadence of one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Classifies errors for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadErrorClass {
    /// Data not produced yet - retry after the poll interval
    NotFoundYet,
    /// Anything else - rethrow immediately
    Fatal,
}

/// Fixed allow-list of not-found signatures, matched as substrings of the
/// rendered gateway error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotFoundSignatures {
    signatures: Vec<String>,
}

impl Default for NotFoundSignatures {
    fn default() -> Self {
        Self {
            signatures: DEFAULT_NOT_FOUND_SIGNATURES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl NotFoundSignatures {
    /// Defaults plus operator-supplied entries (duplicates and blanks dropped)
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        for sig in extra {
            let sig = sig.as_ref().trim();
            if !sig.is_empty() && !list.signatures.iter().any(|s| s == sig) {
                list.signatures.push(sig.to_string());
            }
        }
        list
    }

    pub fn as_slice(&self) -> &[String] {
        &self.signatures
    }

    /// Classify a read failure
    pub fn classify(&self, error: &GatewayError) -> ReadErrorClass {
        // Transport/decode failures are never "not found", whatever their text says
        let reason = match error {
            GatewayError::Reverted { reason } => reason,
            _ => return ReadErrorClass::Fatal,
        };
        if self.signatures.iter().any(|sig| reason.contains(sig.as_str())) {
            ReadErrorClass::NotFoundYet
        } else {
            ReadErrorClass::Fatal
        }
    }
}

/// Why a wait ended without data
#[derive(Debug, Clone)]
pub enum WaitError {
    /// Deadline elapsed while the data was still missing
    Timeout {
        label: String,
        elapsed: Duration,
        attempts: u32,
    },
    /// Non-retryable read failure
    Read { label: String, source: GatewayError },
}

/// Repeatedly run `read` until it yields data.
///
/// `read` is invoked immediately. After a not-found failure the waiter gives
/// up if more than `timeout` has elapsed, otherwise it sleeps `poll_interval`
/// and tries again. Reads and sleeps are both cut off at `timeout` plus one
/// poll interval, so a slow or hung read cannot stretch the wait past that.
pub async fn wait_for<T, F, Fut>(
    policy: &WaitPolicy,
    signatures: &NotFoundSignatures,
    label: &str,
    read: F,
) -> Result<T, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    wait_for_counted(policy, signatures, label, read)
        .await
        .map(|(value, _)| value)
}

/// Like [`wait_for`], also returning how many reads it took
pub async fn wait_for_counted<T, F, Fut>(
    policy: &WaitPolicy,
    signatures: &NotFoundSignatures,
    label: &str,
    mut read: F,
) -> Result<(T, u32), WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let start = Instant::now();
    let hard_deadline = start + policy.timeout + policy.poll_interval;
    let mut attempts = 0u32;

    let timed_out = |attempts: u32| WaitError::Timeout {
        label: label.to_string(),
        elapsed: start.elapsed(),
        attempts,
    };

    loop {
        attempts += 1;
        let outcome = match tokio::time::timeout_at(hard_deadline, read()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!(label, attempts, "Read still pending at the deadline");
                return Err(timed_out(attempts));
            }
        };

        match outcome {
            Ok(value) => {
                if attempts > 1 {
                    debug!(label, attempts, elapsed_ms = start.elapsed().as_millis() as u64, "Data became available");
                }
                return Ok((value, attempts));
            }
            Err(error) => {
                if signatures.classify(&error) == ReadErrorClass::Fatal {
                    return Err(WaitError::Read {
                        label: label.to_string(),
                        source: error,
                    });
                }

                if start.elapsed() > policy.timeout {
                    return Err(timed_out(attempts));
                }

                debug!(label, attempts, error = %error, "Not available yet, polling again");
                let wake = (Instant::now() + policy.poll_interval).min(hard_deadline);
                tokio::time::sleep_until(wake).await;
            }
        }
    }
}
