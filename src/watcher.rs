//! Continuous Relay Loop
//!
//! Watches the source queue's `nextMessageId()` and relays every id from the
//! cursor up to it, in order. A failed message halts the loop: skipping it
//! would silently drop a message, so an operator has to resolve it.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::RelayError;
use crate::gateway::GatewayError;
use crate::queue::SourceQueue;
use crate::relay::RelayExecutor;
use crate::server::SharedStats;
use crate::types::{MessageId, Phase};

pub struct RelayWatcher {
    executor: RelayExecutor,
    /// Next message id to relay; owned by the loop
    cursor: MessageId,
    poll_interval: Duration,
    stats: Option<SharedStats>,
}

impl RelayWatcher {
    pub fn new(executor: RelayExecutor, start: MessageId, poll_interval: Duration) -> Self {
        Self {
            executor,
            cursor: start,
            poll_interval,
            stats: None,
        }
    }

    /// Mirror progress into `stats` for the health endpoint
    pub fn with_stats(mut self, stats: SharedStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn cursor(&self) -> MessageId {
        self.cursor
    }

    /// Main run loop: poll, then sleep, until a fatal relay error or shutdown
    pub async fn run(&mut self, mut shutdown: mpsc::Receiver<()>) -> Result<(), RelayError> {
        info!(
            cursor = %self.cursor,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Relay watcher starting"
        );

        self.poll_and_record().await?;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(cursor = %self.cursor, "Shutdown signal received");
                    break;
                }
                _ = tokio::time::sleep(self.poll_interval) => {
                    self.poll_and_record().await?;
                }
            }
        }

        Ok(())
    }

    async fn poll_and_record(&mut self) -> Result<usize, RelayError> {
        match self.poll_once().await {
            Ok(relayed) => Ok(relayed),
            Err(e) => {
                error!(cursor = %self.cursor, error = %e, "Relay halted; message must be resolved before restarting");
                if let Some(stats) = &self.stats {
                    stats.write().await.last_error = Some(e.to_string());
                }
                Err(e)
            }
        }
    }

    /// One loop body: read the latest id, then relay while `cursor <= latest`.
    ///
    /// Returns how many messages were relayed. On failure the cursor stays on
    /// the failed id.
    pub async fn poll_once(&mut self) -> Result<usize, RelayError> {
        let latest = self
            .executor
            .source()
            .next_message_id()
            .await
            .map_err(|source| RelayError::Read {
                message_id: None,
                phase: Phase::Observe,
                source,
            })?;
        debug!(cursor = %self.cursor, latest, "Polled source queue");

        let mut relayed = 0usize;
        while self.cursor.as_u64() <= latest {
            let relayed_id = self.cursor;
            self.executor.relay(relayed_id).await?;
            relayed += 1;
            match relayed_id.next() {
                Some(next) => self.cursor = next,
                None => {
                    self.publish(latest, 1, true).await;
                    return Err(RelayError::Read {
                        message_id: Some(relayed_id),
                        phase: Phase::Observe,
                        source: GatewayError::Decode("message id space exhausted".to_string()),
                    });
                }
            }
            self.publish(latest, 1, false).await;
        }
        self.publish(latest, 0, true).await;

        if relayed > 0 {
            info!(relayed, cursor = %self.cursor, latest, "Caught up with source queue");
        }
        Ok(relayed)
    }

    async fn publish(&self, latest: u64, relayed: u64, poll_done: bool) {
        if let Some(stats) = &self.stats {
            let mut stats = stats.write().await;
            stats.cursor = self.cursor.as_u64();
            stats.latest_message_id = latest;
            stats.relayed_count += relayed;
            if poll_done {
                stats.polls += 1;
            }
        }
    }
}

/// Re-derive the cursor from ledger state.
///
/// Scans delivery flags downward from `nextMessageId()` to `floor`; the first
/// delivered id found marks everything below it as done, since the loop
/// relays in order. Returns `floor` when nothing in that range has been
/// delivered.
pub async fn resume_cursor(source: &SourceQueue, floor: MessageId) -> Result<MessageId, RelayError> {
    let observe = |source| RelayError::Read {
        message_id: None,
        phase: Phase::Observe,
        source,
    };

    let latest = source.next_message_id().await.map_err(observe)?;
    let mut id = latest;
    while id >= floor.as_u64() && id > 0 {
        let delivered = source
            .inbound_response_delivered(MessageId(id))
            .await
            .map_err(observe)?;
        if delivered {
            info!(last_delivered = id, latest, "Resuming after last delivered message");
            return Ok(MessageId(id).next().unwrap_or(MessageId(id)));
        }
        id -= 1;
    }

    info!(latest, floor = %floor, "No delivered messages above the floor; resuming from it");
    Ok(floor)
}
