//! CLPR Relayer - Library interface
//!
//! Re-exports internal modules for use by the binary and integration tests.

pub mod batch;
pub mod config;
pub mod contracts;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod queue;
pub mod relay;
pub mod sequencer;
pub mod server;
pub mod types;
pub mod verifier;
pub mod waiter;
pub mod watcher;

pub use error::RelayError;
pub use gateway::{EmittedLog, Execution, GatewayError, LedgerGateway};
pub use types::{MessageId, Phase, RelayBatch, RelayReceipt, SessionState};
