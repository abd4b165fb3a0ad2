//! Relayer configuration
//!
//! Loaded from the environment (after `.env`, when present) and validated
//! before any network call. Queue and application addresses may come from a
//! deployment JSON file; explicit environment variables take precedence.

use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;

use crate::gateway::EvmGatewayConfig;
use crate::waiter::{NotFoundSignatures, WaitPolicy};

/// Which relay surface is being configured; some defaults and requirements differ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Fixed batch: send, relay, verify
    Batch,
    /// Continuous loop over the source queue
    Watch,
}

/// One ledger endpoint
#[derive(Clone)]
pub struct LedgerConfig {
    pub rpc_url: String,
    /// 0x-prefixed, 64 hex chars
    pub private_key: String,
    pub queue_address: Address,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for LedgerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerConfig")
            .field("rpc_url", &self.rpc_url)
            .field("private_key", &"<redacted>")
            .field("queue_address", &self.queue_address)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Gas budget for reads
    pub query_gas: u64,
    /// Gas budget for mutations
    pub exec_gas: u64,
    pub poll_interval_ms: u64,
    /// Per-step timeout for waits and mutation finalization
    pub timeout_ms: u64,
    /// Not-found signatures in addition to the defaults
    pub extra_not_found_signatures: Vec<String>,
    /// Re-read the source delivery flag after each response hand-off
    pub confirm_delivery: bool,
}

impl RelayConfig {
    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            timeout: Duration::from_millis(self.timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn not_found_signatures(&self) -> NotFoundSignatures {
        NotFoundSignatures::with_extra(&self.extra_not_found_signatures)
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub source_app_address: Address,
    pub echo_app_address: Address,
    pub message_count: u32,
    pub message_prefix: String,
}

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub start_message_id: u64,
    pub health_bind: String,
    pub health_port: u16,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub source: LedgerConfig,
    pub destination: LedgerConfig,
    pub relay: RelayConfig,
    /// Present in batch mode
    pub batch: Option<BatchConfig>,
    /// Present in watch mode
    pub watch: Option<WatchConfig>,
}

fn default_src_rpc_url() -> String {
    "http://127.0.0.1:7546".to_string()
}

fn default_dst_rpc_url() -> String {
    "http://127.0.0.1:7547".to_string()
}

fn default_message_count() -> u32 {
    3
}

fn default_message_prefix() -> String {
    "clpr-relay-msg-".to_string()
}

fn default_query_gas() -> u64 {
    1_500_000
}

fn default_exec_gas(mode: RunMode) -> u64 {
    match mode {
        RunMode::Batch => 3_000_000,
        RunMode::Watch => 12_000_000,
    }
}

fn default_poll_interval(mode: RunMode) -> u64 {
    match mode {
        RunMode::Batch => 500,
        RunMode::Watch => 1000,
    }
}

fn default_timeout() -> u64 {
    60_000
}

fn default_start_message_id() -> u64 {
    1
}

fn default_health_port() -> u16 {
    9099
}

/// Addresses recorded by the deployment scripts
#[derive(Debug, Default, Deserialize)]
pub struct Deployment {
    #[serde(default)]
    pub src: DeploymentSide,
    #[serde(default)]
    pub dst: DeploymentSide,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSide {
    #[serde(alias = "queueContractId")]
    pub queue_address: Option<String>,
    #[serde(alias = "sourceApplicationContractId")]
    pub source_application_address: Option<String>,
    #[serde(alias = "echoApplicationContractId")]
    pub echo_application_address: Option<String>,
}

impl Deployment {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read deployment file {}", path.display()))?;
        serde_json::from_str(&raw)
            .wrap_err_with(|| format!("Invalid deployment JSON in {}", path.display()))
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Parse an optional variable; present-but-invalid is an error, not a default
fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| eyre!("{} must be a valid {}: {}", key, std::any::type_name::<T>(), e)),
        None => Ok(default),
    }
}

fn parse_bool(key: &str, default: bool) -> Result<bool> {
    match var(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(eyre!("{} must be a boolean, got {:?}", key, v)),
    }
}

/// Validate and parse a 0x-prefixed 20-byte address
pub fn parse_address(name: &str, raw: &str) -> Result<Address> {
    if raw.len() != 42 || !raw.starts_with("0x") {
        return Err(eyre!(
            "{} must be a valid hex address (42 chars with 0x prefix), got {:?}",
            name,
            raw
        ));
    }
    Address::from_str(raw).map_err(|e| eyre!("{} is not a valid address: {}", name, e))
}

/// Accept keys with or without 0x; always return the 0x form
pub fn normalize_private_key(name: &str, raw: &str) -> Result<String> {
    let hex_part = raw.trim().trim_start_matches("0x");
    if hex_part.len() != 64 || hex::decode(hex_part).is_err() {
        return Err(eyre!("{} must be 64 hex chars (0x prefix optional)", name));
    }
    Ok(format!("0x{}", hex_part))
}

/// First entry of a comma-separated key list
fn first_listed_key() -> Option<String> {
    var("PRIVATE_KEYS").and_then(|list| {
        list.split(',')
            .map(str::trim)
            .find(|k| !k.is_empty())
            .map(str::to_string)
    })
}

fn resolve_private_key(side_key: &str) -> Result<String> {
    let raw = var(side_key)
        .or_else(|| var("CLPR_PRIVATE_KEY"))
        .or_else(first_listed_key)
        .ok_or_else(|| {
            eyre!(
                "{} (or CLPR_PRIVATE_KEY / PRIVATE_KEYS) environment variable is required",
                side_key
            )
        })?;
    normalize_private_key(side_key, &raw)
}

/// Env variable first, then the deployment file entry
fn resolve_address(key: &str, from_deployment: Option<&String>) -> Result<Address> {
    let raw = var(key)
        .or_else(|| from_deployment.cloned())
        .ok_or_else(|| eyre!("{} environment variable (or CLPR_DEPLOYMENT_JSON entry) is required", key))?;
    parse_address(key, &raw)
}

impl Config {
    /// Load configuration, reading `.env` first when present
    pub fn load(mode: RunMode) -> Result<Self> {
        Self::load_from_file(".env", mode)
    }

    /// Load from a specific .env file path, then the environment
    pub fn load_from_file(path: &str, mode: RunMode) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
            tracing::debug!("Loaded .env from {}", path);
        }
        Self::load_from_env(mode)
    }

    /// Load configuration from environment variables
    pub fn load_from_env(mode: RunMode) -> Result<Self> {
        let deployment = match var("CLPR_DEPLOYMENT_JSON") {
            Some(path) => Deployment::from_file(Path::new(&path))?,
            None => Deployment::default(),
        };

        let source = LedgerConfig {
            rpc_url: var("CLPR_SRC_RPC_URL").unwrap_or_else(default_src_rpc_url),
            private_key: resolve_private_key("CLPR_SRC_PRIVATE_KEY")?,
            queue_address: resolve_address(
                "CLPR_SRC_QUEUE_ADDRESS",
                deployment.src.queue_address.as_ref(),
            )?,
        };

        let destination = LedgerConfig {
            rpc_url: var("CLPR_DST_RPC_URL").unwrap_or_else(default_dst_rpc_url),
            private_key: resolve_private_key("CLPR_DST_PRIVATE_KEY")?,
            queue_address: resolve_address(
                "CLPR_DST_QUEUE_ADDRESS",
                deployment.dst.queue_address.as_ref(),
            )?,
        };

        // Watch mode keeps the gas variable of the continuous relayer script
        let exec_gas_default = match mode {
            RunMode::Batch => default_exec_gas(mode),
            RunMode::Watch => parse_var("CLPR_RELAYER_GAS_LIMIT", default_exec_gas(mode))?,
        };

        let relay = RelayConfig {
            query_gas: parse_var("CLPR_QUERY_GAS", default_query_gas())?,
            exec_gas: parse_var("CLPR_EXEC_GAS", exec_gas_default)?,
            poll_interval_ms: parse_var("CLPR_POLL_MS", default_poll_interval(mode))?,
            timeout_ms: parse_var("CLPR_TIMEOUT_MS", default_timeout())?,
            extra_not_found_signatures: var("CLPR_NOT_FOUND_SIGNATURES")
                .map(|list| {
                    list.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            confirm_delivery: parse_bool("CLPR_CONFIRM_DELIVERY", false)?,
        };

        let batch = match mode {
            RunMode::Batch => Some(BatchConfig {
                source_app_address: resolve_address(
                    "CLPR_SRC_SOURCE_APP_ADDRESS",
                    deployment.src.source_application_address.as_ref(),
                )?,
                echo_app_address: resolve_address(
                    "CLPR_DST_ECHO_APP_ADDRESS",
                    deployment.dst.echo_application_address.as_ref(),
                )?,
                message_count: parse_var("CLPR_MESSAGE_COUNT", default_message_count())?,
                message_prefix: var("CLPR_MESSAGE_PREFIX").unwrap_or_else(default_message_prefix),
            }),
            RunMode::Watch => None,
        };

        let watch = match mode {
            RunMode::Watch => Some(WatchConfig {
                start_message_id: parse_var("CLPR_START_MESSAGE_ID", default_start_message_id())?,
                health_bind: var("CLPR_HEALTH_BIND").unwrap_or_else(|| "0.0.0.0".to_string()),
                health_port: parse_var("CLPR_HEALTH_PORT", default_health_port())?,
            }),
            RunMode::Batch => None,
        };

        let config = Config {
            source,
            destination,
            relay,
            batch,
            watch,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for (name, ledger) in [("source", &self.source), ("destination", &self.destination)] {
            if ledger.rpc_url.is_empty() {
                return Err(eyre!("{}.rpc_url cannot be empty", name));
            }
            if ledger.queue_address == Address::ZERO {
                return Err(eyre!("{}.queue_address cannot be the zero address", name));
            }
        }

        if self.relay.poll_interval_ms == 0 {
            return Err(eyre!("relay.poll_interval_ms must be greater than 0"));
        }
        if self.relay.timeout_ms == 0 {
            return Err(eyre!("relay.timeout_ms must be greater than 0"));
        }
        if self.relay.query_gas == 0 || self.relay.exec_gas == 0 {
            return Err(eyre!("relay gas budgets must be greater than 0"));
        }

        if let Some(batch) = &self.batch {
            if batch.message_count == 0 {
                return Err(eyre!("batch.message_count must be at least 1"));
            }
        }

        if let Some(watch) = &self.watch {
            if watch.start_message_id == 0 {
                return Err(eyre!("watch.start_message_id must be at least 1 (message ids are positive)"));
            }
        }

        Ok(())
    }

    /// Gateway settings for the source ledger
    pub fn source_gateway(&self) -> EvmGatewayConfig {
        self.gateway_config("source", &self.source)
    }

    /// Gateway settings for the destination ledger
    pub fn destination_gateway(&self) -> EvmGatewayConfig {
        self.gateway_config("destination", &self.destination)
    }

    fn gateway_config(&self, label: &str, ledger: &LedgerConfig) -> EvmGatewayConfig {
        EvmGatewayConfig {
            label: label.to_string(),
            rpc_url: ledger.rpc_url.clone(),
            private_key: ledger.private_key.clone(),
            query_gas: self.relay.query_gas,
            exec_gas: self.relay.exec_gas,
            call_timeout: Duration::from_millis(self.relay.timeout_ms),
            finalize_timeout: Duration::from_millis(self.relay.timeout_ms),
        }
    }
}
