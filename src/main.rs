//! CLPR Relayer
//!
//! Moves request/response pairs between two ledgers' relayed queues.
//!
//! - `batch`: send N messages through the source application, relay each,
//!   then verify the destination counter and the source delivery flag
//! - `watch`: follow the source queue's message counter and relay every new
//!   message in order until a message fails or the process is signalled

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use eyre::Result;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use clpr_relayer::batch::BatchRunner;
use clpr_relayer::config::{Config, RunMode};
use clpr_relayer::gateway::{EvmGateway, LedgerGateway};
use clpr_relayer::metrics::Metrics;
use clpr_relayer::queue::{DestinationQueue, EchoApp, SourceApp, SourceQueue};
use clpr_relayer::relay::RelayExecutor;
use clpr_relayer::sequencer::{payloads_with_prefix, MessageSequencer};
use clpr_relayer::server::{self, RelayerStats, SharedStats};
use clpr_relayer::types::MessageId;
use clpr_relayer::verifier::CompletionVerifier;
use clpr_relayer::watcher::{resume_cursor, RelayWatcher};

#[derive(Parser)]
#[command(name = "clpr-relayer")]
#[command(about = "Cross-ledger CLPR message relayer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a fixed batch, relay it and verify the end-to-end effect
    Batch {
        /// Number of messages (overrides CLPR_MESSAGE_COUNT)
        #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
        count: Option<u32>,

        /// Payload prefix (overrides CLPR_MESSAGE_PREFIX)
        #[arg(short, long)]
        prefix: Option<String>,
    },

    /// Relay every new source message, indefinitely
    Watch {
        /// First message id to relay (overrides CLPR_START_MESSAGE_ID)
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        start_id: Option<u64>,

        /// Derive the starting id from the source queue's delivery flags,
        /// scanning no lower than CLPR_START_MESSAGE_ID
        #[arg(long, conflicts_with = "start_id")]
        resume: bool,

        /// Do not start the health/metrics server
        #[arg(long)]
        no_server: bool,
    },
}

fn main() -> ExitCode {
    if let Err(e) = color_eyre::install() {
        eprintln!("failed to install error handler: {}", e);
        return ExitCode::FAILURE;
    }

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(async_main(cli.command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn async_main(command: Commands) -> Result<()> {
    match command {
        Commands::Batch { count, prefix } => run_batch(count, prefix).await,
        Commands::Watch {
            start_id,
            resume,
            no_server,
        } => run_watch(start_id, resume, no_server).await,
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,clpr_relayer=debug"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

/// Both gateways, connected and checked before any relay work
async fn connect(config: &Config) -> Result<(Arc<dyn LedgerGateway>, Arc<dyn LedgerGateway>)> {
    let source: Arc<dyn LedgerGateway> = Arc::new(EvmGateway::connect(&config.source_gateway()).await?);
    let destination: Arc<dyn LedgerGateway> =
        Arc::new(EvmGateway::connect(&config.destination_gateway()).await?);
    Ok((source, destination))
}

fn executor(
    config: &Config,
    source: SourceQueue,
    destination: DestinationQueue,
    metrics: Arc<Metrics>,
) -> RelayExecutor {
    RelayExecutor::new(
        source,
        destination,
        config.relay.wait_policy(),
        config.relay.not_found_signatures(),
        metrics,
    )
    .with_confirm_delivery(config.relay.confirm_delivery)
}

async fn run_batch(count: Option<u32>, prefix: Option<String>) -> Result<()> {
    let config = Config::load(RunMode::Batch)?;
    let batch_config = config
        .batch
        .clone()
        .ok_or_else(|| eyre::eyre!("batch configuration missing"))?;
    let count = count.unwrap_or(batch_config.message_count);
    let prefix = prefix.unwrap_or(batch_config.message_prefix);
    info!(
        src_rpc = %config.source.rpc_url,
        dst_rpc = %config.destination.rpc_url,
        src_queue = %config.source.queue_address,
        dst_queue = %config.destination.queue_address,
        count,
        "Configuration loaded"
    );

    let (src_gateway, dst_gateway) = connect(&config).await?;
    let metrics = Arc::new(Metrics::new());

    let source_queue = SourceQueue::new(src_gateway.clone(), config.source.queue_address);
    let destination_queue = DestinationQueue::new(dst_gateway.clone(), config.destination.queue_address);

    let runner = BatchRunner::new(
        MessageSequencer::new(
            source_queue.clone(),
            SourceApp::new(src_gateway, batch_config.source_app_address),
            metrics.clone(),
        ),
        executor(&config, source_queue.clone(), destination_queue, metrics),
        CompletionVerifier::new(source_queue, EchoApp::new(dst_gateway, batch_config.echo_app_address)),
    );

    let outcome = runner.run(&payloads_with_prefix(&prefix, count)).await?;
    info!(
        ids = ?outcome.batch.ids(),
        elapsed_ms = outcome.elapsed.as_millis() as u64,
        "Batch relayed and verified"
    );
    Ok(())
}

async fn run_watch(start_id: Option<u64>, resume: bool, no_server: bool) -> Result<()> {
    let config = Config::load(RunMode::Watch)?;
    let watch_config = config
        .watch
        .clone()
        .ok_or_else(|| eyre::eyre!("watch configuration missing"))?;
    info!(
        src_rpc = %config.source.rpc_url,
        dst_rpc = %config.destination.rpc_url,
        src_queue = %config.source.queue_address,
        dst_queue = %config.destination.queue_address,
        "Configuration loaded"
    );

    let (src_gateway, dst_gateway) = connect(&config).await?;
    let metrics = Arc::new(Metrics::new());
    let source_queue = SourceQueue::new(src_gateway, config.source.queue_address);
    let destination_queue = DestinationQueue::new(dst_gateway, config.destination.queue_address);

    let configured_start = MessageId(start_id.unwrap_or(watch_config.start_message_id));
    let start = if resume {
        resume_cursor(&source_queue, configured_start).await?
    } else {
        configured_start
    };

    let stats: SharedStats = Arc::new(RwLock::new(RelayerStats {
        cursor: start.as_u64(),
        ..Default::default()
    }));

    if !no_server {
        let server_stats = stats.clone();
        let server_metrics = metrics.clone();
        let bind = watch_config.health_bind.clone();
        let port = watch_config.health_port;
        tokio::spawn(async move {
            if let Err(e) = server::start_server(&bind, port, server_stats, server_metrics).await {
                warn!(error = %e, "Health server stopped");
            }
        });
    }

    let mut watcher = RelayWatcher::new(
        executor(&config, source_queue, destination_queue, metrics),
        start,
        Duration::from_millis(config.relay.poll_interval_ms),
    )
    .with_stats(stats);

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    watcher.run(shutdown_rx).await?;

    info!(cursor = %watcher.cursor(), "CLPR relayer stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
