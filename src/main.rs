//! EVM Operator - gated operations and nonce-safe transaction submission
//!
//! Serves `{kind, parameters}` operations over HTTP against a single EVM
//! network, signing with a locally held key when writes are enabled.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use evm_operator::api::{self, AppState};
use evm_operator::audit::AuditLog;
use evm_operator::chain::{ChainClient, RpcChainClient};
use evm_operator::config::{LogFormat, Settings};
use evm_operator::contracts::multicall3::MULTICALL3_ADDRESS;
use evm_operator::gate::OperationGate;
use evm_operator::metrics::MetricsServer;
use evm_operator::multicall::MulticallAggregator;
use evm_operator::ops::OperationDispatcher;
use evm_operator::tx::{GasPolicy, NonceManager, TransactionSubmitter};
use evm_operator::wallet::Account;

/// How often terminal records past retention are dropped
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first so the log format is known
    let settings = Settings::load()?;
    init_logging(&settings.logging.format);

    info!("Starting EVM Operator v{}", env!("CARGO_PKG_VERSION"));

    // Chain connection and identity check
    let rpc = RpcChainClient::new(settings.chain.clone())
        .context("Failed to create RPC client")?;
    let remote_chain_id = rpc
        .remote_chain_id()
        .await
        .context("Failed to query chain id")?;
    if remote_chain_id != settings.chain.chain_id {
        bail!(
            "Node reports chain id {} but {} is configured",
            remote_chain_id,
            settings.chain.chain_id
        );
    }
    let client: Arc<dyn ChainClient> = Arc::new(rpc);
    info!(chain_id = remote_chain_id, "Chain connection established");

    // Signing account is optional; without it the operator is read-only
    let account = Account::from_env(&settings.wallet.private_key_env, settings.chain.chain_id)?;
    if account.is_none() {
        warn!(
            var = %settings.wallet.private_key_env,
            "No signing key configured, running read-only"
        );
    }

    // Optional audit store
    let audit = if settings.audit.enabled {
        let audit = AuditLog::connect(&settings.audit).await?;
        audit.run_migrations().await?;
        info!("Audit database ready");
        Some(Arc::new(audit))
    } else {
        None
    };

    let nonces = Arc::new(NonceManager::new(client.clone()));
    let gas = Arc::new(GasPolicy::new(client.clone(), &settings.gas));
    let submitter = account.clone().map(|account| {
        TransactionSubmitter::new(
            client.clone(),
            account,
            nonces.clone(),
            gas.clone(),
            settings.submitter.clone(),
            audit.clone(),
        )
    });

    let gate = OperationGate::new(&settings.gate, account.is_some())?;
    if gate.write_enabled() {
        warn!("Write operations are ENABLED");
    }

    let multicall_address = settings
        .contracts
        .multicall_address
        .or_else(|| MULTICALL3_ADDRESS.parse().ok());
    let dispatcher = Arc::new(OperationDispatcher::new(
        client.clone(),
        gate,
        MulticallAggregator::new(client.clone(), multicall_address),
        gas,
        nonces,
        account,
        submitter.clone(),
        settings.contracts.router_address,
        settings.submitter.wait_timeout(),
    ));

    let shutdown = CancellationToken::new();

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Drop settled records once their retention has passed
    let prune_handle = submitter.clone().map(|submitter| {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PRUNE_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let pruned = submitter.prune();
                        if pruned > 0 {
                            info!(pruned, "Pruned settled transaction records");
                        }
                    }
                }
            }
        })
    });

    // Start API server
    let state = AppState {
        dispatcher,
        client,
        submitter: submitter.clone(),
        audit,
        api_token: settings.server.api_token.clone(),
        started_at: Instant::now(),
    };
    let api_handle = tokio::spawn({
        let config = settings.server.clone();
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = api::run_server(config, state, shutdown.cancelled_owned()).await {
                error!("API server error: {}", e);
            }
        }
    });

    info!("EVM Operator is running");
    info!("API server: http://{}:{}", settings.server.host, settings.server.port);

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Stop tracking; broadcasts already sent stay on the network
    shutdown.cancel();
    if let Some(submitter) = &submitter {
        let pending = submitter.pending_count();
        if pending > 0 {
            warn!(pending, "Stopping with transactions still pending");
        }
        submitter.shutdown();
    }

    if let Err(e) = api_handle.await {
        warn!("API task ended abnormally: {}", e);
    }
    if let Some(h) = prune_handle {
        h.abort();
    }
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("EVM Operator stopped");
    Ok(())
}

fn init_logging(format: &LogFormat) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,evm_operator=debug,sqlx=warn,hyper=warn")
    });

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
