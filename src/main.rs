use std::sync::Arc;
use std::time::Duration;

use eyre::WrapErr;
use tokio::sync::watch;

use bridge_operator::alerts::{AlertSink, LogAlertSink, WebhookAlertSink};
use bridge_operator::api;
use bridge_operator::chain::{ChainPair, HttpChainClient};
use bridge_operator::config::Config;
use bridge_operator::db::{self, PgJournal};
use bridge_operator::error::ChainKind;
use bridge_operator::validators::{parse_public_key, HttpValidator, ValidatorEntry};
use bridge_operator::{BridgeService, ServiceSettings};

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    tracing::info!("Starting bridge operator");

    let config = Config::load()?;
    tracing::info!(
        validators = config.validators.len(),
        min_validators = config.bridge.min_validators,
        api = %config.api.socket_addr()?,
        "Configuration loaded"
    );

    let pool = db::create_pool(&config.database.url).await?;
    tracing::info!("Database connected");
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let timeout = Duration::from_millis(config.chains.request_timeout_ms);
    let ethereum = HttpChainClient::new(
        ChainKind::Ethereum,
        &config.chains.ethereum_adapter_url,
        timeout,
    )?;
    let solana = HttpChainClient::new(ChainKind::Solana, &config.chains.solana_adapter_url, timeout)?;
    let chains = ChainPair::new(
        Arc::new(ethereum),
        Arc::new(solana),
        config.chains.ethereum_reserve_account.clone(),
        config.chains.solana_reserve_account.clone(),
    );

    let mut validators = Vec::with_capacity(config.validators.len());
    for v in &config.validators {
        let public_key = parse_public_key(&v.public_key)
            .wrap_err_with(|| format!("invalid public key for validator {}", v.id))?;
        let signer = HttpValidator::new(&v.url, timeout)?;
        validators.push(ValidatorEntry::new(v.id.clone(), public_key, Arc::new(signer)));
    }

    let sink: Arc<dyn AlertSink> = match &config.alerts.webhook_url {
        Some(url) => Arc::new(WebhookAlertSink::new(url, timeout)?),
        None => Arc::new(LogAlertSink),
    };

    let settings = ServiceSettings {
        bridge: config.bridge.clone(),
        monitor: config.monitor.clone(),
        admin_override_token: config.overrides.admin_token.clone(),
        alert_dedupe_ttl: config.alerts.dedupe_ttl,
    };
    let service = Arc::new(BridgeService::new(
        settings,
        chains,
        validators,
        Arc::new(PgJournal::new(pool)),
        sink,
    ));
    service.initialize().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let api_addr = config.api.socket_addr()?;
    let api_service = service.clone();
    let api_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = api::start_server(api_addr, api_service, api_shutdown).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    service.run(shutdown_rx).await;

    tracing::info!("Bridge operator stopped");
    Ok(())
}

/// Structured logging; `LOG_FORMAT=json` for machine-readable output
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bridge_operator=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .with(filter)
            .init();
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
