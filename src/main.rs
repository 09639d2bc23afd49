//! Subscription renewals service.
//!
//! Loads configuration, wires storage (PostgreSQL when a database URL is
//! set, in-memory otherwise), starts the renewal scheduler and delayed task
//! runner, and serves the webhook/scheduler HTTP API until Ctrl-C.

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use subscription_renewals::adapters::events::NotificationBus;
use subscription_renewals::adapters::http::{billing_router, AppState};
use subscription_renewals::adapters::memory::InMemoryPorts;
use subscription_renewals::adapters::postgres::postgres_ports;
use subscription_renewals::application::{BillingPorts, BillingServices};
use subscription_renewals::config::AppConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    init_tracing(&config);

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }
    tracing::info!(environment = ?config.server.environment, "Configuration loaded");

    let cipher = config.vault.cipher()?;
    if !config.vault.is_encrypting() {
        tracing::warn!(
            "No vault master key configured; \
             payment tokens are stored with a labelled base64 encoding"
        );
    }

    let ports = build_ports(&config, cipher).await?;
    let gateways = config.gateways.registry();
    if gateways.is_empty() {
        tracing::warn!(
            "No payment gateways configured; renewals will suspend with a configuration error"
        );
    } else {
        tracing::info!(gateways = ?gateways.ids(), "Payment gateways registered");
    }

    let settings = config
        .billing
        .settings(config.gateways.charge_timeout())?;
    let services = BillingServices::new(ports, gateways, settings);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers = Vec::new();
    if config.billing.run_background_jobs {
        let scheduler = services.scheduler.clone();
        let rx = shutdown_rx.clone();
        workers.push(tokio::spawn(async move { scheduler.run(rx).await }));

        let tasks = services.tasks.clone();
        let rx = shutdown_rx.clone();
        workers.push(tokio::spawn(async move { tasks.run(rx).await }));
    } else {
        tracing::info!("Background jobs disabled; renewals run only via POST /scheduler/tick");
    }

    let state = AppState::new(services, config.billing.scheduler_token.clone());
    let app = billing_router(state, config.server.request_timeout());

    let addr = config.server.socket_addr()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "Background job panicked");
        }
    }
    tracing::info!("Shut down");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));

    if config.is_production() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn build_ports(
    config: &AppConfig,
    cipher: Arc<dyn subscription_renewals::ports::TokenCipher>,
) -> Result<BillingPorts, Box<dyn std::error::Error>> {
    let Some(url) = config.database.url() else {
        tracing::warn!("No database URL configured; using in-memory storage");
        return Ok(InMemoryPorts::new().ports(cipher));
    };
    let pool = config.database.pool_options().connect(url).await?;
    tracing::info!("Database pool established");

    if config.database.run_migrations {
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Migrations applied");
    }

    Ok(postgres_ports(pool, cipher, Arc::new(NotificationBus::new())))
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl-C, shutting down"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}
