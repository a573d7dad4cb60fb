use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod adapter;
pub mod api;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod db;
pub mod repository;
pub mod service;

#[cfg(test)]
mod test_support;

use crate::api::AppState;
use crate::auth::{LoginRedirect, TrustedHeaderAuthenticator};
use crate::catalog::CmrClient;
use crate::config::Config;
use crate::repository::{JobStore, MemoryJobStore, PgJobStore};
use crate::service::callback::CallbackRegistry;
use crate::service::invoker::{ServiceInvoker, ServiceRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "harmony_frontend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Harmony Frontend...");

    let config = Config::parse();
    config.validate().context("Invalid configuration")?;

    let store: Arc<dyn JobStore> = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");

            let pool = db::create_pool(database_url)
                .await
                .context("Failed to create database pool")?;

            tracing::info!("Database connection pool created");

            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;

            Arc::new(PgJobStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL is not set, jobs will be kept in memory");
            Arc::new(MemoryJobStore::new())
        }
    };

    let services = match &config.services_config {
        Some(path) => ServiceRegistry::from_file(path)?,
        None => {
            tracing::warn!("SERVICES_CONFIG is not set, using the built-in noop service");
            ServiceRegistry::default_services()
        }
    };
    for service in services.services() {
        tracing::info!(
            "Service {} serves {:?} (async: {})",
            service.name,
            service.collections,
            service.is_async
        );
    }

    let callbacks = CallbackRegistry::new();
    let invoker = ServiceInvoker::new(
        services,
        store.clone(),
        callbacks.clone(),
        &config.callback_url_root,
        config.service_timeout(),
    );

    let catalog = CmrClient::new(&config.cmr_endpoint).context("Failed to create CMR client")?;
    let auth = TrustedHeaderAuthenticator::new(&config.auth_user_header)
        .context("Invalid AUTH_USER_HEADER")?;
    let login = LoginRedirect::new(
        &config.oauth_host,
        &config.oauth_client_id,
        &config.callback_url_root,
    )
    .context("Invalid OAuth configuration")?;

    let state = AppState {
        store,
        catalog: Arc::new(catalog),
        invoker: Arc::new(invoker),
        callbacks,
        auth: Arc::new(auth),
        login: Arc::new(login),
        default_granule_limit: config.default_granule_limit,
    };

    // Build router with all API endpoints
    let app = api::create_router(state);

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
