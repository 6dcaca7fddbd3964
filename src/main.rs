use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::{
    auth::{seed_admin, PasswordHasher, TokenIssuer},
    backend::BookingBackend,
    booking::BookingGuard,
    clock::ShopClock,
    configuration::Configuration,
    configuration_handler::ConfigurationHandler,
    database_interface::DatabaseInterface,
    http::create_app,
    local_store::LocalStore,
    rate_limit::RateLimiter,
};
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod auth;
mod backend;
mod booking;
mod clock;
mod configuration;
mod configuration_handler;
mod database_interface;
mod error;
mod http;
mod local_store;
mod rate_limit;
mod schema;
mod slots;
#[cfg(test)]
mod testutils;
mod types;

/// Shared request state. Every field is a cheap clone.
#[derive(Clone)]
pub struct AppState<T: BookingBackend> {
    pub backend: T,
    pub booking: BookingGuard<T>,
    pub clock: ShopClock,
    pub tokens: TokenIssuer,
    pub passwords: PasswordHasher,
    pub rate_limiter: Arc<Mutex<RateLimiter>>,
}

fn prepare_backend<T: BookingBackend, C: Configuration>(backend: &T, configuration: &C) {
    let Some(account) = configuration.admin_account() else {
        return;
    };
    let passwords = PasswordHasher::new(configuration.password_hash_iterations());
    if let Err(err) = seed_admin(backend, &passwords, &account) {
        error!(?err, email = %account.email, "Failed to create administrator account");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let configuration = ConfigurationHandler::parse_arguments();

    let address = format!("0.0.0.0:{}", configuration.port());
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(%address, "Barbershop manager listening");

    let app = if let Some(database_url) = configuration.database_url() {
        let backend = loop {
            match DatabaseInterface::new(&database_url, configuration.database_pool_size()) {
                Ok(backend) => {
                    info!("Successfully connected to database");
                    break backend;
                }
                Err(err) => {
                    error!(
                        ?err,
                        "Failed to connect to database, retrying in 1 sec. \
                         Unset DATABASE_URL to use the in-memory store instead."
                    );
                    sleep(Duration::from_secs(1)).await;
                }
            }
        };
        prepare_backend(&backend, &configuration);
        create_app(backend, configuration)
    } else {
        warn!("No database configured, appointments are kept in memory only");
        let backend = LocalStore::default();
        prepare_backend(&backend, &configuration);
        create_app(backend, configuration)
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
