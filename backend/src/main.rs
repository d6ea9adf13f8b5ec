//! Service entry-point: loads settings, wires adapters, serves HTTP, and runs
//! the outbox relay and the activation-mail consumer until shutdown.

mod server;

use std::ffi::OsString;
use std::io;
use std::sync::Arc;

use actix_web::web;
use mockable::{Clock, DefaultClock};
use ortho_config::OrthoConfig;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use accounts::inbound::http::health::HealthState;
use accounts::outbound::persistence::{DbPool, run_pending_migrations};
use server::{
    Adapters, AppSettings, Workers, build_consumer, build_http_state, build_relay, create_server,
};

async fn build_adapters(settings: &AppSettings, clock: Arc<dyn Clock>) -> io::Result<Adapters> {
    let lease = settings.consumer_lease();
    let Some(pool_config) = settings.pool_config() else {
        warn!("no database configured; using in-memory adapters");
        return Ok(Adapters::in_memory(clock, lease));
    };

    let applied = run_pending_migrations(pool_config.database_url())
        .await
        .map_err(|err| io::Error::other(err.to_string()))?;
    info!(applied, "database migrations complete");

    let pool = DbPool::new(pool_config)
        .await
        .map_err(|err| io::Error::other(err.to_string()))?;
    Ok(Adapters::diesel(&pool, lease))
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let args: Vec<OsString> = std::env::args_os().collect();
    let settings = AppSettings::load_from_iter(args)
        .map_err(|err| io::Error::other(format!("failed to load settings: {err}")))?;
    let bind_addr = settings.bind_addr().map_err(io::Error::other)?;

    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
    let adapters = build_adapters(&settings, clock.clone()).await?;

    let http_state = build_http_state(&adapters, clock.clone(), &settings);
    let relay = build_relay(&adapters, clock.clone(), &settings);
    let consumer = build_consumer(&adapters, clock, &settings)?;
    let workers = Workers::spawn(relay, consumer, adapters.subscriber.clone());

    let health_state = web::Data::new(HealthState::new());
    let server = create_server(health_state.clone(), http_state, bind_addr)?;
    health_state.mark_ready();
    info!(%bind_addr, "accounts service listening");

    let served = server.await;

    health_state.mark_unhealthy();
    workers.stop().await;
    served
}
