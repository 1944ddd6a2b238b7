use anyhow::{Context, Result};
use pgebus::{publish_event, Event, EventRouter, EventSystem, HandlerError, Settings};
use sqlx::{Postgres, Transaction};
use tracing::info;

/// Minimal example handler: logs the payload of every `demo.ping` event.
async fn handle_ping(_tx: &mut Transaction<'_, Postgres>, event: &Event) -> Result<(), HandlerError> {
    info!(event_id = event.id, payload = %event.payload, "handled demo.ping");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    pgebus::init_tracing();

    let settings = Settings::from_env().context("loading pgebus configuration")?;

    let mut router = EventRouter::new();
    router.register("demo.ping", handle_ping);

    let mut system = EventSystem::new(router, settings.clone()).context("building event system")?;
    system.start().await.context("starting event system")?;
    info!(workers = system.get_worker_count(), "pgebus daemon running");

    publish_demo_event(&settings).await?;

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutdown signal received, draining in-flight work");

    system.stop().await.context("stopping event system")?;
    Ok(())
}

async fn publish_demo_event(settings: &Settings) -> Result<()> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(1)
        .connect(&settings.database.connection_url())
        .await
        .context("connecting to publish the demo event")?;

    let event = publish_event(
        &pool,
        &settings.database.schema_name,
        "demo.ping",
        serde_json::json!({"hello": "world"}),
        pgebus::EventSource::Internal,
        &settings.event_system.channel,
        None,
    )
    .await
    .context("publishing demo event")?;

    info!(event_id = event.id, "published demo event");
    pool.close().await;
    Ok(())
}
