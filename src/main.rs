//! OpenSASE Fulfillment - order, coupon and shipment reconciliation service

use std::sync::Arc;
use anyhow::Result;
use opensase_fulfillment::api::{self, AppState};
use opensase_fulfillment::providers::{NatsEventPublisher, NatsShippingGateway};
use opensase_fulfillment::store::PgStore;
use opensase_fulfillment::{Config, FulfillmentEngine};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = Config::from_env()?;

    let db = PgPoolOptions::new().max_connections(10).connect(&config.database_url).await?;
    let store = PgStore::new(db);
    store.migrate().await?;

    let nats = match config.nats_url.as_deref() {
        Some(url) => match async_nats::connect(url).await {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, shipping provider and event bus disabled");
                None
            }
        },
        None => None,
    };

    let mut engine = FulfillmentEngine::new(Arc::new(store))
        .with_pricing(config.pricing.clone())
        .with_return_window_days(config.return_window_days);
    if let Some(client) = nats {
        engine = engine
            .with_shipping(Arc::new(NatsShippingGateway::new(client.clone(), config.shipping_subject_prefix.clone(), config.provider_timeout)))
            .with_events(Arc::new(NatsEventPublisher::new(client)));
    }

    let app = api::router(AppState::new(Arc::new(engine), config.webhook_token.clone()));
    tracing::info!("🚀 OpenSASE Fulfillment listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?, app).await?;
    Ok(())
}
