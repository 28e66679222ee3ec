//! External collaborators: the shipping provider and the event bus.
//!
//! Both are best-effort from the engine's point of view. A failed call is
//! logged and never rolls back a committed order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::domain::aggregates::Order;
use crate::domain::events::DomainEvent;

pub mod nats;

pub use nats::{NatsEventPublisher, NatsShippingGateway};

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider is not configured")]
    Unavailable,

    #[error("provider did not answer within {0} ms")]
    Timeout(u64),

    #[error("provider rejected the request: {0}")]
    Remote(String),

    #[error("could not decode provider payload: {0}")]
    Decode(String),
}

/// Identifiers the shipping provider assigns to a remote order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteShipment {
    #[serde(alias = "order_id")]
    pub remote_order_id: String,
    #[serde(default)]
    pub shipment_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEvent {
    #[serde(alias = "current_status")]
    pub status: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

/// Picks the most recent event; undated events count as older than dated ones.
pub fn latest_event(events: &[TrackingEvent]) -> Option<&TrackingEvent> {
    events.iter().enumerate().max_by_key(|(i, e)| (e.at, *i)).map(|(_, e)| e)
}

#[async_trait]
pub trait ShippingProvider: Send + Sync {
    async fn create_remote_order(&self, order: &Order) -> Result<RemoteShipment, ProviderError>;
    async fn track_shipment(&self, shipment_id: &str) -> Result<Vec<TrackingEvent>, ProviderError>;
    async fn cancel_remote_order(&self, remote_order_id: &str) -> Result<(), ProviderError>;
}

/// Used when no shipping provider is wired; every call reports `Unavailable`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledShippingProvider;

#[async_trait]
impl ShippingProvider for DisabledShippingProvider {
    async fn create_remote_order(&self, _order: &Order) -> Result<RemoteShipment, ProviderError> { Err(ProviderError::Unavailable) }
    async fn track_shipment(&self, _shipment_id: &str) -> Result<Vec<TrackingEvent>, ProviderError> { Err(ProviderError::Unavailable) }
    async fn cancel_remote_order(&self, _remote_order_id: &str) -> Result<(), ProviderError> { Err(ProviderError::Unavailable) }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<(), ProviderError>;
}

/// Drops every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), ProviderError> {
        tracing::trace!(subject = event.subject(), "event bus disabled, dropping event");
        Ok(())
    }
}
