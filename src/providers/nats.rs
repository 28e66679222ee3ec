//! NATS-backed providers.
//!
//! The shipping gateway speaks request/reply on `{prefix}.orders.create`,
//! `{prefix}.shipments.track` and `{prefix}.orders.cancel`. Replies are JSON;
//! an object carrying an `error` string is a rejection.

use std::time::Duration;
use async_nats::Client;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::domain::aggregates::{Address, Order, PaymentMethod};
use crate::domain::events::DomainEvent;
use crate::providers::{EventPublisher, ProviderError, RemoteShipment, ShippingProvider, TrackingEvent};

pub struct NatsShippingGateway {
    client: Client,
    prefix: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct RemoteOrderLine<'a> {
    name: &'a str,
    sku: String,
    units: u32,
    selling_price: Decimal,
}

#[derive(Serialize)]
struct RemoteOrderRequest<'a> {
    order_id: String,
    order_date: String,
    customer_id: &'a str,
    courier_name: Option<&'a str>,
    payment_method: &'static str,
    billing_customer_name: &'a str,
    shipping_address: &'a Address,
    order_items: Vec<RemoteOrderLine<'a>>,
    sub_total: Decimal,
    shipping_charges: Decimal,
    total_discount: Decimal,
}

impl<'a> RemoteOrderRequest<'a> {
    fn from_order(order: &'a Order) -> Self {
        let totals = order.totals();
        Self {
            order_id: order.number_label(),
            order_date: order.created_at().format("%Y-%m-%d %H:%M").to_string(),
            customer_id: order.customer_id(),
            courier_name: order.shipment().courier_name.as_deref(),
            payment_method: match order.payment_method() { PaymentMethod::CashOnDelivery => "COD", _ => "Prepaid" },
            billing_customer_name: &order.shipping_address().name,
            shipping_address: order.shipping_address(),
            order_items: order.items().iter().map(|item| RemoteOrderLine {
                name: &item.name,
                sku: match (&item.variant.color, &item.variant.size) {
                    (Some(color), Some(size)) => format!("{}-{color}-{size}", item.product_id),
                    _ => item.product_id.to_string(),
                },
                units: item.quantity,
                selling_price: item.unit_price.amount(),
            }).collect(),
            sub_total: totals.subtotal.amount(),
            shipping_charges: totals.shipping.amount(),
            total_discount: totals.discount.amount(),
        }
    }
}

#[derive(Deserialize)]
struct TrackingReply {
    #[serde(default, alias = "tracking_data")]
    events: Vec<TrackingEvent>,
}

#[derive(Deserialize)]
struct CancelReply {}

impl NatsShippingGateway {
    pub fn new(client: Client, prefix: impl Into<String>, timeout: Duration) -> Self {
        Self { client, prefix: prefix.into(), timeout }
    }

    async fn call<Req: Serialize + Sync, Res: DeserializeOwned>(&self, action: &str, body: &Req) -> Result<Res, ProviderError> {
        let subject = format!("{}.{action}", self.prefix);
        let payload = serde_json::to_vec(body).map_err(|e| ProviderError::Decode(e.to_string()))?;
        debug!(%subject, "calling shipping provider");
        let reply = tokio::time::timeout(self.timeout, self.client.request(subject, payload.into()))
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout.as_millis() as u64))?
            .map_err(|e| ProviderError::Remote(e.to_string()))?;
        decode_reply(&reply.payload)
    }
}

fn decode_reply<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ProviderError> {
    let value: serde_json::Value = serde_json::from_slice(payload).map_err(|e| ProviderError::Decode(e.to_string()))?;
    if let Some(error) = value.get("error").and_then(|e| e.as_str()) {
        return Err(ProviderError::Remote(error.to_string()));
    }
    serde_json::from_value(value).map_err(|e| ProviderError::Decode(e.to_string()))
}

#[async_trait]
impl ShippingProvider for NatsShippingGateway {
    async fn create_remote_order(&self, order: &Order) -> Result<RemoteShipment, ProviderError> {
        self.call("orders.create", &RemoteOrderRequest::from_order(order)).await
    }

    async fn track_shipment(&self, shipment_id: &str) -> Result<Vec<TrackingEvent>, ProviderError> {
        let reply: TrackingReply = self.call("shipments.track", &serde_json::json!({ "shipment_id": shipment_id })).await?;
        Ok(reply.events)
    }

    async fn cancel_remote_order(&self, remote_order_id: &str) -> Result<(), ProviderError> {
        let _: CancelReply = self.call("orders.cancel", &serde_json::json!({ "ids": [remote_order_id] })).await?;
        Ok(())
    }
}

/// Publishes domain events on their `commerce.*` subjects.
#[derive(Clone)]
pub struct NatsEventPublisher {
    client: Client,
}

impl NatsEventPublisher {
    pub fn new(client: Client) -> Self { Self { client } }
}

#[async_trait]
impl EventPublisher for NatsEventPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), ProviderError> {
        let payload = serde_json::to_vec(event).map_err(|e| ProviderError::Decode(e.to_string()))?;
        self.client.publish(event.subject().to_string(), payload.into()).await.map_err(|e| ProviderError::Remote(e.to_string()))
    }
}
