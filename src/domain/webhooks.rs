//! Inbound provider payloads and the tables that translate provider
//! vocabulary into order and payment statuses.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use validator::Validate;
use crate::domain::aggregates::{OrderStatus, PaymentStatus, Shipment};

/// Outcome of looking a provider status up in a mapping table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderStatus<T> {
    Known(T),
    /// Kept verbatim on the order; never changes its canonical status.
    Unknown(String),
}

const SHIPMENT_STATUS_TABLE: &[(&str, OrderStatus)] = &[
    ("AWB ASSIGNED", OrderStatus::Processing),
    ("LABEL GENERATED", OrderStatus::Processing),
    ("MANIFEST GENERATED", OrderStatus::Processing),
    ("PICKUP SCHEDULED", OrderStatus::Processing),
    ("PICKUP GENERATED", OrderStatus::Processing),
    ("PICKUP QUEUED", OrderStatus::Processing),
    ("PICKED UP", OrderStatus::Shipped),
    ("SHIPPED", OrderStatus::Shipped),
    ("IN TRANSIT", OrderStatus::Shipped),
    ("REACHED AT DESTINATION HUB", OrderStatus::Shipped),
    ("OUT FOR DELIVERY", OrderStatus::Shipped),
    ("DELIVERED", OrderStatus::Delivered),
    ("CANCELED", OrderStatus::Cancelled),
    ("CANCELLED", OrderStatus::Cancelled),
    ("RTO", OrderStatus::Cancelled),
    ("RTO INITIATED", OrderStatus::Cancelled),
    ("RTO DELIVERED", OrderStatus::Cancelled),
];

const PAYMENT_STATUS_TABLE: &[(&str, PaymentStatus)] = &[
    ("PENDING", PaymentStatus::Pending),
    ("INITIATED", PaymentStatus::Pending),
    ("PAID", PaymentStatus::Paid),
    ("SUCCESS", PaymentStatus::Paid),
    ("CAPTURED", PaymentStatus::Paid),
    ("COMPLETED", PaymentStatus::Paid),
    ("FAILED", PaymentStatus::Failed),
    ("FAILURE", PaymentStatus::Failed),
    ("DECLINED", PaymentStatus::Failed),
    ("REFUNDED", PaymentStatus::Refunded),
];

fn normalise(raw: &str) -> String {
    raw.trim().to_ascii_uppercase().replace(&['_', '-'][..], " ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn lookup<T: Copy>(table: &[(&str, T)], raw: &str) -> ProviderStatus<T> {
    let key = normalise(raw);
    table.iter().find(|(name, _)| *name == key).map_or_else(|| ProviderStatus::Unknown(raw.trim().to_string()), |(_, s)| ProviderStatus::Known(*s))
}

pub fn map_shipment_status(raw: &str) -> ProviderStatus<OrderStatus> { lookup(SHIPMENT_STATUS_TABLE, raw) }

pub fn map_payment_status(raw: &str) -> ProviderStatus<PaymentStatus> { lookup(PAYMENT_STATUS_TABLE, raw) }

/// Shipment status push from the shipping provider.
#[derive(Clone, Debug, Default, Deserialize, Validate)]
pub struct ShipmentWebhook {
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(deserialize_with = "flexible_string")]
    #[validate(length(min = 1))]
    pub order_id: String,
    #[validate(length(min = 1))]
    pub current_status: String,
    #[serde(default, deserialize_with = "optional_flexible_string")]
    pub awb: Option<String>,
    #[serde(default, deserialize_with = "optional_flexible_string")]
    pub shipment_id: Option<String>,
    #[serde(default)]
    pub courier_name: Option<String>,
    #[serde(default)]
    pub tracking_url: Option<String>,
    #[serde(default)]
    pub pickup_scheduled_date: Option<String>,
    #[serde(default, alias = "etd")]
    pub expected_delivery_date: Option<String>,
}

impl ShipmentWebhook {
    pub fn dedupe_key(&self) -> Option<String> { self.event_id.as_ref().map(|id| format!("shipment:{id}")) }

    pub fn shipment_patch(&self) -> Shipment {
        Shipment {
            courier_name: self.courier_name.clone(),
            awb_code: self.awb.clone(),
            shipment_id: self.shipment_id.clone(),
            remote_order_id: None,
            tracking_url: self.tracking_url.clone(),
            pickup_scheduled_date: self.pickup_scheduled_date.clone(),
            expected_delivery_date: self.expected_delivery_date.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CustomerDetails {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Payment status push from the checkout provider.
#[derive(Clone, Debug, Default, Deserialize, Validate)]
pub struct PaymentWebhook {
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(deserialize_with = "flexible_string")]
    #[validate(length(min = 1))]
    pub order_id: String,
    #[validate(length(min = 1))]
    pub status: String,
    #[serde(default)]
    pub payment_type: Option<String>,
    #[serde(default)]
    pub total_amount_payable: Option<Decimal>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub card_last4: Option<String>,
    #[serde(default)]
    pub upi_handle: Option<String>,
}

impl PaymentWebhook {
    pub fn dedupe_key(&self) -> Option<String> { self.event_id.as_ref().map(|id| format!("payment:{id}")) }
}

/// Providers send identifiers either as JSON strings or numbers.
fn flexible_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected string or number, got {other}"))),
    }
}

fn optional_flexible_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) if s.is_empty() => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!("expected string or number, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shipment_mapping_table() {
        assert_eq!(map_shipment_status("DELIVERED"), ProviderStatus::Known(OrderStatus::Delivered));
        assert_eq!(map_shipment_status("rto_initiated"), ProviderStatus::Known(OrderStatus::Cancelled));
        assert_eq!(map_shipment_status(" In Transit "), ProviderStatus::Known(OrderStatus::Shipped));
        assert_eq!(map_shipment_status("LOST"), ProviderStatus::Unknown("LOST".into()));
    }

    #[test]
    fn test_payment_mapping_table() {
        assert_eq!(map_payment_status("success"), ProviderStatus::Known(PaymentStatus::Paid));
        assert_eq!(map_payment_status("FAILED"), ProviderStatus::Known(PaymentStatus::Failed));
        assert_eq!(map_payment_status("ON_HOLD"), ProviderStatus::Unknown("ON_HOLD".into()));
    }

    #[test]
    fn test_webhook_accepts_numeric_ids() {
        let hook: ShipmentWebhook = serde_json::from_value(serde_json::json!({
            "order_id": 1001, "current_status": "SHIPPED", "awb": 19041, "shipment_id": "",
            "courier_name": "Delhivery", "etd": "2026-10-20"
        })).unwrap();
        assert_eq!(hook.order_id, "1001");
        assert_eq!(hook.awb.as_deref(), Some("19041"));
        assert_eq!(hook.shipment_id, None);
        assert_eq!(hook.shipment_patch().expected_delivery_date.as_deref(), Some("2026-10-20"));
    }
}
