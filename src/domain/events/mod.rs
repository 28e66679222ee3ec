//! Domain events
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;
use crate::domain::aggregates::order::{OrderStatus, PaymentStatus, RequestKind};
use crate::domain::aggregates::product::{RestockTarget, VariantKey};
use crate::domain::value_objects::CouponCode;

#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum DomainEvent {
    Order(OrderEvent),
    Coupon(CouponEvent),
    Inventory(InventoryEvent),
}

impl DomainEvent {
    /// NATS subject the event is published on.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Order(OrderEvent::Placed { .. }) => "commerce.order.placed",
            Self::Order(OrderEvent::StatusChanged { .. }) => "commerce.order.status_changed",
            Self::Order(OrderEvent::Delivered { .. }) => "commerce.order.delivered",
            Self::Order(OrderEvent::Cancelled { .. }) => "commerce.order.cancelled",
            Self::Order(OrderEvent::PaymentUpdated { .. }) => "commerce.order.payment_updated",
            Self::Order(OrderEvent::RefundRequested { .. }) => "commerce.order.refund_requested",
            Self::Order(OrderEvent::ItemRequestOpened { .. }) => "commerce.order.item_request_opened",
            Self::Coupon(CouponEvent::Redeemed { .. }) => "commerce.coupon.redeemed",
            Self::Inventory(InventoryEvent::Restocked { .. }) => "commerce.inventory.restocked",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: Uuid, order_number: u64, customer_id: String, total: Decimal },
    StatusChanged { order_id: Uuid, from: OrderStatus, to: OrderStatus },
    Delivered { order_id: Uuid, delivered_at: DateTime<Utc> },
    Cancelled { order_id: Uuid, reason: String },
    PaymentUpdated { order_id: Uuid, status: PaymentStatus },
    RefundRequested { order_id: Uuid, amount: Decimal },
    ItemRequestOpened { order_id: Uuid, product_id: Uuid, kind: RequestKind },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CouponEvent {
    Redeemed { code: CouponCode, order_id: Uuid, usage_count: u32 },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InventoryEvent {
    Restocked { product_id: Uuid, variant: VariantKey, quantity: u32, target: RestockTarget },
}
