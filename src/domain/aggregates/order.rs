//! Order Aggregate
//!
//! Lifecycle: `pending → confirmed → processing → shipped → delivered`, with
//! `cancelled` reachable from any state before `shipped`. Delivered and
//! cancelled are terminal. Payment status moves independently.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;
use crate::domain::aggregates::product::VariantKey;
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::{CouponCode, Money};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus { #[default] Pending, Confirmed, Processing, Shipped, Delivered, Cancelled }

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending", Self::Confirmed => "confirmed", Self::Processing => "processing",
            Self::Shipped => "shipped", Self::Delivered => "delivered", Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool { matches!(self, Self::Delivered | Self::Cancelled) }

    pub fn can_cancel(&self) -> bool { matches!(self, Self::Pending | Self::Confirmed | Self::Processing) }

    /// Forward moves may skip stages; nothing leaves a terminal state.
    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        match target {
            _ if *self == target => false,
            Self::Cancelled => self.can_cancel(),
            _ => !self.is_terminal() && target.stage() > self.stage(),
        }
    }

    fn stage(&self) -> u8 {
        match self {
            Self::Pending => 0, Self::Confirmed => 1, Self::Processing => 2,
            Self::Shipped => 3, Self::Delivered => 4, Self::Cancelled => 5,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus { #[default] Pending, Paid, Failed, Refunded }

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentMethod {
    CashOnDelivery,
    Card { last4: String },
    Upi { handle: String },
}

impl PaymentMethod {
    pub fn is_prepaid(&self) -> bool { !matches!(self, Self::CashOnDelivery) }

    /// Builds the method from a checkout provider's `payment_type` string.
    pub fn from_provider(payment_type: &str, card_last4: Option<&str>, upi_handle: Option<&str>) -> Option<Self> {
        match payment_type.trim().to_ascii_lowercase().as_str() {
            "cod" | "cash" | "cash_on_delivery" => Some(Self::CashOnDelivery),
            "card" | "credit_card" | "debit_card" => Some(Self::Card { last4: card_last4.unwrap_or_default().to_string() }),
            "upi" => Some(Self::Upi { handle: upi_handle.unwrap_or_default().to_string() }),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Address {
    #[validate(length(min = 1))] pub name: String,
    #[validate(length(min = 1))] pub phone: String,
    #[validate(length(min = 1))] pub street1: String,
    #[serde(default)] pub street2: Option<String>,
    #[validate(length(min = 1))] pub city: String,
    #[serde(default)] pub state: Option<String>,
    #[validate(length(min = 1))] pub zip: String,
    #[validate(length(min = 2))] pub country: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind { Exchange, Return }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus { Requested, Approved, Rejected, Completed }

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRequest {
    pub id: Uuid,
    pub kind: RequestKind,
    pub status: RequestStatus,
    pub reason: String,
    pub replacement: Option<VariantKey>,
    pub requested_at: DateTime<Utc>,
}

impl ItemRequest {
    pub fn is_open(&self) -> bool { matches!(self.status, RequestStatus::Requested | RequestStatus::Approved) }
}

/// Frozen snapshot of a purchased line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: Uuid,
    pub category_id: Option<Uuid>,
    pub name: String,
    pub variant: VariantKey,
    pub unit_price: Money,
    pub quantity: u32,
    pub line_total: Money,
    #[serde(default)] pub exchange: Option<ItemRequest>,
    #[serde(default)] pub return_request: Option<ItemRequest>,
}

impl OrderItem {
    pub fn new(product_id: Uuid, category_id: Option<Uuid>, name: impl Into<String>, variant: VariantKey, unit_price: Money, quantity: u32) -> Self {
        let line_total = unit_price.multiply(quantity).rounded();
        Self { product_id, category_id, name: name.into(), variant, unit_price, quantity, line_total, exchange: None, return_request: None }
    }

    fn request(&self, kind: RequestKind) -> Option<&ItemRequest> {
        match kind { RequestKind::Exchange => self.exchange.as_ref(), RequestKind::Return => self.return_request.as_ref() }
    }
}

/// Tracking fields; webhook payloads are merged in field by field.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    pub courier_name: Option<String>,
    pub awb_code: Option<String>,
    pub shipment_id: Option<String>,
    pub remote_order_id: Option<String>,
    pub tracking_url: Option<String>,
    pub pickup_scheduled_date: Option<String>,
    pub expected_delivery_date: Option<String>,
}

impl Shipment {
    fn merge(&mut self, patch: Shipment) -> bool {
        let before = self.clone();
        let take = |slot: &mut Option<String>, value: Option<String>| if let Some(v) = value.filter(|v| !v.is_empty()) { *slot = Some(v) };
        take(&mut self.courier_name, patch.courier_name);
        take(&mut self.awb_code, patch.awb_code);
        take(&mut self.shipment_id, patch.shipment_id);
        take(&mut self.remote_order_id, patch.remote_order_id);
        take(&mut self.tracking_url, patch.tracking_url);
        take(&mut self.pickup_scheduled_date, patch.pickup_scheduled_date);
        take(&mut self.expected_delivery_date, patch.expected_delivery_date);
        *self != before
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals { pub subtotal: Money, pub shipping: Money, pub tax: Money, pub discount: Money, pub total: Money }

/// A priced order that has not been numbered or persisted yet.
#[derive(Clone, Debug)]
pub struct NewOrder {
    pub customer_id: String,
    pub items: Vec<OrderItem>,
    pub totals: OrderTotals,
    pub coupon_code: Option<CouponCode>,
    pub payment_method: PaymentMethod,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub courier_name: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    id: Uuid,
    order_number: u64,
    customer_id: String,
    items: Vec<OrderItem>,
    totals: OrderTotals,
    coupon_code: Option<CouponCode>,
    payment_method: PaymentMethod,
    payment_status: PaymentStatus,
    status: OrderStatus,
    provider_status: Option<String>,
    #[serde(default)]
    payment_provider_status: Option<String>,
    shipment: Shipment,
    shipping_address: Address,
    billing_address: Address,
    cancel_reason: Option<String>,
    cancelled_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    pub(crate) version: u64,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

impl Order {
    pub fn place(draft: NewOrder, order_number: u64, now: DateTime<Utc>) -> Self {
        let shipment = Shipment { courier_name: draft.courier_name, ..Shipment::default() };
        let mut order = Self {
            id: Uuid::now_v7(), order_number, customer_id: draft.customer_id, items: draft.items, totals: draft.totals,
            coupon_code: draft.coupon_code, payment_method: draft.payment_method, payment_status: PaymentStatus::Pending,
            status: OrderStatus::Pending, provider_status: None, payment_provider_status: None, shipment,
            shipping_address: draft.shipping_address, billing_address: draft.billing_address,
            cancel_reason: None, cancelled_at: None, delivered_at: None,
            created_at: now, updated_at: now, version: 1, events: vec![],
        };
        order.raise_event(DomainEvent::Order(OrderEvent::Placed {
            order_id: order.id, order_number: order.order_number, customer_id: order.customer_id.clone(), total: order.totals.total.amount(),
        }));
        order
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_number(&self) -> u64 { self.order_number }
    pub fn number_label(&self) -> String { format!("ORD-{:08}", self.order_number) }
    pub fn customer_id(&self) -> &str { &self.customer_id }
    pub fn items(&self) -> &[OrderItem] { &self.items }
    pub fn totals(&self) -> &OrderTotals { &self.totals }
    pub fn coupon_code(&self) -> Option<&CouponCode> { self.coupon_code.as_ref() }
    pub fn payment_method(&self) -> &PaymentMethod { &self.payment_method }
    pub fn payment_status(&self) -> PaymentStatus { self.payment_status }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn provider_status(&self) -> Option<&str> { self.provider_status.as_deref() }
    pub fn payment_provider_status(&self) -> Option<&str> { self.payment_provider_status.as_deref() }
    pub fn shipment(&self) -> &Shipment { &self.shipment }
    pub fn shipping_address(&self) -> &Address { &self.shipping_address }
    pub fn cancel_reason(&self) -> Option<&str> { self.cancel_reason.as_deref() }
    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> { self.cancelled_at }
    pub fn delivered_at(&self) -> Option<DateTime<Utc>> { self.delivered_at }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn version(&self) -> u64 { self.version }

    /// Returns `Ok(false)` when the order already sits in `target`.
    pub fn transition_to(&mut self, target: OrderStatus, now: DateTime<Utc>) -> Result<bool, OrderError> {
        if self.status == target { return Ok(false); }
        if target == OrderStatus::Cancelled || !self.status.can_transition_to(target) {
            return Err(OrderError::InvalidTransition { from: self.status, to: target });
        }
        let from = std::mem::replace(&mut self.status, target);
        self.raise_event(DomainEvent::Order(OrderEvent::StatusChanged { order_id: self.id, from, to: target }));
        if target == OrderStatus::Delivered && self.delivered_at.is_none() {
            self.delivered_at = Some(now);
            self.raise_event(DomainEvent::Order(OrderEvent::Delivered { order_id: self.id, delivered_at: now }));
        }
        self.touch(now);
        Ok(true)
    }

    pub fn cancel(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<(), OrderError> {
        if self.status == OrderStatus::Cancelled { return Err(OrderError::AlreadyCancelled); }
        if !self.status.can_cancel() { return Err(OrderError::InvalidTransition { from: self.status, to: OrderStatus::Cancelled }); }
        let reason = reason.into();
        self.status = OrderStatus::Cancelled;
        self.cancel_reason = Some(reason.clone());
        self.cancelled_at = Some(now);
        self.touch(now);
        self.raise_event(DomainEvent::Order(OrderEvent::Cancelled { order_id: self.id, reason }));
        if self.payment_status == PaymentStatus::Paid {
            self.raise_event(DomainEvent::Order(OrderEvent::RefundRequested { order_id: self.id, amount: self.totals.total.amount() }));
        }
        Ok(())
    }

    pub fn set_payment_status(&mut self, status: PaymentStatus, now: DateTime<Utc>) -> bool {
        if self.payment_status == status { return false; }
        self.payment_status = status;
        self.touch(now);
        self.raise_event(DomainEvent::Order(OrderEvent::PaymentUpdated { order_id: self.id, status }));
        // Money captured after the order was cancelled has to go back.
        if status == PaymentStatus::Paid && self.status == OrderStatus::Cancelled {
            self.raise_event(DomainEvent::Order(OrderEvent::RefundRequested { order_id: self.id, amount: self.totals.total.amount() }));
        }
        true
    }

    pub fn set_payment_method(&mut self, method: PaymentMethod) { self.payment_method = method; }

    /// Stores the provider's own vocabulary without touching `status`.
    pub fn record_provider_status(&mut self, raw: &str, now: DateTime<Utc>) -> bool {
        if self.provider_status.as_deref() == Some(raw) { return false; }
        self.provider_status = Some(raw.to_string());
        self.touch(now);
        true
    }

    pub fn record_payment_provider_status(&mut self, raw: &str, now: DateTime<Utc>) -> bool {
        if self.payment_provider_status.as_deref() == Some(raw) { return false; }
        self.payment_provider_status = Some(raw.to_string());
        self.touch(now);
        true
    }

    pub fn merge_shipment(&mut self, patch: Shipment, now: DateTime<Utc>) -> bool {
        let changed = self.shipment.merge(patch);
        if changed { self.touch(now); }
        changed
    }

    /// Opens an exchange or return on a delivered item inside the window.
    pub fn open_request(
        &mut self, kind: RequestKind, product_id: Uuid, reason: impl Into<String>,
        replacement: Option<VariantKey>, now: DateTime<Utc>, window_days: i64,
    ) -> Result<ItemRequest, OrderError> {
        let delivered_at = match (self.status, self.delivered_at) {
            (OrderStatus::Delivered, Some(at)) => at,
            _ => return Err(OrderError::NotDelivered),
        };
        if now - delivered_at > Duration::days(window_days) { return Err(OrderError::ReturnWindowExpired { days: window_days }); }
        if !self.items.iter().any(|i| i.product_id == product_id) { return Err(OrderError::ItemNotFound(product_id)); }
        if self.items.iter().filter(|i| i.product_id == product_id).any(|i| i.request(kind).is_some_and(ItemRequest::is_open)) {
            return Err(OrderError::RequestAlreadyOpen(kind));
        }
        let request = ItemRequest { id: Uuid::now_v7(), kind, status: RequestStatus::Requested, reason: reason.into(), replacement, requested_at: now };
        if let Some(item) = self.items.iter_mut().find(|i| i.product_id == product_id) {
            match kind {
                RequestKind::Exchange => item.exchange = Some(request.clone()),
                RequestKind::Return => item.return_request = Some(request.clone()),
            }
        }
        self.touch(now);
        self.raise_event(DomainEvent::Order(OrderEvent::ItemRequestOpened { order_id: self.id, product_id, kind }));
        Ok(request)
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self, now: DateTime<Utc>) { self.updated_at = now; }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    AlreadyCancelled,
    NotDelivered,
    ReturnWindowExpired { days: i64 },
    ItemNotFound(Uuid),
    RequestAlreadyOpen(RequestKind),
}
impl std::error::Error for OrderError {}
impl std::fmt::Display for OrderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTransition { from, to } => write!(f, "Cannot move order from {from} to {to}"),
            Self::AlreadyCancelled => write!(f, "Order is already cancelled"),
            Self::NotDelivered => write!(f, "Order has not been delivered"),
            Self::ReturnWindowExpired { days } => write!(f, "The {days}-day request window has closed"),
            Self::ItemNotFound(id) => write!(f, "Product {id} is not part of this order"),
            Self::RequestAlreadyOpen(RequestKind::Exchange) => write!(f, "An exchange is already open for this item"),
            Self::RequestAlreadyOpen(RequestKind::Return) => write!(f, "A return is already open for this item"),
        }
    }
}
