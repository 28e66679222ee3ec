//! Fulfillment engine.
//!
//! The façade every caller goes through: order assembly, coupon previews,
//! webhook reconciliation, cancellation, return/exchange requests and the
//! cart. Local state is the source of truth; the shipping provider and the
//! event bus are called after commit and their failures are only logged.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use uuid::Uuid;
use tracing::{debug, warn};
use crate::domain::aggregates::Order;
use crate::domain::clock::{Clock, SystemClock};
use crate::domain::events::DomainEvent;
use crate::domain::pricing::PricingPolicy;
use crate::providers::{DisabledShippingProvider, EventPublisher, NoopPublisher, ShippingProvider};
use crate::store::Store;
use crate::{FulfillmentError, Result};

mod cart;
mod coupons;
mod fulfillment;
mod orders;
mod returns;

pub use cart::{AddToCartInput, CartItemKey, UpdateCartItemInput};
pub use coupons::{CouponPreview, CouponPreviewInput};
pub use orders::{CheckoutInput, CreateOrderInput, LineItemRequest};
pub use returns::{ExchangeInput, ReturnInput};

/// Attempts for read-modify-write cycles that lose an optimistic version race.
const MAX_ATTEMPTS: usize = 3;

pub const DEFAULT_RETURN_WINDOW_DAYS: i64 = 7;

pub struct FulfillmentEngine {
    store: Arc<dyn Store>,
    shipping: Arc<dyn ShippingProvider>,
    events: Arc<dyn EventPublisher>,
    pricing: PricingPolicy,
    clock: Arc<dyn Clock>,
    return_window_days: i64,
    /// Carts whose post-checkout clear failed; cleared on next access.
    pending_cart_clears: Mutex<HashSet<String>>,
}

impl FulfillmentEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            shipping: Arc::new(DisabledShippingProvider),
            events: Arc::new(NoopPublisher),
            pricing: PricingPolicy::default(),
            clock: Arc::new(SystemClock),
            return_window_days: DEFAULT_RETURN_WINDOW_DAYS,
            pending_cart_clears: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_shipping(mut self, shipping: Arc<dyn ShippingProvider>) -> Self { self.shipping = shipping; self }
    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self { self.events = events; self }
    pub fn with_pricing(mut self, pricing: PricingPolicy) -> Self { self.pricing = pricing; self }
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self { self.clock = clock; self }
    pub fn with_return_window_days(mut self, days: i64) -> Self { self.return_window_days = days; self }

    pub fn pricing(&self) -> &PricingPolicy { &self.pricing }

    pub async fn get_order(&self, id: Uuid) -> Result<Order> {
        self.store.find_order(id).await?.ok_or_else(|| FulfillmentError::OrderNotFound(id.to_string()))
    }

    /// Looks an order up by number, remote order id or shipment id.
    pub async fn find_order_by_reference(&self, reference: &str) -> Result<Order> {
        self.store.find_order_by_reference(reference).await?.ok_or_else(|| FulfillmentError::OrderNotFound(reference.to_string()))
    }

    async fn publish(&self, events: Vec<DomainEvent>) {
        for event in events {
            match self.events.publish(&event).await {
                Ok(()) => debug!(subject = event.subject(), "event published"),
                Err(e) => warn!(subject = event.subject(), error = %e, "failed to publish event"),
            }
        }
    }
}
