//! Persistence boundary.
//!
//! Every operation that touches more than one record (order commit,
//! cancellation) is atomic inside the store: either all of its writes land or
//! none do.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use crate::domain::aggregates::{Cart, Coupon, NewOrder, Order, ProductError, Product, RestockTarget, VariantKey, Wishlist};
use crate::domain::value_objects::CouponCode;
use crate::{FulfillmentError, Result};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Coupon allowance to consume alongside an order commit.
#[derive(Clone, Debug)]
pub struct Redemption {
    pub code: CouponCode,
    pub per_user_limit: Option<u32>,
}

/// Stock handed back by a cancellation. `target` is `None` when the product
/// no longer exists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Restock {
    pub product_id: Uuid,
    pub variant: VariantKey,
    pub quantity: u32,
    pub target: Option<RestockTarget>,
}

#[derive(Clone, Debug)]
pub enum CancelOutcome {
    Cancelled { order: Order, restocked: Vec<Restock> },
    AlreadyCancelled(Order),
    /// The webhook that asked for the cancel was already applied.
    Duplicate(Order),
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>>;
    async fn save_product(&self, product: &Product) -> Result<()>;
    /// Decrements only when enough stock is on hand; returns what is left.
    async fn decrement_variant_stock(&self, product_id: Uuid, key: &VariantKey, qty: u32) -> Result<u32>;
}

#[async_trait]
pub trait CouponStore: Send + Sync {
    async fn find_coupon(&self, code: &CouponCode) -> Result<Option<Coupon>>;
    async fn insert_coupon(&self, coupon: &Coupon) -> Result<()>;
    /// Non-cancelled orders of this customer that used the coupon.
    async fn count_customer_redemptions(&self, customer_id: &str, code: &CouponCode) -> Result<u32>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Decrements stock for every item, redeems the coupon, allocates the next
    /// order number and persists the order as one unit.
    async fn commit_order(&self, draft: NewOrder, redemption: Option<Redemption>, now: DateTime<Utc>) -> Result<Order>;
    async fn find_order(&self, id: Uuid) -> Result<Option<Order>>;
    /// Resolves an order number (`ORD-00001001` or `1001`), remote order id or shipment id.
    async fn find_order_by_reference(&self, reference: &str) -> Result<Option<Order>>;
    /// Non-cancelled orders placed by the customer.
    async fn count_customer_orders(&self, customer_id: &str) -> Result<u32>;
    /// Compare-and-swap on `version`; returns the new version.
    async fn update_order(&self, order: &Order) -> Result<u64>;
    /// Same as `update_order`, but also claims the webhook key in the same
    /// unit. `None` when the key was already claimed; nothing is written then.
    async fn update_order_for_webhook(&self, order: &Order, webhook_key: &str) -> Result<Option<u64>>;
    /// Cancels and restores stock as one unit, claiming `webhook_key` with it.
    async fn cancel_order(&self, id: Uuid, reason: &str, now: DateTime<Utc>, webhook_key: Option<&str>) -> Result<CancelOutcome>;
    async fn webhook_seen(&self, key: &str) -> Result<bool>;
    /// Returns false if the key was seen before.
    async fn record_webhook(&self, key: &str) -> Result<bool>;
}

#[async_trait]
pub trait CartStore: Send + Sync {
    async fn get_cart(&self, customer_id: &str) -> Result<Option<Cart>>;
    async fn save_cart(&self, cart: &Cart) -> Result<()>;
    async fn get_wishlist(&self, customer_id: &str) -> Result<Option<Wishlist>>;
    async fn save_wishlist(&self, wishlist: &Wishlist) -> Result<()>;
}

pub trait Store: CatalogStore + CouponStore + OrderStore + CartStore {}

impl<T> Store for T where T: CatalogStore + CouponStore + OrderStore + CartStore {}

pub(crate) fn parse_order_number(reference: &str) -> Option<u64> {
    let trimmed = reference.trim();
    let digits = trimmed.get(..4).filter(|p| p.eq_ignore_ascii_case("ORD-")).map_or(trimmed, |_| &trimmed[4..]);
    digits.parse().ok()
}

pub(crate) fn stock_error(product_id: Uuid, name: &str, e: ProductError) -> FulfillmentError {
    match e {
        ProductError::InsufficientStock { available } => FulfillmentError::InsufficientStock { product_id, name: name.to_string(), available },
        other => FulfillmentError::Validation(format!("{name}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_order_number() {
        assert_eq!(parse_order_number("ORD-00001001"), Some(1001));
        assert_eq!(parse_order_number("ord-1002"), Some(1002));
        assert_eq!(parse_order_number("1003"), Some(1003));
        assert_eq!(parse_order_number("SR-77"), None);
    }
}
