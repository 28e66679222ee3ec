//! In-memory store.
//!
//! All state sits behind one lock, so every multi-record operation is
//! serialised and atomic. Used by tests and for running without Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;
use crate::domain::aggregates::{Cart, Coupon, CouponRejection, NewOrder, Order, OrderError, OrderStatus, Product, VariantKey, Wishlist};
use crate::domain::value_objects::CouponCode;
use crate::store::{parse_order_number, stock_error, CancelOutcome, CartStore, CatalogStore, CouponStore, OrderStore, Redemption, Restock};
use crate::{FulfillmentError, Result};

const FIRST_ORDER_NUMBER: u64 = 1001;

struct MemoryState {
    products: HashMap<Uuid, Product>,
    coupons: HashMap<CouponCode, Coupon>,
    orders: HashMap<Uuid, Order>,
    next_order_number: u64,
    carts: HashMap<String, Cart>,
    wishlists: HashMap<String, Wishlist>,
    webhooks: HashSet<String>,
}

pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState {
                products: HashMap::new(), coupons: HashMap::new(), orders: HashMap::new(),
                next_order_number: FIRST_ORDER_NUMBER, carts: HashMap::new(), wishlists: HashMap::new(), webhooks: HashSet::new(),
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryState {
    fn redemptions(&self, customer_id: &str, code: &CouponCode) -> u32 {
        self.orders.values()
            .filter(|o| o.customer_id() == customer_id && o.coupon_code() == Some(code) && o.status() != OrderStatus::Cancelled)
            .count() as u32
    }

    /// Stores a copy with pending events stripped; they belong to the caller's instance.
    fn put_order(&mut self, order: &Order) {
        let mut stored = order.clone();
        stored.take_events();
        self.orders.insert(stored.id(), stored);
    }

    /// Version-checked overwrite; returns the new version.
    fn replace_order(&mut self, order: &Order) -> Result<u64> {
        let current = self.orders.get(&order.id()).ok_or_else(|| FulfillmentError::OrderNotFound(order.id().to_string()))?;
        if current.version() != order.version() {
            return Err(FulfillmentError::Conflict(format!("order {} was modified concurrently", order.number_label())));
        }
        let mut next = order.clone();
        next.version += 1;
        self.put_order(&next);
        Ok(next.version)
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>> {
        let state = self.state.read().await;
        Ok(state.products.get(&id).cloned())
    }

    async fn save_product(&self, product: &Product) -> Result<()> {
        let mut state = self.state.write().await;
        state.products.insert(product.id(), product.clone());
        Ok(())
    }

    async fn decrement_variant_stock(&self, product_id: Uuid, key: &VariantKey, qty: u32) -> Result<u32> {
        let mut state = self.state.write().await;
        let product = state.products.get_mut(&product_id).ok_or(FulfillmentError::ProductNotFound(product_id))?;
        let name = product.name().to_string();
        product.take_stock(key, qty).map_err(|e| stock_error(product_id, &name, e))
    }
}

#[async_trait]
impl CouponStore for MemoryStore {
    async fn find_coupon(&self, code: &CouponCode) -> Result<Option<Coupon>> {
        let state = self.state.read().await;
        Ok(state.coupons.get(code).cloned())
    }

    async fn insert_coupon(&self, coupon: &Coupon) -> Result<()> {
        let mut state = self.state.write().await;
        if state.coupons.contains_key(coupon.code()) {
            return Err(FulfillmentError::Conflict(format!("coupon {} already exists", coupon.code())));
        }
        state.coupons.insert(coupon.code().clone(), coupon.clone());
        Ok(())
    }

    async fn count_customer_redemptions(&self, customer_id: &str, code: &CouponCode) -> Result<u32> {
        let state = self.state.read().await;
        Ok(state.redemptions(customer_id, code))
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn commit_order(&self, draft: NewOrder, redemption: Option<Redemption>, now: DateTime<Utc>) -> Result<Order> {
        let mut state = self.state.write().await;

        // Stage every write on copies; nothing is applied unless all steps pass.
        let mut staged: HashMap<Uuid, Product> = HashMap::new();
        for item in &draft.items {
            if !staged.contains_key(&item.product_id) {
                let product = state.products.get(&item.product_id).cloned().ok_or(FulfillmentError::ProductNotFound(item.product_id))?;
                staged.insert(item.product_id, product);
            }
            if let Some(product) = staged.get_mut(&item.product_id) {
                product.take_stock(&item.variant, item.quantity).map_err(|e| stock_error(item.product_id, &item.name, e))?;
            }
        }

        let coupon = match &redemption {
            Some(r) => {
                let mut coupon = state.coupons.get(&r.code).cloned().ok_or_else(|| FulfillmentError::CouponNotFound(r.code.to_string()))?;
                if r.per_user_limit.is_some_and(|limit| state.redemptions(&draft.customer_id, &r.code) >= limit) {
                    return Err(CouponRejection::PerUserLimitReached.into());
                }
                coupon.redeem()?;
                Some(coupon)
            }
            None => None,
        };

        let number = state.next_order_number;
        state.next_order_number += 1;
        let order = Order::place(draft, number, now);

        state.products.extend(staged);
        if let Some(coupon) = coupon {
            state.coupons.insert(coupon.code().clone(), coupon);
        }
        state.put_order(&order);
        Ok(order)
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state.orders.get(&id).cloned())
    }

    async fn find_order_by_reference(&self, reference: &str) -> Result<Option<Order>> {
        let state = self.state.read().await;
        let reference = reference.trim();
        let by_number = parse_order_number(reference).and_then(|n| state.orders.values().find(|o| o.order_number() == n));
        let found = by_number.or_else(|| state.orders.values().find(|o| {
            let shipment = o.shipment();
            shipment.remote_order_id.as_deref() == Some(reference) || shipment.shipment_id.as_deref() == Some(reference)
        }));
        Ok(found.cloned())
    }

    async fn count_customer_orders(&self, customer_id: &str) -> Result<u32> {
        let state = self.state.read().await;
        Ok(state.orders.values().filter(|o| o.customer_id() == customer_id && o.status() != OrderStatus::Cancelled).count() as u32)
    }

    async fn update_order(&self, order: &Order) -> Result<u64> {
        let mut state = self.state.write().await;
        state.replace_order(order)
    }

    async fn update_order_for_webhook(&self, order: &Order, webhook_key: &str) -> Result<Option<u64>> {
        let mut state = self.state.write().await;
        if state.webhooks.contains(webhook_key) { return Ok(None); }
        let version = state.replace_order(order)?;
        state.webhooks.insert(webhook_key.to_string());
        Ok(Some(version))
    }

    async fn cancel_order(&self, id: Uuid, reason: &str, now: DateTime<Utc>, webhook_key: Option<&str>) -> Result<CancelOutcome> {
        let mut state = self.state.write().await;
        let mut order = state.orders.get(&id).cloned().ok_or_else(|| FulfillmentError::OrderNotFound(id.to_string()))?;
        if let Some(key) = webhook_key {
            if !state.webhooks.insert(key.to_string()) { return Ok(CancelOutcome::Duplicate(order)); }
        }
        match order.cancel(reason, now) {
            Err(OrderError::AlreadyCancelled) => return Ok(CancelOutcome::AlreadyCancelled(order)),
            Err(e) => {
                if let Some(key) = webhook_key { state.webhooks.remove(key); }
                return Err(e.into());
            }
            Ok(()) => {}
        }
        let mut restocked = Vec::with_capacity(order.items().len());
        for item in order.items() {
            let target = state.products.get_mut(&item.product_id).map(|p| p.restore_stock(&item.variant, item.quantity));
            restocked.push(Restock { product_id: item.product_id, variant: item.variant.clone(), quantity: item.quantity, target });
        }
        order.version += 1;
        state.put_order(&order);
        Ok(CancelOutcome::Cancelled { order, restocked })
    }

    async fn webhook_seen(&self, key: &str) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.webhooks.contains(key))
    }

    async fn record_webhook(&self, key: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state.webhooks.insert(key.to_string()))
    }
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn get_cart(&self, customer_id: &str) -> Result<Option<Cart>> {
        let state = self.state.read().await;
        Ok(state.carts.get(customer_id).cloned())
    }

    async fn save_cart(&self, cart: &Cart) -> Result<()> {
        let mut state = self.state.write().await;
        state.carts.insert(cart.customer_id().to_string(), cart.clone());
        Ok(())
    }

    async fn get_wishlist(&self, customer_id: &str) -> Result<Option<Wishlist>> {
        let state = self.state.read().await;
        Ok(state.wishlists.get(customer_id).cloned())
    }

    async fn save_wishlist(&self, wishlist: &Wishlist) -> Result<()> {
        let mut state = self.state.write().await;
        state.wishlists.insert(wishlist.customer_id().to_string(), wishlist.clone());
        Ok(())
    }
}
