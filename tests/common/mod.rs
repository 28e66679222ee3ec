#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;
use opensase_fulfillment::domain::aggregates::{
    Address, Cart, Coupon, CouponScope, DiscountType, NewCoupon, NewOrder, Order, PaymentMethod, Product, VariantKey, Wishlist,
};
use opensase_fulfillment::domain::clock::ManualClock;
use opensase_fulfillment::domain::events::DomainEvent;
use opensase_fulfillment::domain::value_objects::{CouponCode, Money};
use opensase_fulfillment::engine::{CreateOrderInput, LineItemRequest};
use opensase_fulfillment::providers::{EventPublisher, ProviderError, RemoteShipment, ShippingProvider, TrackingEvent};
use opensase_fulfillment::store::{CancelOutcome, CartStore, CatalogStore, CouponStore, MemoryStore, OrderStore, Redemption};
use opensase_fulfillment::{FulfillmentEngine, FulfillmentError};

type StoreResult<T> = opensase_fulfillment::Result<T>;

pub fn start() -> DateTime<Utc> { Utc.with_ymd_and_hms(2026, 10, 1, 10, 0, 0).unwrap() }

#[derive(Default)]
pub struct RecordingShipping {
    pub fail: AtomicBool,
    pub created: Mutex<Vec<String>>,
    pub cancelled: Mutex<Vec<String>>,
    pub tracking: Mutex<Vec<TrackingEvent>>,
}

impl RecordingShipping {
    pub fn fail_calls(&self, fail: bool) { self.fail.store(fail, Ordering::SeqCst); }
    pub fn cancelled(&self) -> Vec<String> { self.cancelled.lock().unwrap().clone() }

    fn check(&self) -> Result<(), ProviderError> {
        if self.fail.load(Ordering::SeqCst) { Err(ProviderError::Timeout(5000)) } else { Ok(()) }
    }
}

#[async_trait]
impl ShippingProvider for RecordingShipping {
    async fn create_remote_order(&self, order: &Order) -> Result<RemoteShipment, ProviderError> {
        self.check()?;
        self.created.lock().unwrap().push(order.number_label());
        Ok(RemoteShipment { remote_order_id: format!("R-{}", order.order_number()), shipment_id: Some(format!("S-{}", order.order_number())) })
    }

    async fn track_shipment(&self, _shipment_id: &str) -> Result<Vec<TrackingEvent>, ProviderError> {
        self.check()?;
        Ok(self.tracking.lock().unwrap().clone())
    }

    async fn cancel_remote_order(&self, remote_order_id: &str) -> Result<(), ProviderError> {
        self.check()?;
        self.cancelled.lock().unwrap().push(remote_order_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub subjects: Mutex<Vec<String>>,
}

impl RecordingPublisher {
    pub fn count(&self, subject: &str) -> usize {
        self.subjects.lock().unwrap().iter().filter(|s| *s == subject).count()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), ProviderError> {
        self.subjects.lock().unwrap().push(event.subject().to_string());
        Ok(())
    }
}

/// Delegates to a `MemoryStore`; selected writes can be made to fail once.
#[derive(Default)]
pub struct FaultyStore {
    pub inner: Arc<MemoryStore>,
    fail_order_write: AtomicBool,
    fail_cart_write: AtomicBool,
}

impl FaultyStore {
    pub fn fail_next_order_write(&self) { self.fail_order_write.store(true, Ordering::SeqCst); }
    pub fn fail_next_cart_write(&self) { self.fail_cart_write.store(true, Ordering::SeqCst); }

    fn trip(flag: &AtomicBool) -> StoreResult<()> {
        if flag.swap(false, Ordering::SeqCst) { Err(FulfillmentError::StorageError("connection reset".into())) } else { Ok(()) }
    }
}

#[async_trait]
impl CatalogStore for FaultyStore {
    async fn get_product(&self, id: Uuid) -> StoreResult<Option<Product>> { self.inner.get_product(id).await }
    async fn save_product(&self, product: &Product) -> StoreResult<()> { self.inner.save_product(product).await }
    async fn decrement_variant_stock(&self, product_id: Uuid, key: &VariantKey, qty: u32) -> StoreResult<u32> {
        self.inner.decrement_variant_stock(product_id, key, qty).await
    }
}

#[async_trait]
impl CouponStore for FaultyStore {
    async fn find_coupon(&self, code: &CouponCode) -> StoreResult<Option<Coupon>> { self.inner.find_coupon(code).await }
    async fn insert_coupon(&self, coupon: &Coupon) -> StoreResult<()> { self.inner.insert_coupon(coupon).await }
    async fn count_customer_redemptions(&self, customer_id: &str, code: &CouponCode) -> StoreResult<u32> {
        self.inner.count_customer_redemptions(customer_id, code).await
    }
}

#[async_trait]
impl OrderStore for FaultyStore {
    async fn commit_order(&self, draft: NewOrder, redemption: Option<Redemption>, now: DateTime<Utc>) -> StoreResult<Order> {
        self.inner.commit_order(draft, redemption, now).await
    }
    async fn find_order(&self, id: Uuid) -> StoreResult<Option<Order>> { self.inner.find_order(id).await }
    async fn find_order_by_reference(&self, reference: &str) -> StoreResult<Option<Order>> { self.inner.find_order_by_reference(reference).await }
    async fn count_customer_orders(&self, customer_id: &str) -> StoreResult<u32> { self.inner.count_customer_orders(customer_id).await }
    async fn update_order(&self, order: &Order) -> StoreResult<u64> {
        Self::trip(&self.fail_order_write)?;
        self.inner.update_order(order).await
    }
    async fn update_order_for_webhook(&self, order: &Order, webhook_key: &str) -> StoreResult<Option<u64>> {
        Self::trip(&self.fail_order_write)?;
        self.inner.update_order_for_webhook(order, webhook_key).await
    }
    async fn cancel_order(&self, id: Uuid, reason: &str, now: DateTime<Utc>, webhook_key: Option<&str>) -> StoreResult<CancelOutcome> {
        Self::trip(&self.fail_order_write)?;
        self.inner.cancel_order(id, reason, now, webhook_key).await
    }
    async fn webhook_seen(&self, key: &str) -> StoreResult<bool> { self.inner.webhook_seen(key).await }
    async fn record_webhook(&self, key: &str) -> StoreResult<bool> { self.inner.record_webhook(key).await }
}

#[async_trait]
impl CartStore for FaultyStore {
    async fn get_cart(&self, customer_id: &str) -> StoreResult<Option<Cart>> { self.inner.get_cart(customer_id).await }
    async fn save_cart(&self, cart: &Cart) -> StoreResult<()> {
        Self::trip(&self.fail_cart_write)?;
        self.inner.save_cart(cart).await
    }
    async fn get_wishlist(&self, customer_id: &str) -> StoreResult<Option<Wishlist>> { self.inner.get_wishlist(customer_id).await }
    async fn save_wishlist(&self, wishlist: &Wishlist) -> StoreResult<()> { self.inner.save_wishlist(wishlist).await }
}

pub struct Harness {
    pub engine: Arc<FulfillmentEngine>,
    pub store: Arc<MemoryStore>,
    pub faults: Arc<FaultyStore>,
    pub shipping: Arc<RecordingShipping>,
    pub events: Arc<RecordingPublisher>,
    pub clock: Arc<ManualClock>,
}

pub fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let faults = Arc::new(FaultyStore { inner: store.clone(), ..FaultyStore::default() });
    let shipping = Arc::new(RecordingShipping::default());
    let events = Arc::new(RecordingPublisher::default());
    let clock = Arc::new(ManualClock::new(start()));
    let engine = FulfillmentEngine::new(faults.clone())
        .with_shipping(shipping.clone())
        .with_events(events.clone())
        .with_clock(clock.clone());
    Harness { engine: Arc::new(engine), store, faults, shipping, events, clock }
}

impl Harness {
    /// Tee at 500: Black S x5, Black M x3, White M x1.
    pub async fn seed_tee(&self) -> Product {
        let mut tee = Product::create("Classic Tee", inr(500))
            .with_category(Uuid::now_v7())
            .with_variant("Black", &[("S", 5), ("M", 3)])
            .with_variant("White", &[("M", 1)]);
        tee.publish().unwrap();
        self.store.save_product(&tee).await.unwrap();
        tee
    }

    /// Mug at 250 tracked on the flat stock field.
    pub async fn seed_mug(&self, stock: u32) -> Product {
        let mut mug = Product::create("Enamel Mug", inr(250)).with_flat_stock(stock);
        mug.publish().unwrap();
        self.store.save_product(&mug).await.unwrap();
        mug
    }

    pub async fn stock(&self, product_id: Uuid, color: Option<&str>, size: Option<&str>) -> u32 {
        let product = self.store.get_product(product_id).await.unwrap().unwrap();
        product.available(&VariantKey::new(color.map(String::from), size.map(String::from))).unwrap()
    }

    pub async fn place(&self, customer: &str, items: Vec<LineItemRequest>) -> Order {
        self.engine.create_order(order_input(customer, items)).await.unwrap()
    }
}

pub fn inr(amount: i64) -> Money { Money::new(Decimal::new(amount, 0), "INR") }

pub fn dec(amount: i64) -> Decimal { Decimal::new(amount, 0) }

pub fn address() -> Address {
    Address {
        name: "Asha Rao".into(), phone: "+91 98450 00000".into(), street1: "12 MG Road".into(), street2: None,
        city: "Bengaluru".into(), state: Some("KA".into()), zip: "560001".into(), country: "IN".into(),
    }
}

pub fn line(product_id: Uuid, color: Option<&str>, size: Option<&str>, quantity: u32) -> LineItemRequest {
    LineItemRequest { product_id, color: color.map(String::from), size: size.map(String::from), quantity, price: None }
}

pub fn order_input(customer: &str, items: Vec<LineItemRequest>) -> CreateOrderInput {
    CreateOrderInput {
        customer_id: customer.into(), items, shipping_address: address(), billing_address: None,
        payment_method: PaymentMethod::CashOnDelivery, coupon_code: None, courier: None,
    }
}

/// Percentage coupon valid from a day before `start()` for thirty days.
pub fn percent_coupon(code: &str, percent: i64, minimum: i64, cap: Option<i64>, usage_limit: Option<u32>) -> NewCoupon {
    NewCoupon {
        code: code.into(), description: None, discount_type: DiscountType::Percentage, discount_value: dec(percent),
        minimum_purchase: dec(minimum), maximum_discount: cap.map(dec), usage_limit, per_user_limit: None,
        starts_at: start() - Duration::days(1), ends_at: start() + Duration::days(30), is_active: true,
        scope: CouponScope::All, first_time_user_only: false, free_shipping: false,
    }
}
