//! PostgreSQL store.
//!
//! Stock lives in `product_variants` (and the legacy `products.stock` column)
//! with `CHECK (stock >= 0)`; decrements are conditional updates so the check
//! and the write happen in one statement. Orders are kept as a JSONB document
//! next to the columns used for lookups and the optimistic `version`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::types::Json;
use uuid::Uuid;
use crate::domain::aggregates::{
    Cart, Coupon, CouponRejection, CouponScope, DiscountType, NewOrder, Order, OrderError, Product, ProductStatus,
    RestockTarget, SizeStock, Variant, VariantKey, Wishlist,
};
use crate::domain::value_objects::{CouponCode, Money, Quantity};
use crate::store::{parse_order_number, CancelOutcome, CartStore, CatalogStore, CouponStore, OrderStore, Redemption, Restock};
use crate::{FulfillmentError, Result};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await.map_err(|e| FulfillmentError::StorageError(e.to_string()))
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    price: Decimal,
    currency: String,
    status: String,
    category_id: Option<Uuid>,
    stock: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct VariantRow { color: String, size: String, stock: i32 }

fn count(value: i32) -> u32 { value.max(0) as u32 }

impl ProductRow {
    fn into_product(self, rows: Vec<VariantRow>) -> Result<Product> {
        let status = ProductStatus::parse(&self.status)
            .ok_or_else(|| FulfillmentError::StorageError(format!("unknown product status {}", self.status)))?;
        let mut variants: Vec<Variant> = Vec::new();
        for row in rows {
            let slot = SizeStock { size: row.size, stock: Quantity::new(count(row.stock)) };
            match variants.iter_mut().find(|v| v.color == row.color) {
                Some(variant) => variant.sizes.push(slot),
                None => variants.push(Variant { color: row.color, sizes: vec![slot] }),
            }
        }
        Ok(Product {
            id: self.id, name: self.name, price: Money::new(self.price, &self.currency), status,
            category_id: self.category_id, stock: Quantity::new(count(self.stock)), variants,
            created_at: self.created_at, updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CouponRow {
    code: String,
    description: Option<String>,
    discount_type: String,
    discount_value: Decimal,
    minimum_purchase: Decimal,
    maximum_discount: Option<Decimal>,
    usage_limit: Option<i32>,
    per_user_limit: Option<i32>,
    usage_count: i32,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    is_active: bool,
    scope: Json<CouponScope>,
    first_time_user_only: bool,
    free_shipping: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<CouponRow> for Coupon {
    type Error = FulfillmentError;
    fn try_from(row: CouponRow) -> Result<Self> {
        let code = CouponCode::new(row.code).map_err(|e| FulfillmentError::StorageError(e.to_string()))?;
        let discount_type = DiscountType::parse(&row.discount_type)
            .ok_or_else(|| FulfillmentError::StorageError(format!("unknown discount type {}", row.discount_type)))?;
        Ok(Coupon {
            code, description: row.description, discount_type, discount_value: row.discount_value,
            minimum_purchase: row.minimum_purchase, maximum_discount: row.maximum_discount,
            usage_limit: row.usage_limit.map(count), per_user_limit: row.per_user_limit.map(count),
            usage_count: count(row.usage_count), starts_at: row.starts_at, ends_at: row.ends_at,
            is_active: row.is_active, scope: row.scope.0, first_time_user_only: row.first_time_user_only,
            free_shipping: row.free_shipping, created_at: row.created_at,
        })
    }
}

fn hydrate((Json(mut order), version): (Json<Order>, i64)) -> Order {
    order.version = version as u64;
    order
}

async fn take_stock(conn: &mut PgConnection, product_id: Uuid, name: &str, key: &VariantKey, qty: u32) -> Result<u32> {
    let qty = i32::try_from(qty).map_err(|_| FulfillmentError::Validation(format!("{name}: quantity too large")))?;
    let remaining = match (key.color.as_deref(), key.size.as_deref()) {
        (Some(color), Some(size)) => {
            sqlx::query_scalar::<_, i32>("UPDATE product_variants SET stock = stock - $4 WHERE product_id = $1 AND color = $2 AND size = $3 AND stock >= $4 RETURNING stock")
                .bind(product_id).bind(color).bind(size).bind(qty).fetch_optional(&mut *conn).await?
        }
        _ => {
            sqlx::query_scalar::<_, i32>("UPDATE products SET stock = stock - $2, updated_at = NOW() WHERE id = $1 AND stock >= $2 RETURNING stock")
                .bind(product_id).bind(qty).fetch_optional(&mut *conn).await?
        }
    };
    if let Some(left) = remaining { return Ok(count(left)); }

    let available = match (key.color.as_deref(), key.size.as_deref()) {
        (Some(color), Some(size)) => {
            sqlx::query_scalar::<_, i32>("SELECT stock FROM product_variants WHERE product_id = $1 AND color = $2 AND size = $3")
                .bind(product_id).bind(color).bind(size).fetch_optional(&mut *conn).await?
        }
        _ => sqlx::query_scalar::<_, i32>("SELECT stock FROM products WHERE id = $1").bind(product_id).fetch_optional(&mut *conn).await?,
    };
    Err(match available {
        Some(available) => FulfillmentError::InsufficientStock { product_id, name: name.to_string(), available: count(available) },
        None if key.is_flat() => FulfillmentError::ProductNotFound(product_id),
        None => FulfillmentError::Validation(format!("{name}: variant {key} does not exist")),
    })
}

async fn restore_stock(conn: &mut PgConnection, product_id: Uuid, key: &VariantKey, qty: u32) -> Result<Option<RestockTarget>> {
    let qty = i32::try_from(qty).unwrap_or(i32::MAX);
    if let (Some(color), Some(size)) = (key.color.as_deref(), key.size.as_deref()) {
        let updated = sqlx::query("UPDATE product_variants SET stock = stock + $4 WHERE product_id = $1 AND color = $2 AND size = $3")
            .bind(product_id).bind(color).bind(size).bind(qty).execute(&mut *conn).await?;
        if updated.rows_affected() > 0 { return Ok(Some(RestockTarget::Variant)); }
    }
    let updated = sqlx::query("UPDATE products SET stock = stock + $2, updated_at = NOW() WHERE id = $1")
        .bind(product_id).bind(qty).execute(&mut *conn).await?;
    Ok((updated.rows_affected() > 0).then_some(RestockTarget::FlatStock))
}

async fn redeem_coupon(conn: &mut PgConnection, customer_id: &str, redemption: &Redemption) -> Result<u32> {
    // Row lock serialises concurrent redemptions of the same code.
    let row: Option<(Option<i32>, i32)> = sqlx::query_as("SELECT usage_limit, usage_count FROM coupons WHERE code = $1 FOR UPDATE")
        .bind(redemption.code.as_str()).fetch_optional(&mut *conn).await?;
    let (limit, used) = row.ok_or_else(|| FulfillmentError::CouponNotFound(redemption.code.to_string()))?;
    if limit.is_some_and(|limit| used >= limit) { return Err(CouponRejection::UsageLimitReached.into()); }
    if let Some(per_user) = redemption.per_user_limit {
        let mine: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE customer_id = $1 AND coupon_code = $2 AND status <> 'cancelled'")
            .bind(customer_id).bind(redemption.code.as_str()).fetch_one(&mut *conn).await?;
        if mine >= i64::from(per_user) { return Err(CouponRejection::PerUserLimitReached.into()); }
    }
    let usage: i32 = sqlx::query_scalar("UPDATE coupons SET usage_count = usage_count + 1 WHERE code = $1 RETURNING usage_count")
        .bind(redemption.code.as_str()).fetch_one(&mut *conn).await?;
    Ok(count(usage))
}

/// Version compare-and-swap; returns the new version.
async fn write_order(conn: &mut PgConnection, order: &Order) -> Result<u64> {
    let version: Option<i64> = sqlx::query_scalar(
        "UPDATE orders SET status = $2, remote_order_id = $3, shipment_id = $4, document = $5, version = version + 1, updated_at = NOW() \
         WHERE id = $1 AND version = $6 RETURNING version",
    )
    .bind(order.id()).bind(order.status().as_str()).bind(order.shipment().remote_order_id.as_deref())
    .bind(order.shipment().shipment_id.as_deref()).bind(Json(order)).bind(order.version() as i64)
    .fetch_optional(&mut *conn).await?;
    if let Some(version) = version { return Ok(version as u64); }
    let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM orders WHERE id = $1").bind(order.id()).fetch_optional(&mut *conn).await?;
    match exists {
        Some(_) => Err(FulfillmentError::Conflict(format!("order {} was modified concurrently", order.number_label()))),
        None => Err(FulfillmentError::OrderNotFound(order.id().to_string())),
    }
}

async fn claim_webhook(conn: &mut PgConnection, key: &str) -> Result<bool> {
    let inserted = sqlx::query("INSERT INTO webhook_events (event_key) VALUES ($1) ON CONFLICT DO NOTHING").bind(key).execute(&mut *conn).await?;
    Ok(inserted.rows_affected() == 1)
}

async fn insert_order(conn: &mut PgConnection, order: &Order) -> Result<()> {
    sqlx::query(
        "INSERT INTO orders (id, order_number, customer_id, status, coupon_code, remote_order_id, shipment_id, document, version, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)",
    )
    .bind(order.id()).bind(order.order_number() as i64).bind(order.customer_id()).bind(order.status().as_str())
    .bind(order.coupon_code().map(|c| c.as_str())).bind(order.shipment().remote_order_id.as_deref())
    .bind(order.shipment().shipment_id.as_deref()).bind(Json(order)).bind(order.version() as i64).bind(order.created_at())
    .execute(&mut *conn).await?;
    Ok(())
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>> {
        let Some(row) = sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = $1").bind(id).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };
        let variants = sqlx::query_as::<_, VariantRow>("SELECT color, size, stock FROM product_variants WHERE product_id = $1 ORDER BY position, color, size")
            .bind(id).fetch_all(&self.pool).await?;
        row.into_product(variants).map(Some)
    }

    async fn save_product(&self, product: &Product) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO products (id, name, price, currency, status, category_id, stock, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (id) DO UPDATE SET name = $2, price = $3, currency = $4, status = $5, category_id = $6, stock = $7, updated_at = $9",
        )
        .bind(product.id()).bind(product.name()).bind(product.price().amount()).bind(product.price().currency())
        .bind(product.status().as_str()).bind(product.category_id()).bind(product.flat_stock().value() as i32)
        .bind(product.created_at).bind(product.updated_at)
        .execute(&mut *tx).await?;
        sqlx::query("DELETE FROM product_variants WHERE product_id = $1").bind(product.id()).execute(&mut *tx).await?;
        let mut position = 0i32;
        for variant in product.variants() {
            for slot in &variant.sizes {
                sqlx::query("INSERT INTO product_variants (product_id, color, size, position, stock) VALUES ($1, $2, $3, $4, $5)")
                    .bind(product.id()).bind(&variant.color).bind(&slot.size).bind(position).bind(slot.stock.value() as i32)
                    .execute(&mut *tx).await?;
                position += 1;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn decrement_variant_stock(&self, product_id: Uuid, key: &VariantKey, qty: u32) -> Result<u32> {
        let mut conn = self.pool.acquire().await?;
        let name: Option<String> = sqlx::query_scalar("SELECT name FROM products WHERE id = $1").bind(product_id).fetch_optional(&mut *conn).await?;
        let name = name.ok_or(FulfillmentError::ProductNotFound(product_id))?;
        take_stock(&mut conn, product_id, &name, key, qty).await
    }
}

#[async_trait]
impl CouponStore for PgStore {
    async fn find_coupon(&self, code: &CouponCode) -> Result<Option<Coupon>> {
        let row = sqlx::query_as::<_, CouponRow>("SELECT * FROM coupons WHERE code = $1").bind(code.as_str()).fetch_optional(&self.pool).await?;
        row.map(Coupon::try_from).transpose()
    }

    async fn insert_coupon(&self, coupon: &Coupon) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO coupons (code, description, discount_type, discount_value, minimum_purchase, maximum_discount, usage_limit, per_user_limit, \
             usage_count, starts_at, ends_at, is_active, scope, first_time_user_only, free_shipping, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(coupon.code.as_str()).bind(&coupon.description).bind(coupon.discount_type.as_str()).bind(coupon.discount_value)
        .bind(coupon.minimum_purchase).bind(coupon.maximum_discount).bind(coupon.usage_limit.map(|v| v as i32))
        .bind(coupon.per_user_limit.map(|v| v as i32)).bind(coupon.usage_count as i32).bind(coupon.starts_at).bind(coupon.ends_at)
        .bind(coupon.is_active).bind(Json(&coupon.scope)).bind(coupon.first_time_user_only).bind(coupon.free_shipping).bind(coupon.created_at)
        .execute(&self.pool).await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(FulfillmentError::Conflict(format!("coupon {} already exists", coupon.code())))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn count_customer_redemptions(&self, customer_id: &str, code: &CouponCode) -> Result<u32> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE customer_id = $1 AND coupon_code = $2 AND status <> 'cancelled'")
            .bind(customer_id).bind(code.as_str()).fetch_one(&self.pool).await?;
        Ok(n.max(0) as u32)
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn commit_order(&self, draft: NewOrder, redemption: Option<Redemption>, now: DateTime<Utc>) -> Result<Order> {
        // Any early return drops `tx`, which rolls every write back.
        let mut tx = self.pool.begin().await?;
        for item in &draft.items {
            take_stock(&mut tx, item.product_id, &item.name, &item.variant, item.quantity).await?;
        }
        if let Some(redemption) = &redemption {
            redeem_coupon(&mut tx, &draft.customer_id, redemption).await?;
        }
        let number: i64 = sqlx::query_scalar("SELECT nextval('order_number_seq')").fetch_one(&mut *tx).await?;
        let order = Order::place(draft, number as u64, now);
        insert_order(&mut tx, &order).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>> {
        let row: Option<(Json<Order>, i64)> = sqlx::query_as("SELECT document, version FROM orders WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(hydrate))
    }

    async fn find_order_by_reference(&self, reference: &str) -> Result<Option<Order>> {
        let reference = reference.trim();
        if let Some(number) = parse_order_number(reference) {
            let row: Option<(Json<Order>, i64)> = sqlx::query_as("SELECT document, version FROM orders WHERE order_number = $1")
                .bind(number as i64).fetch_optional(&self.pool).await?;
            if let Some(row) = row { return Ok(Some(hydrate(row))); }
        }
        let row: Option<(Json<Order>, i64)> = sqlx::query_as("SELECT document, version FROM orders WHERE remote_order_id = $1 OR shipment_id = $1 LIMIT 1")
            .bind(reference).fetch_optional(&self.pool).await?;
        Ok(row.map(hydrate))
    }

    async fn count_customer_orders(&self, customer_id: &str) -> Result<u32> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE customer_id = $1 AND status <> 'cancelled'")
            .bind(customer_id).fetch_one(&self.pool).await?;
        Ok(n.max(0) as u32)
    }

    async fn update_order(&self, order: &Order) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        write_order(&mut conn, order).await
    }

    async fn update_order_for_webhook(&self, order: &Order, webhook_key: &str) -> Result<Option<u64>> {
        let mut tx = self.pool.begin().await?;
        if !claim_webhook(&mut tx, webhook_key).await? { return Ok(None); }
        let version = write_order(&mut tx, order).await?;
        tx.commit().await?;
        Ok(Some(version))
    }

    async fn cancel_order(&self, id: Uuid, reason: &str, now: DateTime<Utc>, webhook_key: Option<&str>) -> Result<CancelOutcome> {
        let mut tx = self.pool.begin().await?;
        let row: Option<(Json<Order>, i64)> = sqlx::query_as("SELECT document, version FROM orders WHERE id = $1 FOR UPDATE")
            .bind(id).fetch_optional(&mut *tx).await?;
        let mut order = row.map(hydrate).ok_or_else(|| FulfillmentError::OrderNotFound(id.to_string()))?;
        if let Some(key) = webhook_key {
            if !claim_webhook(&mut tx, key).await? { return Ok(CancelOutcome::Duplicate(order)); }
        }
        match order.cancel(reason, now) {
            Err(OrderError::AlreadyCancelled) => {
                tx.commit().await?;
                return Ok(CancelOutcome::AlreadyCancelled(order));
            }
            Err(e) => return Err(e.into()),
            Ok(()) => {}
        }
        let mut restocked = Vec::with_capacity(order.items().len());
        for item in order.items() {
            let target = restore_stock(&mut tx, item.product_id, &item.variant, item.quantity).await?;
            restocked.push(Restock { product_id: item.product_id, variant: item.variant.clone(), quantity: item.quantity, target });
        }
        order.version += 1;
        sqlx::query("UPDATE orders SET status = $2, document = $3, version = $4, updated_at = NOW() WHERE id = $1")
            .bind(id).bind(order.status().as_str()).bind(Json(&order)).bind(order.version() as i64)
            .execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(CancelOutcome::Cancelled { order, restocked })
    }

    async fn webhook_seen(&self, key: &str) -> Result<bool> {
        let seen: Option<i32> = sqlx::query_scalar("SELECT 1 FROM webhook_events WHERE event_key = $1").bind(key).fetch_optional(&self.pool).await?;
        Ok(seen.is_some())
    }

    async fn record_webhook(&self, key: &str) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        claim_webhook(&mut conn, key).await
    }
}

#[async_trait]
impl CartStore for PgStore {
    async fn get_cart(&self, customer_id: &str) -> Result<Option<Cart>> {
        let row: Option<Json<Cart>> = sqlx::query_scalar("SELECT document FROM carts WHERE customer_id = $1").bind(customer_id).fetch_optional(&self.pool).await?;
        Ok(row.map(|Json(cart)| cart))
    }

    async fn save_cart(&self, cart: &Cart) -> Result<()> {
        sqlx::query("INSERT INTO carts (customer_id, document, updated_at) VALUES ($1, $2, NOW()) ON CONFLICT (customer_id) DO UPDATE SET document = $2, updated_at = NOW()")
            .bind(cart.customer_id()).bind(Json(cart)).execute(&self.pool).await?;
        Ok(())
    }

    async fn get_wishlist(&self, customer_id: &str) -> Result<Option<Wishlist>> {
        let row: Option<Json<Wishlist>> = sqlx::query_scalar("SELECT document FROM wishlists WHERE customer_id = $1").bind(customer_id).fetch_optional(&self.pool).await?;
        Ok(row.map(|Json(list)| list))
    }

    async fn save_wishlist(&self, wishlist: &Wishlist) -> Result<()> {
        sqlx::query("INSERT INTO wishlists (customer_id, document, updated_at) VALUES ($1, $2, NOW()) ON CONFLICT (customer_id) DO UPDATE SET document = $2, updated_at = NOW()")
            .bind(wishlist.customer_id()).bind(Json(wishlist)).execute(&self.pool).await?;
        Ok(())
    }
}
