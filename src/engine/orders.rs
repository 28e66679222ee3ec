use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;
use crate::domain::aggregates::{
    Address, Coupon, CouponContext, CouponRejection, NewOrder, Order, OrderItem, PaymentMethod, Shipment, VariantKey,
};
use crate::domain::events::{CouponEvent, DomainEvent};
use crate::domain::pricing::CourierQuote;
use crate::domain::value_objects::{CouponCode, Money};
use crate::engine::FulfillmentEngine;
use crate::store::{stock_error, Redemption};
use crate::{FulfillmentError, Result};

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct LineItemRequest {
    pub product_id: Uuid,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: u32,
    /// Accepted for compatibility with storefront payloads and ignored.
    #[serde(default)]
    pub price: Option<Decimal>,
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct CreateOrderInput {
    #[validate(length(min = 1, max = 128))]
    pub customer_id: String,
    #[validate]
    pub items: Vec<LineItemRequest>,
    #[validate]
    pub shipping_address: Address,
    #[serde(default)]
    pub billing_address: Option<Address>,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub courier: Option<CourierQuote>,
}

/// Checkout of the customer's cart; the items come from the cart itself.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct CheckoutInput {
    #[validate]
    pub shipping_address: Address,
    #[serde(default)]
    pub billing_address: Option<Address>,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub courier: Option<CourierQuote>,
}

/// Coupon outcome folded into the order draft.
struct AppliedCoupon {
    coupon: Coupon,
    discount: Decimal,
    free_shipping: bool,
}

impl FulfillmentEngine {
    /// Prices the order from the catalog, redeems the coupon and commits
    /// everything as one unit. Provider notification happens afterwards and
    /// cannot fail the call.
    pub async fn create_order(&self, input: CreateOrderInput) -> Result<Order> {
        input.validate()?;
        if input.items.is_empty() {
            return Err(FulfillmentError::Validation("order has no items".into()));
        }
        if let Some(billing) = &input.billing_address { billing.validate()?; }
        if let Some(courier) = &input.courier { courier.validate()?; }
        let now = self.clock.now();

        let items = self.price_items(&input.items).await?;
        let currency = items.first().map_or(self.pricing.currency.as_str(), |i| i.unit_price.currency()).to_string();
        let subtotal = items.iter().try_fold(Money::zero(&currency), |acc, item| acc.add(&item.line_total))?;

        let applied = match input.coupon_code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => Some(self.apply_coupon(&input.customer_id, code, &items, now).await?),
            None => None,
        };
        let (discount, free_shipping) = applied.as_ref().map_or((Decimal::ZERO, false), |a| (a.discount, a.free_shipping));
        let totals = self.pricing.totals(subtotal, discount, free_shipping, input.courier.as_ref())?;

        let coupon_code = applied.as_ref().map(|a| a.coupon.code().clone());
        let redemption = applied.as_ref().map(|a| Redemption { code: a.coupon.code().clone(), per_user_limit: a.coupon.per_user_limit() });
        let draft = NewOrder {
            customer_id: input.customer_id,
            items,
            totals,
            coupon_code: coupon_code.clone(),
            payment_method: input.payment_method,
            billing_address: input.billing_address.unwrap_or_else(|| input.shipping_address.clone()),
            shipping_address: input.shipping_address,
            courier_name: input.courier.map(|c| c.courier_name),
        };

        let mut order = self.store.commit_order(draft, redemption, now).await?;
        info!(
            order_id = %order.id(), order_number = %order.number_label(), customer_id = order.customer_id(),
            total = %order.totals().total, coupon = ?coupon_code.as_ref().map(CouponCode::as_str), "order placed"
        );

        let mut events = order.take_events();
        if let Some(code) = coupon_code {
            match self.store.find_coupon(&code).await {
                Ok(Some(coupon)) => events.push(DomainEvent::Coupon(CouponEvent::Redeemed { code, order_id: order.id(), usage_count: coupon.usage_count() })),
                Ok(None) => warn!(%code, "redeemed coupon vanished before event publication"),
                Err(e) => warn!(%code, error = %e, "could not reload redeemed coupon"),
            }
        }
        self.publish(events).await;
        Ok(self.sync_remote_order(order).await)
    }

    /// Places an order for everything in the customer's cart, then empties it.
    pub async fn checkout_cart(&self, customer_id: &str, input: CheckoutInput) -> Result<Order> {
        input.validate()?;
        let cart = self.load_cart(customer_id).await?;
        if cart.is_empty() {
            return Err(FulfillmentError::Validation("cart is empty".into()));
        }
        let items = cart.items().iter().map(|item| LineItemRequest {
            product_id: item.product_id,
            color: item.variant.color.clone(),
            size: item.variant.size.clone(),
            quantity: item.quantity,
            price: None,
        }).collect();
        let order = self.create_order(CreateOrderInput {
            customer_id: customer_id.to_string(),
            items,
            shipping_address: input.shipping_address,
            billing_address: input.billing_address,
            payment_method: input.payment_method,
            coupon_code: input.coupon_code,
            courier: input.courier,
        }).await?;

        let mut emptied = cart;
        emptied.clear();
        if let Err(e) = self.store.save_cart(&emptied).await {
            warn!(customer_id, order_number = %order.number_label(), error = %e, "cart clear failed after checkout, deferring");
            self.defer_cart_clear(customer_id);
        }
        Ok(order)
    }

    /// Builds order lines from catalog prices. Fails before any write when a
    /// product is missing, inactive or short on stock.
    async fn price_items(&self, lines: &[LineItemRequest]) -> Result<Vec<OrderItem>> {
        let mut items: Vec<OrderItem> = Vec::with_capacity(lines.len());
        for line in lines {
            let product = self.store.get_product(line.product_id).await?.ok_or(FulfillmentError::ProductNotFound(line.product_id))?;
            if !product.is_active() {
                return Err(FulfillmentError::ProductInactive(product.id()));
            }
            let key = VariantKey::new(line.color.clone(), line.size.clone());
            let available = product.available(&key).map_err(|e| stock_error(product.id(), product.name(), e))?;
            if available < line.quantity {
                return Err(FulfillmentError::InsufficientStock { product_id: product.id(), name: product.name().to_string(), available });
            }
            if let Some(first) = items.first() {
                if first.unit_price.currency() != product.price().currency() {
                    return Err(FulfillmentError::Validation(format!("{} is priced in {}, order is in {}", product.name(), product.price().currency(), first.unit_price.currency())));
                }
            }
            items.push(OrderItem::new(product.id(), product.category_id(), product.name(), key, product.price().clone(), line.quantity));
        }
        Ok(items)
    }

    /// Fail-closed: any problem with the supplied code rejects the order.
    async fn apply_coupon(&self, customer_id: &str, code: &str, items: &[OrderItem], now: chrono::DateTime<chrono::Utc>) -> Result<AppliedCoupon> {
        let code = CouponCode::new(code).map_err(|e| FulfillmentError::Validation(e.to_string()))?;
        let coupon = self.store.find_coupon(&code).await?.ok_or_else(|| FulfillmentError::CouponNotFound(code.to_string()))?;
        let ctx = CouponContext {
            now,
            prior_orders: self.store.count_customer_orders(customer_id).await?,
            prior_redemptions: self.store.count_customer_redemptions(customer_id, &code).await?,
        };
        coupon.validate(&ctx)?;

        let eligible = coupon.eligible_amount(items.iter().map(|i| (i.product_id, i.category_id, i.line_total.amount())));
        if eligible.is_zero() {
            return Err(CouponRejection::NotApplicable.into());
        }
        let quote = coupon.calculate_discount(eligible);
        if !quote.valid {
            return Err(quote.reason.unwrap_or(CouponRejection::NotApplicable).into());
        }
        Ok(AppliedCoupon { discount: quote.discount_amount, free_shipping: quote.free_shipping, coupon })
    }

    /// Mirrors the order at the shipping provider and attaches the remote ids.
    pub(crate) async fn sync_remote_order(&self, order: Order) -> Order {
        let remote = match self.shipping.create_remote_order(&order).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(order_number = %order.number_label(), error = %e, "shipping provider unavailable, order kept local");
                return order;
            }
        };
        let mut updated = order.clone();
        let patch = Shipment { remote_order_id: Some(remote.remote_order_id), shipment_id: remote.shipment_id, ..Shipment::default() };
        if !updated.merge_shipment(patch, self.clock.now()) {
            return order;
        }
        match self.store.update_order(&updated).await {
            Ok(version) => {
                updated.version = version;
                info!(
                    order_number = %updated.number_label(), remote_order_id = ?updated.shipment().remote_order_id,
                    shipment_id = ?updated.shipment().shipment_id, "remote order created"
                );
                updated
            }
            Err(e) => {
                warn!(order_number = %order.number_label(), error = %e, "could not attach remote order ids");
                order
            }
        }
    }
}
