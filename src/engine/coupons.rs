use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;
use crate::domain::aggregates::{Coupon, CouponContext, CouponStatus, DiscountType, NewCoupon};
use crate::domain::value_objects::CouponCode;
use crate::engine::FulfillmentEngine;
use crate::{FulfillmentError, Result};

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct CouponPreviewInput {
    #[validate(length(min = 1, max = 32))]
    pub code: String,
    pub order_amount: Decimal,
    /// When present, first-order and per-customer limits are checked too.
    #[serde(default)]
    pub customer_id: Option<String>,
}

/// Read-only discount preview.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CouponPreview {
    pub code: CouponCode,
    pub status: CouponStatus,
    pub discount_type: DiscountType,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
    pub free_shipping: bool,
}

/// Upper bound for previewed order amounts.
fn max_preview_amount() -> Decimal { Decimal::new(1_000_000_000_000, 0) }

impl FulfillmentEngine {
    pub async fn create_coupon(&self, input: NewCoupon) -> Result<Coupon> {
        let coupon = Coupon::create(input, self.clock.now())?;
        self.store.insert_coupon(&coupon).await?;
        info!(code = %coupon.code(), "coupon created");
        Ok(coupon)
    }

    pub async fn get_coupon(&self, code: &str) -> Result<Coupon> {
        let code = CouponCode::new(code).map_err(|e| FulfillmentError::Validation(e.to_string()))?;
        self.store.find_coupon(&code).await?.ok_or_else(|| FulfillmentError::CouponNotFound(code.to_string()))
    }

    /// Never touches the usage count.
    pub async fn validate_coupon(&self, input: CouponPreviewInput) -> Result<CouponPreview> {
        input.validate()?;
        let max = max_preview_amount();
        if input.order_amount < Decimal::ZERO || input.order_amount > max {
            return Err(FulfillmentError::Validation(format!("order amount must be between 0 and {max}")));
        }
        let coupon = self.get_coupon(&input.code).await?;
        let now = self.clock.now();
        let ctx = match input.customer_id.as_deref() {
            Some(customer_id) => CouponContext {
                now,
                prior_orders: self.store.count_customer_orders(customer_id).await?,
                prior_redemptions: self.store.count_customer_redemptions(customer_id, coupon.code()).await?,
            },
            None => CouponContext { now, prior_orders: 0, prior_redemptions: 0 },
        };
        coupon.validate(&ctx)?;
        let quote = coupon.calculate_discount(input.order_amount);
        if let Some(reason) = quote.reason {
            return Err(reason.into());
        }
        Ok(CouponPreview {
            status: coupon.status_at(now),
            discount_type: coupon.discount_type,
            discount_amount: quote.discount_amount,
            final_amount: quote.final_amount,
            free_shipping: quote.free_shipping,
            code: coupon.code,
        })
    }
}
