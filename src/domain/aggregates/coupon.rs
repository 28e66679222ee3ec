//! Coupon Aggregate
//!
//! Holds the pure half of coupon handling: eligibility checks, status
//! derivation and discount arithmetic. Nothing here touches usage counters;
//! redemption is a store operation performed once per committed order.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::{round_currency, CouponCode};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType { Percentage, Fixed }

impl DiscountType {
    pub fn as_str(&self) -> &'static str { match self { Self::Percentage => "percentage", Self::Fixed => "fixed" } }
    pub fn parse(value: &str) -> Option<Self> {
        match value { "percentage" => Some(Self::Percentage), "fixed" => Some(Self::Fixed), _ => None }
    }
}

/// Which lines of an order a coupon discounts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CouponScope {
    #[default]
    All,
    Restricted {
        #[serde(default)] include_products: Vec<Uuid>,
        #[serde(default)] include_categories: Vec<Uuid>,
        #[serde(default)] exclude_products: Vec<Uuid>,
        #[serde(default)] exclude_categories: Vec<Uuid>,
    },
}

impl CouponScope {
    pub fn applies_to(&self, product_id: Uuid, category_id: Option<Uuid>) -> bool {
        match self {
            Self::All => true,
            Self::Restricted { include_products, include_categories, exclude_products, exclude_categories } => {
                let in_category = |list: &[Uuid]| category_id.is_some_and(|c| list.contains(&c));
                if exclude_products.contains(&product_id) || in_category(exclude_categories) { return false; }
                if include_products.is_empty() && include_categories.is_empty() { return true; }
                include_products.contains(&product_id) || in_category(include_categories)
            }
        }
    }
}

/// Derived, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponStatus { Inactive, Scheduled, Expired, LimitReached, Active }

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Coupon {
    pub(crate) code: CouponCode,
    pub(crate) description: Option<String>,
    pub(crate) discount_type: DiscountType,
    pub(crate) discount_value: Decimal,
    pub(crate) minimum_purchase: Decimal,
    pub(crate) maximum_discount: Option<Decimal>,
    pub(crate) usage_limit: Option<u32>,
    pub(crate) per_user_limit: Option<u32>,
    pub(crate) usage_count: u32,
    pub(crate) starts_at: DateTime<Utc>,
    pub(crate) ends_at: DateTime<Utc>,
    pub(crate) is_active: bool,
    pub(crate) scope: CouponScope,
    pub(crate) first_time_user_only: bool,
    pub(crate) free_shipping: bool,
    pub(crate) created_at: DateTime<Utc>,
}

/// Input for creating a coupon.
#[derive(Clone, Debug, Deserialize)]
pub struct NewCoupon {
    pub code: String,
    #[serde(default)] pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    #[serde(default)] pub minimum_purchase: Decimal,
    #[serde(default)] pub maximum_discount: Option<Decimal>,
    #[serde(default)] pub usage_limit: Option<u32>,
    #[serde(default)] pub per_user_limit: Option<u32>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(default = "default_active")] pub is_active: bool,
    #[serde(default)] pub scope: CouponScope,
    #[serde(default)] pub first_time_user_only: bool,
    #[serde(default)] pub free_shipping: bool,
}

fn default_active() -> bool { true }

/// Facts about the redeeming customer needed by `validate`.
#[derive(Clone, Copy, Debug)]
pub struct CouponContext {
    pub now: DateTime<Utc>,
    pub prior_orders: u32,
    pub prior_redemptions: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CouponRejection {
    Inactive,
    NotYetValid,
    Expired,
    UsageLimitReached,
    PerUserLimitReached,
    FirstOrderOnly,
    NotApplicable,
    MinimumPurchase { minimum: Decimal },
}

impl std::fmt::Display for CouponRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inactive => write!(f, "Coupon is not active"),
            Self::NotYetValid => write!(f, "Coupon is not valid yet"),
            Self::Expired => write!(f, "Coupon has expired"),
            Self::UsageLimitReached => write!(f, "Coupon usage limit reached"),
            Self::PerUserLimitReached => write!(f, "You have already used this coupon the maximum number of times"),
            Self::FirstOrderOnly => write!(f, "Coupon is only valid on your first order"),
            Self::NotApplicable => write!(f, "Coupon does not apply to any item in this order"),
            Self::MinimumPurchase { minimum } => write!(f, "Minimum purchase of {} required", round_currency(*minimum)),
        }
    }
}

/// Result of `calculate_discount`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DiscountQuote {
    pub valid: bool,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
    pub free_shipping: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<CouponRejection>,
}

impl Coupon {
    pub fn create(input: NewCoupon, now: DateTime<Utc>) -> Result<Self, CouponError> {
        let code = CouponCode::new(input.code).map_err(|e| CouponError::InvalidCode(e.to_string()))?;
        if input.ends_at <= input.starts_at { return Err(CouponError::InvalidWindow); }
        if input.discount_value <= Decimal::ZERO { return Err(CouponError::InvalidValue("discount value must be positive")); }
        if input.discount_type == DiscountType::Percentage && input.discount_value > Decimal::ONE_HUNDRED {
            return Err(CouponError::InvalidValue("percentage cannot exceed 100"));
        }
        if input.minimum_purchase < Decimal::ZERO || input.maximum_discount.is_some_and(|m| m < Decimal::ZERO) {
            return Err(CouponError::InvalidValue("amounts cannot be negative"));
        }
        Ok(Self {
            code, description: input.description, discount_type: input.discount_type, discount_value: input.discount_value,
            minimum_purchase: input.minimum_purchase, maximum_discount: input.maximum_discount,
            usage_limit: input.usage_limit, per_user_limit: input.per_user_limit, usage_count: 0,
            starts_at: input.starts_at, ends_at: input.ends_at, is_active: input.is_active, scope: input.scope,
            first_time_user_only: input.first_time_user_only, free_shipping: input.free_shipping, created_at: now,
        })
    }

    pub fn code(&self) -> &CouponCode { &self.code }
    pub fn usage_count(&self) -> u32 { self.usage_count }
    pub fn usage_limit(&self) -> Option<u32> { self.usage_limit }
    pub fn per_user_limit(&self) -> Option<u32> { self.per_user_limit }
    pub fn scope(&self) -> &CouponScope { &self.scope }
    pub fn free_shipping(&self) -> bool { self.free_shipping }

    /// Precedence: inactive, scheduled, expired, limit reached, active.
    pub fn status_at(&self, now: DateTime<Utc>) -> CouponStatus {
        if !self.is_active { CouponStatus::Inactive }
        else if now < self.starts_at { CouponStatus::Scheduled }
        else if now > self.ends_at { CouponStatus::Expired }
        else if self.limit_reached() { CouponStatus::LimitReached }
        else { CouponStatus::Active }
    }

    /// First failing check wins.
    pub fn validate(&self, ctx: &CouponContext) -> Result<(), CouponRejection> {
        if !self.is_active { return Err(CouponRejection::Inactive); }
        if ctx.now < self.starts_at { return Err(CouponRejection::NotYetValid); }
        if ctx.now > self.ends_at { return Err(CouponRejection::Expired); }
        if self.limit_reached() { return Err(CouponRejection::UsageLimitReached); }
        if self.first_time_user_only && ctx.prior_orders > 0 { return Err(CouponRejection::FirstOrderOnly); }
        if self.per_user_limit.is_some_and(|limit| ctx.prior_redemptions >= limit) {
            return Err(CouponRejection::PerUserLimitReached);
        }
        Ok(())
    }

    /// Sums the line totals this coupon applies to.
    pub fn eligible_amount<I>(&self, lines: I) -> Decimal
    where I: IntoIterator<Item = (Uuid, Option<Uuid>, Decimal)> {
        lines.into_iter().filter(|(product, category, _)| self.scope.applies_to(*product, *category)).map(|(_, _, total)| total).sum()
    }

    /// Read-only: never consumes usage.
    pub fn calculate_discount(&self, order_amount: Decimal) -> DiscountQuote {
        let order_amount = round_currency(order_amount);
        if order_amount < self.minimum_purchase {
            return DiscountQuote {
                valid: false, discount_amount: Decimal::ZERO, final_amount: order_amount, free_shipping: false,
                reason: Some(CouponRejection::MinimumPurchase { minimum: self.minimum_purchase }),
            };
        }
        let raw = match self.discount_type {
            DiscountType::Percentage => {
                let pct = order_amount.checked_mul(self.discount_value).map(|v| v / Decimal::ONE_HUNDRED)
                    .or_else(|| (order_amount / Decimal::ONE_HUNDRED).checked_mul(self.discount_value))
                    .unwrap_or(order_amount);
                self.maximum_discount.map_or(pct, |cap| pct.min(cap))
            }
            DiscountType::Fixed => self.discount_value,
        };
        let discount = round_currency(raw.min(order_amount).max(Decimal::ZERO));
        DiscountQuote {
            valid: true, discount_amount: discount, final_amount: order_amount - discount,
            free_shipping: self.free_shipping, reason: None,
        }
    }

    /// Consumes one unit of allowance if the limit permits.
    pub(crate) fn redeem(&mut self) -> Result<u32, CouponRejection> {
        if self.limit_reached() { return Err(CouponRejection::UsageLimitReached); }
        self.usage_count += 1;
        Ok(self.usage_count)
    }

    fn limit_reached(&self) -> bool { self.usage_limit.is_some_and(|limit| self.usage_count >= limit) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum CouponError { InvalidCode(String), InvalidWindow, InvalidValue(&'static str) }
impl std::error::Error for CouponError {}
impl std::fmt::Display for CouponError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCode(e) => write!(f, "Invalid coupon code: {e}"),
            Self::InvalidWindow => write!(f, "End date must be after start date"),
            Self::InvalidValue(e) => write!(f, "Invalid coupon: {e}"),
        }
    }
}
