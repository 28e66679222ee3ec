//! Shipping and tax rules applied on top of the priced subtotal.

use rust_decimal::Decimal;
use serde::Deserialize;
use validator::Validate;
use crate::domain::aggregates::OrderTotals;
use crate::domain::value_objects::{Money, MoneyError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PricingPolicy {
    pub currency: String,
    pub tax_rate: Decimal,
    /// Subtotals at or above this ship free.
    pub free_shipping_threshold: Decimal,
    pub flat_shipping_fee: Decimal,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            currency: "INR".to_string(),
            tax_rate: Decimal::new(18, 2),
            free_shipping_threshold: Decimal::new(1000, 0),
            flat_shipping_fee: Decimal::new(50, 0),
        }
    }
}

/// A courier rate picked by the customer from the shipping provider's quote.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Validate)]
pub struct CourierQuote {
    #[validate(length(min = 1))]
    pub courier_name: String,
    pub rate: Decimal,
}

impl PricingPolicy {
    pub fn shipping_cost(&self, subtotal: &Money, free_shipping: bool, quote: Option<&CourierQuote>) -> Money {
        let amount = match quote {
            _ if free_shipping => Decimal::ZERO,
            Some(q) => q.rate.max(Decimal::ZERO),
            None if subtotal.amount() >= self.free_shipping_threshold => Decimal::ZERO,
            None => self.flat_shipping_fee,
        };
        Money::new(amount, subtotal.currency()).rounded()
    }

    /// `total = subtotal + shipping + tax - discount`, tax charged on the undiscounted subtotal.
    pub fn totals(&self, subtotal: Money, discount: Decimal, free_shipping: bool, quote: Option<&CourierQuote>) -> Result<OrderTotals, MoneyError> {
        let subtotal = subtotal.rounded();
        let shipping = self.shipping_cost(&subtotal, free_shipping, quote);
        let tax = subtotal.scale(self.tax_rate);
        let discount = Money::new(discount, subtotal.currency()).rounded();
        let total = subtotal.add(&shipping)?.add(&tax)?.subtract(&discount)?;
        Ok(OrderTotals { subtotal, shipping, tax, discount, total })
    }
}
