//! Cart and Wishlist Aggregates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::aggregates::product::VariantKey;
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cart {
    customer_id: String,
    items: Vec<CartItem>,
    subtotal: Money,
    item_count: u32,
    currency: String,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: Uuid,
    pub name: String,
    pub variant: VariantKey,
    pub quantity: u32,
    /// Catalog price when the item was added; display only, never charged.
    pub price_snapshot: Money,
}

impl CartItem {
    pub fn line_total(&self) -> Money { self.price_snapshot.multiply(self.quantity) }
    fn matches(&self, product_id: Uuid, variant: &VariantKey) -> bool { self.product_id == product_id && &self.variant == variant }
}

impl Cart {
    pub fn for_customer(customer_id: impl Into<String>, currency: &str) -> Self {
        Self {
            customer_id: customer_id.into(), items: vec![], subtotal: Money::zero(currency),
            item_count: 0, currency: currency.to_string(), updated_at: Utc::now(),
        }
    }

    pub fn customer_id(&self) -> &str { &self.customer_id }
    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn subtotal(&self) -> &Money { &self.subtotal }
    pub fn item_count(&self) -> u32 { self.item_count }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    pub fn add_item(&mut self, item: CartItem) -> Result<(), CartError> {
        if item.quantity == 0 { return Err(CartError::InvalidQuantity); }
        if item.price_snapshot.currency() != self.currency { return Err(CartError::CurrencyMismatch); }
        if let Some(existing) = self.items.iter_mut().find(|i| i.matches(item.product_id, &item.variant)) {
            existing.quantity += item.quantity;
            existing.price_snapshot = item.price_snapshot;
        } else {
            self.items.push(item);
        }
        self.recalculate();
        Ok(())
    }

    pub fn update_quantity(&mut self, product_id: Uuid, variant: &VariantKey, quantity: u32) -> Result<(), CartError> {
        let item = self.items.iter_mut().find(|i| i.matches(product_id, variant)).ok_or(CartError::ItemNotFound)?;
        if quantity == 0 { self.items.retain(|i| !i.matches(product_id, variant)); }
        else { item.quantity = quantity; }
        self.recalculate();
        Ok(())
    }

    pub fn remove_item(&mut self, product_id: Uuid, variant: &VariantKey) -> Result<(), CartError> {
        let before = self.items.len();
        self.items.retain(|i| !i.matches(product_id, variant));
        if self.items.len() == before { return Err(CartError::ItemNotFound); }
        self.recalculate();
        Ok(())
    }

    pub fn clear(&mut self) { self.items.clear(); self.recalculate(); }

    fn recalculate(&mut self) {
        self.subtotal = self.items.iter().fold(Money::zero(&self.currency), |acc, i| acc.add(&i.line_total()).unwrap_or(acc));
        self.item_count = self.items.iter().map(|i| i.quantity).sum();
        self.updated_at = Utc::now();
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Wishlist {
    customer_id: String,
    product_ids: Vec<Uuid>,
    updated_at: DateTime<Utc>,
}

impl Wishlist {
    pub fn for_customer(customer_id: impl Into<String>) -> Self {
        Self { customer_id: customer_id.into(), product_ids: vec![], updated_at: Utc::now() }
    }
    pub fn customer_id(&self) -> &str { &self.customer_id }
    pub fn product_ids(&self) -> &[Uuid] { &self.product_ids }

    /// Returns false when the product was already listed.
    pub fn add(&mut self, product_id: Uuid) -> bool {
        if self.product_ids.contains(&product_id) { return false; }
        self.product_ids.push(product_id);
        self.updated_at = Utc::now();
        true
    }

    pub fn remove(&mut self, product_id: Uuid) -> bool {
        let before = self.product_ids.len();
        self.product_ids.retain(|p| *p != product_id);
        self.updated_at = Utc::now();
        self.product_ids.len() != before
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum CartError { ItemNotFound, InvalidQuantity, CurrencyMismatch }
impl std::error::Error for CartError {}
impl std::fmt::Display for CartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ItemNotFound => write!(f, "Item not found"),
            Self::InvalidQuantity => write!(f, "Quantity must be at least 1"),
            Self::CurrencyMismatch => write!(f, "Item currency does not match the cart"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn item(qty: u32, size: &str) -> CartItem {
        CartItem {
            product_id: Uuid::nil(), name: "Widget".into(), variant: VariantKey::new(Some("red".into()), Some(size.into())),
            quantity: qty, price_snapshot: Money::new(Decimal::new(10, 0), "INR"),
        }
    }

    #[test]
    fn test_cart_operations() {
        let mut cart = Cart::for_customer("C1", "INR");
        cart.add_item(item(2, "M")).unwrap();
        assert_eq!(cart.subtotal().amount(), Decimal::new(20, 0));
        cart.add_item(item(1, "M")).unwrap();
        assert_eq!(cart.items()[0].quantity, 3); // Merged
        cart.add_item(item(1, "L")).unwrap();
        assert_eq!(cart.items().len(), 2);
        assert_eq!(cart.item_count(), 4);
        let medium = item(0, "M").variant;
        cart.update_quantity(Uuid::nil(), &medium, 0).unwrap();
        assert_eq!(cart.subtotal().amount(), Decimal::new(10, 0));
        cart.clear();
        assert!(cart.is_empty());
        assert!(cart.subtotal().is_zero());
    }

    #[test]
    fn test_wishlist_dedupes() {
        let mut list = Wishlist::for_customer("C1");
        assert!(list.add(Uuid::nil()));
        assert!(!list.add(Uuid::nil()));
        assert!(list.remove(Uuid::nil()));
        assert!(list.product_ids().is_empty());
    }
}
