use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;
use validator::Validate;
use crate::domain::aggregates::{Cart, CartItem, VariantKey, Wishlist};
use crate::engine::FulfillmentEngine;
use crate::store::stock_error;
use crate::{FulfillmentError, Result};

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AddToCartInput {
    pub product_id: Uuid,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: u32,
}

/// Identifies a cart line: product plus optional colour and size.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CartItemKey {
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
}

impl CartItemKey {
    fn variant(&self) -> VariantKey { VariantKey::new(self.color.clone(), self.size.clone()) }
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct UpdateCartItemInput {
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    /// Zero removes the line.
    #[validate(range(max = 1000))]
    pub quantity: u32,
}

impl FulfillmentEngine {
    pub async fn get_cart(&self, customer_id: &str) -> Result<Cart> {
        self.load_cart(customer_id).await
    }

    /// Adds the item at the current catalog price; repeated adds of the same
    /// product and variant merge into one line.
    pub async fn add_to_cart(&self, customer_id: &str, input: AddToCartInput) -> Result<Cart> {
        input.validate()?;
        let product = self.store.get_product(input.product_id).await?.ok_or(FulfillmentError::ProductNotFound(input.product_id))?;
        if !product.is_active() {
            return Err(FulfillmentError::ProductInactive(product.id()));
        }
        let variant = VariantKey::new(input.color, input.size);
        product.resolve(&variant).map_err(|e| stock_error(product.id(), product.name(), e))?;

        let mut cart = self.load_cart(customer_id).await?;
        cart.add_item(CartItem {
            product_id: product.id(),
            name: product.name().to_string(),
            variant,
            quantity: input.quantity,
            price_snapshot: product.price().clone(),
        })?;
        self.store.save_cart(&cart).await?;
        debug!(customer_id, product_id = %product.id(), items = cart.item_count(), "cart item added");
        Ok(cart)
    }

    pub async fn update_cart_item(&self, customer_id: &str, product_id: Uuid, input: UpdateCartItemInput) -> Result<Cart> {
        input.validate()?;
        let mut cart = self.load_cart(customer_id).await?;
        cart.update_quantity(product_id, &VariantKey::new(input.color, input.size), input.quantity)?;
        self.store.save_cart(&cart).await?;
        Ok(cart)
    }

    pub async fn remove_cart_item(&self, customer_id: &str, product_id: Uuid, key: CartItemKey) -> Result<Cart> {
        let mut cart = self.load_cart(customer_id).await?;
        cart.remove_item(product_id, &key.variant())?;
        self.store.save_cart(&cart).await?;
        Ok(cart)
    }

    pub async fn clear_cart(&self, customer_id: &str) -> Result<Cart> {
        let mut cart = self.load_cart(customer_id).await?;
        cart.clear();
        self.store.save_cart(&cart).await?;
        Ok(cart)
    }

    pub async fn get_wishlist(&self, customer_id: &str) -> Result<Wishlist> {
        Ok(self.store.get_wishlist(customer_id).await?.unwrap_or_else(|| Wishlist::for_customer(customer_id)))
    }

    /// Duplicate adds are no-ops.
    pub async fn add_to_wishlist(&self, customer_id: &str, product_id: Uuid) -> Result<Wishlist> {
        if self.store.get_product(product_id).await?.is_none() {
            return Err(FulfillmentError::ProductNotFound(product_id));
        }
        let mut wishlist = self.get_wishlist(customer_id).await?;
        if wishlist.add(product_id) {
            self.store.save_wishlist(&wishlist).await?;
        }
        Ok(wishlist)
    }

    pub async fn remove_from_wishlist(&self, customer_id: &str, product_id: Uuid) -> Result<Wishlist> {
        let mut wishlist = self.get_wishlist(customer_id).await?;
        if wishlist.remove(product_id) {
            self.store.save_wishlist(&wishlist).await?;
        }
        Ok(wishlist)
    }

    /// Loads the cart, finishing a clear that failed after checkout.
    pub(crate) async fn load_cart(&self, customer_id: &str) -> Result<Cart> {
        let mut cart = self.store.get_cart(customer_id).await?
            .unwrap_or_else(|| Cart::for_customer(customer_id, &self.pricing.currency));
        if self.take_deferred_clear(customer_id) {
            cart.clear();
            if let Err(e) = self.store.save_cart(&cart).await {
                warn!(customer_id, error = %e, "deferred cart clear failed again");
                self.defer_cart_clear(customer_id);
            }
        }
        Ok(cart)
    }

    pub(crate) fn defer_cart_clear(&self, customer_id: &str) {
        let mut pending = self.pending_cart_clears.lock().unwrap_or_else(|e| e.into_inner());
        pending.insert(customer_id.to_string());
    }

    fn take_deferred_clear(&self, customer_id: &str) -> bool {
        let mut pending = self.pending_cart_clears.lock().unwrap_or_else(|e| e.into_inner());
        pending.remove(customer_id)
    }
}
