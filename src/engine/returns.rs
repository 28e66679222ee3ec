use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;
use crate::domain::aggregates::{ItemRequest, Order, RequestKind, VariantKey};
use crate::engine::{FulfillmentEngine, MAX_ATTEMPTS};
use crate::store::stock_error;
use crate::{FulfillmentError, Result};

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct ExchangeInput {
    #[validate(length(min = 1))]
    pub customer_id: String,
    pub product_id: Uuid,
    #[validate(length(min = 1))]
    pub color: String,
    #[validate(length(min = 1))]
    pub size: String,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct ReturnInput {
    #[validate(length(min = 1))]
    pub customer_id: String,
    pub product_id: Uuid,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

impl FulfillmentEngine {
    /// Opens an exchange for a delivered item. The replacement colour/size
    /// must be in stock.
    pub async fn request_exchange(&self, order_id: Uuid, input: ExchangeInput) -> Result<ItemRequest> {
        input.validate()?;
        let replacement = VariantKey::new(Some(input.color.clone()), Some(input.size.clone()));
        self.open_item_request(order_id, &input.customer_id, RequestKind::Exchange, input.product_id, &input.reason, Some(replacement)).await
    }

    pub async fn request_return(&self, order_id: Uuid, input: ReturnInput) -> Result<ItemRequest> {
        input.validate()?;
        self.open_item_request(order_id, &input.customer_id, RequestKind::Return, input.product_id, &input.reason, None).await
    }

    async fn open_item_request(
        &self, order_id: Uuid, customer_id: &str, kind: RequestKind, product_id: Uuid, reason: &str, replacement: Option<VariantKey>,
    ) -> Result<ItemRequest> {
        let mut attempt = 1;
        loop {
            let mut order = self.owned_order(order_id, customer_id).await?;
            let request = order.open_request(kind, product_id, reason, replacement.clone(), self.clock.now(), self.return_window_days)?;
            if let Some(key) = &replacement {
                self.ensure_in_stock(product_id, key).await?;
            }
            match self.persist(&mut order, true).await {
                Ok(()) => {
                    info!(order_number = %order.number_label(), %product_id, ?kind, "item request opened");
                    return Ok(request);
                }
                Err(FulfillmentError::Conflict(msg)) if attempt < MAX_ATTEMPTS => {
                    debug!(%order_id, attempt, %msg, "item request lost a race, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Orders are only visible to the customer who placed them.
    async fn owned_order(&self, order_id: Uuid, customer_id: &str) -> Result<Order> {
        let order = self.get_order(order_id).await?;
        if order.customer_id() != customer_id {
            return Err(FulfillmentError::OrderNotFound(order_id.to_string()));
        }
        Ok(order)
    }

    async fn ensure_in_stock(&self, product_id: Uuid, key: &VariantKey) -> Result<()> {
        let product = self.store.get_product(product_id).await?.ok_or(FulfillmentError::ProductNotFound(product_id))?;
        let available = product.available(key).map_err(|e| stock_error(product_id, product.name(), e))?;
        if available == 0 {
            return Err(FulfillmentError::InsufficientStock { product_id, name: product.name().to_string(), available });
        }
        Ok(())
    }
}
