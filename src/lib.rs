//! OpenSASE Fulfillment
//!
//! Order fulfillment and discount reconciliation for OpenSASE commerce.
//!
//! ## Features
//! - Server-priced order assembly with atomic stock reservation
//! - Coupon validation, discount preview and single-use redemption
//! - Shipment and payment webhook reconciliation
//! - Cancellation with stock restoration
//! - Exchange/return requests inside the post-delivery window
//! - Per-customer cart and wishlist

use thiserror::Error;
use uuid::Uuid;

pub mod api;
pub mod config;
pub mod domain;
pub mod engine;
pub mod providers;
pub mod store;

pub use config::Config;
pub use engine::FulfillmentEngine;

use domain::aggregates::{CartError, CouponError, CouponRejection, OrderError};
use domain::value_objects::MoneyError;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum FulfillmentError {
    #[error("Product {0} not found")]
    ProductNotFound(Uuid),

    #[error("Coupon {0} not found")]
    CouponNotFound(String),

    #[error("Order {0} not found")]
    OrderNotFound(String),

    #[error("Product {0} is not available for sale")]
    ProductInactive(Uuid),

    #[error("Insufficient stock for {name}: only {available} available")]
    InsufficientStock { product_id: Uuid, name: String, available: u32 },

    #[error("Invalid coupon: {0}")]
    InvalidCoupon(CouponRejection),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Request window of {days} days after delivery has expired")]
    ReturnWindowExpired { days: i64 },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Concurrent update: {0}")]
    Conflict(String),

    #[error("Shipping provider error: {0}")]
    ExternalProvider(String),

    #[error("Storage error: {0}")]
    StorageError(String),
}

pub type Result<T> = std::result::Result<T, FulfillmentError>;

impl From<OrderError> for FulfillmentError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::ReturnWindowExpired { days } => Self::ReturnWindowExpired { days },
            OrderError::ItemNotFound(_) => Self::Validation(e.to_string()),
            _ => Self::InvalidState(e.to_string()),
        }
    }
}

impl From<CouponRejection> for FulfillmentError {
    fn from(e: CouponRejection) -> Self { Self::InvalidCoupon(e) }
}

impl From<CouponError> for FulfillmentError {
    fn from(e: CouponError) -> Self { Self::Validation(e.to_string()) }
}

impl From<CartError> for FulfillmentError {
    fn from(e: CartError) -> Self { Self::Validation(e.to_string()) }
}

impl From<MoneyError> for FulfillmentError {
    fn from(e: MoneyError) -> Self { Self::Validation(e.to_string()) }
}

impl From<validator::ValidationErrors> for FulfillmentError {
    fn from(e: validator::ValidationErrors) -> Self { Self::Validation(e.to_string()) }
}

impl From<sqlx::Error> for FulfillmentError {
    fn from(e: sqlx::Error) -> Self { Self::StorageError(e.to_string()) }
}

impl From<providers::ProviderError> for FulfillmentError {
    fn from(e: providers::ProviderError) -> Self { Self::ExternalProvider(e.to_string()) }
}
