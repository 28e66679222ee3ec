//! HTTP surface.
//!
//! Thin axum handlers over [`FulfillmentEngine`]; all rules live in the engine.

use std::sync::Arc;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, warn};
use uuid::Uuid;
use crate::domain::aggregates::{Cart, Coupon, ItemRequest, NewCoupon, Order, Wishlist};
use crate::domain::webhooks::{PaymentWebhook, ShipmentWebhook};
use crate::engine::{
    AddToCartInput, CartItemKey, CheckoutInput, CouponPreview, CouponPreviewInput, CreateOrderInput, ExchangeInput, ReturnInput,
    UpdateCartItemInput,
};
use crate::{FulfillmentEngine, FulfillmentError};

pub const WEBHOOK_TOKEN_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<FulfillmentEngine>,
    pub webhook_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(engine: Arc<FulfillmentEngine>, webhook_token: Option<String>) -> Self {
        Self { engine, webhook_token: webhook_token.map(Arc::from) }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "healthy", "service": "opensase-fulfillment"})) }))
        .route("/api/v1/orders", post(create_order))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/cancel", post(cancel_order))
        .route("/api/v1/orders/:id/tracking", post(refresh_tracking))
        .route("/api/v1/orders/:id/exchange", post(request_exchange))
        .route("/api/v1/orders/:id/return", post(request_return))
        .route("/api/v1/coupons", post(create_coupon))
        .route("/api/v1/coupons/validate", post(validate_coupon))
        .route("/api/v1/webhooks/shipment", post(shipment_webhook))
        .route("/api/v1/webhooks/payment", post(payment_webhook))
        .route("/api/v1/cart/:customer", get(get_cart).post(add_to_cart).delete(clear_cart))
        .route("/api/v1/cart/:customer/items/:product_id", put(update_cart_item).delete(remove_cart_item))
        .route("/api/v1/cart/:customer/checkout", post(checkout))
        .route("/api/v1/wishlist/:customer", get(get_wishlist).post(add_to_wishlist))
        .route("/api/v1/wishlist/:customer/:product_id", delete(remove_from_wishlist))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Engine(FulfillmentError),
}

impl From<FulfillmentError> for ApiError {
    fn from(e: FulfillmentError) -> Self { Self::Engine(e) }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let e = match self {
            Self::Unauthorized => return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized", "message": "invalid webhook token"}))).into_response(),
            Self::Engine(e) => e,
        };
        let (status, code) = match &e {
            FulfillmentError::ProductNotFound(_) | FulfillmentError::CouponNotFound(_) | FulfillmentError::OrderNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            FulfillmentError::InvalidState(_) => (StatusCode::CONFLICT, "invalid_state"),
            FulfillmentError::ReturnWindowExpired { .. } => (StatusCode::CONFLICT, "window_expired"),
            FulfillmentError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            FulfillmentError::ProductInactive(_) => (StatusCode::UNPROCESSABLE_ENTITY, "product_inactive"),
            FulfillmentError::InsufficientStock { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "insufficient_stock"),
            FulfillmentError::InvalidCoupon(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_coupon"),
            FulfillmentError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation"),
            FulfillmentError::ExternalProvider(_) => (StatusCode::BAD_GATEWAY, "provider_error"),
            FulfillmentError::StorageError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
        };
        if status.is_server_error() { error!(error = %e, "request failed"); }
        let mut body = json!({"error": code, "message": e.to_string()});
        match &e {
            FulfillmentError::InsufficientStock { product_id, available, .. } => {
                body["product_id"] = json!(product_id);
                body["available"] = json!(available);
            }
            FulfillmentError::InvalidCoupon(reason) => body["reason"] = json!(reason),
            _ => {}
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn authorize(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let Some(expected) = state.webhook_token.as_deref() else { return Ok(()) };
    match headers.get(WEBHOOK_TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
        Some(token) if token == expected => Ok(()),
        _ => {
            warn!("webhook rejected: missing or invalid token");
            Err(ApiError::Unauthorized)
        }
    }
}

async fn create_order(State(s): State<AppState>, Json(r): Json<CreateOrderInput>) -> ApiResult<(StatusCode, Json<Order>)> {
    Ok((StatusCode::CREATED, Json(s.engine.create_order(r).await?)))
}

async fn get_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Order>> {
    Ok(Json(s.engine.get_order(id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest { #[serde(default)] pub reason: String }

async fn cancel_order(State(s): State<AppState>, Path(id): Path<Uuid>, body: Option<Json<CancelRequest>>) -> ApiResult<Json<Order>> {
    let reason = body.map(|Json(r)| r.reason).unwrap_or_default();
    Ok(Json(s.engine.cancel_order(id, &reason).await?))
}

async fn refresh_tracking(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Order>> {
    Ok(Json(s.engine.refresh_tracking(id).await?))
}

async fn request_exchange(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<ExchangeInput>) -> ApiResult<(StatusCode, Json<ItemRequest>)> {
    Ok((StatusCode::CREATED, Json(s.engine.request_exchange(id, r).await?)))
}

async fn request_return(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<ReturnInput>) -> ApiResult<(StatusCode, Json<ItemRequest>)> {
    Ok((StatusCode::CREATED, Json(s.engine.request_return(id, r).await?)))
}

async fn create_coupon(State(s): State<AppState>, Json(r): Json<NewCoupon>) -> ApiResult<(StatusCode, Json<Coupon>)> {
    Ok((StatusCode::CREATED, Json(s.engine.create_coupon(r).await?)))
}

async fn validate_coupon(State(s): State<AppState>, Json(r): Json<CouponPreviewInput>) -> ApiResult<Json<CouponPreview>> {
    Ok(Json(s.engine.validate_coupon(r).await?))
}

fn webhook_ack(order: &Order) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "order_number": order.number_label(),
        "order_status": order.status(),
        "payment_status": order.payment_status(),
    }))
}

async fn shipment_webhook(State(s): State<AppState>, headers: HeaderMap, Json(r): Json<ShipmentWebhook>) -> ApiResult<Json<serde_json::Value>> {
    authorize(&s, &headers)?;
    Ok(webhook_ack(&s.engine.apply_shipment_event(r).await?))
}

async fn payment_webhook(State(s): State<AppState>, headers: HeaderMap, Json(r): Json<PaymentWebhook>) -> ApiResult<Json<serde_json::Value>> {
    authorize(&s, &headers)?;
    Ok(webhook_ack(&s.engine.apply_payment_event(r).await?))
}

async fn get_cart(State(s): State<AppState>, Path(customer): Path<String>) -> ApiResult<Json<Cart>> {
    Ok(Json(s.engine.get_cart(&customer).await?))
}

async fn add_to_cart(State(s): State<AppState>, Path(customer): Path<String>, Json(r): Json<AddToCartInput>) -> ApiResult<Json<Cart>> {
    Ok(Json(s.engine.add_to_cart(&customer, r).await?))
}

async fn clear_cart(State(s): State<AppState>, Path(customer): Path<String>) -> ApiResult<Json<Cart>> {
    Ok(Json(s.engine.clear_cart(&customer).await?))
}

async fn update_cart_item(State(s): State<AppState>, Path((customer, product_id)): Path<(String, Uuid)>, Json(r): Json<UpdateCartItemInput>) -> ApiResult<Json<Cart>> {
    Ok(Json(s.engine.update_cart_item(&customer, product_id, r).await?))
}

async fn remove_cart_item(State(s): State<AppState>, Path((customer, product_id)): Path<(String, Uuid)>, Query(key): Query<CartItemKey>) -> ApiResult<Json<Cart>> {
    Ok(Json(s.engine.remove_cart_item(&customer, product_id, key).await?))
}

async fn checkout(State(s): State<AppState>, Path(customer): Path<String>, Json(r): Json<CheckoutInput>) -> ApiResult<(StatusCode, Json<Order>)> {
    Ok((StatusCode::CREATED, Json(s.engine.checkout_cart(&customer, r).await?)))
}

#[derive(Debug, Deserialize)]
pub struct WishlistAdd { pub product_id: Uuid }

async fn get_wishlist(State(s): State<AppState>, Path(customer): Path<String>) -> ApiResult<Json<Wishlist>> {
    Ok(Json(s.engine.get_wishlist(&customer).await?))
}

async fn add_to_wishlist(State(s): State<AppState>, Path(customer): Path<String>, Json(r): Json<WishlistAdd>) -> ApiResult<Json<Wishlist>> {
    Ok(Json(s.engine.add_to_wishlist(&customer, r.product_id).await?))
}

async fn remove_from_wishlist(State(s): State<AppState>, Path((customer, product_id)): Path<(String, Uuid)>) -> ApiResult<Json<Wishlist>> {
    Ok(Json(s.engine.remove_from_wishlist(&customer, product_id).await?))
}
