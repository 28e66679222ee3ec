mod common;

use chrono::Duration;
use common::*;
use opensase_fulfillment::domain::aggregates::{OrderStatus, PaymentMethod, PaymentStatus, RequestKind};
use opensase_fulfillment::domain::webhooks::{PaymentWebhook, ShipmentWebhook};
use opensase_fulfillment::engine::{ExchangeInput, ReturnInput};
use opensase_fulfillment::providers::TrackingEvent;
use opensase_fulfillment::FulfillmentError;

fn shipment(reference: &str, status: &str) -> ShipmentWebhook {
    ShipmentWebhook { order_id: reference.into(), current_status: status.into(), ..Default::default() }
}

fn payment(reference: &str, status: &str, amount: Option<i64>) -> PaymentWebhook {
    PaymentWebhook { order_id: reference.into(), status: status.into(), total_amount_payable: amount.map(dec), ..Default::default() }
}

fn exchange(customer: &str, product_id: uuid::Uuid, color: &str, size: &str) -> ExchangeInput {
    ExchangeInput { customer_id: customer.into(), product_id, color: color.into(), size: size.into(), reason: "too small".into() }
}

#[tokio::test]
async fn test_delivered_twice_stamps_once() {
    let h = harness();
    let mug = h.seed_mug(5).await;
    let order = h.place("cust-1", vec![line(mug.id(), None, None, 1)]).await;

    h.clock.advance(Duration::days(2));
    let delivered = h.engine.apply_shipment_event(shipment("1001", "DELIVERED")).await.unwrap();
    assert_eq!(delivered.status(), OrderStatus::Delivered);
    assert_eq!(delivered.delivered_at(), Some(start() + Duration::days(2)));

    h.clock.advance(Duration::hours(1));
    let again = h.engine.apply_shipment_event(shipment(&order.number_label(), "DELIVERED")).await.unwrap();
    assert_eq!(again.delivered_at(), Some(start() + Duration::days(2)));
    assert_eq!(again.version(), delivered.version());
    assert_eq!(h.events.count("commerce.order.delivered"), 1);
}

#[tokio::test]
async fn test_unknown_status_recorded_verbatim() {
    let h = harness();
    let mug = h.seed_mug(5).await;
    h.place("cust-1", vec![line(mug.id(), None, None, 1)]).await;

    let order = h.engine.apply_shipment_event(shipment("ORD-00001001", "LOST_IN_SPACE")).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Pending);
    assert_eq!(order.provider_status(), Some("LOST_IN_SPACE"));
}

#[tokio::test]
async fn test_rto_cancels_and_restocks_once() {
    let h = harness();
    let mug = h.seed_mug(10).await;
    h.place("cust-1", vec![line(mug.id(), None, None, 2)]).await;
    assert_eq!(h.stock(mug.id(), None, None).await, 8);

    let first = h.engine.apply_shipment_event(shipment("1001", "RTO")).await.unwrap();
    let second = h.engine.apply_shipment_event(shipment("1001", "RTO")).await.unwrap();
    assert_eq!(first.status(), OrderStatus::Cancelled);
    assert_eq!(second.status(), OrderStatus::Cancelled);
    assert_eq!(h.stock(mug.id(), None, None).await, 10);
    assert_eq!(h.events.count("commerce.inventory.restocked"), 1);
    assert!(h.shipping.cancelled().is_empty());
}

#[tokio::test]
async fn test_provider_cancel_after_shipping_is_only_recorded() {
    let h = harness();
    let mug = h.seed_mug(10).await;
    h.place("cust-1", vec![line(mug.id(), None, None, 1)]).await;

    h.engine.apply_shipment_event(shipment("1001", "IN TRANSIT")).await.unwrap();
    let order = h.engine.apply_shipment_event(shipment("1001", "CANCELED")).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Shipped);
    assert_eq!(order.provider_status(), Some("CANCELED"));
    assert_eq!(h.stock(mug.id(), None, None).await, 9);
}

#[tokio::test]
async fn test_late_status_does_not_regress_order() {
    let h = harness();
    let mug = h.seed_mug(10).await;
    h.place("cust-1", vec![line(mug.id(), None, None, 1)]).await;

    h.engine.apply_shipment_event(shipment("1001", "DELIVERED")).await.unwrap();
    let order = h.engine.apply_shipment_event(shipment("1001", "OUT_FOR_DELIVERY")).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Delivered);
    assert_eq!(order.provider_status(), Some("OUT_FOR_DELIVERY"));
}

#[tokio::test]
async fn test_tracking_fields_merge_and_reference_resolution() {
    let h = harness();
    let mug = h.seed_mug(10).await;
    h.place("cust-1", vec![line(mug.id(), None, None, 1)]).await;

    let mut hook = shipment("S-1001", "PICKUP SCHEDULED");
    hook.awb = Some("AWB7781".into());
    hook.courier_name = Some("Delhivery".into());
    hook.expected_delivery_date = Some("2026-10-05".into());
    let order = h.engine.apply_shipment_event(hook).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Processing);
    assert_eq!(order.shipment().awb_code.as_deref(), Some("AWB7781"));
    assert_eq!(order.shipment().courier_name.as_deref(), Some("Delhivery"));
    assert_eq!(order.shipment().remote_order_id.as_deref(), Some("R-1001"));

    let order = h.engine.apply_shipment_event(shipment("R-1001", "SHIPPED")).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Shipped);
    assert_eq!(order.shipment().awb_code.as_deref(), Some("AWB7781"));

    let err = h.engine.apply_shipment_event(shipment("ORD-00009999", "SHIPPED")).await.unwrap_err();
    assert!(matches!(err, FulfillmentError::OrderNotFound(_)));
}

#[tokio::test]
async fn test_duplicate_event_id_is_dropped() {
    let h = harness();
    let mug = h.seed_mug(10).await;
    h.place("cust-1", vec![line(mug.id(), None, None, 1)]).await;

    let mut first = shipment("1001", "SHIPPED");
    first.event_id = Some("evt-1".into());
    let mut replay = shipment("1001", "DELIVERED");
    replay.event_id = Some("evt-1".into());

    h.engine.apply_shipment_event(first).await.unwrap();
    let order = h.engine.apply_shipment_event(replay).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Shipped);
    assert!(order.delivered_at().is_none());
}

#[tokio::test]
async fn test_payment_success_confirms_order() {
    let h = harness();
    let mug = h.seed_mug(10).await;
    let placed = h.place("cust-1", vec![line(mug.id(), None, None, 1)]).await;
    assert_eq!(placed.totals().total.amount(), dec(345));

    let mut hook = payment("ORD-00001001", "SUCCESS", Some(345));
    hook.payment_type = Some("upi".into());
    hook.upi_handle = Some("asha@okbank".into());
    let order = h.engine.apply_payment_event(hook).await.unwrap();
    assert_eq!(order.payment_status(), PaymentStatus::Paid);
    assert_eq!(order.status(), OrderStatus::Confirmed);
    assert_eq!(order.payment_method(), &PaymentMethod::Upi { handle: "asha@okbank".into() });
}

#[tokio::test]
async fn test_payment_amount_mismatch_not_marked_paid() {
    let h = harness();
    let mug = h.seed_mug(10).await;
    h.place("cust-1", vec![line(mug.id(), None, None, 1)]).await;

    let order = h.engine.apply_payment_event(payment("1001", "PAID", Some(300))).await.unwrap();
    assert_eq!(order.payment_status(), PaymentStatus::Pending);
    assert_eq!(order.status(), OrderStatus::Pending);
    assert_eq!(order.payment_provider_status(), Some("PAID"));
}

#[tokio::test]
async fn test_payment_failure_cancels_and_restocks() {
    let h = harness();
    let mug = h.seed_mug(10).await;
    h.place("cust-1", vec![line(mug.id(), None, None, 4)]).await;

    let order = h.engine.apply_payment_event(payment("1001", "FAILED", None)).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert_eq!(order.payment_status(), PaymentStatus::Failed);
    assert_eq!(h.stock(mug.id(), None, None).await, 10);
    assert_eq!(h.shipping.cancelled(), vec!["R-1001".to_string()]);
}

#[tokio::test]
async fn test_cancelling_paid_order_requests_refund() {
    let h = harness();
    let mug = h.seed_mug(10).await;
    let order = h.place("cust-1", vec![line(mug.id(), None, None, 1)]).await;
    h.engine.apply_payment_event(payment("1001", "CAPTURED", None)).await.unwrap();

    h.engine.cancel_order(order.id(), "duplicate purchase").await.unwrap();
    assert_eq!(h.events.count("commerce.order.refund_requested"), 1);
}

#[tokio::test]
async fn test_exchange_after_window_rejected() {
    let h = harness();
    let tee = h.seed_tee().await;
    let order = h.place("cust-1", vec![line(tee.id(), Some("Black"), Some("S"), 1)]).await;
    h.engine.apply_shipment_event(shipment("1001", "DELIVERED")).await.unwrap();

    h.clock.advance(Duration::days(8));
    let err = h.engine.request_exchange(order.id(), exchange("cust-1", tee.id(), "White", "M")).await.unwrap_err();
    assert!(matches!(err, FulfillmentError::ReturnWindowExpired { days: 7 }));
}

#[tokio::test]
async fn test_exchange_inside_window_accepted_once() {
    let h = harness();
    let tee = h.seed_tee().await;
    let order = h.place("cust-1", vec![line(tee.id(), Some("Black"), Some("S"), 1)]).await;
    h.engine.apply_shipment_event(shipment("1001", "DELIVERED")).await.unwrap();
    h.clock.advance(Duration::days(6));

    let request = h.engine.request_exchange(order.id(), exchange("cust-1", tee.id(), "White", "M")).await.unwrap();
    assert_eq!(request.kind, RequestKind::Exchange);
    let stored = h.engine.get_order(order.id()).await.unwrap();
    assert_eq!(stored.items()[0].exchange.as_ref().map(|r| r.id), Some(request.id));

    let err = h.engine.request_exchange(order.id(), exchange("cust-1", tee.id(), "White", "M")).await.unwrap_err();
    assert!(matches!(err, FulfillmentError::InvalidState(_)));

    let ret = ReturnInput { customer_id: "cust-1".into(), product_id: tee.id(), reason: "fabric".into() };
    assert_eq!(h.engine.request_return(order.id(), ret).await.unwrap().kind, RequestKind::Return);
    assert_eq!(h.events.count("commerce.order.item_request_opened"), 2);
}

#[tokio::test]
async fn test_exchange_guards() {
    let h = harness();
    let tee = h.seed_tee().await;
    let order = h.place("cust-1", vec![line(tee.id(), Some("Black"), Some("S"), 1)]).await;

    let ret = ReturnInput { customer_id: "cust-1".into(), product_id: tee.id(), reason: "fabric".into() };
    let err = h.engine.request_return(order.id(), ret).await.unwrap_err();
    assert!(matches!(err, FulfillmentError::InvalidState(_)));

    h.engine.apply_shipment_event(shipment("1001", "DELIVERED")).await.unwrap();
    let err = h.engine.request_exchange(order.id(), exchange("someone-else", tee.id(), "White", "M")).await.unwrap_err();
    assert!(matches!(err, FulfillmentError::OrderNotFound(_)));

    h.place("cust-2", vec![line(tee.id(), Some("White"), Some("M"), 1)]).await;
    let err = h.engine.request_exchange(order.id(), exchange("cust-1", tee.id(), "White", "M")).await.unwrap_err();
    assert!(matches!(err, FulfillmentError::InsufficientStock { available: 0, .. }));
}

#[tokio::test]
async fn test_refresh_tracking_applies_latest_event() {
    let h = harness();
    let mug = h.seed_mug(10).await;
    let order = h.place("cust-1", vec![line(mug.id(), None, None, 1)]).await;
    *h.shipping.tracking.lock().unwrap() = vec![
        TrackingEvent { status: "IN TRANSIT".into(), location: Some("Pune".into()), at: Some(start() + Duration::hours(5)) },
        TrackingEvent { status: "DELIVERED".into(), location: Some("Bengaluru".into()), at: Some(start() + Duration::days(1)) },
        TrackingEvent { status: "PICKED UP".into(), location: None, at: Some(start() + Duration::hours(1)) },
    ];

    let refreshed = h.engine.refresh_tracking(order.id()).await.unwrap();
    assert_eq!(refreshed.status(), OrderStatus::Delivered);

    h.shipping.fail_calls(true);
    let err = h.engine.refresh_tracking(order.id()).await.unwrap_err();
    assert!(matches!(err, FulfillmentError::ExternalProvider(_)));
}

#[tokio::test]
async fn test_failed_write_leaves_event_open_for_retry() {
    let h = harness();
    let mug = h.seed_mug(10).await;
    h.place("cust-1", vec![line(mug.id(), None, None, 1)]).await;
    let mut hook = shipment("1001", "DELIVERED");
    hook.event_id = Some("evt-9".into());

    h.faults.fail_next_order_write();
    let err = h.engine.apply_shipment_event(hook.clone()).await.unwrap_err();
    assert!(matches!(err, FulfillmentError::StorageError(_)));
    assert_eq!(h.engine.find_order_by_reference("1001").await.unwrap().status(), OrderStatus::Pending);

    let retried = h.engine.apply_shipment_event(hook.clone()).await.unwrap();
    assert_eq!(retried.status(), OrderStatus::Delivered);
    assert_eq!(retried.delivered_at(), Some(start()));

    let replay = h.engine.apply_shipment_event(hook).await.unwrap();
    assert_eq!(replay.version(), retried.version());
    assert_eq!(h.events.count("commerce.order.delivered"), 1);
}

#[tokio::test]
async fn test_failed_cancel_from_webhook_is_retried() {
    let h = harness();
    let mug = h.seed_mug(10).await;
    h.place("cust-1", vec![line(mug.id(), None, None, 3)]).await;
    let mut hook = payment("1001", "FAILED", None);
    hook.event_id = Some("pay-1".into());

    h.faults.fail_next_order_write();
    assert!(h.engine.apply_payment_event(hook.clone()).await.is_err());
    assert_eq!(h.stock(mug.id(), None, None).await, 7);

    let order = h.engine.apply_payment_event(hook.clone()).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert_eq!(h.stock(mug.id(), None, None).await, 10);

    h.engine.apply_payment_event(hook).await.unwrap();
    assert_eq!(h.stock(mug.id(), None, None).await, 10);
    assert_eq!(h.events.count("commerce.order.cancelled"), 1);
}

#[tokio::test]
async fn test_payment_after_cancel_requests_refund() {
    let h = harness();
    let mug = h.seed_mug(10).await;
    let order = h.place("cust-1", vec![line(mug.id(), None, None, 1)]).await;
    h.engine.cancel_order(order.id(), "changed my mind").await.unwrap();
    assert_eq!(h.events.count("commerce.order.refund_requested"), 0);

    let paid = h.engine.apply_payment_event(payment("1001", "SUCCESS", Some(345))).await.unwrap();
    assert_eq!(paid.status(), OrderStatus::Cancelled);
    assert_eq!(paid.payment_status(), PaymentStatus::Paid);
    assert_eq!(h.events.count("commerce.order.refund_requested"), 1);
}
