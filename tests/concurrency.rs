mod common;

use std::collections::HashSet;
use common::*;
use opensase_fulfillment::domain::aggregates::{CouponRejection, VariantKey};
use opensase_fulfillment::store::CatalogStore;
use opensase_fulfillment::FulfillmentError;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_last_unit_sold_once() {
    let h = harness();
    let mug = h.seed_mug(1).await;

    let handles: Vec<_> = ["a", "b"].into_iter().map(|customer| {
        let engine = h.engine.clone();
        let input = order_input(customer, vec![line(mug.id(), None, None, 1)]);
        tokio::spawn(async move { engine.create_order(input).await })
    }).collect();

    let mut placed = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => placed += 1,
            Err(FulfillmentError::InsufficientStock { available: 0, .. }) => rejected += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!((placed, rejected), (1, 1));
    assert_eq!(h.stock(mug.id(), None, None).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_use_coupon_under_contention() {
    let h = harness();
    let mug = h.seed_mug(50).await;
    h.engine.create_coupon(percent_coupon("LAUNCH", 15, 0, None, Some(1))).await.unwrap();

    let handles: Vec<_> = (0..5).map(|i| {
        let engine = h.engine.clone();
        let mut input = order_input(&format!("cust-{i}"), vec![line(mug.id(), None, None, 1)]);
        input.coupon_code = Some("LAUNCH".into());
        tokio::spawn(async move { engine.create_order(input).await })
    }).collect();

    let mut placed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => placed += 1,
            Err(FulfillmentError::InvalidCoupon(CouponRejection::UsageLimitReached)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(placed, 1);
    assert_eq!(h.engine.get_coupon("LAUNCH").await.unwrap().usage_count(), 1);
    assert_eq!(h.stock(mug.id(), None, None).await, 49);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_order_numbers_unique_under_load() {
    let h = harness();
    let mug = h.seed_mug(100).await;

    let handles: Vec<_> = (0..20).map(|i| {
        let engine = h.engine.clone();
        let input = order_input(&format!("cust-{i}"), vec![line(mug.id(), None, None, 1)]);
        tokio::spawn(async move { engine.create_order(input).await })
    }).collect();

    let mut numbers = HashSet::new();
    for handle in handles {
        numbers.insert(handle.await.unwrap().unwrap().order_number());
    }
    assert_eq!(numbers.len(), 20);
    assert_eq!(numbers.iter().min(), Some(&1001));
    assert_eq!(numbers.iter().max(), Some(&1020));
    assert_eq!(h.stock(mug.id(), None, None).await, 80);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_decrements_never_oversell() {
    let h = harness();
    let tee = h.seed_tee().await;

    let handles: Vec<_> = (0..8).map(|_| {
        let store = h.store.clone();
        let product_id = tee.id();
        tokio::spawn(async move {
            store.decrement_variant_stock(product_id, &VariantKey::new(Some("Black".into()), Some("S".into())), 1).await
        })
    }).collect();

    let mut granted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => granted += 1,
            Err(FulfillmentError::InsufficientStock { available: 0, .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(granted, 5);
    assert_eq!(h.stock(tee.id(), Some("Black"), Some("S")).await, 0);
}
