use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;
use crate::domain::aggregates::{Order, OrderStatus, PaymentMethod, PaymentStatus, Shipment};
use crate::domain::events::{DomainEvent, InventoryEvent};
use crate::domain::webhooks::{map_payment_status, map_shipment_status, PaymentWebhook, ProviderStatus, ShipmentWebhook};
use crate::engine::{FulfillmentEngine, MAX_ATTEMPTS};
use crate::providers::latest_event;
use crate::store::CancelOutcome;
use crate::domain::value_objects::round_currency;
use crate::{FulfillmentError, Result};

/// Who asked for a cancellation; decides duplicate handling and whether the
/// provider is told.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CancelSource {
    Customer,
    ShippingProvider,
    PaymentProvider,
}

impl FulfillmentEngine {
    /// Reconciles a shipment status push. Idempotent: repeating an event, or
    /// sending the status the order already has, changes nothing.
    pub async fn apply_shipment_event(&self, hook: ShipmentWebhook) -> Result<Order> {
        hook.validate()?;
        let order = self.find_order_by_reference(&hook.order_id).await?;
        let key = hook.dedupe_key();
        if let Some(key) = key.as_deref() {
            if self.store.webhook_seen(key).await? {
                debug!(event = %key, order_number = %order.number_label(), "duplicate shipment webhook ignored");
                return Ok(order);
            }
        }
        self.reconcile_shipment(order.id(), &hook.current_status, hook.shipment_patch(), key.as_deref()).await
    }

    /// Explicit cancellation; rejected once the parcel has left the warehouse.
    pub async fn cancel_order(&self, order_id: Uuid, reason: &str) -> Result<Order> {
        let reason = reason.trim();
        let reason = if reason.is_empty() { "Cancelled by customer" } else { reason };
        self.cancel_and_restock(order_id, reason, CancelSource::Customer, None).await
    }

    /// Reconciles a payment status push from the checkout provider.
    pub async fn apply_payment_event(&self, hook: PaymentWebhook) -> Result<Order> {
        hook.validate()?;
        let order = self.find_order_by_reference(&hook.order_id).await?;
        let key = hook.dedupe_key();
        if let Some(key) = key.as_deref() {
            if self.store.webhook_seen(key).await? {
                debug!(event = %key, order_number = %order.number_label(), "duplicate payment webhook ignored");
                return Ok(order);
            }
        }
        let id = order.id();
        let mut attempt = 1;
        loop {
            let order = self.get_order(id).await?;
            match self.reconcile_payment(order, &hook, key.as_deref()).await {
                Err(FulfillmentError::Conflict(msg)) if attempt < MAX_ATTEMPTS => {
                    debug!(order_id = %id, attempt, %msg, "payment reconciliation lost a race, retrying");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Pulls tracking from the shipping provider and applies the newest event.
    pub async fn refresh_tracking(&self, order_id: Uuid) -> Result<Order> {
        let order = self.get_order(order_id).await?;
        let shipment = order.shipment();
        let Some(tracking_id) = shipment.shipment_id.clone().or_else(|| shipment.awb_code.clone()) else {
            return Err(FulfillmentError::InvalidState(format!("order {} has no shipment yet", order.number_label())));
        };
        let events = self.shipping.track_shipment(&tracking_id).await?;
        match latest_event(&events) {
            Some(latest) => self.reconcile_shipment(order_id, &latest.status, Shipment::default(), None).await,
            None => Ok(order),
        }
    }

    async fn reconcile_shipment(&self, order_id: Uuid, raw_status: &str, patch: Shipment, key: Option<&str>) -> Result<Order> {
        let mut attempt = 1;
        loop {
            let order = self.get_order(order_id).await?;
            match self.apply_shipment_status(order, raw_status, patch.clone(), key).await {
                Err(FulfillmentError::Conflict(msg)) if attempt < MAX_ATTEMPTS => {
                    debug!(%order_id, attempt, %msg, "shipment reconciliation lost a race, retrying");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn apply_shipment_status(&self, mut order: Order, raw_status: &str, patch: Shipment, key: Option<&str>) -> Result<Order> {
        let now = self.clock.now();
        let mut changed = order.merge_shipment(patch, now);
        changed |= order.record_provider_status(raw_status.trim(), now);

        match map_shipment_status(raw_status) {
            ProviderStatus::Unknown(raw) => {
                warn!(order_number = %order.number_label(), status = %raw, "unmapped shipment status recorded verbatim");
            }
            ProviderStatus::Known(OrderStatus::Cancelled) => match order.status() {
                OrderStatus::Cancelled => debug!(order_number = %order.number_label(), "order already cancelled"),
                status if status.can_cancel() => {
                    self.persist(&mut order, changed).await?;
                    let reason = format!("Cancelled by shipping provider ({})", raw_status.trim());
                    return self.cancel_and_restock(order.id(), &reason, CancelSource::ShippingProvider, key).await;
                }
                status => warn!(
                    order_number = %order.number_label(), %status, provider_status = raw_status,
                    "provider cancelled an order already in transit, recorded without cancelling"
                ),
            },
            ProviderStatus::Known(target) => match order.transition_to(target, now) {
                Ok(true) => {
                    info!(order_number = %order.number_label(), status = %target, "order status updated from shipment webhook");
                    changed = true;
                }
                Ok(false) => debug!(order_number = %order.number_label(), status = %target, "order already in target status"),
                Err(e) => debug!(order_number = %order.number_label(), error = %e, "shipment status does not advance the order"),
            },
        }

        self.persist_webhook(order, changed, key).await
    }

    async fn reconcile_payment(&self, mut order: Order, hook: &PaymentWebhook, key: Option<&str>) -> Result<Order> {
        let now = self.clock.now();
        let mut changed = order.record_payment_provider_status(hook.status.trim(), now);
        if let Some(method) = hook.payment_type.as_deref().and_then(|t| PaymentMethod::from_provider(t, hook.card_last4.as_deref(), hook.upi_handle.as_deref())) {
            if order.payment_method() != &method {
                order.set_payment_method(method);
                changed = true;
            }
        }

        match map_payment_status(&hook.status) {
            ProviderStatus::Known(PaymentStatus::Paid) => {
                let expected = order.totals().total.amount();
                if let Some(paid) = hook.total_amount_payable.map(round_currency).filter(|paid| *paid != expected) {
                    warn!(order_number = %order.number_label(), %paid, %expected, "payable amount does not match order total, not marking paid");
                } else {
                    changed |= order.set_payment_status(PaymentStatus::Paid, now);
                    if order.status() == OrderStatus::Pending {
                        changed |= order.transition_to(OrderStatus::Confirmed, now)?;
                    }
                }
            }
            ProviderStatus::Known(PaymentStatus::Failed) => {
                changed |= order.set_payment_status(PaymentStatus::Failed, now);
                if order.status().can_cancel() {
                    self.persist(&mut order, changed).await?;
                    return self.cancel_and_restock(order.id(), "Payment failed", CancelSource::PaymentProvider, key).await;
                }
            }
            ProviderStatus::Known(PaymentStatus::Refunded) => {
                changed |= order.set_payment_status(PaymentStatus::Refunded, now);
            }
            ProviderStatus::Known(PaymentStatus::Pending) => {
                debug!(order_number = %order.number_label(), "payment still pending");
            }
            ProviderStatus::Unknown(raw) => {
                warn!(order_number = %order.number_label(), status = %raw, "unmapped payment status recorded verbatim");
            }
        }

        self.persist_webhook(order, changed, key).await
    }

    /// Writes the order back if anything changed and publishes its events.
    pub(crate) async fn persist(&self, order: &mut Order, changed: bool) -> Result<()> {
        if !changed { return Ok(()); }
        order.version = self.store.update_order(order).await?;
        let events = order.take_events();
        self.publish(events).await;
        Ok(())
    }

    /// Persists a webhook's changes and claims its event id in the same write,
    /// so a failed write leaves the event open for the provider's retry.
    async fn persist_webhook(&self, mut order: Order, changed: bool, key: Option<&str>) -> Result<Order> {
        let Some(key) = key else {
            self.persist(&mut order, changed).await?;
            return Ok(order);
        };
        if !changed {
            self.store.record_webhook(key).await?;
            return Ok(order);
        }
        match self.store.update_order_for_webhook(&order, key).await? {
            Some(version) => {
                order.version = version;
                let events = order.take_events();
                self.publish(events).await;
                Ok(order)
            }
            None => {
                debug!(event = %key, order_number = %order.number_label(), "webhook applied concurrently, dropping this delivery");
                self.get_order(order.id()).await
            }
        }
    }

    async fn cancel_and_restock(&self, order_id: Uuid, reason: &str, source: CancelSource, key: Option<&str>) -> Result<Order> {
        let now: DateTime<Utc> = self.clock.now();
        let (mut order, restocked) = match self.store.cancel_order(order_id, reason, now, key).await? {
            CancelOutcome::Cancelled { order, restocked } => (order, restocked),
            CancelOutcome::Duplicate(order) => {
                debug!(order_number = %order.number_label(), "cancelling webhook already applied");
                return Ok(order);
            }
            CancelOutcome::AlreadyCancelled(order) if source != CancelSource::Customer => {
                debug!(order_number = %order.number_label(), "order already cancelled");
                return Ok(order);
            }
            CancelOutcome::AlreadyCancelled(order) => {
                return Err(FulfillmentError::InvalidState(format!("order {} is already cancelled", order.number_label())));
            }
        };
        info!(order_id = %order.id(), order_number = %order.number_label(), reason, ?source, "order cancelled");

        let mut events = order.take_events();
        for restock in restocked {
            match restock.target {
                Some(target) => events.push(DomainEvent::Inventory(InventoryEvent::Restocked {
                    product_id: restock.product_id, variant: restock.variant, quantity: restock.quantity, target,
                })),
                None => warn!(
                    order_number = %order.number_label(), product_id = %restock.product_id, quantity = restock.quantity,
                    "product no longer exists, stock not restored"
                ),
            }
        }
        self.publish(events).await;

        if source != CancelSource::ShippingProvider {
            if let Some(remote_order_id) = order.shipment().remote_order_id.as_deref() {
                if let Err(e) = self.shipping.cancel_remote_order(remote_order_id).await {
                    warn!(order_number = %order.number_label(), remote_order_id, error = %e, "could not cancel remote order");
                }
            }
        }
        Ok(order)
    }
}
