//! Order saga coordinator.
//!
//! Drives the forward path (validate, persist, reserve, schedule rollback)
//! and reconciles asynchronous payment outcomes against the stored order,
//! serializing per-order mutations through the distributed lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{IdGenerator, OrderId};
use coordination::{
    DelayedMessageBus, DistributedLock, ReconciliationCache, ReconciliationRecord,
};
use domain::{Order, OrderDraft, OrderLineItem, PaymentOutcome, SkuQuantity, StockReservation};
use metrics::counter;
use order_store::OrderStore;
use tracing::{error, info, warn};

use crate::config::SagaConfig;
use crate::error::SagaError;
use crate::inventory::InventoryClient;
use crate::recon::load_record;
use crate::topics::ORDER_ROLLBACK_TOPIC;

/// Coordinates order placement and payment reconciliation.
pub struct OrderSaga<S, I, C, L, B> {
    store: Arc<S>,
    inventory: Arc<I>,
    cache: Arc<C>,
    lock: Arc<L>,
    bus: Arc<B>,
    ids: Arc<IdGenerator>,
    config: SagaConfig,
}

impl<S, I, C, L, B> Clone for OrderSaga<S, I, C, L, B> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            inventory: Arc::clone(&self.inventory),
            cache: Arc::clone(&self.cache),
            lock: Arc::clone(&self.lock),
            bus: Arc::clone(&self.bus),
            ids: Arc::clone(&self.ids),
            config: self.config,
        }
    }
}

impl<S, I, C, L, B> OrderSaga<S, I, C, L, B>
where
    S: OrderStore,
    I: InventoryClient,
    C: ReconciliationCache,
    L: DistributedLock,
    B: DelayedMessageBus,
{
    pub fn new(
        store: Arc<S>,
        inventory: Arc<I>,
        cache: Arc<C>,
        lock: Arc<L>,
        bus: Arc<B>,
        ids: Arc<IdGenerator>,
        config: SagaConfig,
    ) -> Self {
        Self {
            store,
            inventory,
            cache,
            lock,
            bus,
            ids,
            config,
        }
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    /// Places an order: validates the draft, persists the order, reserves
    /// stock and schedules the delayed rollback message.
    ///
    /// The rollback message is the safety net for a payment outcome that
    /// never arrives, so a failure to schedule it unwinds the whole
    /// placement rather than leaving stock held forever.
    #[tracing::instrument(skip(self, draft), fields(user_id = draft.user_id))]
    pub async fn create_order(&self, draft: OrderDraft) -> Result<Order, SagaError> {
        let order_id = self.ids.next();
        let now = Utc::now();
        let (order, items) = Order::place(order_id, &draft, now)?;

        let quantities: Vec<SkuQuantity> = items.iter().map(OrderLineItem::sku_quantity).collect();
        // Encode the rollback payload up front so a codec failure aborts
        // before any side effect.
        let payload = serde_json::to_vec(&StockReservation::new(order_id, quantities.clone()))?;

        self.store.create(&order, &items).await?;
        self.inventory.reserve(order_id, &quantities).await?;

        let record = ReconciliationRecord::pending(self.config.payment_deadline(now));
        if let Err(err) = self.cache.set(order_id, record).await {
            // The store rebuilds the record on a miss; placement proceeds.
            warn!(%order_id, error = %err, "failed to prime reconciliation cache");
        }

        if let Err(publish_err) = self
            .bus
            .publish(ORDER_ROLLBACK_TOPIC, payload, self.config.rollback_delay())
            .await
        {
            error!(%order_id, error = %publish_err, "rollback scheduling failed, compensating");
            counter!("saga_rollback_schedule_failures_total").increment(1);
            self.compensate_placement(order_id, &quantities, record).await;
            return Err(publish_err.into());
        }

        counter!("saga_orders_created_total").increment(1);
        info!(%order_id, payment_amount = %order.payment_amount, "order placed");
        Ok(order)
    }

    /// Unwinds a placement whose rollback message could not be scheduled:
    /// releases the reservation and cancels the order, best effort.
    async fn compensate_placement(
        &self,
        order_id: OrderId,
        quantities: &[SkuQuantity],
        record: ReconciliationRecord,
    ) {
        if let Err(err) = self.inventory.release(order_id, quantities).await {
            // Stock stays held until an operator intervenes; loud on purpose.
            error!(%order_id, error = %err, "compensating release failed, stock may be stranded");
        }
        if let Err(err) = self
            .store
            .update_status(
                order_id,
                domain::OrderStatus::Cancelled,
                domain::PaymentStatus::Cancelled,
            )
            .await
        {
            error!(%order_id, error = %err, "compensating cancel failed");
        }
        if let Err(err) = self
            .cache
            .set(order_id, record.with_status(domain::PaymentStatus::Cancelled))
            .await
        {
            warn!(%order_id, error = %err, "compensating cache update failed");
        }
    }

    /// Applies an asynchronous payment outcome from the payment provider.
    ///
    /// `paid_at` is the provider's payment timestamp, preserved as reported
    /// even when the callback arrives late or is redelivered.
    #[tracing::instrument(skip(self, paid_at))]
    pub async fn on_payment_result(
        &self,
        order_id: OrderId,
        outcome: PaymentOutcome,
        paid_at: DateTime<Utc>,
        method: &str,
    ) -> Result<(), SagaError> {
        self.reconcile(order_id, outcome, paid_at, method).await
    }

    /// Cancels an order on the buyer's behalf. Same reconciliation path as a
    /// provider-reported cancellation.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: OrderId) -> Result<(), SagaError> {
        self.reconcile(order_id, PaymentOutcome::Cancel, Utc::now(), "")
            .await
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, SagaError> {
        Ok(self.store.get(order_id).await?)
    }

    pub async fn order_lines(&self, order_id: OrderId) -> Result<Vec<OrderLineItem>, SagaError> {
        Ok(self.store.line_items(order_id).await?)
    }

    async fn reconcile(
        &self,
        order_id: OrderId,
        outcome: PaymentOutcome,
        paid_at: DateTime<Utc>,
        method: &str,
    ) -> Result<(), SagaError> {
        self.lock.lock(order_id).await?;
        let result = self
            .reconcile_locked(order_id, outcome, paid_at, method)
            .await;
        if let Err(err) = self.lock.unlock(order_id).await {
            warn!(%order_id, error = %err, "failed to release reconciliation lock");
        }
        result
    }

    async fn reconcile_locked(
        &self,
        order_id: OrderId,
        outcome: PaymentOutcome,
        paid_at: DateTime<Utc>,
        method: &str,
    ) -> Result<(), SagaError> {
        let record =
            load_record(self.store.as_ref(), self.cache.as_ref(), &self.config, order_id).await?;
        let target = outcome.target_payment_status();

        if record.payment_status == target {
            counter!("saga_reconcile_duplicates_total").increment(1);
            info!(%order_id, %target, "payment outcome already applied");
            return Ok(());
        }
        if !record.payment_status.is_pending() {
            return Err(SagaError::IllegalTransition {
                order_id,
                current: record.payment_status,
                requested: target,
            });
        }

        let quantities: Vec<SkuQuantity> = self
            .store
            .line_items(order_id)
            .await?
            .iter()
            .map(OrderLineItem::sku_quantity)
            .collect();

        match outcome {
            PaymentOutcome::Success => {
                self.store.record_payment(order_id, paid_at, method).await?;
                if let Err(err) = self.cache.set(order_id, record.with_status(target)).await {
                    warn!(%order_id, error = %err, "failed to update reconciliation cache");
                }
                // The order is paid either way; a confirm failure is surfaced
                // but must not unwind the payment.
                if let Err(err) = self.inventory.confirm(order_id, &quantities).await {
                    error!(%order_id, error = %err, "stock confirmation failed for paid order");
                    return Err(SagaError::ConfirmFailed {
                        order_id,
                        source: err,
                    });
                }
                counter!("saga_payments_confirmed_total").increment(1);
                info!(%order_id, "payment reconciled, stock confirmed");
            }
            PaymentOutcome::Cancel => {
                // Release before writing Cancelled: a failed release must
                // leave the record Pending so a retry, or the scheduled
                // rollback message, can still free the stock.
                if let Err(err) = self.inventory.release(order_id, &quantities).await {
                    error!(%order_id, error = %err, "stock release failed for cancelled order");
                    return Err(SagaError::ReleaseFailed {
                        order_id,
                        source: err,
                    });
                }
                self.store
                    .update_status(order_id, outcome.target_order_status(), target)
                    .await?;
                if let Err(err) = self.cache.set(order_id, record.with_status(target)).await {
                    warn!(%order_id, error = %err, "failed to update reconciliation cache");
                }
                counter!("saga_orders_cancelled_total").increment(1);
                info!(%order_id, "cancellation reconciled, stock released");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordination::{
        InMemoryDelayedBus, InMemoryDistributedLock, InMemoryReconciliationCache, LockConfig,
    };
    use domain::{LineItemDraft, Money, OrderStatus, PaymentStatus, SkuId};
    use order_store::InMemoryOrderStore;

    use crate::inventory::InMemoryInventoryClient;

    type TestSaga = OrderSaga<
        InMemoryOrderStore,
        InMemoryInventoryClient,
        InMemoryReconciliationCache,
        InMemoryDistributedLock,
        InMemoryDelayedBus,
    >;

    struct Harness {
        saga: TestSaga,
        store: Arc<InMemoryOrderStore>,
        inventory: Arc<InMemoryInventoryClient>,
        cache: Arc<InMemoryReconciliationCache>,
        bus: Arc<InMemoryDelayedBus>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryOrderStore::new());
        let inventory = Arc::new(InMemoryInventoryClient::new());
        let cache = Arc::new(InMemoryReconciliationCache::new());
        let lock = Arc::new(InMemoryDistributedLock::new(LockConfig::default()));
        let bus = Arc::new(InMemoryDelayedBus::default());
        let saga = OrderSaga::new(
            Arc::clone(&store),
            Arc::clone(&inventory),
            Arc::clone(&cache),
            lock,
            Arc::clone(&bus),
            Arc::new(IdGenerator::new(1)),
            SagaConfig::default(),
        );
        Harness {
            saga,
            store,
            inventory,
            cache,
            bus,
        }
    }

    fn draft() -> OrderDraft {
        OrderDraft {
            user_id: 42,
            address_id: 7,
            address_snapshot: "1 Main St".to_string(),
            items: vec![LineItemDraft {
                merchant_id: 1,
                goods_id: 10,
                sku_id: SkuId::from_raw(101),
                goods_version: 1,
                quantity: 2,
                original_price: Money::from_cents(1_500),
                sale_price: Money::from_cents(1_200),
                freight: Money::from_cents(300),
                discount: Money::from_cents(100),
                coupon_id: None,
            }],
        }
    }

    #[tokio::test]
    async fn create_order_reserves_and_schedules_rollback() {
        let h = harness();
        h.inventory.set_stock(SkuId::from_raw(101), 5);

        let order = h.saga.create_order(draft()).await.unwrap();

        assert_eq!(order.status, OrderStatus::Unpaid);
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(h.inventory.available(SkuId::from_raw(101)), Some(3));
        assert_eq!(h.bus.published_count(), 1);
        let record = h.cache.get(order.id).await.unwrap().unwrap();
        assert_eq!(record.payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn invalid_draft_has_no_side_effects() {
        let h = harness();
        let mut bad = draft();
        bad.items.clear();

        let err = h.saga.create_order(bad).await.unwrap_err();

        assert!(matches!(err, SagaError::Order(_)));
        assert_eq!(h.store.order_count().await, 0);
        assert_eq!(h.inventory.reserve_calls(), 0);
        assert_eq!(h.bus.published_count(), 0);
    }

    #[tokio::test]
    async fn reserve_failure_aborts_without_rollback_message() {
        let h = harness();
        h.inventory.set_stock(SkuId::from_raw(101), 1);

        let err = h.saga.create_order(draft()).await.unwrap_err();

        assert!(matches!(err, SagaError::Inventory(_)));
        assert_eq!(h.bus.published_count(), 0);
    }

    #[tokio::test]
    async fn publish_failure_releases_and_cancels() {
        let h = harness();
        h.inventory.set_stock(SkuId::from_raw(101), 5);
        h.bus.set_fail_on_publish(true);

        let err = h.saga.create_order(draft()).await.unwrap_err();
        assert!(matches!(err, SagaError::Bus(_)));

        // Reservation was compensated and the order cancelled.
        assert_eq!(h.inventory.available(SkuId::from_raw(101)), Some(5));
        assert_eq!(h.inventory.reservation_count(), 0);
        let orders = h.store.order_count().await;
        assert_eq!(orders, 1);
    }

    #[tokio::test]
    async fn payment_success_confirms_stock() {
        let h = harness();
        h.inventory.set_stock(SkuId::from_raw(101), 5);
        let order = h.saga.create_order(draft()).await.unwrap();

        h.saga
            .on_payment_result(order.id, PaymentOutcome::Success, Utc::now(), "card")
            .await
            .unwrap();

        let stored = h.store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
        assert_eq!(stored.payment_status, PaymentStatus::Succeeded);
        assert_eq!(stored.pay_method.as_deref(), Some("card"));
        assert!(stored.pay_time.is_some());
        assert!(h.inventory.confirmed_items(order.id).is_some());
        // Confirmed stock is not returned to the pool.
        assert_eq!(h.inventory.available(SkuId::from_raw(101)), Some(3));
    }

    #[tokio::test]
    async fn duplicate_payment_outcome_is_a_no_op() {
        let h = harness();
        h.inventory.set_stock(SkuId::from_raw(101), 5);
        let order = h.saga.create_order(draft()).await.unwrap();

        h.saga
            .on_payment_result(order.id, PaymentOutcome::Success, Utc::now(), "card")
            .await
            .unwrap();
        h.saga
            .on_payment_result(order.id, PaymentOutcome::Success, Utc::now(), "card")
            .await
            .unwrap();

        assert_eq!(h.inventory.confirm_calls(), 1);
    }

    #[tokio::test]
    async fn conflicting_outcome_is_an_illegal_transition() {
        let h = harness();
        h.inventory.set_stock(SkuId::from_raw(101), 5);
        let order = h.saga.create_order(draft()).await.unwrap();

        h.saga
            .on_payment_result(order.id, PaymentOutcome::Success, Utc::now(), "card")
            .await
            .unwrap();
        let err = h.saga.cancel_order(order.id).await.unwrap_err();

        assert!(matches!(
            err,
            SagaError::IllegalTransition {
                current: PaymentStatus::Succeeded,
                requested: PaymentStatus::Cancelled,
                ..
            }
        ));
        // The paid order is untouched.
        let stored = h.store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn cancellation_releases_stock() {
        let h = harness();
        h.inventory.set_stock(SkuId::from_raw(101), 5);
        let order = h.saga.create_order(draft()).await.unwrap();

        h.saga.cancel_order(order.id).await.unwrap();

        let stored = h.store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Cancelled);
        assert_eq!(stored.payment_status, PaymentStatus::Cancelled);
        assert_eq!(h.inventory.available(SkuId::from_raw(101)), Some(5));
    }

    #[tokio::test]
    async fn repeated_cancellation_is_idempotent() {
        let h = harness();
        h.inventory.set_stock(SkuId::from_raw(101), 5);
        let order = h.saga.create_order(draft()).await.unwrap();

        h.saga.cancel_order(order.id).await.unwrap();
        h.saga.cancel_order(order.id).await.unwrap();

        assert_eq!(h.inventory.available(SkuId::from_raw(101)), Some(5));
        // One real release; the second attempt short-circuits on the record.
        assert_eq!(h.inventory.release_calls(), 1);
    }

    #[tokio::test]
    async fn cache_wipe_falls_back_to_store() {
        let h = harness();
        h.inventory.set_stock(SkuId::from_raw(101), 5);
        let order = h.saga.create_order(draft()).await.unwrap();

        h.saga
            .on_payment_result(order.id, PaymentOutcome::Success, Utc::now(), "card")
            .await
            .unwrap();
        h.cache.clear();

        // The duplicate is still detected via the store fallback.
        h.saga
            .on_payment_result(order.id, PaymentOutcome::Success, Utc::now(), "card")
            .await
            .unwrap();
        assert_eq!(h.inventory.confirm_calls(), 1);
    }

    #[tokio::test]
    async fn unknown_order_is_reported() {
        let h = harness();
        let err = h
            .saga
            .on_payment_result(
                OrderId::from_raw(404),
                PaymentOutcome::Success,
                Utc::now(),
                "card",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::OrderNotFound(_)));
    }

    #[tokio::test]
    async fn provider_payment_timestamp_is_stored_verbatim() {
        let h = harness();
        h.inventory.set_stock(SkuId::from_raw(101), 5);
        let order = h.saga.create_order(draft()).await.unwrap();

        // A late callback still carries the moment the provider captured
        // the funds, not the moment we processed it.
        let paid_at = Utc::now() - chrono::TimeDelta::minutes(3);
        h.saga
            .on_payment_result(order.id, PaymentOutcome::Success, paid_at, "card")
            .await
            .unwrap();

        let stored = h.store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.pay_time, Some(paid_at));
    }

    #[tokio::test]
    async fn failed_release_keeps_cancellation_retryable() {
        let h = harness();
        h.inventory.set_stock(SkuId::from_raw(101), 5);
        let order = h.saga.create_order(draft()).await.unwrap();
        h.inventory.set_fail_on_release(true);

        let err = h.saga.cancel_order(order.id).await.unwrap_err();
        assert!(matches!(err, SagaError::ReleaseFailed { .. }));

        // Neither the store nor the record moved, so the stock is not
        // stranded behind a Cancelled state.
        let stored = h.store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Unpaid);
        assert_eq!(stored.payment_status, PaymentStatus::Pending);
        let record = h.cache.get(order.id).await.unwrap().unwrap();
        assert_eq!(record.payment_status, PaymentStatus::Pending);

        h.inventory.set_fail_on_release(false);
        h.saga.cancel_order(order.id).await.unwrap();
        assert_eq!(h.inventory.available(SkuId::from_raw(101)), Some(5));
        assert_eq!(h.inventory.release_calls(), 2);
    }

    #[tokio::test]
    async fn confirm_failure_leaves_order_paid() {
        let h = harness();
        h.inventory.set_stock(SkuId::from_raw(101), 5);
        let order = h.saga.create_order(draft()).await.unwrap();
        h.inventory.set_fail_on_confirm(true);

        let err = h
            .saga
            .on_payment_result(order.id, PaymentOutcome::Success, Utc::now(), "card")
            .await
            .unwrap_err();

        assert!(matches!(err, SagaError::ConfirmFailed { .. }));
        let stored = h.store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
        assert_eq!(stored.payment_status, PaymentStatus::Succeeded);
    }
}
