//! Delayed rollback worker.
//!
//! Consumes rollback messages scheduled at order placement. Delivery is
//! at-least-once, so every decision here is made against current order
//! state under the order's lock, never against the message alone.

use std::sync::Arc;

use chrono::Utc;
use common::OrderId;
use coordination::{DelayedMessageBus, DistributedLock, ReconciliationCache};
use domain::{OrderStatus, PaymentStatus, StockReservation};
use metrics::counter;
use order_store::OrderStore;
use tracing::{info, warn};

use crate::config::SagaConfig;
use crate::error::SagaError;
use crate::inventory::InventoryClient;
use crate::recon::load_record;
use crate::topics::ORDER_ROLLBACK_TOPIC;

/// Outcome of one rollback attempt, mapped to an ack decision by
/// [`RollbackWorker::handle_message`].
#[derive(Debug, PartialEq, Eq)]
enum RollbackOutcome {
    /// Stock was released and the order cancelled.
    Released,
    /// A payment outcome already settled the order; nothing to do.
    AlreadySettled,
    /// The payment window is still open; the message must come back later.
    NotDueYet,
    /// A transient failure; the message must be redelivered.
    RetryLater,
}

/// Consumes scheduled rollback messages and releases expired reservations.
pub struct RollbackWorker<S, I, C, L, B> {
    store: Arc<S>,
    inventory: Arc<I>,
    cache: Arc<C>,
    lock: Arc<L>,
    bus: Arc<B>,
    config: SagaConfig,
}

impl<S, I, C, L, B> Clone for RollbackWorker<S, I, C, L, B> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            inventory: Arc::clone(&self.inventory),
            cache: Arc::clone(&self.cache),
            lock: Arc::clone(&self.lock),
            bus: Arc::clone(&self.bus),
            config: self.config,
        }
    }
}

impl<S, I, C, L, B> RollbackWorker<S, I, C, L, B>
where
    S: OrderStore + 'static,
    I: InventoryClient + 'static,
    C: ReconciliationCache + 'static,
    L: DistributedLock + 'static,
    B: DelayedMessageBus + 'static,
{
    pub fn new(
        store: Arc<S>,
        inventory: Arc<I>,
        cache: Arc<C>,
        lock: Arc<L>,
        bus: Arc<B>,
        config: SagaConfig,
    ) -> Self {
        Self {
            store,
            inventory,
            cache,
            lock,
            bus,
            config,
        }
    }

    /// Subscribes this worker to the rollback topic.
    pub async fn start(&self) -> Result<(), SagaError> {
        let worker = self.clone();
        self.bus
            .subscribe(
                ORDER_ROLLBACK_TOPIC,
                Arc::new(move |body: Vec<u8>| {
                    let worker = worker.clone();
                    Box::pin(async move { worker.handle_message(&body).await })
                }),
            )
            .await?;
        Ok(())
    }

    /// Processes one delivery. The returned bool is the ack decision:
    /// `false` requests redelivery.
    pub async fn handle_message(&self, body: &[u8]) -> bool {
        let reservation: StockReservation = match serde_json::from_slice(body) {
            Ok(reservation) => reservation,
            Err(err) => {
                // Redelivering an unparseable message can never succeed.
                warn!(error = %err, "dropping malformed rollback message");
                counter!("saga_rollback_malformed_total").increment(1);
                return true;
            }
        };
        let order_id = reservation.order_id;

        match self.try_rollback(&reservation).await {
            Ok(RollbackOutcome::Released) => {
                counter!("saga_rollbacks_released_total").increment(1);
                info!(%order_id, "expired reservation released");
                true
            }
            Ok(RollbackOutcome::AlreadySettled) => {
                info!(%order_id, "order already settled, rollback skipped");
                true
            }
            Ok(RollbackOutcome::NotDueYet) => {
                // Delivered ahead of the payment deadline, likely after a
                // broker restart recomputed delays. Come back later.
                info!(%order_id, "rollback delivered before the payment deadline");
                false
            }
            Ok(RollbackOutcome::RetryLater) => false,
            Err(SagaError::OrderNotFound(_)) => {
                warn!(%order_id, "rollback for unknown order, dropping");
                true
            }
            Err(err) => {
                warn!(%order_id, error = %err, "rollback attempt failed, will retry");
                false
            }
        }
    }

    async fn try_rollback(
        &self,
        reservation: &StockReservation,
    ) -> Result<RollbackOutcome, SagaError> {
        let order_id = reservation.order_id;

        // Cheap pre-check outside the lock; the authoritative check repeats
        // under the lock.
        let record = load_record(
            self.store.as_ref(),
            self.cache.as_ref(),
            &self.config,
            order_id,
        )
        .await?;
        if !record.payment_status.is_pending() {
            return Ok(RollbackOutcome::AlreadySettled);
        }
        if Utc::now() < record.expires_at {
            return Ok(RollbackOutcome::NotDueYet);
        }

        self.lock.lock(order_id).await?;
        let result = self.release_locked(order_id, reservation).await;
        if let Err(err) = self.lock.unlock(order_id).await {
            warn!(%order_id, error = %err, "failed to release rollback lock");
        }
        result
    }

    async fn release_locked(
        &self,
        order_id: OrderId,
        reservation: &StockReservation,
    ) -> Result<RollbackOutcome, SagaError> {
        // A payment outcome may have landed between the pre-check and lock
        // acquisition; re-read before touching stock.
        let record = load_record(
            self.store.as_ref(),
            self.cache.as_ref(),
            &self.config,
            order_id,
        )
        .await?;
        if !record.payment_status.is_pending() {
            return Ok(RollbackOutcome::AlreadySettled);
        }

        if let Err(err) = self.inventory.release(order_id, &reservation.items).await {
            warn!(%order_id, error = %err, "stock release failed, requesting redelivery");
            return Ok(RollbackOutcome::RetryLater);
        }

        self.store
            .update_status(order_id, OrderStatus::Cancelled, PaymentStatus::Cancelled)
            .await?;
        if let Err(err) = self
            .cache
            .set(order_id, record.with_status(PaymentStatus::Cancelled))
            .await
        {
            warn!(%order_id, error = %err, "failed to update reconciliation cache after rollback");
        }
        Ok(RollbackOutcome::Released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use common::IdGenerator;
    use coordination::{
        InMemoryDelayedBus, InMemoryDistributedLock, InMemoryReconciliationCache, LockConfig,
    };
    use domain::{LineItemDraft, Money, OrderDraft, PaymentOutcome, SkuId};
    use order_store::InMemoryOrderStore;

    use crate::coordinator::OrderSaga;
    use crate::inventory::InMemoryInventoryClient;

    struct Harness {
        saga: OrderSaga<
            InMemoryOrderStore,
            InMemoryInventoryClient,
            InMemoryReconciliationCache,
            InMemoryDistributedLock,
            InMemoryDelayedBus,
        >,
        worker: RollbackWorker<
            InMemoryOrderStore,
            InMemoryInventoryClient,
            InMemoryReconciliationCache,
            InMemoryDistributedLock,
            InMemoryDelayedBus,
        >,
        store: Arc<InMemoryOrderStore>,
        inventory: Arc<InMemoryInventoryClient>,
        lock: Arc<InMemoryDistributedLock>,
    }

    fn harness(config: SagaConfig) -> Harness {
        harness_with(config, LockConfig::default())
    }

    fn harness_with(config: SagaConfig, lock_config: LockConfig) -> Harness {
        let store = Arc::new(InMemoryOrderStore::new());
        let inventory = Arc::new(InMemoryInventoryClient::new());
        let cache = Arc::new(InMemoryReconciliationCache::new());
        let lock = Arc::new(InMemoryDistributedLock::new(lock_config));
        let bus = Arc::new(InMemoryDelayedBus::default());
        let saga = OrderSaga::new(
            Arc::clone(&store),
            Arc::clone(&inventory),
            Arc::clone(&cache),
            Arc::clone(&lock),
            Arc::clone(&bus),
            Arc::new(IdGenerator::new(2)),
            config,
        );
        let worker = RollbackWorker::new(
            Arc::clone(&store),
            Arc::clone(&inventory),
            Arc::clone(&cache),
            Arc::clone(&lock),
            bus,
            config,
        );
        Harness {
            saga,
            worker,
            store,
            inventory,
            lock,
        }
    }

    fn expired_config() -> SagaConfig {
        SagaConfig {
            payment_window: Duration::ZERO,
            rollback_grace: Duration::ZERO,
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

    fn rollback_body(order_id: OrderId) -> Vec<u8> {
        serde_json::to_vec(&StockReservation::new(
            order_id,
            vec![domain::SkuQuantity {
                sku_id: SkuId::from_raw(101),
                count: 2,
            }],
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn expired_unpaid_order_is_rolled_back() {
        let h = harness(expired_config());
        h.inventory.set_stock(SkuId::from_raw(101), 5);
        let order = h.saga.create_order(draft()).await.unwrap();

        let acked = h.worker.handle_message(&rollback_body(order.id)).await;

        assert!(acked);
        let stored = h.store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Cancelled);
        assert_eq!(stored.payment_status, PaymentStatus::Cancelled);
        assert_eq!(h.inventory.available(SkuId::from_raw(101)), Some(5));
    }

    #[tokio::test]
    async fn paid_order_is_left_alone() {
        let h = harness(expired_config());
        h.inventory.set_stock(SkuId::from_raw(101), 5);
        let order = h.saga.create_order(draft()).await.unwrap();
        h.saga
            .on_payment_result(order.id, PaymentOutcome::Success, Utc::now(), "card")
            .await
            .unwrap();

        let acked = h.worker.handle_message(&rollback_body(order.id)).await;

        assert!(acked);
        let stored = h.store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
        // No extra release happened.
        assert_eq!(h.inventory.release_calls(), 0);
    }

    #[tokio::test]
    async fn early_delivery_is_not_acked() {
        let h = harness(SagaConfig::default());
        h.inventory.set_stock(SkuId::from_raw(101), 5);
        let order = h.saga.create_order(draft()).await.unwrap();

        let acked = h.worker.handle_message(&rollback_body(order.id)).await;

        assert!(!acked);
        let stored = h.store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Unpaid);
        assert_eq!(h.inventory.available(SkuId::from_raw(101)), Some(3));
    }

    #[tokio::test]
    async fn redelivered_rollback_is_a_no_op() {
        let h = harness(expired_config());
        h.inventory.set_stock(SkuId::from_raw(101), 5);
        let order = h.saga.create_order(draft()).await.unwrap();

        assert!(h.worker.handle_message(&rollback_body(order.id)).await);
        assert!(h.worker.handle_message(&rollback_body(order.id)).await);

        assert_eq!(h.inventory.available(SkuId::from_raw(101)), Some(5));
        assert_eq!(h.inventory.release_calls(), 1);
    }

    #[tokio::test]
    async fn malformed_message_is_consumed() {
        let h = harness(expired_config());
        assert!(h.worker.handle_message(b"not json").await);
    }

    #[tokio::test]
    async fn unknown_order_is_consumed() {
        let h = harness(expired_config());
        assert!(h.worker.handle_message(&rollback_body(OrderId::from_raw(404))).await);
    }

    #[tokio::test]
    async fn contended_order_lock_requests_redelivery() {
        // A short retry budget so the blocked acquisition gives up quickly.
        let contended = LockConfig {
            lease: Duration::from_secs(5),
            retry_interval: Duration::from_millis(5),
            retry_budget: 3,
        };
        let h = harness_with(expired_config(), contended);
        h.inventory.set_stock(SkuId::from_raw(101), 5);
        let order = h.saga.create_order(draft()).await.unwrap();

        // Another process is reconciling this order right now.
        let holder = h.lock.replica();
        holder.lock(order.id).await.unwrap();

        let acked = h.worker.handle_message(&rollback_body(order.id)).await;

        assert!(!acked);
        assert_eq!(h.inventory.release_calls(), 0);
        let stored = h.store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Unpaid);

        // Redelivery goes through once the holder lets go.
        holder.unlock(order.id).await.unwrap();
        assert!(h.worker.handle_message(&rollback_body(order.id)).await);
        assert_eq!(h.inventory.available(SkuId::from_raw(101)), Some(5));
    }

    #[tokio::test]
    async fn release_failure_requests_redelivery() {
        let h = harness(expired_config());
        h.inventory.set_stock(SkuId::from_raw(101), 5);
        let order = h.saga.create_order(draft()).await.unwrap();
        h.inventory.set_fail_on_release(true);

        let acked = h.worker.handle_message(&rollback_body(order.id)).await;
        assert!(!acked);

        // Next delivery succeeds once the inventory service recovers.
        h.inventory.set_fail_on_release(false);
        assert!(h.worker.handle_message(&rollback_body(order.id)).await);
        assert_eq!(h.inventory.available(SkuId::from_raw(101)), Some(5));
    }
}
