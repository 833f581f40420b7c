//! Reconciliation record lookup shared by the saga and the rollback worker.

use common::OrderId;
use coordination::{ReconciliationCache, ReconciliationRecord};
use order_store::OrderStore;
use tracing::warn;

use crate::config::SagaConfig;
use crate::error::SagaError;

/// Loads the reconciliation record for an order, consulting the cache first
/// and rebuilding from the store on a miss.
///
/// Cache read failures are treated as misses: the store is authoritative and
/// a flaky cache must not block reconciliation.
pub(crate) async fn load_record<S, C>(
    store: &S,
    cache: &C,
    config: &SagaConfig,
    order_id: OrderId,
) -> Result<ReconciliationRecord, SagaError>
where
    S: OrderStore + ?Sized,
    C: ReconciliationCache + ?Sized,
{
    match cache.get(order_id).await {
        Ok(Some(record)) => return Ok(record),
        Ok(None) => {}
        Err(err) => {
            warn!(%order_id, error = %err, "reconciliation cache read failed, falling back to store");
        }
    }

    let (_, payment_status, created_at) = store.status_and_created_at(order_id).await?;
    Ok(ReconciliationRecord {
        payment_status,
        expires_at: config.payment_deadline(created_at),
    })
}
