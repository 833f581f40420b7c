//! Payment provider callback endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use chrono::{DateTime, Utc};
use common::OrderId;
use domain::PaymentOutcome;
use metrics::counter;
use order_store::OrderStore;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::routes::orders::AppState;

#[derive(Deserialize)]
pub struct PaymentNotifyRequest {
    pub order_id: i64,
    pub outcome: PaymentOutcome,
    /// Provider timestamp for the payment; defaults to receipt time when the
    /// callback omits it.
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub method: Option<String>,
}

#[derive(Serialize)]
pub struct PaymentNotifyResponse {
    pub order_id: i64,
    pub payment_status: String,
}

/// POST /payments/notify — apply an asynchronous payment outcome.
///
/// Idempotent: the provider may retry the same notification and gets the
/// same successful response back.
#[tracing::instrument(skip(state, req), fields(order_id = req.order_id))]
pub async fn notify<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<PaymentNotifyRequest>,
) -> Result<Json<PaymentNotifyResponse>, ApiError> {
    let order_id = OrderId::from_raw(req.order_id);
    let paid_at = req.paid_at.unwrap_or_else(Utc::now);
    let method = req.method.as_deref().unwrap_or("unknown");

    state
        .saga
        .on_payment_result(order_id, req.outcome, paid_at, method)
        .await?;
    counter!("api_payment_notifications_total").increment(1);

    Ok(Json(PaymentNotifyResponse {
        order_id: req.order_id,
        payment_status: req.outcome.target_payment_status().to_string(),
    }))
}
