//! Order placement, lookup and cancellation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use common::OrderId;
use coordination::{InMemoryDelayedBus, InMemoryDistributedLock, InMemoryReconciliationCache};
use domain::{LineItemDraft, Money, Order, OrderDraft, OrderLineItem, SkuId};
use order_store::OrderStore;
use saga::{InMemoryInventoryClient, OrderSaga};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: OrderStore> {
    pub saga: OrderSaga<
        S,
        InMemoryInventoryClient,
        InMemoryReconciliationCache,
        InMemoryDistributedLock,
        InMemoryDelayedBus,
    >,
    pub inventory: Arc<InMemoryInventoryClient>,
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: u64,
    pub address_id: u64,
    pub address_snapshot: String,
    pub items: Vec<LineItemRequest>,
}

#[derive(Deserialize)]
pub struct LineItemRequest {
    pub merchant_id: u64,
    pub goods_id: u64,
    pub sku_id: u64,
    pub goods_version: u32,
    pub quantity: u32,
    pub original_price_cents: i64,
    pub sale_price_cents: i64,
    pub freight_cents: i64,
    pub discount_cents: i64,
    #[serde(default)]
    pub coupon_id: Option<u64>,
}

impl LineItemRequest {
    fn into_draft(self) -> LineItemDraft {
        LineItemDraft {
            merchant_id: self.merchant_id,
            goods_id: self.goods_id,
            sku_id: SkuId::from_raw(self.sku_id),
            goods_version: self.goods_version,
            quantity: self.quantity,
            original_price: Money::from_cents(self.original_price_cents),
            sale_price: Money::from_cents(self.sale_price_cents),
            freight: Money::from_cents(self.freight_cents),
            discount: Money::from_cents(self.discount_cents),
            coupon_id: self.coupon_id,
        }
    }
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: i64,
    pub user_id: u64,
    pub status: String,
    pub payment_status: String,
    pub goods_amount_cents: i64,
    pub freight_amount_cents: i64,
    pub discount_amount_cents: i64,
    pub payment_amount_cents: i64,
    pub pay_time: Option<DateTime<Utc>>,
    pub pay_method: Option<String>,
    pub created_at: DateTime<Utc>,
    pub address_id: u64,
    pub address_snapshot: String,
    pub items: Vec<LineItemResponse>,
}

#[derive(Serialize)]
pub struct LineItemResponse {
    pub merchant_id: u64,
    pub goods_id: u64,
    pub sku_id: u64,
    pub quantity: u32,
    pub sale_price_cents: i64,
    pub freight_cents: i64,
    pub discount_cents: i64,
    pub payment_amount_cents: i64,
    pub single_price_cents: i64,
}

fn order_response(order: Order, items: Vec<OrderLineItem>) -> OrderResponse {
    OrderResponse {
        id: order.id.as_i64(),
        user_id: order.user_id,
        status: order.status.to_string(),
        payment_status: order.payment_status.to_string(),
        goods_amount_cents: order.goods_amount.cents(),
        freight_amount_cents: order.freight_amount.cents(),
        discount_amount_cents: order.discount_amount.cents(),
        payment_amount_cents: order.payment_amount.cents(),
        pay_time: order.pay_time,
        pay_method: order.pay_method,
        created_at: order.created_at,
        address_id: order.address_id,
        address_snapshot: order.address_snapshot,
        items: items
            .into_iter()
            .map(|item| LineItemResponse {
                merchant_id: item.merchant_id,
                goods_id: item.goods_id,
                sku_id: item.sku_id.as_u64(),
                quantity: item.quantity,
                sale_price_cents: item.sale_price.cents(),
                freight_cents: item.freight.cents(),
                discount_cents: item.discount.cents(),
                payment_amount_cents: item.payment_amount.cents(),
                single_price_cents: item.single_price.cents(),
            })
            .collect(),
    }
}

// -- Handlers --

/// POST /orders — place an order, reserving stock and scheduling rollback.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(axum::http::StatusCode, Json<OrderResponse>), ApiError> {
    let draft = OrderDraft {
        user_id: req.user_id,
        address_id: req.address_id,
        address_snapshot: req.address_snapshot,
        items: req
            .items
            .into_iter()
            .map(LineItemRequest::into_draft)
            .collect(),
    };

    let order = state.saga.create_order(draft).await?;
    let items = state.saga.order_lines(order.id).await?;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(order_response(order, items)),
    ))
}

/// GET /orders/:id — load an order with its line items.
#[tracing::instrument(skip(state))]
pub async fn get<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<i64>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = OrderId::from_raw(id);
    let order = state
        .saga
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("order {id} not found")))?;
    let items = state.saga.order_lines(order_id).await?;

    Ok(Json(order_response(order, items)))
}

/// POST /orders/:id/cancel — cancel an unpaid order and release its stock.
#[tracing::instrument(skip(state))]
pub async fn cancel<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<i64>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = OrderId::from_raw(id);
    state.saga.cancel_order(order_id).await?;

    let order = state
        .saga
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("order {id} not found")))?;
    let items = state.saga.order_lines(order_id).await?;

    Ok(Json(order_response(order, items)))
}
