//! Settlement preview, order commit and order listing endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use common::{AddressId, Money, PayMethod};
use domain::{CommitOrder, OrderPage, Settlement};
use serde::{Deserialize, Serialize};
use store::{CartStore, Database};

use crate::AppState;
use crate::auth::CurrentUser;
use crate::error::ApiError;

/// Default page size for order listings.
pub const DEFAULT_PAGE_SIZE: usize = 10;

// -- Request types --

#[derive(Deserialize)]
pub struct CommitOrderRequest {
    pub address: i64,
    pub pay_method: String,
}

#[derive(Deserialize)]
pub struct ListOrdersParams {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderCommittedResponse {
    pub order_id: String,
    pub status: String,
    pub total_count: u32,
    pub total_amount: Money,
    pub freight: Money,
}

// -- Handlers --

/// GET /orders/settlement — preview the selected cart items and freight.
#[tracing::instrument(skip(state))]
pub async fn settlement<D: Database + Clone, C: CartStore>(
    State(state): State<Arc<AppState<D, C>>>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Settlement>, ApiError> {
    let settlement = state.orders.settlement(user_id).await?;
    Ok(Json(settlement))
}

/// POST /orders — commit the selected cart items as an order.
#[tracing::instrument(skip(state, payload))]
pub async fn commit<D: Database + Clone, C: CartStore>(
    State(state): State<Arc<AppState<D, C>>>,
    CurrentUser(user_id): CurrentUser,
    payload: Result<Json<CommitOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderCommittedResponse>), ApiError> {
    let Json(req) = payload?;
    let pay_method = parse_pay_method(&req.pay_method)?;
    if req.address <= 0 {
        return Err(ApiError::BadRequest(format!(
            "Invalid address: {}",
            req.address
        )));
    }

    let order = state
        .orders
        .commit_order(CommitOrder {
            user_id,
            address_id: AddressId::new(req.address),
            pay_method,
        })
        .await?;

    let response = OrderCommittedResponse {
        order_id: order.order_id.to_string(),
        status: order.status.to_string(),
        total_count: order.total_count,
        total_amount: order.total_amount,
        freight: order.freight,
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /orders — list the caller's orders, newest first.
#[tracing::instrument(skip(state, params))]
pub async fn list<D: Database + Clone, C: CartStore>(
    State(state): State<Arc<AppState<D, C>>>,
    CurrentUser(user_id): CurrentUser,
    Query(params): Query<ListOrdersParams>,
) -> Result<Json<OrderPage>, ApiError> {
    let page = state
        .orders
        .list_orders(
            user_id,
            params.page.unwrap_or(1),
            params.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        )
        .await?;
    Ok(Json(page))
}

fn parse_pay_method(value: &str) -> Result<PayMethod, ApiError> {
    value
        .trim()
        .to_ascii_uppercase()
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid pay_method: {e}")))
}
