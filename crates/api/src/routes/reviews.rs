//! Review endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use common::{OrderId, SkuId};
use domain::{PendingReview, ReviewEntry, ReviewOutcome, SubmitReview};
use serde::Deserialize;
use store::{CartStore, Database};

use crate::AppState;
use crate::auth::CurrentUser;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct SubmitReviewRequest {
    pub sku: i64,
    pub comment: String,
    pub score: u8,
    #[serde(default)]
    pub is_anonymous: bool,
}

/// GET /orders/{id}/uncommentgoods — lines of the caller's order awaiting review.
#[tracing::instrument(skip(state))]
pub async fn pending<D: Database + Clone, C: CartStore>(
    State(state): State<Arc<AppState<D, C>>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<PendingReview>>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let pending = state.reviews.pending_reviews(user_id, &order_id).await?;
    Ok(Json(pending))
}

/// POST /orders/{id}/comments — review one variant of the caller's order.
#[tracing::instrument(skip(state, payload))]
pub async fn submit<D: Database + Clone, C: CartStore>(
    State(state): State<Arc<AppState<D, C>>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
    payload: Result<Json<SubmitReviewRequest>, JsonRejection>,
) -> Result<Json<ReviewOutcome>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let Json(req) = payload?;
    let outcome = state
        .reviews
        .submit_review(
            user_id,
            &order_id,
            SubmitReview {
                sku_id: SkuId::new(req.sku),
                comment: req.comment,
                score: req.score,
                is_anonymous: req.is_anonymous,
            },
        )
        .await?;
    Ok(Json(outcome))
}

/// GET /skus/{id}/comments — public reviews of a variant, newest first.
#[tracing::instrument(skip(state))]
pub async fn for_sku<D: Database + Clone, C: CartStore>(
    State(state): State<Arc<AppState<D, C>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ReviewEntry>>, ApiError> {
    let sku_id = id
        .parse::<i64>()
        .map(SkuId::new)
        .map_err(|e| ApiError::BadRequest(format!("Invalid SKU id: {e}")))?;
    let reviews = state.reviews.sku_reviews(sku_id).await?;
    Ok(Json(reviews))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ApiError::BadRequest(format!("Invalid order id: {id:?}")));
    }
    Ok(OrderId::new(id))
}
