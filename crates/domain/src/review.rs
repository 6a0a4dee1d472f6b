//! Order line reviews.
//!
//! Buyers review each purchased variant of an order once. Reviewing the
//! last unreviewed line of an `UNCOMMENTED` order finishes the order.
//! Reviews are public per variant; anonymous reviewers are shown under a
//! placeholder name.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use common::{Money, OrderId, OrderStatus, SkuId, UserId};
use serde::{Deserialize, Serialize};
use store::{Database, LineQuery, OrderInfo, ReviewUpdate, Transaction};
use tracing::info;

use crate::error::{OrderError, Result};
use crate::transaction::finish;

/// Name shown for reviews left anonymously.
pub const ANONYMOUS_DISPLAY_NAME: &str = "Anonymous user";

/// Lowest accepted score.
pub const MIN_SCORE: u8 = 1;

/// Highest accepted score.
pub const MAX_SCORE: u8 = 5;

/// Variant details shown next to a line awaiting review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewSku {
    pub id: SkuId,
    pub name: String,
    pub default_image_url: String,
    pub price: Money,
}

/// An order line the buyer has not reviewed yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingReview {
    pub sku: ReviewSku,
    /// Unit price paid.
    pub price: Money,
    pub count: u32,
    pub comment: String,
    pub score: u8,
    pub is_anonymous: bool,
    pub is_commented: bool,
}

/// A review as submitted by the buyer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubmitReview {
    pub sku_id: SkuId,
    pub comment: String,
    pub score: u8,
    #[serde(default)]
    pub is_anonymous: bool,
}

impl SubmitReview {
    fn validate(&self) -> Result<()> {
        if !(MIN_SCORE..=MAX_SCORE).contains(&self.score) {
            return Err(OrderError::InvalidReview(format!(
                "score must be between {MIN_SCORE} and {MAX_SCORE}, got {}",
                self.score
            )));
        }
        if self.comment.trim().is_empty() {
            return Err(OrderError::InvalidReview("comment must not be empty".to_string()));
        }
        Ok(())
    }
}

/// What a submitted review changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReviewOutcome {
    /// Lines of the order still awaiting review.
    pub remaining: usize,
    /// True if this review moved the order to `FINISHED`.
    pub order_finished: bool,
}

/// A public review of a variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewEntry {
    pub score: u8,
    pub comment: String,
    pub username: String,
    pub updated_at: DateTime<Utc>,
}

/// Service for listing and submitting reviews.
pub struct ReviewService<D: Database> {
    db: D,
}

impl<D: Database> ReviewService<D> {
    /// Creates a new review service.
    pub fn new(db: D) -> Self {
        Self { db }
    }

    /// Lists the unreviewed lines of one of the user's orders.
    #[tracing::instrument(skip(self))]
    pub async fn pending_reviews(
        &self,
        user_id: UserId,
        order_id: &OrderId,
    ) -> Result<Vec<PendingReview>> {
        let order = self.db.find_order(order_id).await?;
        ensure_owner(order.as_ref(), order_id, user_id)?;

        let lines = self
            .db
            .query_lines(LineQuery::for_order(order_id.clone()).commented(false))
            .await?;
        let ids: Vec<SkuId> = lines.iter().map(|line| line.sku_id).collect();
        let skus: HashMap<SkuId, _> = self
            .db
            .find_skus(&ids)
            .await?
            .into_iter()
            .map(|sku| (sku.id, sku))
            .collect();

        lines
            .into_iter()
            .map(|line| {
                let sku = skus
                    .get(&line.sku_id)
                    .ok_or_else(|| OrderError::NotFound(format!("SKU {}", line.sku_id)))?;
                Ok(PendingReview {
                    sku: ReviewSku {
                        id: sku.id,
                        name: sku.name.clone(),
                        default_image_url: sku.default_image_url.clone(),
                        price: sku.price,
                    },
                    price: line.price,
                    count: line.count,
                    comment: line.comment,
                    score: line.score,
                    is_anonymous: line.is_anonymous,
                    is_commented: line.is_commented,
                })
            })
            .collect()
    }

    /// Records the user's review of one variant of an order.
    ///
    /// When no unreviewed line is left, an `UNCOMMENTED` order moves to
    /// `FINISHED`; orders in any other status keep it.
    #[tracing::instrument(skip(self, review), fields(sku_id = %review.sku_id, score = review.score))]
    pub async fn submit_review(
        &self,
        user_id: UserId,
        order_id: &OrderId,
        review: SubmitReview,
    ) -> Result<ReviewOutcome> {
        review.validate()?;

        let mut tx = self.db.begin().await?;
        let result = Self::apply_review(&mut tx, user_id, order_id, &review).await;
        let outcome = finish(tx, result).await?;

        info!(
            remaining = outcome.remaining,
            order_finished = outcome.order_finished,
            "review submitted"
        );
        Ok(outcome)
    }

    async fn apply_review(
        tx: &mut D::Tx,
        user_id: UserId,
        order_id: &OrderId,
        review: &SubmitReview,
    ) -> Result<ReviewOutcome> {
        // Reviews of one order serialize here, so the unreviewed count below
        // sees every other review of this order as committed.
        let order = tx.find_order_for_update(order_id).await?;
        ensure_owner(order.as_ref(), order_id, user_id)?;

        let line = tx
            .query_lines(LineQuery::for_order(order_id.clone()).sku_id(review.sku_id))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                OrderError::NotFound(format!("SKU {} in order {order_id}", review.sku_id))
            })?;
        if line.is_commented {
            return Err(OrderError::InvalidReview(format!(
                "SKU {} in order {order_id} is already reviewed",
                review.sku_id
            )));
        }

        tx.update_review(
            line.id,
            &ReviewUpdate {
                comment: review.comment.trim().to_string(),
                score: review.score,
                is_anonymous: review.is_anonymous,
            },
        )
        .await?;
        tx.increment_sku_comments(review.sku_id).await?;

        let remaining = tx
            .query_lines(LineQuery::for_order(order_id.clone()).commented(false))
            .await?
            .len();

        let order_finished = remaining == 0
            && tx
                .update_order_status(order_id, OrderStatus::Uncommented, OrderStatus::Finished)
                .await?
                == 1;

        Ok(ReviewOutcome {
            remaining,
            order_finished,
        })
    }

    /// Lists every line that purchased a variant, newest first, with the
    /// reviewer's display name.
    #[tracing::instrument(skip(self))]
    pub async fn sku_reviews(&self, sku_id: SkuId) -> Result<Vec<ReviewEntry>> {
        let lines = self
            .db
            .query_lines(LineQuery::for_sku(sku_id).newest_first())
            .await?;

        let order_ids: Vec<OrderId> = lines
            .iter()
            .map(|line| line.order_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let buyers: HashMap<OrderId, UserId> = self
            .db
            .find_orders(&order_ids)
            .await?
            .into_iter()
            .map(|order| (order.order_id, order.user_id))
            .collect();

        let user_ids: Vec<UserId> = buyers.values().copied().collect();
        let names = self.db.usernames(&user_ids).await?;

        Ok(lines
            .into_iter()
            .map(|line| {
                let username = buyers
                    .get(&line.order_id)
                    .and_then(|user_id| names.get(user_id))
                    .map(String::as_str);
                ReviewEntry {
                    score: line.score,
                    username: display_name(username, line.is_anonymous),
                    comment: line.comment,
                    updated_at: line.updated_at,
                }
            })
            .collect())
    }
}

/// Name shown for a review: the real username unless the review is
/// anonymous or the user is unknown.
pub fn display_name(username: Option<&str>, is_anonymous: bool) -> String {
    match username {
        Some(name) if !is_anonymous => name.to_string(),
        _ => ANONYMOUS_DISPLAY_NAME.to_string(),
    }
}

fn ensure_owner(order: Option<&OrderInfo>, order_id: &OrderId, user_id: UserId) -> Result<()> {
    match order {
        None => Err(OrderError::NotFound(format!("order {order_id}"))),
        Some(order) if order.user_id != user_id => Err(OrderError::Unauthorized),
        Some(_) => Ok(()),
    }
}
