//! Redis-backed cart store.
//!
//! Each user has a hash `cart_{user}` of variant id → quantity and a set
//! `selected_{user}` of variant ids selected for checkout.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use common::{SkuId, UserId};
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use tracing::{debug, info, warn};

use crate::Result;
use crate::store::CartStore;

/// Redis implementation of [`CartStore`].
#[derive(Clone)]
pub struct RedisCartStore {
    conn: ConnectionManager,
}

impl RedisCartStore {
    /// Connects to Redis at `url` (e.g. `redis://localhost:6379`).
    pub async fn new(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        info!(url = %url, "Connected to Redis for carts");

        Ok(Self { conn })
    }

    fn quantities_key(user_id: UserId) -> String {
        format!("cart_{user_id}")
    }

    fn selected_key(user_id: UserId) -> String {
        format!("selected_{user_id}")
    }
}

#[async_trait]
impl CartStore for RedisCartStore {
    async fn get_quantities(&self, user_id: UserId) -> Result<HashMap<SkuId, u32>> {
        let mut conn = self.conn.clone();
        let raw: HashMap<i64, i64> = conn.hgetall(Self::quantities_key(user_id)).await?;

        let mut quantities = HashMap::with_capacity(raw.len());
        for (sku_id, count) in raw {
            match u32::try_from(count) {
                Ok(count) => {
                    quantities.insert(SkuId::new(sku_id), count);
                }
                Err(_) => {
                    warn!(user_id = %user_id, sku_id, count, "Ignoring invalid cart quantity");
                }
            }
        }

        Ok(quantities)
    }

    async fn get_selected(&self, user_id: UserId) -> Result<HashSet<SkuId>> {
        let mut conn = self.conn.clone();
        let raw: HashSet<i64> = conn.smembers(Self::selected_key(user_id)).await?;
        Ok(raw.into_iter().map(SkuId::new).collect())
    }

    async fn remove(&self, user_id: UserId, sku_ids: &[SkuId]) -> Result<()> {
        if sku_ids.is_empty() {
            return Ok(());
        }

        let ids: Vec<i64> = sku_ids.iter().map(SkuId::as_i64).collect();
        let mut conn = self.conn.clone();

        let _: () = redis::pipe()
            .atomic()
            .hdel(Self::quantities_key(user_id), &ids)
            .ignore()
            .srem(Self::selected_key(user_id), &ids)
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!(user_id = %user_id, count = ids.len(), "Removed items from Redis cart");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_cart_layout() {
        assert_eq!(RedisCartStore::quantities_key(UserId::new(7)), "cart_7");
        assert_eq!(RedisCartStore::selected_key(UserId::new(7)), "selected_7");
    }
}
