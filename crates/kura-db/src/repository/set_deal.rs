//! # Set Deal Repository
//!
//! Set deals and their required products.

use std::collections::HashMap;

use kura_core::set_deal::SetDealDefinition;
use kura_core::{SetDeal, SetDealProduct, SetDealStatus};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{DbError, DbResult};

/// Repository for set deals.
pub struct SetDealRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SetDealRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        SetDealRepository { conn }
    }

    /// Every non-deleted deal of a store with its products.
    ///
    /// Date windows are not filtered here; the matcher checks them against
    /// the cart's instant.
    pub async fn definitions_for_store(&mut self, store_id: &str) -> DbResult<Vec<SetDealDefinition>> {
        let deals = sqlx::query_as::<_, SetDeal>(
            "SELECT * FROM set_deals WHERE store_id = ?1 AND status != ?2 ORDER BY id ASC",
        )
        .bind(store_id)
        .bind(SetDealStatus::Deleted)
        .fetch_all(&mut *self.conn)
        .await?;

        let products = sqlx::query_as::<_, SetDealProduct>(
            r#"
            SELECT sdp.set_deal_id, sdp.product_id, sdp.item_count
            FROM set_deal_products sdp
            JOIN set_deals sd ON sd.id = sdp.set_deal_id
            WHERE sd.store_id = ?1
            ORDER BY sdp.set_deal_id, sdp.product_id
            "#,
        )
        .bind(store_id)
        .fetch_all(&mut *self.conn)
        .await?;

        let mut by_deal: HashMap<String, Vec<SetDealProduct>> = HashMap::new();
        for p in products {
            by_deal.entry(p.set_deal_id.clone()).or_default().push(p);
        }

        Ok(deals
            .into_iter()
            .map(|deal| {
                let products = by_deal.remove(&deal.id).unwrap_or_default();
                SetDealDefinition { deal, products }
            })
            .collect())
    }

    /// Deals of a store whose status a refresh may change.
    pub async fn refreshable(&mut self, store_id: &str) -> DbResult<Vec<SetDeal>> {
        let deals = sqlx::query_as::<_, SetDeal>(
            "SELECT * FROM set_deals WHERE store_id = ?1 AND status IN (?2, ?3) ORDER BY id ASC",
        )
        .bind(store_id)
        .bind(SetDealStatus::Draft)
        .bind(SetDealStatus::Published)
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(deals)
    }

    pub async fn update_status(&mut self, id: &str, status: SetDealStatus) -> DbResult<()> {
        let result = sqlx::query("UPDATE set_deals SET status = ?1 WHERE id = ?2")
            .bind(status)
            .bind(id)
            .execute(&mut *self.conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("SetDeal", id));
        }
        debug!(set_deal_id = id, ?status, "Set deal status changed");
        Ok(())
    }

    pub async fn insert(&mut self, deal: &SetDeal, products: &[SetDealProduct]) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO set_deals (
                id, store_id, display_name, discount_kind, discount_amount,
                status, start_at, expire_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&deal.id)
        .bind(&deal.store_id)
        .bind(&deal.display_name)
        .bind(deal.discount_kind)
        .bind(deal.discount_amount)
        .bind(deal.status)
        .bind(deal.start_at)
        .bind(deal.expire_at)
        .execute(&mut *self.conn)
        .await?;

        for p in products {
            sqlx::query(
                "INSERT INTO set_deal_products (set_deal_id, product_id, item_count) VALUES (?1, ?2, ?3)",
            )
            .bind(&deal.id)
            .bind(&p.product_id)
            .bind(p.item_count)
            .execute(&mut *self.conn)
            .await?;
        }
        Ok(())
    }
}
