//! # Product Repository
//!
//! Product reads for the cart validator and the cached cost statistics.
//!
//! Stock numbers are never written here; the [`StockLedger`] owns them.
//!
//! [`StockLedger`]: crate::repository::stock::StockLedger

use std::collections::HashMap;

use chrono::Utc;
use kura_core::Product;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::debug;

use crate::error::{DbError, DbResult};

/// Repository for product database operations.
pub struct ProductRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> ProductRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        ProductRepository { conn }
    }

    /// Gets a product by ID.
    pub async fn get(&mut self, id: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(product)
    }

    /// Gets a product by ID or fails with `NotFound`.
    pub async fn require(&mut self, id: &str) -> DbResult<Product> {
        self.get(id)
            .await?
            .ok_or_else(|| DbError::not_found("Product", id))
    }

    /// Bulk-fetches the candidate products of a cart, keyed by id.
    ///
    /// Unknown ids are simply absent from the map.
    pub async fn get_many(&mut self, ids: &[String]) -> DbResult<HashMap<String, Product>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut query: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT * FROM products WHERE id IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(id.as_str());
        }
        separated.push_unseparated(")");

        let products: Vec<Product> = query
            .build_query_as::<Product>()
            .fetch_all(&mut *self.conn)
            .await?;

        debug!(requested = ids.len(), found = products.len(), "Fetched cart products");
        Ok(products.into_iter().map(|p| (p.id.clone(), p)).collect())
    }

    /// Inserts a product row.
    ///
    /// Stock should start at zero and grow through the ledger so that the
    /// movement replay matches `stock_number`.
    pub async fn insert(&mut self, product: &Product) -> DbResult<()> {
        debug!(id = %product.id, "Inserting product");

        sqlx::query(
            r#"
            INSERT INTO products (
                id, store_id, display_name, sell_price, buy_price,
                stock_number, infinite_stock, genre_id, category_id,
                consignment_client_id, average_wholesale_price,
                minimum_wholesale_price, maximum_wholesale_price,
                is_active, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                ?6, ?7, ?8, ?9,
                ?10, ?11,
                ?12, ?13,
                ?14, ?15, ?16
            )
            "#,
        )
        .bind(&product.id)
        .bind(&product.store_id)
        .bind(&product.display_name)
        .bind(product.sell_price)
        .bind(product.buy_price)
        .bind(product.stock_number)
        .bind(product.infinite_stock)
        .bind(&product.genre_id)
        .bind(&product.category_id)
        .bind(&product.consignment_client_id)
        .bind(product.average_wholesale_price)
        .bind(product.minimum_wholesale_price)
        .bind(product.maximum_wholesale_price)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    /// Recomputes average/min/max unit cost over the remaining lots.
    ///
    /// Products without remaining lots get `NULL` statistics.
    pub async fn refresh_wholesale_stats(&mut self, product_id: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE products SET
                average_wholesale_price = (
                    SELECT CAST(ROUND(SUM(unit_price * remaining_item_count) * 1.0
                                      / SUM(remaining_item_count)) AS INTEGER)
                    FROM wholesale_lots
                    WHERE product_id = ?1 AND remaining_item_count > 0
                ),
                minimum_wholesale_price = (
                    SELECT MIN(unit_price) FROM wholesale_lots
                    WHERE product_id = ?1 AND remaining_item_count > 0
                ),
                maximum_wholesale_price = (
                    SELECT MAX(unit_price) FROM wholesale_lots
                    WHERE product_id = ?1 AND remaining_item_count > 0
                ),
                updated_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(product_id)
        .bind(Utc::now())
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", product_id));
        }

        debug!(product_id, "Refreshed wholesale statistics");
        Ok(())
    }

    /// Number of products in a store.
    pub async fn count(&mut self, store_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE store_id = ?1")
            .bind(store_id)
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(count)
    }
}

/// Generates a new product ID.
pub fn generate_product_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================
