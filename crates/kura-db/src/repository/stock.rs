//! # Stock Ledger
//!
//! Append-only stock movements plus the FIFO cost lots they consume.
//!
//! ## One Decrease
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  products.stock_number = 10                                            │
//! │        │  decrease 7 (sell)                                            │
//! │        ▼                                                                │
//! │  1. negative-stock check (skipped for infinite_stock)                  │
//! │  2. plan over lots with remaining > 0, oldest first                    │
//! │  3. stock_movements     += (-7, result 3)                              │
//! │  4. wholesale_lots      remaining -= planned units                     │
//! │  5. lot_consumptions    += (movement, lot, units, unit_price)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//! Reversals read `lot_consumptions` back and restore exactly those units,
//! so repeated sell/return cycles never drift the cost basis.
//!
//! All of this runs on the connection of one [`UnitOfWork`], which already
//! holds the write lock.
//!
//! [`UnitOfWork`]: crate::unit_of_work::UnitOfWork

use chrono::Utc;
use kura_core::stock::{
    self, average_unit_price, plan_consumption, ConsumptionPlan, LotOrder, LotUse, StockSource,
    WholesaleRecord,
};
use kura_core::{
    Actor, CoreError, LotConsumption, LotResourceType, StockMovement, StockSourceKind,
    WholesaleLot,
};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{DbError, DbResult};

// =============================================================================
// Requests / Results
// =============================================================================

/// One requested stock change.
#[derive(Debug, Clone)]
pub struct StockMove {
    pub product_id: String,
    /// Units to move; always positive, direction comes from the call.
    pub item_count: i64,
    pub source: StockSource,
    /// Sell price for decreases. Increases derive it from their records.
    pub unit_price: i64,
    pub description: Option<String>,
    pub staff_id: String,
    pub order: LotOrder,
    /// Tags lots created by an increase; composite operations set it.
    pub resource_type: LotResourceType,
    /// Lot resource link; defaults to the source id.
    pub resource_id: Option<String>,
}

impl StockMove {
    pub fn new(
        product_id: impl Into<String>,
        item_count: i64,
        source: StockSource,
        actor: &Actor,
    ) -> Self {
        StockMove {
            product_id: product_id.into(),
            item_count,
            source,
            unit_price: 0,
            description: None,
            staff_id: actor.staff_id.clone(),
            order: LotOrder::OldestFirst,
            resource_type: LotResourceType::Product,
            resource_id: None,
        }
    }

    pub fn unit_price(mut self, unit_price: i64) -> Self {
        self.unit_price = unit_price;
        self
    }

    pub fn description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn order(mut self, order: LotOrder) -> Self {
        self.order = order;
        self
    }

    pub fn resource(mut self, resource_type: LotResourceType, resource_id: Option<String>) -> Self {
        self.resource_type = resource_type;
        self.resource_id = resource_id;
        self
    }
}

/// What a ledger call did.
#[derive(Debug, Clone)]
pub struct StockChange {
    pub movement: StockMovement,
    /// Cost consumed (decreases) or added (increases).
    pub total_wholesale_price: i64,
    /// Units backed by a cost lot.
    pub found_count: i64,
    /// Units no lot could cover.
    pub nothing_count: i64,
    /// Lots touched, with units per lot.
    pub lots: Vec<LotUse>,
}

// =============================================================================
// Ledger
// =============================================================================

/// Stock ledger bound to a unit of work's connection.
pub struct StockLedger<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> StockLedger<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        StockLedger { conn }
    }

    /// Appends a negative movement and consumes cost lots.
    ///
    /// Fails with `InsufficientStock` when a non-infinite product would go
    /// below zero; nothing is written in that case.
    pub async fn decrease(&mut self, mv: &StockMove) -> DbResult<StockChange> {
        ensure_positive(mv.item_count)?;
        let (stock_number, infinite_stock) = self.stock_state(&mv.product_id).await?;

        let result = stock_number - mv.item_count;
        if result < 0 && !infinite_stock {
            return Err(CoreError::InsufficientStock {
                product_id: mv.product_id.clone(),
                available: stock_number,
                requested: mv.item_count,
            }
            .into());
        }

        let lots = self.load_lots(&mv.product_id, mv.order, None).await?;
        let plan = plan_consumption(&lots, mv.item_count);

        self.set_stock(&mv.product_id, result).await?;
        let movement = self
            .append_movement(
                &mv.product_id,
                -mv.item_count,
                &mv.source,
                mv.unit_price,
                result,
                mv.description.as_deref(),
                &mv.staff_id,
            )
            .await?;
        self.consume(movement.id, &plan.uses).await?;

        debug!(
            product_id = %mv.product_id,
            count = mv.item_count,
            result_stock_number = result,
            total_wholesale_price = plan.total_wholesale_price,
            nothing_count = plan.nothing_count,
            "Stock decreased"
        );

        Ok(StockChange {
            movement,
            total_wholesale_price: plan.total_wholesale_price,
            found_count: plan.found_count,
            nothing_count: plan.nothing_count,
            lots: plan.uses,
        })
    }

    /// Appends a positive movement and creates cost lots from `records`.
    ///
    /// Lots created while the product had zero stock are flagged as price
    /// anchors.
    pub async fn increase(
        &mut self,
        mv: &StockMove,
        records: &[WholesaleRecord],
    ) -> DbResult<StockChange> {
        ensure_positive(mv.item_count)?;
        stock::validate_records(records, mv.item_count)?;

        let (stock_number, _) = self.stock_state(&mv.product_id).await?;
        let result = stock_number + mv.item_count;
        let is_price_anchor = stock_number == 0;

        self.set_stock(&mv.product_id, result).await?;
        let movement = self
            .append_movement(
                &mv.product_id,
                mv.item_count,
                &mv.source,
                average_unit_price(records),
                result,
                mv.description.as_deref(),
                &mv.staff_id,
            )
            .await?;

        let now = Utc::now();
        let mut lots = Vec::with_capacity(records.len());
        for record in records {
            let lot_id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO wholesale_lots (
                    product_id, unit_price, item_count, remaining_item_count,
                    stock_movement_id, resource_type, resource_id,
                    is_price_anchor, arrived_at
                ) VALUES (?1, ?2, ?3, ?3, ?4, ?5, ?6, ?7, ?8)
                RETURNING id
                "#,
            )
            .bind(&mv.product_id)
            .bind(record.unit_price)
            .bind(record.item_count)
            .bind(movement.id)
            .bind(mv.resource_type)
            .bind(mv.resource_id.as_deref().or(mv.source.source_id()))
            .bind(is_price_anchor)
            .bind(now)
            .fetch_one(&mut *self.conn)
            .await?;

            lots.push(LotUse {
                lot_id,
                unit_price: record.unit_price,
                item_count: record.item_count,
            });
        }

        let total: i64 = records.iter().map(|r| r.unit_price * r.item_count).sum();
        debug!(
            product_id = %mv.product_id,
            count = mv.item_count,
            result_stock_number = result,
            lots = lots.len(),
            is_price_anchor,
            "Stock increased"
        );

        Ok(StockChange {
            movement,
            total_wholesale_price: total,
            found_count: mv.item_count,
            nothing_count: 0,
            lots,
        })
    }

    /// Read-only walk over a product's lots for `item_count` units.
    pub async fn wholesale_records(
        &mut self,
        product_id: &str,
        item_count: i64,
        order: LotOrder,
    ) -> DbResult<ConsumptionPlan> {
        let lots = self.load_lots(product_id, order, None).await?;
        Ok(plan_consumption(&lots, item_count))
    }

    /// Undoes a decrease by restoring exactly the lots it consumed.
    pub async fn reverse_decrease(
        &mut self,
        movement_id: i64,
        source: StockSource,
        actor: &Actor,
    ) -> DbResult<StockChange> {
        let original = self.reversible(movement_id).await?;
        if original.item_count >= 0 {
            return Err(DbError::InvalidReversal {
                movement_id,
                reason: "not a decrease".to_string(),
            });
        }

        let consumed = self.consumptions(movement_id).await?;
        for row in &consumed {
            let restored = sqlx::query(
                r#"
                UPDATE wholesale_lots
                SET remaining_item_count = remaining_item_count + ?1
                WHERE id = ?2 AND remaining_item_count + ?1 <= item_count
                "#,
            )
            .bind(row.item_count)
            .bind(row.lot_id)
            .execute(&mut *self.conn)
            .await?;

            if restored.rows_affected() != 1 {
                return Err(DbError::InvalidReversal {
                    movement_id,
                    reason: format!("lot {} cannot take back {} units", row.lot_id, row.item_count),
                });
            }
        }

        let count = -original.item_count;
        let (stock_number, _) = self.stock_state(&original.product_id).await?;
        let result = stock_number + count;

        self.set_stock(&original.product_id, result).await?;
        let movement = self
            .append_movement(
                &original.product_id,
                count,
                &source,
                original.unit_price,
                result,
                Some(&format!("Reversal of movement {}", movement_id)),
                &actor.staff_id,
            )
            .await?;
        self.mark_reversed(movement_id, movement.id).await?;

        let lots: Vec<LotUse> = consumed
            .iter()
            .map(|c| LotUse {
                lot_id: c.lot_id,
                unit_price: c.unit_price,
                item_count: c.item_count,
            })
            .collect();
        let found: i64 = lots.iter().map(|l| l.item_count).sum();

        debug!(
            movement_id,
            product_id = %original.product_id,
            count,
            lots = lots.len(),
            "Decrease reversed"
        );

        Ok(StockChange {
            movement,
            total_wholesale_price: lots.iter().map(|l| l.unit_price * l.item_count).sum(),
            found_count: found,
            nothing_count: count - found,
            lots,
        })
    }

    /// Undoes an increase: removes the remaining units of the lots it
    /// created, falling back to FIFO over other lots for units already sold.
    pub async fn reverse_increase(
        &mut self,
        movement_id: i64,
        source: StockSource,
        actor: &Actor,
    ) -> DbResult<StockChange> {
        let original = self.reversible(movement_id).await?;
        if original.item_count <= 0 {
            return Err(DbError::InvalidReversal {
                movement_id,
                reason: "not an increase".to_string(),
            });
        }

        let count = original.item_count;
        let (stock_number, infinite_stock) = self.stock_state(&original.product_id).await?;
        let result = stock_number - count;
        if result < 0 && !infinite_stock {
            return Err(CoreError::InsufficientStock {
                product_id: original.product_id.clone(),
                available: stock_number,
                requested: count,
            }
            .into());
        }

        let own_lots = sqlx::query_as::<_, WholesaleLot>(
            r#"
            SELECT * FROM wholesale_lots
            WHERE stock_movement_id = ?1 AND remaining_item_count > 0
            ORDER BY id ASC
            "#,
        )
        .bind(movement_id)
        .fetch_all(&mut *self.conn)
        .await?;

        let mut plan = plan_consumption(&own_lots, count);
        if plan.nothing_count > 0 {
            let other_lots = self
                .load_lots(&original.product_id, LotOrder::OldestFirst, Some(movement_id))
                .await?;
            let fallback = plan_consumption(&other_lots, plan.nothing_count);
            plan.extend(fallback);
        }

        self.set_stock(&original.product_id, result).await?;
        let movement = self
            .append_movement(
                &original.product_id,
                -count,
                &source,
                original.unit_price,
                result,
                Some(&format!("Reversal of movement {}", movement_id)),
                &actor.staff_id,
            )
            .await?;
        self.consume(movement.id, &plan.uses).await?;
        self.mark_reversed(movement_id, movement.id).await?;

        debug!(
            movement_id,
            product_id = %original.product_id,
            count,
            nothing_count = plan.nothing_count,
            "Increase reversed"
        );

        Ok(StockChange {
            movement,
            total_wholesale_price: plan.total_wholesale_price,
            found_count: plan.found_count,
            nothing_count: plan.nothing_count,
            lots: plan.uses,
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn movement(&mut self, id: i64) -> DbResult<StockMovement> {
        sqlx::query_as::<_, StockMovement>("SELECT * FROM stock_movements WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?
            .ok_or_else(|| DbError::not_found("StockMovement", id.to_string()))
    }

    /// Movements caused by one source that have not been reversed yet.
    pub async fn open_movements_for_source(
        &mut self,
        kind: StockSourceKind,
        source_id: &str,
    ) -> DbResult<Vec<StockMovement>> {
        let movements = sqlx::query_as::<_, StockMovement>(
            r#"
            SELECT * FROM stock_movements
            WHERE source_kind = ?1 AND source_id = ?2 AND reversed_by_movement_id IS NULL
            ORDER BY id ASC
            "#,
        )
        .bind(kind)
        .bind(source_id)
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(movements)
    }

    /// Full ledger of a product, in append order.
    pub async fn movements_for_product(&mut self, product_id: &str) -> DbResult<Vec<StockMovement>> {
        let movements = sqlx::query_as::<_, StockMovement>(
            "SELECT * FROM stock_movements WHERE product_id = ?1 ORDER BY id ASC",
        )
        .bind(product_id)
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(movements)
    }

    pub async fn lots_for_product(&mut self, product_id: &str) -> DbResult<Vec<WholesaleLot>> {
        let lots = sqlx::query_as::<_, WholesaleLot>(
            "SELECT * FROM wholesale_lots WHERE product_id = ?1 ORDER BY id ASC",
        )
        .bind(product_id)
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(lots)
    }

    pub async fn consumptions(&mut self, movement_id: i64) -> DbResult<Vec<LotConsumption>> {
        let rows = sqlx::query_as::<_, LotConsumption>(
            r#"
            SELECT stock_movement_id, lot_id, item_count, unit_price
            FROM lot_consumptions
            WHERE stock_movement_id = ?1
            ORDER BY lot_id ASC
            "#,
        )
        .bind(movement_id)
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(rows)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn stock_state(&mut self, product_id: &str) -> DbResult<(i64, bool)> {
        sqlx::query_as::<_, (i64, bool)>(
            "SELECT stock_number, infinite_stock FROM products WHERE id = ?1",
        )
        .bind(product_id)
        .fetch_optional(&mut *self.conn)
        .await?
        .ok_or_else(|| DbError::not_found("Product", product_id))
    }

    async fn set_stock(&mut self, product_id: &str, stock_number: i64) -> DbResult<()> {
        sqlx::query("UPDATE products SET stock_number = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(stock_number)
            .bind(Utc::now())
            .bind(product_id)
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    async fn load_lots(
        &mut self,
        product_id: &str,
        order: LotOrder,
        exclude_movement: Option<i64>,
    ) -> DbResult<Vec<WholesaleLot>> {
        let sql = match order {
            LotOrder::OldestFirst => {
                r#"
                SELECT * FROM wholesale_lots
                WHERE product_id = ?1 AND remaining_item_count > 0
                  AND (?2 IS NULL OR stock_movement_id IS NULL OR stock_movement_id != ?2)
                ORDER BY id ASC
                "#
            }
            LotOrder::NewestFirst => {
                r#"
                SELECT * FROM wholesale_lots
                WHERE product_id = ?1 AND remaining_item_count > 0
                  AND (?2 IS NULL OR stock_movement_id IS NULL OR stock_movement_id != ?2)
                ORDER BY id DESC
                "#
            }
        };

        let lots = sqlx::query_as::<_, WholesaleLot>(sql)
            .bind(product_id)
            .bind(exclude_movement)
            .fetch_all(&mut *self.conn)
            .await?;
        Ok(lots)
    }

    #[allow(clippy::too_many_arguments)]
    async fn append_movement(
        &mut self,
        product_id: &str,
        item_count: i64,
        source: &StockSource,
        unit_price: i64,
        result_stock_number: i64,
        description: Option<&str>,
        staff_id: &str,
    ) -> DbResult<StockMovement> {
        let movement = sqlx::query_as::<_, StockMovement>(
            r#"
            INSERT INTO stock_movements (
                product_id, item_count, source_kind, source_id, unit_price,
                result_stock_number, description, staff_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            RETURNING *
            "#,
        )
        .bind(product_id)
        .bind(item_count)
        .bind(source.kind())
        .bind(source.source_id())
        .bind(unit_price)
        .bind(result_stock_number)
        .bind(description)
        .bind(staff_id)
        .bind(Utc::now())
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(movement)
    }

    async fn consume(&mut self, movement_id: i64, uses: &[LotUse]) -> DbResult<()> {
        for lot in uses {
            let taken = sqlx::query(
                r#"
                UPDATE wholesale_lots
                SET remaining_item_count = remaining_item_count - ?1
                WHERE id = ?2 AND remaining_item_count >= ?1
                "#,
            )
            .bind(lot.item_count)
            .bind(lot.lot_id)
            .execute(&mut *self.conn)
            .await?;

            if taken.rows_affected() != 1 {
                return Err(DbError::conflict(
                    "WholesaleLot",
                    lot.lot_id.to_string(),
                    "remaining units changed during consumption",
                ));
            }

            sqlx::query(
                r#"
                INSERT INTO lot_consumptions (stock_movement_id, lot_id, item_count, unit_price)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(movement_id)
            .bind(lot.lot_id)
            .bind(lot.item_count)
            .bind(lot.unit_price)
            .execute(&mut *self.conn)
            .await?;
        }
        Ok(())
    }

    async fn reversible(&mut self, movement_id: i64) -> DbResult<StockMovement> {
        let movement = self.movement(movement_id).await?;
        if let Some(by) = movement.reversed_by_movement_id {
            return Err(DbError::InvalidReversal {
                movement_id,
                reason: format!("already reversed by movement {}", by),
            });
        }
        Ok(movement)
    }

    async fn mark_reversed(&mut self, movement_id: i64, reversed_by: i64) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE stock_movements SET reversed_by_movement_id = ?1
            WHERE id = ?2 AND reversed_by_movement_id IS NULL
            "#,
        )
        .bind(reversed_by)
        .bind(movement_id)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() != 1 {
            return Err(DbError::InvalidReversal {
                movement_id,
                reason: "reversed concurrently".to_string(),
            });
        }
        Ok(())
    }
}

fn ensure_positive(count: i64) -> DbResult<()> {
    kura_core::validation::validate_item_count(count).map_err(|e| DbError::Core(e.into()))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{actor, increase, seed_product};
    use crate::{Database, DbConfig};

    fn sell(product_id: &str, count: i64) -> StockMove {
        StockMove::new(
            product_id,
            count,
            StockSource::Sell {
                transaction_id: "t-1".to_string(),
            },
            &actor(),
        )
        .unit_price(1000)
    }

    async fn db_with_two_lots() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed_product(&db, "p-1", 0, 0).await;

        let mut uow = db.begin().await.unwrap();
        uow.stock()
            .increase(&increase("p-1", 5), &[WholesaleRecord::new(100, 5)])
            .await
            .unwrap();
        uow.stock()
            .increase(&increase("p-1", 5), &[WholesaleRecord::new(120, 5)])
            .await
            .unwrap();
        uow.commit().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_fifo_decrease_scenario() {
        let db = db_with_two_lots().await;
        let mut uow = db.begin().await.unwrap();

        let change = uow.stock().decrease(&sell("p-1", 7)).await.unwrap();
        assert_eq!(change.total_wholesale_price, 740);
        assert_eq!(change.nothing_count, 0);
        assert_eq!(change.movement.result_stock_number, 3);
        assert_eq!(change.movement.item_count, -7);

        let lots = uow.stock().lots_for_product("p-1").await.unwrap();
        assert_eq!(lots[0].remaining_item_count, 0);
        assert_eq!(lots[1].remaining_item_count, 3);
    }

    #[tokio::test]
    async fn test_insufficient_stock_leaves_stock_unchanged() {
        let db = db_with_two_lots().await;
        let mut uow = db.begin().await.unwrap();

        let err = uow.stock().decrease(&sell("p-1", 11)).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Core(CoreError::InsufficientStock { available: 10, requested: 11, .. })
        ));

        let product = uow.products().require("p-1").await.unwrap();
        assert_eq!(product.stock_number, 10);
        assert_eq!(uow.stock().movements_for_product("p-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_infinite_stock_never_fails() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut p = crate::testing::product("svc", 0);
        p.infinite_stock = true;
        let mut uow = db.begin().await.unwrap();
        uow.products().insert(&p).await.unwrap();

        let change = uow.stock().decrease(&sell("svc", 3)).await.unwrap();
        assert_eq!(change.movement.result_stock_number, -3);
        assert_eq!(change.nothing_count, 3);
        assert_eq!(change.total_wholesale_price, 0);
    }

    #[tokio::test]
    async fn test_reverse_decrease_restores_exact_lots() {
        let db = db_with_two_lots().await;
        let mut uow = db.begin().await.unwrap();

        let before = uow.stock().lots_for_product("p-1").await.unwrap();
        let change = uow.stock().decrease(&sell("p-1", 7)).await.unwrap();

        let reversal = uow
            .stock()
            .reverse_decrease(
                change.movement.id,
                StockSource::SellReturn {
                    transaction_id: "t-2".to_string(),
                },
                &actor(),
            )
            .await
            .unwrap();
        assert_eq!(reversal.movement.item_count, 7);
        assert_eq!(reversal.movement.result_stock_number, 10);
        assert_eq!(reversal.total_wholesale_price, 740);

        let after = uow.stock().lots_for_product("p-1").await.unwrap();
        assert_eq!(before, after);

        let again = uow
            .stock()
            .reverse_decrease(change.movement.id, StockSource::Reversal { transaction_id: "t-1".to_string() }, &actor())
            .await;
        assert!(matches!(again, Err(DbError::InvalidReversal { .. })));
    }

    #[tokio::test]
    async fn test_reverse_increase_prefers_own_lots() {
        let db = db_with_two_lots().await;
        let mut uow = db.begin().await.unwrap();

        let bought = uow
            .stock()
            .increase(&increase("p-1", 2), &[WholesaleRecord::new(300, 2)])
            .await
            .unwrap();
        uow.stock().decrease(&sell("p-1", 1).order(LotOrder::NewestFirst)).await.unwrap();

        let reversal = uow
            .stock()
            .reverse_increase(
                bought.movement.id,
                StockSource::BuyReturn {
                    transaction_id: "t-9".to_string(),
                },
                &actor(),
            )
            .await
            .unwrap();

        // one unit from its own lot, one from the oldest other lot
        assert_eq!(reversal.total_wholesale_price, 300 + 100);
        assert_eq!(reversal.movement.result_stock_number, 9);
        assert_eq!(reversal.nothing_count, 0);
    }

    #[tokio::test]
    async fn test_ledger_replay_matches_stock_number() {
        let db = db_with_two_lots().await;
        let mut uow = db.begin().await.unwrap();
        uow.stock().decrease(&sell("p-1", 4)).await.unwrap();
        uow.stock()
            .increase(&increase("p-1", 3), &[WholesaleRecord::new(90, 3)])
            .await
            .unwrap();
        uow.stock().decrease(&sell("p-1", 2)).await.unwrap();

        let movements = uow.stock().movements_for_product("p-1").await.unwrap();
        let mut replayed = 0;
        for m in &movements {
            replayed += m.item_count;
            assert_eq!(m.result_stock_number, replayed);
        }
        let product = uow.products().require("p-1").await.unwrap();
        assert_eq!(product.stock_number, replayed);
    }

    #[tokio::test]
    async fn test_price_anchor_only_from_zero() {
        let db = db_with_two_lots().await;
        let mut uow = db.begin().await.unwrap();
        let lots = uow.stock().lots_for_product("p-1").await.unwrap();
        assert!(lots[0].is_price_anchor);
        assert!(!lots[1].is_price_anchor);
    }

    #[tokio::test]
    async fn test_increase_tags_lots_with_resource() {
        let db = db_with_two_lots().await;
        let mut uow = db.begin().await.unwrap();

        let mv = increase("p-1", 6).resource(LotResourceType::PackOpening, Some("pack-7".to_string()));
        uow.stock().increase(&mv, &[WholesaleRecord::new(50, 6)]).await.unwrap();

        let lots = uow.stock().lots_for_product("p-1").await.unwrap();
        assert_eq!(lots[0].resource_type, LotResourceType::Product);
        let opened = lots.last().unwrap();
        assert_eq!(opened.resource_type, LotResourceType::PackOpening);
        assert_eq!(opened.resource_id.as_deref(), Some("pack-7"));
    }

    #[tokio::test]
    async fn test_wholesale_records_is_read_only() {
        let db = db_with_two_lots().await;
        let mut uow = db.begin().await.unwrap();

        let newest = uow
            .stock()
            .wholesale_records("p-1", 6, LotOrder::NewestFirst)
            .await
            .unwrap();
        assert_eq!(newest.total_wholesale_price, 120 * 5 + 100);

        let lots = uow.stock().lots_for_product("p-1").await.unwrap();
        assert!(lots.iter().all(|l| l.remaining_item_count == 5));
    }
}
