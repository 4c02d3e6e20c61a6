//! # Transaction Repository
//!
//! Transactions, their cart lines, applied set deals and payment records.
//!
//! ## Transaction Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  1. CREATE                                                             │
//! │     └── insert() + insert_lines() → Transaction { status: Draft }      │
//! │                                                                         │
//! │  2. PAY                                                                │
//! │     ├── complete(Draft)           cash / bank / manual                 │
//! │     └── set_paying(checkout)      terminal                             │
//! │            └── complete(Paying) | update_status(Paying → Canceled)     │
//! │                                                                         │
//! │  3. RECORD                                                             │
//! │     └── insert_payment() → exactly one Payment per transaction         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//! Status writes are compare-and-set on the expected current status and
//! must also be an edge of [`kura_core::state::can_transition`].

use chrono::{DateTime, Utc};
use kura_core::set_deal::RequestedSetDeal;
use kura_core::state;
use kura_core::{CartLine, Payment, Transaction, TransactionStatus};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{DbError, DbResult};

/// Repository for transaction database operations.
pub struct TransactionRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> TransactionRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        TransactionRepository { conn }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get(&mut self, id: &str) -> DbResult<Option<Transaction>> {
        let tx = sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(tx)
    }

    pub async fn require(&mut self, id: &str) -> DbResult<Transaction> {
        self.get(id)
            .await?
            .ok_or_else(|| DbError::not_found("Transaction", id))
    }

    /// Cart lines in line order.
    pub async fn lines(&mut self, transaction_id: &str) -> DbResult<Vec<CartLine>> {
        let lines = sqlx::query_as::<_, CartLine>(
            "SELECT * FROM cart_lines WHERE transaction_id = ?1 ORDER BY line_no ASC",
        )
        .bind(transaction_id)
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(lines)
    }

    pub async fn set_deals(&mut self, transaction_id: &str) -> DbResult<Vec<RequestedSetDeal>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT set_deal_id, apply_count FROM transaction_set_deals WHERE transaction_id = ?1 ORDER BY set_deal_id",
        )
        .bind(transaction_id)
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(set_deal_id, apply_count)| RequestedSetDeal {
                set_deal_id,
                apply_count,
            })
            .collect())
    }

    pub async fn find_by_checkout(&mut self, checkout_id: &str) -> DbResult<Option<Transaction>> {
        let tx = sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions WHERE terminal_checkout_id = ?1",
        )
        .bind(checkout_id)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(tx)
    }

    pub async fn payment_for(&mut self, transaction_id: &str) -> DbResult<Option<Payment>> {
        let payment =
            sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE transaction_id = ?1")
                .bind(transaction_id)
                .fetch_optional(&mut *self.conn)
                .await?;
        Ok(payment)
    }

    /// Any live return of `original_id`, full or reservation cancel.
    pub async fn find_live_return(&mut self, original_id: &str) -> DbResult<Option<Transaction>> {
        let tx = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT * FROM transactions
            WHERE original_transaction_id = ?1 AND is_return = 1 AND status != 'canceled'
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(original_id)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(tx)
    }

    /// A live full return of `original_id` (not a reservation cancel, not canceled).
    pub async fn find_full_return(&mut self, original_id: &str) -> DbResult<Option<Transaction>> {
        let tx = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT * FROM transactions
            WHERE original_transaction_id = ?1 AND is_return = 1
              AND canceled_reception_id IS NULL AND status != 'canceled'
            LIMIT 1
            "#,
        )
        .bind(original_id)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(tx)
    }

    /// A live return of `original_id` that canceled one reservation deposit.
    pub async fn find_reception_return(
        &mut self,
        original_id: &str,
        reception_id: &str,
    ) -> DbResult<Option<Transaction>> {
        let tx = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT * FROM transactions
            WHERE original_transaction_id = ?1 AND is_return = 1
              AND canceled_reception_id = ?2 AND status != 'canceled'
            LIMIT 1
            "#,
        )
        .bind(original_id)
        .bind(reception_id)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(tx)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub async fn insert(&mut self, tx: &Transaction) -> DbResult<()> {
        debug!(id = %tx.id, kind = %tx.kind, total_price = tx.total_price, "Inserting transaction");

        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, store_id, kind, status, payment_method, channel, tax_mode, tax_rate_bps,
                subtotal_price, discount_price, set_deal_discount_price, point_discount_price,
                tax_price, included_tax_price, total_price,
                total_reservation_price, total_consignment_sale_price, total_consignment_commission_price,
                point_amount, total_point_amount, used_point,
                customer_id, original_transaction_id, is_return, register_id,
                terminal_checkout_id, staff_id, created_at, updated_at, finished_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8,
                ?9, ?10, ?11, ?12,
                ?13, ?14, ?15,
                ?16, ?17, ?18,
                ?19, ?20, ?21,
                ?22, ?23, ?24, ?25,
                ?26, ?27, ?28, ?29, ?30
            )
            "#,
        )
        .bind(&tx.id)
        .bind(&tx.store_id)
        .bind(tx.kind)
        .bind(tx.status)
        .bind(tx.payment_method)
        .bind(tx.channel)
        .bind(tx.tax_mode)
        .bind(tx.tax_rate_bps)
        .bind(tx.subtotal_price)
        .bind(tx.discount_price)
        .bind(tx.set_deal_discount_price)
        .bind(tx.point_discount_price)
        .bind(tx.tax_price)
        .bind(tx.included_tax_price)
        .bind(tx.total_price)
        .bind(tx.total_reservation_price)
        .bind(tx.total_consignment_sale_price)
        .bind(tx.total_consignment_commission_price)
        .bind(tx.point_amount)
        .bind(tx.total_point_amount)
        .bind(tx.used_point)
        .bind(&tx.customer_id)
        .bind(&tx.original_transaction_id)
        .bind(tx.is_return)
        .bind(&tx.register_id)
        .bind(&tx.terminal_checkout_id)
        .bind(&tx.staff_id)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .bind(tx.finished_at)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    pub async fn insert_lines(&mut self, lines: &[CartLine]) -> DbResult<()> {
        for line in lines {
            sqlx::query(
                r#"
                INSERT INTO cart_lines (
                    id, transaction_id, line_no, product_id, item_count, unit_price,
                    discount_price, original_unit_price, sale_id, sale_discount_price,
                    reservation_price, reservation_reception_id_for_deposit,
                    reservation_reception_id_for_receive, consignment_sale_unit_price,
                    consignment_commission_unit_price, total_unit_price, total_price,
                    wholesale_total_price, wholesale_nothing_count
                ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6,
                    ?7, ?8, ?9, ?10,
                    ?11, ?12,
                    ?13, ?14,
                    ?15, ?16, ?17,
                    ?18, ?19
                )
                "#,
            )
            .bind(&line.id)
            .bind(&line.transaction_id)
            .bind(line.line_no)
            .bind(&line.product_id)
            .bind(line.item_count)
            .bind(line.unit_price)
            .bind(line.discount_price)
            .bind(line.original_unit_price)
            .bind(&line.sale_id)
            .bind(line.sale_discount_price)
            .bind(line.reservation_price)
            .bind(&line.reservation_reception_id_for_deposit)
            .bind(&line.reservation_reception_id_for_receive)
            .bind(line.consignment_sale_unit_price)
            .bind(line.consignment_commission_unit_price)
            .bind(line.total_unit_price)
            .bind(line.total_price)
            .bind(line.wholesale_total_price)
            .bind(line.wholesale_nothing_count)
            .execute(&mut *self.conn)
            .await?;
        }
        Ok(())
    }

    pub async fn insert_set_deals(
        &mut self,
        transaction_id: &str,
        deals: &[RequestedSetDeal],
    ) -> DbResult<()> {
        for deal in deals {
            sqlx::query(
                "INSERT INTO transaction_set_deals (transaction_id, set_deal_id, apply_count) VALUES (?1, ?2, ?3)",
            )
            .bind(transaction_id)
            .bind(&deal.set_deal_id)
            .bind(deal.apply_count)
            .execute(&mut *self.conn)
            .await?;
        }
        Ok(())
    }

    /// Compare-and-set status change along an allowed edge.
    pub async fn update_status(
        &mut self,
        id: &str,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> DbResult<()> {
        state::ensure_transition(id, from, to)?;

        let result = sqlx::query(
            "UPDATE transactions SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        )
        .bind(to)
        .bind(Utc::now())
        .bind(id)
        .bind(from)
        .execute(&mut *self.conn)
        .await?;

        self.expect_one(result.rows_affected(), id, from).await?;
        debug!(transaction_id = id, %from, %to, "Transaction status changed");
        Ok(())
    }

    /// `draft → paying`, storing the checkout and register.
    pub async fn set_paying(&mut self, id: &str, checkout_id: &str, register_id: &str) -> DbResult<()> {
        state::ensure_transition(id, TransactionStatus::Draft, TransactionStatus::Paying)?;

        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET status = 'paying', terminal_checkout_id = ?1, register_id = ?2, updated_at = ?3
            WHERE id = ?4 AND status = 'draft'
            "#,
        )
        .bind(checkout_id)
        .bind(register_id)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *self.conn)
        .await?;

        self.expect_one(result.rows_affected(), id, TransactionStatus::Draft).await?;
        debug!(transaction_id = id, checkout_id, "Transaction paying");
        Ok(())
    }

    /// `from → completed`, stamping `finished_at` and the acting register.
    pub async fn complete(
        &mut self,
        id: &str,
        from: TransactionStatus,
        register_id: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> DbResult<()> {
        state::ensure_transition(id, from, TransactionStatus::Completed)?;

        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET status = 'completed', register_id = COALESCE(?1, register_id),
                finished_at = ?2, updated_at = ?2
            WHERE id = ?3 AND status = ?4
            "#,
        )
        .bind(register_id)
        .bind(finished_at)
        .bind(id)
        .bind(from)
        .execute(&mut *self.conn)
        .await?;

        self.expect_one(result.rows_affected(), id, from).await?;
        debug!(transaction_id = id, %from, "Transaction completed");
        Ok(())
    }

    pub async fn set_points(&mut self, id: &str, point_amount: i64, total_point_amount: i64) -> DbResult<()> {
        sqlx::query(
            "UPDATE transactions SET point_amount = ?1, total_point_amount = ?2, updated_at = ?3 WHERE id = ?4",
        )
        .bind(point_amount)
        .bind(total_point_amount)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    /// Stores the cost a line's stock decrease consumed.
    pub async fn set_line_wholesale(
        &mut self,
        line_id: &str,
        wholesale_total_price: i64,
        nothing_count: i64,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE cart_lines SET wholesale_total_price = ?1, wholesale_nothing_count = ?2 WHERE id = ?3",
        )
        .bind(wholesale_total_price)
        .bind(nothing_count)
        .bind(line_id)
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    /// Marks a return as canceling one reservation deposit.
    pub async fn set_canceled_reception(&mut self, id: &str, reception_id: &str) -> DbResult<()> {
        sqlx::query("UPDATE transactions SET canceled_reception_id = ?1 WHERE id = ?2")
            .bind(reception_id)
            .bind(id)
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    /// Detaches a failed return: back to `draft`, no original link.
    pub async fn reset_return(&mut self, id: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET status = 'draft', original_transaction_id = NULL, canceled_reception_id = NULL,
                finished_at = NULL, updated_at = ?1
            WHERE id = ?2 AND is_return = 1
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Transaction", id));
        }
        debug!(transaction_id = id, "Return reset to draft");
        Ok(())
    }

    pub async fn insert_payment(&mut self, payment: &Payment) -> DbResult<()> {
        debug!(
            transaction_id = %payment.transaction_id,
            method = %payment.method,
            total_amount = payment.total_amount,
            "Inserting payment"
        );

        sqlx::query(
            r#"
            INSERT INTO payments (
                id, transaction_id, mode, method, total_amount, cash_received,
                cash_change, cash_portion, terminal_checkout_id, external_refund_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&payment.id)
        .bind(&payment.transaction_id)
        .bind(payment.mode)
        .bind(payment.method)
        .bind(payment.total_amount)
        .bind(payment.cash_received)
        .bind(payment.cash_change)
        .bind(payment.cash_portion)
        .bind(&payment.terminal_checkout_id)
        .bind(&payment.external_refund_id)
        .bind(payment.created_at)
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    async fn expect_one(&mut self, rows: u64, id: &str, from: TransactionStatus) -> DbResult<()> {
        if rows == 1 {
            return Ok(());
        }
        let current = self.require(id).await?;
        Err(DbError::conflict(
            "Transaction",
            id,
            format!("expected {} but found {}", from, current.status),
        ))
    }
}

/// Generates a new transaction or line ID.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
