//! # Register Repository
//!
//! Registers and their cash ledger.
//!
//! `registers.cash_balance` only moves together with an appended
//! `register_cash_movements` row, so the sum of a register's movements is
//! always its balance.

use chrono::Utc;
use kura_core::{Actor, CashSourceKind, Register, RegisterCashMovement};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{DbError, DbResult};

/// Repository for registers and cash movements.
pub struct RegisterRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> RegisterRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        RegisterRepository { conn }
    }

    pub async fn get(&mut self, id: &str) -> DbResult<Option<Register>> {
        let register = sqlx::query_as::<_, Register>("SELECT * FROM registers WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(register)
    }

    pub async fn require(&mut self, id: &str) -> DbResult<Register> {
        self.get(id)
            .await?
            .ok_or_else(|| DbError::not_found("Register", id))
    }

    /// Inserts a register. A non-zero opening balance is written through the
    /// ledger as a manual movement.
    pub async fn insert(&mut self, register: &Register) -> DbResult<()> {
        debug!(id = %register.id, "Inserting register");

        sqlx::query(
            r#"
            INSERT INTO registers (id, store_id, display_name, cash_balance, terminal_device_id, created_at)
            VALUES (?1, ?2, ?3, 0, ?4, ?5)
            "#,
        )
        .bind(&register.id)
        .bind(&register.store_id)
        .bind(&register.display_name)
        .bind(&register.terminal_device_id)
        .bind(register.created_at)
        .execute(&mut *self.conn)
        .await?;

        if register.cash_balance != 0 {
            self.change_cash(
                &register.id,
                register.cash_balance,
                CashSourceKind::Manual,
                None,
                Some("Opening balance"),
                &Actor::system(),
            )
            .await?;
        }
        Ok(())
    }

    /// Appends a signed cash movement and moves the balance with it.
    pub async fn change_cash(
        &mut self,
        register_id: &str,
        change_price: i64,
        source_kind: CashSourceKind,
        source_id: Option<&str>,
        description: Option<&str>,
        actor: &Actor,
    ) -> DbResult<RegisterCashMovement> {
        let balance: i64 = sqlx::query_scalar(
            "UPDATE registers SET cash_balance = cash_balance + ?1 WHERE id = ?2 RETURNING cash_balance",
        )
        .bind(change_price)
        .bind(register_id)
        .fetch_optional(&mut *self.conn)
        .await?
        .ok_or_else(|| DbError::not_found("Register", register_id))?;

        let movement = sqlx::query_as::<_, RegisterCashMovement>(
            r#"
            INSERT INTO register_cash_movements (
                register_id, change_price, result_cash_balance, source_kind,
                source_id, description, staff_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            RETURNING *
            "#,
        )
        .bind(register_id)
        .bind(change_price)
        .bind(balance)
        .bind(source_kind)
        .bind(source_id)
        .bind(description)
        .bind(&actor.staff_id)
        .bind(Utc::now())
        .fetch_one(&mut *self.conn)
        .await?;

        debug!(
            register_id,
            change_price,
            result_cash_balance = balance,
            ?source_kind,
            "Cash changed"
        );
        Ok(movement)
    }

    /// Cash movements written for one transaction (any source kind).
    pub async fn movements_for_source(&mut self, source_id: &str) -> DbResult<Vec<RegisterCashMovement>> {
        let rows = sqlx::query_as::<_, RegisterCashMovement>(
            "SELECT * FROM register_cash_movements WHERE source_id = ?1 ORDER BY id ASC",
        )
        .bind(source_id)
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(rows)
    }

    /// Full cash ledger of a register, in append order.
    pub async fn movements(&mut self, register_id: &str) -> DbResult<Vec<RegisterCashMovement>> {
        let rows = sqlx::query_as::<_, RegisterCashMovement>(
            "SELECT * FROM register_cash_movements WHERE register_id = ?1 ORDER BY id ASC",
        )
        .bind(register_id)
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::register;
    use crate::{Database, DbConfig};

    #[tokio::test]
    async fn test_balance_equals_movement_sum() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut uow = db.begin().await.unwrap();

        let mut r = register("r-1", None);
        r.cash_balance = 5000;
        uow.registers().insert(&r).await.unwrap();

        let actor = Actor::staff("s-1");
        uow.registers()
            .change_cash("r-1", 1200, CashSourceKind::TransactionSell, Some("t-1"), None, &actor)
            .await
            .unwrap();
        let back = uow
            .registers()
            .change_cash("r-1", -1200, CashSourceKind::TransactionSellReturn, Some("t-2"), None, &actor)
            .await
            .unwrap();
        assert_eq!(back.result_cash_balance, 5000);

        let movements = uow.registers().movements("r-1").await.unwrap();
        let sum: i64 = movements.iter().map(|m| m.change_price).sum();
        assert_eq!(movements.len(), 3);
        assert_eq!(sum, uow.registers().require("r-1").await.unwrap().cash_balance);
    }

    #[tokio::test]
    async fn test_unknown_register() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut uow = db.begin().await.unwrap();
        let err = uow
            .registers()
            .change_cash("nope", 1, CashSourceKind::Manual, None, None, &Actor::system())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }
}
