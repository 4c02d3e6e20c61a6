//! # Unit of Work
//!
//! One SQLite transaction that every repository of a single operation
//! shares.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  db.begin() ──► BEGIN; touch unit_of_work_lock (write lock taken)      │
//! │      │                                                                  │
//! │      ├── uow.stock().decrease(..)                                      │
//! │      ├── uow.registers().change_cash(..)                               │
//! │      ├── uow.transactions().complete(..)                               │
//! │      │                                                                  │
//! │      ├── uow.commit()   ──► COMMIT   (all effects visible)             │
//! │      └── drop / rollback ──► ROLLBACK (nothing persisted)              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//! Taking the write lock first means a read-then-write sequence (FIFO lot
//! consumption, status checks) can never interleave with another writer.

use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::error::DbResult;
use crate::repository::product::ProductRepository;
use crate::repository::register::RegisterRepository;
use crate::repository::reservation::ReservationRepository;
use crate::repository::set_deal::SetDealRepository;
use crate::repository::stock::StockLedger;
use crate::repository::transaction::TransactionRepository;

/// An open database transaction plus repository accessors.
pub struct UnitOfWork {
    tx: Transaction<'static, Sqlite>,
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork").finish_non_exhaustive()
    }
}

impl UnitOfWork {
    pub(crate) async fn begin(pool: &SqlitePool) -> DbResult<Self> {
        let mut tx = pool.begin().await?;

        sqlx::query("UPDATE unit_of_work_lock SET acquired_at = ?1 WHERE id = 1")
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        debug!("Unit of work started");
        Ok(UnitOfWork { tx })
    }

    pub(crate) async fn begin_read(pool: &SqlitePool) -> DbResult<Self> {
        let tx = pool.begin().await?;
        Ok(UnitOfWork { tx })
    }

    /// Products and their cached statistics.
    pub fn products(&mut self) -> ProductRepository<'_> {
        ProductRepository::new(&mut self.tx)
    }

    /// Stock ledger and cost lots.
    pub fn stock(&mut self) -> StockLedger<'_> {
        StockLedger::new(&mut self.tx)
    }

    /// Transactions, cart lines and payment records.
    pub fn transactions(&mut self) -> TransactionRepository<'_> {
        TransactionRepository::new(&mut self.tx)
    }

    /// Registers and the cash ledger.
    pub fn registers(&mut self) -> RegisterRepository<'_> {
        RegisterRepository::new(&mut self.tx)
    }

    /// Reservations and receptions.
    pub fn reservations(&mut self) -> ReservationRepository<'_> {
        ReservationRepository::new(&mut self.tx)
    }

    /// Set deals.
    pub fn set_deals(&mut self) -> SetDealRepository<'_> {
        SetDealRepository::new(&mut self.tx)
    }

    /// Persists every effect of this unit of work.
    pub async fn commit(self) -> DbResult<()> {
        self.tx.commit().await?;
        debug!("Unit of work committed");
        Ok(())
    }

    /// Discards every effect of this unit of work.
    pub async fn rollback(self) -> DbResult<()> {
        self.tx.rollback().await?;
        debug!("Unit of work rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{product, seed_product};
    use crate::{Database, DbConfig};

    #[tokio::test]
    async fn test_drop_discards_effects() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        {
            let mut uow = db.begin().await.unwrap();
            uow.products().insert(&product("p-1", 0)).await.unwrap();
            // dropped without commit
        }

        let mut uow = db.begin_read().await.unwrap();
        assert!(uow.products().get("p-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_persists_effects() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed_product(&db, "p-1", 4, 100).await;

        let mut uow = db.begin_read().await.unwrap();
        let found = uow.products().get("p-1").await.unwrap().unwrap();
        assert_eq!(found.stock_number, 4);
    }
}
