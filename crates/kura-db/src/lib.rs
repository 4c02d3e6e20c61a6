//! # kura-db: Database Layer for Kura
//!
//! SQLite persistence for the transaction core, through sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Kura Data Flow                                 │
//! │                                                                         │
//! │  kura-engine (EngineService::process_payment)                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     kura-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  UnitOfWork   │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │───►│ (one SQLite   │    │  (embedded)  │  │   │
//! │  │   │               │    │  transaction) │    │              │  │   │
//! │  │   │ SqlitePool    │    │ StockLedger   │    │ 001_initial  │  │   │
//! │  │   │ busy_timeout  │    │ Transactions  │    │   _schema    │  │   │
//! │  │   │               │    │ Registers ... │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (WAL) ── kura.db                                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`unit_of_work`] - The atomic unit every mutation runs in
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Ledger and aggregate repositories
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kura_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("kura.db")).await?;
//!
//! let mut uow = db.begin().await?;
//! let change = uow.stock().decrease(&mv).await?;
//! uow.commit().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod unit_of_work;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use unit_of_work::UnitOfWork;

// Repository re-exports for convenience
pub use repository::product::ProductRepository;
pub use repository::register::RegisterRepository;
pub use repository::reservation::ReservationRepository;
pub use repository::set_deal::SetDealRepository;
pub use repository::stock::{StockChange, StockLedger, StockMove};
pub use repository::transaction::{generate_id, TransactionRepository};
