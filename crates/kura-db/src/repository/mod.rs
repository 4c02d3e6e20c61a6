//! # Repository Module
//!
//! Repositories for the Kura transaction core.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Engine operation                                                      │
//! │       │                                                                 │
//! │       │  let mut uow = db.begin().await?;                              │
//! │       │  uow.stock().decrease(&mv)                                     │
//! │       ▼                                                                 │
//! │  StockLedger<'c> ── borrows the unit of work's connection              │
//! │       │                                                                 │
//! │       │  SQL on the open transaction                                    │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! │  Every repository borrows one `&mut SqliteConnection`, so whatever it  │
//! │  writes commits or rolls back with the unit of work that lent it.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`ProductRepository`] - Products and cached cost statistics
//! - [`StockLedger`] - Stock movements, cost lots, reversals
//! - [`TransactionRepository`] - Transactions, cart lines, payments
//! - [`RegisterRepository`] - Registers and the cash ledger
//! - [`ReservationRepository`] - Reservations and receptions
//! - [`SetDealRepository`] - Set deals and their products
//!
//! [`ProductRepository`]: product::ProductRepository
//! [`StockLedger`]: stock::StockLedger
//! [`TransactionRepository`]: transaction::TransactionRepository
//! [`RegisterRepository`]: register::RegisterRepository
//! [`ReservationRepository`]: reservation::ReservationRepository
//! [`SetDealRepository`]: set_deal::SetDealRepository

pub mod product;
pub mod register;
pub mod reservation;
pub mod set_deal;
pub mod stock;
pub mod transaction;
