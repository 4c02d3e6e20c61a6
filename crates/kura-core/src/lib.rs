//! # kura-core: Pure Transaction & Inventory Rules
//!
//! Everything Kura decides without touching a database: cart validation,
//! FIFO cost planning, set-deal matching, commission and tax math, and the
//! transaction status table.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Kura Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                kura-engine (orchestration)                      │   │
//! │  │  create ─► pay ─► confirm / timeout-cancel ─► return            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ kura-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌────────┐ ┌────────┐ ┌────────┐ ┌──────────┐ ┌──────────┐   │   │
//! │  │   │ types  │ │ money  │ │  cart  │ │  stock   │ │ set_deal │   │   │
//! │  │   └────────┘ └────────┘ └────────┘ └──────────┘ └──────────┘   │   │
//! │  │   ┌────────────┐ ┌────────┐ ┌────────────┐                      │   │
//! │  │   │ commission │ │ state  │ │ validation │                      │   │
//! │  │   └────────────┘ └────────┘ └────────────┘                      │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                kura-db (SQLite, units of work)                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Records and enums (Transaction, CartLine, StockMovement, ...)
//! - [`money`] - Integer money with tax, percent and split helpers
//! - [`cart`] - The cart validator
//! - [`stock`] - Movement sources and the FIFO planner
//! - [`set_deal`] - Bundle discount matching
//! - [`commission`] - Consignment commission table
//! - [`state`] - Transaction status edges and settlement paths
//! - [`validation`] - Input checks
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use kura_core::stock::{plan_consumption};
//! use kura_core::Money;
//!
//! let plan = plan_consumption(&[], 3);
//! assert_eq!(plan.nothing_count, 3);
//! assert_eq!(Money::from_minor(1000).percent_of(13).minor(), 130);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cart;
pub mod commission;
pub mod error;
pub mod money;
pub mod set_deal;
pub mod state;
pub mod stock;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use cart::{CartContext, CartLineInput, CartRequest, CartTotals, PricedLine, ValidatedCart};
pub use commission::CommissionTable;
pub use error::{CartRule, CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use stock::{ConsumptionPlan, LotOrder, StockSource, WholesaleRecord};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum lines in a single cart.
pub const MAX_CART_LINES: usize = 100;

/// Maximum quantity on a single line.
///
/// Also bounds manual adjustments and loss records.
pub const MAX_ITEM_QUANTITY: i64 = 999;
