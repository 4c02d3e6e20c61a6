//! # kura-engine: Transaction Orchestration for Kura
//!
//! Drives sell and buy transactions from draft to a terminal status and
//! reverses them through returns, keeping stock, cost lots, and register
//! cash consistent inside one unit of work per operation.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        kura-engine (THIS CRATE)                         │
//! │                                                                         │
//! │  caller ──► EngineService                                               │
//! │               │                                                         │
//! │               ├── service.rs   create / validate / cancel / stock ops   │
//! │               ├── payment.rs   settle, terminal confirm, watchdog       │
//! │               └── returns.rs   mirror transaction, refund polling       │
//! │               │                                                         │
//! │               ▼                                                         │
//! │      kura-db UnitOfWork ──► StockLedger, Transactions, Registers ...    │
//! │               │                                                         │
//! │               ▼                                                         │
//! │      Collaborators: PaymentProvider, LoyaltyLedger,                     │
//! │                     NotificationDispatcher                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`service`] - The engine handle, requests, draft creation, stock ops
//! - [`payment`] - Settlement paths and the terminal payment watchdog
//! - [`returns`] - Return engine
//! - [`collaborators`] - Traits for the external systems the engine calls
//! - [`config`] - TOML configuration with `KURA_*` overrides
//! - [`error`] - Caller-facing error taxonomy
//! - [`telemetry`] - Tracing subscriber setup
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kura_engine::{init_tracing, EngineConfig, EngineService, DEFAULT_FILTER};
//!
//! init_tracing(DEFAULT_FILTER);
//! let config = EngineConfig::load(None)?;
//! let engine = EngineService::connect(&config, collaborators).await?;
//!
//! let draft = engine.create_transaction(request, &actor).await?;
//! let tx = engine.process_payment(&draft.id, &payment, &actor).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod collaborators;
pub mod config;
pub mod error;
pub mod payment;
pub mod returns;
pub mod service;
pub mod telemetry;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use collaborators::{
    CheckoutStatus, CollaboratorError, CollaboratorResult, Collaborators, LoyaltyLedger,
    NotificationDispatcher, PaymentProvider, PointGrant, RefundStatus,
};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult, ErrorCode, ErrorResponse};
pub use returns::ReturnOptions;
pub use service::{AdjustStock, CreateTransaction, EngineService, PaymentRequest};
pub use telemetry::{init_tracing, DEFAULT_FILTER};
