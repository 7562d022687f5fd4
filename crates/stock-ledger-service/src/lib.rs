//! Stock Ledger HTTP API Service.
//!
//! This crate provides the write path and the HTTP API of the stock ledger:
//!
//! - The ledger writer, the only component that appends entries and moves
//!   balance rows
//! - The idempotency guard for retryable mutating requests
//! - Sale checkout and void
//! - Stock document workflows (purchase orders, transfers, adjustments,
//!   stock counts)
//! - Ledger-vs-system and physical-vs-system reconciliation
//!
//! # Concurrency
//!
//! Writers serialize per stock key on row locks held by the store. Lock
//! contention is retried with exponential backoff by [`ledger::RetryPolicy`];
//! a caller that exhausts the budget sees `balance_cache_write_conflict`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result

pub mod config;
pub mod error;
pub mod handlers;
pub mod idempotency;
pub mod ledger;
pub mod reconciliation;
pub mod routes;
pub mod sales;
pub mod state;
pub mod workflow;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use idempotency::IdempotencyGuard;
pub use ledger::{LedgerWriter, RetryPolicy};
pub use reconciliation::ReconciliationEngine;
pub use routes::create_router;
pub use sales::{SaleLine, SaleReceipt, SaleRequest, SalesService};
pub use state::AppState;
pub use workflow::{NewDocument, TransitionOutcome, WorkflowService};
