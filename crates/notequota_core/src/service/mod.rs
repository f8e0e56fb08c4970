//! Quota engine services.
//!
//! # Responsibility
//! - Admission checks, transactional mutation, cascade deletes, orphan
//!   reconciliation, ledger audit and usage reporting.
//! - Keep the engine facade free of SQL and storage details.

pub mod admission;
pub mod audit;
pub mod cascade;
pub mod mutator;
pub mod reconciler;
pub(crate) mod retry;
pub mod usage;
