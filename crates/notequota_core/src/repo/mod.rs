//! Ledger persistence.
//!
//! # Responsibility
//! - Define read contracts over accounts, modules, notes and media rows.
//! - Keep SQL writes used inside ledger transactions out of service code.
//!
//! # Invariants
//! - Repositories only accept connections migrated to the latest schema.
//! - Write helpers never open or commit transactions themselves.

pub mod ledger_repo;
pub mod ledger_writes;
