//! Domain model for the quota ledger.
//!
//! # Responsibility
//! - Define the account → module → note → media hierarchy as read models.
//! - Define tier policies and the `Limit` comparison semantics.
//!
//! # Invariants
//! - Every ledger entity is identified by a stable UUID.
//! - Counter fields are never constructed from caller input; they are read
//!   back from storage after the mutator or cascade deleter wrote them.

pub mod ledger;
pub mod tier;
